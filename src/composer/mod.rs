//! Builds a new arrangement on top of an existing set by cloning its first
//! MIDI and audio tracks, then lays out markers and tempo.

pub mod markers;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::als::{Document, DocumentError, Element, ElementId, MASTER_TRACK, Node, TRACKS, TrackKind};
use crate::devices::{self, DeviceLibrary};
use crate::identity::{self, DEFAULT_BATCH_STRIDE, IdRemap};

pub use markers::Section;

/// `NextPointeeId` ends up this far above the largest id after a compose.
pub const DEFAULT_COUNTER_MARGIN: u64 = 100;

const TEMPO_PATH: &[&str] = &[MASTER_TRACK, "DeviceChain", "Mixer", "Tempo"];

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("Base set has no {} to copy", .0.tag())]
    MissingArchetype(TrackKind),
    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// Which archetype a new track is cloned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchetypeKind {
    Midi,
    Audio,
}

impl fmt::Display for ArchetypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArchetypeKind::Midi => "midi",
            ArchetypeKind::Audio => "audio",
        })
    }
}

impl FromStr for ArchetypeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "midi" => Ok(ArchetypeKind::Midi),
            "audio" => Ok(ArchetypeKind::Audio),
            _ => Err(format!("unknown track kind: {s} (expected midi or audio)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackSpec {
    pub name: String,
    /// Live palette index.
    pub color: u32,
    pub kind: ArchetypeKind,
    /// Library template names, inserted in order.
    pub devices: Vec<String>,
}

impl TrackSpec {
    pub fn new(name: impl Into<String>, kind: ArchetypeKind, color: u32) -> Self {
        Self {
            name: name.into(),
            color,
            kind,
            devices: Vec::new(),
        }
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.devices.push(device.into());
        self
    }
}

/// `NAME[:KIND[:COLOR]]`, kind defaulting to midi and color to 0.
impl FromStr for TrackSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let name = parts.next().unwrap_or_default().trim();
        if name.is_empty() {
            return Err(format!("track needs a name: {s:?}"));
        }
        let kind = match parts.next() {
            Some(k) => k.trim().parse()?,
            None => ArchetypeKind::Midi,
        };
        let color = match parts.next() {
            Some(c) => c
                .trim()
                .parse()
                .map_err(|_| format!("color must be a palette index: {c:?}"))?,
            None => 0,
        };
        Ok(TrackSpec::new(name, kind, color))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompositionPlan {
    pub tracks: Vec<TrackSpec>,
    pub sections: Vec<Section>,
    pub tempo: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ComposerOptions {
    /// Minimum id distance between copies; widened when a copy needs more.
    pub batch_stride: u64,
    pub counter_margin: u64,
}

impl Default for ComposerOptions {
    fn default() -> Self {
        Self {
            batch_stride: DEFAULT_BATCH_STRIDE,
            counter_margin: DEFAULT_COUNTER_MARGIN,
        }
    }
}

#[derive(Debug, Default)]
pub struct ComposeSummary {
    pub tracks_removed: usize,
    pub tracks_created: usize,
    pub returns_kept: usize,
    pub locators: usize,
    pub devices_inserted: usize,
    /// `(track, device)` pairs that could not be inserted.
    pub missing_devices: Vec<(String, String)>,
    pub tempo_set: bool,
    pub next_pointee_id: u64,
}

/// A library device parsed once, with the ids each placement renumbers.
struct Placeable {
    template: Element,
    ids: Vec<u64>,
}

impl Placeable {
    fn new(template: Element) -> Self {
        let ids = identity::renumberable_ids(&template);
        Self { template, ids }
    }

    /// Ids one placement consumes. A root without a numeric id takes one more.
    fn slots(&self) -> usize {
        let numeric_root = self.template.id().is_some_and(|id| id.as_numeric().is_some());
        self.ids.len() + usize::from(!numeric_root)
    }

    /// A copy renumbered onto `fresh`, which holds exactly `slots()` ids.
    fn place(&self, fresh: &[u64]) -> Element {
        let mut device = self.template.clone();
        let (mapped, spare) = fresh.split_at(self.ids.len());
        let mapping = self.ids.iter().copied().zip(mapped.iter().copied()).collect();
        identity::reassign_ids(&mut device, &IdRemap::Mapping(mapping), None);
        if let Some(&root) = spare.first() {
            device.set_id(Some(ElementId::Numeric(root)));
        }
        device
    }
}

/// Rebuild `doc`'s arrangement from `plan`.
///
/// Every non-return track is replaced by copies of the first MIDI and audio
/// tracks, each renumbered into its own id window above the current floor.
/// Library devices are renumbered into their track's window too, so the same
/// device can sit on any number of tracks. Return tracks stay where they are,
/// after the new tracks. Missing library devices are reported in the summary
/// and skipped.
pub fn compose(
    doc: &mut Document,
    plan: &CompositionPlan,
    library: Option<&DeviceLibrary>,
    options: &ComposerOptions,
) -> Result<ComposeSummary, ComposeError> {
    let midi = archetype(doc, TrackKind::Midi)?;
    let audio = archetype(doc, TrackKind::Audio)?;
    let graph = identity::analyze(doc);

    let midi_ids = identity::renumberable_ids(&midi);
    let audio_ids = identity::renumberable_ids(&audio);

    let mut placeables: HashMap<&str, Placeable> = HashMap::new();
    if let Some(lib) = library {
        for name in plan.tracks.iter().flat_map(|t| &t.devices) {
            if placeables.contains_key(name.as_str()) {
                continue;
            }
            if let Some(template) = lib.template(name) {
                placeables.insert(name.as_str(), Placeable::new(template));
            }
        }
    }
    let width = |spec: &TrackSpec| -> usize {
        let track_ids = match spec.kind {
            ArchetypeKind::Midi => midi_ids.len(),
            ArchetypeKind::Audio => audio_ids.len(),
        };
        let device_slots: usize = spec
            .devices
            .iter()
            .filter_map(|d| placeables.get(d.as_str()))
            .map(Placeable::slots)
            .sum();
        track_ids + device_slots
    };

    let widest = plan
        .tracks
        .iter()
        .map(width)
        .chain([plan.sections.len()])
        .max()
        .unwrap_or(0);
    let stride = widened_stride(options.batch_stride, widest as u64);

    // All ids are drawn before the set is touched.
    let batches = plan
        .tracks
        .iter()
        .enumerate()
        .map(|(i, spec)| identity::batch_ids(&graph, i, width(spec), stride))
        .collect::<Result<Vec<_>, _>>()?;
    let locator_ids = identity::batch_ids(&graph, plan.tracks.len(), plan.sections.len(), stride)?;

    let mut summary = ComposeSummary::default();
    let live_set = doc.require_live_set_mut()?;
    let tracks = live_set
        .child_mut(TRACKS)
        .ok_or_else(|| DocumentError::MissingSection(TRACKS.to_string()))?;

    let before = tracks.elements().count();
    tracks.children.retain(|n| match n {
        Node::Element(e) => e.tag == TrackKind::Return.tag(),
        Node::Text(_) => true,
    });
    summary.returns_kept = tracks.elements().count();
    summary.tracks_removed = before - summary.returns_kept;

    for (spec, fresh) in plan.tracks.iter().zip(&batches) {
        let (source, old_ids) = match spec.kind {
            ArchetypeKind::Midi => (&midi, &midi_ids),
            ArchetypeKind::Audio => (&audio, &audio_ids),
        };
        let (track_ids, mut device_ids) = fresh.split_at(old_ids.len());

        let mut track = source.clone();
        let mapping: HashMap<u64, u64> = old_ids.iter().copied().zip(track_ids.iter().copied()).collect();
        identity::reassign_ids(&mut track, &IdRemap::Mapping(mapping), None);
        rename_track(&mut track, &spec.name);
        recolor_track(&mut track, spec.color);

        for device in &spec.devices {
            let Some(placeable) = placeables.get(device.as_str()) else {
                log::warn!("Track {}: device {device} not in library, skipped", spec.name);
                summary.missing_devices.push((spec.name.clone(), device.clone()));
                continue;
            };
            let (ids, rest) = device_ids.split_at(placeable.slots());
            device_ids = rest;
            if devices::attach_device(&mut track, placeable.place(ids)) {
                summary.devices_inserted += 1;
            }
        }

        insert_before_returns(tracks, track);
        summary.tracks_created += 1;
    }

    summary.locators = markers::set_locators(live_set, &plan.sections, &locator_ids);

    if let Some(bpm) = plan.tempo {
        summary.tempo_set = set_tempo(live_set, bpm);
    }

    let max_id = identity::analyze(doc).max_numeric_id.unwrap_or(0);
    let target = max_id
        .checked_add(options.counter_margin)
        .ok_or(DocumentError::IdSpaceExhausted {
            floor: max_id,
            needed: options.counter_margin,
        })?;
    summary.next_pointee_id = identity::bump_counter(doc, target)?;

    log::info!(
        "Composed {} tracks ({} returns kept, {} locators, {} devices)",
        summary.tracks_created,
        summary.returns_kept,
        summary.locators,
        summary.devices_inserted
    );
    Ok(summary)
}

fn archetype(doc: &Document, kind: TrackKind) -> Result<Element, ComposeError> {
    if doc.live_set().and_then(|ls| ls.child(TRACKS)).is_none() {
        return Err(DocumentError::MissingSection(TRACKS.to_string()).into());
    }
    doc.tracks_of(kind)
        .next()
        .cloned()
        .ok_or(ComposeError::MissingArchetype(kind))
}

/// Smallest multiple of `stride` that fits `needed` ids.
fn widened_stride(stride: u64, needed: u64) -> u64 {
    let stride = stride.max(1);
    if needed <= stride {
        stride
    } else {
        needed.div_ceil(stride) * stride
    }
}

fn insert_before_returns(tracks: &mut Element, track: Element) {
    let pos = tracks
        .children
        .iter()
        .position(|n| matches!(n, Node::Element(e) if e.tag == TrackKind::Return.tag()))
        .unwrap_or(tracks.children.len());
    tracks.children.insert(pos, Node::Element(track));
}

pub fn rename_track(track: &mut Element, name: &str) {
    let names = track.ensure_path(&["Name"]);
    names.set_value("EffectiveName", name);
    names.set_value("UserName", name);
}

/// Live 10+ writes `Color`, older sets `ColorIndex`.
pub fn recolor_track(track: &mut Element, color: u32) {
    let tag = if track.child("Color").is_none() && track.child("ColorIndex").is_some() {
        "ColorIndex"
    } else {
        "Color"
    };
    track.set_value(tag, color.to_string());
}

/// Set the master tempo. `false` when the set has no tempo parameter.
pub fn set_tempo(live_set: &mut Element, bpm: f64) -> bool {
    match live_set.find_path_mut(TEMPO_PATH) {
        Some(tempo) => {
            tempo.set_value("Manual", bpm.to_string());
            true
        }
        None => {
            log::warn!("No MasterTrack tempo found, tempo left unchanged");
            false
        }
    }
}
