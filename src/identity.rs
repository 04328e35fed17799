//! Id / reference graph of a Live Set and safe renumbering.
//!
//! Live stores a monotonic `NextPointeeId` counter that must stay above every
//! numeric `Id`. Anything inserted into a set needs ids above both, and
//! references inside a copied subtree have to follow their targets.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::als::{Document, DocumentError, Element, ElementId, NEXT_POINTEE_ID, Node};

pub const POINTEE: &str = "Pointee";
pub const POINTEE_ID: &str = "PointeeId";

/// Default distance between id batches of successive copies.
pub const DEFAULT_BATCH_STRIDE: u64 = 1000;

/// How a reference-carrying element names its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceShape {
    /// `<Pointee Id="N"/>`: the element's own `Id` is the referenced identity.
    OwnId,
    /// `<PointeeId Value="N"/>`: `Value` names the referenced identity.
    ValueAttribute,
}

/// Tags whose `Id` only numbers an entry inside its parent list. Live
/// restarts these at 0 in every list, so they are neither unique across the
/// set nor renumbered when a subtree moves.
pub const LIST_LOCAL_TAGS: &[&str] = &[
    "WarpMarker",
    "MultiSamplePart",
    "RelativePathElement",
    "AudioEffectBranch",
    "InstrumentBranch",
    "MidiEffectBranch",
    "DrumBranch",
    "VstPluginInfo",
    "Vst3PluginInfo",
    "AuPluginInfo",
    "KeyTrack",
];

pub fn is_list_local(tag: &str) -> bool {
    LIST_LOCAL_TAGS.contains(&tag)
}

/// The reference shapes observed in real sets. Other `*Pointee*` elements
/// are reported through [`IdentityGraph::unrecognized_references`] and never
/// interpreted.
const REFERENCE_SHAPES: &[(&str, ReferenceShape)] = &[
    (POINTEE, ReferenceShape::OwnId),
    (POINTEE_ID, ReferenceShape::ValueAttribute),
];

pub fn reference_shape(tag: &str) -> Option<ReferenceShape> {
    REFERENCE_SHAPES
        .iter()
        .find(|(t, _)| *t == tag)
        .map(|(_, shape)| *shape)
}

/// Derived view of every identity and reference in a document.
#[derive(Debug, Clone, Default)]
pub struct IdentityGraph {
    pub all_ids: BTreeSet<ElementId>,
    pub referenced_ids: BTreeSet<ElementId>,
    /// Largest `Numeric` id; opaque ids never count.
    pub max_numeric_id: Option<u64>,
    /// `LiveSet/NextPointeeId/@Value`, if present and numeric.
    pub next_pointee_id: Option<u64>,
    /// Ids carried by more than one element. List-local ids are exempt.
    pub duplicates: BTreeSet<ElementId>,
    /// Total `Id` attributes seen, duplicates included.
    pub id_occurrences: usize,
    /// Tags that look like references but match no known shape.
    pub unrecognized_references: BTreeSet<String>,
}

impl IdentityGraph {
    /// Referenced ids with no element carrying them.
    pub fn orphaned_references(&self) -> impl Iterator<Item = &ElementId> {
        self.referenced_ids
            .iter()
            .filter(|id| !self.all_ids.contains(*id))
    }

    /// Highest value already spoken for, by an element or by the counter.
    pub fn floor(&self) -> u64 {
        self.max_numeric_id
            .unwrap_or(0)
            .max(self.next_pointee_id.unwrap_or(0))
    }

    pub fn counter_is_ahead(&self) -> bool {
        match (self.next_pointee_id, self.max_numeric_id) {
            (Some(next), Some(max)) => next > max,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Walk the whole document.
pub fn analyze(doc: &Document) -> IdentityGraph {
    let mut graph = analyze_element(&doc.root);
    graph.next_pointee_id = counter_value(doc);
    graph
}

/// Walk one subtree. `next_pointee_id` is left unset.
pub fn analyze_element(root: &Element) -> IdentityGraph {
    let mut graph = IdentityGraph::default();
    let mut unique = HashSet::new();

    for element in root.descendants() {
        if let Some(id) = element.id() {
            graph.id_occurrences += 1;
            if let Some(n) = id.as_numeric() {
                graph.max_numeric_id = Some(graph.max_numeric_id.map_or(n, |m| m.max(n)));
            }
            graph.all_ids.insert(id.clone());
            if !is_list_local(&element.tag) && !unique.insert(id) {
                graph.duplicates.insert(id.clone());
            }
        }

        match reference_shape(&element.tag) {
            Some(ReferenceShape::OwnId) => {
                if let Some(id) = element.id() {
                    graph.referenced_ids.insert(id.clone());
                }
            }
            Some(ReferenceShape::ValueAttribute) => match element.attr("Value") {
                Some(v) => {
                    graph.referenced_ids.insert(ElementId::parse(v));
                }
                None => {
                    graph.unrecognized_references.insert(element.tag.clone());
                }
            },
            None => {
                if element.tag != NEXT_POINTEE_ID && element.tag.contains(POINTEE) {
                    graph.unrecognized_references.insert(element.tag.clone());
                }
            }
        }
    }

    graph
}

fn counter_value(doc: &Document) -> Option<u64> {
    let raw = doc.live_set()?.value_of(NEXT_POINTEE_ID)?;
    ElementId::parse(raw).as_numeric()
}

/// `count` sequential ids above everything in use.
///
/// Only safe while nobody else inserts ids between the `analyze` that
/// produced `graph` and the save.
pub fn generate_safe_ids(count: usize, graph: &IdentityGraph) -> Result<Vec<u64>, DocumentError> {
    id_range(graph.floor(), 1, count)
}

/// Offset for the `index`-th batch: `(index + 1) * stride`.
pub fn batch_offset(index: usize, stride: u64) -> Option<u64> {
    (index as u64).checked_add(1)?.checked_mul(stride)
}

/// Ids for the `index`-th of several insertions, each batch starting
/// `batch_offset(index, stride)` above the graph floor. Batches never overlap
/// as long as `count <= stride`.
pub fn batch_ids(
    graph: &IdentityGraph,
    index: usize,
    count: usize,
    stride: u64,
) -> Result<Vec<u64>, DocumentError> {
    debug_assert!(count as u64 <= stride, "batch of {count} exceeds stride {stride}");
    let exhausted = DocumentError::IdSpaceExhausted {
        floor: graph.floor(),
        needed: count as u64,
    };
    let offset = batch_offset(index, stride).ok_or(exhausted)?;
    id_range(graph.floor(), offset, count)
}

/// `count` ids starting at `floor + offset`, all of which must fit in a u64.
fn id_range(floor: u64, offset: u64, count: usize) -> Result<Vec<u64>, DocumentError> {
    let exhausted = || DocumentError::IdSpaceExhausted {
        floor,
        needed: count as u64,
    };
    let start = floor.checked_add(offset).ok_or_else(exhausted)?;
    if count > 0 {
        start.checked_add(count as u64 - 1).ok_or_else(exhausted)?;
    }
    Ok((0..count as u64).map(|i| start + i).collect())
}

/// How [`reassign_ids`] renumbers.
#[derive(Debug, Clone)]
pub enum IdRemap {
    Offset(u64),
    Mapping(HashMap<u64, u64>),
}

impl IdRemap {
    fn apply(&self, old: u64) -> Option<u64> {
        match self {
            IdRemap::Offset(offset) => old.checked_add(*offset),
            IdRemap::Mapping(map) => map.get(&old).copied(),
        }
    }
}

/// Old → new ids actually rewritten by [`reassign_ids`].
pub type IdMapping = BTreeMap<u64, u64>;

/// Renumber every numeric `Id` in `subtree` not listed in `protected`.
/// List-local ids are never renumbered.
///
/// `PointeeId` references inside the subtree that point at a renumbered id
/// follow it; references to anything else are left alone.
pub fn reassign_ids(
    subtree: &mut Element,
    remap: &IdRemap,
    protected: Option<&HashSet<ElementId>>,
) -> IdMapping {
    let mut applied = IdMapping::new();

    subtree.walk_mut(&mut |element| {
        let Some(id) = element.id() else { return };
        if is_list_local(&element.tag) || protected.is_some_and(|p| p.contains(id)) {
            return;
        }
        let Some(old) = id.as_numeric() else { return };
        if let Some(new) = remap.apply(old) {
            element.set_id(Some(ElementId::Numeric(new)));
            applied.insert(old, new);
        }
    });

    if !applied.is_empty() {
        subtree.walk_mut(&mut |element| {
            if reference_shape(&element.tag) != Some(ReferenceShape::ValueAttribute) {
                return;
            }
            let target = element
                .attr("Value")
                .and_then(|v| ElementId::parse(v).as_numeric());
            if let Some(new) = target.and_then(|t| applied.get(&t)) {
                element.set_attr("Value", new.to_string());
            }
        });
    }

    applied
}

/// Distinct numeric ids of `subtree` that must be unique set-wide, root
/// included, ascending.
pub fn renumberable_ids(subtree: &Element) -> Vec<u64> {
    subtree
        .descendants()
        .filter(|e| !is_list_local(&e.tag))
        .filter_map(|e| e.id().and_then(ElementId::as_numeric))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Ids of every element below `subtree`'s root.
pub fn internal_ids(subtree: &Element) -> HashSet<ElementId> {
    subtree
        .descendants()
        .skip(1)
        .filter_map(|e| e.id().cloned())
        .collect()
}

/// Raise `NextPointeeId` to at least `new_value`, and always above every
/// numeric id in the document. The counter never moves down.
pub fn bump_counter(doc: &mut Document, new_value: u64) -> Result<u64, DocumentError> {
    let graph = analyze(doc);
    let above_max = match graph.max_numeric_id {
        Some(m) => m.checked_add(1).ok_or(DocumentError::IdSpaceExhausted {
            floor: m,
            needed: 1,
        })?,
        None => 0,
    };
    let value = new_value
        .max(above_max)
        .max(graph.next_pointee_id.unwrap_or(0));

    let live_set = doc.require_live_set_mut()?;
    match live_set.child_mut(NEXT_POINTEE_ID) {
        Some(counter) => counter.set_attr("Value", value.to_string()),
        None => live_set.children.insert(
            0,
            Node::Element(Element::with_value(NEXT_POINTEE_ID, value.to_string())),
        ),
    }

    log::debug!(
        "NextPointeeId set to {value} (max id {:?})",
        graph.max_numeric_id
    );
    Ok(value)
}
