//! Song-structure presets: named section layouts per subgenre.
//!
//! Built-in presets are one enum variant per subgenre. Presets from the
//! config file are checked when the registry is built, so a bad entry stops
//! the program at startup instead of surfacing halfway through a compose.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

use crate::composer::markers::Section;
use crate::composer::{ArchetypeKind, TrackSpec};

pub const DEFAULT_BEATS_PER_BAR: u32 = 4;
const BPM_RANGE: std::ops::RangeInclusive<f64> = 60.0..=200.0;

#[derive(Error, Debug, PartialEq)]
pub enum StructureError {
    #[error("Structure {0:?} has no sections")]
    NoSections(String),
    #[error("Structure {preset:?}: section {section:?} has zero bars")]
    EmptySection { preset: String, section: String },
    #[error("Structure {preset:?}: tempo {bpm} is outside 60-200 BPM")]
    TempoOutOfRange { preset: String, bpm: f64 },
    #[error("Structure {0:?}: beats_per_bar must be at least 1")]
    BadMeter(String),
    #[error("Structure name must not be empty")]
    Unnamed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subgenre {
    Uplifting,
    Progressive,
    Psytrance,
    TechTrance,
}

impl Subgenre {
    pub const ALL: [Subgenre; 4] = [
        Subgenre::Uplifting,
        Subgenre::Progressive,
        Subgenre::Psytrance,
        Subgenre::TechTrance,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Subgenre::Uplifting => "uplifting",
            Subgenre::Progressive => "progressive",
            Subgenre::Psytrance => "psytrance",
            Subgenre::TechTrance => "tech-trance",
        }
    }

    pub fn preset(self) -> StructurePreset {
        let (bpm, layout): (f64, &[(&str, u32)]) = match self {
            Subgenre::Uplifting => (
                138.0,
                &[
                    ("Intro", 16),
                    ("Buildup", 16),
                    ("Drop", 32),
                    ("Breakdown", 32),
                    ("Buildup 2", 16),
                    ("Drop 2", 32),
                    ("Bridge", 32),
                    ("Outro", 32),
                ],
            ),
            Subgenre::Progressive => (
                128.0,
                &[
                    ("Intro", 32),
                    ("Groove", 32),
                    ("Breakdown", 32),
                    ("Drop", 32),
                    ("Outro", 32),
                ],
            ),
            Subgenre::Psytrance => (
                142.0,
                &[
                    ("Intro", 32),
                    ("Build", 16),
                    ("Drop", 64),
                    ("Breakdown", 32),
                    ("Drop 2", 64),
                    ("Outro", 32),
                ],
            ),
            Subgenre::TechTrance => (
                140.0,
                &[
                    ("Intro", 16),
                    ("Build", 16),
                    ("Drop", 32),
                    ("Break", 16),
                    ("Drop 2", 32),
                    ("Outro", 16),
                ],
            ),
        };

        StructurePreset {
            name: self.key().to_string(),
            bpm,
            beats_per_bar: DEFAULT_BEATS_PER_BAR,
            sections: layout
                .iter()
                .map(|(name, bars)| SectionLength {
                    name: name.to_string(),
                    bars: *bars,
                })
                .collect(),
        }
    }
}

impl fmt::Display for Subgenre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Subgenre {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.to_lowercase().replace('_', "-");
        Subgenre::ALL
            .into_iter()
            .find(|g| g.key() == wanted)
            .ok_or_else(|| format!("unknown subgenre: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SectionLength {
    pub name: String,
    pub bars: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructurePreset {
    pub name: String,
    pub bpm: f64,
    pub beats_per_bar: u32,
    pub sections: Vec<SectionLength>,
}

impl StructurePreset {
    /// Sections with cumulative start positions in beats. Positions are
    /// accumulated as floats, so any bar count in a config file is accepted.
    pub fn sections(&self) -> Vec<Section> {
        let beats_per_bar = f64::from(self.beats_per_bar);
        let mut beat = 0.0;
        self.sections
            .iter()
            .map(|s| {
                let start_beat = beat;
                beat += f64::from(s.bars) * beats_per_bar;
                Section {
                    name: s.name.clone(),
                    start_beat,
                }
            })
            .collect()
    }

    pub fn total_bars(&self) -> u64 {
        self.sections.iter().map(|s| u64::from(s.bars)).sum()
    }

    pub fn validate(&self) -> Result<(), StructureError> {
        if self.name.trim().is_empty() {
            return Err(StructureError::Unnamed);
        }
        if self.sections.is_empty() {
            return Err(StructureError::NoSections(self.name.clone()));
        }
        if self.beats_per_bar == 0 {
            return Err(StructureError::BadMeter(self.name.clone()));
        }
        if !BPM_RANGE.contains(&self.bpm) {
            return Err(StructureError::TempoOutOfRange {
                preset: self.name.clone(),
                bpm: self.bpm,
            });
        }
        if let Some(s) = self.sections.iter().find(|s| s.bars == 0) {
            return Err(StructureError::EmptySection {
                preset: self.name.clone(),
                section: s.name.clone(),
            });
        }
        Ok(())
    }
}

/// `[[structures]]` entry in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomStructureConfig {
    pub name: String,
    pub bpm: f64,
    #[serde(default = "default_beats_per_bar")]
    pub beats_per_bar: u32,
    pub sections: Vec<SectionLength>,
}

fn default_beats_per_bar() -> u32 {
    DEFAULT_BEATS_PER_BAR
}

/// Built-in presets plus any defined in the config file.
#[derive(Debug)]
pub struct StructureRegistry {
    presets: Vec<StructurePreset>,
    /// Lowercase name → index in `presets`
    by_name: HashMap<String, usize>,
}

impl StructureRegistry {
    /// Config presets with a built-in name replace the built-in.
    pub fn new(custom: &[CustomStructureConfig]) -> Result<Self, StructureError> {
        let mut presets: Vec<StructurePreset> =
            Subgenre::ALL.into_iter().map(Subgenre::preset).collect();

        for c in custom {
            let preset = StructurePreset {
                name: c.name.clone(),
                bpm: c.bpm,
                beats_per_bar: c.beats_per_bar,
                sections: c.sections.clone(),
            };
            preset.validate()?;

            match presets
                .iter_mut()
                .find(|p| p.name.eq_ignore_ascii_case(&preset.name))
            {
                Some(existing) => {
                    log::info!("Config structure {} replaces the built-in", preset.name);
                    *existing = preset;
                }
                None => presets.push(preset),
            }
        }

        let by_name = presets
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.to_lowercase(), i))
            .collect();

        Ok(Self { presets, by_name })
    }

    pub fn get(&self, name: &str) -> Option<&StructurePreset> {
        let key = name.to_lowercase();
        let key = match key.parse::<Subgenre>() {
            Ok(g) => g.key().to_string(),
            Err(_) => key,
        };
        self.by_name.get(&key).map(|&i| &self.presets[i])
    }

    pub fn presets(&self) -> &[StructurePreset] {
        &self.presets
    }
}

/// Six MIDI and two audio tracks, the usual trance starting layout.
pub fn default_tracks() -> Vec<TrackSpec> {
    let midi = [
        ("Kick", 69),
        ("Bass", 13),
        ("Perc", 7),
        ("Pad", 22),
        ("Lead", 26),
        ("Arp", 17),
    ];
    let audio = [("FX", 2), ("Vox", 5)];

    midi.into_iter()
        .map(|(name, color)| TrackSpec::new(name, ArchetypeKind::Midi, color))
        .chain(
            audio
                .into_iter()
                .map(|(name, color)| TrackSpec::new(name, ArchetypeKind::Audio, color)),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uplifting_section_starts() {
        let starts: Vec<f64> = Subgenre::Uplifting
            .preset()
            .sections()
            .iter()
            .map(|s| s.start_beat)
            .collect();
        assert_eq!(starts, vec![0.0, 64.0, 128.0, 256.0, 384.0, 448.0, 576.0, 704.0]);
    }

    #[test]
    fn builtins_are_valid() {
        for g in Subgenre::ALL {
            assert_eq!(g.preset().validate(), Ok(()), "{g}");
        }
    }

    #[test]
    fn subgenre_parsing() {
        assert_eq!("Tech_Trance".parse::<Subgenre>(), Ok(Subgenre::TechTrance));
        assert!("dubstep".parse::<Subgenre>().is_err());
    }

    #[test]
    fn registry_lookup_is_case_insensitive() {
        let reg = StructureRegistry::new(&[]).unwrap();
        assert_eq!(reg.get("PSYTRANCE").unwrap().bpm, 142.0);
        assert_eq!(reg.get("tech_trance").unwrap().name, "tech-trance");
        assert!(reg.get("polka").is_none());
    }

    #[test]
    fn custom_presets_are_added_and_override() {
        let custom: Vec<CustomStructureConfig> = toml::from_str::<Wrapper>(
            r#"
            [[structures]]
            name = "club-edit"
            bpm = 136
            sections = [{ name = "Intro", bars = 8 }, { name = "Drop", bars = 16 }]

            [[structures]]
            name = "Uplifting"
            bpm = 140
            beats_per_bar = 3
            sections = [{ name = "Only", bars = 4 }]
            "#,
        )
        .unwrap()
        .structures;

        let reg = StructureRegistry::new(&custom).unwrap();
        assert_eq!(reg.presets().len(), Subgenre::ALL.len() + 1);
        let edit = reg.get("club-edit").unwrap();
        assert_eq!(edit.sections()[1].start_beat, 32.0);
        let up = reg.get("uplifting").unwrap();
        assert_eq!(up.bpm, 140.0);
        assert_eq!(up.total_bars(), 4);
    }

    #[test]
    fn very_long_sections_do_not_wrap() {
        let long = |name: &str, bars| SectionLength {
            name: name.into(),
            bars,
        };
        let huge = CustomStructureConfig {
            name: "huge".into(),
            bpm: 138.0,
            beats_per_bar: 4,
            sections: vec![long("A", u32::MAX), long("B", u32::MAX), long("C", 1)],
        };
        let reg = StructureRegistry::new(&[huge]).unwrap();
        let preset = reg.get("huge").unwrap();

        let starts: Vec<f64> = preset.sections().iter().map(|s| s.start_beat).collect();
        let max = f64::from(u32::MAX);
        assert_eq!(starts, vec![0.0, 4.0 * max, 8.0 * max]);
        assert_eq!(preset.total_bars(), 2 * u64::from(u32::MAX) + 1);
    }

    #[test]
    fn invalid_custom_presets_fail_registry_construction() {
        let zero_bars = CustomStructureConfig {
            name: "bad".into(),
            bpm: 138.0,
            beats_per_bar: 4,
            sections: vec![SectionLength {
                name: "Intro".into(),
                bars: 0,
            }],
        };
        assert!(matches!(
            StructureRegistry::new(&[zero_bars]),
            Err(StructureError::EmptySection { .. })
        ));

        let too_fast = CustomStructureConfig {
            name: "gabber".into(),
            bpm: 240.0,
            beats_per_bar: 4,
            sections: vec![SectionLength {
                name: "Intro".into(),
                bars: 8,
            }],
        };
        assert!(matches!(
            StructureRegistry::new(&[too_fast]),
            Err(StructureError::TempoOutOfRange { .. })
        ));
    }

    #[test]
    fn missing_keys_fail_to_parse() {
        let parsed = toml::from_str::<Wrapper>(
            r#"
            [[structures]]
            name = "no-bpm"
            sections = []
            "#,
        );
        assert!(parsed.is_err());

        let typo = toml::from_str::<Wrapper>(
            r#"
            [[structures]]
            name = "typo"
            bpm = 130
            sections = [{ name = "Intro", barz = 8 }]
            "#,
        );
        assert!(typo.is_err());
    }

    #[test]
    fn default_tracks_layout() {
        let tracks = default_tracks();
        let names: Vec<_> = tracks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Kick", "Bass", "Perc", "Pad", "Lead", "Arp", "FX", "Vox"]);
        assert_eq!(
            tracks.iter().filter(|t| t.kind == ArchetypeKind::Audio).count(),
            2
        );
    }

    #[derive(Deserialize)]
    struct Wrapper {
        structures: Vec<CustomStructureConfig>,
    }
}
