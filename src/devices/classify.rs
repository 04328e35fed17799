use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceCategory {
    Instrument,
    Effect,
    Utility,
}

impl DeviceCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceCategory::Instrument => "instrument",
            DeviceCategory::Effect => "effect",
            DeviceCategory::Utility => "utility",
        }
    }
}

impl fmt::Display for DeviceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "instrument" => Ok(DeviceCategory::Instrument),
            "effect" => Ok(DeviceCategory::Effect),
            "utility" => Ok(DeviceCategory::Utility),
            other => Err(format!("unknown device category: {other}")),
        }
    }
}

/// Samplers, synths and plugin hosts.
const INSTRUMENT_TAGS: &[&str] = &[
    "OriginalSimpler",
    "MultiSampler",
    "InstrumentImpulse",
    "DrumGroupDevice",
    "InstrumentGroupDevice",
    "InstrumentVector",
    "UltraAnalog",
    "Operator",
    "Drift",
    "InstrumentMeld",
    "Collision",
    "StringStudio",
    "LoungeLizard",
    "PluginDevice",
    "AuPluginDevice",
];

/// EQ, dynamics, saturation, space and modulation.
const EFFECT_TAGS: &[&str] = &[
    "Eq8",
    "FilterEQ3",
    "ChannelEq",
    "AutoFilter",
    "Compressor2",
    "GlueCompressor",
    "MultibandDynamics",
    "Limiter",
    "Gate",
    "DrumBuss",
    "Saturator",
    "Overdrive",
    "Pedal",
    "Amp",
    "Cabinet",
    "Redux2",
    "Erosion",
    "Vinyl",
    "Roar",
    "Reverb",
    "Hybrid",
    "Delay",
    "PingPongDelay",
    "FilterDelay",
    "Echo",
    "GrainDelay",
    "BeatRepeat",
    "Chorus2",
    "PhaserNew",
    "AutoPan",
    "FrequencyShifter",
    "Corpus",
    "Resonator",
    "Vocoder",
];

/// Grouping, metering and tuning.
const UTILITY_TAGS: &[&str] = &[
    "AudioEffectGroupDevice",
    "MidiEffectGroupDevice",
    "StereoGain",
    "SpectrumAnalyzer",
    "Tuner",
    "Looper",
    "ExternalInstrument",
    "ExternalAudioEffect",
];

/// Instruments whose configuration points at sample files on disk.
pub const SAMPLE_BASED_TAGS: &[&str] = &["OriginalSimpler", "MultiSampler", "InstrumentImpulse"];

/// Category for a device tag. Unknown tags are utilities until added above.
pub fn classify_device(tag: &str) -> DeviceCategory {
    if INSTRUMENT_TAGS.contains(&tag) {
        DeviceCategory::Instrument
    } else if EFFECT_TAGS.contains(&tag) {
        DeviceCategory::Effect
    } else if UTILITY_TAGS.contains(&tag) {
        DeviceCategory::Utility
    } else {
        log::trace!("Unclassified device tag {tag}, treating as utility");
        DeviceCategory::Utility
    }
}

pub fn is_sample_based(tag: &str) -> bool {
    SAMPLE_BASED_TAGS.contains(&tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruments() {
        for tag in ["OriginalSimpler", "Operator", "PluginDevice", "InstrumentVector"] {
            assert_eq!(classify_device(tag), DeviceCategory::Instrument, "{tag}");
        }
    }

    #[test]
    fn effects() {
        for tag in ["Eq8", "Compressor2", "Saturator", "Reverb", "PingPongDelay", "Chorus2"] {
            assert_eq!(classify_device(tag), DeviceCategory::Effect, "{tag}");
        }
    }

    #[test]
    fn utilities() {
        for tag in ["AudioEffectGroupDevice", "Tuner", "SpectrumAnalyzer", "StereoGain"] {
            assert_eq!(classify_device(tag), DeviceCategory::Utility, "{tag}");
        }
    }

    #[test]
    fn unknown_tags_default_to_utility() {
        assert_eq!(classify_device("BrandNewDevice2031"), DeviceCategory::Utility);
    }

    #[test]
    fn tables_do_not_overlap() {
        for tag in INSTRUMENT_TAGS {
            assert!(!EFFECT_TAGS.contains(tag) && !UTILITY_TAGS.contains(tag), "{tag}");
        }
        for tag in EFFECT_TAGS {
            assert!(!UTILITY_TAGS.contains(tag), "{tag}");
        }
    }

    #[test]
    fn category_parses_case_insensitively() {
        assert_eq!("Effect".parse::<DeviceCategory>(), Ok(DeviceCategory::Effect));
        assert!("synth".parse::<DeviceCategory>().is_err());
    }

    #[test]
    fn sample_based_instruments() {
        assert!(is_sample_based("OriginalSimpler"));
        assert!(!is_sample_based("Operator"));
    }
}
