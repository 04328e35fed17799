pub mod codec;
pub mod element;

pub use element::{Element, ElementId, Node};

use thiserror::Error;

/// Root tag of every Live Set.
pub const ROOT_TAG: &str = "Ableton";
pub const LIVE_SET: &str = "LiveSet";
pub const NEXT_POINTEE_ID: &str = "NextPointeeId";
pub const TRACKS: &str = "Tracks";
pub const MASTER_TRACK: &str = "MasterTrack";
/// Outer and inner marker containers share this tag: `Locators/Locators/Locator`.
pub const LOCATORS: &str = "Locators";
pub const LOCATOR: &str = "Locator";

/// Sections the validator and composer cannot work without.
pub const REQUIRED_SECTIONS: &[&str] = &[NEXT_POINTEE_ID, TRACKS, MASTER_TRACK];

/// Body of the XML declaration Ableton writes (without `<?` / `?>`).
pub const DEFAULT_DECLARATION: &str = r#"xml version="1.0" encoding="UTF-8""#;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Missing required section: {0}")]
    MissingSection(String),
    #[error("No room for {needed} more ids above {floor}")]
    IdSpaceExhausted { floor: u64, needed: u64 },
}

/// Children of the `Tracks` container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Midi,
    Audio,
    Return,
    Group,
}

impl TrackKind {
    pub fn tag(self) -> &'static str {
        match self {
            TrackKind::Midi => "MidiTrack",
            TrackKind::Audio => "AudioTrack",
            TrackKind::Return => "ReturnTrack",
            TrackKind::Group => "GroupTrack",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "MidiTrack" => Some(TrackKind::Midi),
            "AudioTrack" => Some(TrackKind::Audio),
            "ReturnTrack" => Some(TrackKind::Return),
            "GroupTrack" => Some(TrackKind::Group),
            _ => None,
        }
    }
}

/// A parsed `.als` file: the literal XML declaration plus the element tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    declaration: String,
    pub root: Element,
}

impl Document {
    pub fn new(root: Element) -> Self {
        Self {
            declaration: DEFAULT_DECLARATION.to_string(),
            root,
        }
    }

    pub fn with_declaration(root: Element, declaration: impl Into<String>) -> Self {
        Self {
            declaration: declaration.into(),
            root,
        }
    }

    pub fn declaration(&self) -> &str {
        &self.declaration
    }

    pub fn live_set(&self) -> Option<&Element> {
        self.root.child(LIVE_SET)
    }

    pub fn live_set_mut(&mut self) -> Option<&mut Element> {
        self.root.child_mut(LIVE_SET)
    }

    pub fn require_live_set_mut(&mut self) -> Result<&mut Element, DocumentError> {
        self.live_set_mut()
            .ok_or_else(|| DocumentError::MissingSection(LIVE_SET.to_string()))
    }

    /// Every child of `LiveSet/Tracks`, in document order.
    pub fn tracks(&self) -> impl Iterator<Item = &Element> {
        self.live_set()
            .and_then(|ls| ls.child(TRACKS))
            .into_iter()
            .flat_map(|t| t.elements())
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &Element> {
        self.tracks().filter(move |t| t.tag == kind.tag())
    }

    /// Display name of a track (`Name/EffectiveName`, falling back to `UserName`).
    pub fn track_name(track: &Element) -> Option<&str> {
        let name = track.child("Name")?;
        name.value_of("EffectiveName")
            .filter(|n| !n.is_empty())
            .or_else(|| name.value_of("UserName"))
    }

    pub fn to_xml_string(&self) -> String {
        codec::serialize(self)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A minimal but structurally complete Live 11 set: one MIDI archetype,
    /// one audio archetype, one return track, master with tempo, one locator.
    pub const BASE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Ableton MajorVersion="5" MinorVersion="11.0_433" Creator="Ableton Live 11.3.4">
	<LiveSet>
		<NextPointeeId Value="60" />
		<OverwriteProtectionNumber Value="2816" />
		<Tracks>
			<MidiTrack Id="10">
				<Name>
					<EffectiveName Value="1-MIDI" />
					<UserName Value="" />
				</Name>
				<Color Value="26" />
				<DeviceChain>
					<Mixer>
						<Volume>
							<AutomationTarget Id="11">
								<LockEnvelope Value="0" />
							</AutomationTarget>
						</Volume>
						<Pointee Id="13" />
					</Mixer>
					<DeviceChain>
						<Devices />
					</DeviceChain>
				</DeviceChain>
				<AutomationEnvelopes>
					<Envelopes>
						<AutomationEnvelope Id="12">
							<EnvelopeTarget>
								<PointeeId Value="11" />
							</EnvelopeTarget>
						</AutomationEnvelope>
					</Envelopes>
				</AutomationEnvelopes>
			</MidiTrack>
			<AudioTrack Id="20">
				<Name>
					<EffectiveName Value="2-Audio" />
					<UserName Value="" />
				</Name>
				<Color Value="14" />
				<DeviceChain>
					<Mixer>
						<Volume>
							<AutomationTarget Id="21">
								<LockEnvelope Value="0" />
							</AutomationTarget>
						</Volume>
					</Mixer>
					<DeviceChain>
						<Devices>
							<Eq8 Id="22">
								<UserName Value="" />
								<On>
									<AutomationTarget Id="23">
										<LockEnvelope Value="0" />
									</AutomationTarget>
								</On>
							</Eq8>
						</Devices>
					</DeviceChain>
				</DeviceChain>
			</AudioTrack>
			<ReturnTrack Id="30">
				<Name>
					<EffectiveName Value="A-Reverb" />
					<UserName Value="" />
				</Name>
				<Color Value="19" />
				<DeviceChain>
					<DeviceChain>
						<Devices>
							<Reverb Id="31">
								<UserName Value="Hall" />
							</Reverb>
						</Devices>
					</DeviceChain>
				</DeviceChain>
			</ReturnTrack>
		</Tracks>
		<MasterTrack>
			<Name>
				<EffectiveName Value="Master" />
				<UserName Value="" />
			</Name>
			<DeviceChain>
				<Mixer>
					<Tempo>
						<LomId Value="0" />
						<Manual Value="120" />
						<AutomationTarget Id="40">
							<LockEnvelope Value="0" />
						</AutomationTarget>
					</Tempo>
				</Mixer>
			</DeviceChain>
		</MasterTrack>
		<Locators>
			<Locators>
				<Locator Id="50">
					<Time Value="0" />
					<Name Value="Old" />
					<Annotation Value="" />
					<IsSongStart Value="false" />
				</Locator>
			</Locators>
		</Locators>
	</LiveSet>
</Ableton>
"#;

    pub fn base_document() -> Document {
        codec::parse_xml(BASE_XML).unwrap()
    }

    /// Base set with the return track removed.
    pub fn base_without_returns() -> Document {
        let mut doc = base_document();
        let tracks = doc.live_set_mut().unwrap().child_mut(TRACKS).unwrap();
        tracks
            .children
            .retain(|n| !matches!(n, Node::Element(e) if e.tag == "ReturnTrack"));
        doc
    }

    /// Base set with a second return, `B-Delay` (35), after `A-Reverb` (30).
    pub fn base_with_two_returns() -> Document {
        let mut doc = base_document();
        let delay = codec::element_from_xml(
            r#"<ReturnTrack Id="35">
                <Name><EffectiveName Value="B-Delay" /><UserName Value="" /></Name>
                <Color Value="20" />
                <DeviceChain><DeviceChain><Devices>
                    <Delay Id="36"><UserName Value="Dotted" /></Delay>
                </Devices></DeviceChain></DeviceChain>
            </ReturnTrack>"#,
        )
        .unwrap();
        doc.live_set_mut().unwrap().child_mut(TRACKS).unwrap().push(delay);
        doc
    }
}
