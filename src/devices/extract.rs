use std::collections::BTreeMap;

use crate::als::codec;
use crate::als::{Document, Element};

use super::DeviceTemplate;
use super::classify::{classify_device, is_sample_based};
use super::migrate::{RELATIVE_PATH, RELATIVE_PATH_ELEMENT};

/// Container whose direct children are devices.
pub const DEVICES: &str = "Devices";

/// Metadata key for the sample a sample-based instrument plays.
pub const SAMPLE_PATH_KEY: &str = "sample_path";

/// Every device in every device container of the document, racks and the
/// devices nested inside them alike.
pub fn extract(doc: &Document) -> Vec<DeviceTemplate> {
    doc.root
        .descendants()
        .filter(|e| e.tag == DEVICES)
        .flat_map(|container| container.elements())
        .map(template_from_device)
        .collect()
}

pub fn template_from_device(device: &Element) -> DeviceTemplate {
    let mut metadata = BTreeMap::new();
    if is_sample_based(&device.tag) {
        if let Some(path) = sample_path(device) {
            metadata.insert(SAMPLE_PATH_KEY.to_string(), path);
        }
    }

    DeviceTemplate {
        name: device_name(device),
        device_type: device.tag.clone(),
        category: classify_device(&device.tag),
        xml: codec::element_to_xml(device),
        metadata,
    }
}

/// Display name: user-given name, then plugin descriptor, then the tag.
pub fn device_name(device: &Element) -> String {
    device
        .value_of("UserName")
        .filter(|n| !n.trim().is_empty())
        .or_else(|| plugin_name(device))
        .unwrap_or(device.tag.as_str())
        .to_string()
}

/// `PluginDesc/<VstPluginInfo|Vst3PluginInfo|AuPluginInfo>/{PlugName|Name}`.
fn plugin_name(device: &Element) -> Option<&str> {
    device.child("PluginDesc")?.elements().find_map(|info| {
        info.value_of("PlugName")
            .or_else(|| info.value_of("Name"))
            .filter(|n| !n.trim().is_empty())
    })
}

/// First sample referenced by the device: absolute path if recorded,
/// otherwise the relative path in either modern or legacy form.
pub fn sample_path(device: &Element) -> Option<String> {
    let file_ref = device.descendants().find(|e| e.tag == "FileRef")?;

    if let Some(path) = file_ref.value_of("Path").filter(|p| !p.is_empty()) {
        return Some(path.to_string());
    }

    let relative = file_ref.child(RELATIVE_PATH)?;
    let dir = match relative.attr("Value") {
        Some(v) => v.to_string(),
        None => relative
            .elements()
            .filter(|e| e.tag == RELATIVE_PATH_ELEMENT)
            .filter_map(|e| e.attr("Dir"))
            .collect::<Vec<_>>()
            .join("/"),
    };
    let file_name = file_ref.value_of("Name").unwrap_or("");

    match (dir.is_empty(), file_name.is_empty()) {
        (true, true) => None,
        (true, false) => Some(file_name.to_string()),
        (false, true) => Some(dir),
        (false, false) if dir.ends_with(file_name) => Some(dir),
        (false, false) => Some(format!("{dir}/{file_name}")),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::als::Document;
    use crate::als::codec;

    /// A set whose first track holds a legacy-path Simpler, a VST and a rack
    /// with one nested effect.
    pub const DEVICES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Ableton MajorVersion="5" MinorVersion="9.7_256" Creator="Ableton Live 9.7.7">
	<LiveSet>
		<NextPointeeId Value="500" />
		<Tracks>
			<MidiTrack Id="100">
				<Name>
					<EffectiveName Value="Drums" />
					<UserName Value="" />
				</Name>
				<DeviceChain>
					<DeviceChain>
						<Devices>
							<OriginalSimpler Id="101">
								<UserName Value="" />
								<Player>
									<MultiSampleMap>
										<SampleParts>
											<MultiSamplePart Id="0">
												<SampleRef>
													<FileRef>
														<HasRelativePath Value="true" />
														<RelativePath>
															<RelativePathElement Id="0" Dir="Devices" />
															<RelativePathElement Id="1" Dir="Samples" />
														</RelativePath>
														<Name Value="kick.wav" />
													</FileRef>
												</SampleRef>
												<WarpMarkers>
													<WarpMarker Id="0" SecTime="0" BeatTime="0" />
													<WarpMarker Id="1" SecTime="0.5" BeatTime="1" />
												</WarpMarkers>
											</MultiSamplePart>
										</SampleParts>
									</MultiSampleMap>
								</Player>
							</OriginalSimpler>
							<PluginDevice Id="102">
								<UserName Value="" />
								<PluginDesc>
									<VstPluginInfo Id="0">
										<PlugName Value="Sylenth1" />
									</VstPluginInfo>
								</PluginDesc>
							</PluginDevice>
							<AudioEffectGroupDevice Id="103">
								<UserName Value="Bus FX" />
								<Branches>
									<AudioEffectBranch Id="0">
										<DeviceChain>
											<AudioToAudioDeviceChain>
												<Devices>
													<Saturator Id="104">
														<UserName Value="" />
													</Saturator>
												</Devices>
											</AudioToAudioDeviceChain>
										</DeviceChain>
									</AudioEffectBranch>
								</Branches>
							</AudioEffectGroupDevice>
						</Devices>
					</DeviceChain>
				</DeviceChain>
			</MidiTrack>
		</Tracks>
		<MasterTrack />
	</LiveSet>
</Ableton>
"#;

    pub fn devices_document() -> Document {
        codec::parse_xml(DEVICES_XML).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::devices_document;
    use super::*;
    use crate::devices::DeviceCategory;

    #[test]
    fn finds_top_level_and_nested_devices() {
        let templates = extract(&devices_document());
        let names: Vec<_> = templates.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["OriginalSimpler", "Sylenth1", "Bus FX", "Saturator"]);
    }

    #[test]
    fn categories_follow_the_tag_table() {
        let templates = extract(&devices_document());
        let cats: Vec<_> = templates.iter().map(|t| t.category).collect();
        assert_eq!(
            cats,
            vec![
                DeviceCategory::Instrument,
                DeviceCategory::Instrument,
                DeviceCategory::Utility,
                DeviceCategory::Effect,
            ]
        );
    }

    #[test]
    fn sample_path_from_legacy_segments() {
        let templates = extract(&devices_document());
        assert_eq!(
            templates[0].metadata.get(SAMPLE_PATH_KEY).map(String::as_str),
            Some("Devices/Samples/kick.wav")
        );
        assert!(templates[1].metadata.is_empty());
    }

    #[test]
    fn absolute_path_wins() {
        let device = Element::new("OriginalSimpler").with_child(
            Element::new("FileRef")
                .with_child(Element::with_value(RELATIVE_PATH, "Samples/a.wav"))
                .with_child(Element::with_value("Path", "/abs/Samples/a.wav")),
        );
        assert_eq!(sample_path(&device).as_deref(), Some("/abs/Samples/a.wav"));
    }

    #[test]
    fn modern_relative_path_with_file_name_already_included() {
        let device = Element::new("OriginalSimpler").with_child(
            Element::new("FileRef")
                .with_child(Element::with_value(RELATIVE_PATH, "Samples/a.wav"))
                .with_child(Element::with_value("Name", "a.wav")),
        );
        assert_eq!(sample_path(&device).as_deref(), Some("Samples/a.wav"));
    }

    #[test]
    fn template_xml_is_the_device_subtree() {
        let templates = extract(&devices_document());
        let parsed = codec::element_from_xml(&templates[1].xml).unwrap();
        assert_eq!(parsed.tag, "PluginDevice");
        assert_eq!(parsed.id().and_then(|i| i.as_numeric()), Some(102));
    }

    #[test]
    fn blank_user_name_falls_back_to_tag() {
        let device = Element::new("Reverb").with_child(Element::with_value("UserName", "  "));
        assert_eq!(device_name(&device), "Reverb");
    }
}
