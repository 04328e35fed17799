//! Arrangement markers (`LiveSet/Locators/Locators/Locator`).

use crate::als::{Element, LOCATOR, LOCATORS};

/// A named position in the arrangement.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub name: String,
    pub start_beat: f64,
}

impl Section {
    pub fn new(name: impl Into<String>, start_beat: f64) -> Self {
        Self {
            name: name.into(),
            start_beat,
        }
    }
}

/// A locator as read back from a set.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatorInfo {
    pub name: String,
    pub time: f64,
    pub song_start: bool,
}

/// Replace every locator with one per section, in the given order. The
/// first is flagged as song start. `ids` supplies the locator ids and must
/// hold at least `sections.len()` values.
pub fn set_locators(live_set: &mut Element, sections: &[Section], ids: &[u64]) -> usize {
    debug_assert!(ids.len() >= sections.len());

    let container = live_set.ensure_path(&[LOCATORS, LOCATORS]);
    let removed = container.elements().filter(|e| e.tag == LOCATOR).count();
    container.children.clear();

    for (i, (section, id)) in sections.iter().zip(ids).enumerate() {
        container.push(locator(section, *id, i == 0));
    }

    log::debug!(
        "Replaced {removed} locators with {}",
        sections.len().min(ids.len())
    );
    sections.len().min(ids.len())
}

fn locator(section: &Section, id: u64, song_start: bool) -> Element {
    Element::new(LOCATOR)
        .with_id(id)
        .with_child(Element::with_value("LomId", "0"))
        .with_child(Element::with_value("Time", section.start_beat.to_string()))
        .with_child(Element::with_value("Name", section.name.as_str()))
        .with_child(Element::with_value("Annotation", ""))
        .with_child(Element::with_value("IsSongStart", song_start.to_string()))
}

pub fn locators(live_set: &Element) -> Vec<LocatorInfo> {
    let Some(container) = live_set.find_path(&[LOCATORS, LOCATORS]) else {
        return Vec::new();
    };
    container
        .elements()
        .filter(|e| e.tag == LOCATOR)
        .map(|e| LocatorInfo {
            name: e.value_of("Name").unwrap_or_default().to_string(),
            time: e
                .value_of("Time")
                .and_then(|t| t.parse().ok())
                .unwrap_or(0.0),
            song_start: e.value_of("IsSongStart") == Some("true"),
        })
        .collect()
}
