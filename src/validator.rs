//! Read-only health check of a Live Set.
//!
//! Problems are collected, never raised, so one pass reports everything.
//! The result is advisory: callers may still save an invalid document.

use thiserror::Error;

use crate::als::{Document, ElementId, LIVE_SET, NEXT_POINTEE_ID, REQUIRED_SECTIONS, ROOT_TAG};
use crate::identity::{self, IdentityGraph};

/// One finding. Whether it is an error or a warning depends on which list
/// of [`ValidationResult`] it lands in.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Issue {
    #[error("Root element is <{found}>, expected <{expected}>")]
    WrongRoot { found: String, expected: &'static str },
    #[error("Missing required section: {0}")]
    MissingSection(String),
    #[error("NextPointeeId has no numeric Value ({0:?})")]
    UnreadableCounter(String),
    #[error("Duplicate Id {0}")]
    DuplicateId(ElementId),
    #[error("NextPointeeId <= max used ID (counter {next}, max {max})")]
    CounterBehind { next: u64, max: u64 },
    #[error("Orphaned reference: no element has Id {0}")]
    OrphanedReference(ElementId),
    #[error("Unrecognized reference element <{0}> was not checked")]
    UnrecognizedReference(String),
    #[error("Document has no tracks")]
    NoTracks,
}

#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
    /// Identity analysis, when the document got far enough to run it.
    pub graph: Option<IdentityGraph>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Run every structural check in order.
pub fn validate(doc: &Document) -> ValidationResult {
    let mut result = ValidationResult::default();

    if doc.root.tag != ROOT_TAG {
        result.errors.push(Issue::WrongRoot {
            found: doc.root.tag.clone(),
            expected: ROOT_TAG,
        });
    }

    let Some(live_set) = doc.live_set() else {
        result.errors.push(Issue::MissingSection(LIVE_SET.to_string()));
        return result;
    };

    for section in REQUIRED_SECTIONS {
        if live_set.child(section).is_none() {
            result.errors.push(Issue::MissingSection(section.to_string()));
        }
    }

    let graph = identity::analyze(doc);

    for id in &graph.duplicates {
        result.warnings.push(Issue::DuplicateId(id.clone()));
    }

    match (graph.next_pointee_id, live_set.value_of(NEXT_POINTEE_ID)) {
        (Some(next), _) => {
            if let Some(max) = graph.max_numeric_id.filter(|max| next <= *max) {
                result.errors.push(Issue::CounterBehind { next, max });
            }
        }
        (None, Some(raw)) => result.errors.push(Issue::UnreadableCounter(raw.to_string())),
        // A missing counter was reported with the required sections.
        (None, None) => {}
    }

    for id in graph.orphaned_references() {
        result.errors.push(Issue::OrphanedReference(id.clone()));
    }

    for tag in &graph.unrecognized_references {
        result.warnings.push(Issue::UnrecognizedReference(tag.clone()));
    }

    if doc.tracks().next().is_none() {
        result.warnings.push(Issue::NoTracks);
    }

    log::debug!(
        "Validated: {} errors, {} warnings, {} ids",
        result.errors.len(),
        result.warnings.len(),
        graph.all_ids.len()
    );

    result.graph = Some(graph);
    result
}
