//! Legacy file-reference migration.
//!
//! Live 9 and earlier store a relative path as one `RelativePathElement`
//! child per directory. Current versions only read the single-attribute
//! form, `<RelativePath Value="a/b" />`.

use crate::als::{Element, Node};

pub const RELATIVE_PATH: &str = "RelativePath";
pub const RELATIVE_PATH_ELEMENT: &str = "RelativePathElement";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PathMigration {
    pub migrated: usize,
    /// Paths mixing legacy segments with anything else. Left untouched.
    pub skipped_mixed: usize,
}

/// Rewrite every legacy `RelativePath` under `root` in place.
pub fn migrate_relative_paths(root: &mut Element) -> PathMigration {
    let mut report = PathMigration::default();

    root.walk_mut(&mut |element| {
        if element.tag != RELATIVE_PATH {
            return;
        }
        let segments: Vec<Option<&str>> = element
            .elements()
            .filter(|c| c.tag == RELATIVE_PATH_ELEMENT)
            .map(|c| c.attr("Dir"))
            .collect();
        if segments.is_empty() {
            return;
        }

        let only_segments = element
            .children
            .iter()
            .all(|n| matches!(n, Node::Element(c) if c.tag == RELATIVE_PATH_ELEMENT));
        let all_named = segments.iter().all(Option::is_some);
        if !only_segments || !all_named || element.attr("Value").is_some() {
            log::warn!(
                "RelativePath with {} legacy segments mixed with other content, not migrated",
                segments.len()
            );
            report.skipped_mixed += 1;
            return;
        }

        let joined = segments.into_iter().flatten().collect::<Vec<_>>().join("/");
        element.children.clear();
        element.set_attr("Value", joined);
        report.migrated += 1;
    });

    if report.migrated > 0 {
        log::debug!("Migrated {} legacy relative paths", report.migrated);
    }
    report
}
