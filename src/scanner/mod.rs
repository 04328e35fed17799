use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use thiserror::Error;
use walkdir::WalkDir;

use crate::als::codec;
use crate::devices::DeviceLibrary;
use crate::devices::extract;
use crate::validator::{self, ValidationResult};
use crate::{ALS_EXTENSION, BACKUP_DIR};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Outcome for one project file.
#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    /// Validation result, or why the file could not be read.
    pub outcome: Result<ValidationResult, String>,
    /// Devices used by the set that the library has no template for.
    pub unknown_devices: Vec<String>,
}

impl FileReport {
    pub fn is_valid(&self) -> bool {
        matches!(&self.outcome, Ok(r) if r.is_valid())
    }
}

#[derive(Debug, Default)]
pub struct ScanResult {
    pub scanned: u64,
    pub valid: u64,
    pub invalid: u64,
    pub unreadable: u64,
    pub reports: Vec<FileReport>,
}

impl ScanResult {
    pub fn all_valid(&self) -> bool {
        self.invalid == 0 && self.unreadable == 0
    }
}

/// Every `.als` file under `paths`, sorted. Ableton's `Backup` folders are
/// skipped unless `include_backups` is set.
pub fn collect_projects(paths: &[PathBuf], include_backups: bool) -> Vec<PathBuf> {
    let mut projects = Vec::new();

    for path in paths {
        let walker = WalkDir::new(path)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| include_backups || !is_backup_dir(e));

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    log::warn!("Skipping unreadable entry: {e}");
                    continue;
                }
            };
            if entry.file_type().is_file() && is_project_file(entry.path()) {
                projects.push(entry.into_path());
            }
        }
    }

    projects.sort();
    projects.dedup();
    projects
}

fn is_backup_dir(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0 && entry.file_type().is_dir() && entry.file_name() == BACKUP_DIR
}

fn is_project_file(path: &Path) -> bool {
    let ext_ok = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ALS_EXTENSION));
    // macOS resource-fork shadows on non-HFS drives
    let shadow = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("._"));
    ext_ok && !shadow
}

/// Validate every project under `paths` on a pool of `jobs` workers.
///
/// The library, when given, is only read; workers share it.
pub fn scan(
    paths: &[PathBuf],
    jobs: usize,
    include_backups: bool,
    library: Option<&DeviceLibrary>,
) -> Result<ScanResult, ScanError> {
    let projects = collect_projects(paths, include_backups);
    let mut result = ScanResult::default();

    if projects.is_empty() {
        log::info!("No .{ALS_EXTENSION} files found");
        return Ok(result);
    }

    let jobs = jobs.max(1);
    log::info!("Validating {} projects with {} workers", projects.len(), jobs);

    let pb = ProgressBar::new(projects.len() as u64);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }

    let pool = rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?;

    // One chunk in flight keeps memory bounded on large libraries.
    let chunk_size = jobs * 2;

    for chunk in projects.chunks(chunk_size) {
        let reports: Vec<FileReport> = pool.install(|| {
            chunk
                .par_iter()
                .map(|path| {
                    let report = check_file(path, library);
                    pb.inc(1);
                    report
                })
                .collect()
        });

        for report in reports {
            result.scanned += 1;
            match &report.outcome {
                Ok(r) if r.is_valid() => result.valid += 1,
                Ok(_) => result.invalid += 1,
                Err(e) => {
                    log::warn!("Could not read {}: {}", report.path.display(), e);
                    result.unreadable += 1;
                }
            }
            result.reports.push(report);
        }

        pb.set_message(format!("{} invalid, {} unreadable", result.invalid, result.unreadable));
    }

    pb.finish_with_message(format!(
        "Done: {} valid, {} invalid, {} unreadable",
        result.valid, result.invalid, result.unreadable
    ));

    Ok(result)
}

pub fn check_file(path: &Path, library: Option<&DeviceLibrary>) -> FileReport {
    let doc = match codec::load(path) {
        Ok(doc) => doc,
        Err(e) => {
            return FileReport {
                path: path.to_path_buf(),
                outcome: Err(e.to_string()),
                unknown_devices: Vec::new(),
            };
        }
    };

    let unknown_devices = match library {
        Some(lib) => {
            let mut names: Vec<String> = extract::extract(&doc)
                .into_iter()
                .map(|t| t.name)
                .filter(|name| !lib.contains(name))
                .collect();
            names.sort();
            names.dedup();
            names
        }
        None => Vec::new(),
    };

    FileReport {
        path: path.to_path_buf(),
        outcome: Ok(validator::validate(&doc)),
        unknown_devices,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::als::Document;
    use crate::als::fixtures::base_document;
    use crate::devices::extract::fixtures::devices_document;
    use std::fs;

    fn write_set(path: &Path, doc: &Document) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        codec::save(doc, path).unwrap();
    }

    #[test]
    fn finds_projects_and_skips_backups() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_set(&root.join("Song Project/Song.als"), &base_document());
        write_set(&root.join("Song Project/Backup/Song [2024-01-01 120000].als"), &base_document());
        write_set(&root.join("Other/Take.ALS"), &base_document());
        fs::write(root.join("Other/._Take.als"), b"junk").unwrap();
        fs::write(root.join("Other/notes.txt"), b"x").unwrap();

        let found = collect_projects(&[root.to_path_buf()], false);
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Take.ALS", "Song.als"]);

        assert_eq!(collect_projects(&[root.to_path_buf()], true).len(), 3);
    }

    #[test]
    fn scan_counts_valid_invalid_and_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_set(&root.join("good.als"), &base_document());

        let mut broken = base_document();
        broken
            .live_set_mut()
            .unwrap()
            .set_value(crate::als::NEXT_POINTEE_ID, "5");
        write_set(&root.join("behind.als"), &broken);

        fs::write(root.join("garbage.als"), b"not gzip at all").unwrap();

        let result = scan(&[root.to_path_buf()], 2, false, None).unwrap();
        assert_eq!(result.scanned, 3);
        assert_eq!(result.valid, 1);
        assert_eq!(result.invalid, 1);
        assert_eq!(result.unreadable, 1);
        assert!(!result.all_valid());

        let garbage = result
            .reports
            .iter()
            .find(|r| r.path.ends_with("garbage.als"))
            .unwrap();
        assert!(garbage.outcome.is_err());
    }

    #[test]
    fn reports_devices_missing_from_the_library() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drums.als");
        write_set(&path, &devices_document());

        let mut lib = DeviceLibrary::open(&dir.path().join("lib/devices.json")).unwrap();
        let templates = extract::extract(&devices_document());
        let sylenth = templates.into_iter().find(|t| t.name == "Sylenth1").unwrap();
        lib.store(sylenth, false).unwrap();

        let report = check_file(&path, Some(&lib));
        assert!(report.is_valid());
        assert_eq!(report.unknown_devices, vec!["Bus FX", "OriginalSimpler", "Saturator"]);

        let without = check_file(&path, None);
        assert!(without.unknown_devices.is_empty());
    }

    #[test]
    fn empty_tree_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = scan(&[dir.path().to_path_buf()], 4, false, None).unwrap();
        assert_eq!(result.scanned, 0);
        assert!(result.all_valid());
    }
}
