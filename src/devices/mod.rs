pub mod classify;
pub mod extract;
pub mod migrate;

pub use classify::DeviceCategory;

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::als::codec;
use crate::als::{Document, Element, ElementId, MASTER_TRACK, TrackKind};

/// Where a track keeps its devices.
pub const DEVICE_CHAIN_PATH: &[&str] = &["DeviceChain", "DeviceChain", extract::DEVICES];

const LOCK_ATTEMPTS: u32 = 50;
const LOCK_RETRY: Duration = Duration::from_millis(20);

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Library index is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Library is locked by another writer (remove {} if stale)", .0.display())]
    Locked(PathBuf),
}

pub type Result<T> = std::result::Result<T, LibraryError>;

/// A device subtree captured from a project, ready to be re-inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceTemplate {
    pub name: String,
    /// Element tag, e.g. `Eq8` or `PluginDevice`.
    pub device_type: String,
    pub category: DeviceCategory,
    /// Serialized device element.
    pub xml: String,
    pub metadata: BTreeMap<String, String>,
}

/// One entry of the on-disk index, keyed by template name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDevice {
    #[serde(rename = "type")]
    pub device_type: String,
    pub category: DeviceCategory,
    pub xml: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Name-keyed device templates backed by a single JSON index file.
///
/// Readers share a library freely; every write re-reads the index under an
/// exclusive lock file before replacing it, so concurrent writers in other
/// processes do not drop each other's entries.
#[derive(Debug)]
pub struct DeviceLibrary {
    path: PathBuf,
    entries: BTreeMap<String, StoredDevice>,
}

impl DeviceLibrary {
    /// Open the index at `path`. A missing file is an empty library.
    pub fn open(path: &Path) -> Result<Self> {
        let entries = read_index(path)?;
        log::debug!("Device library {}: {} templates", path.display(), entries.len());
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&StoredDevice> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StoredDevice)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Persist one template and return the name it was stored under.
    ///
    /// Without `overwrite`, a taken name gets `_1`, `_2`, … appended.
    pub fn store(&mut self, template: DeviceTemplate, overwrite: bool) -> Result<String> {
        let mut names = self.store_all(vec![template], overwrite)?;
        Ok(names.remove(0))
    }

    /// Persist several templates in one locked write.
    pub fn store_all(
        &mut self,
        templates: Vec<DeviceTemplate>,
        overwrite: bool,
    ) -> Result<Vec<String>> {
        let _lock = IndexLock::acquire(&self.path)?;
        self.entries = read_index(&self.path)?;

        let mut stored = Vec::with_capacity(templates.len());
        for template in templates {
            let name = if overwrite {
                template.name.clone()
            } else {
                unique_name(&self.entries, &template.name)
            };
            if name != template.name {
                log::info!("Device name {} taken, storing as {}", template.name, name);
            }
            self.entries.insert(
                name.clone(),
                StoredDevice {
                    device_type: template.device_type,
                    category: template.category,
                    xml: template.xml,
                    metadata: template.metadata,
                },
            );
            stored.push(name);
        }

        write_index(&self.path, &self.entries)?;
        Ok(stored)
    }

    /// Extract every device from `doc` and store it, tagging each template
    /// with its source project and extraction time.
    pub fn import_project(
        &mut self,
        doc: &Document,
        source: &Path,
        overwrite: bool,
    ) -> Result<Vec<String>> {
        let extracted_at = chrono::Utc::now().to_rfc3339();
        let templates: Vec<DeviceTemplate> = extract::extract(doc)
            .into_iter()
            .map(|mut t| {
                t.metadata
                    .insert("source".to_string(), source.display().to_string());
                t.metadata
                    .insert("extracted_at".to_string(), extracted_at.clone());
                t
            })
            .collect();

        if templates.is_empty() {
            log::info!("No devices found in {}", source.display());
            return Ok(Vec::new());
        }
        self.store_all(templates, overwrite)
    }

    pub fn remove(&mut self, name: &str) -> Result<bool> {
        let _lock = IndexLock::acquire(&self.path)?;
        self.entries = read_index(&self.path)?;
        let removed = self.entries.remove(name).is_some();
        if removed {
            write_index(&self.path, &self.entries)?;
        }
        Ok(removed)
    }

    /// Parse a stored device with its extracted ids intact and legacy
    /// relative paths migrated. `None` for an unknown name or an unreadable
    /// stored subtree.
    pub fn template(&self, name: &str) -> Option<Element> {
        let Some(stored) = self.entries.get(name) else {
            log::debug!("Device {name} not in library");
            return None;
        };
        let mut element = match codec::element_from_xml(&stored.xml) {
            Ok(e) => e,
            Err(e) => {
                log::warn!("Stored device {name} is unreadable: {e}");
                return None;
            }
        };

        let migration = migrate::migrate_relative_paths(&mut element);
        if migration.skipped_mixed > 0 {
            log::warn!(
                "Device {name}: {} relative paths left in legacy form",
                migration.skipped_mixed
            );
        }
        Some(element)
    }

    /// [`template`](Self::template) with only the root `Id` replaced.
    ///
    /// Internal ids are kept as extracted, which is only safe for a single
    /// insertion whose internal ids are known to be free. Callers placing a
    /// device more than once renumber the template through
    /// [`crate::identity::reassign_ids`] instead.
    pub fn materialize(&self, name: &str, new_root_id: u64) -> Option<Element> {
        let mut element = self.template(name)?;
        element.set_id(Some(ElementId::Numeric(new_root_id)));
        Some(element)
    }

    /// Append a materialized device to `track`'s device chain, creating the
    /// chain if the track has none. `false` for an unknown device or an
    /// element that is not a track.
    pub fn insert_into_track(&self, track: &mut Element, device_name: &str, new_root_id: u64) -> bool {
        if !is_track(track) {
            log::warn!("<{}> is not a track, cannot insert {device_name}", track.tag);
            return false;
        }
        let Some(device) = self.materialize(device_name, new_root_id) else {
            return false;
        };
        attach_device(track, device)
    }
}

fn is_track(element: &Element) -> bool {
    TrackKind::from_tag(&element.tag).is_some() || element.tag == MASTER_TRACK
}

/// Append `device` to `track`'s device chain as is. `false` if `track` is
/// not a track element.
pub fn attach_device(track: &mut Element, device: Element) -> bool {
    if !is_track(track) {
        log::warn!("<{}> is not a track, cannot attach <{}>", track.tag, device.tag);
        return false;
    }
    track.ensure_path(DEVICE_CHAIN_PATH).push(device);
    true
}

fn unique_name(entries: &BTreeMap<String, StoredDevice>, base: &str) -> String {
    if !entries.contains_key(base) {
        return base.to_string();
    }
    (1..)
        .map(|i| format!("{base}_{i}"))
        .find(|candidate| !entries.contains_key(candidate))
        .unwrap_or_else(|| base.to_string())
}

fn read_index(path: &Path) -> Result<BTreeMap<String, StoredDevice>> {
    match std::fs::File::open(path) {
        Ok(file) => Ok(serde_json::from_reader(BufReader::new(file))?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(e.into()),
    }
}

fn write_index(path: &Path, entries: &BTreeMap<String, StoredDevice>) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, entries)?;
    tmp.write_all(b"\n")?;
    tmp.persist(path).map_err(|e| LibraryError::Io(e.error))?;
    log::debug!("Wrote {} templates to {}", entries.len(), path.display());
    Ok(())
}

/// Exclusive writer lock: a sidecar `<index>.lock` file created atomically.
struct IndexLock {
    path: PathBuf,
}

impl IndexLock {
    fn acquire(index: &Path) -> Result<Self> {
        let mut name = index.as_os_str().to_owned();
        name.push(".lock");
        let path = PathBuf::from(name);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        for _ in 0..LOCK_ATTEMPTS {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => thread::sleep(LOCK_RETRY),
                Err(e) => return Err(e.into()),
            }
        }
        Err(LibraryError::Locked(path))
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        std::fs::remove_file(&self.path).ok();
    }
}
