//! Side-channel metadata documents
//!
//! Staging builds one logical record per archived entry: where it came from,
//! and optionally a permission facet and a link facet. The record is split
//! into three JSON documents only when written:
//!
//! - `affiliation.json` maps archive path to original absolute path
//! - `permissions.json` maps archive path to `{mode, uid, gid}`
//! - `links.json` maps archive path to `{target, is_absolute, is_dir?}` and is
//!   only written when at least one symlink was recorded
//!
//! On restore [`Manifest::load`] joins the documents back into the same
//! per-entry records. Key order follows discovery order in both directions.

use crate::error::{RagnarokError, Result};
use crate::path_mapper::ArchivePath;
use crate::types::{LinkRecord, PermissionRecord};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name of the affiliation document
pub const AFFILIATION_FILE: &str = "affiliation.json";
/// File name of the permission document
pub const PERMISSIONS_FILE: &str = "permissions.json";
/// File name of the link document
pub const LINKS_FILE: &str = "links.json";

/// String-keyed map that keeps discovery order through serialization
pub type OrderedMap<V> = IndexMap<String, V>;

/// Everything known about one archived entry
#[derive(Debug, Clone, PartialEq)]
pub struct EntryRecord {
    /// Original absolute path
    pub original: String,
    /// Mode and ownership, absent for symlinks
    pub permissions: Option<PermissionRecord>,
    /// Link description, present only for symlinks
    pub link: Option<LinkRecord>,
}

impl EntryRecord {
    /// Original location as a path
    pub fn destination(&self) -> PathBuf {
        PathBuf::from(&self.original)
    }

    /// Whether the entry must be rebuilt as a symlink
    pub fn is_link(&self) -> bool {
        self.link.is_some()
    }
}

/// Accumulates entry records during one staging pass
#[derive(Debug, Default)]
pub struct MetadataRecorder {
    entries: OrderedMap<EntryRecord>,
}

impl MetadataRecorder {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a regular file or directory together with its mode and ownership
    pub fn record_entry(&mut self, archive: &ArchivePath, original: &Path, permissions: PermissionRecord) {
        self.entries.insert(
            archive.relative.clone(),
            EntryRecord {
                original: original.to_string_lossy().into_owned(),
                permissions: Some(permissions),
                link: None,
            },
        );
    }

    /// Record a symlink; symlinks never carry a permission facet
    pub fn record_symlink(&mut self, archive: &ArchivePath, original: &Path, link: LinkRecord) {
        self.entries.insert(
            archive.relative.clone(),
            EntryRecord {
                original: original.to_string_lossy().into_owned(),
                permissions: None,
                link: Some(link),
            },
        );
    }

    /// Recorded entries in discovery order
    pub fn entries(&self) -> &OrderedMap<EntryRecord> {
        &self.entries
    }

    /// Number of recorded entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of recorded symlinks
    pub fn symlink_count(&self) -> usize {
        self.entries.iter().filter(|(_, e)| e.is_link()).count()
    }

    /// Split the records into the three documents and write them under `root`
    ///
    /// `affiliation.json` and `permissions.json` are always written;
    /// `links.json` only when a symlink was recorded.
    pub fn write_documents(&self, root: &Path) -> Result<()> {
        let mut affiliation = OrderedMap::new();
        let mut permissions = OrderedMap::new();
        let mut links = OrderedMap::new();

        for (key, entry) in self.entries.iter() {
            affiliation.insert(key.clone(), entry.original.clone());
            if let Some(record) = entry.permissions {
                permissions.insert(key.clone(), record);
            }
            if let Some(link) = &entry.link {
                links.insert(key.clone(), link.clone());
            }
        }

        write_json(&root.join(AFFILIATION_FILE), &affiliation)?;
        write_json(&root.join(PERMISSIONS_FILE), &permissions)?;
        if !links.is_empty() {
            write_json(&root.join(LINKS_FILE), &links)?;
        }

        debug!(
            "Wrote metadata: {} affiliations, {} permission records, {} links",
            affiliation.len(),
            permissions.len(),
            links.len()
        );
        Ok(())
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

/// Metadata of one extracted archive, joined back into per-entry records
#[derive(Debug, Default)]
pub struct Manifest {
    /// Entries in affiliation order
    pub entries: OrderedMap<EntryRecord>,
    /// Facets whose key has no affiliation record
    pub warnings: Vec<String>,
}

impl Manifest {
    /// Load the documents from an extracted staging tree
    ///
    /// # Errors
    ///
    /// - [`RagnarokError::MissingManifest`] if `affiliation.json` is absent
    /// - [`RagnarokError::InvalidManifest`] if any present document cannot be
    ///   read or parsed
    ///
    /// Absent `permissions.json` or `links.json` mean "no records".
    pub fn load(root: &Path) -> Result<Self> {
        let affiliation_path = root.join(AFFILIATION_FILE);
        if !affiliation_path.is_file() {
            return Err(RagnarokError::MissingManifest(affiliation_path));
        }

        let affiliation: OrderedMap<String> = read_json(&affiliation_path)?;
        let permissions: OrderedMap<PermissionRecord> =
            read_optional_json(&root.join(PERMISSIONS_FILE))?;
        let links: OrderedMap<LinkRecord> = read_optional_json(&root.join(LINKS_FILE))?;

        let mut entries: OrderedMap<EntryRecord> = affiliation
            .iter()
            .map(|(key, original)| {
                (
                    key.clone(),
                    EntryRecord {
                        original: original.clone(),
                        permissions: None,
                        link: None,
                    },
                )
            })
            .collect();

        let mut warnings = Vec::new();
        for (key, record) in permissions.iter() {
            match entries.get_mut(key) {
                Some(entry) => entry.permissions = Some(*record),
                None => {
                    warn!("Permission record without affiliation: {}", key);
                    warnings.push(format!("Permission record for {} has no affiliation entry", key));
                }
            }
        }
        for (key, link) in links.iter() {
            match entries.get_mut(key) {
                Some(entry) => entry.link = Some(link.clone()),
                None => {
                    warn!("Link record without affiliation: {}", key);
                    warnings.push(format!("Link record for {} has no affiliation entry", key));
                }
            }
        }

        debug!(
            "Loaded manifest: {} entries, {} links, {} orphaned facets",
            entries.len(),
            links.len(),
            warnings.len()
        );
        Ok(Self { entries, warnings })
    }

    /// Entries replayed by the file/directory pass
    pub fn plain_entries(&self) -> impl Iterator<Item = (&str, &EntryRecord)> {
        self.entries
            .iter()
            .filter(|(_, e)| !e.is_link())
            .map(|(k, e)| (k.as_str(), e))
    }

    /// Entries replayed by the symlink pass
    pub fn link_entries(&self) -> impl Iterator<Item = (&str, &EntryRecord, &LinkRecord)> {
        self.entries
            .iter()
            .filter_map(|(k, e)| e.link.as_ref().map(|link| (k.as_str(), e, link)))
    }

    /// Entries replayed by the permission pass
    pub fn permission_entries(&self) -> impl Iterator<Item = (&str, &EntryRecord, PermissionRecord)> {
        self.entries
            .iter()
            .filter_map(|(k, e)| e.permissions.map(|record| (k.as_str(), e, record)))
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(|e| RagnarokError::InvalidManifest {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|e| RagnarokError::InvalidManifest {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn read_optional_json<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Result<T> {
    if path.exists() {
        read_json(path)
    } else {
        debug!("{:?} not present, treating as empty", path);
        Ok(T::default())
    }
}
