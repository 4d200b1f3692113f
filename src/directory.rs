use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::limits::MAX_NAME_LEN;
use crate::model::{DisplayInfo, Principal};

/// Read-only view of user display metadata.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    async fn get_display_info(&self, principal_id: &str) -> Option<DisplayInfo>;
}

#[derive(Debug, PartialEq, Eq)]
pub enum ProfileError {
    NotRegistered(String),
    NameTooLong,
    /// The record file could not be written; the change was rolled back.
    Storage(String),
}

impl std::fmt::Display for ProfileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileError::NotRegistered(id) => write!(f, "no directory record for {id}"),
            ProfileError::NameTooLong => write!(f, "name longer than {MAX_NAME_LEN} bytes"),
            ProfileError::Storage(e) => write!(f, "directory write failed: {e}"),
        }
    }
}

impl std::error::Error for ProfileError {}

/// Directory keyed by principal id, held in memory and optionally saved to
/// a JSON file after every change.
///
/// Each save writes the whole record set to a sibling temp file, fsyncs it,
/// and renames it over the live file, so a crash leaves either the old or
/// the new set on disk.
#[derive(Debug, Default)]
pub struct LocalDirectory {
    records: DashMap<String, DisplayInfo>,
    path: Option<PathBuf>,
    /// Serializes mutate-then-save so saves land in mutation order.
    writes: Mutex<()>,
}

impl LocalDirectory {
    /// Memory-only directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the records saved at `path`. A missing file opens empty.
    pub fn open(path: PathBuf) -> io::Result<Self> {
        let records: BTreeMap<String, DisplayInfo> = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e),
        };
        tracing::info!(
            "directory loaded {} records from {}",
            records.len(),
            path.display()
        );
        Ok(Self {
            records: records.into_iter().collect(),
            path: Some(path),
            writes: Mutex::new(()),
        })
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn save(&self) -> Result<(), ProfileError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let records: BTreeMap<String, DisplayInfo> = self
            .records
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        write_atomically(path, &records).map_err(|e| {
            tracing::error!("saving directory to {} failed: {e}", path.display());
            ProfileError::Storage(e.to_string())
        })
    }

    /// Create a record from the principal's identity on first sign-in.
    /// Existing records are left untouched. Returns whether one was created.
    pub fn register_if_absent(&self, principal: &Principal) -> Result<bool, ProfileError> {
        let _writes = self.lock_writes();
        if self.records.contains_key(&principal.id) {
            return Ok(false);
        }
        let info = DisplayInfo {
            name: principal.display_name.clone().unwrap_or_default(),
            email: principal.email.clone().unwrap_or_default(),
            phone_number: principal.phone_number.clone(),
        };
        self.records.insert(principal.id.clone(), info);
        if let Err(e) = self.save() {
            self.records.remove(&principal.id);
            return Err(e);
        }
        Ok(true)
    }

    /// Apply profile edits. `None` fields keep their current value.
    pub fn update_profile(
        &self,
        principal_id: &str,
        name: Option<String>,
        phone_number: Option<String>,
    ) -> Result<DisplayInfo, ProfileError> {
        if name.as_ref().is_some_and(|n| n.len() > MAX_NAME_LEN) {
            return Err(ProfileError::NameTooLong);
        }
        let _writes = self.lock_writes();
        let previous = self
            .records
            .get(principal_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| ProfileError::NotRegistered(principal_id.to_string()))?;
        let mut record = previous.clone();
        if let Some(name) = name {
            record.name = name;
        }
        if let Some(phone) = phone_number {
            record.phone_number = Some(phone).filter(|p| !p.is_empty());
        }
        self.records.insert(principal_id.to_string(), record.clone());
        if let Err(e) = self.save() {
            self.records.insert(principal_id.to_string(), previous);
            return Err(e);
        }
        Ok(record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn write_atomically(path: &Path, records: &BTreeMap<String, DisplayInfo>) -> io::Result<()> {
    let bytes = serde_json::to_vec_pretty(records)?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

#[async_trait]
impl DirectoryService for LocalDirectory {
    async fn get_display_info(&self, principal_id: &str) -> Option<DisplayInfo> {
        self.records.get(principal_id).map(|r| r.value().clone())
    }
}
