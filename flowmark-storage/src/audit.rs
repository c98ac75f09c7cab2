//! File-backed audit trail.
//!
//! One pretty-printed JSON array per `(workflow, entity)` at
//! `<dir>/<kebab(workflow)>-<entity_id>.json`. Characters other than
//! alphanumerics, `-`, `_` and `.` are percent-encoded in both parts, so every
//! entity maps to a single file directly inside `<dir>`.

use dashmap::DashMap;
use flowmark_core::{AuditEntry, AuditError, AuditSink};
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Lowercases and replaces whitespace runs with `-`.
pub fn kebab_case(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

/// Percent-encodes everything that is not safe inside a single file name.
fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
            out.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    out
}

/// Audit file name for an entity.
pub fn audit_file_name(workflow: &str, entity_id: &str) -> String {
    format!(
        "{}-{}.json",
        encode_component(&kebab_case(workflow)),
        encode_component(entity_id)
    )
}

/// Audit trail that appends entries to JSON files in a directory.
pub struct FileAuditTrail {
    dir: PathBuf,
    /// Write locks for files with an operation in flight.
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl FileAuditTrail {
    /// Opens or creates an audit trail at the given directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, AuditError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            locks: DashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the audit file for an entity. Entities without an id have none.
    pub fn file_path(&self, workflow: &str, entity_id: &str) -> Result<PathBuf, AuditError> {
        if entity_id.is_empty() {
            return Err(AuditError::Backend(format!(
                "entity in workflow '{}' has no id",
                workflow
            )));
        }
        Ok(self.dir.join(audit_file_name(workflow, entity_id)))
    }

    /// Runs `f` holding the lock for `path`.
    ///
    /// The map entry is dropped afterwards unless another caller holds it;
    /// that caller then drops it on its way out.
    fn with_lock<T>(
        &self,
        path: &Path,
        f: impl FnOnce() -> Result<T, AuditError>,
    ) -> Result<T, AuditError> {
        let lock = self
            .locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock();
            f()
        };
        drop(lock);
        self.locks
            .remove_if(path, |_, held| Arc::strong_count(held) == 1);
        result
    }

    fn read_entries(path: &Path) -> Result<Vec<AuditEntry>, AuditError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Writes the full history to a sibling temp file, then renames it over
    /// `path`. An interrupted write leaves the previous history intact.
    fn write_entries(path: &Path, entries: &[AuditEntry]) -> Result<(), AuditError> {
        let temp_path = temp_path_for(path);
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, entries)?;
        writer.flush()?;
        writer
            .into_inner()
            .map_err(|e| AuditError::Io(e.into_error()))?
            .sync_all()?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

impl AuditSink for FileAuditTrail {
    fn log_event(
        &self,
        workflow: &str,
        entry: AuditEntry,
        enabled: bool,
    ) -> Result<(), AuditError> {
        if !enabled {
            return Ok(());
        }

        let path = self.file_path(workflow, &entry.entity_id)?;
        self.with_lock(&path, || {
            let mut entries = Self::read_entries(&path)?;
            tracing::debug!(
                path = %path.display(),
                event = %entry.event_type,
                transition = %entry.transition,
                "appending audit entry"
            );
            entries.push(entry);
            Self::write_entries(&path, &entries)
        })
    }

    fn history(&self, workflow: &str, entity_id: &str) -> Result<Vec<AuditEntry>, AuditError> {
        let path = self.file_path(workflow, entity_id)?;
        self.with_lock(&path, || Self::read_entries(&path))
    }

    fn clear_history(&self, workflow: &str, entity_id: &str) -> Result<(), AuditError> {
        let path = self.file_path(workflow, entity_id)?;
        self.with_lock(&path, || {
            if path.exists() {
                fs::remove_file(&path)?;
                tracing::info!("Cleared audit trail {}", path.display());
            }
            Ok(())
        })
    }
}
