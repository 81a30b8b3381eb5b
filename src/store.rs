use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use serde_json::Value;
use tempfile::NamedTempFile;

use crate::{
    error::StoreError,
    models::{Pointer, PointerState, Snapshot},
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub const POINTER_FILE: &str = "metadata.json";

/// Filesystem-backed snapshot files plus the `metadata.json` pointer.
///
/// A single process is assumed to own the directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| StoreError::io(&dir, err))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pointer_path(&self) -> PathBuf {
        self.dir.join(POINTER_FILE)
    }

    /// Distinguishes "nothing published yet" from a pointer that cannot be read.
    pub fn pointer_state(&self) -> PointerState {
        match self.current_pointer() {
            Ok(Some(pointer)) => PointerState::Present(pointer),
            Ok(None) => PointerState::Missing,
            Err(err) => PointerState::Corrupt(err.to_string()),
        }
    }

    pub fn current_pointer(&self) -> Result<Option<Pointer>, StoreError> {
        let path = self.pointer_path();
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::io(path, err)),
        };

        let pointer: Pointer = serde_json::from_str(&contents)
            .map_err(|err| StoreError::CorruptPointer(err.to_string()))?;
        validate_filename(&pointer.filename)?;
        Ok(Some(pointer))
    }

    /// Writes the snapshot file, flushes it, then swaps the pointer over to it.
    ///
    /// Any error leaves the previous pointer untouched and removes the new file.
    pub fn publish(&self, snapshot: &Snapshot) -> Result<Pointer, StoreError> {
        let pointer = Pointer::for_snapshot(snapshot);
        let snapshot_path = self.dir.join(&pointer.filename);

        let body = serde_json::to_vec_pretty(snapshot).map_err(|source| StoreError::Serialize {
            what: "snapshot",
            source,
        })?;

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&snapshot_path)
            .map_err(|err| match err.kind() {
                io::ErrorKind::AlreadyExists => StoreError::Collision(pointer.filename.clone()),
                _ => StoreError::io(&snapshot_path, err),
            })?;
        let written = file
            .write_all(&body)
            .and_then(|_| file.sync_all())
            .map_err(|err| StoreError::io(&snapshot_path, err));
        drop(file);

        if let Err(err) = written.and_then(|_| {
            log_info!("Data saved to {}", snapshot_path.display());
            self.write_pointer(&pointer)
        }) {
            discard_orphan(&snapshot_path);
            return Err(err);
        }
        log_info!("Pointer updated to {}", pointer.filename);
        Ok(pointer)
    }

    /// Raw snapshot document (`{capturedAt, data}`) stored under `filename`.
    pub fn read(&self, filename: &str) -> Result<Value, StoreError> {
        validate_filename(filename)?;
        let path = self.dir.join(filename);
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::MissingSnapshot(filename.to_string()))
            }
            Err(err) => return Err(StoreError::io(path, err)),
        };

        let document: Value =
            serde_json::from_slice(&contents).map_err(|err| StoreError::CorruptSnapshot {
                name: filename.to_string(),
                reason: err.to_string(),
            })?;
        if document.get("data").is_none() {
            return Err(StoreError::CorruptSnapshot {
                name: filename.to_string(),
                reason: "missing `data` field".into(),
            });
        }
        Ok(document)
    }

    pub fn read_snapshot(&self, filename: &str) -> Result<Snapshot, StoreError> {
        let document = self.read(filename)?;
        serde_json::from_value(document).map_err(|err| StoreError::CorruptSnapshot {
            name: filename.to_string(),
            reason: err.to_string(),
        })
    }

    /// Document referenced by the current pointer.
    pub fn read_current(&self) -> Result<Value, StoreError> {
        let pointer = self.current_pointer()?.ok_or(StoreError::NotReady)?;
        self.read(&pointer.filename).map_err(|err| {
            log_warn!("File listed in pointer not readable: {err}");
            err
        })
    }

    fn write_pointer(&self, pointer: &Pointer) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(pointer).map_err(|source| StoreError::Serialize {
            what: "pointer",
            source,
        })?;

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|err| StoreError::io(&self.dir, err))?;
        tmp.write_all(&body)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|err| StoreError::io(tmp.path(), err))?;

        let target = self.pointer_path();
        tmp.persist(&target)
            .map_err(|err| StoreError::io(&target, err.error))?;
        Ok(())
    }
}

/// Removes a snapshot file the pointer never came to reference.
fn discard_orphan(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        log_warn!("Failed to remove unpublished snapshot {}: {err}", path.display());
    }
}

fn validate_filename(filename: &str) -> Result<(), StoreError> {
    let bare = Path::new(filename)
        .file_name()
        .is_some_and(|name| name == filename);
    if filename.is_empty() || !bare || filename.contains(['/', '\\']) {
        return Err(StoreError::CorruptPointer(format!(
            "invalid snapshot filename '{filename}'"
        )));
    }
    Ok(())
}
