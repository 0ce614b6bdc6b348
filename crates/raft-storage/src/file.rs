//! # file storage
//!
//! why: survive process restarts on a real filesystem
//! relations: implements the Storage trait from lib.rs
//! what: FileStorage with atomic tmp+rename writes
//!
//! layout of the storage directory:
//! - state.json: `{ "version": 1, "state": { current_term, voted_for, log } }`
//! - snapshot-<index>.bin: raw snapshot bytes for the boundary the log is anchored on
//!
//! a snapshot is written before the state that points at it and older
//! snapshot files are removed only after that state is durable, so a crash
//! at any step leaves state.json paired with a snapshot file that exists.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use raft_core::{PersistentState, Snapshot};
use serde::{Deserialize, Serialize};

use crate::{check_anchor, Storage, StorageError};

const STATE_FILE: &str = "state.json";
const STATE_TMP: &str = "state.tmp";
const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct StateFileRef<'a> {
    version: u32,
    state: &'a PersistentState,
}

#[derive(Deserialize)]
struct StateFile {
    version: u32,
    state: PersistentState,
}

/// file-based storage implementation using std::fs
#[derive(Debug)]
pub struct FileStorage {
    /// directory path for storing state files
    dir: PathBuf,
    /// encoded length of state.json as last written or found on open
    state_size: usize,
}

impl FileStorage {
    /// open (or create) storage rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let state_size = match fs::metadata(dir.join(STATE_FILE)) {
            Ok(meta) => meta.len() as usize,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(dir = %dir.display(), state_size, "opened file storage");
        Ok(Self { dir, state_size })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    fn snapshot_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("snapshot-{index}.bin"))
    }

    /// write to a temp file, fsync, then rename over the target
    fn write_atomic(&self, target: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let tmp = match target.file_name().and_then(|n| n.to_str()) {
            Some(STATE_FILE) => self.dir.join(STATE_TMP),
            Some(name) => self.dir.join(format!("{name}.tmp")),
            None => return Err(StorageError::Corrupt(format!("bad target path {}", target.display()))),
        };
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, target)?;
        sync_dir(&self.dir)?;
        Ok(())
    }

    fn write_state(&mut self, state: &PersistentState) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(&StateFileRef { version: FORMAT_VERSION, state })?;
        self.write_atomic(&self.state_path(), &bytes)?;
        self.state_size = bytes.len();
        Ok(())
    }

    /// snapshot files other than the one for `keep`
    fn stale_snapshots(&self, keep: u64) -> Result<Vec<PathBuf>, StorageError> {
        let mut stale = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let index = name
                .strip_prefix("snapshot-")
                .and_then(|rest| rest.strip_suffix(".bin"))
                .and_then(|index| index.parse::<u64>().ok());
            if matches!(index, Some(index) if index != keep) {
                stale.push(path);
            }
        }
        Ok(stale)
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), StorageError> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), StorageError> {
    Ok(())
}

impl Storage for FileStorage {
    fn save(&mut self, state: &PersistentState) -> Result<(), StorageError> {
        self.write_state(state)?;
        tracing::trace!(term = state.current_term, last_index = state.log.last_index(), "saved raft state");
        Ok(())
    }

    fn save_with_snapshot(
        &mut self,
        state: &PersistentState,
        snapshot: &Snapshot,
    ) -> Result<(), StorageError> {
        check_anchor(state, snapshot)?;
        let index = snapshot.meta.last_included_index;

        self.write_atomic(&self.snapshot_path(index), &snapshot.data)?;
        self.write_state(state)?;
        for path in self.stale_snapshots(index)? {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove old snapshot");
            }
        }
        tracing::debug!(index, bytes = snapshot.data.len(), "saved raft state with snapshot");
        Ok(())
    }

    fn load(&self) -> Result<Option<PersistentState>, StorageError> {
        let bytes = match fs::read(self.state_path()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let file: StateFile = serde_json::from_slice(&bytes)?;
        if file.version != FORMAT_VERSION {
            return Err(StorageError::Corrupt(format!(
                "unsupported state format version {}",
                file.version
            )));
        }
        file.state.log.check().map_err(StorageError::Corrupt)?;
        Ok(Some(file.state))
    }

    fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError> {
        let Some(state) = self.load()? else {
            return Ok(None);
        };
        let index = state.log.snapshot_index();
        if index == 0 {
            return Ok(None);
        }
        match fs::read(self.snapshot_path(index)) {
            Ok(data) => Ok(Some(Snapshot::new(index, state.log.snapshot_term(), data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::Corrupt(
                format!("log compacted through {index} but snapshot file is missing"),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn state_size(&self) -> usize {
        self.state_size
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        for path in self.stale_snapshots(0)? {
            fs::remove_file(path)?;
        }
        match fs::remove_file(self.state_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.state_size = 0;
        Ok(())
    }
}
