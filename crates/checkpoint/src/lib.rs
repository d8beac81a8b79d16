//! File-backed checkpoints: one JSON document per conversation thread.
//!
//! Storage location: `~/.stockwise/threads/<thread>.json`
//!
//! Thread ids are escaped into file names so that any id round-trips
//! through [`StateStore::threads`]. Writes go to a temporary file that is
//! renamed over the checkpoint, so a crash never leaves a half-written
//! state behind.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use stockwise_core::checkpoint::StateStore;
use stockwise_core::error::StoreError;
use stockwise_core::state::AgentState;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const EXTENSION: &str = "json";

/// A directory of JSON checkpoints.
pub struct FileStateStore {
    dir: PathBuf,
    // serializes writers; readers go straight to disk
    write_lock: Mutex<()>,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(dir = %dir.display(), "File checkpoint store opened");
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        self.dir.join(format!("{}.{EXTENSION}", encode_thread_id(thread_id)))
    }
}

/// Escape everything outside `[A-Za-z0-9_-]` as `%XX` per UTF-8 byte.
fn encode_thread_id(thread_id: &str) -> String {
    let mut out = String::with_capacity(thread_id.len());
    for byte in thread_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_thread_id(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn storage_err(action: &str, path: &Path, e: std::io::Error) -> StoreError {
    StoreError::Storage(format!("Failed to {action} {}: {e}", path.display()))
}

#[async_trait]
impl StateStore for FileStateStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, thread_id: &str) -> Result<Option<AgentState>, StoreError> {
        let path = self.path_for(thread_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_err("read", &path, e)),
        };

        let state: AgentState =
            serde_json::from_str(&content).map_err(|e| StoreError::Corrupted {
                thread_id: thread_id.to_string(),
                reason: e.to_string(),
            })?;
        debug!(thread_id, messages = state.messages.len(), "Checkpoint loaded");
        Ok(Some(state))
    }

    async fn save(&self, state: &AgentState) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| StoreError::Storage(format!("Failed to serialize state: {e}")))?;

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| storage_err("create", &self.dir, e))?;

        let path = self.path_for(&state.thread_id);
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| storage_err("write", &tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| storage_err("replace", &path, e))?;

        debug!(thread_id = %state.thread_id, messages = state.messages.len(), "Checkpoint saved");
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, StoreError> {
        let path = self.path_for(thread_id);
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(storage_err("remove", &path, e)),
        }
    }

    async fn threads(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_err("list", &self.dir, e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_err("list", &self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match decode_thread_id(stem) {
                Some(id) => ids.push(id),
                None => warn!(file = %path.display(), "Skipping checkpoint with undecodable name"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}
