//! Single-file storage — the whole cluster state as one serialized document.
//!
//! The document has two sections, `jobs` and `locks` (empty `locks` is
//! omitted). The codec is chosen by the file's extension: `.json`, `.yaml` /
//! `.yml`, or `.toml`. Every mutation takes the file mutex, loads the
//! document, applies the change, and rewrites it atomically
//! (write-to-temp + rename). File I/O runs on the blocking pool so the
//! scheduler's runtime never stalls on disk.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{ttl_to_chrono, LockEntry, Storage};
use crate::error::{Error, Result};
use crate::job::JobRecord;

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileState {
    #[serde(default)]
    jobs: Vec<JobRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    locks: Vec<LockEntry>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DocumentCodec {
    Json,
    Yaml,
    Toml,
}

impl DocumentCodec {
    fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            "" => Err(Error::UnsupportedFormat(format!(
                "{} has no extension",
                path.display()
            ))),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }

    fn encode(&self, state: &FileState) -> Result<String> {
        match self {
            Self::Json => Ok(serde_json::to_string_pretty(state)?),
            Self::Yaml => Ok(serde_yaml::to_string(state)?),
            Self::Toml => Ok(toml::to_string_pretty(state)?),
        }
    }

    fn decode(&self, text: &str) -> Result<FileState> {
        if text.trim().is_empty() {
            return Ok(FileState::default());
        }
        match self {
            Self::Json => Ok(serde_json::from_str(text)?),
            Self::Yaml => Ok(serde_yaml::from_str(text)?),
            Self::Toml => Ok(toml::from_str(text)?),
        }
    }
}

/// File-backed [`Storage`]. Construction ensures the parent directory exists
/// and seeds an empty document when the file is absent.
pub struct FileStorage {
    path: PathBuf,
    codec: DocumentCodec,
    guard: Mutex<()>,
}

impl FileStorage {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let codec = DocumentCodec::from_path(&path)?;
        let storage = Self {
            path,
            codec,
            guard: Mutex::new(()),
        };
        storage.initialize().await?;
        Ok(storage)
    }

    /// The document path this backend persists to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn initialize(&self) -> Result<()> {
        let _held = self.guard.lock().await;
        let path = self.path.clone();
        let codec = self.codec;
        run_blocking(move || {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            if !path.exists() {
                let empty = codec.encode(&FileState::default())?;
                write_atomic(&path, &empty)?;
            }
            Ok(())
        })
        .await
    }

    async fn read_state(&self) -> Result<FileState> {
        let _held = self.guard.lock().await;
        let path = self.path.clone();
        let codec = self.codec;
        run_blocking(move || load_state(&path, codec)).await
    }

    /// Load-mutate-rewrite under the file mutex.
    async fn mutate<T, F>(&self, apply: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut FileState) -> Result<T> + Send + 'static,
    {
        let _held = self.guard.lock().await;
        let path = self.path.clone();
        let codec = self.codec;
        run_blocking(move || {
            let mut state = load_state(&path, codec)?;
            let out = apply(&mut state)?;
            write_atomic(&path, &codec.encode(&state)?)?;
            Ok(out)
        })
        .await
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn save(&self, record: &JobRecord) -> Result<()> {
        let record = record.clone();
        self.mutate(move |state| {
            match state.jobs.iter_mut().find(|j| j.id == record.id) {
                Some(existing) => *existing = record,
                None => state.jobs.push(record),
            }
            Ok(())
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<JobRecord> {
        let state = self.read_state().await?;
        state
            .jobs
            .into_iter()
            .find(|j| j.id == id)
            .ok_or_else(|| Error::JobNotFound(id.to_string()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.mutate(move |state| {
            let before = state.jobs.len();
            state.jobs.retain(|j| j.id != id);
            if state.jobs.len() == before {
                return Err(Error::JobNotFound(id.clone()));
            }
            state.locks.retain(|l| l.job_id != id);
            Ok(())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<JobRecord>> {
        Ok(self.read_state().await?.jobs)
    }

    async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<JobRecord>> {
        let state = self.read_state().await?;
        Ok(state.jobs.into_iter().filter(|j| j.is_due(now)).collect())
    }

    async fn acquire_lock(&self, job_id: &str, owner_id: &str, ttl: Duration) -> Result<bool> {
        let job_id = job_id.to_string();
        let owner_id = owner_id.to_string();
        self.mutate(move |state| {
            let now = Utc::now();
            // Expired entries are dead weight in the document; drop them all.
            state.locks.retain(|l| !l.is_expired(now));
            if state
                .locks
                .iter()
                .any(|l| l.job_id == job_id && l.owner != owner_id)
            {
                return Ok(false);
            }
            state.locks.retain(|l| l.job_id != job_id);
            state.locks.push(LockEntry {
                job_id,
                owner: owner_id,
                expires: now + ttl_to_chrono(ttl),
            });
            Ok(true)
        })
        .await
    }

    async fn release_lock(&self, job_id: &str, owner_id: &str) -> Result<()> {
        let job_id = job_id.to_string();
        let owner_id = owner_id.to_string();
        self.mutate(move |state| {
            state
                .locks
                .retain(|l| !(l.job_id == job_id && l.owner == owner_id));
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        // Every mutation is already durable; nothing buffered to flush.
        Ok(())
    }
}

fn load_state(path: &Path, codec: DocumentCodec) -> Result<FileState> {
    let text = std::fs::read_to_string(path)?;
    codec.decode(&text)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Storage(format!("blocking storage task failed: {e}")))?
}
