use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{info, warn};

use crate::error::{StoreError, StoreResult};
use crate::record::SessionRecord;

/// Where a record ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedRecord {
    pub sink: String,
    pub location: PathBuf,
    pub local: bool,
}

/// Durable storage for session records.
///
/// Every call writes a complete, independent artifact. Concurrent or repeated
/// saves of the same session are allowed; the newest artifact wins.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    fn name(&self) -> &str;

    async fn save(&self, record: &SessionRecord) -> StoreResult<SavedRecord>;
}

/// Writes `<root>/<subject>/<subject>_<type>_<stamp>.json`.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl PersistenceSink for DirectorySink {
    fn name(&self) -> &str {
        "datafiles"
    }

    async fn save(&self, record: &SessionRecord) -> StoreResult<SavedRecord> {
        let dir = self.root.join(record.subject_dir());
        let path = dir.join(record.file_name());
        let contents = serde_json::to_vec_pretty(record)?;
        write_atomic(&dir, &path, &contents).await?;
        info!("Data saved: {}", path.display());
        Ok(SavedRecord {
            sink: self.name().to_string(),
            location: path,
            local: false,
        })
    }
}

/// Last-resort store on the local disk, keyed by subject and timestamp.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    /// Keys of every record kept locally, oldest first.
    pub async fn keys(&self) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(StoreError::io(&self.root, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.root, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(key) = name.strip_suffix(".json") {
                if key.starts_with("experiment_data_") {
                    keys.push(key.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    pub async fn load(&self, key: &str) -> StoreResult<SessionRecord> {
        let path = self.path_for(key);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl PersistenceSink for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn save(&self, record: &SessionRecord) -> StoreResult<SavedRecord> {
        let mut local = record.clone();
        local.saved_locally = true;
        let path = self.path_for(&local.local_key());
        let contents = serde_json::to_vec(&local)?;
        write_atomic(&self.root, &path, &contents).await?;
        info!("Data saved locally: {}", local.local_key());
        Ok(SavedRecord {
            sink: self.name().to_string(),
            location: path,
            local: true,
        })
    }
}

/// Tries `primary`, then `fallback` if the primary fails.
pub struct FallbackSink {
    primary: Box<dyn PersistenceSink>,
    fallback: Box<dyn PersistenceSink>,
}

impl FallbackSink {
    pub fn new(primary: Box<dyn PersistenceSink>, fallback: Box<dyn PersistenceSink>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl PersistenceSink for FallbackSink {
    fn name(&self) -> &str {
        self.primary.name()
    }

    async fn save(&self, record: &SessionRecord) -> StoreResult<SavedRecord> {
        let primary = match self.primary.save(record).await {
            Ok(saved) => return Ok(saved),
            Err(e) => e,
        };
        warn!(
            "Error saving data to {}: {primary}; falling back to {}",
            self.primary.name(),
            self.fallback.name()
        );
        self.fallback
            .save(record)
            .await
            .map_err(|fallback| StoreError::AllSinksFailed {
                primary: Box::new(primary),
                fallback: Box::new(fallback),
            })
    }
}

async fn write_atomic(dir: &Path, path: &Path, contents: &[u8]) -> StoreResult<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| StoreError::io(dir, e))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::io(path, e))
}
