use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use vibe_types::models::{Channel, Message, ReadStatusRecord, User};

use crate::error::StoreError;

/// A record kind that lives in its own JSON array file.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Contents of a freshly initialized or recovered collection.
    fn defaults() -> Vec<Self> {
        Vec::new()
    }
}

impl Record for User {}
impl Record for Message {}
impl Record for ReadStatusRecord {}

impl Record for Channel {
    fn defaults() -> Vec<Self> {
        vec![Channel::general()]
    }
}

/// One collection's backing file.
///
/// `save` never exposes a half-written file: records go to `<file>.tmp`,
/// are fsynced and parsed back, and only then renamed over the target.
/// Unparseable content is backed up to `<file>.backup.<millis>` and replaced
/// with [`Record::defaults`]; if the backup cannot be written the file is left
/// alone and the load fails.
///
/// There is no locking here; see [`crate::Collection`] for serialization.
pub struct JsonFile<T> {
    path: PathBuf,
    _records: PhantomData<fn() -> T>,
}

impl<T: Record> JsonFile<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _records: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    pub fn temp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    fn backup_path(&self) -> PathBuf {
        self.sibling(&format!(".backup.{}", chrono::Utc::now().timestamp_millis()))
    }

    /// Write the defaults if the file does not exist yet. Returns true if it did.
    pub async fn initialize(&self) -> Result<bool, StoreError> {
        match fs::try_exists(&self.path).await {
            Ok(true) => Ok(false),
            Ok(false) => {
                self.save(&T::defaults()).await?;
                info!("Initialized {}", self.path.display());
                Ok(true)
            }
            Err(e) => Err(StoreError::io(&self.path)(e)),
        }
    }

    /// Lenient read for read-only callers: any failure degrades to a default.
    pub async fn load(&self) -> Vec<T> {
        match self.load_for_update().await {
            Ok(records) => records,
            Err(e) => {
                error!("Could not load {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    /// Read for a read-modify-write. Unlike [`JsonFile::load`], a file that
    /// cannot be read is an error, so the caller never rewrites the whole
    /// collection from an empty stand-in.
    pub async fn load_for_update(&self) -> Result<Vec<T>, StoreError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("{} missing, using defaults", self.path.display());
                return Ok(T::defaults());
            }
            Err(e) => {
                warn!("Error reading {}: {}, retrying once", self.path.display(), e);
                fs::read(&self.path).await.map_err(StoreError::io(&self.path))?
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            debug!("{} is empty", self.path.display());
            return Ok(Vec::new());
        }

        match serde_json::from_slice(&bytes) {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!("{} is corrupt ({}), recovering", self.path.display(), e);
                self.recover(&bytes).await
            }
        }
    }

    /// Back up the corrupt bytes, then reseed. Without a backup the corrupt
    /// file is left in place and nothing is rewritten.
    async fn recover(&self, corrupt: &[u8]) -> Result<Vec<T>, StoreError> {
        let backup = self.backup_path();
        fs::write(&backup, corrupt)
            .await
            .map_err(StoreError::io(&backup))?;
        info!("Backed up corrupt {} to {}", self.path.display(), backup.display());

        let defaults = T::defaults();
        if let Err(e) = self.save(&defaults).await {
            error!("Could not rewrite {} with defaults: {}", self.path.display(), e);
        }
        Ok(defaults)
    }

    pub async fn save(&self, records: &[T]) -> Result<(), StoreError> {
        let tmp = self.temp_path();
        let result = self.write_verified(records, &tmp).await;
        if result.is_err() {
            let _ = fs::remove_file(&tmp).await;
        }
        result
    }

    async fn write_verified(&self, records: &[T], tmp: &Path) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(records).map_err(|source| StoreError::Encode {
            path: self.path.clone(),
            source,
        })?;

        let mut file = fs::File::create(tmp).await.map_err(StoreError::io(tmp))?;
        file.write_all(&json).await.map_err(StoreError::io(tmp))?;
        file.sync_all().await.map_err(StoreError::io(tmp))?;
        drop(file);

        let written = fs::read(tmp).await.map_err(StoreError::io(tmp))?;
        serde_json::from_slice::<Vec<T>>(&written).map_err(|source| StoreError::Verify {
            path: tmp.to_path_buf(),
            source,
        })?;

        fs::rename(tmp, &self.path)
            .await
            .map_err(StoreError::io(&self.path))?;

        debug!("Wrote {} ({} records)", self.path.display(), records.len());
        Ok(())
    }
}
