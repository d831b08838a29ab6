use std::path::{Path, PathBuf};

use licita_core::Watermark;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

/// Key under which the last ingested `updated` timestamp is persisted.
pub const WATERMARK_KEY: &str = "last_updated_ingested";

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("watermark state io on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("watermark state {} is not valid json: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("watermark state {} must hold a json object", path.display())]
    NotAnObject { path: PathBuf },
    #[error("watermark value {value} in {} is not a string", path.display())]
    NotAString { path: PathBuf, value: String },
    #[error("watermark value {value:?} in {} is not an rfc3339 timestamp", path.display())]
    Timestamp {
        path: PathBuf,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Keyed JSON record holding the resume point between runs.
///
/// The store is read once when a run starts and written once when a run
/// commits new rows. Concurrent writers are not coordinated.
#[derive(Debug, Clone)]
pub struct WatermarkStore {
    path: PathBuf,
}

impl WatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persisted watermark, or the epoch sentinel when no state exists yet.
    pub async fn load(&self) -> Result<Watermark, WatermarkError> {
        let Some(record) = self.read_record().await? else {
            return Ok(Watermark::sentinel());
        };
        match record.get(WATERMARK_KEY) {
            Some(Value::String(value)) => {
                Watermark::parse(value).map_err(|source| WatermarkError::Timestamp {
                    path: self.path.clone(),
                    value: value.clone(),
                    source,
                })
            }
            Some(Value::Null) | None => Ok(Watermark::sentinel()),
            Some(other) => Err(WatermarkError::NotAString {
                path: self.path.clone(),
                value: other.to_string(),
            }),
        }
    }

    /// Replace the persisted watermark, keeping any other keys in the record.
    pub async fn advance(&self, watermark: Watermark) -> Result<(), WatermarkError> {
        let mut record = self.read_record().await?.unwrap_or_default();
        record.insert(
            WATERMARK_KEY.to_string(),
            Value::String(watermark.to_rfc3339()),
        );
        let bytes = serde_json::to_vec_pretty(&Value::Object(record)).map_err(|source| {
            WatermarkError::Json {
                path: self.path.clone(),
                source,
            }
        })?;
        self.write_atomically(&bytes).await?;
        info!(path = %self.path.display(), %watermark, "watermark advanced");
        Ok(())
    }

    async fn read_record(&self) -> Result<Option<Map<String, Value>>, WatermarkError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(WatermarkError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let value: Value = serde_json::from_slice(&bytes).map_err(|source| WatermarkError::Json {
            path: self.path.clone(),
            source,
        })?;
        match value {
            Value::Object(map) => Ok(Some(map)),
            _ => Err(WatermarkError::NotAnObject {
                path: self.path.clone(),
            }),
        }
    }

    async fn write_atomically(&self, bytes: &[u8]) -> Result<(), WatermarkError> {
        let io_err = |source| WatermarkError::Io {
            path: self.path.clone(),
            source,
        };
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).await.map_err(io_err)?;

        let temp_path = parent.join(format!(".{}.state.tmp", Uuid::new_v4()));
        let result = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &self.path).await
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(io_err(err));
        }
        Ok(())
    }
}
