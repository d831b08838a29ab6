use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{Float64Array, RecordBatch, StringArray, TimestampMillisecondArray};
use arrow_schema::{DataType, Field as ArrowField, Schema, SchemaRef, TimeUnit};
use licita_core::Row;
use parquet::arrow::ArrowWriter;
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

/// One Parquet file added to the dataset by a single commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendedPart {
    pub path: PathBuf,
    pub rows: usize,
    pub bytes: u64,
    pub sha256: String,
}

/// Append-only directory of Parquet part files sharing the row schema.
#[derive(Debug, Clone)]
pub struct DatasetWriter {
    root: PathBuf,
    timezone: Arc<str>,
}

impl DatasetWriter {
    pub fn new(root: impl Into<PathBuf>, timezone: impl Into<Arc<str>>) -> Self {
        Self {
            root: root.into(),
            timezone: timezone.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn schema(&self) -> SchemaRef {
        Arc::new(Schema::new(vec![
            ArrowField::new("id", DataType::Utf8, false),
            ArrowField::new(
                "updated",
                DataType::Timestamp(TimeUnit::Millisecond, Some(self.timezone.clone())),
                false,
            ),
            ArrowField::new("folder_id", DataType::Utf8, false),
            ArrowField::new("status", DataType::Utf8, false),
            ArrowField::new("cpv", DataType::Utf8, false),
            ArrowField::new("budget_value", DataType::Float64, false),
            ArrowField::new("estimated_value", DataType::Float64, false),
            ArrowField::new("award_value", DataType::Float64, false),
            ArrowField::new("nuts", DataType::Utf8, false),
            ArrowField::new("award_date", DataType::Utf8, false),
            ArrowField::new("raw_xml", DataType::Utf8, false),
        ]))
    }

    pub fn rows_to_batch(&self, rows: &[Row]) -> Result<RecordBatch> {
        let updated = TimestampMillisecondArray::from(
            rows.iter()
                .map(|r| r.updated.timestamp_millis())
                .collect::<Vec<_>>(),
        )
        .with_timezone(self.timezone.clone());

        RecordBatch::try_new(
            self.schema(),
            vec![
                Arc::new(string_column(rows, |r| r.id.as_str())),
                Arc::new(updated),
                Arc::new(string_column(rows, |r| r.folder_id.as_str())),
                Arc::new(string_column(rows, |r| r.status.as_str())),
                Arc::new(string_column(rows, |r| r.cpv.as_str())),
                Arc::new(float_column(rows, |r| r.budget_value)),
                Arc::new(float_column(rows, |r| r.estimated_value)),
                Arc::new(float_column(rows, |r| r.award_value)),
                Arc::new(string_column(rows, |r| r.nuts.as_str())),
                Arc::new(string_column(rows, |r| r.award_date.as_str())),
                Arc::new(string_column(rows, |r| r.raw_xml.as_str())),
            ],
        )
        .context("building feed rows record batch")
    }

    /// Write `rows` as a new part file. Nothing is written for an empty slice.
    ///
    /// The batch is built before any file is touched, and the part only
    /// becomes visible under its final name once fully written.
    pub fn append(&self, rows: &[Row]) -> Result<Option<AppendedPart>> {
        if rows.is_empty() {
            return Ok(None);
        }
        let batch = self.rows_to_batch(rows)?;

        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("creating {}", self.root.display()))?;
        let part_id = Uuid::new_v4();
        let final_path = self.root.join(format!("part-{part_id}.parquet"));
        let temp_path = self.root.join(format!(".part-{part_id}.parquet.tmp"));

        if let Err(err) = write_parquet(&temp_path, &batch) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(err);
        }
        if let Err(err) = std::fs::rename(&temp_path, &final_path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(err).with_context(|| {
                format!(
                    "renaming part {} -> {}",
                    temp_path.display(),
                    final_path.display()
                )
            });
        }

        let bytes = std::fs::read(&final_path)
            .with_context(|| format!("reading {}", final_path.display()))?;
        let part = AppendedPart {
            path: final_path,
            rows: rows.len(),
            bytes: bytes.len() as u64,
            sha256: sha256_hex(&bytes),
        };
        info!(path = %part.path.display(), rows = part.rows, bytes = part.bytes, sha256 = %part.sha256, "appended dataset part");
        Ok(Some(part))
    }

    /// Part files currently in the dataset, sorted by name.
    pub fn part_files(&self) -> Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", self.root.display()))
            }
        };
        let mut parts = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("part-") && n.ends_with(".parquet"))
            })
            .collect::<Vec<_>>();
        parts.sort();
        Ok(parts)
    }
}

fn string_column(rows: &[Row], value: impl Fn(&Row) -> &str) -> StringArray {
    StringArray::from(rows.iter().map(value).collect::<Vec<_>>())
}

fn float_column(rows: &[Row], value: impl Fn(&Row) -> f64) -> Float64Array {
    Float64Array::from(rows.iter().map(value).collect::<Vec<_>>())
}

fn write_parquet(path: &Path, batch: &RecordBatch) -> Result<()> {
    let file = File::create_new(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
