use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use licita_core::{max_updated, HarvestOutcome, Row, Watermark};
use licita_storage::{HttpFetcher, PageSource, WatermarkStore};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::HarvestConfig;
use crate::dataset::DatasetWriter;
use crate::walker::{StopReason, Walker};

#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pages_fetched: usize,
    pub stop_reason: StopReason,
    pub defaulted_fields: usize,
    pub watermark_before: Watermark,
    pub watermark_after: Watermark,
    pub outcome: HarvestOutcome,
}

/// Append `rows` and only then advance the watermark to their newest `updated`.
///
/// An empty slice touches neither the dataset nor the watermark. If the
/// append fails the watermark is left where it was.
pub async fn commit(
    rows: &[Row],
    writer: &DatasetWriter,
    store: &WatermarkStore,
) -> Result<HarvestOutcome> {
    let Some(watermark) = max_updated(rows) else {
        return Ok(HarvestOutcome::NothingNew);
    };
    let Some(part) = writer.append(rows).context("appending rows to dataset")? else {
        return Ok(HarvestOutcome::NothingNew);
    };
    store
        .advance(watermark)
        .await
        .with_context(|| format!("advancing watermark to {watermark}"))?;
    Ok(HarvestOutcome::Ingested {
        count: part.rows,
        watermark,
        part_path: part.path.display().to_string(),
    })
}

pub struct Harvester {
    config: HarvestConfig,
    source: Arc<dyn PageSource>,
    store: WatermarkStore,
    writer: DatasetWriter,
    run_lock: Mutex<()>,
}

impl Harvester {
    pub fn new(config: HarvestConfig) -> Result<Self> {
        let http = HttpFetcher::new(config.http_client_config())?;
        Ok(Self::with_source(config, Arc::new(http)))
    }

    pub fn with_source(config: HarvestConfig, source: Arc<dyn PageSource>) -> Self {
        let store = WatermarkStore::new(config.state_path.clone());
        let writer = DatasetWriter::new(config.dataset_dir.clone(), config.timezone.as_str());
        Self {
            config,
            source,
            store,
            writer,
            run_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn store(&self) -> &WatermarkStore {
        &self.store
    }

    pub fn writer(&self) -> &DatasetWriter {
        &self.writer
    }

    /// One full harvest. Waits for any in-process run to finish first.
    pub async fn run_once(&self) -> Result<HarvestReport> {
        let _guard = self.run_lock.lock().await;
        self.run_exclusive().await
    }

    /// Like [`Harvester::run_once`] but returns `None` instead of waiting when
    /// another run holds the lock.
    pub async fn try_run_once(&self) -> Result<Option<HarvestReport>> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            warn!("previous harvest still running; skipping this tick");
            return Ok(None);
        };
        self.run_exclusive().await.map(Some)
    }

    async fn run_exclusive(&self) -> Result<HarvestReport> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let watermark_before = self.store.load().await.context("loading watermark")?;
        info!(%run_id, watermark = %watermark_before, feed = %self.config.feed_url, "harvest started");

        let walk = Walker::new(self.source.as_ref(), self.config.max_pages)
            .walk(&self.config.feed_url, watermark_before)
            .await?;

        let outcome = commit(&walk.rows, &self.writer, &self.store).await?;
        let watermark_after = match &outcome {
            HarvestOutcome::Ingested { watermark, .. } => *watermark,
            HarvestOutcome::NothingNew => watermark_before,
        };
        info!(%run_id, %outcome, watermark = %watermark_after, "harvest finished");

        Ok(HarvestReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            pages_fetched: walk.pages_fetched,
            stop_reason: walk.stop_reason,
            defaulted_fields: walk.defaulted_fields,
            watermark_before,
            watermark_after,
            outcome,
        })
    }

    /// Scheduler that runs a harvest on every tick of `cron`, skipping ticks
    /// that fire while a run is still in progress.
    pub async fn build_scheduler(self: Arc<Self>, cron: &str) -> Result<JobScheduler> {
        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let harvester = self;
        let job = Job::new_async(cron, move |_uuid, _l| {
            let harvester = harvester.clone();
            Box::pin(async move {
                match harvester.try_run_once().await {
                    Ok(Some(report)) => info!(outcome = %report.outcome, "scheduled harvest complete"),
                    Ok(None) => {}
                    Err(err) => {
                        let message = format!("{err:#}");
                        error!(error = %message, "scheduled harvest failed");
                    }
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(sched)
    }
}

pub async fn run_once_from_env(config_path: Option<&Path>) -> Result<HarvestReport> {
    let config = HarvestConfig::load(config_path)?;
    Harvester::new(config)?.run_once().await
}
