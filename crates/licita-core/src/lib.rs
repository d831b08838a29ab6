//! Core domain model for the procurement feed harvester.

use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "licita-core";

/// Resume point used when no prior state exists.
pub const SENTINEL_WATERMARK: &str = "1970-01-01T00:00:00+00:00";

/// Timestamp of the most recently ingested entry across all prior runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Watermark(pub DateTime<FixedOffset>);

impl Watermark {
    pub fn sentinel() -> Self {
        Self(
            DateTime::parse_from_rfc3339(SENTINEL_WATERMARK)
                .unwrap_or_else(|_| DateTime::UNIX_EPOCH.fixed_offset()),
        )
    }

    pub fn parse(value: &str) -> Result<Self, chrono::ParseError> {
        DateTime::parse_from_rfc3339(value.trim()).map(Self)
    }

    pub fn as_datetime(&self) -> DateTime<FixedOffset> {
        self.0
    }

    /// True when an entry stamped `updated` was already captured by a prior run.
    pub fn covers(&self, updated: DateTime<FixedOffset>) -> bool {
        updated <= self.0
    }

    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::sentinel()
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

/// One persisted feed entry after field extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: String,
    pub updated: DateTime<FixedOffset>,
    pub folder_id: String,
    pub status: String,
    pub cpv: String,
    pub budget_value: f64,
    pub estimated_value: f64,
    pub award_value: f64,
    pub nuts: String,
    pub award_date: String,
    pub raw_xml: String,
}

/// Newest `updated` across `rows`, i.e. the watermark a commit of `rows` advances to.
pub fn max_updated(rows: &[Row]) -> Option<Watermark> {
    rows.iter().map(|r| r.updated).max().map(Watermark)
}

/// Result of one harvest run. Both variants are successful outcomes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HarvestOutcome {
    NothingNew,
    Ingested {
        count: usize,
        watermark: Watermark,
        part_path: String,
    },
}

impl HarvestOutcome {
    pub fn ingested_count(&self) -> usize {
        match self {
            Self::NothingNew => 0,
            Self::Ingested { count, .. } => *count,
        }
    }
}

impl fmt::Display for HarvestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NothingNew => f.write_str("Nothing new"),
            Self::Ingested { count, .. } => write!(f, "Ingested {count} new entries"),
        }
    }
}
