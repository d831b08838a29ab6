use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use arrow_array::timezone::Tz;
use licita_storage::{BackoffPolicy, HttpClientConfig};
use serde::Deserialize;

pub const DEFAULT_FEED_URL: &str = "https://contrataciondelestado.es/sindicacion/sindicacion_643/licitacionesPerfilesContratanteCompleto3.atom";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarvestConfig {
    pub feed_url: String,
    pub max_pages: usize,
    pub state_path: PathBuf,
    pub dataset_dir: PathBuf,
    /// Zone recorded on the `updated` column of the output schema.
    pub timezone: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub http_max_retries: usize,
    pub schedule_cron: String,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            feed_url: DEFAULT_FEED_URL.to_string(),
            max_pages: 5,
            state_path: PathBuf::from("state.json"),
            dataset_dir: PathBuf::from("data/parquet"),
            timezone: "Europe/Madrid".to_string(),
            user_agent: "licita-harvester/0.1".to_string(),
            http_timeout_secs: 30,
            http_max_retries: 3,
            schedule_cron: "0 0 * * * *".to_string(),
        }
    }
}

impl HarvestConfig {
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Defaults, then the YAML file (if any), then `LICITA_*` environment variables.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let base = match config_path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        let config = base.with_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("LICITA_FEED_URL") {
            self.feed_url = v;
        }
        if let Some(v) = lookup("LICITA_MAX_PAGES").and_then(|v| v.parse().ok()) {
            self.max_pages = v;
        }
        if let Some(v) = lookup("LICITA_STATE_PATH") {
            self.state_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("LICITA_DATASET_DIR") {
            self.dataset_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LICITA_TIMEZONE") {
            self.timezone = v;
        }
        if let Some(v) = lookup("LICITA_USER_AGENT") {
            self.user_agent = v;
        }
        if let Some(v) = lookup("LICITA_HTTP_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.http_timeout_secs = v;
        }
        if let Some(v) = lookup("LICITA_HTTP_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.http_max_retries = v;
        }
        if let Some(v) = lookup("LICITA_SCHEDULE_CRON") {
            self.schedule_cron = v;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.feed_url)
            .with_context(|| format!("feed_url {:?} is not a valid url", self.feed_url))?;
        self.timezone
            .parse::<Tz>()
            .with_context(|| format!("timezone {:?} is not a known zone", self.timezone))?;
        if self.http_timeout_secs == 0 {
            bail!("http_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            backoff: BackoffPolicy {
                max_retries: self.http_max_retries,
                ..BackoffPolicy::default()
            },
        }
    }
}
