//! Configuration loaded from `dropship.toml`.
//!
//! [`DropshipConfig`] carries every tunable. Values absent from the file use
//! sensible defaults; only `drop_dir` is mandatory. The environment variable
//! `DROPSHIP_ACCESS_TOKEN` takes precedence over the file for the API token.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::pipeline::PipelineSettings;
use crate::remote::NewRecord;

pub const CONFIG_FILE: &str = "dropship.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct DropshipConfig {
    /// API access token obtained through the external auth flow.
    #[serde(default)]
    pub access_token: String,

    /// Directory watched for new files.
    pub drop_dir: PathBuf,

    /// Where finished files are moved. Unset leaves them in place.
    #[serde(default)]
    pub complete_dir: Option<PathBuf>,

    /// Queue snapshot location. Unset disables persistence.
    #[serde(default = "default_queues_file")]
    pub queues_file: Option<PathBuf>,

    /// Maximum concurrently outstanding remote actions.
    #[serde(default = "default_connection_pool")]
    pub connection_pool: usize,

    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Stage failures tolerated before escalating to an earlier stage.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Publish records after upload, or leave them as drafts.
    #[serde(default)]
    pub publish: bool,

    /// Collection to add published records to. Empty or unset skips it.
    #[serde(default)]
    pub collection_id: Option<String>,

    /// Defaults applied to every created record.
    #[serde(default)]
    pub record: RecordDefaults,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordDefaults {
    #[serde(default = "default_license")]
    pub license: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_wip: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Default for RecordDefaults {
    fn default() -> Self {
        Self {
            license: default_license(),
            category: default_category(),
            description: String::new(),
            is_wip: false,
            tags: Vec::new(),
        }
    }
}

fn default_queues_file() -> Option<PathBuf> {
    Some(PathBuf::from("queues.json"))
}

fn default_connection_pool() -> usize {
    3
}

fn default_tick_interval_ms() -> u64 {
    1500
}

fn default_max_failures() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_license() -> String {
    "cc".to_string()
}

fn default_category() -> String {
    "other".to_string()
}

impl DropshipConfig {
    /// Load and validate the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("could not read config file {}", path.display()))?;
        let mut config = Self::parse(&contents)?;

        if let Ok(token) = std::env::var("DROPSHIP_ACCESS_TOKEN") {
            if !token.is_empty() {
                config.access_token = token;
            }
        }

        Ok(config)
    }

    fn parse(contents: &str) -> Result<Self> {
        let config: DropshipConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.publish && self.record.description.is_empty() {
            bail!("a record description must be provided when publish is enabled");
        }
        if self.connection_pool == 0 {
            bail!("connection_pool must be at least 1");
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The pipeline knobs, in the shape the scheduler wants.
    pub fn settings(&self) -> PipelineSettings {
        let collection_id = self
            .collection_id
            .clone()
            .filter(|id| !id.trim().is_empty());
        PipelineSettings {
            connection_pool: self.connection_pool,
            max_failures: self.max_failures,
            record_defaults: NewRecord {
                name: String::new(),
                license: self.record.license.clone(),
                category: self.record.category.clone(),
                description: self.record.description.clone(),
                is_wip: self.record.is_wip,
                tags: self.record.tags.clone(),
            },
            publish_enabled: self.publish,
            collection_id,
            complete_dir: self.complete_dir.clone(),
        }
    }
}

/// Persist a freshly obtained token back into the config file, keeping every
/// other key intact.
pub fn save_token(path: &Path, token: &str) -> Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("could not read config file {}", path.display()))?;
    let mut table: toml::Table = contents.parse().context("could not parse config file")?;
    table.insert(
        "access_token".to_string(),
        toml::Value::String(token.to_string()),
    );
    std::fs::write(path, toml::to_string_pretty(&table)?)
        .with_context(|| format!("could not write config file {}", path.display()))?;
    Ok(())
}
