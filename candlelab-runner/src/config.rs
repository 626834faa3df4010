//! Serializable run configuration, loaded from TOML.
//!
//! Every section has defaults so a minimal config only needs
//! `[experiment] name = "..."`. The fully-resolved config is echoed into the
//! run directory, and its content hash gives a reproducibility fingerprint.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub experiment: ExperimentConfig,
    pub data: DataConfig,
    pub artifacts: ArtifactsConfig,
    pub data_source: DataSourceConfig,
    pub storage: StorageConfig,
    pub fetch: FetchSettings,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            experiment: ExperimentConfig::default(),
            data: DataConfig::default(),
            artifacts: ArtifactsConfig::default(),
            data_source: DataSourceConfig::default(),
            storage: StorageConfig::default(),
            fetch: FetchSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExperimentConfig {
    pub name: String,
    /// Free-form parameter table handed to the experiment untouched.
    pub params: toml::value::Table,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            name: "smoke".to_string(),
            params: toml::value::Table::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataConfig {
    /// Parquet file the experiment runs on.
    pub input_path: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("data/sample/sample_1h.parquet"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub root: PathBuf,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("artifacts"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataSourceConfig {
    pub venue: String,
    pub market: String,
    pub symbols: Vec<String>,
    pub timeframes: Vec<String>,
    /// Fetch start when the store is empty, epoch ms UTC.
    pub start_ms: i64,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            venue: "binance".to_string(),
            market: "spot".to_string(),
            symbols: vec!["BTCUSDT".to_string()],
            timeframes: vec!["1h".to_string()],
            start_ms: 1_577_836_800_000, // 2020-01-01T00:00:00Z
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/raw"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetchSettings {
    pub limit: usize,
    pub rate_limit_ms: u64,
    pub retries: u32,
    pub retry_backoff_ms: u64,
    pub overlap_bars: i64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            limit: 1000,
            rate_limit_ms: 200,
            retries: 5,
            retry_backoff_ms: 500,
            overlap_bars: 200,
        }
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Content hash of the resolved config. Identical configs produce
    /// identical fingerprints regardless of key order in the source file
    /// (toml's map type keeps keys sorted).
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).expect("RunConfig serialization failed");
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }

    /// The resolved config as a TOML value, for echoing into the run dir.
    pub fn as_toml(&self) -> Result<toml::Value> {
        toml::Value::try_from(self).context("failed to re-serialize resolved config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg: RunConfig = toml::from_str("[experiment]\nname = \"adx_bins\"\n").unwrap();
        assert_eq!(cfg.experiment.name, "adx_bins");
        assert_eq!(cfg.fetch.limit, 1000);
        assert_eq!(cfg.data_source.venue, "binance");
        assert_eq!(cfg.artifacts.root, PathBuf::from("artifacts"));
    }

    #[test]
    fn params_pass_through_untouched() {
        let cfg: RunConfig = toml::from_str(
            "[experiment]\nname = \"adx_bins\"\n[experiment.params]\ndmi_length = 21\n",
        )
        .unwrap();
        assert_eq!(
            cfg.experiment.params.get("dmi_length"),
            Some(&toml::Value::Integer(21))
        );
    }

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        let a: RunConfig = toml::from_str("[experiment]\nname = \"smoke\"\n").unwrap();
        let b: RunConfig = toml::from_str("[experiment]\nname = \"smoke\"\n").unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c: RunConfig = toml::from_str("[experiment]\nname = \"adx_bins\"\n").unwrap();
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn resolved_config_round_trips_via_toml() {
        let cfg = RunConfig::default();
        let value = cfg.as_toml().unwrap();
        let text = toml::to_string_pretty(&value).unwrap();
        let back: RunConfig = toml::from_str(&text).unwrap();
        assert_eq!(cfg, back);
    }
}
