//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every operator at 3am)
//!
//! 🏗️ Powered by Figment: `PMX_`-prefixed environment variables first, then an optional
//! TOML file layered on top. Nested keys use `__` in the environment, so
//! `PMX_TARGET__GATEWAY__API_KEY` lands in `[target.Gateway] api_key`.
//!
//! 📐 Two passes, on purpose:
//!   1. Figment extracts a raw config where nearly everything is optional.
//!   2. `validate` turns it into an [`AppConfig`], collecting EVERY missing required key
//!      into one `ConfigError::MissingKeys`. Finding out about missing keys one run at a
//!      time is a special kind of afternoon.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Deserializer};
use tracing::info;

use crate::backends::{
    FileSourceConfig, FileTargetConfig, FirestoreSourceConfig, GatewayTargetConfig,
};
use crate::error::ConfigError;
use crate::import::{BatchSizing, CalibrationSettings, ImportOptions, calibrator};
use crate::report::DEFAULT_FAILURE_SAMPLE_SIZE;
use crate::retry::RetryPolicy;

pub const ENV_PREFIX: &str = "PMX_";

/// 🚰 Where the records come from. Exactly one table under `[source]`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub enum SourceConfig {
    // -- env keys arrive lowercased, hence the aliases
    #[serde(alias = "firestore")]
    Firestore(FirestoreSourceConfig),
    #[serde(alias = "file")]
    File(FileSourceConfig),
}

impl SourceConfig {
    fn missing_keys(&self) -> Vec<String> {
        match self {
            SourceConfig::Firestore(c) => c.missing_keys("source.Firestore"),
            SourceConfig::File(c) => c.missing_keys("source.File"),
        }
    }
}

/// 🕳️ Where they go. Exactly one table under `[target]`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub enum TargetConfig {
    #[serde(alias = "gateway")]
    Gateway(GatewayTargetConfig),
    #[serde(alias = "file")]
    File(FileTargetConfig),
}

impl TargetConfig {
    fn missing_keys(&self) -> Vec<String> {
        match self {
            TargetConfig::Gateway(c) => c.missing_keys("target.Gateway"),
            TargetConfig::File(c) => c.missing_keys("target.File"),
        }
    }
}

/// 📏 `batch_size = "auto"` calibrates; a number pins it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSizeSetting {
    Auto,
    Fixed(usize),
}

impl<'de> Deserialize<'de> for BatchSizeSetting {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(usize),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(BatchSizeSetting::Fixed(n)),
            Raw::Text(s) if s.trim().eq_ignore_ascii_case("auto") => Ok(BatchSizeSetting::Auto),
            Raw::Text(s) => s
                .trim()
                .parse()
                .map(BatchSizeSetting::Fixed)
                .map_err(|_| serde::de::Error::custom(format!("expected \"auto\" or a number, got '{s}'"))),
        }
    }
}

/// 🧾 `[migration]` as written. Required keys are still Option here so that validation
/// can report all of them at once.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct MigrationSection {
    pub batch_size: Option<BatchSizeSetting>,
    pub retry_attempts: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
    pub retry_backoff_multiplier: Option<f64>,
    pub page_size: Option<usize>,
    pub import_concurrency: Option<usize>,
    pub validate_after_import: Option<bool>,
    pub artifact_dir: Option<PathBuf>,
    pub collections: Option<Vec<String>>,
    pub halt_on_partial_failure: Option<bool>,
    pub failure_sample_size: Option<usize>,
    pub calibration_candidates: Option<Vec<usize>>,
    pub calibration_sample_size: Option<usize>,
    pub fallback_batch_size: Option<usize>,
    pub show_progress: Option<bool>,
}

#[derive(Debug, Deserialize, Clone, Default)]
struct RawAppConfig {
    source: Option<SourceConfig>,
    target: Option<TargetConfig>,
    #[serde(default)]
    migration: MigrationSection,
}

/// ⚙️ The validated `[migration]` knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationConfig {
    pub batch_size: BatchSizeSetting,
    pub retry: RetryPolicy,
    pub page_size: usize,
    pub import_concurrency: usize,
    pub validate_after_import: bool,
    pub artifact_dir: PathBuf,
    /// `None` means every collection in the catalog, in catalog order.
    pub collections: Option<Vec<String>>,
    pub halt_on_partial_failure: bool,
    pub failure_sample_size: usize,
    pub calibration: CalibrationSettings,
    pub show_progress: bool,
}

pub const DEFAULT_PAGE_SIZE: usize = 500;
pub const DEFAULT_IMPORT_CONCURRENCY: usize = 4;
pub const DEFAULT_ARTIFACT_DIR: &str = "migration-artifacts";

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: BatchSizeSetting::Auto,
            retry: RetryPolicy::default(),
            page_size: DEFAULT_PAGE_SIZE,
            import_concurrency: DEFAULT_IMPORT_CONCURRENCY,
            validate_after_import: true,
            artifact_dir: PathBuf::from(DEFAULT_ARTIFACT_DIR),
            collections: None,
            halt_on_partial_failure: false,
            failure_sample_size: DEFAULT_FAILURE_SAMPLE_SIZE,
            calibration: CalibrationSettings::default(),
            show_progress: true,
        }
    }
}

impl MigrationConfig {
    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            sizing: match self.batch_size {
                BatchSizeSetting::Auto => BatchSizing::Auto(self.calibration.clone()),
                BatchSizeSetting::Fixed(n) => BatchSizing::Fixed(n),
            },
            concurrency: self.import_concurrency,
            validate_after_import: self.validate_after_import,
            retry: self.retry.clone(),
        }
    }
}

/// 📦 The AppConfig: one struct to rule them all, and in the Figment bind them.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub target: TargetConfig,
    pub migration: MigrationConfig,
}

fn positive(key: &str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            key: key.to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}

impl RawAppConfig {
    fn validate(self) -> Result<AppConfig, ConfigError> {
        let m = self.migration;
        let mut missing = Vec::new();
        match &self.source {
            Some(source) => missing.extend(source.missing_keys()),
            None => missing.push("source".to_string()),
        }
        match &self.target {
            Some(target) => missing.extend(target.missing_keys()),
            None => missing.push("target".to_string()),
        }
        if m.batch_size.is_none() {
            missing.push("migration.batch_size".to_string());
        }
        if m.retry_attempts.is_none() {
            missing.push("migration.retry_attempts".to_string());
        }
        if m.retry_base_delay_ms.is_none() {
            missing.push("migration.retry_base_delay_ms".to_string());
        }

        let (Some(source), Some(target), Some(batch_size), Some(retry_attempts), Some(base_delay_ms)) = (
            self.source,
            self.target,
            m.batch_size,
            m.retry_attempts,
            m.retry_base_delay_ms,
        ) else {
            return Err(ConfigError::MissingKeys(missing));
        };
        if !missing.is_empty() {
            return Err(ConfigError::MissingKeys(missing));
        }

        if let BatchSizeSetting::Fixed(n) = batch_size {
            positive("migration.batch_size", n)?;
        }
        if retry_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "migration.retry_attempts".to_string(),
                reason: "must be at least 1 (the first attempt counts)".to_string(),
            });
        }

        let defaults = MigrationConfig::default();
        let mut retry = RetryPolicy::new(retry_attempts, Duration::from_millis(base_delay_ms));
        if let Some(max) = m.retry_max_delay_ms {
            retry.max_delay = Duration::from_millis(max);
        }
        if let Some(multiplier) = m.retry_backoff_multiplier {
            if !(multiplier.is_finite() && multiplier >= 1.0) {
                return Err(ConfigError::Invalid {
                    key: "migration.retry_backoff_multiplier".to_string(),
                    reason: format!("{multiplier} is not a finite number >= 1"),
                });
            }
            retry.multiplier = multiplier;
        }

        let calibration = CalibrationSettings {
            candidates: m
                .calibration_candidates
                .unwrap_or_else(|| calibrator::DEFAULT_CANDIDATES.to_vec()),
            sample_size: positive(
                "migration.calibration_sample_size",
                m.calibration_sample_size
                    .unwrap_or(calibrator::DEFAULT_SAMPLE_SIZE),
            )?,
            fallback_batch_size: positive(
                "migration.fallback_batch_size",
                m.fallback_batch_size
                    .unwrap_or(calibrator::SAFE_FALLBACK_BATCH_SIZE),
            )?,
        };
        if calibration.candidates.iter().any(|&c| c == 0) {
            return Err(ConfigError::Invalid {
                key: "migration.calibration_candidates".to_string(),
                reason: "batch sizes must be at least 1".to_string(),
            });
        }

        Ok(AppConfig {
            source,
            target,
            migration: MigrationConfig {
                batch_size,
                retry,
                page_size: positive(
                    "migration.page_size",
                    m.page_size.unwrap_or(defaults.page_size),
                )?,
                import_concurrency: positive(
                    "migration.import_concurrency",
                    m.import_concurrency.unwrap_or(defaults.import_concurrency),
                )?,
                validate_after_import: m
                    .validate_after_import
                    .unwrap_or(defaults.validate_after_import),
                artifact_dir: m.artifact_dir.unwrap_or(defaults.artifact_dir),
                collections: m.collections.filter(|c| !c.is_empty()),
                halt_on_partial_failure: m
                    .halt_on_partial_failure
                    .unwrap_or(defaults.halt_on_partial_failure),
                failure_sample_size: m
                    .failure_sample_size
                    .unwrap_or(defaults.failure_sample_size),
                calibration,
                show_progress: m.show_progress.unwrap_or(defaults.show_progress),
            },
        })
    }
}

/// 🚀 Load the config: environment first, TOML on top when a file is given.
///
/// 💀 Parse errors come back with context naming the file. Missing or invalid values come
/// back as a [`ConfigError`] (downcastable from the `anyhow::Error`), before any store is
/// contacted.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed(ENV_PREFIX).split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables ({ENV_PREFIX}*). \
             The file exists in our hearts, but apparently not in a shape serde recognises.",
            path.display()
        ),
        None => format!(
            "💀 Failed to parse configuration from environment variables ({ENV_PREFIX}*). \
             No file was provided, so this one's all on the environment. Classic."
        ),
    };

    let raw: RawAppConfig = config.extract().context(context_msg)?;
    Ok(raw.validate()?)
}
