//! Service configuration
//!
//! Loaded from a TOML file with an `ML_`-prefixed environment overlay, so every
//! setting can be overridden in deployment without editing the file. All fields
//! have defaults; a missing config file yields a fully usable configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub correction_model: GbdtParams,
    /// The classifier trains shallower and faster by default
    #[serde(default = "GbdtParams::classifier_defaults")]
    pub usefulness_model: GbdtParams,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            paths: PathsConfig::default(),
            training: TrainingConfig::default(),
            correction_model: GbdtParams::default(),
            usefulness_model: GbdtParams::classifier_defaults(),
            server: ServerConfig::default(),
        }
    }
}

/// Repository database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_url")]
    pub url: String,
}

fn default_db_url() -> String {
    "sqlite://data/market_ml.db?mode=rwc".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: default_db_url() }
    }
}

/// Filesystem locations for training data, model artifacts, and reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_models_dir")]
    pub models_dir: String,
    #[serde(default = "default_reports_dir")]
    pub reports_dir: String,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_models_dir() -> String {
    "models".to_string()
}

fn default_reports_dir() -> String {
    "reports".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            models_dir: default_models_dir(),
            reports_dir: default_reports_dir(),
        }
    }
}

impl PathsConfig {
    pub fn data_dir(&self) -> PathBuf {
        expand(&self.data_dir)
    }

    pub fn models_dir(&self) -> PathBuf {
        expand(&self.models_dir)
    }

    pub fn reports_dir(&self) -> PathBuf {
        expand(&self.reports_dir)
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Sample-size gates and cross-validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Minimum resolved markets before the correction model trains
    #[serde(default = "default_min_resolved_markets")]
    pub min_resolved_markets: usize,
    /// Minimum labeled posts before the usefulness model trains
    #[serde(default = "default_min_labeled_posts")]
    pub min_labeled_posts: usize,
    /// Cross-validation fold count for both protocols
    #[serde(default = "default_folds")]
    pub folds: usize,
}

fn default_min_resolved_markets() -> usize {
    50
}

fn default_min_labeled_posts() -> usize {
    100
}

fn default_folds() -> usize {
    3
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            min_resolved_markets: default_min_resolved_markets(),
            min_labeled_posts: default_min_labeled_posts(),
            folds: default_folds(),
        }
    }
}

/// Boosted-tree hyperparameters (externally supplied, not auto-tuned)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbdtParams {
    #[serde(default = "default_num_rounds")]
    pub num_rounds: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_min_samples_leaf")]
    pub min_samples_leaf: usize,
    /// L2 regularization on leaf values
    #[serde(default = "default_lambda")]
    pub lambda: f64,
    /// Rounds without validation improvement before training stops
    #[serde(default = "default_early_stopping_rounds")]
    pub early_stopping_rounds: usize,
}

fn default_num_rounds() -> usize {
    3000
}

fn default_learning_rate() -> f64 {
    0.03
}

fn default_max_depth() -> usize {
    8
}

fn default_min_samples_leaf() -> usize {
    2
}

fn default_lambda() -> f64 {
    1.0
}

fn default_early_stopping_rounds() -> usize {
    50
}

impl Default for GbdtParams {
    fn default() -> Self {
        Self {
            num_rounds: default_num_rounds(),
            learning_rate: default_learning_rate(),
            max_depth: default_max_depth(),
            min_samples_leaf: default_min_samples_leaf(),
            lambda: default_lambda(),
            early_stopping_rounds: default_early_stopping_rounds(),
        }
    }
}

impl GbdtParams {
    /// Defaults used for the post usefulness classifier
    pub fn classifier_defaults() -> Self {
        Self {
            num_rounds: 2000,
            learning_rate: 0.05,
            max_depth: 6,
            ..Self::default()
        }
    }
}

/// Prediction API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared secret for the `x-internal-secret` header; empty disables auth
    #[serde(default)]
    pub internal_secret: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            internal_secret: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file plus `ML_*` environment overrides.
    ///
    /// The file is optional; environment variables use `__` as the section
    /// separator (e.g. `ML_SERVER__PORT=9000`).
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("ML").separator("__"))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))
    }
}
