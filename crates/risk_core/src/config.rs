//! Pipeline configuration
//!
//! Values come from an optional TOML file, then `ROADRISK__<SECTION>__<KEY>`
//! environment variables on top. Every section falls back to defaults, so an
//! empty file is a valid configuration.

use config::{Config, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::balancer::BalanceConfig;
use crate::errors::{Result, RiskError};
use crate::gbdt::GbdtParams;

/// Environment prefix for configuration overrides
pub const ENV_PREFIX: &str = "ROADRISK";

/// Holdout split settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub holdout_fraction: f64,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            holdout_fraction: 0.15,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Feature importances listed in the report
    pub top_n_features: usize,
    /// Strongest label correlations reported after balancing
    pub top_n_correlations: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            top_n_features: 10,
            top_n_correlations: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    /// `risk_level` value treated as high risk; smallest label when unset
    pub positive_label: Option<String>,
}

/// Complete training configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub split: SplitConfig,
    pub balance: BalanceConfig,
    pub classifier: GbdtParams,
    pub evaluation: EvaluationConfig,
    pub labels: LabelConfig,
}

impl PipelineConfig {
    /// Load from an optional TOML file plus `ROADRISK__*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    pub fn load_with_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading configuration from: {}", path.display());
            builder = builder.add_source(ConfigFile::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .separator("__")
                .try_parsing(true),
        );

        let config: PipelineConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RiskError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write as pretty TOML
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| RiskError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Reject out-of-range values before any work starts
    pub fn validate(&self) -> Result<()> {
        let fraction = self.split.holdout_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(RiskError::InvalidParameters(format!(
                "split.holdout_fraction must be in (0, 1), got {fraction}"
            )));
        }
        if !(self.balance.target_ratio > 0.0 && self.balance.target_ratio.is_finite()) {
            return Err(RiskError::InvalidParameters(format!(
                "balance.target_ratio must be positive, got {}",
                self.balance.target_ratio
            )));
        }
        if self.balance.k_neighbors == 0 {
            return Err(RiskError::InvalidParameters(
                "balance.k_neighbors must be at least 1".to_string(),
            ));
        }
        if matches!(self.labels.positive_label.as_deref(), Some(l) if l.trim().is_empty()) {
            return Err(RiskError::InvalidParameters(
                "labels.positive_label must not be blank".to_string(),
            ));
        }
        self.classifier.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn toml_file(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_match_training_profile() {
        let config = PipelineConfig::default();
        assert_eq!(config.split.holdout_fraction, 0.15);
        assert_eq!(config.balance.target_ratio, 0.5);
        assert_eq!(config.balance.k_neighbors, 5);
        assert_eq!(config.classifier.n_estimators, 100);
        assert_eq!(config.classifier.max_depth, 6);
        assert_eq!(config.classifier.scale_pos_weight, 2.0);
        assert_eq!(config.evaluation.top_n_features, 10);
        assert_eq!(config.evaluation.top_n_correlations, 5);
        assert!(config.labels.positive_label.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let file = toml_file(
            "[classifier]\nmax_depth = 4\n\n[labels]\npositive_label = \"Fatal\"\n",
        );
        let config =
            PipelineConfig::load_with_prefix(Some(file.path()), "ROADRISK_TEST_PARTIAL").unwrap();
        assert_eq!(config.classifier.max_depth, 4);
        assert_eq!(config.classifier.learning_rate, 0.1);
        assert_eq!(config.labels.positive_label.as_deref(), Some("Fatal"));
        assert_eq!(config.split, SplitConfig::default());
    }

    #[test]
    fn environment_overrides_file() {
        let file = toml_file("[evaluation]\ntop_n_features = 3\n");
        std::env::set_var("ROADRISK_TEST_ENV__EVALUATION__TOP_N_FEATURES", "7");
        let config =
            PipelineConfig::load_with_prefix(Some(file.path()), "ROADRISK_TEST_ENV").unwrap();
        std::env::remove_var("ROADRISK_TEST_ENV__EVALUATION__TOP_N_FEATURES");
        assert_eq!(config.evaluation.top_n_features, 7);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let file = toml_file("[split]\nholdout_fraction = 1.5\n");
        let err = PipelineConfig::load_with_prefix(Some(file.path()), "ROADRISK_TEST_RANGE")
            .unwrap_err();
        assert!(matches!(err, RiskError::InvalidParameters(_)));

        let mut config = PipelineConfig::default();
        config.balance.k_neighbors = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roadrisk.toml");
        let mut config = PipelineConfig::default();
        config.classifier.n_estimators = 25;
        config.labels.positive_label = Some("1".to_string());
        config.save_to_file(&path).unwrap();

        let loaded = PipelineConfig::load_with_prefix(Some(&path), "ROADRISK_TEST_SAVE").unwrap();
        assert_eq!(loaded, config);
    }
}
