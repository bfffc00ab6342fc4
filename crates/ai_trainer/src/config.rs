//! Training configuration
//!
//! Every field has a default, so an empty TOML file is a valid configuration.
//! `EXO_SEED`, `EXO_IMPUTATION` and `EXO_OUTPUT_DIR` override the file.

use crate::errors::{Result, TrainerError};
use exo_ai_core::{CleaningConfig, ImputationStrategy, SplitRatios};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Shared parameters of the two boosted learners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbdtParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    /// Row fraction drawn for each boosting round
    pub subsample: f64,
    /// Feature fraction drawn for each tree
    pub colsample_bytree: f64,
    /// Minimum hessian sum on each side of a split
    pub min_child_weight: f64,
    /// L2 penalty on leaf values
    pub reg_lambda: f64,
    /// Stop after this many rounds without a lower validation loss
    pub early_stopping_rounds: usize,
}

impl Default for GbdtParams {
    fn default() -> Self {
        Self {
            n_estimators: 1024,
            max_depth: 8,
            learning_rate: 0.01,
            subsample: 0.8,
            colsample_bytree: 0.8,
            min_child_weight: 1.0,
            reg_lambda: 1.0,
            early_stopping_rounds: 50,
        }
    }
}

impl GbdtParams {
    pub fn validate(&self, section: &str) -> Result<()> {
        let bad = |msg: String| -> Result<()> {
            Err(TrainerError::Config(format!("[{section}] {msg}")))
        };
        if self.n_estimators == 0 {
            return bad("n_estimators must be at least 1".to_string());
        }
        if self.max_depth == 0 {
            return bad("max_depth must be at least 1".to_string());
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return bad(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        for (name, value) in [
            ("subsample", self.subsample),
            ("colsample_bytree", self.colsample_bytree),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return bad(format!("{name} must be within (0, 1], got {value}"));
            }
        }
        if self.min_child_weight < 0.0 || self.reg_lambda < 0.0 {
            return bad("min_child_weight and reg_lambda must not be negative".to_string());
        }
        Ok(())
    }
}

/// Histogram learner: the shared boosting parameters plus binning and leaf-wise growth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistGbdtParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub min_child_weight: f64,
    pub reg_lambda: f64,
    pub early_stopping_rounds: usize,
    /// Maximum leaves per tree
    pub num_leaves: usize,
    /// Maximum bins per feature
    pub max_bin: usize,
    /// Minimum rows in a leaf
    pub min_child_samples: usize,
}

impl Default for HistGbdtParams {
    fn default() -> Self {
        Self {
            n_estimators: 1024,
            max_depth: 8,
            learning_rate: 0.01,
            subsample: 0.8,
            colsample_bytree: 0.8,
            min_child_weight: 1e-3,
            reg_lambda: 0.0,
            early_stopping_rounds: 50,
            num_leaves: 31,
            max_bin: 255,
            min_child_samples: 20,
        }
    }
}

impl HistGbdtParams {
    pub fn boosting(&self) -> GbdtParams {
        GbdtParams {
            n_estimators: self.n_estimators,
            max_depth: self.max_depth,
            learning_rate: self.learning_rate,
            subsample: self.subsample,
            colsample_bytree: self.colsample_bytree,
            min_child_weight: self.min_child_weight,
            reg_lambda: self.reg_lambda,
            early_stopping_rounds: self.early_stopping_rounds,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.boosting().validate("hist_gbdt")?;
        if self.num_leaves < 2 {
            return Err(TrainerError::Config(
                "[hist_gbdt] num_leaves must be at least 2".to_string(),
            ));
        }
        if !(2..=u16::MAX as usize).contains(&self.max_bin) {
            return Err(TrainerError::Config(format!(
                "[hist_gbdt] max_bin must be within [2, {}], got {}",
                u16::MAX,
                self.max_bin
            )));
        }
        if self.min_child_samples == 0 {
            return Err(TrainerError::Config(
                "[hist_gbdt] min_child_samples must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HiddenLayer {
    pub units: usize,
    #[serde(default)]
    pub batch_norm: bool,
    #[serde(default)]
    pub dropout: f64,
}

impl HiddenLayer {
    pub fn new(units: usize, batch_norm: bool, dropout: f64) -> Self {
        Self {
            units,
            batch_norm,
            dropout,
        }
    }
}

/// Halve-on-plateau learning-rate schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LrSchedule {
    pub factor: f64,
    /// Epochs without validation improvement before the rate drops
    pub patience: usize,
    pub min_lr: f64,
}

impl Default for LrSchedule {
    fn default() -> Self {
        Self {
            factor: 0.5,
            patience: 10,
            min_lr: 1e-7,
        }
    }
}

/// Feed-forward network and its optimizer.
///
/// A partially specified table takes its remaining fields from the base
/// network defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlpParams {
    pub hidden: Vec<HiddenLayer>,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs: usize,
    /// Early-stopping patience in epochs; the best weights are restored
    pub patience: usize,
    pub reduce_lr: Option<LrSchedule>,
    pub bn_momentum: f64,
    pub bn_epsilon: f64,
}

impl Default for MlpParams {
    fn default() -> Self {
        Self::base()
    }
}

impl MlpParams {
    /// 256-128-64-32 base learner network
    pub fn base() -> Self {
        Self {
            hidden: vec![
                HiddenLayer::new(256, true, 0.3),
                HiddenLayer::new(128, true, 0.3),
                HiddenLayer::new(64, true, 0.2),
                HiddenLayer::new(32, false, 0.2),
            ],
            learning_rate: 1e-3,
            batch_size: 64,
            epochs: 200,
            patience: 20,
            reduce_lr: Some(LrSchedule::default()),
            bn_momentum: 0.99,
            bn_epsilon: 1e-3,
        }
    }

    /// 64-32 stacking head
    pub fn meta() -> Self {
        Self {
            hidden: vec![HiddenLayer::new(64, true, 0.3), HiddenLayer::new(32, false, 0.2)],
            batch_size: 32,
            patience: 30,
            reduce_lr: None,
            ..Self::base()
        }
    }

    pub fn validate(&self, section: &str) -> Result<()> {
        let bad = |msg: String| -> Result<()> {
            Err(TrainerError::Config(format!("[{section}] {msg}")))
        };
        if self.hidden.iter().any(|l| l.units == 0) {
            return bad("hidden layers need at least one unit".to_string());
        }
        if self.hidden.iter().any(|l| !(0.0..1.0).contains(&l.dropout)) {
            return bad("dropout must be within [0, 1)".to_string());
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return bad(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        if self.batch_size == 0 || self.epochs == 0 {
            return bad("batch_size and epochs must be at least 1".to_string());
        }
        if !(0.0..1.0).contains(&self.bn_momentum) || self.bn_epsilon <= 0.0 {
            return bad("bn_momentum must be within [0, 1) and bn_epsilon positive".to_string());
        }
        if let Some(schedule) = &self.reduce_lr {
            if !(schedule.factor > 0.0 && schedule.factor < 1.0) || schedule.min_lr < 0.0 {
                return bad("reduce_lr factor must be within (0, 1)".to_string());
            }
        }
        Ok(())
    }
}

/// Full configuration of one training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub seed: u64,
    pub cleaning: CleaningConfig,
    pub split: SplitRatios,
    pub gbdt: GbdtParams,
    pub hist_gbdt: HistGbdtParams,
    pub mlp: MlpParams,
    pub meta: MlpParams,
    /// Where the artifact bundle is written
    pub output_dir: PathBuf,
    /// Where the split partitions are exported as CSV, if anywhere
    pub processed_dir: Option<PathBuf>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            cleaning: CleaningConfig::default(),
            split: SplitRatios::default(),
            gbdt: GbdtParams::default(),
            hist_gbdt: HistGbdtParams::default(),
            mlp: MlpParams::base(),
            meta: MlpParams::meta(),
            output_dir: PathBuf::from("models/ensemble"),
            processed_dir: None,
        }
    }
}

impl TrainingConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            TrainerError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| TrainerError::Config(format!("Failed to parse config file: {e}")))
    }

    /// Apply `EXO_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(seed) = lookup("EXO_SEED") {
            self.seed = seed
                .trim()
                .parse()
                .map_err(|e| TrainerError::Config(format!("EXO_SEED={seed}: {e}")))?;
        }
        if let Some(strategy) = lookup("EXO_IMPUTATION") {
            self.cleaning.imputation = match strategy.trim().to_lowercase().as_str() {
                "median" => ImputationStrategy::Median,
                "knn" => match self.cleaning.imputation {
                    knn @ ImputationStrategy::Knn { .. } => knn,
                    ImputationStrategy::Median => ImputationStrategy::default(),
                },
                other => {
                    return Err(TrainerError::Config(format!(
                        "EXO_IMPUTATION must be knn or median, got {other}"
                    )))
                }
            };
        }
        if let Some(dir) = lookup("EXO_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Reject unusable configuration before any data is read
    pub fn validate(&self) -> Result<()> {
        self.cleaning.validate()?;
        self.split.validate()?;
        self.gbdt.validate("gbdt")?;
        self.hist_gbdt.validate()?;
        self.mlp.validate("mlp")?;
        self.meta.validate("meta")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_gives_defaults() {
        let config = TrainingConfig::from_toml("").unwrap();
        assert_eq!(config, TrainingConfig::default());
        assert_eq!(config.meta.hidden.len(), 2);
        assert!(config.meta.reduce_lr.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = TrainingConfig::from_toml(
            r#"
            seed = 7

            [split]
            train = 0.6
            test = 0.2
            cv = 0.2

            [gbdt]
            n_estimators = 10

            [cleaning]
            max_missing_ratio = 0.5
            [cleaning.imputation]
            strategy = "median"
            "#,
        )
        .unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.gbdt.n_estimators, 10);
        assert_eq!(config.gbdt.max_depth, 8);
        assert_eq!(config.cleaning.imputation, ImputationStrategy::Median);
        config.validate().unwrap();
    }

    #[test]
    fn bad_split_is_rejected() {
        let mut config = TrainingConfig::default();
        config.split.cv = 0.3;
        assert!(matches!(config.validate(), Err(TrainerError::Core(_))));
    }

    #[test]
    fn overrides_replace_file_values() {
        let vars: HashMap<&str, &str> = [
            ("EXO_SEED", "99"),
            ("EXO_IMPUTATION", "median"),
            ("EXO_OUTPUT_DIR", "/tmp/bundle"),
        ]
        .into_iter()
        .collect();
        let mut config = TrainingConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.seed, 99);
        assert_eq!(config.cleaning.imputation, ImputationStrategy::Median);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/bundle"));

        let err = config
            .apply_overrides(|k| (k == "EXO_IMPUTATION").then(|| "mean".to_string()))
            .unwrap_err();
        assert!(matches!(err, TrainerError::Config(_)));
    }

    #[test]
    fn dropout_of_one_is_rejected() {
        let mut params = MlpParams::meta();
        params.hidden[0].dropout = 1.0;
        assert!(params.validate("meta").is_err());
    }
}
