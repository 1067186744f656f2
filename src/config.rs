//! Pipeline configuration
//!
//! Every section has defaults, so a TOML file only needs the values it
//! changes:
//!
//! ```toml
//! [data]
//! train_dir = "data/train"
//! image_size = 64
//!
//! [balance]
//! samples_per_class = 500
//!
//! [training]
//! epochs = 10
//! patience = 3
//!
//! [training.fine_tune]
//! checkpoint = "pretrained/seedling_cnn"
//! freeze_blocks = 2
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::{AugmentationConfig, BalanceConfig, SplitConfig};
use crate::model::SeedlingCnnConfig;
use crate::training::{ArtifactPaths, TrainingConfig};
use crate::utils::error::{Result, SeedlingError};
use crate::utils::logging::LogConfig;

/// Input and output locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Class-per-directory training images
    pub train_dir: PathBuf,
    /// Flat directory of unlabeled images to predict
    pub test_dir: PathBuf,
    /// Where balanced images are written
    pub augmented_dir: PathBuf,
    pub artifact_dir: PathBuf,
    pub model_name: String,
    pub submission: PathBuf,
    /// Side length images are resized to
    pub image_size: usize,
    /// Require the class directories to match the 12 known species
    pub strict_labels: bool,
    /// Train on the balanced set instead of the raw training split
    pub use_balanced: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            train_dir: PathBuf::from("data/train"),
            test_dir: PathBuf::from("data/test"),
            augmented_dir: PathBuf::from("data/augmented"),
            artifact_dir: PathBuf::from("artifacts"),
            model_name: "seedling_cnn".to_string(),
            submission: PathBuf::from("submission.csv"),
            image_size: 128,
            strict_labels: true,
            use_balanced: true,
        }
    }
}

/// Network hyperparameters not derived from the data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub dropout_rate: f64,
    pub base_filters: usize,
    pub dense_units: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            dropout_rate: 0.5,
            base_filters: 32,
            dense_units: 256,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data: DataConfig,
    pub split: SplitConfig,
    pub balance: BalanceConfig,
    pub augmentation: AugmentationConfig,
    pub model: ModelSettings,
    pub training: TrainingConfig,
    pub logging: LogConfig,
}

impl PipelineConfig {
    /// Read a TOML file; missing keys keep their defaults
    pub fn load_toml(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SeedlingError::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            SeedlingError::Config(msg) => {
                SeedlingError::Config(format!("Failed to parse config {}: {msg}", path.display()))
            }
            other => other,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| SeedlingError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.split.validate()?;
        self.augmentation.validate()?;
        self.training.validate()?;
        if self.data.image_size < 8 {
            return Err(SeedlingError::Config(format!(
                "image size must be at least 8 pixels, got {}",
                self.data.image_size
            )));
        }
        if self.data.model_name.is_empty() {
            return Err(SeedlingError::Config("model name must not be empty".to_string()));
        }
        Ok(())
    }

    /// Model configuration for `num_classes` outputs
    pub fn model_config(&self, num_classes: usize) -> SeedlingCnnConfig {
        SeedlingCnnConfig::new()
            .with_num_classes(num_classes)
            .with_image_size(self.data.image_size)
            .with_dropout_rate(self.model.dropout_rate)
            .with_base_filters(self.model.base_filters)
            .with_dense_units(self.model.dense_units)
    }

    pub fn artifacts(&self) -> ArtifactPaths {
        ArtifactPaths::new(&self.data.artifact_dir, &self.data.model_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::logging::LogLevel;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.balance.samples_per_class, 2000);
        assert_eq!(config.augmentation.rotation_degrees, 40.0);
        assert_eq!(config.split.test_fraction, 0.2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [data]
            train_dir = "/datasets/seedlings/train"
            image_size = 64

            [balance]
            samples_per_class = 100

            [training]
            epochs = 5
            patience = 2

            [logging]
            level = "warn"
            "#,
        )
        .unwrap();

        assert_eq!(config.data.train_dir, PathBuf::from("/datasets/seedlings/train"));
        assert_eq!(config.data.image_size, 64);
        assert_eq!(config.data.model_name, "seedling_cnn");
        assert_eq!(config.balance.samples_per_class, 100);
        assert_eq!(config.balance.seed, 42);
        assert_eq!(config.training.epochs, 5);
        assert_eq!(config.training.patience, Some(2));
        assert_eq!(config.logging.level, LogLevel::Warn);
    }

    #[test]
    fn test_fine_tune_section() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [training.fine_tune]
            checkpoint = "pretrained/seedling_cnn"
            freeze_blocks = 2
            "#,
        )
        .unwrap();

        let fine_tune = config.training.fine_tune.unwrap();
        assert_eq!(fine_tune.checkpoint, PathBuf::from("pretrained/seedling_cnn"));
        assert_eq!(fine_tune.freeze_blocks, 2);
        assert_eq!(fine_tune.unfreeze_every, None);
        assert!(PipelineConfig::default().training.fine_tune.is_none());
    }

    #[test]
    fn test_zero_patience_is_rejected() {
        let result = PipelineConfig::from_toml_str("[training]\npatience = 0\n");
        assert!(matches!(result, Err(SeedlingError::Config(_))));
    }

    #[test]
    fn test_invalid_split_fraction() {
        let result = PipelineConfig::from_toml_str("[split]\ntest_fraction = 1.5\n");
        assert!(matches!(result, Err(SeedlingError::Config(_))));
    }

    #[test]
    fn test_negative_rotation_is_rejected() {
        let result = PipelineConfig::from_toml_str("[augmentation]\nrotation_degrees = -10.0\n");
        assert!(matches!(result, Err(SeedlingError::Config(_))));
    }

    #[test]
    fn test_unparsable_toml() {
        let result = PipelineConfig::from_toml_str("[data\ntrain_dir = 3");
        assert!(matches!(result, Err(SeedlingError::Config(_))));
    }

    #[test]
    fn test_load_toml_missing_file() {
        let result = PipelineConfig::load_toml(Path::new("/nonexistent/seedling.toml"));
        assert!(matches!(result, Err(SeedlingError::Config(_))));
    }

    #[test]
    fn test_model_config() {
        let config = PipelineConfig::default();
        let model = config.model_config(12);
        assert_eq!(model.num_classes, 12);
        assert_eq!(model.image_size, 128);
        assert_eq!(config.artifacts().checkpoint(), PathBuf::from("artifacts/seedling_cnn"));
    }
}
