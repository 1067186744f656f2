//! # Seedling Classifier
//!
//! Plant seedling species classification with the Burn framework.
//!
//! The crate loads a class-per-directory image tree, splits it into train
//! and test subsets, balances the training classes by cyclic oversampling
//! with random affine augmentation, trains a CNN and writes predictions for
//! an unlabeled test directory.
//!
//! ## Modules
//!
//! - `dataset`: loading, splitting, balancing and tensor conversion
//! - `model`: CNN architecture built with Burn
//! - `training`: training loop and evaluation
//! - `inference`: prediction and submission output
//! - `pipeline`: stage-by-stage context tying the above together
//! - `utils`: logging, metrics and error types
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use seedling_classifier::{PipelineConfig, PipelineContext};
//! use seedling_classifier::backend::{default_device, TrainingBackend};
//!
//! let mut ctx = PipelineContext::new(PipelineConfig::default());
//! ctx.load()?;
//! ctx.split()?;
//! ctx.balance()?;
//! let report = ctx.train::<TrainingBackend>(&default_device())?;
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod pipeline;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::PipelineConfig;
pub use dataset::{
    BalanceConfig, ClassBalancer, DatasetSplit, ImageSample, LabelMap, SeedlingDataset,
    SplitConfig, TensorConverter, NUM_CLASSES, SEEDLING_CLASSES,
};
pub use inference::{Prediction, Predictor};
pub use model::{SeedlingCnn, SeedlingCnnConfig};
pub use pipeline::PipelineContext;
pub use training::{FineTuneConfig, TrainingConfig, TrainingReport};
pub use utils::error::{Result, SeedlingError};
pub use utils::metrics::{ConfusionMatrix, Metrics, ThresholdedScores};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
