//! Fine-tuning from an existing checkpoint
//!
//! Training starts from the weights of an earlier `SeedlingCnn` instead of a
//! random initialisation. The first `freeze_blocks` convolutional blocks keep
//! their weights; with `unfreeze_every` the deepest frozen block is released
//! every that many epochs. A checkpoint trained on a different number of
//! classes gets a freshly initialised head.

use std::path::{Path, PathBuf};

use burn::{
    config::Config,
    module::Module,
    record::CompactRecorder,
    tensor::backend::Backend,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::{SeedlingCnn, SeedlingCnnConfig, MODEL_CONFIG_FILE, NUM_BLOCKS};
use crate::utils::error::{Result, SeedlingError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FineTuneConfig {
    /// Checkpoint to start from; the recorder's `.mpk` extension is optional
    pub checkpoint: PathBuf,
    /// Leading convolutional blocks whose weights stay fixed
    #[serde(default)]
    pub freeze_blocks: usize,
    /// Release the deepest frozen block every this many epochs
    #[serde(default)]
    pub unfreeze_every: Option<usize>,
}

impl FineTuneConfig {
    pub fn new(checkpoint: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint: checkpoint.into(),
            freeze_blocks: 0,
            unfreeze_every: None,
        }
    }

    pub fn with_freeze_blocks(mut self, freeze_blocks: usize) -> Self {
        self.freeze_blocks = freeze_blocks;
        self
    }

    pub fn with_unfreeze_every(mut self, unfreeze_every: Option<usize>) -> Self {
        self.unfreeze_every = unfreeze_every;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.freeze_blocks > NUM_BLOCKS {
            return Err(SeedlingError::Config(format!(
                "cannot freeze {} blocks, the network has {}",
                self.freeze_blocks, NUM_BLOCKS
            )));
        }
        if self.unfreeze_every == Some(0) {
            return Err(SeedlingError::Config(
                "unfreeze_every must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The file the recorder reads
    pub fn checkpoint_file(&self) -> PathBuf {
        self.checkpoint.with_extension("mpk")
    }

    /// Blocks that should still be frozen when `epoch` (0-based) starts
    pub fn frozen_blocks_at(&self, epoch: usize) -> usize {
        match self.unfreeze_every {
            Some(every) if every > 0 => self.freeze_blocks.saturating_sub(epoch / every),
            _ => self.freeze_blocks,
        }
    }
}

/// Number of classes the source checkpoint was trained on
///
/// Read from `model_config.json` next to the checkpoint; without one the
/// checkpoint must share the target architecture.
fn source_config(checkpoint: &Path, target: &SeedlingCnnConfig) -> Result<SeedlingCnnConfig> {
    let config_path = checkpoint
        .parent()
        .map(|dir| dir.join(MODEL_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(MODEL_CONFIG_FILE));
    if !config_path.is_file() {
        return Ok(target.clone());
    }

    let source = SeedlingCnnConfig::load(&config_path).map_err(|e| {
        SeedlingError::Serialization(format!("failed to read {:?}: {}", config_path, e))
    })?;
    if source.base_filters != target.base_filters || source.dense_units != target.dense_units {
        return Err(SeedlingError::Config(format!(
            "checkpoint architecture ({} filters, {} dense units) does not match the model ({} filters, {} dense units)",
            source.base_filters, source.dense_units, target.base_filters, target.dense_units
        )));
    }
    Ok(target.clone().with_num_classes(source.num_classes))
}

/// Build the starting model for fine-tuning
///
/// Loads the checkpoint, swaps in a new head when the class count differs
/// and freezes the first `freeze_blocks` blocks.
pub fn load_pretrained<B: Backend>(
    fine_tune: &FineTuneConfig,
    target: &SeedlingCnnConfig,
    device: &B::Device,
) -> Result<SeedlingCnn<B>> {
    fine_tune.validate()?;

    let checkpoint = fine_tune.checkpoint_file();
    if !checkpoint.is_file() {
        return Err(SeedlingError::Model(format!(
            "checkpoint {:?} not found",
            checkpoint
        )));
    }

    let source = source_config(&checkpoint, target)?;
    info!(
        "Fine-tuning from {:?} ({} classes), freezing {} of {} blocks",
        checkpoint, source.num_classes, fine_tune.freeze_blocks, NUM_BLOCKS
    );

    let mut model = SeedlingCnn::<B>::new(&source, device)
        .load_file(checkpoint, &CompactRecorder::new(), device)
        .map_err(|e| SeedlingError::Model(format!("failed to load checkpoint: {:?}", e)))?;

    if source.num_classes != target.num_classes {
        info!(
            "Replacing the {}-class head with a new {}-class head",
            source.num_classes, target.num_classes
        );
        model = model.with_new_head(target, device);
    }

    Ok(model.freeze_blocks(fine_tune.freeze_blocks))
}
