//! Model module for the seedling CNN built on the Burn framework
//!
//! The network is a compact VGG-style classifier: three double-convolution
//! blocks, global average pooling and a small dense head. It is trained from
//! scratch or fine-tuned from an earlier checkpoint with its first blocks
//! frozen.

pub mod cnn;

// Re-export main types for convenience
pub use cnn::{SeedlingCnn, SeedlingCnnConfig, NUM_BLOCKS};

/// File the model configuration is persisted to next to a checkpoint
pub const MODEL_CONFIG_FILE: &str = "model_config.json";
