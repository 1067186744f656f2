//! Inference module
//!
//! Loads a checkpoint together with its persisted label map and predicts
//! species for single images or whole unlabeled directories. Predictions
//! can be written as a `file,species` submission CSV.

pub mod predictor;

// Re-export main types for convenience
pub use predictor::{write_submission, Prediction, Predictor};

/// Header row of a submission file
pub const SUBMISSION_HEADER: &str = "file,species";
