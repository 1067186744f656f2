//! Training module
//!
//! - Supervised training loop with the Burn framework
//! - Evaluation with confusion matrix, macro/micro/weighted F1 and
//!   thresholded precision/recall
//! - Checkpointing of the best epoch together with its label map
//! - Fine-tuning from an earlier checkpoint with frozen blocks

pub mod finetune;
pub mod trainer;

// Re-export main types for convenience
pub use finetune::{load_pretrained, FineTuneConfig};
pub use trainer::{
    evaluate, train, ArtifactPaths, EpochRecord, EvaluationResult, TrainingConfig,
    TrainingReport, CONFUSION_MATRIX_FILE, TRAINING_REPORT_FILE,
};
