//! Error Handling Module
//!
//! Defines the error type shared by every pipeline stage.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for seedling pipeline operations
#[derive(Error, Debug)]
pub enum SeedlingError {
    /// An input directory is missing
    #[error("Directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    /// A file could not be opened or decoded as an image
    #[error("Unreadable image at '{0}': {1}")]
    UnreadableImage(PathBuf, String),

    /// Two label enumerations disagree
    #[error("Label mismatch at index {index}: expected '{expected}', found '{found}'")]
    LabelMismatch {
        index: usize,
        expected: String,
        found: String,
    },

    /// A class has no training images, so it cannot be oversampled
    #[error("Class '{0}' has no training samples to augment")]
    InsufficientSamples(String),

    /// Output directory already exists and overwrite was not requested
    #[error("Output directory already exists: {0} (pass --overwrite to replace it)")]
    OutputExists(PathBuf),

    /// Error with dataset operations
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error with model operations
    #[error("Model error: {0}")]
    Model(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for SeedlingError {
    fn from(err: serde_json::Error) -> Self {
        SeedlingError::Serialization(err.to_string())
    }
}

/// Convenience Result type for seedling pipeline operations
pub type Result<T> = std::result::Result<T, SeedlingError>;

/// Extension trait for turning foreign errors into dataset errors with context
pub trait ResultExt<T> {
    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| SeedlingError::Dataset(format!("{}: {}", f(), e)))
    }
}
