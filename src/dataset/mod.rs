//! Dataset module for plant seedling data handling
//!
//! This module provides functionality for:
//! - Loading class-per-directory image trees and flat test directories
//! - Converting images into normalized tensors
//! - Train/test splitting with a fixed seed
//! - Class balancing through cyclic oversampling and random affine augmentation
//! - Burn `Dataset`/`Batcher` integration for training

pub mod augmentation;
pub mod balance;
pub mod burn_dataset;
pub mod labels;
pub mod loader;
pub mod split;
pub mod tensor;

// Re-export main types for convenience
pub use augmentation::{AugmentationConfig, Augmenter};
pub use balance::{oversample_indices, BalanceConfig, BalanceReport, ClassBalancer};
pub use burn_dataset::{SeedlingBatch, SeedlingBatcher, SeedlingBurnDataset, SeedlingItem};
pub use labels::LabelMap;
pub use loader::{list_unlabeled_images, DatasetStats, ImageSample, SeedlingDataset};
pub use split::{split_samples, DatasetSplit, SplitConfig};
pub use tensor::{ImageTensor, TensorConverter};

/// Number of seedling species
pub const NUM_CLASSES: usize = 12;

/// Seedling species in the order class directories sort on disk
pub const SEEDLING_CLASSES: [&str; NUM_CLASSES] = [
    "Black-grass",
    "Charlock",
    "Cleavers",
    "Common Chickweed",
    "Common wheat",
    "Fat Hen",
    "Loose Silky-bent",
    "Maize",
    "Scentless Mayweed",
    "Shepherds Purse",
    "Small-flowered Cranesbill",
    "Sugar beet",
];

/// File extensions accepted as images
pub const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Whether a path has one of the accepted image extensions
pub fn is_image_file(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Get the species name for a given label index
pub fn class_name(label: usize) -> Option<&'static str> {
    SEEDLING_CLASSES.get(label).copied()
}

/// Get the label index for a given species name
pub fn class_index(name: &str) -> Option<usize> {
    SEEDLING_CLASSES.iter().position(|&n| n == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_class_name() {
        assert_eq!(class_name(0), Some("Black-grass"));
        assert_eq!(class_name(7), Some("Maize"));
        assert_eq!(class_name(12), None);
    }

    #[test]
    fn test_class_index() {
        assert_eq!(class_index("Sugar beet"), Some(11));
        assert_eq!(class_index("Dandelion"), None);
    }

    #[test]
    fn test_classes_match_sorted_directory_order() {
        let mut sorted: Vec<&str> = SEEDLING_CLASSES.to_vec();
        sorted.sort();
        assert_eq!(sorted, SEEDLING_CLASSES.to_vec());
    }

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file(Path::new("train/Maize/a1b2.png")));
        assert!(is_image_file(Path::new("test/IMG.JPG")));
        assert!(!is_image_file(Path::new("train/Maize/notes.txt")));
        assert!(!is_image_file(Path::new("train/Maize/README")));
    }
}
