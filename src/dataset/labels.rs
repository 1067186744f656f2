//! Canonical label enumeration
//!
//! A `LabelMap` is the single source of truth for the index <-> species
//! mapping. Training derives it from the sorted class directories, checks it
//! against the known species list, and persists it next to the checkpoint so
//! inference decodes predictions with exactly the same ordering.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::SEEDLING_CLASSES;
use crate::utils::error::{Result, SeedlingError};

/// File name used when persisting a label map next to a model
pub const LABELS_FILE: &str = "labels.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMap {
    classes: Vec<String>,
}

impl LabelMap {
    /// Build from class names already in label order
    pub fn from_class_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            classes: names.into_iter().map(Into::into).collect(),
        }
    }

    /// The 12 known seedling species
    pub fn seedlings() -> Self {
        Self::from_class_names(SEEDLING_CLASSES)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn name_of(&self, label: usize) -> Option<&str> {
        self.classes.get(label).map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.classes.iter().position(|c| c == name)
    }

    /// One-hot vector of length `len()` with a 1 at `label`
    pub fn one_hot(&self, label: usize) -> Result<Vec<f32>> {
        if label >= self.classes.len() {
            return Err(SeedlingError::Dataset(format!(
                "label {} out of range for {} classes",
                label,
                self.classes.len()
            )));
        }
        let mut encoded = vec![0.0f32; self.classes.len()];
        encoded[label] = 1.0;
        Ok(encoded)
    }

    /// Check that `self` enumerates exactly the same classes as `expected`
    ///
    /// Reports the first index where the two disagree. A length difference
    /// is reported at the first index past the shorter map.
    pub fn verify(&self, expected: &LabelMap) -> Result<()> {
        let longest = self.len().max(expected.len());
        for index in 0..longest {
            let found = self.name_of(index);
            let wanted = expected.name_of(index);
            if found != wanted {
                return Err(SeedlingError::LabelMismatch {
                    index,
                    expected: wanted.unwrap_or("<none>").to_string(),
                    found: found.unwrap_or("<none>").to_string(),
                });
            }
        }
        Ok(())
    }

    /// Persist as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let map: Self = serde_json::from_str(&json)?;
        if map.is_empty() {
            return Err(SeedlingError::Serialization(format!(
                "label map {:?} contains no classes",
                path
            )));
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seedlings_has_twelve_classes() {
        let map = LabelMap::seedlings();
        assert_eq!(map.len(), 12);
        assert_eq!(map.name_of(7), Some("Maize"));
        assert_eq!(map.index_of("Charlock"), Some(1));
    }

    #[test]
    fn test_one_hot() {
        let map = LabelMap::from_class_names(["A", "B", "C"]);
        assert_eq!(map.one_hot(1).unwrap(), vec![0.0, 1.0, 0.0]);
        assert!(map.one_hot(3).is_err());
    }

    #[test]
    fn test_verify_identical() {
        assert!(LabelMap::seedlings().verify(&LabelMap::seedlings()).is_ok());
    }

    #[test]
    fn test_verify_reports_first_divergence() {
        let mut names: Vec<&str> = SEEDLING_CLASSES.to_vec();
        names.swap(3, 4);
        let swapped = LabelMap::from_class_names(names);

        match swapped.verify(&LabelMap::seedlings()) {
            Err(SeedlingError::LabelMismatch {
                index,
                expected,
                found,
            }) => {
                assert_eq!(index, 3);
                assert_eq!(expected, "Common Chickweed");
                assert_eq!(found, "Common wheat");
            }
            other => panic!("expected LabelMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_verify_missing_class() {
        let partial = LabelMap::from_class_names(SEEDLING_CLASSES[..11].to_vec());

        match partial.verify(&LabelMap::seedlings()) {
            Err(SeedlingError::LabelMismatch { index, found, .. }) => {
                assert_eq!(index, 11);
                assert_eq!(found, "<none>");
            }
            other => panic!("expected LabelMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LABELS_FILE);

        LabelMap::seedlings().save(&path).unwrap();
        let loaded = LabelMap::load(&path).unwrap();

        assert_eq!(loaded, LabelMap::seedlings());
    }
}
