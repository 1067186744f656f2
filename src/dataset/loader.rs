//! Seedling Dataset Loader
//!
//! Loads a class-per-directory image tree into (path, label) samples and
//! lists the flat, unlabeled test directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::is_image_file;
use super::labels::LabelMap;
use crate::utils::error::{Result, SeedlingError};

/// A single image sample with its label
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSample {
    /// Path to the image file; identifies the sample
    pub path: PathBuf,
    /// Class label index
    pub label: usize,
    /// Class name (e.g., "Maize")
    pub class_name: String,
}

/// Labeled image directory
#[derive(Debug, Clone)]
pub struct SeedlingDataset {
    /// Root directory of the dataset
    pub root_dir: PathBuf,
    /// All samples, grouped by class and sorted by path within a class
    pub samples: Vec<ImageSample>,
    /// Class names in label order (sorted directory names)
    pub labels: LabelMap,
}

impl SeedlingDataset {
    /// Load a dataset from a directory
    ///
    /// The directory should be structured as:
    /// ```text
    /// root_dir/
    /// ├── Black-grass/
    /// │   ├── 0050f38b3.png
    /// │   └── ...
    /// ├── Charlock/
    /// │   └── ...
    /// └── ...
    /// ```
    /// Hidden directories are skipped. Class directories without images are
    /// kept so that an empty class is visible to later stages.
    pub fn new<P: AsRef<Path>>(root_dir: P) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        info!("Loading seedling dataset from: {:?}", root_dir);

        if !root_dir.is_dir() {
            return Err(SeedlingError::DirectoryNotFound(root_dir));
        }

        let mut class_dirs: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(&root_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match entry.file_name().to_str() {
                Some(name) if !name.starts_with('.') => class_dirs.push(name.to_string()),
                Some(_) => {}
                None => warn!("Skipping non UTF-8 directory name {:?}", entry.path()),
            }
        }
        class_dirs.sort();

        info!("Found {} classes", class_dirs.len());

        let mut samples = Vec::new();
        for (label, class_name) in class_dirs.iter().enumerate() {
            let class_dir = root_dir.join(class_name);
            let before = samples.len();

            for entry in WalkDir::new(&class_dir)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let path = entry.path();
                if entry.file_type().is_file() && is_image_file(path) {
                    samples.push(ImageSample {
                        path: path.to_path_buf(),
                        label,
                        class_name: class_name.clone(),
                    });
                }
            }

            debug!(
                "Class '{}' (label {}): {} samples",
                class_name,
                label,
                samples.len() - before
            );
        }

        info!("Loaded {} total samples", samples.len());

        Ok(Self {
            root_dir,
            samples,
            labels: LabelMap::from_class_names(class_dirs),
        })
    }

    /// Get the number of samples in the dataset
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the dataset is empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Get the number of classes
    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }

    /// (path, label) pairs in sample order
    pub fn pairs(&self) -> Vec<(PathBuf, usize)> {
        self.samples
            .iter()
            .map(|s| (s.path.clone(), s.label))
            .collect()
    }

    /// Get statistics about the dataset
    pub fn get_stats(&self) -> DatasetStats {
        DatasetStats::from_samples(&self.samples, &self.labels)
    }
}

/// Per-class sample counts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub total_samples: usize,
    pub class_names: Vec<String>,
    pub class_counts: Vec<usize>,
}

impl DatasetStats {
    pub fn from_samples(samples: &[ImageSample], labels: &LabelMap) -> Self {
        let mut class_counts = vec![0usize; labels.len()];
        for sample in samples {
            if let Some(count) = class_counts.get_mut(sample.label) {
                *count += 1;
            }
        }

        Self {
            total_samples: samples.len(),
            class_names: labels.classes().to_vec(),
            class_counts,
        }
    }

    /// Largest class count divided by smallest; infinite when a class is empty
    pub fn imbalance_ratio(&self) -> f64 {
        let min = self.class_counts.iter().copied().min().unwrap_or(0);
        let max = self.class_counts.iter().copied().max().unwrap_or(0);
        if min == 0 {
            f64::INFINITY
        } else {
            max as f64 / min as f64
        }
    }

    /// Render one row per class with a proportional bar
    pub fn display(&self) -> String {
        let mut output = format!(
            "Total samples: {}\nNumber of classes: {}\n",
            self.total_samples,
            self.class_names.len()
        );

        for (idx, (name, count)) in self
            .class_names
            .iter()
            .zip(self.class_counts.iter())
            .enumerate()
        {
            let share = if self.total_samples > 0 {
                *count as f64 / self.total_samples as f64
            } else {
                0.0
            };
            let bar = "█".repeat((share * 40.0) as usize);
            output.push_str(&format!("  {:3}. {:28} {:5} {}\n", idx, name, count, bar));
        }

        output
    }
}

/// List the images of a flat directory (e.g. `test/`), sorted by file name
pub fn list_unlabeled_images<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(SeedlingError::DirectoryNotFound(dir.to_path_buf()));
    }

    let images: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_image_file(e.path()))
        .map(|e| e.into_path())
        .collect();

    info!("Found {} unlabeled images in {:?}", images.len(), dir);
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::write(path, b"not decoded by the loader").unwrap();
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("train");

        match SeedlingDataset::new(&missing) {
            Err(SeedlingError::DirectoryNotFound(path)) => assert_eq!(path, missing),
            other => panic!("expected DirectoryNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_labels_follow_sorted_directory_order() {
        let dir = tempfile::tempdir().unwrap();
        for class in ["Maize", "Charlock", "Black-grass"] {
            fs::create_dir(dir.path().join(class)).unwrap();
            touch(&dir.path().join(class).join("a.png"));
        }
        fs::create_dir(dir.path().join(".staging")).unwrap();
        touch(&dir.path().join("Maize").join("notes.txt"));

        let dataset = SeedlingDataset::new(dir.path()).unwrap();

        assert_eq!(
            dataset.labels.classes(),
            &["Black-grass".to_string(), "Charlock".to_string(), "Maize".to_string()]
        );
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.samples[2].label, 2);
        assert_eq!(dataset.samples[2].class_name, "Maize");
    }

    #[test]
    fn test_empty_class_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("A")).unwrap();
        fs::create_dir(dir.path().join("B")).unwrap();
        touch(&dir.path().join("A").join("1.png"));

        let dataset = SeedlingDataset::new(dir.path()).unwrap();
        let stats = dataset.get_stats();

        assert_eq!(dataset.num_classes(), 2);
        assert_eq!(stats.class_counts, vec![1, 0]);
        assert!(stats.imbalance_ratio().is_infinite());
    }

    #[test]
    fn test_list_unlabeled_images_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.png", "a.jpg", "b.png", "readme.md"] {
            touch(&dir.path().join(name));
        }

        let images = list_unlabeled_images(dir.path()).unwrap();
        let names: Vec<_> = images
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(names, vec!["a.jpg", "b.png", "c.png"]);
    }
}
