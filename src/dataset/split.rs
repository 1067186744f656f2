//! Train/test split allocation
//!
//! Partitions the loaded samples into a training and a held-out test subset.
//! The test subset has exactly `ceil(p * n)` samples, chosen by a seeded
//! ChaCha8 shuffle so a given seed always produces the same partition.
//!
//! The default split is not stratified: with small classes the test subset
//! may under-represent a species. `stratified = true` applies the same
//! `ceil(p * n_c)` rule inside every class instead.

use std::collections::BTreeMap;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::loader::ImageSample;
use crate::utils::error::{Result, SeedlingError};

/// Configuration for dataset splitting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Fraction of samples held out for testing, in `[0, 1)`
    pub test_fraction: f64,
    /// Random seed for reproducibility
    pub seed: u64,
    /// Apply the fraction per class instead of over the whole set
    pub stratified: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: 42,
            stratified: false,
        }
    }
}

impl SplitConfig {
    pub fn new(test_fraction: f64, seed: u64) -> Result<Self> {
        let config = Self {
            test_fraction,
            seed,
            stratified: false,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.test_fraction) {
            return Err(SeedlingError::Config(format!(
                "test fraction must be in [0, 1), got {}",
                self.test_fraction
            )));
        }
        Ok(())
    }

    /// Number of test samples taken from `n` samples
    pub fn test_size(&self, n: usize) -> usize {
        ((n as f64) * self.test_fraction).ceil() as usize
    }
}

/// Disjoint train and test subsets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSplit {
    pub train: Vec<ImageSample>,
    pub test: Vec<ImageSample>,
}

impl DatasetSplit {
    pub fn total(&self) -> usize {
        self.train.len() + self.test.len()
    }
}

/// Split samples into train and test subsets
pub fn split_samples(samples: &[ImageSample], config: &SplitConfig) -> Result<DatasetSplit> {
    config.validate()?;

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

    let split = if config.stratified {
        stratified_split(samples, config, &mut rng)
    } else {
        let mut shuffled = samples.to_vec();
        shuffled.shuffle(&mut rng);
        let train = shuffled.split_off(config.test_size(samples.len()));
        DatasetSplit {
            train,
            test: shuffled,
        }
    };

    info!(
        "Split {} samples: {} train, {} test (seed {}, stratified: {})",
        samples.len(),
        split.train.len(),
        split.test.len(),
        config.seed,
        config.stratified
    );

    Ok(split)
}

fn stratified_split(
    samples: &[ImageSample],
    config: &SplitConfig,
    rng: &mut ChaCha8Rng,
) -> DatasetSplit {
    let mut by_class: BTreeMap<usize, Vec<ImageSample>> = BTreeMap::new();
    for sample in samples {
        by_class.entry(sample.label).or_default().push(sample.clone());
    }

    let mut train = Vec::with_capacity(samples.len());
    let mut test = Vec::new();

    for (label, mut class_samples) in by_class {
        class_samples.shuffle(rng);
        let n_test = config.test_size(class_samples.len());
        let class_train = class_samples.split_off(n_test);

        debug!(
            "Class {}: {} train, {} test",
            label,
            class_train.len(),
            class_samples.len()
        );

        test.extend(class_samples);
        train.extend(class_train);
    }

    train.shuffle(rng);
    test.shuffle(rng);

    DatasetSplit { train, test }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn two_class_samples() -> Vec<ImageSample> {
        let mut samples = Vec::new();
        for i in 0..3 {
            samples.push(ImageSample {
                path: PathBuf::from(format!("train/A/{}.png", i)),
                label: 0,
                class_name: "A".to_string(),
            });
        }
        for i in 0..5 {
            samples.push(ImageSample {
                path: PathBuf::from(format!("train/B/{}.png", i)),
                label: 1,
                class_name: "B".to_string(),
            });
        }
        samples
    }

    #[test]
    fn test_quarter_split_of_eight() {
        let samples = two_class_samples();
        let config = SplitConfig::new(0.25, 42).unwrap();

        let split = split_samples(&samples, &config).unwrap();

        assert_eq!(split.test.len(), 2);
        assert_eq!(split.train.len(), 6);

        let train: HashSet<_> = split.train.iter().map(|s| &s.path).collect();
        let test: HashSet<_> = split.test.iter().map(|s| &s.path).collect();
        assert!(train.is_disjoint(&test));
        assert_eq!(train.len() + test.len(), samples.len());
    }

    #[test]
    fn test_split_is_reproducible() {
        let samples = two_class_samples();
        let config = SplitConfig::new(0.5, 7).unwrap();

        let a = split_samples(&samples, &config).unwrap();
        let b = split_samples(&samples, &config).unwrap();

        assert_eq!(a.test, b.test);
        assert_eq!(a.train, b.train);
    }

    #[test]
    fn test_test_size_rounds_up() {
        let config = SplitConfig::new(0.1, 0).unwrap();
        assert_eq!(config.test_size(8), 1);
        assert_eq!(config.test_size(0), 0);
    }

    #[test]
    fn test_zero_fraction_keeps_everything_in_train() {
        let samples = two_class_samples();
        let config = SplitConfig::new(0.0, 1).unwrap();

        let split = split_samples(&samples, &config).unwrap();

        assert!(split.test.is_empty());
        assert_eq!(split.train.len(), 8);
    }

    #[test]
    fn test_invalid_fraction() {
        assert!(SplitConfig::new(1.0, 0).is_err());
        assert!(SplitConfig::new(-0.1, 0).is_err());
    }

    #[test]
    fn test_stratified_split_per_class() {
        let samples = two_class_samples();
        let config = SplitConfig {
            test_fraction: 0.25,
            seed: 3,
            stratified: true,
        };

        let split = split_samples(&samples, &config).unwrap();

        // ceil(0.25 * 3) + ceil(0.25 * 5)
        assert_eq!(split.test.len(), 3);
        assert_eq!(split.total(), 8);
        assert_eq!(split.test.iter().filter(|s| s.label == 0).count(), 1);
        assert_eq!(split.test.iter().filter(|s| s.label == 1).count(), 2);
    }
}
