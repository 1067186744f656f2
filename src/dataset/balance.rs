//! Class balancing through cyclic oversampling
//!
//! Every class receives exactly `samples_per_class` augmented images. The
//! originals of a class are shuffled once and then cycled: the whole shuffled
//! list is repeated `n / count` times and the first `n % count` entries are
//! used once more. Those first entries therefore contribute one extra copy
//! each.
//!
//! Output replaces any previous balanced directory atomically from the
//! caller's point of view: images are written to a sibling staging directory
//! which is only renamed into place once everything succeeded.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use indicatif::{ProgressBar, ProgressStyle};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::augmentation::{AugmentationConfig, Augmenter};
use super::labels::LabelMap;
use super::loader::ImageSample;
use super::tensor::TensorConverter;
use crate::utils::error::{Result, ResultExt, SeedlingError};

/// File written at the root of a balanced directory
pub const BALANCE_REPORT_FILE: &str = "balance_report.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    /// Images generated for every class
    pub samples_per_class: usize,
    pub seed: u64,
    /// Replace an existing output directory
    pub overwrite: bool,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            samples_per_class: 2000,
            seed: 42,
            overwrite: false,
        }
    }
}

/// Source indices for `n` draws from `count` items by cyclic oversampling
///
/// Returns an empty list when `count` is zero.
pub fn oversample_indices(count: usize, n: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
    if count == 0 {
        return Vec::new();
    }

    let mut shuffled: Vec<usize> = (0..count).collect();
    shuffled.shuffle(rng);

    let mut indices = Vec::with_capacity(n);
    for _ in 0..n / count {
        indices.extend_from_slice(&shuffled);
    }
    indices.extend_from_slice(&shuffled[..n % count]);
    indices
}

/// Per-class outcome of a balancing run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassBalance {
    pub class_name: String,
    pub label: usize,
    pub original_count: usize,
    pub generated: usize,
    /// How many augmented images each original produced
    pub source_usage: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceReport {
    pub samples_per_class: usize,
    pub seed: u64,
    pub created_at: String,
    pub classes: Vec<ClassBalance>,
}

impl BalanceReport {
    pub fn total_generated(&self) -> usize {
        self.classes.iter().map(|c| c.generated).sum()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Writes `samples_per_class` augmented images for every class
pub struct ClassBalancer {
    config: BalanceConfig,
    augmenter: Augmenter,
}

impl ClassBalancer {
    pub fn new(config: BalanceConfig, augmentation: AugmentationConfig) -> Self {
        Self {
            config,
            augmenter: Augmenter::new(augmentation),
        }
    }

    pub fn config(&self) -> &BalanceConfig {
        &self.config
    }

    /// Balance `train` into `output/<class_name>/<class_name>_<nnnnn>.png`
    ///
    /// Fails before touching the filesystem when the augmentation ranges are
    /// invalid, when a class in `labels` has no training samples or when
    /// `output` exists without `overwrite`. Any
    /// failure while writing leaves an existing `output` untouched.
    pub fn balance(
        &self,
        train: &[ImageSample],
        labels: &LabelMap,
        output: &Path,
    ) -> Result<BalanceReport> {
        self.augmenter.config().validate()?;

        let mut by_class: Vec<Vec<&ImageSample>> = vec![Vec::new(); labels.len()];
        for sample in train {
            match by_class.get_mut(sample.label) {
                Some(class) => class.push(sample),
                None => {
                    return Err(SeedlingError::Dataset(format!(
                        "sample {:?} has label {} outside the {} known classes",
                        sample.path,
                        sample.label,
                        labels.len()
                    )))
                }
            }
        }

        for (label, class_samples) in by_class.iter().enumerate() {
            if class_samples.is_empty() && self.config.samples_per_class > 0 {
                let name = labels.name_of(label).unwrap_or("<unknown>");
                return Err(SeedlingError::InsufficientSamples(name.to_string()));
            }
        }

        if output.exists() && !self.config.overwrite {
            return Err(SeedlingError::OutputExists(output.to_path_buf()));
        }

        let staging = sibling_path(output, "staging")?;
        if staging.exists() {
            warn!("Removing stale staging directory {:?}", staging);
            std::fs::remove_dir_all(&staging)?;
        }
        std::fs::create_dir_all(&staging)?;

        info!(
            "Balancing {} classes to {} images each into {:?}",
            labels.len(),
            self.config.samples_per_class,
            output
        );

        let report = match self.write_all(&by_class, labels, &staging) {
            Ok(report) => report,
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_dir_all(&staging) {
                    warn!("Failed to remove staging directory {:?}: {}", staging, cleanup);
                }
                return Err(e);
            }
        };

        commit(&staging, output)?;

        info!(
            "Wrote {} augmented images to {:?}",
            report.total_generated(),
            output
        );
        Ok(report)
    }

    fn write_all(
        &self,
        by_class: &[Vec<&ImageSample>],
        labels: &LabelMap,
        staging: &Path,
    ) -> Result<BalanceReport> {
        let n = self.config.samples_per_class;
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);

        let pb = ProgressBar::new((n * by_class.len()) as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let mut classes = Vec::with_capacity(by_class.len());

        for (label, class_samples) in by_class.iter().enumerate() {
            let class_name = labels
                .name_of(label)
                .ok_or_else(|| SeedlingError::Dataset(format!("no class name for label {}", label)))?;
            pb.set_message(class_name.to_string());

            let class_dir = staging.join(class_name);
            std::fs::create_dir_all(&class_dir)?;

            let indices = oversample_indices(class_samples.len(), n, &mut rng);
            let mut decoded: Vec<Option<DynamicImage>> = vec![None; class_samples.len()];
            let mut source_usage = BTreeMap::new();

            for (k, &idx) in indices.iter().enumerate() {
                let source = class_samples[idx];
                let img = match decoded[idx].take() {
                    Some(img) => img,
                    None => TensorConverter::decode(&source.path)?,
                };

                let augmented = self.augmenter.augment(&img, &mut rng);
                decoded[idx] = Some(img);
                let out_path = class_dir.join(format!("{}_{:05}.png", class_name, k));
                augmented
                    .save(&out_path)
                    .with_context(|| format!("failed to write {:?}", out_path))?;

                *source_usage
                    .entry(source.path.to_string_lossy().to_string())
                    .or_insert(0) += 1;
                pb.inc(1);
            }

            debug!(
                "Class '{}': {} originals -> {} augmented",
                class_name,
                class_samples.len(),
                indices.len()
            );

            classes.push(ClassBalance {
                class_name: class_name.to_string(),
                label,
                original_count: class_samples.len(),
                generated: indices.len(),
                source_usage,
            });
        }

        pb.finish_with_message("done");

        let report = BalanceReport {
            samples_per_class: n,
            seed: self.config.seed,
            created_at: chrono::Local::now().to_rfc3339(),
            classes,
        };
        report.save(&staging.join(BALANCE_REPORT_FILE))?;

        Ok(report)
    }
}

/// Hidden sibling of `output`, e.g. `data/.augmented.staging-1234`
fn sibling_path(output: &Path, kind: &str) -> Result<PathBuf> {
    let name = output
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| SeedlingError::Config(format!("invalid output directory {:?}", output)))?;
    let sibling = format!(".{}.{}-{}", name, kind, std::process::id());
    Ok(match output.parent() {
        Some(parent) => parent.join(sibling),
        None => PathBuf::from(sibling),
    })
}

/// Swap a completed staging directory into place
fn commit(staging: &Path, output: &Path) -> Result<()> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    if !output.exists() {
        std::fs::rename(staging, output)?;
        return Ok(());
    }

    let old = sibling_path(output, "old")?;
    if old.exists() {
        std::fs::remove_dir_all(&old)?;
    }
    std::fs::rename(output, &old)?;

    if let Err(e) = std::fs::rename(staging, output) {
        warn!("Failed to move staging into place, restoring previous output: {}", e);
        std::fs::rename(&old, output)?;
        if let Err(cleanup) = std::fs::remove_dir_all(staging) {
            warn!("Failed to remove staging directory {:?}: {}", staging, cleanup);
        }
        return Err(e.into());
    }

    // The new output is in place; a leftover copy of the old one is not an error
    if let Err(e) = std::fs::remove_dir_all(&old) {
        warn!("Failed to remove previous output {:?}: {}", old, e);
    }
    Ok(())
}
