//! Burn Dataset Integration
//!
//! Implements Burn's `Dataset` and `Batcher` traits over preprocessed seedling
//! images. Images are decoded once up front so epochs only pay for batching.

use std::path::PathBuf;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use super::loader::ImageSample;
use super::tensor::TensorConverter;
use crate::utils::error::{Result, SeedlingError};

/// A single seedling image ready for Burn
#[derive(Clone, Debug)]
pub struct SeedlingItem {
    /// Image data as flattened CHW float array [3 * H * W] in [0, 1]
    pub image: Vec<f32>,
    pub label: usize,
    pub path: PathBuf,
}

impl SeedlingItem {
    pub fn from_path(path: &PathBuf, label: usize, converter: &TensorConverter) -> Result<Self> {
        let tensor = converter.convert(path)?;
        Ok(Self {
            image: tensor.to_chw(),
            label,
            path: path.clone(),
        })
    }
}

/// In-memory dataset of preprocessed images
#[derive(Debug, Clone)]
pub struct SeedlingBurnDataset {
    items: Vec<SeedlingItem>,
    image_size: usize,
}

impl SeedlingBurnDataset {
    /// Decode every sample up front
    ///
    /// With `skip_unreadable` an undecodable file is logged and dropped;
    /// otherwise the first one aborts with `UnreadableImage`.
    pub fn new_cached(
        samples: &[ImageSample],
        image_size: usize,
        skip_unreadable: bool,
    ) -> Result<Self> {
        info!("Pre-loading {} images into memory", samples.len());
        let converter = TensorConverter::new(image_size as u32);

        let pb = ProgressBar::new(samples.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let mut items = Vec::with_capacity(samples.len());
        for sample in samples {
            match SeedlingItem::from_path(&sample.path, sample.label, &converter) {
                Ok(item) => items.push(item),
                Err(e @ SeedlingError::UnreadableImage(..)) if skip_unreadable => {
                    warn!("Skipping {}", e);
                }
                Err(e) => {
                    pb.abandon();
                    return Err(e);
                }
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        info!("Loaded {} images", items.len());
        Ok(Self { items, image_size })
    }

    pub fn from_items(items: Vec<SeedlingItem>, image_size: usize) -> Self {
        Self { items, image_size }
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn labels(&self) -> Vec<usize> {
        self.items.iter().map(|item| item.label).collect()
    }
}

impl Dataset<SeedlingItem> for SeedlingBurnDataset {
    fn get(&self, index: usize) -> Option<SeedlingItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// A batch of seedling images
#[derive(Clone, Debug)]
pub struct SeedlingBatch<B: Backend> {
    /// Shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

#[derive(Clone, Debug)]
pub struct SeedlingBatcher {
    image_size: usize,
}

impl SeedlingBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, SeedlingItem, SeedlingBatch<B>> for SeedlingBatcher {
    fn batch(&self, items: Vec<SeedlingItem>, device: &B::Device) -> SeedlingBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        let images_data: Vec<f32> = items
            .iter()
            .flat_map(|item| item.image.iter().copied())
            .collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, size, size]),
            device,
        );

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        SeedlingBatch { images, targets }
    }
}
