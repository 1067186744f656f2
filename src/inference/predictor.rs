//! Inference Predictor Module
//!
//! Class names are decoded through the label map stored next to the
//! checkpoint, never through a hardcoded table.

use std::path::{Path, PathBuf};

use burn::{
    config::Config,
    data::dataloader::batcher::Batcher,
    module::Module,
    record::CompactRecorder,
    tensor::backend::Backend,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::SUBMISSION_HEADER;
use crate::dataset::labels::LABELS_FILE;
use crate::dataset::{list_unlabeled_images, LabelMap, SeedlingBatch, SeedlingBatcher, SeedlingItem};
use crate::dataset::TensorConverter;
use crate::model::{SeedlingCnn, SeedlingCnnConfig, MODEL_CONFIG_FILE};
use crate::utils::error::{Result, SeedlingError};

/// Result of a single prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// File name of the input image
    pub file: String,
    pub path: PathBuf,
    pub label: usize,
    pub class_name: String,
    /// Probability of the predicted class
    pub confidence: f32,
    pub probabilities: Vec<f32>,
}

impl Prediction {
    fn from_probabilities(path: &Path, probabilities: Vec<f32>, labels: &LabelMap) -> Self {
        let (label, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold((0usize, f32::MIN), |best, (i, p)| if p > best.1 { (i, p) } else { best });

        Self {
            file: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            path: path.to_path_buf(),
            label,
            class_name: labels.name_of(label).unwrap_or("Unknown").to_string(),
            confidence,
            probabilities,
        }
    }

    /// The `k` most probable (label, probability) pairs
    pub fn top_k(&self, k: usize) -> Vec<(usize, f32)> {
        let mut indexed: Vec<(usize, f32)> =
            self.probabilities.iter().copied().enumerate().collect();
        indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
        indexed.truncate(k);
        indexed
    }
}

/// Predictor for running inference with a trained model
pub struct Predictor<B: Backend> {
    model: SeedlingCnn<B>,
    labels: LabelMap,
    converter: TensorConverter,
    batcher: SeedlingBatcher,
    device: B::Device,
    batch_size: usize,
}

impl<B: Backend> Predictor<B> {
    /// Load `<artifact_dir>/<model_name>` with its config and label map
    pub fn load(artifact_dir: &Path, model_name: &str, device: &B::Device) -> Result<Self> {
        if !artifact_dir.is_dir() {
            return Err(SeedlingError::DirectoryNotFound(artifact_dir.to_path_buf()));
        }

        let config = SeedlingCnnConfig::load(artifact_dir.join(MODEL_CONFIG_FILE)).map_err(|e| {
            SeedlingError::Serialization(format!("failed to read model config: {}", e))
        })?;
        let labels = LabelMap::load(&artifact_dir.join(LABELS_FILE))?;

        if labels.len() != config.num_classes {
            return Err(SeedlingError::Config(format!(
                "label map has {} classes but the model has {} outputs",
                labels.len(),
                config.num_classes
            )));
        }

        let checkpoint = artifact_dir.join(model_name);
        info!("Loading model from {:?}", checkpoint);
        let model = SeedlingCnn::<B>::new(&config, device)
            .load_file(checkpoint, &CompactRecorder::new(), device)
            .map_err(|e| SeedlingError::Model(format!("failed to load model: {:?}", e)))?;

        Ok(Self {
            model,
            labels,
            converter: TensorConverter::new(config.image_size as u32),
            batcher: SeedlingBatcher::new(config.image_size),
            device: device.clone(),
            batch_size: 32,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    pub fn predict_file(&self, path: &Path) -> Result<Prediction> {
        let mut predictions = self.predict_paths(&[path.to_path_buf()])?;
        predictions
            .pop()
            .ok_or_else(|| SeedlingError::Model("model returned no prediction".to_string()))
    }

    /// Predict every image in a flat directory, in file name order
    pub fn predict_dir(&self, dir: &Path) -> Result<Vec<Prediction>> {
        let files = list_unlabeled_images(dir)?;
        let predictions = self.predict_paths(&files)?;
        info!("Predicted {} images from {:?}", predictions.len(), dir);
        Ok(predictions)
    }

    pub fn predict_paths(&self, paths: &[PathBuf]) -> Result<Vec<Prediction>> {
        let mut predictions = Vec::with_capacity(paths.len());
        let num_classes = self.labels.len();

        for chunk in paths.chunks(self.batch_size) {
            let items = chunk
                .iter()
                .map(|path| SeedlingItem::from_path(path, 0, &self.converter))
                .collect::<Result<Vec<_>>>()?;
            let batch: SeedlingBatch<B> = self.batcher.batch(items, &self.device);

            let probs: Vec<f32> = self
                .model
                .forward_softmax(batch.images)
                .into_data()
                .iter::<f32>()
                .collect();

            for (path, row) in chunk.iter().zip(probs.chunks(num_classes)) {
                let prediction = Prediction::from_probabilities(path, row.to_vec(), &self.labels);
                debug!(
                    "{} -> {} ({:.3})",
                    prediction.file, prediction.class_name, prediction.confidence
                );
                predictions.push(prediction);
            }
        }

        Ok(predictions)
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Write predictions as a `file,species` CSV
pub fn write_submission(predictions: &[Prediction], path: &Path) -> Result<()> {
    let mut content = String::from(SUBMISSION_HEADER);
    content.push('\n');
    for prediction in predictions {
        content.push_str(&format!(
            "{},{}\n",
            csv_field(&prediction.file),
            csv_field(&prediction.class_name)
        ));
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, content)?;
    info!("Wrote {} predictions to {:?}", predictions.len(), path);
    Ok(())
}
