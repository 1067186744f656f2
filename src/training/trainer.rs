//! Supervised training loop
//!
//! A plain Burn training loop: seeded per-epoch shuffling, Adam with
//! cross-entropy, validation after every epoch and a checkpoint of the epoch
//! with the best validation macro-F1.

use std::path::{Path, PathBuf};

use burn::{
    config::Config,
    data::dataloader::batcher::Batcher,
    data::dataset::Dataset,
    module::{AutodiffModule, Module},
    nn::loss::CrossEntropyLossConfig,
    optim::{decay::WeightDecayConfig, AdamConfig, GradientsParams, Optimizer},
    record::CompactRecorder,
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::labels::LABELS_FILE;
use crate::dataset::{ImageSample, LabelMap, SeedlingBatch, SeedlingBatcher, SeedlingBurnDataset};
use crate::model::{SeedlingCnn, SeedlingCnnConfig, MODEL_CONFIG_FILE};
use crate::training::finetune::{load_pretrained, FineTuneConfig};
use crate::utils::error::{Result, SeedlingError};
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::{AccuracyTracker, Metrics, RunningAverage, ThresholdedScores};

/// File the training report is written to
pub const TRAINING_REPORT_FILE: &str = "training_report.json";

/// Confusion matrix of the best epoch
pub const CONFUSION_MATRIX_FILE: &str = "confusion_matrix.csv";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub weight_decay: f32,
    /// Seed for per-epoch shuffling
    pub seed: u64,
    /// Stop after this many epochs without a better validation macro-F1
    pub patience: Option<usize>,
    /// Drop undecodable images instead of failing
    pub skip_unreadable: bool,
    /// Start from an earlier checkpoint instead of random weights
    pub fine_tune: Option<FineTuneConfig>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 30,
            batch_size: 32,
            learning_rate: 1e-3,
            weight_decay: 1e-4,
            seed: 42,
            patience: None,
            skip_unreadable: false,
            fine_tune: None,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(SeedlingError::Config("epochs must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(SeedlingError::Config("batch size must be at least 1".to_string()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(SeedlingError::Config(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.patience == Some(0) {
            return Err(SeedlingError::Config("patience must be at least 1".to_string()));
        }
        if let Some(fine_tune) = &self.fine_tune {
            fine_tune.validate()?;
        }
        Ok(())
    }
}

/// Where a trained model and its companions are stored
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub dir: PathBuf,
    pub model_name: String,
}

impl ArtifactPaths {
    pub fn new(dir: impl Into<PathBuf>, model_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            model_name: model_name.into(),
        }
    }

    /// Checkpoint path without extension; the recorder appends `.mpk`
    pub fn checkpoint(&self) -> PathBuf {
        self.dir.join(&self.model_name)
    }

    pub fn labels(&self) -> PathBuf {
        self.dir.join(LABELS_FILE)
    }

    pub fn model_config(&self) -> PathBuf {
        self.dir.join(MODEL_CONFIG_FILE)
    }

    pub fn report(&self) -> PathBuf {
        self.dir.join(TRAINING_REPORT_FILE)
    }
}

/// Tracks the best validation score and the epochs since it last improved
#[derive(Debug, Clone)]
struct EarlyStopping {
    patience: Option<usize>,
    best: Option<f64>,
    stale_epochs: usize,
}

impl EarlyStopping {
    fn new(patience: Option<usize>) -> Self {
        Self {
            patience,
            best: None,
            stale_epochs: 0,
        }
    }

    /// Record an epoch's score; returns whether it beat every earlier one
    fn record(&mut self, score: f64) -> bool {
        let improved = self.best.map(|best| score > best).unwrap_or(true);
        if improved {
            self.best = Some(score);
            self.stale_epochs = 0;
        } else {
            self.stale_epochs += 1;
        }
        improved
    }

    fn should_stop(&self) -> bool {
        matches!(self.patience, Some(patience) if self.stale_epochs >= patience)
    }
}

/// Metrics of one epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub valid_loss: f64,
    pub valid_accuracy: f64,
    pub valid_macro_f1: f64,
}

/// Result of evaluating a model on a labeled dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub metrics: Metrics,
    /// Softmax outputs scored against one-hot labels
    pub thresholded: ThresholdedScores,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub model_name: String,
    pub checkpoint: PathBuf,
    pub train_samples: usize,
    pub valid_samples: usize,
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub best_macro_f1: f64,
    pub stopped_early: bool,
    pub history: Vec<EpochRecord>,
    /// Evaluation of the checkpointed epoch
    pub best_evaluation: EvaluationResult,
    pub created_at: String,
}

impl TrainingReport {
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }
}

/// Train a `SeedlingCnn` and checkpoint the best epoch
///
/// Writes the checkpoint, `labels.json`, `model_config.json`,
/// `training_report.json` and the best confusion matrix to `artifacts.dir`.
pub fn train<B: AutodiffBackend>(
    train_samples: &[ImageSample],
    valid_samples: &[ImageSample],
    labels: &LabelMap,
    model_config: &SeedlingCnnConfig,
    config: &TrainingConfig,
    artifacts: &ArtifactPaths,
    device: &B::Device,
) -> Result<TrainingReport> {
    config.validate()?;
    if model_config.num_classes != labels.len() {
        return Err(SeedlingError::Config(format!(
            "model has {} outputs but the label map has {} classes",
            model_config.num_classes,
            labels.len()
        )));
    }
    if train_samples.is_empty() {
        return Err(SeedlingError::Dataset("training set is empty".to_string()));
    }
    if valid_samples.is_empty() {
        return Err(SeedlingError::Dataset(
            "validation set is empty; use a non-zero test fraction".to_string(),
        ));
    }

    std::fs::create_dir_all(&artifacts.dir)?;

    let image_size = model_config.image_size;
    info!("Preparing training data ({} samples)", train_samples.len());
    let train_dataset =
        SeedlingBurnDataset::new_cached(train_samples, image_size, config.skip_unreadable)?;
    info!("Preparing validation data ({} samples)", valid_samples.len());
    let valid_dataset =
        SeedlingBurnDataset::new_cached(valid_samples, image_size, config.skip_unreadable)?;

    if train_dataset.is_empty() || valid_dataset.is_empty() {
        return Err(SeedlingError::Dataset(
            "no readable images left after decoding".to_string(),
        ));
    }

    let batcher = SeedlingBatcher::new(image_size);
    let mut model = match &config.fine_tune {
        Some(fine_tune) => load_pretrained::<B>(fine_tune, model_config, device)?,
        None => SeedlingCnn::<B>::new(model_config, device),
    };
    let mut frozen_blocks = config.fine_tune.as_ref().map_or(0, |f| f.freeze_blocks);
    let mut optimizer = AdamConfig::new()
        .with_weight_decay(Some(WeightDecayConfig::new(config.weight_decay)))
        .init();
    let loss_fn = CrossEntropyLossConfig::new().init(device);

    info!(
        "Training for {} epochs | batch size {} | learning rate {} | {} classes",
        config.epochs,
        config.batch_size,
        config.learning_rate,
        labels.len()
    );

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut logger = TrainingLogger::new(config.epochs);
    let mut history = Vec::with_capacity(config.epochs);
    let mut best: Option<(usize, EvaluationResult)> = None;
    let mut early_stopping = EarlyStopping::new(config.patience);
    let mut stopped_early = false;

    for epoch in 0..config.epochs {
        logger.start_epoch(epoch);

        if let Some(fine_tune) = &config.fine_tune {
            while frozen_blocks > fine_tune.frozen_blocks_at(epoch) {
                frozen_blocks -= 1;
                info!("Unfreezing block {} at epoch {}", frozen_blocks + 1, epoch + 1);
                model = model.unfreeze_block(frozen_blocks);
            }
        }

        let mut indices: Vec<usize> = (0..train_dataset.len()).collect();
        indices.shuffle(&mut rng);

        let mut epoch_loss = RunningAverage::new();
        let mut accuracy = AccuracyTracker::new();
        let num_batches = indices.len().div_ceil(config.batch_size);

        for (batch_idx, chunk) in indices.chunks(config.batch_size).enumerate() {
            let items: Vec<_> = chunk.iter().filter_map(|&i| train_dataset.get(i)).collect();
            let batch: SeedlingBatch<B> = batcher.batch(items, device);

            let output = model.forward(batch.images);
            let loss = loss_fn.forward(output.clone(), batch.targets.clone());

            let loss_value: f64 = loss.clone().into_scalar().elem();
            epoch_loss.add(loss_value);
            accuracy.add_batch(
                &argmax_labels(output.argmax(1)),
                &int_labels(batch.targets),
            );

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(config.learning_rate, model, grads);

            debug!(
                "Batch {:>4}/{}: loss = {:.4}",
                batch_idx + 1,
                num_batches,
                loss_value
            );
        }

        let evaluation = evaluate(&model.valid(), &valid_dataset, labels, config.batch_size)?;
        logger.end_epoch(
            epoch_loss.average(),
            accuracy.accuracy(),
            evaluation.metrics.macro_f1,
        );

        history.push(EpochRecord {
            epoch: epoch + 1,
            train_loss: epoch_loss.average(),
            train_accuracy: accuracy.accuracy(),
            valid_loss: evaluation.metrics.loss.unwrap_or(0.0),
            valid_accuracy: evaluation.metrics.accuracy,
            valid_macro_f1: evaluation.metrics.macro_f1,
        });

        if early_stopping.record(evaluation.metrics.macro_f1) {
            info!(
                "New best validation macro-F1 {:.4}, saving checkpoint {:?}",
                evaluation.metrics.macro_f1,
                artifacts.checkpoint()
            );
            model
                .clone()
                .save_file(artifacts.checkpoint(), &CompactRecorder::new())
                .map_err(|e| SeedlingError::Model(format!("failed to save checkpoint: {:?}", e)))?;
            best = Some((epoch + 1, evaluation));
        }

        if early_stopping.should_stop() {
            logger.log_early_stop(early_stopping.stale_epochs);
            stopped_early = true;
            break;
        }
    }

    let (best_epoch, best_evaluation) =
        best.ok_or_else(|| SeedlingError::Model("no epoch completed".to_string()))?;
    logger.log_complete(best_evaluation.metrics.macro_f1);

    labels.save(&artifacts.labels())?;
    model_config
        .save(artifacts.model_config())
        .map_err(|e| SeedlingError::Serialization(format!("failed to save model config: {}", e)))?;
    best_evaluation
        .metrics
        .confusion_matrix
        .save_csv(&artifacts.dir.join(CONFUSION_MATRIX_FILE), Some(labels.classes()))?;

    let report = TrainingReport {
        model_name: artifacts.model_name.clone(),
        checkpoint: artifacts.checkpoint(),
        train_samples: train_dataset.len(),
        valid_samples: valid_dataset.len(),
        epochs_run: history.len(),
        best_epoch,
        best_macro_f1: best_evaluation.metrics.macro_f1,
        stopped_early,
        history,
        best_evaluation,
        created_at: chrono::Local::now().to_rfc3339(),
    };
    report.save(&artifacts.report())?;

    Ok(report)
}

/// Evaluate a model in inference mode
pub fn evaluate<B: Backend>(
    model: &SeedlingCnn<B>,
    dataset: &SeedlingBurnDataset,
    labels: &LabelMap,
    batch_size: usize,
) -> Result<EvaluationResult> {
    let device = model.devices().into_iter().next().unwrap_or_default();
    let batcher = SeedlingBatcher::new(dataset.image_size());
    let loss_fn = CrossEntropyLossConfig::new().init(&device);

    let mut predictions = Vec::with_capacity(dataset.len());
    let mut ground_truth = Vec::with_capacity(dataset.len());
    let mut probabilities = Vec::with_capacity(dataset.len());
    let mut one_hot = Vec::with_capacity(dataset.len());
    let mut loss = RunningAverage::new();

    let indices: Vec<usize> = (0..dataset.len()).collect();
    for chunk in indices.chunks(batch_size.max(1)) {
        let items: Vec<_> = chunk.iter().filter_map(|&i| dataset.get(i)).collect();
        let batch: SeedlingBatch<B> = batcher.batch(items, &device);

        let logits = model.forward(batch.images);
        let batch_loss: f64 = loss_fn
            .forward(logits.clone(), batch.targets.clone())
            .into_scalar()
            .elem();
        loss.add(batch_loss);

        let [rows, cols] = logits.dims();
        let probs: Vec<f32> = burn::tensor::activation::softmax(logits, 1)
            .into_data()
            .iter::<f32>()
            .collect();

        let targets = int_labels(batch.targets);
        for (row, &label) in probs.chunks(cols).take(rows).zip(targets.iter()) {
            let predicted = row
                .iter()
                .enumerate()
                .fold((0usize, f32::MIN), |acc, (i, &p)| if p > acc.1 { (i, p) } else { acc })
                .0;
            predictions.push(predicted);
            probabilities.push(row.to_vec());
            one_hot.push(labels.one_hot(label)?);
        }
        ground_truth.extend(targets);
    }

    let mut metrics = Metrics::from_predictions(&predictions, &ground_truth, labels.len())
        .with_class_names(labels.classes());
    metrics.loss = Some(loss.average());

    Ok(EvaluationResult {
        metrics,
        thresholded: ThresholdedScores::from_probabilities(&one_hot, &probabilities),
    })
}

/// Predicted class per row from an `argmax(1)` result of shape `[batch, 1]`
fn argmax_labels<B: Backend>(argmax: Tensor<B, 2, Int>) -> Vec<usize> {
    argmax
        .into_data()
        .iter::<i64>()
        .map(|v| v as usize)
        .collect()
}

fn int_labels<B: Backend>(targets: Tensor<B, 1, Int>) -> Vec<usize> {
    targets
        .into_data()
        .iter::<i64>()
        .map(|v| v as usize)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use image::{Rgb, RgbImage};

    type TestBackend = Autodiff<NdArray>;

    fn write_samples(root: &Path, per_class: usize) -> Vec<ImageSample> {
        let mut samples = Vec::new();
        for (label, (class, color)) in [("A", [220u8, 30, 30]), ("B", [30, 30, 220])]
            .iter()
            .enumerate()
        {
            let dir = root.join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..per_class {
                let path = dir.join(format!("{}.png", i));
                RgbImage::from_pixel(12, 12, Rgb(*color)).save(&path).unwrap();
                samples.push(ImageSample {
                    path,
                    label,
                    class_name: class.to_string(),
                });
            }
        }
        samples
    }

    fn tiny_model_config() -> SeedlingCnnConfig {
        SeedlingCnnConfig::new()
            .with_num_classes(2)
            .with_image_size(8)
            .with_base_filters(2)
            .with_dense_units(4)
    }

    #[test]
    fn test_training_config_validation() {
        assert!(TrainingConfig::default().validate().is_ok());
        let config = TrainingConfig {
            batch_size: 0,
            ..TrainingConfig::default()
        };
        assert!(config.validate().is_err());

        let config = TrainingConfig {
            patience: Some(0),
            ..TrainingConfig::default()
        };
        assert!(matches!(config.validate(), Err(SeedlingError::Config(_))));
    }

    #[test]
    fn test_early_stopping_counts_epochs_without_improvement() {
        let mut stopping = EarlyStopping::new(Some(2));

        assert!(stopping.record(0.5));
        assert!(!stopping.should_stop());
        assert!(!stopping.record(0.5));
        assert!(!stopping.should_stop());
        assert!(stopping.record(0.6));
        assert!(!stopping.record(0.4));
        assert!(!stopping.should_stop());
        assert!(!stopping.record(0.55));
        assert!(stopping.should_stop());
    }

    #[test]
    fn test_patience_of_one_never_stops_on_an_improving_epoch() {
        let mut stopping = EarlyStopping::new(Some(1));
        for score in [0.1, 0.2, 0.3] {
            assert!(stopping.record(score));
            assert!(!stopping.should_stop());
        }
        assert!(!stopping.record(0.3));
        assert!(stopping.should_stop());
    }

    #[test]
    fn test_without_patience_training_runs_every_epoch() {
        let mut stopping = EarlyStopping::new(None);
        stopping.record(0.9);
        for _ in 0..50 {
            stopping.record(0.1);
        }
        assert!(!stopping.should_stop());
    }

    #[test]
    fn test_train_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let samples = write_samples(&dir.path().join("train"), 4);
        let labels = LabelMap::from_class_names(["A", "B"]);
        let artifacts = ArtifactPaths::new(dir.path().join("artifacts"), "seedling_cnn");
        let config = TrainingConfig {
            epochs: 2,
            batch_size: 4,
            ..TrainingConfig::default()
        };

        let report = train::<TestBackend>(
            &samples,
            &samples,
            &labels,
            &tiny_model_config(),
            &config,
            &artifacts,
            &Default::default(),
        )
        .unwrap();

        assert_eq!(report.epochs_run, 2);
        assert_eq!(report.history.len(), 2);
        assert!((0.0..=1.0).contains(&report.best_macro_f1));
        assert!(artifacts.dir.join("seedling_cnn.mpk").is_file());
        assert_eq!(LabelMap::load(&artifacts.labels()).unwrap(), labels);
        assert!(artifacts.model_config().is_file());
        assert_eq!(TrainingReport::load(&artifacts.report()).unwrap().best_epoch, report.best_epoch);
    }

    #[test]
    fn test_train_with_patience_reports_early_stop() {
        let dir = tempfile::tempdir().unwrap();
        let samples = write_samples(&dir.path().join("train"), 2);
        let labels = LabelMap::from_class_names(["A", "B"]);
        let artifacts = ArtifactPaths::new(dir.path().join("artifacts"), "seedling_cnn");
        let config = TrainingConfig {
            epochs: 4,
            batch_size: 4,
            patience: Some(1),
            ..TrainingConfig::default()
        };

        let report = train::<TestBackend>(
            &samples,
            &samples,
            &labels,
            &tiny_model_config(),
            &config,
            &artifacts,
            &Default::default(),
        )
        .unwrap();

        assert_eq!(report.stopped_early, report.epochs_run < 4);
        if report.stopped_early {
            assert_eq!(report.epochs_run, report.best_epoch + 1);
        }
        let best_f1 = report
            .history
            .iter()
            .map(|e| e.valid_macro_f1)
            .fold(f64::MIN, f64::max);
        assert_eq!(report.best_macro_f1, best_f1);
    }

    #[test]
    fn test_fine_tune_keeps_frozen_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let samples = write_samples(&dir.path().join("train"), 2);
        let labels = LabelMap::from_class_names(["A", "B"]);

        // Source network trained on three classes
        let source_dir = dir.path().join("pretrained");
        std::fs::create_dir_all(&source_dir).unwrap();
        let source_config = tiny_model_config().with_num_classes(3);
        SeedlingCnn::<NdArray>::new(&source_config, &Default::default())
            .save_file(source_dir.join("seedling_cnn"), &CompactRecorder::new())
            .unwrap();
        source_config.save(source_dir.join(MODEL_CONFIG_FILE)).unwrap();

        let artifacts = ArtifactPaths::new(dir.path().join("artifacts"), "seedling_cnn");
        let config = TrainingConfig {
            epochs: 2,
            batch_size: 4,
            fine_tune: Some(
                FineTuneConfig::new(source_dir.join("seedling_cnn")).with_freeze_blocks(3),
            ),
            ..TrainingConfig::default()
        };

        train::<TestBackend>(
            &samples,
            &samples,
            &labels,
            &tiny_model_config(),
            &config,
            &artifacts,
            &Default::default(),
        )
        .unwrap();

        let device = Default::default();
        let source = SeedlingCnn::<NdArray>::new(&source_config, &device)
            .load_file(source_dir.join("seedling_cnn"), &CompactRecorder::new(), &device)
            .unwrap();
        let tuned = SeedlingCnn::<NdArray>::new(&tiny_model_config(), &device)
            .load_file(artifacts.checkpoint(), &CompactRecorder::new(), &device)
            .unwrap();

        let weights = |model: &SeedlingCnn<NdArray>| -> Vec<f32> {
            model
                .block1
                .conv_a
                .weight
                .val()
                .into_data()
                .iter::<f32>()
                .chain(model.block3.conv_b.weight.val().into_data().iter::<f32>())
                .collect()
        };
        assert_eq!(weights(&source), weights(&tuned));
        assert_eq!(tuned.head.weight.val().dims(), [4, 2]);
    }

    #[test]
    fn test_train_rejects_class_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let samples = write_samples(dir.path(), 1);
        let labels = LabelMap::from_class_names(["A", "B", "C"]);

        let result = train::<TestBackend>(
            &samples,
            &samples,
            &labels,
            &tiny_model_config(),
            &TrainingConfig::default(),
            &ArtifactPaths::new(dir.path().join("out"), "m"),
            &Default::default(),
        );

        assert!(matches!(result, Err(SeedlingError::Config(_))));
    }

    #[test]
    fn test_evaluate_scores_in_unit_range() {
        let dir = tempfile::tempdir().unwrap();
        let samples = write_samples(dir.path(), 3);
        let labels = LabelMap::from_class_names(["A", "B"]);
        let dataset = SeedlingBurnDataset::new_cached(&samples, 8, false).unwrap();
        let model = SeedlingCnn::<NdArray>::new(&tiny_model_config(), &Default::default());

        let result = evaluate(&model, &dataset, &labels, 4).unwrap();

        assert_eq!(result.metrics.total_samples, 6);
        assert_eq!(result.thresholded.actual_positives, 6);
        for score in [
            result.thresholded.precision,
            result.thresholded.recall,
            result.thresholded.f1,
            result.metrics.macro_f1,
        ] {
            assert!((0.0..=1.0).contains(&score));
        }
    }
}
