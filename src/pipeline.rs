//! Pipeline context
//!
//! `PipelineContext` carries the state that flows between stages: the label
//! map, the loaded dataset, the train/test split and the balanced training
//! set. Each stage is a method that requires its predecessors to have run.

use burn::tensor::backend::{AutodiffBackend, Backend};
use tracing::info;

use crate::config::PipelineConfig;
use crate::dataset::{
    split_samples, BalanceReport, ClassBalancer, DatasetSplit, ImageSample, LabelMap,
    SeedlingDataset,
};
use crate::inference::{write_submission, Prediction, Predictor};
use crate::training::{train, TrainingReport};
use crate::utils::error::{Result, SeedlingError};

fn out_of_order(stage: &str, requires: &str) -> SeedlingError {
    SeedlingError::Config(format!("`{}` requires `{}` to run first", stage, requires))
}

pub struct PipelineContext {
    config: PipelineConfig,
    labels: Option<LabelMap>,
    dataset: Option<SeedlingDataset>,
    split: Option<DatasetSplit>,
    balanced: Option<SeedlingDataset>,
    balance_report: Option<BalanceReport>,
}

impl PipelineContext {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            labels: None,
            dataset: None,
            split: None,
            balanced: None,
            balance_report: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Load the training directory and establish the label map
    ///
    /// With `strict_labels` the class directories must be exactly the 12
    /// known species. Resets any later stage.
    pub fn load(&mut self) -> Result<&SeedlingDataset> {
        let dataset = SeedlingDataset::new(&self.config.data.train_dir)?;
        if self.config.data.strict_labels {
            dataset.labels.verify(&LabelMap::seedlings())?;
        }
        if dataset.is_empty() {
            return Err(SeedlingError::Dataset(format!(
                "no images found under {:?}",
                self.config.data.train_dir
            )));
        }

        self.labels = Some(dataset.labels.clone());
        self.split = None;
        self.balanced = None;
        self.balance_report = None;
        Ok(self.dataset.insert(dataset))
    }

    pub fn split(&mut self) -> Result<&DatasetSplit> {
        let dataset = self.dataset.as_ref().ok_or_else(|| out_of_order("split", "load"))?;
        let split = split_samples(&dataset.samples, &self.config.split)?;

        self.balanced = None;
        self.balance_report = None;
        Ok(self.split.insert(split))
    }

    /// Write the balanced training set and reload it as ordinary samples
    pub fn balance(&mut self) -> Result<&BalanceReport> {
        let split = self.split.as_ref().ok_or_else(|| out_of_order("balance", "split"))?;
        let labels = self.labels.as_ref().ok_or_else(|| out_of_order("balance", "load"))?;
        let output = &self.config.data.augmented_dir;

        let balancer = ClassBalancer::new(
            self.config.balance.clone(),
            self.config.augmentation.clone(),
        );
        let report = balancer.balance(&split.train, labels, output)?;

        let balanced = SeedlingDataset::new(output)?;
        balanced.labels.verify(labels)?;
        info!(
            "Balanced training set: {} samples over {} classes",
            balanced.len(),
            balanced.num_classes()
        );

        self.balanced = Some(balanced);
        Ok(self.balance_report.insert(report))
    }

    pub fn labels(&self) -> Result<&LabelMap> {
        self.labels.as_ref().ok_or_else(|| out_of_order("labels", "load"))
    }

    /// The split computed by the last `split` call
    pub fn dataset_split(&self) -> Option<&DatasetSplit> {
        self.split.as_ref()
    }

    pub fn balance_report(&self) -> Option<&BalanceReport> {
        self.balance_report.as_ref()
    }

    /// Samples to train on: the balanced set, or the raw training split when
    /// balancing is disabled
    pub fn training_samples(&self) -> Result<&[ImageSample]> {
        if let Some(balanced) = &self.balanced {
            return Ok(&balanced.samples);
        }
        match &self.split {
            Some(split) if !self.config.data.use_balanced => Ok(&split.train),
            Some(_) => Err(out_of_order("training_samples", "balance")),
            None => Err(out_of_order("training_samples", "split")),
        }
    }

    pub fn test_samples(&self) -> Result<&[ImageSample]> {
        self.split
            .as_ref()
            .map(|split| split.test.as_slice())
            .ok_or_else(|| out_of_order("test_samples", "split"))
    }

    /// Train on `training_samples`, validating on `test_samples`
    pub fn train<B: AutodiffBackend>(&self, device: &B::Device) -> Result<TrainingReport> {
        let labels = self.labels()?;
        train::<B>(
            self.training_samples()?,
            self.test_samples()?,
            labels,
            &self.config.model_config(labels.len()),
            &self.config.training,
            &self.config.artifacts(),
            device,
        )
    }

    /// Predict the unlabeled test directory and write the submission CSV
    pub fn predict<B: Backend>(&self, device: &B::Device) -> Result<Vec<Prediction>> {
        let data = &self.config.data;
        let predictor = Predictor::<B>::load(&data.artifact_dir, &data.model_name, device)?;
        if let Some(labels) = &self.labels {
            predictor.labels().verify(labels)?;
        } else if data.strict_labels {
            predictor.labels().verify(&LabelMap::seedlings())?;
        }

        let predictions = predictor.predict_dir(&data.test_dir)?;
        write_submission(&predictions, &data.submission)?;
        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::config::Config;
    use burn::module::Module;
    use burn::record::CompactRecorder;
    use image::{Rgb, RgbImage};
    use std::path::Path;

    use crate::dataset::labels::LABELS_FILE;
    use crate::model::{SeedlingCnn, SeedlingCnnConfig, MODEL_CONFIG_FILE};

    fn write_tree(root: &Path, counts: &[(&str, usize)]) {
        for (class, count) in counts {
            let dir = root.join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..*count {
                RgbImage::from_pixel(8, 8, Rgb([i as u8 * 20, 100, 50]))
                    .save(dir.join(format!("{}.png", i)))
                    .unwrap();
            }
        }
    }

    /// Write an untrained model with `labels` as a finished training run
    fn write_artifacts(config: &PipelineConfig, labels: &LabelMap) {
        let dir = &config.data.artifact_dir;
        std::fs::create_dir_all(dir).unwrap();
        let model_config = SeedlingCnnConfig::new()
            .with_num_classes(labels.len())
            .with_image_size(8)
            .with_base_filters(2)
            .with_dense_units(4);
        SeedlingCnn::<NdArray>::new(&model_config, &Default::default())
            .save_file(dir.join(&config.data.model_name), &CompactRecorder::new())
            .unwrap();
        model_config.save(dir.join(MODEL_CONFIG_FILE)).unwrap();
        labels.save(&dir.join(LABELS_FILE)).unwrap();
    }

    fn write_test_images(dir: &Path, count: usize) {
        std::fs::create_dir_all(dir).unwrap();
        for i in 0..count {
            RgbImage::from_pixel(10, 10, Rgb([40, i as u8 * 60, 90]))
                .save(dir.join(format!("t{}.png", i)))
                .unwrap();
        }
    }

    fn config_for(root: &Path) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.data.train_dir = root.join("train");
        config.data.augmented_dir = root.join("augmented");
        config.data.strict_labels = false;
        config.balance.samples_per_class = 6;
        config.split.test_fraction = 0.25;
        config.data.test_dir = root.join("test");
        config.data.artifact_dir = root.join("artifacts");
        config.data.submission = root.join("submission.csv");
        config
    }

    #[test]
    fn test_stages_out_of_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = PipelineContext::new(config_for(dir.path()));

        assert!(matches!(ctx.split(), Err(SeedlingError::Config(_))));
        assert!(matches!(ctx.balance(), Err(SeedlingError::Config(_))));
        assert!(matches!(ctx.training_samples(), Err(SeedlingError::Config(_))));
        assert!(matches!(ctx.test_samples(), Err(SeedlingError::Config(_))));
    }

    #[test]
    fn test_full_data_preparation() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(&dir.path().join("train"), &[("A", 3), ("B", 5)]);
        let mut ctx = PipelineContext::new(config_for(dir.path()));

        assert_eq!(ctx.load().unwrap().len(), 8);
        let split = ctx.split().unwrap();
        assert_eq!(split.test.len(), 2);
        assert_eq!(split.train.len(), 6);

        // Training samples are unavailable until balancing ran
        assert!(ctx.training_samples().is_err());

        // Two test images can never exhaust a class of three
        let report = ctx.balance().unwrap();
        assert_eq!(report.total_generated(), 12);
        assert_eq!(ctx.training_samples().unwrap().len(), 12);
        assert!(dir.path().join("augmented").join("A").join("A_00005.png").is_file());
    }

    #[test]
    fn test_strict_labels_rejects_unknown_classes() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(&dir.path().join("train"), &[("A", 1)]);
        let mut config = config_for(dir.path());
        config.data.strict_labels = true;

        let mut ctx = PipelineContext::new(config);
        assert!(matches!(ctx.load(), Err(SeedlingError::LabelMismatch { .. })));
    }

    #[test]
    fn test_unbalanced_training_samples() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(&dir.path().join("train"), &[("A", 4), ("B", 4)]);
        let mut config = config_for(dir.path());
        config.data.use_balanced = false;

        let mut ctx = PipelineContext::new(config);
        ctx.load().unwrap();
        ctx.split().unwrap();

        assert_eq!(ctx.training_samples().unwrap().len(), 6);
        assert_eq!(ctx.test_samples().unwrap().len(), 2);
    }

    #[test]
    fn test_predict_writes_submission() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path());
        let labels = LabelMap::from_class_names(["A", "B"]);
        write_artifacts(&config, &labels);
        write_test_images(&config.data.test_dir, 3);

        let ctx = PipelineContext::new(config);
        let predictions = ctx.predict::<NdArray>(&Default::default()).unwrap();

        assert_eq!(predictions.len(), 3);
        let csv = std::fs::read_to_string(dir.path().join("submission.csv")).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "file,species");
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("t0.png,"));
        for prediction in &predictions {
            assert!(labels.index_of(&prediction.class_name).is_some());
        }
    }

    #[test]
    fn test_predict_rejects_labels_of_another_dataset() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(&dir.path().join("train"), &[("A", 1), ("C", 1)]);
        let config = config_for(dir.path());
        write_artifacts(&config, &LabelMap::from_class_names(["A", "B"]));
        write_test_images(&config.data.test_dir, 1);

        let mut ctx = PipelineContext::new(config);
        ctx.load().unwrap();

        match ctx.predict::<NdArray>(&Default::default()) {
            Err(SeedlingError::LabelMismatch { index, .. }) => assert_eq!(index, 1),
            other => panic!("expected LabelMismatch, got {:?}", other.map(|p| p.len())),
        }
        assert!(!dir.path().join("submission.csv").exists());
    }

    #[test]
    fn test_predict_strict_labels_without_loading() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_for(dir.path());
        config.data.strict_labels = true;
        write_artifacts(&config, &LabelMap::from_class_names(["A", "B"]));
        write_test_images(&config.data.test_dir, 1);

        let ctx = PipelineContext::new(config);
        let result = ctx.predict::<NdArray>(&Default::default());

        assert!(matches!(result, Err(SeedlingError::LabelMismatch { .. })));
    }
}
