//! Metrics Module for Model Evaluation
//!
//! - Thresholded precision, recall and F1 over probability vectors
//! - Confusion matrix with per-class precision/recall/F1
//! - Macro, micro and weighted F1
//! - Running averages for the training loop

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Divide, mapping the 0/0 case (and any zero denominator) to 0
fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Harmonic mean of precision and recall; 0 when both are 0
pub fn f1_score(precision: f64, recall: f64) -> f64 {
    safe_ratio(2.0 * precision * recall, precision + recall)
}

/// Precision/recall/F1 over element-wise thresholded probability vectors
///
/// Each value is clipped to [0, 1] and rounded half to even before
/// counting, so the inputs may be one-hot labels, softmax outputs or raw
/// scores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdedScores {
    pub true_positives: usize,
    pub predicted_positives: usize,
    pub actual_positives: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl ThresholdedScores {
    /// Score a batch of (true, predicted) probability vectors
    pub fn from_probabilities(y_true: &[Vec<f32>], y_pred: &[Vec<f32>]) -> Self {
        // Half rounds to even, so an exact 0.5 counts as negative
        let threshold = |v: f32| v.clamp(0.0, 1.0).round_ties_even() == 1.0;

        let mut true_positives = 0;
        let mut predicted_positives = 0;
        let mut actual_positives = 0;

        for (truth, pred) in y_true.iter().zip(y_pred.iter()) {
            for (&t, &p) in truth.iter().zip(pred.iter()) {
                let t = threshold(t);
                let p = threshold(p);
                if t && p {
                    true_positives += 1;
                }
                if p {
                    predicted_positives += 1;
                }
                if t {
                    actual_positives += 1;
                }
            }
        }

        let precision = safe_ratio(true_positives as f64, predicted_positives as f64);
        let recall = safe_ratio(true_positives as f64, actual_positives as f64);

        Self {
            true_positives,
            predicted_positives,
            actual_positives,
            precision,
            recall,
            f1: f1_score(precision, recall),
        }
    }
}

/// Evaluation metrics for a multi-class classifier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    /// Total number of samples evaluated
    pub total_samples: usize,

    /// Number of correct predictions
    pub correct_predictions: usize,

    /// Overall accuracy (correct / total)
    pub accuracy: f64,

    /// Average loss, when the caller tracked one
    pub loss: Option<f64>,

    /// Macro-averaged precision over classes with support
    pub macro_precision: f64,

    /// Macro-averaged recall
    pub macro_recall: f64,

    /// Macro-averaged F1-score
    pub macro_f1: f64,

    /// Micro-averaged F1 (pooled counts across classes)
    pub micro_f1: f64,

    /// Weighted F1-score (weighted by class support)
    pub weighted_f1: f64,

    /// Per-class metrics
    pub per_class: Vec<ClassMetrics>,

    /// Confusion matrix
    pub confusion_matrix: ConfusionMatrix,
}

impl Metrics {
    /// Create metrics from predicted and ground-truth label indices
    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Self {
        assert_eq!(
            predictions.len(),
            ground_truth.len(),
            "Predictions and ground truth must have same length"
        );

        let total_samples = predictions.len();
        if total_samples == 0 {
            return Self {
                confusion_matrix: ConfusionMatrix::new(num_classes),
                ..Self::default()
            };
        }

        let confusion_matrix =
            ConfusionMatrix::from_predictions(predictions, ground_truth, num_classes);
        let correct_predictions = confusion_matrix.correct();
        let accuracy = correct_predictions as f64 / total_samples as f64;

        let per_class: Vec<ClassMetrics> = (0..num_classes)
            .map(|class_idx| ClassMetrics::from_confusion_matrix(&confusion_matrix, class_idx))
            .collect();

        let supported: Vec<&ClassMetrics> = per_class.iter().filter(|m| m.support > 0).collect();
        let num_supported = supported.len() as f64;

        let macro_precision =
            safe_ratio(supported.iter().map(|m| m.precision).sum(), num_supported);
        let macro_recall = safe_ratio(supported.iter().map(|m| m.recall).sum(), num_supported);
        let macro_f1 = safe_ratio(supported.iter().map(|m| m.f1).sum(), num_supported);

        let tp: usize = per_class.iter().map(|m| m.true_positives).sum();
        let fp: usize = per_class.iter().map(|m| m.false_positives).sum();
        let fn_: usize = per_class.iter().map(|m| m.false_negatives).sum();
        let micro_precision = safe_ratio(tp as f64, (tp + fp) as f64);
        let micro_recall = safe_ratio(tp as f64, (tp + fn_) as f64);
        let micro_f1 = f1_score(micro_precision, micro_recall);

        let total_support: usize = per_class.iter().map(|m| m.support).sum();
        let weighted_f1 = safe_ratio(
            per_class.iter().map(|m| m.f1 * m.support as f64).sum(),
            total_support as f64,
        );

        Self {
            total_samples,
            correct_predictions,
            accuracy,
            loss: None,
            macro_precision,
            macro_recall,
            macro_f1,
            micro_f1,
            weighted_f1,
            per_class,
            confusion_matrix,
        }
    }

    /// Attach class names to the per-class entries
    pub fn with_class_names(mut self, names: &[String]) -> Self {
        for class in &mut self.per_class {
            class.class_name = names.get(class.class_idx).cloned();
        }
        self
    }

    /// Pretty print metrics
    pub fn display(&self) -> String {
        let mut output = String::new();

        output.push_str("╔══════════════════════════════════════════════╗\n");
        output.push_str("║              Evaluation Metrics              ║\n");
        output.push_str("╠══════════════════════════════════════════════╣\n");
        output.push_str(&format!("║ Accuracy:          {:6.2}%                   ║\n", self.accuracy * 100.0));
        output.push_str(&format!("║ Macro Precision:   {:6.2}%                   ║\n", self.macro_precision * 100.0));
        output.push_str(&format!("║ Macro Recall:      {:6.2}%                   ║\n", self.macro_recall * 100.0));
        output.push_str(&format!("║ Macro F1:          {:6.4}                    ║\n", self.macro_f1));
        output.push_str(&format!("║ Micro F1:          {:6.4}                    ║\n", self.micro_f1));
        output.push_str(&format!("║ Weighted F1:       {:6.4}                    ║\n", self.weighted_f1));
        output.push_str(&format!("║ Total Samples:     {:6}                    ║\n", self.total_samples));
        output.push_str("╚══════════════════════════════════════════════╝\n");

        for class in self.per_class.iter().filter(|c| c.support > 0) {
            let name = class
                .class_name
                .clone()
                .unwrap_or_else(|| class.class_idx.to_string());
            output.push_str(&format!(
                "  {:28} P={:.3} R={:.3} F1={:.3} (n={})\n",
                name, class.precision, class.recall, class.f1, class.support
            ));
        }

        output
    }
}

impl std::fmt::Display for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// Per-class metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassMetrics {
    /// Class index
    pub class_idx: usize,

    /// Class name (if available)
    pub class_name: Option<String>,

    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub true_negatives: usize,

    /// Precision = TP / (TP + FP)
    pub precision: f64,

    /// Recall = TP / (TP + FN)
    pub recall: f64,

    /// F1 = 2 * (precision * recall) / (precision + recall)
    pub f1: f64,

    /// Support = number of actual samples of this class
    pub support: usize,
}

impl ClassMetrics {
    /// Calculate metrics for a class from confusion matrix
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize) -> Self {
        let true_positives = cm.get(class_idx, class_idx);

        // Predicted as this class but actually another one
        let false_positives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(i, class_idx))
            .sum();

        // Actually this class but predicted as another one
        let false_negatives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(class_idx, i))
            .sum();

        let true_negatives = cm.total() - true_positives - false_positives - false_negatives;
        let support = true_positives + false_negatives;

        let precision = safe_ratio(true_positives as f64, (true_positives + false_positives) as f64);
        let recall = safe_ratio(true_positives as f64, support as f64);

        Self {
            class_idx,
            class_name: None,
            true_positives,
            false_positives,
            false_negatives,
            true_negatives,
            precision,
            recall,
            f1: f1_score(precision, recall),
            support,
        }
    }
}

/// Confusion Matrix for multi-class classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Number of classes
    pub num_classes: usize,

    /// Row = actual, column = predicted, flat row-major storage
    pub matrix: Vec<usize>,
}

impl Default for ConfusionMatrix {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ConfusionMatrix {
    /// Create a new empty confusion matrix
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    /// Create confusion matrix from predictions and ground truth
    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Self {
        let mut cm = Self::new(num_classes);

        for (&pred, &actual) in predictions.iter().zip(ground_truth.iter()) {
            cm.add(actual, pred);
        }

        cm
    }

    /// Add a single prediction to the matrix; out-of-range labels are ignored
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted] += 1;
        }
    }

    /// Get the count at (actual, predicted)
    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Diagonal sum
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    pub fn accuracy(&self) -> f64 {
        safe_ratio(self.correct() as f64, self.total() as f64)
    }

    /// Pretty print the confusion matrix
    pub fn display(&self, class_names: Option<&[String]>) -> String {
        let mut output = String::new();

        output.push_str("\nConfusion Matrix (rows=actual, cols=predicted):\n\n");

        let short = |idx: usize, width: usize| -> String {
            match class_names.and_then(|names| names.get(idx)) {
                Some(name) => name.chars().take(width).collect(),
                None => idx.to_string(),
            }
        };

        output.push_str("          ");
        for col in 0..self.num_classes {
            output.push_str(&format!("{:>6}", short(col, 6)));
        }
        output.push('\n');

        for row in 0..self.num_classes {
            output.push_str(&format!("{:>8} ", short(row, 8)));

            for col in 0..self.num_classes {
                let count = self.get(row, col);
                if row == col {
                    output.push_str(&format!("[{:>4}]", count));
                } else if count > 0 {
                    output.push_str(&format!(" {:>4} ", count));
                } else {
                    output.push_str("    . ");
                }
            }
            output.push('\n');
        }

        output.push_str(&format!("\nAccuracy: {:.2}%\n", self.accuracy() * 100.0));

        output
    }

    /// Save confusion matrix to CSV, labelling rows and columns by class name when given
    pub fn save_csv(&self, path: &Path, class_names: Option<&[String]>) -> std::io::Result<()> {
        let label = |idx: usize| -> String {
            class_names
                .and_then(|names| names.get(idx))
                .cloned()
                .unwrap_or_else(|| idx.to_string())
        };

        let mut content = String::from("actual\\predicted");
        for col in 0..self.num_classes {
            content.push_str(&format!(",{}", label(col)));
        }
        content.push('\n');

        for row in 0..self.num_classes {
            content.push_str(&label(row));
            for col in 0..self.num_classes {
                content.push_str(&format!(",{}", self.get(row, col)));
            }
            content.push('\n');
        }

        std::fs::write(path, content)
    }
}

impl std::fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display(None))
    }
}

/// Running average for tracking loss during training
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn average(&self) -> f64 {
        safe_ratio(self.sum, self.count as f64)
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Accuracy tracker for training
#[derive(Debug, Clone, Default)]
pub struct AccuracyTracker {
    correct: usize,
    total: usize,
}

impl AccuracyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a batch of predictions
    pub fn add_batch(&mut self, predictions: &[usize], ground_truth: &[usize]) {
        for (pred, gt) in predictions.iter().zip(ground_truth.iter()) {
            self.total += 1;
            if pred == gt {
                self.correct += 1;
            }
        }
    }

    pub fn accuracy(&self) -> f64 {
        safe_ratio(self.correct as f64, self.total as f64)
    }

    pub fn count(&self) -> usize {
        self.total
    }
}
