//! Classification metrics.

use crate::error::MlError;
use serde::{Deserialize, Serialize};

/// How per-class scores are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Average {
    /// Unweighted mean over classes.
    Macro,
    /// Mean weighted by class support.
    Weighted,
}

/// Precision, recall, F1 and support for one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassScores {
    pub label: i64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

/// Summary metrics for a binary or multiclass prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    /// Macro-averaged.
    pub precision: f64,
    /// Macro-averaged.
    pub recall: f64,
    /// Macro-averaged.
    pub f1_score: f64,
    pub labels: Vec<i64>,
    pub confusion_matrix: Vec<Vec<usize>>,
}

impl ClassificationMetrics {
    pub fn evaluate(y_true: &[i64], y_pred: &[i64]) -> Result<Self, MlError> {
        let labels = unique_labels(y_true, y_pred);
        let matrix = confusion_matrix(y_true, y_pred, &labels)?;
        let (precision, recall, f1_score) = average(&per_class(&matrix, &labels), Average::Macro);
        Ok(Self {
            accuracy: accuracy(y_true, y_pred)?,
            precision,
            recall,
            f1_score,
            labels,
            confusion_matrix: matrix,
        })
    }

    /// Metric names and values as logged on a training run.
    pub fn run_metrics(&self) -> [(&'static str, f64); 4] {
        [
            ("precision", self.precision),
            ("recall", self.recall),
            ("f1", self.f1_score),
            ("accuracy", self.accuracy),
        ]
    }
}

/// Per-class scores plus the overall rows of a classification report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub classes: Vec<ClassScores>,
    pub accuracy: f64,
    pub macro_avg: ClassScores,
    pub weighted_avg: ClassScores,
}

impl std::fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{:>14} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        for scores in &self.classes {
            write_row(f, &scores.label.to_string(), scores)?;
        }
        let total = self.macro_avg.support;
        writeln!(f)?;
        writeln!(
            f,
            "{:>14} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, total
        )?;
        write_row(f, "macro avg", &self.macro_avg)?;
        write_row(f, "weighted avg", &self.weighted_avg)
    }
}

fn write_row(f: &mut std::fmt::Formatter<'_>, name: &str, s: &ClassScores) -> std::fmt::Result {
    writeln!(
        f,
        "{:>14} {:>9.2} {:>9.2} {:>9.2} {:>9}",
        name, s.precision, s.recall, s.f1_score, s.support
    )
}

/// Sorted union of the labels in both sequences.
pub fn unique_labels(y_true: &[i64], y_pred: &[i64]) -> Vec<i64> {
    let mut labels: Vec<i64> = y_true.iter().chain(y_pred).copied().collect();
    labels.sort_unstable();
    labels.dedup();
    labels
}

fn check_lengths(y_true: &[i64], y_pred: &[i64]) -> Result<(), MlError> {
    if y_true.len() != y_pred.len() {
        return Err(MlError::invalid_input(format!(
            "y_true has {} labels but y_pred has {}",
            y_true.len(),
            y_pred.len()
        )));
    }
    if y_true.is_empty() {
        return Err(MlError::invalid_input("cannot score an empty prediction"));
    }
    Ok(())
}

pub fn accuracy(y_true: &[i64], y_pred: &[i64]) -> Result<f64, MlError> {
    check_lengths(y_true, y_pred)?;
    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    Ok(correct as f64 / y_true.len() as f64)
}

/// Counts indexed `[true][predicted]` in `labels` order.
///
/// Pairs whose labels are not in `labels` are ignored.
pub fn confusion_matrix(
    y_true: &[i64],
    y_pred: &[i64],
    labels: &[i64],
) -> Result<Vec<Vec<usize>>, MlError> {
    check_lengths(y_true, y_pred)?;
    let mut matrix = vec![vec![0usize; labels.len()]; labels.len()];
    for (t, p) in y_true.iter().zip(y_pred) {
        let (Some(i), Some(j)) = (
            labels.iter().position(|l| l == t),
            labels.iter().position(|l| l == p),
        ) else {
            continue;
        };
        matrix[i][j] += 1;
    }
    Ok(matrix)
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn per_class(matrix: &[Vec<usize>], labels: &[i64]) -> Vec<ClassScores> {
    labels
        .iter()
        .enumerate()
        .map(|(k, &label)| {
            let tp = matrix[k][k];
            let predicted: usize = matrix.iter().map(|row| row[k]).sum();
            let support: usize = matrix[k].iter().sum();
            let precision = ratio(tp, predicted);
            let recall = ratio(tp, support);
            let f1_score = if precision + recall == 0.0 {
                0.0
            } else {
                2.0 * precision * recall / (precision + recall)
            };
            ClassScores {
                label,
                precision,
                recall,
                f1_score,
                support,
            }
        })
        .collect()
}

fn average(scores: &[ClassScores], avg: Average) -> (f64, f64, f64) {
    let weights: Vec<f64> = match avg {
        Average::Macro => vec![1.0; scores.len()],
        Average::Weighted => scores.iter().map(|s| s.support as f64).collect(),
    };
    let total: f64 = weights.iter().sum();
    if total == 0.0 {
        return (0.0, 0.0, 0.0);
    }
    let mean = |f: fn(&ClassScores) -> f64| {
        scores.iter().zip(&weights).map(|(s, w)| f(s) * w).sum::<f64>() / total
    };
    (
        mean(|s| s.precision),
        mean(|s| s.recall),
        mean(|s| s.f1_score),
    )
}

/// Averaged precision, recall and F1. Zero denominators score 0.
pub fn precision_recall_fscore(
    y_true: &[i64],
    y_pred: &[i64],
    avg: Average,
) -> Result<(f64, f64, f64), MlError> {
    let labels = unique_labels(y_true, y_pred);
    let matrix = confusion_matrix(y_true, y_pred, &labels)?;
    Ok(average(&per_class(&matrix, &labels), avg))
}

pub fn classification_report(
    y_true: &[i64],
    y_pred: &[i64],
) -> Result<ClassificationReport, MlError> {
    let labels = unique_labels(y_true, y_pred);
    let matrix = confusion_matrix(y_true, y_pred, &labels)?;
    let classes = per_class(&matrix, &labels);
    let support = y_true.len();

    let summary = |avg| {
        let (precision, recall, f1_score) = average(&classes, avg);
        ClassScores {
            label: -1,
            precision,
            recall,
            f1_score,
            support,
        }
    };
    let macro_avg = summary(Average::Macro);
    let weighted_avg = summary(Average::Weighted);

    Ok(ClassificationReport {
        accuracy: accuracy(y_true, y_pred)?,
        classes,
        macro_avg,
        weighted_avg,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const TRUE: [i64; 8] = [0, 0, 0, 0, 1, 1, 1, 0];
    const PRED: [i64; 8] = [0, 0, 1, 0, 1, 0, 1, 0];

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_confusion_matrix() {
        let m = confusion_matrix(&TRUE, &PRED, &[0, 1]).unwrap();
        assert_eq!(m, vec![vec![4, 1], vec![1, 2]]);
    }

    #[test]
    fn test_confusion_matrix_keeps_absent_labels() {
        let m = confusion_matrix(&[0, 0, 0], &[0, 0, 0], &[0, 1]).unwrap();
        assert_eq!(m, vec![vec![3, 0], vec![0, 0]]);
        let evaluated = ClassificationMetrics::evaluate(&[0, 0, 0], &[0, 0, 0]).unwrap();
        assert_eq!(evaluated.confusion_matrix, vec![vec![3]]);
    }

    #[test]
    fn test_macro_and_weighted() {
        // class 0: p = 4/5, r = 4/5; class 1: p = 2/3, r = 2/3
        let (p, r, f) = precision_recall_fscore(&TRUE, &PRED, Average::Macro).unwrap();
        assert!(close(p, (0.8 + 2.0 / 3.0) / 2.0));
        assert!(close(r, p));
        assert!(close(f, p));

        let (p, _, _) = precision_recall_fscore(&TRUE, &PRED, Average::Weighted).unwrap();
        assert!(close(p, (0.8 * 5.0 + 2.0 / 3.0 * 3.0) / 8.0));
    }

    #[test]
    fn test_zero_denominator_scores_zero() {
        // Class 1 is never predicted: its precision is 0, not NaN.
        let (p, r, f) = precision_recall_fscore(&[0, 1, 1], &[0, 0, 0], Average::Macro).unwrap();
        assert!(close(p, (1.0 / 3.0) / 2.0));
        assert!(close(r, 0.5));
        assert!(f.is_finite());
    }

    #[test]
    fn test_evaluate() {
        let metrics = ClassificationMetrics::evaluate(&TRUE, &PRED).unwrap();
        assert!(close(metrics.accuracy, 0.75));
        assert_eq!(metrics.labels, vec![0, 1]);
        let names: Vec<&str> = metrics.run_metrics().iter().map(|(k, _)| *k).collect();
        assert_eq!(names, vec!["precision", "recall", "f1", "accuracy"]);
    }

    #[test]
    fn test_report() {
        let report = classification_report(&TRUE, &PRED).unwrap();
        assert_eq!(report.classes.len(), 2);
        assert_eq!(report.classes[1].support, 3);
        assert_eq!(report.macro_avg.support, 8);
        let text = report.to_string();
        assert!(text.contains("macro avg"));
        assert!(text.contains("weighted avg"));
    }

    #[test]
    fn test_length_mismatch() {
        assert!(accuracy(&[0, 1], &[0]).is_err());
        assert!(accuracy(&[], &[]).is_err());
    }

    proptest! {
        #[test]
        fn scores_are_bounded(pairs in prop::collection::vec((0i64..3, 0i64..3), 1..100)) {
            let (t, p): (Vec<i64>, Vec<i64>) = pairs.into_iter().unzip();
            for avg in [Average::Macro, Average::Weighted] {
                let (precision, recall, f1) = precision_recall_fscore(&t, &p, avg).unwrap();
                for v in [precision, recall, f1] {
                    prop_assert!((0.0..=1.0).contains(&v));
                }
            }
            let m = confusion_matrix(&t, &p, &unique_labels(&t, &p)).unwrap();
            prop_assert_eq!(m.iter().flatten().sum::<usize>(), t.len());
        }

        #[test]
        fn perfect_prediction_scores_one(labels in prop::collection::vec(0i64..4, 1..50)) {
            let metrics = ClassificationMetrics::evaluate(&labels, &labels).unwrap();
            prop_assert!(close(metrics.precision, 1.0));
            prop_assert!(close(metrics.recall, 1.0));
            prop_assert!(close(metrics.accuracy, 1.0));
        }
    }
}
