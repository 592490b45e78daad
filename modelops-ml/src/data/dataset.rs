//! Numeric datasets and the seeded train/test split.

use super::source::DataBatch;
use crate::error::MlError;
use ndarray::{Array1, Array2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde_json::Value;

/// Feature matrix plus integer class labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub feature_names: Vec<String>,
    pub features: Array2<f64>,
    pub labels: Array1<i64>,
}

impl Dataset {
    /// Split `batch` into features (every column except `label_column`) and labels.
    pub fn from_batch(batch: &DataBatch, label_column: &str) -> Result<Self, MlError> {
        let label_idx = batch.column_index(label_column).ok_or_else(|| {
            MlError::dataset(format!("label column '{label_column}' not found"))
        })?;
        if batch.rows.is_empty() {
            return Err(MlError::dataset("dataset has no rows"));
        }

        let feature_idx: Vec<usize> = (0..batch.column_count())
            .filter(|&i| i != label_idx)
            .collect();
        let feature_names = feature_idx
            .iter()
            .map(|&i| batch.columns[i].clone())
            .collect();

        let mut features = Array2::<f64>::zeros((batch.row_count(), feature_idx.len()));
        let mut labels = Array1::<i64>::zeros(batch.row_count());
        for (r, row) in batch.rows.iter().enumerate() {
            for (c, &col) in feature_idx.iter().enumerate() {
                features[[r, c]] = parse_feature(&row[col]).ok_or_else(|| {
                    MlError::dataset(format!(
                        "row {r}, column '{}': not a number: {}",
                        batch.columns[col], row[col]
                    ))
                })?;
            }
            labels[r] = parse_label(&row[label_idx]).ok_or_else(|| {
                MlError::dataset(format!(
                    "row {r}, column '{label_column}': not an integer class: {}",
                    row[label_idx]
                ))
            })?;
        }

        Ok(Self {
            feature_names,
            features,
            labels,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Rows at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            feature_names: self.feature_names.clone(),
            features: self.features.select(Axis(0), indices),
            labels: self.labels.select(Axis(0), indices),
        }
    }
}

fn parse_feature(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn parse_label(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| f as i64)
            })
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// The four sides of a train/test split.
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub x_train: Array2<f64>,
    pub x_test: Array2<f64>,
    pub y_train: Array1<i64>,
    pub y_test: Array1<i64>,
    /// Original row indices of the train side.
    pub train_indices: Vec<usize>,
    /// Original row indices of the test side.
    pub test_indices: Vec<usize>,
}

/// Shuffle row indices with `seed` and hold out `ceil(test_size * n)` rows.
pub fn train_test_split(
    dataset: &Dataset,
    test_size: f64,
    seed: u64,
) -> Result<DatasetSplit, MlError> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(MlError::invalid_input(format!(
            "test_size must be in (0, 1), got {test_size}"
        )));
    }
    let n = dataset.len();
    let n_test = (test_size * n as f64).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(MlError::dataset(format!(
            "cannot split {n} rows with test_size {test_size}: one side would be empty"
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let (test_indices, train_indices) = indices.split_at(n_test);

    let train = dataset.select(train_indices);
    let test = dataset.select(test_indices);
    Ok(DatasetSplit {
        x_train: train.features,
        x_test: test.features,
        y_train: train.labels,
        y_test: test.labels,
        train_indices: train_indices.to_vec(),
        test_indices: test_indices.to_vec(),
    })
}
