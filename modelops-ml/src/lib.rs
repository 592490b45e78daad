//! # modelops-ml
//!
//! The two workflows that run against a tracking server: training and
//! registering the diabetes classifier, and packaging the translation
//! model wrapper. Data loading, the logistic-regression solver, metrics,
//! and the confusion-matrix report live here too.

pub mod data;
pub mod error;
pub mod inference;
pub mod training;

pub use data::{CsvSource, DataBatch, DataSource, Dataset, DatasetSplit, JsonSource, train_test_split};
pub use error::MlError;
pub use inference::{PredictModel, Translator, package_translator};
pub use training::{ClassificationMetrics, LogisticRegression, TrainingOutcome, TrainingWorkflow};
