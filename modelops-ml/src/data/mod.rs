//! Data loading and train/test splitting.

pub mod dataset;
pub mod source;

pub use dataset::{Dataset, DatasetSplit, train_test_split};
pub use source::{CsvSource, DataBatch, DataSource, DataSourceInfo, JsonSource};
