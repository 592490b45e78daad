//! Model fitting, evaluation, and the tracked training workflow.

pub mod logistic;
pub mod metrics;
pub mod report;
pub mod workflow;

pub use logistic::LogisticRegression;
pub use metrics::{
    Average, ClassificationMetrics, ClassificationReport, classification_report, confusion_matrix,
    precision_recall_fscore,
};
pub use workflow::{TrainingOutcome, TrainingWorkflow};
