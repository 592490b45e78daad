//! Tracking server abstraction: runs, params, metrics, artifacts, and the model registry.
//!
//! The wire shapes follow the MLflow REST API 2.0 so the same types serve the
//! HTTP client and the in-memory store.

pub mod memory;
pub mod rest;
pub mod run;

pub use memory::InMemoryTrackingStore;
pub use rest::RestTrackingClient;
pub use run::{ActiveRun, resolve_experiment};

use crate::error::TrackingError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Experiment id the server creates on first start.
pub const DEFAULT_EXPERIMENT_ID: &str = "0";

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Scheduled,
    Finished,
    Failed,
    Killed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Killed)
    }
}

/// A named group of runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: String,
    pub name: String,
    #[serde(default)]
    pub artifact_location: Option<String>,
}

/// Run metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub experiment_id: String,
    #[serde(default)]
    pub run_name: Option<String>,
    pub status: RunStatus,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub end_time: Option<i64>,
    /// Root under which the run's artifacts are stored.
    #[serde(default)]
    pub artifact_uri: String,
}

/// A scalar metric sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub key: String,
    pub value: f64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub step: i64,
}

impl Metric {
    pub fn new(key: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            value,
            timestamp: now_millis(),
            step: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub key: String,
    pub value: String,
}

impl Param {
    pub fn new(key: impl Into<String>, value: impl ToString) -> Self {
        Self {
            key: key.into(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTag {
    pub key: String,
    pub value: String,
}

impl RunTag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Everything logged against a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunData {
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub tags: Vec<RunTag>,
}

impl RunData {
    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics.iter().rev().find(|m| m.key == key).map(|m| m.value)
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .rev()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub info: RunInfo,
    #[serde(default)]
    pub data: RunData,
}

/// Registration state of a model version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelVersionStatus {
    PendingRegistration,
    FailedRegistration,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersionTag {
    pub key: String,
    pub value: String,
}

/// One version of a registered model. Always points at exactly one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub name: String,
    /// Server-assigned, monotonically increasing, string-encoded integer.
    pub version: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_version_status")]
    pub status: ModelVersionStatus,
    #[serde(default = "default_stage")]
    pub current_stage: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<ModelVersionTag>,
    #[serde(default)]
    pub creation_timestamp: Option<i64>,
}

fn default_version_status() -> ModelVersionStatus {
    ModelVersionStatus::Ready
}

fn default_stage() -> String {
    "None".to_string()
}

impl ModelVersion {
    /// Numeric value of `version`; unparsable versions sort first.
    pub fn version_number(&self) -> u64 {
        self.version.parse().unwrap_or(0)
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredModel {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub latest_versions: Vec<ModelVersion>,
}

/// Run and artifact side of a tracking server.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Look up an experiment by name. `Ok(None)` when it does not exist.
    async fn get_experiment_by_name(&self, name: &str)
    -> Result<Option<Experiment>, TrackingError>;

    /// Create an experiment and return its id.
    async fn create_experiment(&self, name: &str) -> Result<String, TrackingError>;

    async fn create_run(
        &self,
        experiment_id: &str,
        run_name: Option<&str>,
        start_time: i64,
        tags: &[RunTag],
    ) -> Result<RunInfo, TrackingError>;

    async fn update_run(
        &self,
        run_id: &str,
        status: RunStatus,
        end_time: i64,
    ) -> Result<RunInfo, TrackingError>;

    async fn get_run(&self, run_id: &str) -> Result<Run, TrackingError>;

    async fn set_tag(&self, run_id: &str, tag: &RunTag) -> Result<(), TrackingError>;

    async fn log_param(&self, run_id: &str, param: &Param) -> Result<(), TrackingError>;

    async fn log_metric(&self, run_id: &str, metric: &Metric) -> Result<(), TrackingError>;

    /// Upload a local file under the run's artifact root.
    ///
    /// `artifact_path` is the directory inside the root; `None` stores the file at the top.
    async fn log_artifact(
        &self,
        run: &RunInfo,
        local_path: &Path,
        artifact_path: Option<&str>,
    ) -> Result<(), TrackingError>;
}

/// Versioned model catalog.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    async fn create_registered_model(&self, name: &str)
    -> Result<RegisteredModel, TrackingError>;

    async fn create_model_version(
        &self,
        name: &str,
        source: &str,
        run_id: &str,
    ) -> Result<ModelVersion, TrackingError>;

    async fn get_model_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<ModelVersion, TrackingError>;

    /// Latest version per stage; every stage when `stages` is empty.
    async fn get_latest_versions(
        &self,
        name: &str,
        stages: &[String],
    ) -> Result<Vec<ModelVersion>, TrackingError>;

    async fn update_model_version(
        &self,
        name: &str,
        version: &str,
        description: &str,
    ) -> Result<ModelVersion, TrackingError>;

    async fn set_model_version_tag(
        &self,
        name: &str,
        version: &str,
        key: &str,
        value: &str,
    ) -> Result<(), TrackingError>;
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Join an artifact directory and a file name with `/`, skipping empty parts.
pub(crate) fn join_artifact_path(artifact_path: Option<&str>, file_name: &str) -> String {
    match artifact_path.map(|p| p.trim_matches('/')) {
        Some(dir) if !dir.is_empty() => format!("{dir}/{file_name}"),
        _ => file_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&RunStatus::Finished).unwrap(),
            "\"FINISHED\""
        );
        let status: ModelVersionStatus = serde_json::from_str("\"PENDING_REGISTRATION\"").unwrap();
        assert_eq!(status, ModelVersionStatus::PendingRegistration);
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn test_model_version_parses_server_shape() {
        let json = r#"{
            "name": "diabetes-model",
            "version": "12",
            "creation_timestamp": 1700000000000,
            "current_stage": "None",
            "source": "mlflow-artifacts:/0/abc/artifacts/model",
            "run_id": "abc",
            "status": "READY"
        }"#;
        let mv: ModelVersion = serde_json::from_str(json).unwrap();
        assert_eq!(mv.version_number(), 12);
        assert_eq!(mv.run_id.as_deref(), Some("abc"));
        assert!(mv.tags.is_empty());
        assert!(mv.description.is_none());
    }

    #[test]
    fn test_run_data_lookups() {
        let data = RunData {
            metrics: vec![Metric::new("precision", 0.5), Metric::new("precision", 0.75)],
            params: vec![Param::new("max_iter", 1000)],
            tags: vec![RunTag::new("team", "a_team")],
        };
        assert_eq!(data.metric("precision"), Some(0.75));
        assert_eq!(data.param("max_iter"), Some("1000"));
        assert_eq!(data.tag("team"), Some("a_team"));
        assert_eq!(data.metric("recall"), None);
    }

    #[test]
    fn test_join_artifact_path() {
        assert_eq!(join_artifact_path(None, "report.svg"), "report.svg");
        assert_eq!(join_artifact_path(Some(""), "report.svg"), "report.svg");
        assert_eq!(join_artifact_path(Some("model/"), "MLmodel"), "model/MLmodel");
    }
}
