//! Logged models: the `MLmodel` descriptor, upload, and registration.

use crate::error::TrackingError;
use crate::persistence::{atomic_write_yaml, collect_files};
use crate::tracking::{ActiveRun, ModelRegistry, ModelVersion, ModelVersionStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// File name of the descriptor written next to every logged model.
pub const MLMODEL_FILE: &str = "MLmodel";

/// One named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

impl ColSpec {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// Input and output schema of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSignature {
    pub inputs: Vec<ColSpec>,
    pub outputs: Vec<ColSpec>,
}

/// Signature as stored in `MLmodel`: each side is a JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedSignature {
    pub inputs: String,
    pub outputs: String,
}

impl ModelSignature {
    pub fn new(inputs: Vec<ColSpec>, outputs: Vec<ColSpec>) -> Self {
        Self { inputs, outputs }
    }

    pub fn to_serialized(&self) -> Result<SerializedSignature, serde_json::Error> {
        Ok(SerializedSignature {
            inputs: serde_json::to_string(&self.inputs)?,
            outputs: serde_json::to_string(&self.outputs)?,
        })
    }
}

impl SerializedSignature {
    pub fn parse(&self) -> Result<ModelSignature, serde_json::Error> {
        Ok(ModelSignature {
            inputs: serde_json::from_str(&self.inputs)?,
            outputs: serde_json::from_str(&self.outputs)?,
        })
    }
}

/// Contents of the `MLmodel` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub artifact_path: String,
    pub flavors: BTreeMap<String, serde_json::Value>,
    pub model_uuid: String,
    #[serde(default)]
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<SerializedSignature>,
    pub utc_time_created: String,
}

impl ModelDescriptor {
    pub fn new(artifact_path: impl Into<String>) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            flavors: BTreeMap::new(),
            model_uuid: uuid::Uuid::new_v4().simple().to_string(),
            run_id: String::new(),
            signature: None,
            utc_time_created: chrono::Utc::now()
                .format("%Y-%m-%d %H:%M:%S%.6f")
                .to_string(),
        }
    }

    pub fn with_flavor(mut self, name: impl Into<String>, config: serde_json::Value) -> Self {
        self.flavors.insert(name.into(), config);
        self
    }

    pub fn with_signature(mut self, signature: &ModelSignature) -> Result<Self, TrackingError> {
        self.signature = Some(signature.to_serialized()?);
        Ok(self)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, TrackingError> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

/// Registering a logged model under a name.
#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    /// Upper bound on waiting for the new version to become READY. Zero skips the wait.
    pub await_for: Duration,
    pub poll_interval: Duration,
}

impl Registration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            await_for: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn await_for(mut self, await_for: Duration) -> Self {
        self.await_for = await_for;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Result of [`log_model`].
#[derive(Debug, Clone)]
pub struct LoggedModel {
    /// `runs:/<run_id>/<artifact_path>`
    pub model_uri: String,
    /// Artifact location the registry version points at.
    pub source: String,
    pub descriptor: ModelDescriptor,
    pub version: Option<ModelVersion>,
}

/// Local directory a run's model is staged in before upload.
pub fn staging_dir(work_dir: &Path, run_id: &str, artifact_path: &str) -> PathBuf {
    work_dir
        .join(".modelops")
        .join("staging")
        .join(run_id)
        .join(artifact_path.trim_matches('/'))
}

/// Upload a staged model directory and optionally register it.
///
/// Writes `MLmodel` into `local_dir`, uploads every file under
/// `descriptor.artifact_path`, then creates the registered model (if new)
/// and a version pointing at this run.
pub async fn log_model(
    run: &ActiveRun<'_>,
    registry: &dyn ModelRegistry,
    local_dir: &Path,
    mut descriptor: ModelDescriptor,
    registration: Option<&Registration>,
) -> Result<LoggedModel, TrackingError> {
    descriptor.run_id = run.run_id().to_string();
    atomic_write_yaml(&local_dir.join(MLMODEL_FILE), &descriptor)?;

    let artifact_path = descriptor.artifact_path.trim_matches('/').to_string();
    for relative in collect_files(local_dir)? {
        let dir = match relative.parent().map(|p| p.to_string_lossy().replace('\\', "/")) {
            Some(parent) if !parent.is_empty() => format!("{artifact_path}/{parent}"),
            _ => artifact_path.clone(),
        };
        run.log_artifact(&local_dir.join(&relative), Some(&dir))
            .await?;
    }

    let model_uri = format!("runs:/{}/{}", run.run_id(), artifact_path);
    let source = format!(
        "{}/{}",
        run.artifact_uri().trim_end_matches('/'),
        artifact_path
    );
    info!(run_id = %run.run_id(), model_uri = %model_uri, "Logged model");

    let version = match registration {
        Some(registration) => Some(register_model(registry, run.run_id(), &source, registration).await?),
        None => None,
    };

    Ok(LoggedModel {
        model_uri,
        source,
        descriptor,
        version,
    })
}

async fn register_model(
    registry: &dyn ModelRegistry,
    run_id: &str,
    source: &str,
    registration: &Registration,
) -> Result<ModelVersion, TrackingError> {
    match registry.create_registered_model(&registration.name).await {
        Ok(_) => info!(model = %registration.name, "Created registered model"),
        Err(e) if e.is_already_exists() => {
            info!(model = %registration.name, "Registered model already exists, adding a version")
        }
        Err(e) => return Err(e),
    }

    let version = registry
        .create_model_version(&registration.name, source, run_id)
        .await?;
    info!(model = %version.name, version = %version.version, "Created model version");

    wait_until_ready(registry, version, registration).await
}

async fn wait_until_ready(
    registry: &dyn ModelRegistry,
    mut version: ModelVersion,
    registration: &Registration,
) -> Result<ModelVersion, TrackingError> {
    if registration.await_for.is_zero() {
        return Ok(version);
    }
    let started = Instant::now();
    loop {
        match version.status {
            ModelVersionStatus::Ready => return Ok(version),
            ModelVersionStatus::FailedRegistration => {
                return Err(TrackingError::invalid_state(format!(
                    "model version {} of '{}' failed registration",
                    version.version, version.name
                )));
            }
            ModelVersionStatus::PendingRegistration => {}
        }
        if started.elapsed() >= registration.await_for {
            warn!(
                model = %version.name,
                version = %version.version,
                waited_secs = registration.await_for.as_secs(),
                "Model version still pending registration"
            );
            return Ok(version);
        }
        tokio::time::sleep(registration.poll_interval).await;
        version = registry
            .get_model_version(&version.name, &version.version)
            .await?;
    }
}
