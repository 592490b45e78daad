//! In-memory tracking server for tests and offline dry runs.

use super::{
    DEFAULT_EXPERIMENT_ID, Experiment, Metric, ModelRegistry, ModelVersion, ModelVersionStatus,
    ModelVersionTag, Param, RegisteredModel, Run, RunData, RunInfo, RunStatus, RunTag,
    TrackingStore, join_artifact_path, now_millis,
};
use crate::error::TrackingError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct ModelEntry {
    versions: Vec<ModelVersion>,
}

#[derive(Debug)]
struct MemoryState {
    experiments: Vec<Experiment>,
    runs: HashMap<String, Run>,
    artifacts: HashMap<String, BTreeMap<String, Vec<u8>>>,
    models: BTreeMap<String, ModelEntry>,
    /// Remaining `get_model_version` polls before a pending version turns READY.
    pending: HashMap<(String, String), u32>,
}

/// Tracking server held entirely in process memory.
///
/// Mirrors the server semantics the workflows rely on: run ids are unique,
/// versions number upward from 1 per model, params are write-once.
pub struct InMemoryTrackingStore {
    state: Mutex<MemoryState>,
    registration_polls: u32,
}

impl InMemoryTrackingStore {
    /// Create a store holding only the default experiment.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                experiments: vec![Experiment {
                    experiment_id: DEFAULT_EXPERIMENT_ID.to_string(),
                    name: "Default".to_string(),
                    artifact_location: Some(format!("memory:/{DEFAULT_EXPERIMENT_ID}")),
                }],
                runs: HashMap::new(),
                artifacts: HashMap::new(),
                models: BTreeMap::new(),
                pending: HashMap::new(),
            }),
            registration_polls: 0,
        }
    }

    /// New versions stay `PENDING_REGISTRATION` for `polls` lookups.
    pub fn with_registration_delay(mut self, polls: u32) -> Self {
        self.registration_polls = polls;
        self
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of every run.
    pub fn runs(&self) -> Vec<Run> {
        let mut runs: Vec<Run> = self.state().runs.values().cloned().collect();
        runs.sort_by_key(|r| r.info.start_time);
        runs
    }

    /// Bytes of one stored artifact.
    pub fn artifact(&self, run_id: &str, path: &str) -> Option<Vec<u8>> {
        self.state()
            .artifacts
            .get(run_id)
            .and_then(|files| files.get(path).cloned())
    }

    /// Sorted artifact paths stored for a run.
    pub fn artifact_paths(&self, run_id: &str) -> Vec<String> {
        self.state()
            .artifacts
            .get(run_id)
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Every version of a model, oldest first.
    pub fn model_versions(&self, name: &str) -> Vec<ModelVersion> {
        self.state()
            .models
            .get(name)
            .map(|m| m.versions.clone())
            .unwrap_or_default()
    }

    fn run_not_found(run_id: &str) -> TrackingError {
        TrackingError::not_found(format!("Run '{run_id}' not found"))
    }

    fn model_not_found(name: &str) -> TrackingError {
        TrackingError::not_found(format!("Registered Model with name={name} not found"))
    }
}

impl Default for InMemoryTrackingStore {
    fn default() -> Self {
        Self::new()
    }
}

fn version_mut<'a>(
    state: &'a mut MemoryState,
    name: &str,
    version: &str,
) -> Result<&'a mut ModelVersion, TrackingError> {
    state
        .models
        .get_mut(name)
        .and_then(|m| m.versions.iter_mut().find(|v| v.version == version))
        .ok_or_else(|| {
            TrackingError::not_found(format!("Model Version (name={name}, version={version}) not found"))
        })
}

#[async_trait]
impl TrackingStore for InMemoryTrackingStore {
    async fn get_experiment_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Experiment>, TrackingError> {
        Ok(self
            .state()
            .experiments
            .iter()
            .find(|e| e.name == name)
            .cloned())
    }

    async fn create_experiment(&self, name: &str) -> Result<String, TrackingError> {
        let mut state = self.state();
        if state.experiments.iter().any(|e| e.name == name) {
            return Err(TrackingError::AlreadyExists(format!(
                "Experiment '{name}' already exists"
            )));
        }
        let id = state.experiments.len().to_string();
        state.experiments.push(Experiment {
            experiment_id: id.clone(),
            name: name.to_string(),
            artifact_location: Some(format!("memory:/{id}")),
        });
        Ok(id)
    }

    async fn create_run(
        &self,
        experiment_id: &str,
        run_name: Option<&str>,
        start_time: i64,
        tags: &[RunTag],
    ) -> Result<RunInfo, TrackingError> {
        let mut state = self.state();
        if !state
            .experiments
            .iter()
            .any(|e| e.experiment_id == experiment_id)
        {
            return Err(TrackingError::not_found(format!(
                "Experiment '{experiment_id}' not found"
            )));
        }
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let info = RunInfo {
            run_id: run_id.clone(),
            experiment_id: experiment_id.to_string(),
            run_name: run_name.map(str::to_string),
            status: RunStatus::Running,
            start_time: Some(start_time),
            end_time: None,
            artifact_uri: format!("memory:/{experiment_id}/{run_id}/artifacts"),
        };
        state.runs.insert(
            run_id,
            Run {
                info: info.clone(),
                data: RunData {
                    tags: tags.to_vec(),
                    ..Default::default()
                },
            },
        );
        Ok(info)
    }

    async fn update_run(
        &self,
        run_id: &str,
        status: RunStatus,
        end_time: i64,
    ) -> Result<RunInfo, TrackingError> {
        let mut state = self.state();
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| Self::run_not_found(run_id))?;
        run.info.status = status;
        if status.is_terminal() {
            run.info.end_time = Some(end_time);
        }
        Ok(run.info.clone())
    }

    async fn get_run(&self, run_id: &str) -> Result<Run, TrackingError> {
        self.state()
            .runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| Self::run_not_found(run_id))
    }

    async fn set_tag(&self, run_id: &str, tag: &RunTag) -> Result<(), TrackingError> {
        let mut state = self.state();
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| Self::run_not_found(run_id))?;
        run.data.tags.retain(|t| t.key != tag.key);
        run.data.tags.push(tag.clone());
        Ok(())
    }

    async fn log_param(&self, run_id: &str, param: &Param) -> Result<(), TrackingError> {
        let mut state = self.state();
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| Self::run_not_found(run_id))?;
        let existing = run
            .data
            .params
            .iter()
            .find(|p| p.key == param.key)
            .map(|p| p.value.clone());
        match existing {
            Some(existing) if existing != param.value => Err(TrackingError::Api {
                status: 400,
                error_code: "INVALID_PARAMETER_VALUE".to_string(),
                message: format!(
                    "Changing param values is not allowed. Param with key='{}' was already logged with value='{}'",
                    param.key, existing
                ),
            }),
            Some(_) => Ok(()),
            None => {
                run.data.params.push(param.clone());
                Ok(())
            }
        }
    }

    async fn log_metric(&self, run_id: &str, metric: &Metric) -> Result<(), TrackingError> {
        let mut state = self.state();
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| Self::run_not_found(run_id))?;
        run.data.metrics.push(metric.clone());
        Ok(())
    }

    async fn log_artifact(
        &self,
        run: &RunInfo,
        local_path: &Path,
        artifact_path: Option<&str>,
    ) -> Result<(), TrackingError> {
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                TrackingError::invalid_state(format!(
                    "artifact path has no file name: {}",
                    local_path.display()
                ))
            })?;
        let bytes = tokio::fs::read(local_path).await?;

        let mut state = self.state();
        if !state.runs.contains_key(&run.run_id) {
            return Err(Self::run_not_found(&run.run_id));
        }
        state
            .artifacts
            .entry(run.run_id.clone())
            .or_default()
            .insert(join_artifact_path(artifact_path, &file_name), bytes);
        Ok(())
    }
}

#[async_trait]
impl ModelRegistry for InMemoryTrackingStore {
    async fn create_registered_model(
        &self,
        name: &str,
    ) -> Result<RegisteredModel, TrackingError> {
        let mut state = self.state();
        if state.models.contains_key(name) {
            return Err(TrackingError::AlreadyExists(format!(
                "Registered Model (name={name}) already exists."
            )));
        }
        state.models.insert(name.to_string(), ModelEntry::default());
        Ok(RegisteredModel {
            name: name.to_string(),
            description: None,
            latest_versions: Vec::new(),
        })
    }

    async fn create_model_version(
        &self,
        name: &str,
        source: &str,
        run_id: &str,
    ) -> Result<ModelVersion, TrackingError> {
        let polls = self.registration_polls;
        let mut state = self.state();
        let entry = state
            .models
            .get_mut(name)
            .ok_or_else(|| Self::model_not_found(name))?;
        let next = entry
            .versions
            .iter()
            .map(ModelVersion::version_number)
            .max()
            .unwrap_or(0)
            + 1;
        let version = ModelVersion {
            name: name.to_string(),
            version: next.to_string(),
            run_id: Some(run_id.to_string()),
            source: Some(source.to_string()),
            status: if polls > 0 {
                ModelVersionStatus::PendingRegistration
            } else {
                ModelVersionStatus::Ready
            },
            current_stage: "None".to_string(),
            description: None,
            tags: Vec::new(),
            creation_timestamp: Some(now_millis()),
        };
        entry.versions.push(version.clone());
        if polls > 0 {
            state
                .pending
                .insert((name.to_string(), version.version.clone()), polls);
        }
        Ok(version)
    }

    async fn get_model_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<ModelVersion, TrackingError> {
        let mut state = self.state();
        let key = (name.to_string(), version.to_string());
        let ready = match state.pending.get_mut(&key) {
            Some(remaining) => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
            None => false,
        };
        if ready {
            state.pending.remove(&key);
        }
        let mv = version_mut(&mut state, name, version)?;
        if ready {
            mv.status = ModelVersionStatus::Ready;
        }
        Ok(mv.clone())
    }

    async fn get_latest_versions(
        &self,
        name: &str,
        stages: &[String],
    ) -> Result<Vec<ModelVersion>, TrackingError> {
        let state = self.state();
        let entry = state
            .models
            .get(name)
            .ok_or_else(|| Self::model_not_found(name))?;
        let mut latest: BTreeMap<&str, &ModelVersion> = BTreeMap::new();
        for version in &entry.versions {
            if !stages.is_empty() && !stages.iter().any(|s| s == &version.current_stage) {
                continue;
            }
            let slot = latest.entry(version.current_stage.as_str()).or_insert(version);
            if version.version_number() > slot.version_number() {
                *slot = version;
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn update_model_version(
        &self,
        name: &str,
        version: &str,
        description: &str,
    ) -> Result<ModelVersion, TrackingError> {
        let mut state = self.state();
        let mv = version_mut(&mut state, name, version)?;
        mv.description = Some(description.to_string());
        Ok(mv.clone())
    }

    async fn set_model_version_tag(
        &self,
        name: &str,
        version: &str,
        key: &str,
        value: &str,
    ) -> Result<(), TrackingError> {
        let mut state = self.state();
        let mv = version_mut(&mut state, name, version)?;
        mv.tags.retain(|t| t.key != key);
        mv.tags.push(ModelVersionTag {
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }
}
