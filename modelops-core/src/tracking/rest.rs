//! MLflow REST API client.
//!
//! Speaks `/api/2.0/mlflow/*` for runs and the registry, and
//! `/api/2.0/mlflow-artifacts/artifacts/*` for proxied artifact uploads.
//! No request is retried: a transport failure surfaces as
//! [`TrackingError::Connection`].

use super::{
    Experiment, Metric, ModelRegistry, ModelVersion, Param, RegisteredModel, Run, RunInfo,
    RunStatus, RunTag, TrackingStore, join_artifact_path,
};
use crate::config::TrackingConfig;
use crate::error::TrackingError;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// HTTP client for an MLflow-compatible tracking server.
pub struct RestTrackingClient {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct ExperimentResponse {
    experiment: Experiment,
}

#[derive(Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Deserialize)]
struct RunResponse {
    run: Run,
}

#[derive(Deserialize)]
struct UpdateRunResponse {
    run_info: RunInfo,
}

#[derive(Deserialize)]
struct RegisteredModelResponse {
    registered_model: RegisteredModel,
}

#[derive(Deserialize)]
struct ModelVersionResponse {
    model_version: ModelVersion,
}

#[derive(Deserialize)]
struct LatestVersionsResponse {
    #[serde(default)]
    model_versions: Vec<ModelVersion>,
}

/// Where a run's artifacts physically go.
#[derive(Debug, PartialEq, Eq)]
enum ArtifactTarget {
    /// Proxied through the tracking server; holds the path below the artifact endpoint.
    Proxied(String),
    /// A directory on the local filesystem.
    Local(PathBuf),
}

impl RestTrackingClient {
    /// Build a client for the configured server.
    pub fn new(config: &TrackingConfig) -> Result<Self, TrackingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TrackingError::Connection {
                uri: config.uri.clone(),
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: config.uri.trim_end_matches('/').to_string(),
        })
    }

    /// Base URI this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/2.0/mlflow/{}", self.base_url, path)
    }

    async fn call<R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        query: &[(&str, &str)],
    ) -> Result<R, TrackingError> {
        let url = self.endpoint(path);
        debug!(method = %method, url = %url, "Tracking request");

        let mut request = self.client.request(method, &url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TrackingError::Connection {
                uri: self.base_url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TrackingError::parse(format!("Failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(map_api_error(status, &text));
        }

        let body: &str = if text.trim().is_empty() { "{}" } else { &text };
        serde_json::from_str(body)
            .map_err(|e| TrackingError::parse(format!("{path}: invalid JSON: {e}")))
    }

    async fn post<R: DeserializeOwned>(&self, path: &str, body: Value) -> Result<R, TrackingError> {
        self.call(Method::POST, path, Some(body), &[]).await
    }

    async fn get<R: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<R, TrackingError> {
        self.call(Method::GET, path, None, query).await
    }

    fn artifact_target(artifact_uri: &str) -> Result<ArtifactTarget, TrackingError> {
        if let Some(rest) = artifact_uri.strip_prefix("mlflow-artifacts:") {
            // mlflow-artifacts:/0/<run>/artifacts or mlflow-artifacts://host:port/0/<run>/artifacts
            let path = match rest.strip_prefix("//") {
                Some(authority_and_path) => authority_and_path
                    .split_once('/')
                    .map(|(_, path)| path)
                    .unwrap_or(""),
                None => rest,
            };
            return Ok(ArtifactTarget::Proxied(path.trim_matches('/').to_string()));
        }
        if let Some(path) = artifact_uri.strip_prefix("file://") {
            return Ok(ArtifactTarget::Local(PathBuf::from(path)));
        }
        if !artifact_uri.contains("://") && !artifact_uri.is_empty() {
            return Ok(ArtifactTarget::Local(PathBuf::from(artifact_uri)));
        }
        Err(TrackingError::UnsupportedArtifactUri(
            artifact_uri.to_string(),
        ))
    }

    async fn upload_proxied(&self, remote_path: &str, local_path: &Path) -> Result<(), TrackingError> {
        let encoded: Vec<String> = remote_path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();
        let url = format!(
            "{}/api/2.0/mlflow-artifacts/artifacts/{}",
            self.base_url,
            encoded.join("/")
        );
        let bytes = tokio::fs::read(local_path).await?;
        debug!(url = %url, size = bytes.len(), "Uploading artifact");

        let response = self
            .client
            .put(&url)
            .body(bytes)
            .send()
            .await
            .map_err(|e| TrackingError::Connection {
                uri: self.base_url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_api_error(status, &text));
        }
        Ok(())
    }
}

/// Translate an error response into a typed error.
fn map_api_error(status: StatusCode, body: &str) -> TrackingError {
    let parsed: Option<ApiErrorBody> = serde_json::from_str(body).ok();
    let error_code = parsed
        .as_ref()
        .and_then(|b| b.error_code.clone())
        .unwrap_or_else(|| "UNKNOWN".to_string());
    let message = parsed
        .and_then(|b| b.message)
        .unwrap_or_else(|| body.chars().take(512).collect());

    match error_code.as_str() {
        "RESOURCE_DOES_NOT_EXIST" => TrackingError::NotFound(message),
        "RESOURCE_ALREADY_EXISTS" => TrackingError::AlreadyExists(message),
        _ if status == StatusCode::NOT_FOUND => TrackingError::NotFound(message),
        _ => TrackingError::Api {
            status: status.as_u16(),
            error_code,
            message,
        },
    }
}

#[async_trait]
impl TrackingStore for RestTrackingClient {
    async fn get_experiment_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Experiment>, TrackingError> {
        match self
            .get::<ExperimentResponse>("experiments/get-by-name", &[("experiment_name", name)])
            .await
        {
            Ok(resp) => Ok(Some(resp.experiment)),
            Err(TrackingError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_experiment(&self, name: &str) -> Result<String, TrackingError> {
        let resp: CreateExperimentResponse =
            self.post("experiments/create", json!({ "name": name })).await?;
        Ok(resp.experiment_id)
    }

    async fn create_run(
        &self,
        experiment_id: &str,
        run_name: Option<&str>,
        start_time: i64,
        tags: &[RunTag],
    ) -> Result<RunInfo, TrackingError> {
        let mut body = json!({
            "experiment_id": experiment_id,
            "start_time": start_time,
            "tags": tags,
        });
        if let Some(name) = run_name {
            body["run_name"] = json!(name);
        }
        let resp: RunResponse = self.post("runs/create", body).await?;
        Ok(resp.run.info)
    }

    async fn update_run(
        &self,
        run_id: &str,
        status: RunStatus,
        end_time: i64,
    ) -> Result<RunInfo, TrackingError> {
        let resp: UpdateRunResponse = self
            .post(
                "runs/update",
                json!({ "run_id": run_id, "status": status, "end_time": end_time }),
            )
            .await?;
        Ok(resp.run_info)
    }

    async fn get_run(&self, run_id: &str) -> Result<Run, TrackingError> {
        let resp: RunResponse = self.get("runs/get", &[("run_id", run_id)]).await?;
        Ok(resp.run)
    }

    async fn set_tag(&self, run_id: &str, tag: &RunTag) -> Result<(), TrackingError> {
        let _: IgnoredAny = self
            .post(
                "runs/set-tag",
                json!({ "run_id": run_id, "key": tag.key, "value": tag.value }),
            )
            .await?;
        Ok(())
    }

    async fn log_param(&self, run_id: &str, param: &Param) -> Result<(), TrackingError> {
        let _: IgnoredAny = self
            .post(
                "runs/log-parameter",
                json!({ "run_id": run_id, "key": param.key, "value": param.value }),
            )
            .await?;
        Ok(())
    }

    async fn log_metric(&self, run_id: &str, metric: &Metric) -> Result<(), TrackingError> {
        let _: IgnoredAny = self
            .post(
                "runs/log-metric",
                json!({
                    "run_id": run_id,
                    "key": metric.key,
                    "value": metric.value,
                    "timestamp": metric.timestamp,
                    "step": metric.step,
                }),
            )
            .await?;
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
        let relative = join_artifact_path(artifact_path, &file_name);

        match Self::artifact_target(&run.artifact_uri)? {
            ArtifactTarget::Proxied(root) => {
                let remote = if root.is_empty() {
                    relative
                } else {
                    format!("{root}/{relative}")
                };
                self.upload_proxied(&remote, local_path).await
            }
            ArtifactTarget::Local(root) => {
                let dest = root.join(&relative);
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::copy(local_path, &dest).await?;
                debug!(dest = %dest.display(), "Copied artifact to local store");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ModelRegistry for RestTrackingClient {
    async fn create_registered_model(
        &self,
        name: &str,
    ) -> Result<RegisteredModel, TrackingError> {
        let resp: RegisteredModelResponse = self
            .post("registered-models/create", json!({ "name": name }))
            .await?;
        Ok(resp.registered_model)
    }

    async fn create_model_version(
        &self,
        name: &str,
        source: &str,
        run_id: &str,
    ) -> Result<ModelVersion, TrackingError> {
        let resp: ModelVersionResponse = self
            .post(
                "model-versions/create",
                json!({ "name": name, "source": source, "run_id": run_id }),
            )
            .await?;
        Ok(resp.model_version)
    }

    async fn get_model_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<ModelVersion, TrackingError> {
        let resp: ModelVersionResponse = self
            .get("model-versions/get", &[("name", name), ("version", version)])
            .await?;
        Ok(resp.model_version)
    }

    async fn get_latest_versions(
        &self,
        name: &str,
        stages: &[String],
    ) -> Result<Vec<ModelVersion>, TrackingError> {
        let resp: LatestVersionsResponse = self
            .post(
                "registered-models/get-latest-versions",
                json!({ "name": name, "stages": stages }),
            )
            .await?;
        Ok(resp.model_versions)
    }

    async fn update_model_version(
        &self,
        name: &str,
        version: &str,
        description: &str,
    ) -> Result<ModelVersion, TrackingError> {
        let resp: ModelVersionResponse = self
            .call(
                Method::PATCH,
                "model-versions/update",
                Some(json!({ "name": name, "version": version, "description": description })),
                &[],
            )
            .await?;
        Ok(resp.model_version)
    }

    async fn set_model_version_tag(
        &self,
        name: &str,
        version: &str,
        key: &str,
        value: &str,
    ) -> Result<(), TrackingError> {
        let _: IgnoredAny = self
            .post(
                "model-versions/set-tag",
                json!({ "name": name, "version": version, "key": key, "value": value }),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_target_proxied() {
        assert_eq!(
            RestTrackingClient::artifact_target("mlflow-artifacts:/0/abc/artifacts").unwrap(),
            ArtifactTarget::Proxied("0/abc/artifacts".into())
        );
        assert_eq!(
            RestTrackingClient::artifact_target("mlflow-artifacts://127.0.0.1:5000/3/abc/artifacts")
                .unwrap(),
            ArtifactTarget::Proxied("3/abc/artifacts".into())
        );
    }

    #[test]
    fn test_artifact_target_local_and_unsupported() {
        assert_eq!(
            RestTrackingClient::artifact_target("file:///tmp/mlruns/0/abc/artifacts").unwrap(),
            ArtifactTarget::Local(PathBuf::from("/tmp/mlruns/0/abc/artifacts"))
        );
        assert_eq!(
            RestTrackingClient::artifact_target("./mlruns/0/abc/artifacts").unwrap(),
            ArtifactTarget::Local(PathBuf::from("./mlruns/0/abc/artifacts"))
        );
        assert!(matches!(
            RestTrackingClient::artifact_target("s3://bucket/0/abc/artifacts"),
            Err(TrackingError::UnsupportedArtifactUri(_))
        ));
    }

    #[test]
    fn test_map_api_error() {
        let err = map_api_error(
            StatusCode::NOT_FOUND,
            r#"{"error_code":"RESOURCE_DOES_NOT_EXIST","message":"Registered Model with name=x not found"}"#,
        );
        assert!(matches!(err, TrackingError::NotFound(_)));

        let err = map_api_error(
            StatusCode::BAD_REQUEST,
            r#"{"error_code":"RESOURCE_ALREADY_EXISTS","message":"exists"}"#,
        );
        assert!(err.is_already_exists());

        let err = map_api_error(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        match err {
            TrackingError::Api {
                status,
                error_code,
                message,
            } => {
                assert_eq!(status, 500);
                assert_eq!(error_code, "UNKNOWN");
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_base_url_trimmed() {
        let config = TrackingConfig {
            uri: "http://127.0.0.1:5000/".into(),
            ..Default::default()
        };
        let client = RestTrackingClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:5000");
        assert_eq!(
            client.endpoint("runs/create"),
            "http://127.0.0.1:5000/api/2.0/mlflow/runs/create"
        );
    }
}
