//! Run logger: one tracked run per workflow invocation.
//!
//! An [`ActiveRun`] is created on the server at start, receives tags, params,
//! metrics, and artifacts while the workflow executes, and is closed exactly
//! once by consuming it with [`ActiveRun::end`] or [`ActiveRun::finish_with`].

use super::{
    DEFAULT_EXPERIMENT_ID, Metric, Param, RunInfo, RunStatus, RunTag, TrackingStore, now_millis,
};
use crate::error::TrackingError;
use std::fmt::Display;
use std::path::Path;
use tracing::{debug, info, warn};

/// Resolve the experiment runs are logged under.
///
/// With a name, the experiment is looked up and created when missing.
/// Without one, the server's default experiment is used.
pub async fn resolve_experiment(
    store: &dyn TrackingStore,
    name: Option<&str>,
) -> Result<String, TrackingError> {
    let Some(name) = name else {
        return Ok(DEFAULT_EXPERIMENT_ID.to_string());
    };
    if let Some(existing) = store.get_experiment_by_name(name).await? {
        return Ok(existing.experiment_id);
    }
    let id = store.create_experiment(name).await?;
    info!(experiment = name, experiment_id = %id, "Created experiment");
    Ok(id)
}

/// A run that is open on the tracking server.
pub struct ActiveRun<'a> {
    store: &'a dyn TrackingStore,
    info: RunInfo,
    ended: bool,
}

impl<'a> ActiveRun<'a> {
    /// Create the run on the server in `RUNNING` state.
    pub async fn start(
        store: &'a dyn TrackingStore,
        experiment_id: &str,
        run_name: Option<&str>,
        tags: &[RunTag],
    ) -> Result<Self, TrackingError> {
        let info = store
            .create_run(experiment_id, run_name, now_millis(), tags)
            .await?;
        info!(run_id = %info.run_id, experiment_id, "Started run");
        Ok(Self {
            store,
            info,
            ended: false,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.info.run_id
    }

    pub fn info(&self) -> &RunInfo {
        &self.info
    }

    /// Root URI of the run's artifacts.
    pub fn artifact_uri(&self) -> &str {
        &self.info.artifact_uri
    }

    pub async fn set_tag(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), TrackingError> {
        let tag = RunTag::new(key, value);
        debug!(run_id = %self.info.run_id, key = %tag.key, "Setting tag");
        self.store.set_tag(&self.info.run_id, &tag).await
    }

    pub async fn log_param(
        &self,
        key: impl Into<String>,
        value: impl Display,
    ) -> Result<(), TrackingError> {
        let param = Param::new(key, value);
        debug!(run_id = %self.info.run_id, key = %param.key, value = %param.value, "Logging param");
        self.store.log_param(&self.info.run_id, &param).await
    }

    pub async fn log_metric(&self, key: impl Into<String>, value: f64) -> Result<(), TrackingError> {
        let metric = Metric::new(key, value);
        debug!(run_id = %self.info.run_id, key = %metric.key, value, "Logging metric");
        self.store.log_metric(&self.info.run_id, &metric).await
    }

    /// Log several metrics in order.
    pub async fn log_metrics<I, K>(&self, metrics: I) -> Result<(), TrackingError>
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        for (key, value) in metrics {
            self.log_metric(key, value).await?;
        }
        Ok(())
    }

    /// Upload one local file into the run's artifact root.
    pub async fn log_artifact(
        &self,
        local_path: &Path,
        artifact_path: Option<&str>,
    ) -> Result<(), TrackingError> {
        debug!(
            run_id = %self.info.run_id,
            file = %local_path.display(),
            artifact_path = artifact_path.unwrap_or(""),
            "Logging artifact"
        );
        self.store
            .log_artifact(&self.info, local_path, artifact_path)
            .await
    }

    /// Close the run with a terminal status.
    pub async fn end(mut self, status: RunStatus) -> Result<RunInfo, TrackingError> {
        if !status.is_terminal() {
            return Err(TrackingError::invalid_state(format!(
                "run {} cannot end with non-terminal status {status:?}",
                self.info.run_id
            )));
        }
        self.ended = true;
        let info = self
            .store
            .update_run(&self.info.run_id, status, now_millis())
            .await?;
        info!(run_id = %info.run_id, status = ?status, "Ended run");
        Ok(info)
    }

    /// Close the run according to the workflow's outcome.
    ///
    /// `Ok` ends the run `FINISHED`. `Err` marks it `FAILED` best-effort and
    /// returns the original error unchanged.
    pub async fn finish_with<T, E>(self, outcome: Result<T, E>) -> Result<T, E>
    where
        E: From<TrackingError>,
    {
        match outcome {
            Ok(value) => {
                self.end(RunStatus::Finished).await?;
                Ok(value)
            }
            Err(err) => {
                let run_id = self.info.run_id.clone();
                if let Err(mark_err) = self.end(RunStatus::Failed).await {
                    warn!(run_id = %run_id, error = %mark_err, "Could not mark run as failed");
                }
                Err(err)
            }
        }
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        if !self.ended {
            warn!(run_id = %self.info.run_id, "Run dropped without being ended");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::InMemoryTrackingStore;
    use std::io::Write;

    #[tokio::test]
    async fn test_run_logs_everything_against_one_id() {
        let store = InMemoryTrackingStore::new();
        let run = ActiveRun::start(&store, "0", None, &[RunTag::new("team", "a_team")])
            .await
            .unwrap();
        run.log_param("max_iter", 1000).await.unwrap();
        run.log_metrics([("precision", 0.75), ("recall", 0.5)])
            .await
            .unwrap();

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("report.svg");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"<svg/>")
            .unwrap();
        run.log_artifact(&path, None).await.unwrap();

        let run_id = run.run_id().to_string();
        let info = run.end(RunStatus::Finished).await.unwrap();
        assert_eq!(info.status, RunStatus::Finished);

        let runs = store.runs();
        assert_eq!(runs.len(), 1);
        let logged = &runs[0];
        assert_eq!(logged.info.run_id, run_id);
        assert_eq!(logged.data.param("max_iter"), Some("1000"));
        assert_eq!(logged.data.metric("precision"), Some(0.75));
        assert_eq!(logged.data.tag("team"), Some("a_team"));
        assert_eq!(store.artifact(&run_id, "report.svg"), Some(b"<svg/>".to_vec()));
    }

    #[tokio::test]
    async fn test_finish_with_error_marks_failed() {
        let store = InMemoryTrackingStore::new();
        let run = ActiveRun::start(&store, "0", None, &[]).await.unwrap();
        let run_id = run.run_id().to_string();

        let outcome: Result<(), TrackingError> = Err(TrackingError::not_found("version"));
        let err = run.finish_with(outcome).await.unwrap_err();
        assert!(matches!(err, TrackingError::NotFound(_)));

        let logged = store.get_run(&run_id).await.unwrap();
        assert_eq!(logged.info.status, RunStatus::Failed);
        assert!(logged.info.end_time.is_some());
    }

    #[tokio::test]
    async fn test_end_rejects_non_terminal_status() {
        let store = InMemoryTrackingStore::new();
        let run = ActiveRun::start(&store, "0", None, &[]).await.unwrap();
        assert!(matches!(
            run.end(RunStatus::Running).await,
            Err(TrackingError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_experiment() {
        let store = InMemoryTrackingStore::new();
        assert_eq!(resolve_experiment(&store, None).await.unwrap(), "0");
        let id = resolve_experiment(&store, Some("diabetes")).await.unwrap();
        assert_ne!(id, "0");
        assert_eq!(
            resolve_experiment(&store, Some("diabetes")).await.unwrap(),
            id
        );
    }
}
