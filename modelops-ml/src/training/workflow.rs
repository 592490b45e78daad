//! End-to-end training run: load, fit, evaluate, log, register, annotate.

use super::logistic::LogisticRegression;
use super::metrics::{ClassificationMetrics, confusion_matrix};
use super::report::write_confusion_matrix;
use crate::data::{CsvSource, DataSource, Dataset, DatasetSplit, train_test_split};
use crate::error::MlError;
use modelops_core::config::TrainingConfig;
use modelops_core::model::staging_dir;
use modelops_core::persistence::atomic_write;
use modelops_core::tracking::run::resolve_experiment;
use modelops_core::{
    ActiveRun, LoggedModel, ModelDescriptor, ModelRegistry, ModelVersion, Registration,
    RegistryUpdater, TrackingServer,
};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Flavor name written into the `MLmodel` descriptor of trained models.
pub const LOGISTIC_FLAVOR: &str = "logistic_regression";
/// File the fitted coefficients are serialized to inside the model directory.
pub const MODEL_FILE: &str = "model.json";
/// Artifact path the model is logged under.
pub const MODEL_ARTIFACT_PATH: &str = "model";

/// What a training run produced.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub run_id: String,
    pub metrics: ClassificationMetrics,
    pub model_uri: String,
    /// The newest registered version after the description and tag were written.
    pub model_version: ModelVersion,
}

/// Trains the diabetes classifier and records everything on one run.
pub struct TrainingWorkflow {
    config: TrainingConfig,
    experiment_name: Option<String>,
    work_dir: PathBuf,
    poll_interval: Duration,
}

impl TrainingWorkflow {
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            experiment_name: None,
            work_dir: PathBuf::from("."),
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Log under a named experiment instead of the default one.
    pub fn experiment(mut self, name: Option<String>) -> Self {
        self.experiment_name = name;
        self
    }

    /// Directory the report and staged model are written to.
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Interval between registration status polls.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Load the dataset and split it.
    pub async fn load_split(&self) -> Result<DatasetSplit, MlError> {
        let source = CsvSource::new(&self.config.dataset);
        let batch = source.load(None).await?;
        let dataset = Dataset::from_batch(&batch, &self.config.label_column)?;
        info!(
            dataset = %self.config.dataset,
            rows = dataset.len(),
            features = dataset.feature_names.len(),
            "Loaded dataset"
        );
        train_test_split(&dataset, self.config.test_size, self.config.seed)
    }

    pub async fn run(&self, server: &dyn TrackingServer) -> Result<TrainingOutcome, MlError> {
        let split = self.load_split().await?;

        let store = server.as_store();
        let experiment_id = resolve_experiment(store, self.experiment_name.as_deref()).await?;
        let run = ActiveRun::start(store, &experiment_id, None, &[]).await?;
        let run_id = run.run_id().to_string();

        let body = self.train_in_run(&run, server.as_registry(), &split).await;
        let (metrics, logged) = run.finish_with(body).await?;
        info!(run_id = %run_id, "Run finished");

        let updater = RegistryUpdater::new(
            &self.config.registered_model_name,
            self.config.version_tag.clone(),
        );
        let model_version = updater
            .apply(server.as_registry(), metrics.precision)
            .await?;
        info!(
            model = %model_version.name,
            version = %model_version.version,
            description = model_version.description.as_deref().unwrap_or_default(),
            "Annotated latest model version"
        );

        Ok(TrainingOutcome {
            run_id,
            metrics,
            model_uri: logged.model_uri,
            model_version,
        })
    }

    async fn train_in_run(
        &self,
        run: &ActiveRun<'_>,
        registry: &dyn ModelRegistry,
        split: &DatasetSplit,
    ) -> Result<(ClassificationMetrics, LoggedModel), MlError> {
        for (key, value) in &self.config.run_tags {
            run.set_tag(key, value).await?;
        }

        let mut model = LogisticRegression::new(self.config.max_iter);
        model.fit(&split.x_train, &split.y_train)?;
        let y_pred = model.predict(&split.x_test)?;
        info!(
            run_id = %run.run_id(),
            n_iter = model.n_iter(),
            converged = model.converged(),
            "Fitted logistic regression"
        );

        let y_test = split.y_test.to_vec();
        let y_pred = y_pred.to_vec();
        let metrics = ClassificationMetrics::evaluate(&y_test, &y_pred)?;

        run.log_param("max_iter", self.config.max_iter).await?;
        run.log_metrics(metrics.run_metrics()).await?;
        info!(
            run_id = %run.run_id(),
            precision = metrics.precision,
            recall = metrics.recall,
            f1 = metrics.f1_score,
            "Logged metrics"
        );

        // Sized by the model's classes even when the test side holds only one.
        let matrix = confusion_matrix(&y_test, &y_pred, model.classes())?;
        let report_path = self.work_dir.join(&self.config.report_path);
        write_confusion_matrix(&report_path, &matrix, model.classes())?;
        run.log_artifact(&report_path, None).await?;

        let model_dir = self.stage_model(run.run_id(), &model)?;
        let descriptor = ModelDescriptor::new(MODEL_ARTIFACT_PATH).with_flavor(
            LOGISTIC_FLAVOR,
            json!({
                "model_file": MODEL_FILE,
                "classes": model.classes(),
                "max_iter": model.max_iter,
                "c": model.c,
            }),
        );
        let registration = Registration::new(&self.config.registered_model_name)
            .await_for(Duration::from_secs(self.config.await_registration_secs))
            .poll_interval(self.poll_interval);
        let logged =
            modelops_core::log_model(run, registry, &model_dir, descriptor, Some(&registration))
                .await?;

        println!("Model saved in run {}", run.run_id());
        Ok((metrics, logged))
    }

    /// Write the fitted model into a fresh per-run staging directory.
    fn stage_model(&self, run_id: &str, model: &LogisticRegression) -> Result<PathBuf, MlError> {
        let dir = staging_dir(&self.work_dir, run_id, MODEL_ARTIFACT_PATH);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        atomic_write(&dir.join(MODEL_FILE), model.to_json()?.as_bytes())?;
        Ok(dir)
    }
}
