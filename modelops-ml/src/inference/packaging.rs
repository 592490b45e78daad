//! Logs the translator as a model on its own run.

use crate::error::MlError;
use modelops_core::config::TranslatorConfig;
use modelops_core::model::staging_dir;
use modelops_core::persistence::atomic_write_json;
use modelops_core::tracking::run::resolve_experiment;
use modelops_core::{ActiveRun, ColSpec, LoggedModel, ModelDescriptor, ModelSignature, TrackingServer};
use serde_json::json;
use std::path::Path;
use tracing::info;

/// Flavor name for models loaded through [`PredictModel`](super::PredictModel).
pub const FUNCTION_FLAVOR: &str = "rust_function";
/// Artifact path the translator is logged under.
pub const TRANSLATOR_ARTIFACT_PATH: &str = "model";
/// Config file stored inside the logged model directory.
pub const TRANSLATOR_CONFIG_FILE: &str = "translator.json";

/// `[{name: <text_column>, type: string}]` on both sides.
pub fn translator_signature(text_column: &str) -> ModelSignature {
    ModelSignature::new(
        vec![ColSpec::new(text_column, "string")],
        vec![ColSpec::new(text_column, "string")],
    )
}

/// Open a run, log the translator under `model`, end the run.
///
/// The model is not registered. Returns the run id and the logged model.
pub async fn package_translator(
    server: &dyn TrackingServer,
    config: &TranslatorConfig,
    experiment_name: Option<&str>,
    work_dir: &Path,
) -> Result<(String, LoggedModel), MlError> {
    let store = server.as_store();
    let experiment_id = resolve_experiment(store, experiment_name).await?;
    let run = ActiveRun::start(store, &experiment_id, None, &[]).await?;
    let run_id = run.run_id().to_string();

    let model_dir = staging_dir(work_dir, &run_id, TRANSLATOR_ARTIFACT_PATH);
    let body = log_translator(&run, server, config, &model_dir).await;
    let logged = run.finish_with(body).await?;

    info!(run_id = %run_id, model_uri = %logged.model_uri, "Packaged translator");
    Ok((run_id, logged))
}

async fn log_translator(
    run: &ActiveRun<'_>,
    server: &dyn TrackingServer,
    config: &TranslatorConfig,
    model_dir: &Path,
) -> Result<LoggedModel, MlError> {
    if model_dir.exists() {
        std::fs::remove_dir_all(model_dir)?;
    }
    atomic_write_json(&model_dir.join(TRANSLATOR_CONFIG_FILE), config)?;

    let descriptor = ModelDescriptor::new(TRANSLATOR_ARTIFACT_PATH)
        .with_flavor(
            FUNCTION_FLAVOR,
            json!({
                "loader": "modelops_ml::inference::Translator",
                "config": TRANSLATOR_CONFIG_FILE,
                "model": config.model,
                "task": config.task,
            }),
        )
        .with_signature(&translator_signature(&config.text_column))?;

    Ok(modelops_core::log_model(run, server.as_registry(), model_dir, descriptor, None).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelops_core::model::{MLMODEL_FILE, SerializedSignature};
    use modelops_core::{InMemoryTrackingStore, RunStatus};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_signature_json() {
        let serialized = translator_signature("text").to_serialized().unwrap();
        assert_eq!(
            serialized,
            SerializedSignature {
                inputs: r#"[{"name":"text","type":"string"}]"#.into(),
                outputs: r#"[{"name":"text","type":"string"}]"#.into(),
            }
        );
    }

    #[tokio::test]
    async fn test_package_logs_unregistered_model() {
        let store = InMemoryTrackingStore::new();
        let dir = tempfile::TempDir::new().unwrap();
        let config = TranslatorConfig::default();

        let (run_id, logged) = package_translator(&store, &config, None, dir.path())
            .await
            .unwrap();

        assert_eq!(logged.model_uri, format!("runs:/{run_id}/model"));
        assert!(logged.version.is_none());
        assert!(store.model_versions("diabetes-model").is_empty());

        let runs = store.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].info.status, RunStatus::Finished);

        let paths = store.artifact_paths(&run_id);
        assert!(paths.contains(&format!("model/{MLMODEL_FILE}")));
        assert!(paths.contains(&format!("model/{TRANSLATOR_CONFIG_FILE}")));

        let staged = staging_dir(dir.path(), &run_id, TRANSLATOR_ARTIFACT_PATH);
        assert!(staged.join(TRANSLATOR_CONFIG_FILE).is_file());
        assert!(staged.join(MLMODEL_FILE).is_file());

        let mlmodel = store.artifact(&run_id, &format!("model/{MLMODEL_FILE}")).unwrap();
        let descriptor = ModelDescriptor::from_yaml(std::str::from_utf8(&mlmodel).unwrap()).unwrap();
        assert_eq!(descriptor.run_id, run_id);
        assert!(descriptor.flavors.contains_key(FUNCTION_FLAVOR));
        let signature = descriptor.signature.unwrap().parse().unwrap();
        assert_eq!(signature, translator_signature("text"));
    }
}
