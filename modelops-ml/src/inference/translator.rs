//! Translation model wrapper with a row-in, row-out `predict`.

use crate::data::DataBatch;
use crate::error::MlError;
use async_trait::async_trait;
use modelops_core::config::TranslatorConfig;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// A model that maps input rows to output rows.
#[async_trait]
pub trait PredictModel: Send + Sync {
    async fn predict(&self, input: DataBatch) -> Result<DataBatch, MlError>;
}

/// A ready-to-use translation pipeline.
#[async_trait]
pub trait TranslationPipeline: Send + Sync {
    async fn translate(&self, text: &str) -> Result<String, MlError>;
}

/// Builds pipelines for a task and model.
#[async_trait]
pub trait PipelineFactory: Send + Sync {
    async fn build(&self, task: &str, model: &str) -> Result<Box<dyn TranslationPipeline>, MlError>;
}

// ---------------------------------------------------------------------------
// Hosted inference API
// ---------------------------------------------------------------------------

/// Pipeline backed by a hosted inference endpoint.
///
/// Sends `POST {inference_url}/{model}` with `{"inputs": text}` and expects
/// `[{"translation_text": ...}]` back.
pub struct HfInferencePipeline {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct TranslationOutput {
    translation_text: String,
}

#[derive(Deserialize)]
struct InferenceErrorBody {
    error: String,
}

#[async_trait]
impl TranslationPipeline for HfInferencePipeline {
    async fn translate(&self, text: &str) -> Result<String, MlError> {
        debug!(endpoint = %self.endpoint, chars = text.len(), "Translating");
        let mut request = self.client.post(&self.endpoint).json(&json!({ "inputs": text }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<InferenceErrorBody>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(MlError::inference(format!(
                "inference endpoint returned {status}: {message}"
            )));
        }

        let outputs: Vec<TranslationOutput> = serde_json::from_str(&body)
            .map_err(|e| MlError::inference(format!("unexpected inference response: {e}")))?;
        outputs
            .into_iter()
            .next()
            .map(|o| o.translation_text)
            .ok_or_else(|| MlError::inference("inference response had no translations"))
    }
}

/// Factory for [`HfInferencePipeline`].
pub struct HfPipelineFactory {
    client: reqwest::Client,
    inference_url: String,
    token: Option<String>,
}

impl HfPipelineFactory {
    pub fn new(
        inference_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, MlError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            inference_url: inference_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Uses the configured URL, and the API token from `api_key_env` when set.
    pub fn from_config(config: &TranslatorConfig) -> Result<Self, MlError> {
        let token = std::env::var(&config.api_key_env)
            .ok()
            .filter(|t| !t.is_empty());
        Self::new(
            &config.inference_url,
            token,
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl PipelineFactory for HfPipelineFactory {
    async fn build(&self, task: &str, model: &str) -> Result<Box<dyn TranslationPipeline>, MlError> {
        if !task.starts_with("translation") {
            return Err(MlError::invalid_input(format!(
                "unsupported pipeline task '{task}'"
            )));
        }
        Ok(Box::new(HfInferencePipeline {
            client: self.client.clone(),
            endpoint: format!("{}/{}", self.inference_url, model),
            token: self.token.clone(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Translator
// ---------------------------------------------------------------------------

/// Translates one text column of every row.
pub struct Translator<F> {
    config: TranslatorConfig,
    factory: F,
}

impl Translator<HfPipelineFactory> {
    /// Translator over the hosted inference API.
    pub fn hosted(config: TranslatorConfig) -> Result<Self, MlError> {
        let factory = HfPipelineFactory::from_config(&config)?;
        Ok(Self::new(config, factory))
    }
}

impl<F: PipelineFactory> Translator<F> {
    pub fn new(config: TranslatorConfig, factory: F) -> Self {
        Self { config, factory }
    }

    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }
}

#[async_trait]
impl<F: PipelineFactory> PredictModel for Translator<F> {
    /// Builds a pipeline for this call, then translates the text column row by row.
    async fn predict(&self, mut input: DataBatch) -> Result<DataBatch, MlError> {
        let column = &self.config.text_column;
        let idx = input
            .column_index(column)
            .ok_or_else(|| MlError::invalid_input(format!("missing text column '{column}'")))?;

        let pipeline = self
            .factory
            .build(&self.config.task, &self.config.model)
            .await?;

        for (row_idx, row) in input.rows.iter_mut().enumerate() {
            let text = match row.get(idx) {
                Some(Value::String(text)) => text,
                other => {
                    return Err(MlError::invalid_input(format!(
                        "row {row_idx}: column '{column}' must be a string, got {}",
                        other.unwrap_or(&Value::Null)
                    )));
                }
            };
            let translated = pipeline.translate(text).await?;
            row[idx] = Value::String(translated);
        }
        debug!(rows = input.row_count(), model = %self.config.model, "Translated batch");
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Upper;

    #[async_trait]
    impl TranslationPipeline for Upper {
        async fn translate(&self, text: &str) -> Result<String, MlError> {
            Ok(text.to_uppercase())
        }
    }

    #[derive(Default, Clone)]
    struct CountingFactory {
        builds: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PipelineFactory for CountingFactory {
        async fn build(&self, _: &str, _: &str) -> Result<Box<dyn TranslationPipeline>, MlError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Upper))
        }
    }

    fn batch(texts: &[&str]) -> DataBatch {
        DataBatch {
            columns: vec!["id".into(), "text".into()],
            rows: texts
                .iter()
                .enumerate()
                .map(|(i, t)| vec![json!(i), json!(t)])
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_only_text_column_changes() {
        let translator = Translator::new(TranslatorConfig::default(), CountingFactory::default());
        let out = translator.predict(batch(&["hello", "bye"])).await.unwrap();
        assert_eq!(out.row_count(), 2);
        assert_eq!(out.columns, vec!["id", "text"]);
        assert_eq!(out.rows[0], vec![json!(0), json!("HELLO")]);
        assert_eq!(out.rows[1], vec![json!(1), json!("BYE")]);
    }

    #[tokio::test]
    async fn test_pipeline_built_once_per_call() {
        let factory = CountingFactory::default();
        let translator = Translator::new(TranslatorConfig::default(), factory.clone());
        translator.predict(batch(&["a", "b", "c"])).await.unwrap();
        translator.predict(batch(&["d"])).await.unwrap();
        assert_eq!(factory.builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_input_still_builds_pipeline() {
        let factory = CountingFactory::default();
        let translator = Translator::new(TranslatorConfig::default(), factory.clone());
        let out = translator.predict(batch(&[])).await.unwrap();
        assert_eq!(out.row_count(), 0);
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_column_and_non_string_cell() {
        let translator = Translator::new(TranslatorConfig::default(), CountingFactory::default());

        let mut no_text = batch(&["x"]);
        no_text.columns[1] = "body".into();
        assert!(matches!(
            translator.predict(no_text).await,
            Err(MlError::InvalidInput(_))
        ));

        let mut numeric = batch(&["x", "y"]);
        numeric.rows[1][1] = json!(42);
        let err = translator.predict(numeric).await.unwrap_err();
        assert!(matches!(err, MlError::InvalidInput(_)));
        assert!(err.to_string().contains("row 1"));
    }

    #[tokio::test]
    async fn test_hf_factory_rejects_other_tasks() {
        let factory =
            HfPipelineFactory::new("http://127.0.0.1:9", None, Duration::from_secs(1)).unwrap();
        assert!(factory.build("summarization", "t5-small").await.is_err());
        assert!(factory
            .build("translation_en_to_fr", "Helsinki-NLP/opus-mt-en-fr")
            .await
            .is_ok());
    }
}
