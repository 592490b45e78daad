//! Configuration system for modelops.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/modelops/config.toml` and/or `.modelops/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Top-level configuration for both workflows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelOpsConfig {
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub translator: TranslatorConfig,
}

/// Where the tracking server lives and how runs are grouped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Base URI of the tracking server.
    #[serde(default = "default_tracking_uri")]
    pub uri: String,
    /// Experiment to log runs under. The server's default experiment is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_name: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_tracking_timeout")]
    pub timeout_secs: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            uri: default_tracking_uri(),
            experiment_name: None,
            timeout_secs: default_tracking_timeout(),
        }
    }
}

fn default_tracking_uri() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_tracking_timeout() -> u64 {
    30
}

/// A single key/value tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagConfig {
    pub key: String,
    pub value: String,
}

/// Training workflow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// CSV dataset location: a local path or an `http(s)://` URL.
    #[serde(default = "default_dataset")]
    pub dataset: String,
    /// Name of the label column.
    #[serde(default = "default_label_column")]
    pub label_column: String,
    /// Fraction of rows held out for evaluation.
    #[serde(default = "default_test_size")]
    pub test_size: f64,
    /// Seed for the train/test shuffle.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Maximum solver iterations.
    #[serde(default = "default_max_iter")]
    pub max_iter: u32,
    /// Name the fitted model is registered under.
    #[serde(default = "default_registered_model_name")]
    pub registered_model_name: String,
    /// Local path the confusion-matrix report is written to before upload.
    #[serde(default = "default_report_path")]
    pub report_path: PathBuf,
    /// Tags set on every training run.
    #[serde(default = "default_run_tags")]
    pub run_tags: BTreeMap<String, String>,
    /// Tag attached to the newest model version after the run.
    #[serde(default = "default_version_tag")]
    pub version_tag: TagConfig,
    /// How long to wait for a new model version to become READY.
    #[serde(default = "default_await_registration")]
    pub await_registration_secs: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            dataset: default_dataset(),
            label_column: default_label_column(),
            test_size: default_test_size(),
            seed: default_seed(),
            max_iter: default_max_iter(),
            registered_model_name: default_registered_model_name(),
            report_path: default_report_path(),
            run_tags: default_run_tags(),
            version_tag: default_version_tag(),
            await_registration_secs: default_await_registration(),
        }
    }
}

fn default_dataset() -> String {
    "data/diabetes.csv".to_string()
}

fn default_label_column() -> String {
    "diabetes".to_string()
}

fn default_test_size() -> f64 {
    0.2
}

fn default_seed() -> u64 {
    42
}

fn default_max_iter() -> u32 {
    1000
}

fn default_registered_model_name() -> String {
    "diabetes-model".to_string()
}

fn default_report_path() -> PathBuf {
    PathBuf::from("report.svg")
}

fn default_run_tags() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("CostAllocation".to_string(), "a_specific_tag".to_string()),
        ("team".to_string(), "a_team".to_string()),
    ])
}

fn default_version_tag() -> TagConfig {
    TagConfig {
        key: "CostAllocation".to_string(),
        value: "a_specific_tag".to_string(),
    }
}

fn default_await_registration() -> u64 {
    300
}

/// Translation model wrapper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorConfig {
    /// Pretrained model identifier.
    #[serde(default = "default_translator_model")]
    pub model: String,
    /// Pipeline task name.
    #[serde(default = "default_translator_task")]
    pub task: String,
    /// Column whose values are translated.
    #[serde(default = "default_text_column")]
    pub text_column: String,
    /// Base URL of the hosted inference API.
    #[serde(default = "default_inference_url")]
    pub inference_url: String,
    /// Environment variable holding the inference API token.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_inference_timeout")]
    pub timeout_secs: u64,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            model: default_translator_model(),
            task: default_translator_task(),
            text_column: default_text_column(),
            inference_url: default_inference_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_inference_timeout(),
        }
    }
}

fn default_translator_model() -> String {
    "Helsinki-NLP/opus-mt-en-fr".to_string()
}

fn default_translator_task() -> String {
    "translation_en_to_fr".to_string()
}

fn default_text_column() -> String {
    "text".to_string()
}

fn default_inference_url() -> String {
    "https://api-inference.huggingface.co/models".to_string()
}

fn default_api_key_env() -> String {
    "HF_API_TOKEN".to_string()
}

fn default_inference_timeout() -> u64 {
    60
}

/// Values supplied on the command line. Applied after every other layer.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub tracking_uri: Option<String>,
    pub max_iter: Option<u32>,
    pub dataset: Option<String>,
}

impl ConfigOverrides {
    fn apply(&self, config: &mut ModelOpsConfig) {
        if let Some(uri) = &self.tracking_uri {
            config.tracking.uri = uri.clone();
        }
        if let Some(max_iter) = self.max_iter {
            config.training.max_iter = max_iter;
        }
        if let Some(dataset) = &self.dataset {
            config.training.dataset = dataset.clone();
        }
    }
}

impl ModelOpsConfig {
    /// Reject values no workflow can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.tracking.uri).map_err(|e| ConfigError::Invalid {
            message: format!("tracking.uri '{}': {}", self.tracking.uri, e),
        })?;
        if !(self.training.test_size > 0.0 && self.training.test_size < 1.0) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "training.test_size must be in (0, 1), got {}",
                    self.training.test_size
                ),
            });
        }
        if self.training.max_iter == 0 {
            return Err(ConfigError::Invalid {
                message: "training.max_iter must be at least 1".to_string(),
            });
        }
        if self.training.registered_model_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "training.registered_model_name must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "modelops", "modelops")
}

/// Load configuration from all sources with layered merging.
///
/// Precedence (lowest to highest): built-in defaults, user config,
/// workspace config, `MODELOPS_` environment variables, `overrides`.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&ConfigOverrides>,
) -> Result<ModelOpsConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(ModelOpsConfig::default()));

    if let Some(dirs) = project_dirs() {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // MODELOPS_TRACKING__URI, MODELOPS_TRAINING__MAX_ITER, etc.
    figment = figment.merge(Env::prefixed("MODELOPS_").split("__"));

    let mut config: ModelOpsConfig = figment.extract().map_err(Box::new)?;
    if let Some(overrides) = overrides {
        overrides.apply(&mut config);
    }
    config.validate()?;
    Ok(config)
}

/// Load configuration from one explicit file, skipping user and workspace discovery.
pub fn load_config_file(
    path: &Path,
    overrides: Option<&ConfigOverrides>,
) -> Result<ModelOpsConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let mut config: ModelOpsConfig = Figment::from(Serialized::defaults(ModelOpsConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("MODELOPS_").split("__"))
        .extract()
        .map_err(Box::new)?;
    if let Some(overrides) = overrides {
        overrides.apply(&mut config);
    }
    config.validate()?;
    Ok(config)
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".modelops").join("config.toml")
}
