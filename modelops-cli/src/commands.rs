//! Subcommand handlers.

use crate::{Commands, ConfigAction, Context};
use modelops_core::config::workspace_config_path;
use modelops_core::{ConfigOverrides, ModelOpsConfig, RestTrackingClient, load_config, load_config_file};
use modelops_ml::{CsvSource, DataSource, JsonSource, PredictModel, TrainingWorkflow, Translator};
use std::path::Path;
use tracing::info;

pub(crate) async fn handle_command(command: Commands, ctx: &Context) -> anyhow::Result<()> {
    match command {
        Commands::Train { max_iter, dataset } => {
            let config = load(
                ctx,
                ConfigOverrides {
                    max_iter,
                    dataset,
                    ..Default::default()
                },
            )?;
            handle_train(config, ctx).await
        }
        Commands::PackageTranslator => {
            let config = load(ctx, ConfigOverrides::default())?;
            handle_package(config, ctx).await
        }
        Commands::Translate { input } => {
            let config = load(ctx, ConfigOverrides::default())?;
            handle_translate(config, &input).await
        }
        Commands::Config { action } => handle_config(action, ctx),
    }
}

fn load(ctx: &Context, mut overrides: ConfigOverrides) -> anyhow::Result<ModelOpsConfig> {
    overrides.tracking_uri = ctx.tracking_uri.clone();
    let config = match &ctx.config_file {
        Some(path) => load_config_file(path, Some(&overrides)),
        None => load_config(Some(&ctx.workspace), Some(&overrides)),
    };
    config.map_err(|e| anyhow::anyhow!("Configuration error: {e}"))
}

async fn handle_train(config: ModelOpsConfig, ctx: &Context) -> anyhow::Result<()> {
    let client = RestTrackingClient::new(&config.tracking)?;
    info!(tracking_uri = %client.base_url(), "Starting training run");

    let outcome = TrainingWorkflow::new(config.training)
        .experiment(config.tracking.experiment_name)
        .work_dir(&ctx.workspace)
        .run(&client)
        .await?;

    println!("{}", outcome.model_version.version);
    println!(
        "precision={:.4} recall={:.4} f1={:.4}",
        outcome.metrics.precision, outcome.metrics.recall, outcome.metrics.f1_score
    );
    Ok(())
}

async fn handle_package(config: ModelOpsConfig, ctx: &Context) -> anyhow::Result<()> {
    let client = RestTrackingClient::new(&config.tracking)?;
    let (run_id, logged) = modelops_ml::package_translator(
        &client,
        &config.translator,
        config.tracking.experiment_name.as_deref(),
        &ctx.workspace,
    )
    .await?;
    println!("Translator logged as {} (run {run_id})", logged.model_uri);
    Ok(())
}

async fn handle_translate(config: ModelOpsConfig, input: &Path) -> anyhow::Result<()> {
    let location = input.to_string_lossy();
    let is_csv = input
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    let batch = if is_csv {
        CsvSource::new(location).load(None).await?
    } else {
        JsonSource::new(location).load(None).await?
    };

    let translator = Translator::hosted(config.translator)?;
    let output = translator.predict(batch).await?;
    println!("{}", serde_json::to_string_pretty(&output.to_records())?);
    Ok(())
}

fn handle_config(action: ConfigAction, ctx: &Context) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace_config_path(&ctx.workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let toml_str = toml::to_string_pretty(&ModelOpsConfig::default())?;
            std::fs::write(&config_path, toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(ctx, ConfigOverrides::default())?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn ctx(dir: &TempDir) -> Context {
        Context {
            workspace: dir.path().to_path_buf(),
            config_file: None,
            tracking_uri: None,
        }
    }

    #[tokio::test]
    async fn test_config_init_writes_loadable_defaults() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir);
        handle_command(
            Commands::Config {
                action: ConfigAction::Init,
            },
            &ctx,
        )
        .await
        .unwrap();

        let path = workspace_config_path(dir.path());
        assert!(path.exists());
        let config = load_config_file(&path, None).unwrap();
        assert_eq!(config.training.registered_model_name, "diabetes-model");

        // A second init leaves the file alone.
        std::fs::write(&path, "[training]\nmax_iter = 7\n").unwrap();
        handle_config(ConfigAction::Init, &ctx).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "[training]\nmax_iter = 7\n"
        );
    }

    #[test]
    fn test_tracking_uri_flag_overrides_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("modelops.toml");
        std::fs::write(&path, "[tracking]\nuri = \"http://from-file:5000\"\n").unwrap();

        let ctx = Context {
            workspace: dir.path().to_path_buf(),
            config_file: Some(path),
            tracking_uri: Some("http://from-flag:5000".into()),
        };
        let config = load(
            &ctx,
            ConfigOverrides {
                max_iter: Some(42),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(config.tracking.uri, "http://from-flag:5000");
        assert_eq!(config.training.max_iter, 42);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let ctx = Context {
            config_file: Some(dir.path().join("absent.toml")),
            ..ctx(&dir)
        };
        let err = load(&ctx, ConfigOverrides::default()).unwrap_err();
        assert!(err.to_string().starts_with("Configuration error"));
    }

    #[tokio::test]
    async fn test_translate_missing_input_fails() {
        let dir = TempDir::new().unwrap();
        let err = handle_translate(ModelOpsConfig::default(), &dir.path().join("rows.json"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rows.json"));
    }
}
