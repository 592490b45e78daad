//! modelops CLI: train the diabetes classifier and package the translator.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// modelops: tracked training and model packaging against an MLflow server
#[derive(Parser, Debug)]
#[command(name = "modelops", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (config discovery, reports, staged models)
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Configuration file path (skips user and workspace config discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Tracking server URI
    #[arg(long, global = true)]
    tracking_uri: Option<String>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Train, log, and register the diabetes classifier
    Train {
        /// Maximum solver iterations
        max_iter: Option<u32>,

        /// CSV dataset location (path or URL)
        #[arg(long)]
        dataset: Option<String>,
    },
    /// Log the translation model wrapper on a new run
    PackageTranslator,
    /// Translate the text column of a JSON or CSV file and print JSON records
    Translate {
        /// Input file (.json array of objects, or .csv)
        input: PathBuf,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Write a default config file into the workspace
    Init,
    /// Print the effective configuration
    Show,
}

/// Global options every command needs.
#[derive(Debug, Clone)]
pub(crate) struct Context {
    pub workspace: PathBuf,
    pub config_file: Option<PathBuf>,
    pub tracking_uri: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "modelops", "modelops")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "modelops.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let ctx = Context {
        workspace,
        config_file: cli.config,
        tracking_uri: cli.tracking_uri,
    };
    commands::handle_command(cli.command, &ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_train_takes_optional_positional_max_iter() {
        let cli = Cli::try_parse_from(["modelops", "train", "250"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Train {
                max_iter: Some(250),
                ..
            }
        ));

        let cli = Cli::try_parse_from(["modelops", "train"]).unwrap();
        assert!(matches!(cli.command, Commands::Train { max_iter: None, .. }));

        assert!(Cli::try_parse_from(["modelops", "train", "many"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "modelops",
            "package-translator",
            "--tracking-uri",
            "http://mlflow:5000",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.tracking_uri.as_deref(), Some("http://mlflow:5000"));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::PackageTranslator));
    }

    #[test]
    fn test_config_subcommands() {
        let cli = Cli::try_parse_from(["modelops", "config", "show"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Show
            }
        ));
    }
}
