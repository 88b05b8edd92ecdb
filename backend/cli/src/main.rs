mod chat_cmd;
mod config;
mod config_cmd;
mod models_cmd;
mod terminal_output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use edgechat_config::{config_dir, config_file_path, load_and_prepare};
use edgechat_logging::init_logger;

use config::Settings;

#[derive(Parser)]
#[command(name = "edgechat")]
#[command(about = "EdgeChat: on-device chat with a local model and live sensor input")]
#[command(version)]
struct Cli {
    /// Config file (defaults to $EDGECHAT_CONFIG_DIR/config.yaml or ~/.edgechat/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive conversation
    Chat {
        /// Catalog id of the model to load
        #[arg(short, long)]
        model: Option<String>,
        /// Sensor feed broker as host:port
        #[arg(long)]
        feed: Option<String>,
        /// Topic filter for the sensor feed
        #[arg(long)]
        topic: Option<String>,
    },
    /// List the model catalog
    Models,
    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a config file populated with defaults
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = cli
        .config
        .unwrap_or_else(|| config_file_path(&config_dir()));

    if let Commands::Config {
        action: ConfigAction::Init { force },
    } = cli.command
    {
        init_logger(None, "warn");
        config_cmd::init(&path, force).await?;
        return Ok(());
    }

    let settings = Settings::from_config(&load_and_prepare(&path).await?)?;
    init_logger(settings.log_dir.as_deref(), &settings.log_level);

    match cli.command {
        Commands::Chat { model, feed, topic } => {
            chat_cmd::run(settings.with_overrides(model, feed, topic)).await?;
        }
        Commands::Models => models_cmd::run(&settings.catalog, &settings.model_id),
        Commands::Config { .. } => {}
    }

    Ok(())
}
