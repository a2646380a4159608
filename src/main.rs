use clap::{Parser, Subcommand};
use smsbatch::cli::send::SendArgs;
use smsbatch::config::resolve_config_path;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "smsbatch")]
#[command(about = "Paced SMS batch dispatch service", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API (default)
    Run,
    /// Send a single batch and print progress
    Send {
        /// Recipient in E.164 form, e.g. +15551234567
        #[arg(long)]
        to: String,
        #[arg(long, allow_negative_numbers = true)]
        count: i64,
        /// Slow, Medium or Fast; anything else means Medium
        #[arg(long, default_value = "Medium")]
        speed: String,
        /// Send this text instead of the built-in templates
        #[arg(long)]
        message: Option<String>,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,
    },
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "smsbatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run) | None => {
            smsbatch::cli::run::run(config_path).await?;
        }
        Some(Commands::Send {
            to,
            count,
            speed,
            message,
        }) => {
            smsbatch::cli::send::send(
                config_path,
                SendArgs {
                    to,
                    count,
                    speed,
                    message,
                },
            )
            .await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => {
                smsbatch::cli::config::init(stdout)?;
            }
            ConfigAction::Validate => {
                smsbatch::cli::config::validate(config_path)?;
            }
        },
    }

    Ok(())
}
