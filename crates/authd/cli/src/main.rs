//! authd CLI - inspect and exercise authorization policy
//!
//! The CLI loads the start-up policy the same way the service does and
//! then lets an operator:
//! - validate and import additional policy documents
//! - export the effective policy
//! - show the rule that governs a right and how it was resolved
//! - evaluate a right for a user without prompting

use anyhow::Context;
use authd_service::{AuthorizationService, ServiceConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod check;
mod policy;

/// authd CLI application
#[derive(Parser)]
#[command(name = "authd")]
#[command(about = "authd - local authorization policy tool", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "AUTHD_CONFIG")]
    config: Option<PathBuf>,

    /// Start-up policy document, instead of the bundled one
    #[arg(short, long, env = "AUTHD_POLICY")]
    policy: Option<PathBuf>,

    /// Skip the start-up policy import
    #[arg(long)]
    empty: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a policy document over the start-up policy
    Import {
        /// Policy document (JSON)
        file: PathBuf,

        /// Replace rules regardless of their version
        #[arg(long)]
        overwrite: bool,
    },

    /// Print the effective policy document
    Export {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the rule governing a right
    Show {
        right: String,
    },

    /// Show which stored rule a right resolves to
    Resolve {
        right: String,
    },

    /// Evaluate a right without prompting
    Check(check::CheckArgs),

    /// Show configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ServiceConfig::load(cli.config.as_deref()).context("loading configuration")?;

    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.log_filter.clone().unwrap_or_else(|| "info".to_string())
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time().with_writer(std::io::stderr))
        .init();

    if let Some(policy) = cli.policy {
        config.policy_path = Some(policy);
    }
    if cli.empty {
        config.import_on_start = false;
    }

    match cli.command {
        Commands::Import { file, overwrite } => {
            let service = policy::open(&config)?;
            policy::import(&service, &file, overwrite)
        }
        Commands::Export { output } => {
            let service = policy::open(&config)?;
            policy::export(&service, output.as_deref())
        }
        Commands::Show { right } => {
            let service = policy::open(&config)?;
            policy::show(&service, &right)
        }
        Commands::Resolve { right } => {
            let service = policy::open(&config)?;
            policy::resolve(&service, &right)
        }
        Commands::Check(args) => check::execute(&config, args).await,
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Service over a fresh store, loaded with the start-up policy.
fn open_service(
    config: &ServiceConfig,
    env: authd_engine::Collaborators,
) -> anyhow::Result<AuthorizationService> {
    AuthorizationService::new(config, env).context("loading start-up policy")
}
