//! ats: command-line front-end for the ATS session client
//!
//! Credentials persist between runs in the configured credentials file; the
//! access token does not, so each run restores its session through a refresh.

mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ats")]
#[command(version)]
#[command(about = "Sign in to the ATS and make authorized API calls")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Backend API base URL (overrides config)
    #[arg(long, global = true, env = ats_core::config::API_BASE_URL_ENV)]
    api_url: Option<String>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Log in with email and password
    Login {
        #[arg(short, long)]
        email: String,

        #[arg(short, long, env = "ATS_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Create an organization and its first user
    Register {
        #[arg(short, long)]
        email: String,

        #[arg(short, long, env = "ATS_PASSWORD", hide_env_values = true)]
        password: String,

        /// Display name
        #[arg(short, long)]
        name: String,

        /// Organization name
        #[arg(short, long)]
        organization: String,
    },

    /// End the session and revoke the refresh token
    Logout,

    /// Show who the current session belongs to
    Whoami {
        /// Ask the backend instead of reading the access token
        #[arg(long)]
        remote: bool,
    },

    /// Authorized GET, prints the JSON response
    Get {
        /// API path, e.g. /api/jobs
        path: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Print the config file path
    Path,
    /// Print the effective configuration
    Show,
    /// Write a default config file if none exists
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stderr, stdout carries command output
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ats_cli=info,ats_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = ats_core::Config::load().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}, using defaults", e);
        ats_core::Config::default()
    });
    if let Some(url) = cli.api_url {
        config.client.api_base_url = url;
    }

    match cli.command {
        Commands::Login { email, password } => commands::login(&config, email, password).await,
        Commands::Register {
            email,
            password,
            name,
            organization,
        } => commands::register(&config, email, password, name, organization).await,
        Commands::Logout => commands::logout(&config).await,
        Commands::Whoami { remote } => commands::whoami(&config, remote).await,
        Commands::Get { path } => commands::get(&config, &path).await,
        Commands::Config { command } => match command {
            ConfigCommands::Path => commands::config_path(),
            ConfigCommands::Show => commands::config_show(&config),
            ConfigCommands::Init => commands::config_init(),
        },
    }
}
