//! wishare: command-line session client for Wishare
//!
//! Every invocation behaves like one browser tab:
//! - Durable storage is shared by all invocations
//! - `--tab <id>` keeps tab storage across invocations, like a page reload
//! - Without `--tab`, tab storage lives only as long as the process

mod app;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use wishare_core::Config;

use crate::app::App;

#[derive(Parser, Debug)]
#[command(name = "wishare", version, about = "Wishare session client")]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Tab id whose session to use
    #[arg(long, env = "WISHARE_TAB", global = true)]
    tab: Option<String>,

    /// Override the API base URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and make the session active in this tab
    Login {
        #[arg(long)]
        username: String,

        #[arg(long, env = "WISHARE_PASSWORD", hide_env_values = true)]
        password: String,

        /// Keep this login in its own namespace
        #[arg(long)]
        user_id: Option<String>,
    },

    /// Log out of the tab's session
    Logout,

    /// Show the tab's session state
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Refresh the access token now
    Refresh,

    /// Fetch the logged-in user's profile
    Whoami,

    /// Verify the stored session with the backend; clears it when rejected
    Check,

    /// Print the effective configuration
    #[command(name = "config")]
    ShowConfig {
        /// Also write it to the config file
        #[arg(long)]
        write: bool,
    },

    /// Print a session snapshot periodically
    Monitor {
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long)]
        duration_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays parseable
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "wishare=info,wishare_core=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config_path = cli.config;
    let mut config = match config_path {
        Some(ref path) if !path.exists() => {
            tracing::warn!("Config file {} not found, using defaults", path.display());
            Config::default()
        }
        Some(ref path) => Config::load_from(path)?,
        None => Config::load().unwrap_or_else(|e| {
            tracing::warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        }),
    };
    if let Some(url) = cli.api_url {
        config.api.base_url = url;
    }

    let app = App::open(config, cli.tab)?;

    match cli.command {
        Command::Login {
            username,
            password,
            user_id,
        } => app.login(&username, &password, user_id.as_deref()).await,
        Command::Logout => app.logout().await,
        Command::Status { json } => app.status(json),
        Command::Refresh => app.refresh().await,
        Command::Whoami => app.whoami().await,
        Command::Check => app.check().await,
        Command::ShowConfig { write } => app.show_config(write, config_path.as_deref()),
        Command::Monitor {
            interval_ms,
            duration_secs,
        } => {
            app.monitor(
                interval_ms.map(Duration::from_millis),
                duration_secs.map(Duration::from_secs),
            )
            .await
        }
    }
}
