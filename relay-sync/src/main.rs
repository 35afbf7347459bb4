//! relay-sync - Relay the newest original post to the destination account
//!
//! Meant to be started by an external scheduler (cron, systemd timer, CI
//! schedule). Each invocation performs one relay pass and exits.

use anyhow::Context;
use clap::Parser;
use libcrossrelay::logging::{LogFormat, LoggingConfig};
use libcrossrelay::{Config, RelayOutcome, RelayService};
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "relay-sync")]
#[command(version)]
#[command(about = "Relay the newest original post from the source account")]
#[command(long_about = "\
relay-sync - Relay the newest original post from the source account

DESCRIPTION:
    Fetches the source account's timeline, picks the newest original post
    that has not been relayed yet, downloads its photos, and publishes it
    to the destination account with a link back to the original.

    At most one post is relayed per invocation. The relay cursor is only
    advanced after the destination confirms the post, so a failed run is
    retried by the next invocation.

CONFIGURATION:
    Environment variables (a .env file in the working directory is read):
        TARGET_X_USERNAME        Source account handle (without @)
        X_AUTH_TOKEN, X_CT0      Source session cookies
        X_FEED_URL               RSS mirror base URL (used without session cookies)
        BILIBILI_SESSDATA        Destination session cookie
        BILIBILI_BILI_JCT        Destination CSRF cookie
        BILIBILI_BUVID3          Destination device cookie (optional)
        CROSSRELAY_CURSOR_PATH   Cursor file (default: <data dir>/crossrelay/last_id.json)
        CROSSRELAY_SCRATCH_DIR   Media download directory

    Alternatively, point --config / CROSSRELAY_CONFIG at a TOML file.

EXIT CODES:
    0 - Run completed (see log output for the outcome)
    1 - Configuration error
    2 - Authentication material rejected during setup
")]
struct Cli {
    /// TOML configuration file (overrides environment variables)
    #[arg(short, long, env = "CROSSRELAY_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log output format (text, json, pretty)
    #[arg(long, env = "CROSSRELAY_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    LoggingConfig::from_env()
        .with_format(cli.log_format)
        .with_verbose(cli.verbose)
        .init();

    let service = match build_service(&cli) {
        Ok(service) => service,
        Err(e) => {
            error!("{:#}", e);
            let code = e
                .downcast_ref::<libcrossrelay::RelayError>()
                .map(|e| e.exit_code())
                .unwrap_or(1);
            std::process::exit(code);
        }
    };

    match service.run().await {
        RelayOutcome::NoNewItem => info!("Nothing to relay"),
        RelayOutcome::Relayed {
            item_id,
            post_id,
            cursor_persisted: true,
        } => info!(item_id = %item_id, post_id = %post_id, "Relay complete"),
        RelayOutcome::Relayed {
            item_id,
            post_id,
            cursor_persisted: false,
        } => warn!(
            item_id = %item_id,
            post_id = %post_id,
            cursor = %service.cursor_store().path().display(),
            "Relay complete but cursor is stale; set last_id by hand to avoid a duplicate"
        ),
        RelayOutcome::RelayFailed { stage, reason } => {
            warn!(stage = %stage, reason = %reason, "Relay did not complete; will retry next run")
        }
    }
}

fn build_service(cli: &Cli) -> anyhow::Result<RelayService> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::load().context("loading configuration from environment")?,
    };
    info!(
        account = %config.target_account,
        source = config.source.auth.mode(),
        cursor = %config.cursor_path().display(),
        "Configuration loaded"
    );

    Ok(RelayService::from_config(&config)?)
}
