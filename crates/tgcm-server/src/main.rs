use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use tgcm_api::AppState;
use tgcm_common::recipients::RecipientResolver;
use tgcm_messaging::{BulkMessageCoordinator, DispatchConfig, config};
use tgcm_store::ContactSys;
use tgcm_telegram::{BotApiConfig, BotApiSender, MessageSender, NoopSender};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tgcm", about = "Telegram contact manager and bulk messaging server")]
struct Cli {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value = "8000")]
    port: u16,

    #[arg(long, default_value = "./data")]
    data_dir: String,

    /// Upper bound on concurrent sends within one bulk job.
    #[arg(long, default_value_t = config::DEFAULT_MAX_IN_FLIGHT)]
    max_in_flight: usize,

    /// Minimum spacing between send starts within one bulk job.
    #[arg(long, default_value_t = 1000)]
    send_interval_ms: u64,

    /// Pause applied after a rate-limited send when Telegram gives no retry_after.
    #[arg(long, default_value_t = 5000)]
    rate_limit_backoff_ms: u64,

    #[arg(long, default_value_t = config::DEFAULT_MAX_RETAINED_JOBS)]
    max_retained_jobs: usize,

    /// Comma separated list of allowed origins; empty or `*` allows any.
    #[arg(long, default_value = "*")]
    cors_origins: String,

    #[arg(long, default_value_t = false)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let env_filter = EnvFilter::from_default_env().add_directive("tgcm=info".parse()?);
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let addr = format!("{}:{}", cli.host, cli.port);
    let data_dir = PathBuf::from(&cli.data_dir);
    tokio::fs::create_dir_all(&data_dir).await?;
    let contacts = Arc::new(ContactSys::new(&data_dir).await?);

    let sender: Arc<dyn MessageSender> = match std::env::var("TGCM_BOT_TOKEN") {
        Ok(token) if !token.trim().is_empty() => {
            let mut bot_config = BotApiConfig::new(token.trim());
            if let Ok(api_base) = std::env::var("TGCM_TELEGRAM_API_BASE") {
                let api_base = api_base.trim();
                if !api_base.is_empty() {
                    bot_config.api_base = api_base.to_string();
                }
            }
            info!(api_base = %bot_config.api_base, "telegram bot sender enabled");
            Arc::new(BotApiSender::new(bot_config)?)
        }
        _ => {
            warn!("TGCM_BOT_TOKEN is not set; every send will fail until a token is configured");
            Arc::new(NoopSender)
        }
    };

    let dispatch = DispatchConfig {
        max_in_flight: cli.max_in_flight.max(1),
        send_interval: Duration::from_millis(cli.send_interval_ms),
        rate_limit_backoff: Duration::from_millis(cli.rate_limit_backoff_ms),
        max_retained_jobs: cli.max_retained_jobs,
    };
    info!(
        max_in_flight = dispatch.max_in_flight,
        send_interval_ms = cli.send_interval_ms,
        "bulk dispatch configured"
    );
    let resolver: Arc<dyn RecipientResolver> = contacts.clone();
    let coordinator = BulkMessageCoordinator::new(resolver, sender, dispatch);

    let cors_origins: Vec<String> = cli
        .cors_origins
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect();
    let app = tgcm_api::app_router(Arc::new(AppState::new(contacts, coordinator)), &cors_origins);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("tgcm server listening on {addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
