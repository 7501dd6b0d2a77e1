//! `frigate-relay`: forwards Frigate NVR detections to a Telegram chat.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use relay_core::digest::{parse_hour, previous_hour};
use relay_core::{
    CaptionFormatter, DigestRunner, Ffmpeg, FrigateClient, MqttLink, MuteWindow, Relay, RelayConfig,
    RelayMetrics,
};
use relay_proto::ChatApi;
use relay_telegram::{CommandHandler, CommandListener, TelegramBot};

/// Frigate Relay - snapshot alerts and event clips from Frigate to Telegram
#[derive(Parser, Debug)]
#[command(name = "frigate-relay", version, about)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "frigate-relay.yml",
        env = "FRIGATE_RELAY_CONFIG"
    )]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Post one hour of recordings per camera, then exit
    Digest {
        /// Hour to digest in local time (default: the previous hour)
        #[arg(long, value_name = "YYYY-MM-DDTHH")]
        hour: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over --verbose
    let filter = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (config, token) = load_config(&cli.config)?;

    if cli.check {
        println!("{}", summary(&cli.config, &config));
        return Ok(());
    }

    match cli.command {
        Some(Command::Digest { hour }) => digest(config, token, hour.as_deref()).await,
        None => run(config, token).await,
    }
}

/// Load, validate, and resolve the bot token. Any failure here is fatal.
fn load_config(path: &Path) -> Result<(RelayConfig, String)> {
    let config = RelayConfig::load(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    let token = config.bot_token()?;
    Ok((config, token))
}

fn summary(path: &Path, config: &RelayConfig) -> String {
    format!(
        "Configuration OK ({})\n  chat:    {}\n  frigate: {}\n  broker:  {}:{} topic {}\n  labels:  {}",
        path.display(),
        config.telegram.chat_id,
        config.frigate.url,
        config.mqtt.host,
        config.mqtt.port,
        config.mqtt.topic,
        config.relay.labels.join(", "),
    )
}

async fn run(config: RelayConfig, token: String) -> Result<()> {
    let shutdown = CancellationToken::new();
    install_signal_handlers(&shutdown);

    let backoff = config.relay.reconnect_backoff();
    let bot = TelegramBot::new(&token, config.http.proxy.as_deref())?
        .with_mute_window(config.relay.mute_window());

    tokio::select! {
        () = shutdown.cancelled() => {
            info!("Shutdown requested before Telegram came up");
            return Ok(());
        }
        connected = bot.connect(backoff) => {
            connected.context("Telegram bot failed to start")?;
        }
    }

    let media = FrigateClient::new(&config.frigate.url, config.frigate.timeout())?;
    let link = MqttLink::new(&config.mqtt);
    let chat_id = config.telegram.chat_id;
    let mute = Arc::new(MuteWindow::new(config.relay.mute_window()));
    let metrics = Arc::new(RelayMetrics::default());

    info!(
        frigate = %media.base_url(),
        broker = %format!("{}:{}", config.mqtt.host, config.mqtt.port),
        chat_id,
        "Starting frigate-relay"
    );

    let client = bot.client().clone();
    let chat: Arc<dyn ChatApi> = Arc::new(bot);
    let relay = Relay::new(
        config,
        Arc::clone(&chat),
        Arc::new(media),
        Arc::clone(&mute),
        Arc::clone(&metrics),
        shutdown.clone(),
    );

    let handler = CommandHandler::new(
        mute,
        metrics,
        relay.connection_state(),
        relay.captions().clone(),
    );
    let listener = CommandListener::new(client, chat, chat_id, handler, backoff);
    let listener = tokio::spawn(listener.run(shutdown.clone()));

    relay.run(link).await;

    if let Err(e) = listener.await {
        warn!(error = %e, "Command listener panicked");
    }
    Ok(())
}

async fn digest(config: RelayConfig, token: String, hour: Option<&str>) -> Result<()> {
    let cameras = config.digest_cameras();
    if cameras.is_empty() {
        bail!("No cameras to digest: set digest.cameras or relay.cameras");
    }
    let hour = match hour {
        Some(hour) => parse_hour(hour)?,
        None => previous_hour(CaptionFormatter::new(&config.relay.timezone).local_now()),
    };

    let bot = TelegramBot::new(&token, config.http.proxy.as_deref())?;
    bot.connect(config.relay.reconnect_backoff())
        .await
        .context("Telegram bot failed to start")?;

    let ffmpeg = Ffmpeg::new(&config.digest.ffmpeg, config.digest.ffmpeg_timeout());
    let runner = DigestRunner::new(
        &config.digest,
        cameras,
        Arc::new(bot),
        config.telegram.chat_id,
        Arc::new(ffmpeg),
    );

    info!(hour = %hour.format("%Y-%m-%dT%H"), "Starting hourly digest");
    let report = runner.run(hour).await;
    info!(
        uploaded = report.uploaded.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Hourly digest finished"
    );

    if !report.is_success() {
        let failed: Vec<&str> = report.failed.iter().map(|(camera, _)| camera.as_str()).collect();
        bail!("Digest failed for {}", failed.join(", "));
    }
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
fn install_signal_handlers(shutdown: &CancellationToken) {
    {
        let token = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received SIGINT, shutting down");
                token.cancel();
            }
        });
    }
    #[cfg(unix)]
    {
        let token = shutdown.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("Received SIGTERM, shutting down");
                    token.cancel();
                }
                Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
            }
        });
    }
}
