//! Relay probe
//!
//! Attaches to one remote participant's media through the relay and reports
//! connection status and received frames until interrupted.
//!
//! # Usage
//!
//! ```bash
//! passage-probe \
//!   --relay-url wss://relay.example.com/ws \
//!   --server-location 10.0.0.7 \
//!   --participant-id remote-1
//!
//! # With a TURN server and a config file for the rest
//! passage-probe --config passage.toml \
//!   --turn-server turn:relay.example.com:3478:user:secret \
//!   --participant-id remote-1
//! ```

use clap::Parser;
use passage_core::config::{LogFormat, LoggingConfig};
use passage_core::directory::Participant;
use passage_core::events::{EventBus, GlobalEvent};
use passage_core::logging;
use passage_webrtc::{create_video_chat, MediaSinks, TurnServerConfig, VerseConfig, VideoFrame};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Passage relay probe
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML file with [verse] and [logging] sections
    #[arg(long, env = "PASSAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Relay WebSocket URL (overrides the config file)
    #[arg(long, env = "PASSAGE_RELAY_URL")]
    relay_url: Option<String>,

    /// Remote participant to attach to
    #[arg(long, env = "PASSAGE_PARTICIPANT_ID")]
    participant_id: String,

    /// Server location of the remote participant
    #[arg(long, default_value = "local", env = "PASSAGE_SERVER_LOCATION")]
    server_location: String,

    /// STUN servers (comma-separated, replaces configured ones)
    #[arg(long, value_delimiter = ',')]
    stun_server: Vec<String>,

    /// TURN servers (format: turn:host:port:username:password, comma-separated)
    #[arg(long, value_delimiter = ',', env = "PASSAGE_TURN_SERVERS")]
    turn_server: Vec<TurnServerConfig>,

    /// Log format: text, json (overrides the config file)
    #[arg(long, env = "PASSAGE_LOG_FORMAT")]
    log_format: Option<LogFormatArg>,

    /// Seconds between frame count reports
    #[arg(long, default_value_t = 5)]
    report_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProbeConfig {
    verse: VerseConfig,
    logging: LoggingConfig,
}

fn load_config(args: &Args) -> Result<ProbeConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => {
            let source = std::fs::read_to_string(path)?;
            toml::from_str(&source)?
        }
        None => ProbeConfig::default(),
    };

    if let Some(url) = &args.relay_url {
        config.verse.relay_url = url.clone();
    }
    if !args.stun_server.is_empty() {
        config.verse.stun_servers = args.stun_server.clone();
    }
    config.verse.turn_servers.extend(args.turn_server.iter().cloned());
    if let Some(format) = args.log_format {
        config.logging.format = format.into();
    }

    config.verse.validate()?;
    config.logging.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args)?;
    logging::init(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        relay = %config.verse.relay_url,
        participant = %args.participant_id,
        "Passage probe starting"
    );

    let bus = EventBus::init();
    let _ready = bus.subscribe(GlobalEvent::VideoChatReady, |_| info!("Video chat ready"));

    let frames = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&frames);
    let sinks = MediaSinks::default().with_video(Arc::new(move |frame: &VideoFrame| {
        if counter.fetch_add(1, Ordering::Relaxed) == 0 {
            info!("First frame: {}x{}", frame.width, frame.height);
        }
    }));

    let provider = create_video_chat(&config.verse)?;
    let mut participant = Participant::new(args.participant_id.clone());
    participant.server_location = args.server_location.clone();

    if let Err(e) = provider.attach_media(&participant, sinks).await {
        error!("Failed to attach media: {}", e);
        EventBus::teardown();
        return Err(e.into());
    }

    if let Some(connection) = provider.connection(&participant.id) {
        connection
            .status()
            .on_status_change
            .add(|state| info!("Relay connection is now {}", state));
    }

    let mut report = tokio::time::interval(Duration::from_secs(args.report_interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = report.tick() => {
                info!("Frames received: {}", frames.load(Ordering::Relaxed));
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, detaching");
                break;
            }
        }
    }

    provider.detach_media(&participant.id);
    EventBus::teardown();
    Ok(())
}
