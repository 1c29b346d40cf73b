use anyhow::Context;
use channel_flow::channel::Channel;
use channel_flow::config::ChannelConfig;
use channel_flow::episode::format_clock;
use channel_flow::schedule::now_millis;
use channel_flow::server;
use chrono::{Local, TimeZone};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "channelflow",
    version,
    about = "Virtual broadcast channel over a video library"
)]
struct Cli {
    /// JSON config file (every field optional)
    #[arg(short, long, global = true, env = "CHANNELFLOW_CONFIG")]
    config: Option<PathBuf>,
    #[command(flatten)]
    overrides: Overrides,
    #[command(subcommand)]
    command: Commands,
}

/// Settings that take precedence over the config file.
#[derive(Args)]
struct Overrides {
    /// Library root, one folder per show
    #[arg(long, global = true, env = "CHANNELFLOW_MEDIA_ROOT")]
    media_root: Option<PathBuf>,
    /// Address to listen on
    #[arg(long, global = true, env = "CHANNELFLOW_BIND")]
    bind: Option<String>,
    /// Where the on-air episode is persisted
    #[arg(long, global = true, env = "CHANNELFLOW_STATE_FILE")]
    state_file: Option<PathBuf>,
    #[arg(long, global = true, env = "CHANNELFLOW_FFMPEG")]
    ffmpeg: Option<PathBuf>,
    #[arg(long, global = true, env = "CHANNELFLOW_FFPROBE")]
    ffprobe: Option<PathBuf>,
    /// Seconds between catalog rescans
    #[arg(long, global = true, env = "CHANNELFLOW_RESCAN_SECS")]
    rescan_secs: Option<u64>,
    /// Seconds between state writes
    #[arg(long, global = true, env = "CHANNELFLOW_PERSIST_SECS")]
    persist_secs: Option<u64>,
}

impl Overrides {
    fn apply(self, config: &mut ChannelConfig) {
        if let Some(v) = self.media_root {
            config.media_root = v;
        }
        if let Some(v) = self.bind {
            config.bind = v;
        }
        if let Some(v) = self.state_file {
            config.state_file = v;
        }
        if let Some(v) = self.ffmpeg {
            config.ffmpeg = v;
        }
        if let Some(v) = self.ffprobe {
            config.ffprobe = v;
        }
        if let Some(v) = self.rescan_secs {
            config.rescan_interval_secs = v;
        }
        if let Some(v) = self.persist_secs {
            config.persist_interval_secs = v;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the channel's HTTP server
    Serve,
    /// Show what is on air right now
    Now,
    /// List upcoming programmes
    Guide {
        /// Number of items to show
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },
    /// Scan the library and list shows
    Scan,
}

fn load_config(path: Option<&PathBuf>, overrides: Overrides) -> anyhow::Result<ChannelConfig> {
    let mut config = match path {
        Some(path) => ChannelConfig::load_from(path)?,
        None => ChannelConfig::default(),
    };
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn local_clock(ms: i64) -> String {
    Local
        .timestamp_millis_opt(ms)
        .single()
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref(), cli.overrides)?;

    match cli.command {
        Commands::Serve => {
            let bind = config.bind.clone();
            let listener = TcpListener::bind(&bind)
                .await
                .with_context(|| format!("binding {}", bind))?;
            let channel = Arc::new(Channel::from_config(config));
            // Scanning can take minutes on a cold duration cache; answer 503 meanwhile.
            let startup = channel.launch();

            server::serve(channel.clone(), listener, shutdown_signal()).await?;
            if !startup.is_finished() {
                startup.abort();
            }
            channel.shutdown().await;
        }
        Commands::Now => {
            let channel = Channel::from_config(config);
            let now = now_millis();
            channel.initialize(now).await;
            print!("{}", channel.now_airing(now)?.to_text());
        }
        Commands::Guide { count } => {
            let channel = Channel::from_config(config);
            let now = now_millis();
            channel.initialize(now).await;
            let items = channel.upcoming(now)?;
            if items.is_empty() {
                println!("Nothing scheduled.");
            }
            for item in items.iter().take(count) {
                let marker = if item.is_on_air(now) { ">" } else { " " };
                println!(
                    "{} {}  {:<40} {}",
                    marker,
                    local_clock(item.start_time),
                    item.episode.label(),
                    item.episode.duration_display()
                );
            }
        }
        Commands::Scan => {
            let channel = Channel::from_config(config);
            let shows = channel.scan_catalog().await?;
            for show in &shows {
                let total: u64 = show.episodes.iter().map(|e| e.duration.as_secs()).sum();
                println!(
                    "{} ({} episode(s), {})",
                    show.name,
                    show.episode_count(),
                    format_clock(total)
                );
            }
            println!("{} show(s)", shows.len());
        }
    }

    Ok(())
}
