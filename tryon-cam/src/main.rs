//! Try-on camera client entry point.
//!
//! ```text
//! tryon-cam                               Stream with the configured tier
//! tryon-cam stream --tier realtime        Stream over the WebSocket channel
//! tryon-cam stream --duration 30          Stop after 30 seconds
//! tryon-cam snapshot --out overlay.jpg    One still through /single-tryon
//! tryon-cam targets                       List built-in targets
//! tryon-cam --config <path>               Load a custom config TOML
//! tryon-cam --gen-config                  Write default config to stdout
//! ```

use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tryon_cam::config::ClientConfig;
use tryon_cam::service::TryOnService;
use tryon_core::ProcessingTier;
use tryon_core::stream::catalog;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tryon-cam", about = "Stream camera frames to a remote try-on service")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "tryon-cam.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to `--config` and exit.
    #[arg(long)]
    init_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream frames until Ctrl-C (or `--duration`).
    Stream {
        /// Stop after this many seconds.
        #[arg(long)]
        duration: Option<u64>,
        /// Override the configured tier.
        #[arg(long)]
        tier: Option<ProcessingTier>,
        /// Override the configured target id.
        #[arg(long)]
        target: Option<String>,
    },
    /// Capture and process a single still.
    Snapshot {
        /// Where to write the returned overlay.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Override the configured target id.
        #[arg(long)]
        target: Option<String>,
    },
    /// List the built-in try-on targets.
    Targets,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&ClientConfig::default())?;
        println!("{text}");
        return Ok(());
    }
    if cli.init_config {
        ClientConfig::write_default(&cli.config)?;
        println!("Default config written to {}", cli.config.display());
        return Ok(());
    }

    let command = cli.command.unwrap_or(Command::Stream {
        duration: None,
        tier: None,
        target: None,
    });

    if let Command::Targets = command {
        for target in catalog::TARGETS {
            println!(
                "{:<10} {:<22} {:<8} {}",
                target.id, target.name, target.kind, target.category
            );
        }
        return Ok(());
    }

    // Load config.
    let mut config = ClientConfig::load(&cli.config);

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = File::create(&config.logging.file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }

    info!("tryon-cam v{}", env!("CARGO_PKG_VERSION"));

    match command {
        Command::Stream {
            duration,
            tier,
            target,
        } => {
            if let Some(id) = target {
                config.target.product_id = id;
            }
            let tier = tier.unwrap_or_else(|| config.tier());
            info!("server: {}", config.server.base_url);
            info!("tier: {tier}");
            info!("target: {}", config.target.product_id);

            let service = TryOnService::new(config, tier);
            let session = service.prepare_stream()?;
            let handle = session.handle();

            // Ctrl-C handler.
            let stop = handle.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Ctrl-C received, stopping");
                stop.stop();
            });

            if let Some(secs) = duration {
                let stop = handle.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                    info!("duration elapsed, stopping");
                    stop.stop();
                });
            }

            service.run_stream(session).await?;
        }
        Command::Snapshot { out, target } => {
            if let Some(id) = target {
                config.target.product_id = id;
            }
            let service = TryOnService::new(config, ProcessingTier::SingleImage);
            let result = service.snapshot(out.as_deref()).await?;
            if result.image.is_none() {
                println!(
                    "no overlay returned ({})",
                    result.diagnostic.as_deref().unwrap_or("no note")
                );
            }
        }
        Command::Targets => {}
    }

    Ok(())
}
