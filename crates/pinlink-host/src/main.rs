//! pinlink console runner.
//!
//! Connects to one board, prints its handshake, optionally blinks the onboard
//! LED, and shuts down cleanly on Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load HostConfig (file, then CLI overrides)
//!  └─ Session::from_config()
//!  └─ wait_for_connect()        -- cancelled by Ctrl-C
//!  └─ blink loop / idle         -- until Ctrl-C or the link drops
//!  └─ Session::disconnect()
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pinlink_core::domain::pins::ONBOARD_LED_PIN;
use pinlink_host::infrastructure::storage::config::{self, ConfigError};
use pinlink_host::{HostConfig, Session, TransportKind};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Host-side runner for pinlink I/O boards.
#[derive(Debug, Parser)]
#[command(name = "pinlink", about = "Connect to a pinlink board", version)]
struct Cli {
    /// Path to the TOML config file.  Defaults to the platform config dir.
    #[arg(long, env = "PINLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Dial the board at `host:port`.
    #[arg(long, conflicts_with_all = ["listen", "serial"])]
    address: Option<String>,

    /// Bind `host:port` and wait for the board to dial in.
    #[arg(long, conflicts_with = "serial")]
    listen: Option<String>,

    /// Open the board's serial port (requires the `serial` feature).
    #[arg(long)]
    serial: Option<String>,

    /// Serial baud rate.
    #[arg(long)]
    baud: Option<u32>,

    /// Toggle the onboard LED every half second once connected.
    #[arg(long)]
    blink: bool,
}

impl Cli {
    /// Applies command-line overrides on top of the file configuration.
    fn apply_to(&self, cfg: &mut HostConfig) {
        if let Some(address) = &self.address {
            cfg.transport.kind = TransportKind::TcpDial;
            cfg.transport.address = address.clone();
        }
        if let Some(address) = &self.listen {
            cfg.transport.kind = TransportKind::TcpListen;
            cfg.transport.address = address.clone();
        }
        if let Some(path) = &self.serial {
            cfg.transport.kind = TransportKind::Serial;
            cfg.transport.address = path.clone();
        }
        if let Some(baud) = self.baud {
            cfg.transport.baud = baud;
        }
    }

    fn load_config(&self) -> anyhow::Result<HostConfig> {
        let path = match &self.config {
            Some(path) => path.clone(),
            None => match config::config_file_path() {
                Ok(path) => path,
                Err(ConfigError::NoPlatformConfigDir) => return Ok(HostConfig::default()),
                Err(e) => return Err(e.into()),
            },
        };
        config::load_or_default(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = cli.load_config()?;
    cli.apply_to(&mut cfg);

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level)),
        )
        .init();

    let session = Session::from_config(&cfg).context("failed to create session")?;
    info!("pinlink starting, waiting for board");

    tokio::select! {
        result = session.wait_for_connect() => result.context("failed to connect to board")?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            session.disconnect();
            return Ok(());
        }
    }

    if let Some(hs) = session.handshake() {
        info!(
            hardware = %hs.hardware_id,
            bootloader = %hs.bootloader_id,
            firmware = %hs.firmware_id,
            protocol = hs.protocol_version,
            "connected"
        );
    }

    tokio::select! {
        result = run(&session, cli.blink) => {
            if let Err(e) = result {
                warn!(error = %e, "stopped");
            }
        }
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
    }

    session.disconnect();
    info!("pinlink stopped");
    Ok(())
}

/// Blinks the LED (if asked) until the connection ends.
async fn run(session: &Session, blink: bool) -> anyhow::Result<()> {
    if !blink {
        session.closed().await;
        anyhow::bail!("connection to board ended");
    }

    let led = session.open_digital_output(ONBOARD_LED_PIN, false, false).await?;
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    let mut on = false;
    loop {
        ticker.tick().await;
        on = !on;
        led.write(on).await?;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
