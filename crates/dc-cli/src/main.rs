//! devcast command-line entry point
//!
//! Parses the arguments, builds the launch parameters and supervises a
//! single agent session until it fails, disconnects, or Ctrl+C.

mod cli;
mod config;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use dc_bridge::Adb;
use dc_session::{LogLevel, Session, SessionCallbacks};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;

#[derive(Debug)]
enum SessionEvent {
    ConnectionFailed,
    Connected,
    Disconnected,
}

/// Forwards the session callbacks into the main event loop
struct EventForwarder {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionCallbacks for EventForwarder {
    fn on_connection_failed(&self) {
        let _ = self.tx.send(SessionEvent::ConnectionFailed);
    }

    fn on_connected(&self) {
        let _ = self.tx.send(SessionEvent::Connected);
    }

    fn on_disconnected(&self) {
        let _ = self.tx.send(SessionEvent::Disconnected);
    }
}

/// Host-side tracing level matching the agent verbosity
fn tracing_level(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Verbose => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);
    let config = config::load_config(&config_path)?;

    let config_log_level = config
        .log_level
        .as_deref()
        .map(|s| cli::parse_log_level(s).map_err(anyhow::Error::msg))
        .transpose()?;
    let log_level = args
        .log_level
        .or(config_log_level)
        .unwrap_or(LogLevel::Info);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| tracing_level(log_level).into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let adb = match &config.adb_path {
        Some(path) => Adb::with_executable(path.clone()),
        None => Adb::new(),
    };

    let params = args.into_params(&config)?;
    let list_query = params.is_list_query();

    let (tx, mut events) = mpsc::unbounded_channel();
    let session = Session::new(
        Arc::new(adb),
        &params,
        Arc::new(EventForwarder { tx }),
    );
    session.start();

    let first = events.recv().await.context("session ended unexpectedly")?;
    match first {
        SessionEvent::ConnectionFailed => {
            session.join().await;
            bail!("Could not connect to the device");
        }
        SessionEvent::Connected => {}
        SessionEvent::Disconnected => unreachable!("disconnected before connected"),
    }

    if list_query {
        // The agent printed its listing and already exited
        session.join().await;
        return Ok(());
    }

    if let Some(info) = session.device_info() {
        tracing::info!(device_name = %info.device_name, "Device connected");
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping...");
        }
        event = events.recv() => {
            if matches!(event, Some(SessionEvent::Disconnected)) {
                tracing::info!("Device disconnected");
            }
        }
    }

    session.stop();
    session.join().await;
    Ok(())
}
