//! l2tun CLI - Bridge a layer-2 interface to a remote peer over TCP
//!
//! One side listens, the other connects. Every Ethernet frame seen on the
//! local interface is sent to the peer, and every frame the peer sends is
//! injected on the local interface.

mod config;
mod tunnel;

use anyhow::{Context, Result};
use clap::Parser;
use config::{Cli, TunnelConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

fn install_signal_handlers() {
    // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
    unsafe {
        libc::signal(libc::SIGINT, signal_handler as *const () as libc::sighandler_t);
        libc::signal(libc::SIGTERM, signal_handler as *const () as libc::sighandler_t);
    }
}

/// Setup logging. `RUST_LOG` wins over `--log-level`.
fn setup_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_names(true))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    let config = TunnelConfig::try_from(&cli).context("Invalid arguments")?;

    info!(
        version = env!("GIT_TAG"),
        commit = env!("GIT_HASH"),
        protocol = l2tun_proto::PROTOCOL_VERSION,
        "l2tun starting"
    );
    info!(
        interface = %config.interface,
        mode = ?config.mode,
        family = ?config.family,
        "Configuration"
    );

    install_signal_handlers();
    tunnel::run(&config, &SHUTDOWN)?;

    info!("l2tun stopped");
    Ok(())
}
