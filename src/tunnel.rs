//! Client and server controller loops

use crate::config::{Mode, TunnelConfig};
use anyhow::{Context, Result};
use l2tun_session::{Session, SessionSummary};
use l2tun_transport::{format_endpoint, LinkSocket, StreamSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often blocked controller waits look at the shutdown flag
const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub fn run(config: &TunnelConfig, shutdown: &AtomicBool) -> Result<()> {
    match &config.mode {
        Mode::Client { host, port } => {
            // Fail on a bad interface before touching the network
            let link = open_link(config)?;
            info!(host = %host, port, family = ?config.family, "Connecting");
            let stream = StreamSocket::connect(host, *port, config.family)
                .with_context(|| format!("Failed to connect to {}:{}", host, port))?;
            run_session(link, stream, shutdown)?;
            Ok(())
        }
        Mode::Server {
            port,
            backlog,
            once,
        } => serve(config, *port, *backlog, *once, shutdown),
    }
}

fn serve(
    config: &TunnelConfig,
    port: u16,
    backlog: i32,
    once: bool,
    shutdown: &AtomicBool,
) -> Result<()> {
    let listener = StreamSocket::listen(port, backlog, config.family)
        .with_context(|| format!("Failed to listen on port {}", port))?;
    if let Ok(local) = listener.local_addr() {
        info!(endpoint = %format_endpoint(&local), "Listening for peers");
    }

    // The link is opened per session: cancellation is permanent for a socket
    let mut sessions = 0u64;
    while !shutdown.load(Ordering::Relaxed) {
        let accepted = match listener.accept_timeout(POLL_INTERVAL) {
            Ok(accepted) => accepted,
            Err(e) if e.is_connection_reset() => {
                warn!(error = %e, "Peer went away during accept");
                continue;
            }
            Err(e) => return Err(e).context("Failed to accept connection"),
        };
        let Some((stream, peer)) = accepted else {
            continue;
        };
        info!(peer = %format_endpoint(&peer), "Accepted connection");

        let link = open_link(config)?;
        run_session(link, stream, shutdown)?;
        sessions += 1;

        if once {
            break;
        }
    }

    info!(sessions, "Server stopped");
    Ok(())
}

fn open_link(config: &TunnelConfig) -> Result<LinkSocket> {
    let link = LinkSocket::open(&config.interface)
        .with_context(|| format!("Failed to open interface {}", config.interface))?;
    if config.promiscuous {
        link.set_promiscuous(true)
            .with_context(|| format!("Failed to enable promiscuous mode on {}", config.interface))?;
    }
    Ok(link)
}

/// Run one session until a worker exits or shutdown is requested
fn run_session(
    link: LinkSocket,
    stream: StreamSocket,
    shutdown: &AtomicBool,
) -> Result<SessionSummary> {
    let local = stream.local_addr().map(|a| format_endpoint(&a)).unwrap_or_default();
    let peer = stream.peer_addr().map(|a| format_endpoint(&a)).unwrap_or_default();
    info!(
        interface = link.interface(),
        mtu = link.mtu(),
        local = %local,
        peer = %peer,
        "Tunnel up"
    );

    let mtu = link.mtu();
    let session = Session::start(mtu, Arc::new(link), Arc::new(stream))
        .context("Failed to start session workers")?;

    loop {
        if session.wait_timeout(POLL_INTERVAL) {
            debug!("Worker exited");
            break;
        }
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested");
            break;
        }
    }

    let summary = session.shutdown();
    info!(peer = %peer, %summary, "Tunnel down");
    Ok(summary)
}
