//! Command line and tunnel configuration

use clap::Parser;
use l2tun_transport::AddressFamily;
use thiserror::Error;

/// l2tun - Tunnel raw Ethernet frames over TCP
#[derive(Parser, Debug)]
#[command(name = "l2tun")]
#[command(about = "Tunnel raw Ethernet frames between two hosts over a TCP connection")]
#[command(version, long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
#[command(after_help = r#"EXAMPLES:
  # Server: bridge eth1 to whoever connects on port 5000
  l2tun -i eth1 -l 5000

  # Client: bridge eth1 to the server
  l2tun -i eth1 tunnel.example.com 5000

ENVIRONMENT VARIABLES:
  L2TUN_INTERFACE  Layer-2 interface to capture and inject on
  RUST_LOG         Log filter (overrides --log-level)"#)]
pub struct Cli {
    /// Layer-2 interface to capture frames on and inject frames into
    #[arg(short, long, env = "L2TUN_INTERFACE")]
    pub interface: String,

    /// Listen for one peer at a time on PORT instead of connecting out
    #[arg(short, long, value_name = "PORT")]
    pub listen: Option<u16>,

    /// Use IPv4 only
    #[arg(short = '4')]
    pub ipv4_only: bool,

    /// Use IPv6 only
    #[arg(short = '6')]
    pub ipv6_only: bool,

    /// Pending connection queue length in server mode
    #[arg(long, default_value = "1")]
    pub backlog: i32,

    /// Exit after the first session in server mode
    #[arg(long)]
    pub once: bool,

    /// Put the interface into promiscuous mode
    #[arg(long)]
    pub promisc: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Peer to connect to (client mode)
    pub host: Option<String>,

    /// Peer port (client mode)
    pub port: Option<u16>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Client mode needs HOST and PORT (or use --listen PORT)")]
    MissingPeer,

    #[error("HOST and PORT cannot be combined with --listen")]
    PeerWithListen,

    #[error("Port 0 is not a valid tunnel port")]
    InvalidPort,

    #[error("Backlog must be at least 1 (got {0})")]
    InvalidBacklog(i32),

    #[error("Interface name is empty")]
    EmptyInterface,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Client { host: String, port: u16 },
    Server { port: u16, backlog: i32, once: bool },
}

/// Validated run configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    pub interface: String,
    pub mode: Mode,
    pub family: AddressFamily,
    pub promiscuous: bool,
}

impl TryFrom<&Cli> for TunnelConfig {
    type Error = ConfigError;

    fn try_from(cli: &Cli) -> Result<Self, Self::Error> {
        if cli.interface.trim().is_empty() {
            return Err(ConfigError::EmptyInterface);
        }

        let mode = match (cli.listen, &cli.host, cli.port) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                return Err(ConfigError::PeerWithListen);
            }
            (Some(port), None, None) => {
                if cli.backlog < 1 {
                    return Err(ConfigError::InvalidBacklog(cli.backlog));
                }
                Mode::Server {
                    port: nonzero_port(port)?,
                    backlog: cli.backlog,
                    once: cli.once,
                }
            }
            (None, Some(host), Some(port)) => Mode::Client {
                host: host.clone(),
                port: nonzero_port(port)?,
            },
            (None, _, _) => return Err(ConfigError::MissingPeer),
        };

        Ok(Self {
            interface: cli.interface.clone(),
            mode,
            family: AddressFamily::from_only_flags(cli.ipv4_only, cli.ipv6_only),
            promiscuous: cli.promisc,
        })
    }
}

fn nonzero_port(port: u16) -> Result<u16, ConfigError> {
    if port == 0 {
        return Err(ConfigError::InvalidPort);
    }
    Ok(port)
}
