//! Daemon configuration. §6 ambient stack: all settings have sensible
//! defaults; environment variables prefixed `FMAIL_` override them.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level `fmail-hubd` / `fmail-relay` configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub presence: PresenceConfig,
    pub relay: RelayConfig,
    pub log: LogConfig,
}

/// L7 connection acceptor settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Project root the hub serves. Defaults to the current directory.
    pub root: PathBuf,
    /// TCP listen address for cross-host access. `None` disables the TCP
    /// listener; the Unix socket under `<root>/.fmail/forged.sock` always
    /// runs.
    pub tcp_addr: Option<SocketAddr>,
}

/// §4.5 presence heartbeat.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub interval: Duration,
}

/// §4.9 outbound relay client.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Peers to relay from, as `host:port` pairs.
    pub peers: Vec<SocketAddr>,
}

/// Logging, via `tracing-subscriber`'s `EnvFilter`.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive string, e.g. `"fmail=info"`. `RUST_LOG` always wins
    /// over this when set.
    pub filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig::default(),
            presence: PresenceConfig::default(),
            relay: RelayConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            tcp_addr: None,
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        PresenceConfig {
            interval: crate::presence::T_PRESENCE,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig { peers: vec![] }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: "fmail=info".to_string(),
        }
    }
}

impl Config {
    /// Load config, applying environment-variable overrides on top of
    /// defaults. Malformed overrides are logged and ignored rather than
    /// aborting startup.
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("FMAIL_ROOT") {
            cfg.server.root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("FMAIL_TCP_ADDR") {
            match v.parse() {
                Ok(addr) => cfg.server.tcp_addr = Some(addr),
                Err(e) => tracing::warn!(value = %v, error = %e, "ignoring invalid FMAIL_TCP_ADDR"),
            }
        }
        if let Ok(v) = std::env::var("FMAIL_PRESENCE_INTERVAL_MS") {
            match v.parse::<u64>() {
                Ok(ms) => cfg.presence.interval = Duration::from_millis(ms),
                Err(e) => tracing::warn!(value = %v, error = %e, "ignoring invalid FMAIL_PRESENCE_INTERVAL_MS"),
            }
        }
        if let Ok(v) = std::env::var("FMAIL_RELAY_PEERS") {
            cfg.relay.peers = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(|s| match s.parse() {
                    Ok(addr) => Some(addr),
                    Err(e) => {
                        tracing::warn!(peer = %s, error = %e, "ignoring invalid relay peer");
                        None
                    }
                })
                .collect();
        }
        if let Ok(v) = std::env::var("FMAIL_LOG") {
            cfg.log.filter = v;
        }

        cfg
    }
}
