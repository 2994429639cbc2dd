//! # Skirmish Relay Server
//!
//! The hub peers connect to for a networked match, and the client side of
//! that connection.
//!
//! The hub runs no simulation. It numbers peers as they join and forwards
//! every order a peer sends to all other peers, one JSON object per line.
//! A `quit` from any peer ends the match.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod client;
pub mod error;
pub mod hub;

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub use client::TcpRelay;
pub use error::{Result, ServerError};
pub use hub::{HubSummary, RelayHub};

/// Port the hub listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 31500;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub host: String,
    /// Port to listen on. 0 picks a free port.
    pub port: u16,
    /// Maximum players per match.
    pub max_players: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_players: 8,
        }
    }
}

impl ServerConfig {
    /// Load a configuration from a RON file. Missing fields keep their
    /// defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        ron::from_str(&text).map_err(|e| ServerError::Config(e.to_string()))
    }

    /// The socket address to bind.
    ///
    /// # Errors
    /// Returns an error if `host` is not an IP address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip = self
            .host
            .parse()
            .map_err(|_| ServerError::Config(format!("invalid host address '{}'", self.host)))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.bind_addr().unwrap().port(), DEFAULT_PORT);
    }

    #[test]
    fn test_load_partial_ron() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.ron");
        std::fs::write(&path, "(port: 4000, max_players: 2)").unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.max_players, 2);
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn test_bad_host_rejected() {
        let config = ServerConfig {
            host: "not an address".to_string(),
            ..ServerConfig::default()
        };
        assert!(matches!(config.bind_addr(), Err(ServerError::Config(_))));
    }
}
