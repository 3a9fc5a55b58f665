//! Switch queries over the RouterOS API

use secrecy::{ExposeSecret, SecretString};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::transport::{ApiConnection, Row};
use crate::HostTableError;

/// RouterOS API port (plaintext)
pub const ROUTEROS_API_PORT: u16 = 8728;

/// Default timeout for connect, login and each reply
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// One row of a switch's bridge host table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    /// Interface the MAC was learned on, e.g. `ether5`
    pub interface: String,
    /// MAC as reported by the switch
    pub mac: String,
}

impl HostEntry {
    fn from_row(row: &Row) -> Option<Self> {
        Some(Self {
            interface: row.get("on-interface")?.clone(),
            mac: row.get("mac-address")?.clone(),
        })
    }
}

/// Credentials and limits for talking to switches
#[derive(Debug, Clone)]
pub struct RouterOsConfig {
    pub username: String,
    pub password: SecretString,
    pub port: u16,
    pub timeout: Duration,
}

impl RouterOsConfig {
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
            port: ROUTEROS_API_PORT,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

/// Reads bridge host tables from RouterOS switches
#[derive(Debug, Clone)]
pub struct RouterOsClient {
    config: RouterOsConfig,
}

impl RouterOsClient {
    pub fn new(config: RouterOsConfig) -> Self {
        Self { config }
    }

    /// Open a session and log in. `address` may carry its own port.
    pub async fn login(&self, address: &str) -> Result<ApiConnection<TcpStream>, HostTableError> {
        let (host, port) = match address.parse::<SocketAddr>() {
            Ok(addr) => (addr.ip().to_string(), addr.port()),
            Err(_) => (address.to_string(), self.config.port),
        };

        let mut conn = ApiConnection::connect(&host, port, self.config.timeout).await?;
        let name = format!("=name={}", self.config.username);
        let password = format!("=password={}", self.config.password.expose_secret());

        match conn.command(&["/login", name.as_str(), password.as_str()]).await {
            Ok(_) => {}
            Err(HostTableError::Trap { message, .. }) => {
                warn!(host = %host, user = %self.config.username, "RouterOS login rejected");
                return Err(HostTableError::Auth(message));
            }
            Err(e) => return Err(e),
        }

        debug!(host = %host, port, "Logged in to RouterOS");
        Ok(conn)
    }

    /// Fetch `/interface/bridge/host` from the switch at `address`
    pub async fn bridge_hosts(&self, address: &str) -> Result<Vec<HostEntry>, HostTableError> {
        let mut conn = self.login(address).await?;
        let rows = conn.command(&["/interface/bridge/host/print"]).await?;

        let total = rows.len();
        let entries: Vec<HostEntry> = rows.iter().filter_map(HostEntry::from_row).collect();
        if entries.len() < total {
            debug!(
                skipped = total - entries.len(),
                "Bridge host rows without interface or MAC"
            );
        }

        info!(address, entries = entries.len(), "Fetched bridge host table");
        Ok(entries)
    }
}
