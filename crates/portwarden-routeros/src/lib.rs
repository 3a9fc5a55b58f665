//! Portwarden RouterOS - switch management API client
//!
//! This crate speaks the RouterOS binary API over TCP to log in to a
//! switch and read its bridge host (MAC address) table.

pub mod query;
pub mod transport;

use std::time::Duration;
use thiserror::Error;

pub use query::{HostEntry, RouterOsClient, RouterOsConfig, DEFAULT_TIMEOUT_MS, ROUTEROS_API_PORT};
pub use transport::ApiConnection;

#[derive(Error, Debug)]
pub enum HostTableError {
    #[error("cannot connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("login rejected: {0}")]
    Auth(String),
    #[error("{command} failed: {message}")]
    Trap { command: String, message: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
