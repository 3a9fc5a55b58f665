//! Reachability probes used by the liveness sweep

use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

/// Default bound on a single probe, in milliseconds
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 500;

/// Result of one probe. Anything but `Alive` counts as down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    Alive,
    Down,
    TimedOut,
}

impl ProbeOutcome {
    pub fn is_alive(self) -> bool {
        self == Self::Alive
    }
}

/// One bounded reachability check against an address
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// Must not fail; errors are reported as [`ProbeOutcome::Down`].
    async fn probe(&self, address: &str, limit: Duration) -> ProbeOutcome;
}

/// ICMP echo through the system `ping` binary
#[derive(Debug, Clone, Default)]
pub struct PingProbe;

#[async_trait]
impl LivenessProbe for PingProbe {
    async fn probe(&self, address: &str, limit: Duration) -> ProbeOutcome {
        // ping takes whole seconds; the outer timeout enforces the real bound
        let wait_secs = limit.as_secs().max(1).to_string();
        let child = tokio::process::Command::new("ping")
            .args(["-c", "1", "-W", wait_secs.as_str(), address])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match timeout(limit, child).await {
            Ok(Ok(status)) if status.success() => ProbeOutcome::Alive,
            Ok(Ok(_)) => ProbeOutcome::Down,
            Ok(Err(e)) => {
                trace!(address, error = %e, "ping could not run");
                ProbeOutcome::Down
            }
            Err(_) => ProbeOutcome::TimedOut,
        }
    }
}

/// TCP connect to a fixed port; a refused connection still proves the host is up
#[derive(Debug, Clone)]
pub struct TcpConnectProbe {
    port: u16,
}

impl TcpConnectProbe {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

#[async_trait]
impl LivenessProbe for TcpConnectProbe {
    async fn probe(&self, address: &str, limit: Duration) -> ProbeOutcome {
        match timeout(limit, TcpStream::connect((address, self.port))).await {
            Ok(Ok(_)) => ProbeOutcome::Alive,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => ProbeOutcome::Alive,
            Ok(Err(e)) => {
                trace!(address, port = self.port, error = %e, "TCP probe failed");
                ProbeOutcome::Down
            }
            Err(_) => ProbeOutcome::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_probe_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let outcome = TcpConnectProbe::new(port)
            .probe("127.0.0.1", Duration::from_secs(1))
            .await;
        assert_eq!(outcome, ProbeOutcome::Alive);
    }

    #[tokio::test]
    async fn test_tcp_probe_unresolvable_host() {
        let outcome = TcpConnectProbe::new(80)
            .probe("no-such-host.invalid", Duration::from_millis(500))
            .await;
        assert!(!outcome.is_alive());
    }

    #[test]
    fn test_outcome_serializes_snake_case() {
        let json = serde_json::to_string(&ProbeOutcome::TimedOut).unwrap();
        assert_eq!(json, "\"timed_out\"");
    }
}
