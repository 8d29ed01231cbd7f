//! Command channel: one text line per short-lived tcp connection.
//!
//! the bridge never answers, so a successful send only means the line was
//! written before the connection closed.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::config::BridgeEndpoint;
use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCommand {
    /// open the given serial port on the bridge host
    ConnectSerial(String),
    DisconnectSerial,
    StartSampling,
    StopSampling,
}

impl BridgeCommand {
    pub fn connect_serial(port: &str) -> Result<Self> {
        let port = port.trim();
        if port.is_empty() || port.chars().any(char::is_whitespace) {
            return Err(BridgeError::Protocol(format!(
                "invalid serial port name {:?}",
                port
            )));
        }
        Ok(BridgeCommand::ConnectSerial(port.to_string()))
    }

    /// the exact bytes sent on the wire
    pub fn wire_line(&self) -> String {
        format!("{}\n", self)
    }
}

impl fmt::Display for BridgeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeCommand::ConnectSerial(port) => write!(f, "CONNECT_SERIAL {}", port),
            BridgeCommand::DisconnectSerial => f.write_str("DISCONNECT_SERIAL"),
            BridgeCommand::StartSampling => f.write_str("START_SAMPLING"),
            BridgeCommand::StopSampling => f.write_str("STOP_SAMPLING"),
        }
    }
}

impl FromStr for BridgeCommand {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split_whitespace();
        let verb = parts.next().unwrap_or_default();
        let rest: Vec<&str> = parts.collect();

        match (verb, rest.as_slice()) {
            ("CONNECT_SERIAL", [port]) => BridgeCommand::connect_serial(port),
            ("DISCONNECT_SERIAL", []) => Ok(BridgeCommand::DisconnectSerial),
            ("START_SAMPLING", []) => Ok(BridgeCommand::StartSampling),
            ("STOP_SAMPLING", []) => Ok(BridgeCommand::StopSampling),
            _ => Err(BridgeError::Protocol(format!("unknown bridge command {:?}", s.trim()))),
        }
    }
}

/// Sends control commands to the bridge command port.
#[derive(Debug, Clone)]
pub struct BridgeCommander {
    addr: String,
    timeout: Duration,
}

impl BridgeCommander {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    pub fn from_endpoint(endpoint: &BridgeEndpoint) -> Self {
        Self::new(endpoint.command_addr(), endpoint.command_timeout())
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Connect, write one line, close. Bounded by the command timeout.
    pub async fn send(&self, command: &BridgeCommand) -> Result<()> {
        debug!(addr = %self.addr, command = %command, "sending bridge command");
        let exchange = async {
            let mut stream = TcpStream::connect(self.addr.as_str())
                .await
                .map_err(|e| BridgeError::Connection(format!("{}: {}", self.addr, e)))?;
            stream.write_all(command.wire_line().as_bytes()).await?;
            stream.shutdown().await?;
            Ok::<(), BridgeError>(())
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| BridgeError::Timeout {
                target: self.addr.clone(),
                timeout: self.timeout,
            })??;

        info!(command = %command, "bridge command sent");
        Ok(())
    }

    pub async fn connect_serial(&self, port: &str) -> Result<()> {
        self.send(&BridgeCommand::connect_serial(port)?).await
    }

    pub async fn disconnect_serial(&self) -> Result<()> {
        self.send(&BridgeCommand::DisconnectSerial).await
    }

    pub async fn start_sampling(&self) -> Result<()> {
        self.send(&BridgeCommand::StartSampling).await
    }

    pub async fn stop_sampling(&self) -> Result<()> {
        self.send(&BridgeCommand::StopSampling).await
    }
}
