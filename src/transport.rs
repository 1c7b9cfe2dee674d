//! Opening connections to the detector server.
//!
//! The server answers one request per connection and then closes it, so
//! every request dials afresh. An acquisition keeps its control connection
//! open until the frame stream ends.

use crate::error::{DetectorError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error};

/// Which server port a connection goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    Control,
    Stop,
}

/// Source of fresh connections to a detector.
pub trait Dialer: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn dial(&self, port: Port) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// TCP dialer for a real detector server.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    host: String,
    ctrl_port: u16,
    stop_port: u16,
    connect_timeout: Duration,
}

impl TcpDialer {
    pub fn new(host: &str, ctrl_port: u16, stop_port: u16, connect_timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            ctrl_port,
            stop_port,
            connect_timeout,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port number behind `port`.
    pub fn port_number(&self, port: Port) -> u16 {
        match port {
            Port::Control => self.ctrl_port,
            Port::Stop => self.stop_port,
        }
    }
}

impl Dialer for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&self, port: Port) -> Result<TcpStream> {
        let addr = format!("{}:{}", self.host, self.port_number(port));
        debug!("Connecting to {port:?} port at {addr}");

        let stream = timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                error!("Connection timeout to {addr}");
                DetectorError::Timeout(format!("Connection timeout to {addr}"))
            })?
            .map_err(|e| {
                error!("Failed to connect to {addr}: {e}");
                DetectorError::connection(format!("Failed to connect to {addr}: {e}"))
            })?;

        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
