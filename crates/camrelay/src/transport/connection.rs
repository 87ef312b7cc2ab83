//! TCP connection lifecycle towards the relay server

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to connect to {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connect to {addr} timed out after {after:?}")]
    Timeout { addr: String, after: Duration },
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("write timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection is closed or already failed")]
    Closed,
}

/// Opens new connections to one fixed server. Holds no connection itself and
/// never retries; the caller owns the retry policy.
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: FrameSink + 'static;

    async fn connect(&self) -> Result<Self::Connection, ConnectError>;

    /// Server address, for log lines
    fn target(&self) -> &str;
}

/// An open connection that accepts complete wire frames.
///
/// `send` is all-or-nothing from the caller's side. After the first error the
/// connection is dead for good and every later `send` returns
/// [`SendError::Closed`]; the owner must `close` it and connect again.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, wire: &[u8]) -> Result<(), SendError>;

    /// Release the socket. Idempotent, never fails.
    async fn close(&mut self);
}

/// Connector for plain TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>, connect_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
            write_timeout,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Connection = TcpConnection;

    async fn connect(&self) -> Result<TcpConnection, ConnectError> {
        let stream = match tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect(self.addr.as_str()),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ConnectError::Io {
                    addr: self.addr.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(ConnectError::Timeout {
                    addr: self.addr.clone(),
                    after: self.connect_timeout,
                })
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("Failed to set TCP_NODELAY on {}: {}", self.addr, e);
        }

        Ok(TcpConnection {
            stream: Some(stream),
            failed: false,
            write_timeout: self.write_timeout,
        })
    }

    fn target(&self) -> &str {
        &self.addr
    }
}

/// One live TCP session to the relay server
pub struct TcpConnection {
    stream: Option<TcpStream>,
    failed: bool,
    write_timeout: Duration,
}

impl TcpConnection {
    pub fn is_open(&self) -> bool {
        self.stream.is_some() && !self.failed
    }
}

#[async_trait]
impl FrameSink for TcpConnection {
    async fn send(&mut self, wire: &[u8]) -> Result<(), SendError> {
        if self.failed {
            return Err(SendError::Closed);
        }
        let stream = self.stream.as_mut().ok_or(SendError::Closed)?;

        // Stays set if this future is dropped mid-write, so a cancelled send
        // leaves the connection unusable and `close` skips the graceful FIN.
        self.failed = true;

        // write_all loops over partial writes until done or an error
        let result = match tokio::time::timeout(self.write_timeout, stream.write_all(wire)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SendError::Io(e)),
            Err(_) => Err(SendError::Timeout(self.write_timeout)),
        };
        self.failed = result.is_err();
        result
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if !self.failed {
                let _ = stream.shutdown().await;
            }
        }
        self.failed = true;
    }
}
