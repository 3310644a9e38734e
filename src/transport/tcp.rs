//! TCP transport.
//!
//! # Example
//!
//! ```ignore
//! use nsq_subscriber::transport::{connect, HostAddr};
//!
//! let addr: HostAddr = "127.0.0.1:4150".parse()?;
//! let stream = connect(&addr, Duration::from_secs(3)).await?;
//! let (reader, writer) = stream.into_split();
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::{NsqError, Result};

/// A `host:port` pair as returned by lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostAddr {
    pub host: String,
    pub port: u16,
}

impl HostAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl FromStr for HostAddr {
    type Err = NsqError;

    /// Accepts `host:port` and `[v6addr]:port`.
    fn from_str(value: &str) -> Result<Self> {
        let invalid = || NsqError::InvalidArgument(format!("invalid host address {:?}", value));

        let (host, port) = value.trim().rsplit_once(':').ok_or_else(invalid)?;
        let host = match host.strip_prefix('[') {
            Some(inner) => inner.strip_suffix(']').ok_or_else(invalid)?,
            None if host.contains(':') => return Err(invalid()),
            None => host,
        };
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A connected, non-blocking TCP stream to a queue host.
pub struct NsqStream {
    stream: TcpStream,
}

impl NsqStream {
    /// Split into owned read and write halves.
    pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        self.stream.into_split()
    }

    /// Get a reference to the underlying stream.
    pub fn inner(&self) -> &TcpStream {
        &self.stream
    }
}

/// Connect to `addr`, failing with `Timeout("connect")` after `timeout`.
pub async fn connect(addr: &HostAddr, timeout: Duration) -> Result<NsqStream> {
    let target = (addr.host.as_str(), addr.port);
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
        Ok(result) => result?,
        Err(_) => return Err(NsqError::Timeout("connect")),
    };
    stream.set_nodelay(true)?;
    Ok(NsqStream { stream })
}
