//! Channel abstraction: framed, bidirectional event pipes
//!
//! A channel is a connected pipe that moves whole events between two
//! endpoints. Exactly one task owns a channel at a time; implementations
//! keep no socket state behind locks.

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;

use meridian_core::{Event, MeridianResult};

/// Address of a channel endpoint
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChannelAddr {
    /// TCP endpoint
    Tcp(SocketAddr),
    /// In-process endpoint, addressed by hub name
    Memory(String),
}

impl ChannelAddr {
    pub fn memory(name: impl Into<String>) -> Self {
        ChannelAddr::Memory(name.into())
    }
}

impl fmt::Display for ChannelAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelAddr::Tcp(addr) => write!(f, "tcp://{}", addr),
            ChannelAddr::Memory(name) => write!(f, "mem://{}", name),
        }
    }
}

/// A connected, framed event pipe
#[async_trait]
pub trait Channel: Send {
    /// Send one event as a single frame
    async fn send(&mut self, event: &Event) -> MeridianResult<()>;

    /// Receive the next event
    ///
    /// Implementations must be cancellation safe: dropping the returned
    /// future between polls never loses or tears a frame.
    async fn recv(&mut self) -> MeridianResult<Event>;

    /// Address of the remote endpoint
    fn peer_addr(&self) -> ChannelAddr;

    /// Close the channel
    async fn shutdown(&mut self) -> MeridianResult<()>;
}

/// Accepts inbound channels on a bound address
#[async_trait]
pub trait ChannelListener: Send {
    /// Wait for the next inbound connection
    async fn accept(&mut self) -> MeridianResult<(Box<dyn Channel>, ChannelAddr)>;

    /// Address the listener is bound to
    fn local_addr(&self) -> ChannelAddr;
}

/// Creates channels and listeners for one address family
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    async fn connect(&self, addr: &ChannelAddr) -> MeridianResult<Box<dyn Channel>>;

    async fn bind(&self, addr: &ChannelAddr) -> MeridianResult<Box<dyn ChannelListener>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_display() {
        let tcp = ChannelAddr::Tcp("127.0.0.1:4840".parse().unwrap());
        assert_eq!(tcp.to_string(), "tcp://127.0.0.1:4840");

        let mem = ChannelAddr::memory("directory");
        assert_eq!(mem.to_string(), "mem://directory");
    }
}
