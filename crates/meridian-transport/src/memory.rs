//! In-process channels over paired queues
//!
//! The simulation harness runs whole stations inside one process.
//! Endpoints rendezvous through a named hub instead of the network,
//! with the same whole-event semantics as TCP.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use meridian_core::{Event, MeridianError, MeridianResult};

use crate::channel::{Channel, ChannelAddr, ChannelFactory, ChannelListener};

const PIPE_DEPTH: usize = 64;
const ACCEPT_BACKLOG: usize = 16;

/// One endpoint of an in-process channel pair
pub struct MemoryChannel {
    tx: mpsc::Sender<Event>,
    rx: mpsc::Receiver<Event>,
    peer: ChannelAddr,
}

impl MemoryChannel {
    /// Build a connected pair of endpoints
    pub fn pair(client_name: &str, server_name: &str) -> (MemoryChannel, MemoryChannel) {
        let (client_tx, client_rx) = mpsc::channel(PIPE_DEPTH);
        let (server_tx, server_rx) = mpsc::channel(PIPE_DEPTH);

        let client = MemoryChannel {
            tx: server_tx,
            rx: client_rx,
            peer: ChannelAddr::memory(server_name),
        };
        let server = MemoryChannel {
            tx: client_tx,
            rx: server_rx,
            peer: ChannelAddr::memory(client_name),
        };
        (client, server)
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn send(&mut self, event: &Event) -> MeridianResult<()> {
        self.tx
            .send(event.clone())
            .await
            .map_err(|_| MeridianError::ChannelClosed)
    }

    async fn recv(&mut self) -> MeridianResult<Event> {
        self.rx.recv().await.ok_or(MeridianError::ChannelClosed)
    }

    fn peer_addr(&self) -> ChannelAddr {
        self.peer.clone()
    }

    async fn shutdown(&mut self) -> MeridianResult<()> {
        self.rx.close();
        Ok(())
    }
}

#[derive(Default)]
struct HubInner {
    listeners: HashMap<String, mpsc::Sender<(MemoryChannel, ChannelAddr)>>,
    next_conn: u64,
}

/// Registry of in-process listeners
///
/// Clones share one registry, so every endpoint of a simulated station
/// uses the same hub instance.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        MemoryHub::default()
    }

    fn connect_to(&self, name: &str) -> MeridianResult<MemoryChannel> {
        let (accept_tx, conn) = {
            let mut inner = self.inner.lock();
            let accept_tx = inner
                .listeners
                .get(name)
                .cloned()
                .ok_or_else(|| {
                    MeridianError::ConnectFailed(format!("no listener at mem://{}", name))
                })?;
            inner.next_conn += 1;
            (accept_tx, inner.next_conn)
        };

        let client_name = format!("{}.conn{}", name, conn);
        let (client, server) = MemoryChannel::pair(&client_name, name);
        accept_tx
            .try_send((server, ChannelAddr::memory(client_name)))
            .map_err(|_| {
                MeridianError::ConnectFailed(format!("listener at mem://{} not accepting", name))
            })?;
        Ok(client)
    }

    fn bind_name(&self, name: &str) -> MeridianResult<MemoryListener> {
        let (accept_tx, accept_rx) = mpsc::channel(ACCEPT_BACKLOG);
        let mut inner = self.inner.lock();
        if inner.listeners.contains_key(name) {
            return Err(MeridianError::AddressResolution(format!(
                "mem://{} already bound",
                name
            )));
        }
        inner.listeners.insert(name.to_string(), accept_tx);
        Ok(MemoryListener {
            name: name.to_string(),
            accept_rx,
            hub: self.clone(),
        })
    }

    fn unbind(&self, name: &str) {
        self.inner.lock().listeners.remove(name);
    }
}

#[async_trait]
impl ChannelFactory for MemoryHub {
    async fn connect(&self, addr: &ChannelAddr) -> MeridianResult<Box<dyn Channel>> {
        match addr {
            ChannelAddr::Memory(name) => Ok(Box::new(self.connect_to(name)?)),
            other => Err(MeridianError::AddressResolution(format!(
                "not a memory address: {}",
                other
            ))),
        }
    }

    async fn bind(&self, addr: &ChannelAddr) -> MeridianResult<Box<dyn ChannelListener>> {
        match addr {
            ChannelAddr::Memory(name) => Ok(Box::new(self.bind_name(name)?)),
            other => Err(MeridianError::AddressResolution(format!(
                "not a memory address: {}",
                other
            ))),
        }
    }
}

/// Listener side of a hub name
pub struct MemoryListener {
    name: String,
    accept_rx: mpsc::Receiver<(MemoryChannel, ChannelAddr)>,
    hub: MemoryHub,
}

#[async_trait]
impl ChannelListener for MemoryListener {
    async fn accept(&mut self) -> MeridianResult<(Box<dyn Channel>, ChannelAddr)> {
        let (channel, peer) = self
            .accept_rx
            .recv()
            .await
            .ok_or(MeridianError::ChannelClosed)?;
        Ok((Box::new(channel), peer))
    }

    fn local_addr(&self) -> ChannelAddr {
        ChannelAddr::memory(&self.name)
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.hub.unbind(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::{ForwardSignal, Signal};

    #[tokio::test]
    async fn test_pair_roundtrip() {
        let (mut client, mut server) = MemoryChannel::pair("producer", "collector");

        let event = Event::with_payload(Signal::Forward(ForwardSignal::Update), vec![1, 2, 3]);
        client.send(&event).await.unwrap();
        assert_eq!(server.recv().await.unwrap(), event);

        assert_eq!(client.peer_addr(), ChannelAddr::memory("collector"));
        assert_eq!(server.peer_addr(), ChannelAddr::memory("producer"));
    }

    #[tokio::test]
    async fn test_hub_connect_accept() {
        let hub = MemoryHub::new();
        let mut listener = hub.bind(&ChannelAddr::memory("directory")).await.unwrap();

        let mut client = hub.connect(&ChannelAddr::memory("directory")).await.unwrap();
        let (mut server, peer) = listener.accept().await.unwrap();
        assert!(matches!(peer, ChannelAddr::Memory(_)));

        let event = Event::new(Signal::Forward(ForwardSignal::Register)).with_seq(9);
        client.send(&event).await.unwrap();
        assert_eq!(server.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_connect_unbound_name_fails() {
        let hub = MemoryHub::new();
        assert!(matches!(
            hub.connect(&ChannelAddr::memory("nowhere")).await,
            Err(MeridianError::ConnectFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_double_bind_rejected_until_drop() {
        let hub = MemoryHub::new();
        let addr = ChannelAddr::memory("directory");

        let listener = hub.bind(&addr).await.unwrap();
        assert!(hub.bind(&addr).await.is_err());

        drop(listener);
        assert!(hub.bind(&addr).await.is_ok());
    }

    #[tokio::test]
    async fn test_peer_drop_closes_channel() {
        let (mut client, server) = MemoryChannel::pair("a", "b");
        drop(server);

        assert!(matches!(
            client.recv().await,
            Err(MeridianError::ChannelClosed)
        ));
    }
}
