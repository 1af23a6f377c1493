//! TCP channel implementation
//!
//! Frames are length-delimited by the 8-byte header. The reader
//! accumulates bytes into a buffer and cuts whole frames out of it, so
//! a `recv` future dropped between polls never loses a partial read.

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use meridian_core::{Event, MeridianError, MeridianResult};
use meridian_wire::{decode_payload, encode_event, FrameHeader, FRAME_HEADER_SIZE};

use crate::channel::{Channel, ChannelAddr, ChannelFactory, ChannelListener};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// A connected TCP channel
pub struct TcpChannel {
    stream: TcpStream,
    peer: SocketAddr,
    read_buf: BytesMut,
}

impl TcpChannel {
    /// Connect to a remote endpoint
    pub async fn connect(addr: SocketAddr) -> MeridianResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| MeridianError::ConnectFailed(format!("{}: {}", addr, e)))?;
        // Control traffic is small and latency-sensitive
        stream.set_nodelay(true)?;
        Ok(TcpChannel::new(stream, addr))
    }

    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        TcpChannel {
            stream,
            peer,
            read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
        }
    }

    /// Cut one whole frame out of the read buffer, if present
    fn take_frame(&mut self) -> MeridianResult<Option<Event>> {
        if self.read_buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let header = FrameHeader::parse(&self.read_buf[..FRAME_HEADER_SIZE])?;
        let total = header.length as usize;
        if self.read_buf.len() < total {
            return Ok(None);
        }
        let frame = self.read_buf.split_to(total);
        let event = decode_payload(&header, &frame[FRAME_HEADER_SIZE..])?;
        Ok(Some(event))
    }
}

#[async_trait]
impl Channel for TcpChannel {
    async fn send(&mut self, event: &Event) -> MeridianResult<()> {
        let bytes = encode_event(event)?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> MeridianResult<Event> {
        loop {
            if let Some(event) = self.take_frame()? {
                return Ok(event);
            }
            // read_buf appends in a single poll, keeping recv cancel safe
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(MeridianError::ChannelClosed);
            }
        }
    }

    fn peer_addr(&self) -> ChannelAddr {
        ChannelAddr::Tcp(self.peer)
    }

    async fn shutdown(&mut self) -> MeridianResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Bound TCP listener producing [`TcpChannel`]s
pub struct TcpChannelListener {
    listener: TcpListener,
    local: SocketAddr,
}

impl TcpChannelListener {
    pub async fn bind(addr: SocketAddr) -> MeridianResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        Ok(TcpChannelListener { listener, local })
    }
}

#[async_trait]
impl ChannelListener for TcpChannelListener {
    async fn accept(&mut self) -> MeridianResult<(Box<dyn Channel>, ChannelAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!("set_nodelay failed for {}: {}", peer, e);
        }
        let channel = TcpChannel::new(stream, peer);
        Ok((Box::new(channel), ChannelAddr::Tcp(peer)))
    }

    fn local_addr(&self) -> ChannelAddr {
        ChannelAddr::Tcp(self.local)
    }
}

/// Factory for TCP channels and listeners
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpFactory;

#[async_trait]
impl ChannelFactory for TcpFactory {
    async fn connect(&self, addr: &ChannelAddr) -> MeridianResult<Box<dyn Channel>> {
        match addr {
            ChannelAddr::Tcp(sock) => Ok(Box::new(TcpChannel::connect(*sock).await?)),
            other => Err(MeridianError::AddressResolution(format!(
                "not a tcp address: {}",
                other
            ))),
        }
    }

    async fn bind(&self, addr: &ChannelAddr) -> MeridianResult<Box<dyn ChannelListener>> {
        match addr {
            ChannelAddr::Tcp(sock) => Ok(Box::new(TcpChannelListener::bind(*sock).await?)),
            other => Err(MeridianError::AddressResolution(format!(
                "not a tcp address: {}",
                other
            ))),
        }
    }
}
