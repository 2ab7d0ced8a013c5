//! TCP transport.
//!
//! TCP has no user-visible send buffer accounting, so the buffered amount is
//! always zero and the writer is paced by the kernel through `write` itself.

use super::{Channel, LowWaterFn};
use crate::Result;
use async_trait::async_trait;
use log::debug;
use std::net::{Shutdown, SocketAddr};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

/// One side of a TCP connection split into independently lockable halves.
pub struct StreamChannel {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    peer: SocketAddr,
}

impl StreamChannel {
    pub fn new(stream: TcpStream) -> Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            peer,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

/// Connects to `remote`, applying `buffer_size` to both socket buffers when non-zero.
pub async fn dial(remote: SocketAddr, buffer_size: usize) -> Result<StreamChannel> {
    let stream = TcpStream::connect(remote).await?;
    if buffer_size > 0 {
        let socket = socket2::SockRef::from(&stream);
        socket.set_send_buffer_size(buffer_size)?;
        socket.set_recv_buffer_size(buffer_size)?;
        debug!(
            "tcp buffers for {}: send={} recv={}",
            remote,
            socket.send_buffer_size()?,
            socket.recv_buffer_size()?
        );
    }
    StreamChannel::new(stream)
}

pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    Ok(TcpListener::bind(addr).await?)
}

pub async fn accept(listener: &TcpListener) -> Result<(StreamChannel, SocketAddr)> {
    let (stream, addr) = listener.accept().await?;
    Ok((StreamChannel::new(stream)?, addr))
}

#[async_trait]
impl Channel for StreamChannel {
    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut reader = self.reader.lock().await;
        Ok(reader.read(buf).await?)
    }

    async fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut writer = self.writer.lock().await;
        Ok(writer.write(buf).await?)
    }

    fn buffered_amount(&self) -> usize {
        0
    }

    fn set_buffered_amount_low_threshold(&self, _threshold: usize) {}

    fn on_buffered_amount_low(&self, _callback: LowWaterFn) {}

    async fn close_write(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }

    async fn close_read(&self) -> Result<()> {
        let reader = self.reader.lock().await;
        let stream: &TcpStream = (*reader).as_ref();
        ignore_not_connected(socket2::SockRef::from(stream).shutdown(Shutdown::Read))
    }

    async fn close(&self) -> Result<()> {
        let writer = self.writer.lock().await;
        let stream: &TcpStream = (*writer).as_ref();
        ignore_not_connected(socket2::SockRef::from(stream).shutdown(Shutdown::Both))
    }
}

// Once both FINs have been exchanged the socket is already closed.
fn ignore_not_connected(result: std::io::Result<()>) -> Result<()> {
    match result {
        Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
        other => Ok(other?),
    }
}
