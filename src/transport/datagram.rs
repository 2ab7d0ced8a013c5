//! SCTP data channels over UDP.
//!
//! One association per UDP 5-tuple, one data channel per association. The
//! client opens the channel with id [`CHANNEL_ID`]; ordering and reliability
//! travel to the server in the channel-open message.

use super::{Channel, LowWaterFn};
use crate::config::{ChannelOptions, Reliability, MAX_DATAGRAM_MESSAGE_SIZE};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, warn};
use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use webrtc_data::data_channel::{self, DataChannel};
use webrtc_data::message::message_channel_open::ChannelType;
use webrtc_sctp::association::{self, Association};
use webrtc_util::conn::{conn_udp_listener, Listener};
use webrtc_util::Conn;

/// Stream identifier of the benchmark data channel.
pub const CHANNEL_ID: u16 = 777;

/// Upper bound on the association handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on the graceful association shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const CHANNEL_LABEL: &str = "data";

/// An established SCTP association with a single peer.
pub struct DatagramConnection {
    association: Arc<Association>,
    remote: SocketAddr,
}

impl DatagramConnection {
    /// Opens the benchmark data channel (client side).
    pub async fn open_channel(&self, id: u16, options: &ChannelOptions) -> Result<DatagramChannel> {
        let config = data_channel::Config {
            channel_type: channel_type(options),
            reliability_parameter: options.reliability_parameter(),
            label: CHANNEL_LABEL.to_string(),
            ..Default::default()
        };

        let channel = DataChannel::dial(&self.association, id, config).await?;
        debug!("opened data channel {} to {}", id, self.remote);
        Ok(DatagramChannel::new(channel))
    }

    /// Waits for the peer to open a data channel (server side).
    pub async fn accept_channel(&self) -> Result<DatagramChannel> {
        let channel =
            DataChannel::accept::<DataChannel>(&self.association, data_channel::Config::default(), &[])
                .await?;
        Ok(DatagramChannel::new(channel))
    }

    /// Shuts the association down gracefully, falling back to an abrupt close.
    pub async fn close(&self) -> Result<()> {
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.association.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("association shutdown with {}: {}", self.remote, e),
            Err(_) => warn!("association shutdown with {} timed out", self.remote),
        }
        self.association.close().await?;
        Ok(())
    }
}

fn association_config(
    conn: Arc<dyn Conn + Send + Sync>,
    buffer_size: usize,
    name: String,
) -> association::Config {
    association::Config {
        net_conn: conn,
        max_receive_buffer_size: u32::try_from(buffer_size).unwrap_or(u32::MAX),
        max_message_size: MAX_DATAGRAM_MESSAGE_SIZE as u32,
        name,
    }
}

async fn handshake<F>(remote: SocketAddr, fut: F) -> Result<Association>
where
    F: Future<Output = std::result::Result<Association, webrtc_sctp::Error>>,
{
    match tokio::time::timeout(HANDSHAKE_TIMEOUT, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(Error::Transport(format!(
            "association handshake with {} timed out",
            remote
        ))),
    }
}

/// Dials `remote` over UDP and runs the client side of the association handshake.
pub async fn dial(remote: SocketAddr, buffer_size: usize) -> Result<DatagramConnection> {
    let local = if remote.is_ipv4() {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
    } else {
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
    };

    let socket = UdpSocket::bind(local).await?;
    if buffer_size > 0 {
        let sock = socket2::SockRef::from(&socket);
        sock.set_send_buffer_size(buffer_size)?;
        sock.set_recv_buffer_size(buffer_size)?;
        debug!(
            "udp buffers: send={} recv={}",
            sock.send_buffer_size()?,
            sock.recv_buffer_size()?
        );
    }
    socket.connect(remote).await?;

    let conn: Arc<dyn Conn + Send + Sync> = Arc::new(socket);
    let config = association_config(conn, buffer_size, format!("client-{}", remote));
    let association = handshake(remote, Association::client(config)).await?;

    Ok(DatagramConnection {
        association: Arc::new(association),
        remote,
    })
}

/// UDP listener demultiplexing peers into per-peer connections.
pub struct DatagramListener {
    inner: Box<dyn Listener + Send + Sync>,
    local: SocketAddr,
    buffer_size: usize,
}

impl DatagramListener {
    pub async fn bind(addr: SocketAddr, buffer_size: usize) -> Result<Self> {
        let listener = conn_udp_listener::listen(addr).await?;
        let local = listener.addr().await?;
        Ok(Self {
            inner: Box::new(listener),
            local,
            buffer_size,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Waits for a datagram from a new peer.
    ///
    /// The association handshake is not run here; see [`DatagramListener::handshake`].
    pub async fn accept(&self) -> Result<(Arc<dyn Conn + Send + Sync>, SocketAddr)> {
        Ok(self.inner.accept().await?)
    }

    /// Runs the server side of the association handshake on an accepted peer.
    pub async fn handshake(
        &self,
        conn: Arc<dyn Conn + Send + Sync>,
        remote: SocketAddr,
    ) -> Result<DatagramConnection> {
        server_handshake(conn, remote, self.buffer_size).await
    }
}

/// Server side of the association handshake, usable from a spawned task.
pub async fn server_handshake(
    conn: Arc<dyn Conn + Send + Sync>,
    remote: SocketAddr,
    buffer_size: usize,
) -> Result<DatagramConnection> {
    let config = association_config(conn, buffer_size, format!("server-{}", remote));
    let association = handshake(remote, Association::server(config)).await?;
    Ok(DatagramConnection {
        association: Arc::new(association),
        remote,
    })
}

/// A data channel seen through the [`Channel`] surface.
pub struct DatagramChannel {
    inner: Arc<DataChannel>,
}

impl DatagramChannel {
    fn new(channel: DataChannel) -> Self {
        Self {
            inner: Arc::new(channel),
        }
    }

    /// Ordering and reliability negotiated for this channel.
    pub fn options(&self) -> ChannelOptions {
        channel_options(
            self.inner.config.channel_type,
            self.inner.config.reliability_parameter,
        )
    }
}

#[async_trait]
impl Channel for DatagramChannel {
    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.inner.read(buf).await?)
    }

    async fn write(&self, buf: &[u8]) -> Result<usize> {
        Ok(self.inner.write(&Bytes::copy_from_slice(buf)).await?)
    }

    fn buffered_amount(&self) -> usize {
        self.inner.buffered_amount()
    }

    fn set_buffered_amount_low_threshold(&self, threshold: usize) {
        self.inner.set_buffered_amount_low_threshold(threshold);
    }

    fn on_buffered_amount_low(&self, callback: LowWaterFn) {
        self.inner.on_buffered_amount_low(Box::new(
            move || -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
                callback();
                Box::pin(async {})
            },
        ));
    }

    async fn close_write(&self) -> Result<()> {
        Ok(self.inner.close().await?)
    }

    // Closing a data channel resets both directions at once.
    async fn close_read(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(self.inner.close().await?)
    }
}

/// Maps ordering and reliability settings onto the channel-open type.
pub fn channel_type(options: &ChannelOptions) -> ChannelType {
    match (options.reliability(), options.unordered) {
        (Reliability::Reliable, false) => ChannelType::Reliable,
        (Reliability::Reliable, true) => ChannelType::ReliableUnordered,
        (Reliability::MaxRetransmits(_), false) => ChannelType::PartialReliableRexmit,
        (Reliability::MaxRetransmits(_), true) => ChannelType::PartialReliableRexmitUnordered,
        (Reliability::MaxPacketLifeTime(_), false) => ChannelType::PartialReliableTimed,
        (Reliability::MaxPacketLifeTime(_), true) => ChannelType::PartialReliableTimedUnordered,
    }
}

/// Recovers the settings announced by the peer's channel-open message.
pub fn channel_options(channel_type: ChannelType, parameter: u32) -> ChannelOptions {
    let (unordered, max_retransmits, max_packet_life_time) = match channel_type {
        ChannelType::Reliable => (false, None, None),
        ChannelType::ReliableUnordered => (true, None, None),
        ChannelType::PartialReliableRexmit => (false, Some(parameter), None),
        ChannelType::PartialReliableRexmitUnordered => (true, Some(parameter), None),
        ChannelType::PartialReliableTimed => (false, None, Some(parameter)),
        ChannelType::PartialReliableTimedUnordered => (true, None, Some(parameter)),
    };
    ChannelOptions {
        unordered,
        max_retransmits,
        max_packet_life_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_type_mapping() {
        let cases = [
            ChannelOptions::default(),
            ChannelOptions {
                unordered: true,
                ..Default::default()
            },
            ChannelOptions {
                max_retransmits: Some(0),
                ..Default::default()
            },
            ChannelOptions {
                unordered: true,
                max_packet_life_time: Some(500),
                ..Default::default()
            },
        ];

        for options in cases {
            let ty = channel_type(&options);
            let back = channel_options(ty, options.reliability_parameter());
            assert_eq!(back, options);
        }

        let both = ChannelOptions {
            unordered: false,
            max_retransmits: Some(2),
            max_packet_life_time: Some(100),
        };
        assert_eq!(channel_type(&both), ChannelType::PartialReliableRexmit);
    }

    #[tokio::test]
    async fn test_loopback_channel() {
        let listener = DatagramListener::bind("127.0.0.1:0".parse().unwrap(), 0)
            .await
            .unwrap();
        let addr = listener.local_addr();

        let server = tokio::spawn(async move {
            let (conn, remote) = listener.accept().await.unwrap();
            let connection = listener.handshake(conn, remote).await.unwrap();
            let channel = connection.accept_channel().await.unwrap();
            let mut buf = vec![0u8; MAX_DATAGRAM_MESSAGE_SIZE];
            let n = channel.read(&mut buf).await.unwrap();
            (channel.options(), buf[..n].to_vec())
        });

        let options = ChannelOptions {
            max_packet_life_time: Some(1000),
            ..Default::default()
        };
        let connection = dial(addr, 0).await.unwrap();
        let channel = connection.open_channel(CHANNEL_ID, &options).await.unwrap();
        assert_eq!(channel.write(b"ping").await.unwrap(), 4);

        let (seen, payload) = tokio::time::timeout(Duration::from_secs(10), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, options);
        assert_eq!(payload, b"ping");

        channel.close().await.unwrap();
        connection.close().await.unwrap();
    }
}
