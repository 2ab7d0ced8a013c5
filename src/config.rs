use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default port the server listens on.
pub const DEFAULT_PORT: u16 = 40916;

/// Default size of a single write, in bytes.
pub const DEFAULT_MESSAGE_SIZE: usize = 32 * 1024;

/// Default seed of the payload generator on both ends.
pub const DEFAULT_SEED: u64 = 123;

/// Low-water mark used when no buffer size override is given.
pub const DEFAULT_LOW_WATER_MARK: usize = 1024 * 1024;

/// Largest message an SCTP association accepts, on both ends.
pub const MAX_DATAGRAM_MESSAGE_SIZE: usize = 256 * 1024;

/// Transport family selected by the network flag.
///
/// # Examples
///
/// ```
/// use rudpperf::config::{Network, Transport};
///
/// let network: Network = "udp4".parse().unwrap();
/// assert_eq!(network.transport, Transport::Datagram);
///
/// let network: Network = "tcp".parse().unwrap();
/// assert_eq!(network.transport, Transport::Stream);
///
/// assert!("quic".parse::<Network>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    /// SCTP data channel over UDP
    Datagram,
    /// Plain TCP stream
    Stream,
}

/// Address family restriction derived from the `4`/`6` suffix of the network flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressFamily {
    Any,
    V4,
    V6,
}

impl AddressFamily {
    pub fn accepts(&self, addr: &std::net::SocketAddr) -> bool {
        match self {
            AddressFamily::Any => true,
            AddressFamily::V4 => addr.is_ipv4(),
            AddressFamily::V6 => addr.is_ipv6(),
        }
    }

    /// Wildcard address to bind a listener (or an outgoing UDP socket) to.
    pub fn unspecified(&self, port: u16) -> std::net::SocketAddr {
        match self {
            AddressFamily::V6 => std::net::SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, port)),
            _ => std::net::SocketAddr::from((std::net::Ipv4Addr::UNSPECIFIED, port)),
        }
    }
}

/// Parsed form of the network flag (`udp`, `udp4`, `udp6`, `tcp`, `tcp4`, `tcp6`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub transport: Transport,
    pub family: AddressFamily,
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (transport, rest) = if let Some(rest) = s.strip_prefix("udp") {
            (Transport::Datagram, rest)
        } else if let Some(rest) = s.strip_prefix("tcp") {
            (Transport::Stream, rest)
        } else {
            return Err(Error::Config(format!("invalid network {}", s)));
        };

        let family = match rest {
            "4" => AddressFamily::V4,
            "6" => AddressFamily::V6,
            _ => AddressFamily::Any,
        };

        Ok(Self { transport, family })
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.transport {
            Transport::Datagram => "udp",
            Transport::Stream => "tcp",
        };
        match self.family {
            AddressFamily::Any => write!(f, "{}", name),
            AddressFamily::V4 => write!(f, "{}4", name),
            AddressFamily::V6 => write!(f, "{}6", name),
        }
    }
}

impl Default for Network {
    fn default() -> Self {
        Self {
            transport: Transport::Datagram,
            family: AddressFamily::V4,
        }
    }
}

/// Test mode: client or server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Server mode - listens, accepts and verifies
    Server,
    /// Client mode - dials and sends
    Client,
}

/// Ordering and partial-reliability settings of the data channel.
///
/// These are forwarded opaquely to the channel-open parameters; the server
/// learns them from the open message. Retransmit limits win over lifetime
/// limits when both are set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOptions {
    pub unordered: bool,
    pub max_retransmits: Option<u32>,
    pub max_packet_life_time: Option<u32>,
}

/// Partial reliability policy of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    Reliable,
    MaxRetransmits(u32),
    MaxPacketLifeTime(u32),
}

impl ChannelOptions {
    pub fn reliability(&self) -> Reliability {
        if let Some(n) = self.max_retransmits {
            Reliability::MaxRetransmits(n)
        } else if let Some(ms) = self.max_packet_life_time {
            Reliability::MaxPacketLifeTime(ms)
        } else {
            Reliability::Reliable
        }
    }

    /// DCEP channel type byte: 0x80 for unordered, low bits for the reliability kind.
    pub fn channel_type_byte(&self) -> u8 {
        let mut ty = if self.unordered { 0x80 } else { 0x00 };
        ty |= match self.reliability() {
            Reliability::Reliable => 0x00,
            Reliability::MaxRetransmits(_) => 0x01,
            Reliability::MaxPacketLifeTime(_) => 0x02,
        };
        ty
    }

    pub fn reliability_parameter(&self) -> u32 {
        match self.reliability() {
            Reliability::Reliable => 0,
            Reliability::MaxRetransmits(n) | Reliability::MaxPacketLifeTime(n) => n,
        }
    }

    /// Only reliable, ordered channels deliver the exact stream the sender produced.
    pub fn preserves_stream(&self) -> bool {
        !self.unordered && self.reliability() == Reliability::Reliable
    }
}

impl fmt::Display for ChannelOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reliability = match self.reliability() {
            Reliability::Reliable => "Reliable".to_string(),
            Reliability::MaxRetransmits(n) => format!("maxRetransmits={}", n),
            Reliability::MaxPacketLifeTime(ms) => format!("maxPacketLifeTime={}", ms),
        };
        write!(
            f,
            "unordered={} {} ({:02x})",
            self.unordered,
            reliability,
            self.channel_type_byte()
        )
    }
}

/// Configuration for a benchmark run.
///
/// # Examples
///
/// ```
/// use rudpperf::Config;
/// use std::time::Duration;
///
/// let config = Config::client("127.0.0.1:40916".to_string())
///     .with_network("tcp4".parse().unwrap())
///     .with_message_size(16 * 1024)
///     .with_message_count(1000)
///     .with_duration(Some(Duration::from_secs(5)));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mode: Mode,

    pub network: Network,

    /// Remote `host:port` (client mode)
    pub server_addr: Option<String>,

    /// Port to listen on (server mode)
    pub listen_port: u16,

    /// Size of every write in bytes
    pub message_size: usize,

    /// Stop after this many messages (client mode)
    pub message_count: Option<u64>,

    /// Socket and association buffer override, 0 keeps the defaults
    pub buffer_size: usize,

    /// Session duration bound; `None` means unbounded
    pub duration: Option<Duration>,

    pub channel: ChannelOptions,

    /// Throughput sampling interval
    pub interval: Duration,

    /// Payload generator seed, must match on both ends
    pub seed: u64,

    /// Print the session summary as JSON
    pub json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Client,
            network: Network::default(),
            server_addr: None,
            listen_port: DEFAULT_PORT,
            message_size: DEFAULT_MESSAGE_SIZE,
            message_count: None,
            buffer_size: 0,
            duration: Some(Duration::from_secs(30)),
            channel: ChannelOptions::default(),
            interval: Duration::from_secs(1),
            seed: DEFAULT_SEED,
            json: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a server configuration listening on `port`.
    ///
    /// ```
    /// use rudpperf::Config;
    ///
    /// let config = Config::server(40916);
    /// assert_eq!(config.listen_port, 40916);
    /// ```
    pub fn server(port: u16) -> Self {
        Self {
            mode: Mode::Server,
            listen_port: port,
            ..Default::default()
        }
    }

    /// Creates a client configuration sending to `server_addr` (`host:port`).
    pub fn client(server_addr: String) -> Self {
        Self {
            mode: Mode::Client,
            server_addr: Some(server_addr),
            ..Default::default()
        }
    }

    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    pub fn with_message_size(mut self, size: usize) -> Self {
        self.message_size = size;
        self
    }

    pub fn with_message_count(mut self, count: u64) -> Self {
        self.message_count = Some(count);
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Sets the duration bound. `None` (or a zero duration) leaves the session
    /// bounded only by the message count or by the peer.
    pub fn with_duration(mut self, duration: Option<Duration>) -> Self {
        self.duration = duration.filter(|d| !d.is_zero());
        self
    }

    pub fn with_channel_options(mut self, channel: ChannelOptions) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Buffered amount at or below which the transport wakes the writer.
    pub fn low_water_mark(&self) -> usize {
        if self.buffer_size > 0 {
            self.buffer_size
        } else {
            DEFAULT_LOW_WATER_MARK
        }
    }

    /// Buffered amount at or above which the writer pauses.
    pub fn high_water_mark(&self) -> usize {
        self.low_water_mark() * 2
    }

    /// Checks the settings that would otherwise fail deep inside a session.
    pub fn validate(&self) -> Result<()> {
        if self.mode == Mode::Client && self.server_addr.is_none() {
            return Err(Error::Config(
                "Server address is required for client mode".to_string(),
            ));
        }

        if self.message_size == 0 {
            return Err(Error::Config("Message size must be positive".to_string()));
        }

        if self.network.transport == Transport::Datagram
            && self.message_size > MAX_DATAGRAM_MESSAGE_SIZE
        {
            return Err(Error::Config(format!(
                "Message size {} exceeds the data channel limit of {} bytes",
                self.message_size, MAX_DATAGRAM_MESSAGE_SIZE
            )));
        }

        if self.interval.is_zero() {
            return Err(Error::Config("Sampling interval must be positive".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_prefix_matching() {
        let udp: Network = "udp".parse().unwrap();
        assert_eq!(udp.transport, Transport::Datagram);
        assert_eq!(udp.family, AddressFamily::Any);

        let udp6: Network = "udp6".parse().unwrap();
        assert_eq!(udp6.family, AddressFamily::V6);

        let tcp4: Network = "tcp4".parse().unwrap();
        assert_eq!(tcp4.transport, Transport::Stream);
        assert_eq!(tcp4.family, AddressFamily::V4);
        assert_eq!(tcp4.to_string(), "tcp4");

        assert!(matches!("ip4".parse::<Network>(), Err(Error::Config(_))));
    }

    #[test]
    fn test_water_marks() {
        let config = Config::client("127.0.0.1:1".to_string());
        assert_eq!(config.low_water_mark(), 1024 * 1024);
        assert_eq!(config.high_water_mark(), 2 * 1024 * 1024);

        let config = config.with_buffer_size(64 * 1024);
        assert_eq!(config.low_water_mark(), 64 * 1024);
        assert_eq!(config.high_water_mark(), 128 * 1024);
    }

    #[test]
    fn test_channel_type_byte() {
        assert_eq!(ChannelOptions::default().channel_type_byte(), 0x00);

        let unordered = ChannelOptions {
            unordered: true,
            ..Default::default()
        };
        assert_eq!(unordered.channel_type_byte(), 0x80);
        assert!(!unordered.preserves_stream());

        let rexmit = ChannelOptions {
            unordered: true,
            max_retransmits: Some(3),
            max_packet_life_time: Some(100),
        };
        assert_eq!(rexmit.channel_type_byte(), 0x81);
        assert_eq!(rexmit.reliability_parameter(), 3);

        let timed = ChannelOptions {
            max_packet_life_time: Some(250),
            ..Default::default()
        };
        assert_eq!(timed.channel_type_byte(), 0x02);
        assert_eq!(timed.to_string(), "unordered=false maxPacketLifeTime=250 (02)");
    }

    #[test]
    fn test_zero_duration_is_unbounded() {
        let config = Config::client("127.0.0.1:1".to_string()).with_duration(Some(Duration::ZERO));
        assert_eq!(config.duration, None);
    }

    #[test]
    fn test_validate() {
        assert!(Config::server(0).validate().is_ok());

        let mut missing_addr = Config::server(0);
        missing_addr.mode = Mode::Client;
        assert!(missing_addr.validate().is_err());

        let oversized = Config::client("127.0.0.1:1".to_string())
            .with_message_size(MAX_DATAGRAM_MESSAGE_SIZE + 1);
        assert!(oversized.validate().is_err());

        let tcp_large = oversized.with_network("tcp".parse().unwrap());
        assert!(tcp_large.validate().is_ok());

        let empty = Config::client("127.0.0.1:1".to_string()).with_message_size(0);
        assert!(empty.validate().is_err());
    }
}
