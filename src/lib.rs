//! rudpperf - throughput and integrity benchmark for SCTP data channels over UDP and TCP
//!
//! A client pushes a deterministic pseudo-random byte stream to a server as
//! fast as the transport's flow control allows. The server regenerates the
//! same stream from the shared seed and compares it byte for byte, so data
//! integrity is checked without sending checksums.
//!
//! # Features
//!
//! - SCTP data channels over UDP (`udp`, `udp4`, `udp6`) or plain TCP (`tcp`, `tcp4`, `tcp6`)
//! - Buffered-amount flow control with configurable water marks
//! - Ordered, unordered and partially reliable channels
//! - Duration and message count bounds
//! - Periodic throughput sampling and JSON summaries
//! - Asynchronous I/O using tokio

pub mod client;
pub mod config;
pub mod error;
pub mod gate;
pub mod measurements;
pub mod payload;
pub mod reporter;
pub mod server;
pub mod session;
pub mod transport;
pub mod verifier;
pub mod writer;

pub use client::Client;
pub use config::{ChannelOptions, Config, Mode, Network, Transport};
pub use error::{Error, Result};
pub use measurements::SessionSummary;
pub use reporter::{ProgressCallback, ProgressEvent};
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
