//! Transport adapters.
//!
//! The writer, verifier and sampler only see the [`Channel`] trait. TCP
//! streams and SCTP data channels implement it; the session logic does not
//! care which one it is driving.

pub mod datagram;
pub mod stream;

use crate::config::AddressFamily;
use crate::{Error, Result};
use async_trait::async_trait;
use std::net::SocketAddr;

/// Callback invoked when the buffered amount falls to the low threshold.
pub type LowWaterFn = Box<dyn Fn() + Send + Sync>;

/// Capability surface shared by every transport.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Reads into `buf`. `Ok(0)` means the peer closed.
    async fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Writes `buf`, returning the number of bytes accepted.
    async fn write(&self, buf: &[u8]) -> Result<usize>;

    /// Bytes accepted by [`Channel::write`] but not yet acknowledged by the peer.
    fn buffered_amount(&self) -> usize;

    fn set_buffered_amount_low_threshold(&self, threshold: usize);

    /// Installs the callback fired when the buffered amount drops to the threshold.
    fn on_buffered_amount_low(&self, callback: LowWaterFn);

    /// Signals that no more data will be written.
    async fn close_write(&self) -> Result<()>;

    async fn close_read(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Resolves `addr` (`host:port`) to the first address of the requested family.
pub async fn resolve(addr: &str, family: AddressFamily) -> Result<SocketAddr> {
    let candidates = tokio::net::lookup_host(addr)
        .await
        .map_err(|e| Error::Resolve(format!("{}: {}", addr, e)))?;

    candidates
        .into_iter()
        .find(|candidate| family.accepts(candidate))
        .ok_or_else(|| Error::Resolve(format!("no {:?} address found for {}", family, addr)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_filters_family() {
        let v4 = resolve("127.0.0.1:40916", AddressFamily::V4).await.unwrap();
        assert_eq!(v4.port(), 40916);
        assert!(v4.is_ipv4());

        let err = resolve("127.0.0.1:40916", AddressFamily::V6).await;
        assert!(matches!(err, Err(Error::Resolve(_))));
    }
}
