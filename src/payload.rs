//! Deterministic payload generation.
//!
//! Both ends of a session seed a [`PayloadStream`] identically. The sender
//! transmits what it draws, the receiver draws the same number of bytes for
//! every read and compares, so no checksum ever crosses the wire.

use crate::{Error, Result};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

const BLOCK_LEN: usize = 64;

/// Seeded pseudo-random byte stream.
///
/// Output depends only on the seed and on the number of bytes drawn so far,
/// never on how the draws were split.
///
/// # Examples
///
/// ```
/// use rudpperf::payload::PayloadStream;
///
/// let mut whole = PayloadStream::new(123);
/// let mut a = [0u8; 100];
/// whole.fill(&mut a).unwrap();
///
/// let mut split = PayloadStream::new(123);
/// let mut b = [0u8; 100];
/// split.fill(&mut b[..7]).unwrap();
/// split.fill(&mut b[7..]).unwrap();
///
/// assert_eq!(a, b);
/// ```
pub struct PayloadStream {
    rng: ChaCha8Rng,
    block: [u8; BLOCK_LEN],
    pos: usize,
    produced: u64,
}

impl PayloadStream {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            block: [0u8; BLOCK_LEN],
            pos: BLOCK_LEN,
            produced: 0,
        }
    }

    /// Fills `buf` with the next `buf.len()` bytes of the stream.
    pub fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut written = 0;
        while written < buf.len() {
            if self.pos == BLOCK_LEN {
                self.rng
                    .try_fill_bytes(&mut self.block)
                    .map_err(|e| Error::Generator(e.to_string()))?;
                self.pos = 0;
            }
            let n = (BLOCK_LEN - self.pos).min(buf.len() - written);
            buf[written..written + n].copy_from_slice(&self.block[self.pos..self.pos + n]);
            self.pos += n;
            written += n;
        }
        self.produced += buf.len() as u64;
        Ok(())
    }

    /// Total number of bytes drawn so far.
    pub fn position(&self) -> u64 {
        self.produced
    }
}
