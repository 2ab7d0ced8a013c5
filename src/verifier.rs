//! Receive side: verifying reader and plain drain.

use crate::payload::PayloadStream;
use crate::session::TransferSession;
use crate::transport::Channel;
use crate::{Error, Result};
use log::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadReport {
    pub reads: u64,
    pub verified_reads: u64,
    pub bytes: u64,
}

/// Reads until end of stream, regenerating the sender's payload and comparing
/// every byte when `verify` is set.
///
/// A mismatch is returned as [`Error::Integrity`] with the stream offset of
/// the first differing byte. Transport errors and end of stream end the loop
/// normally; so does the session deadline, checked between reads.
pub async fn run_verifier<C>(
    channel: &C,
    session: &TransferSession,
    buf_len: usize,
    verify: bool,
) -> Result<ReadReport>
where
    C: Channel + ?Sized,
{
    let mut expected_stream = PayloadStream::new(session.seed());
    let mut buf = vec![0u8; buf_len];
    let mut expected = vec![0u8; if verify { buf_len } else { 0 }];
    let mut report = ReadReport::default();

    loop {
        if session.deadline_passed() || session.is_done() {
            debug!("session bound reached after {} bytes", report.bytes);
            break;
        }

        let n = match channel.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("read failed, ending read loop: {}", e);
                break;
            }
        };
        report.reads += 1;

        if verify {
            let offset = expected_stream.position();
            expected_stream.fill(&mut expected[..n])?;
            if let Some(i) = (0..n).find(|&i| buf[i] != expected[i]) {
                return Err(Error::Integrity {
                    offset: offset + i as u64,
                    expected: expected[i],
                    actual: buf[i],
                });
            }
            report.verified_reads += 1;
        }

        report.bytes += n as u64;
        session.counter().add(n as u64);
    }

    Ok(report)
}

/// Reads and discards until end of stream or error. Returns the bytes seen.
pub async fn drain<C>(channel: &C, buf_len: usize) -> u64
where
    C: Channel + ?Sized,
{
    let mut buf = vec![0u8; buf_len];
    let mut total = 0u64;
    loop {
        match channel.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => total += n as u64,
            Err(e) => {
                debug!("drain ended: {}", e);
                break;
            }
        }
    }
    total
}
