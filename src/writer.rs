//! Flow-controlled bulk writer.

use crate::gate::GateState;
use crate::payload::PayloadStream;
use crate::session::TransferSession;
use crate::transport::Channel;
use crate::Result;
use log::debug;
use std::time::Duration;

/// Interval at which [`wait_for_flush`] polls the buffered amount.
pub const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy)]
pub struct WriterParams {
    pub message_size: usize,
    pub message_count: Option<u64>,
    /// Buffered amount at or above which the writer parks on the gate.
    pub high_water_mark: usize,
}

/// Why the write loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The message count bound was reached.
    Completed,
    /// The session was finished from outside (deadline or cancellation).
    Stopped,
    /// The transport refused a write.
    TransportClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReport {
    pub messages: u64,
    pub bytes: u64,
    pub gate_waits: u64,
    pub outcome: WriteOutcome,
}

/// Pushes generated messages into `channel` until a bound is hit or the
/// transport stops accepting data.
///
/// The caller installs the low-water threshold and a callback that posts to
/// the session gate before calling this. The buffered amount can exceed the
/// high-water mark by at most one message.
pub async fn run_writer<C>(
    channel: &C,
    session: &TransferSession,
    params: &WriterParams,
) -> Result<WriteReport>
where
    C: Channel + ?Sized,
{
    let mut payload = PayloadStream::new(session.seed());
    let mut chunk = vec![0u8; params.message_size];
    let gate = session.gate();
    let mut report = WriteReport {
        messages: 0,
        bytes: 0,
        gate_waits: 0,
        outcome: WriteOutcome::Completed,
    };

    loop {
        if session.is_done() {
            report.outcome = WriteOutcome::Stopped;
            break;
        }
        if let Some(count) = params.message_count {
            if report.messages >= count {
                report.outcome = WriteOutcome::Completed;
                break;
            }
        }

        payload.fill(&mut chunk)?;

        let mut stopped = false;
        while channel.buffered_amount() >= params.high_water_mark {
            report.gate_waits += 1;
            if gate.wait().await == GateState::Closed {
                stopped = true;
                break;
            }
        }
        if stopped {
            report.outcome = WriteOutcome::Stopped;
            break;
        }

        let mut offset = 0;
        while offset < chunk.len() {
            // A peer that stops reading can block a stream write indefinitely.
            let written = tokio::select! {
                biased;
                _ = session.finished() => None,
                written = channel.write(&chunk[offset..]) => Some(written),
            };
            let written = match written {
                Some(written) => written,
                None => {
                    debug!("session finished during a write, ending write loop");
                    report.outcome = WriteOutcome::Stopped;
                    return Ok(report);
                }
            };
            match written {
                Ok(0) => {
                    debug!("transport accepted no data, ending write loop");
                    report.outcome = WriteOutcome::TransportClosed;
                    return Ok(report);
                }
                Ok(n) => {
                    offset += n;
                    report.bytes += n as u64;
                    session.counter().add(n as u64);
                }
                Err(e) => {
                    debug!("write failed, ending write loop: {}", e);
                    report.outcome = WriteOutcome::TransportClosed;
                    return Ok(report);
                }
            }
        }

        report.messages += 1;
    }

    Ok(report)
}

/// Waits until everything written has left the send buffer, or the session ends.
pub async fn wait_for_flush<C>(channel: &C, session: &TransferSession)
where
    C: Channel + ?Sized,
{
    while channel.buffered_amount() > 0 && !session.is_done() {
        tokio::time::sleep(FLUSH_POLL_INTERVAL).await;
    }
}
