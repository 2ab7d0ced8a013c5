use crate::gate::FlowGate;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Shared, monotonically increasing byte count of one session.
///
/// Written by the data loop, sampled by the throughput sampler.
#[derive(Debug, Clone, Default)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Limits that end a session. Whichever is reached first wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionBounds {
    pub duration: Option<Duration>,
    pub message_count: Option<u64>,
}

/// State shared by the worker loops of a single connection.
///
/// A session is created when a connection is dialed or accepted and dropped
/// when its loops have been joined.
#[derive(Debug)]
pub struct TransferSession {
    counter: ByteCounter,
    done: CancellationToken,
    gate: Arc<FlowGate>,
    seed: u64,
    bounds: SessionBounds,
    started: Instant,
}

impl TransferSession {
    pub fn new(seed: u64, bounds: SessionBounds) -> Self {
        Self {
            counter: ByteCounter::new(),
            done: CancellationToken::new(),
            gate: Arc::new(FlowGate::new()),
            seed,
            bounds,
            started: Instant::now(),
        }
    }

    pub fn counter(&self) -> &ByteCounter {
        &self.counter
    }

    /// Gate handle for the transport's low-buffer callback.
    pub fn gate(&self) -> Arc<FlowGate> {
        self.gate.clone()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Marks the session done and releases a writer parked on the gate or
    /// blocked inside a transport write.
    pub fn finish(&self) {
        self.done.cancel();
        self.gate.close();
    }

    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Resolves once [`TransferSession::finish`] has been called.
    pub async fn finished(&self) {
        self.done.cancelled().await
    }

    pub fn deadline_passed(&self) -> bool {
        match self.bounds.duration {
            Some(limit) => self.started.elapsed() >= limit,
            None => false,
        }
    }

    /// Remaining time before the duration bound, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.bounds
            .duration
            .map(|limit| limit.saturating_sub(self.started.elapsed()))
    }
}
