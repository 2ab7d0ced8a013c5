//! Progress events and the periodic throughput sampler.
//!
//! The sampler runs as its own task next to the data loops. It only reads the
//! shared byte counter, so the data path never pays for formatting or I/O.

use crate::measurements::SessionSummary;
use crate::session::ByteCounter;
use log::info;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Progress events reported while a session runs.
///
/// # Examples
///
/// ```no_run
/// use rudpperf::{Client, Config, ProgressEvent};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::client("127.0.0.1:40916".to_string());
///
/// let client = Client::new(config)?
///     .with_callback(|event: ProgressEvent| match event {
///         ProgressEvent::SessionStarted { remote } => println!("Connected to {}", remote),
///         ProgressEvent::Throughput { bits_per_second, .. } => {
///             println!("Speed: {:.2} Mbps", bits_per_second / 1_000_000.0);
///         }
///         ProgressEvent::SessionCompleted(summary) => {
///             println!("Transferred {} bytes", summary.bytes);
///         }
///         ProgressEvent::Error(msg) => eprintln!("Error: {}", msg),
///     });
///
/// client.run().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A connection (and, for data channels, its channel) is ready.
    SessionStarted { remote: SocketAddr },
    /// One sampler tick.
    ///
    /// * `elapsed` - time since the sampler started
    /// * `bytes` - bytes counted during this interval
    /// * `bits_per_second` - rate over this interval
    Throughput {
        elapsed: Duration,
        bytes: u64,
        bits_per_second: f64,
    },
    /// The session ended and its loops were joined.
    SessionCompleted(SessionSummary),
    /// A session failed.
    Error(String),
}

/// Receiver of [`ProgressEvent`]s.
///
/// Implemented for every `Fn(ProgressEvent) + Send + Sync` closure.
///
/// ```
/// use rudpperf::{ProgressCallback, ProgressEvent};
///
/// struct Printer;
///
/// impl ProgressCallback for Printer {
///     fn on_progress(&self, event: ProgressEvent) {
///         println!("{:?}", event);
///     }
/// }
/// ```
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

impl<F> ProgressCallback for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: ProgressEvent) {
        self(event)
    }
}

pub type CallbackRef = Arc<dyn ProgressCallback>;

/// Invokes `callback` if one is installed.
pub(crate) fn notify(callback: &Option<CallbackRef>, event: ProgressEvent) {
    if let Some(cb) = callback {
        cb.on_progress(event);
    }
}

/// Counter value at a point in time.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    pub at: Instant,
    pub bytes: u64,
}

impl Snapshot {
    pub fn take(counter: &ByteCounter) -> Self {
        Self {
            at: Instant::now(),
            bytes: counter.get(),
        }
    }
}

/// Bits per second between two snapshots, `None` if no time has passed.
///
/// ```
/// use rudpperf::reporter::{compute_rate, Snapshot};
/// use std::time::{Duration, Instant};
///
/// let start = Instant::now();
/// let prev = Snapshot { at: start, bytes: 0 };
/// let cur = Snapshot { at: start + Duration::from_secs(2), bytes: 1_000_000 };
///
/// assert_eq!(compute_rate(&prev, &cur), Some(4_000_000.0));
/// assert_eq!(compute_rate(&cur, &prev), None);
/// ```
pub fn compute_rate(prev: &Snapshot, cur: &Snapshot) -> Option<f64> {
    let elapsed = cur.at.checked_duration_since(prev.at)?.as_secs_f64();
    if elapsed <= 0.0 {
        return None;
    }
    let delta = cur.bytes.saturating_sub(prev.bytes);
    Some(delta as f64 * 8.0 / elapsed)
}

/// Rate in the unit used by the throughput log line (2^20 bits per second).
pub fn to_mbps(bits_per_second: f64) -> f64 {
    bits_per_second / 1024.0 / 1024.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThroughputSample {
    /// Seconds since the sampler started
    pub elapsed: f64,
    pub bytes: u64,
    pub bits_per_second: f64,
}

/// Periodic sampler over a session's byte counter.
pub struct ThroughputSampler {
    cancel: CancellationToken,
    handle: JoinHandle<Vec<ThroughputSample>>,
}

impl ThroughputSampler {
    /// Starts sampling `counter` every `interval`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        counter: ByteCounter,
        interval: Duration,
        callback: Option<CallbackRef>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            let start = Snapshot::take(&counter);
            let mut prev = start;
            let mut samples = Vec::new();

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let cur = Snapshot::take(&counter);
                let Some(bps) = compute_rate(&prev, &cur) else {
                    continue;
                };

                info!("Throughput: {:.03} Mbps", to_mbps(bps));

                let sample = ThroughputSample {
                    elapsed: cur.at.duration_since(start.at).as_secs_f64(),
                    bytes: cur.bytes.saturating_sub(prev.bytes),
                    bits_per_second: bps,
                };
                notify(
                    &callback,
                    ProgressEvent::Throughput {
                        elapsed: cur.at.duration_since(start.at),
                        bytes: sample.bytes,
                        bits_per_second: bps,
                    },
                );
                samples.push(sample);
                prev = cur;
            }

            samples
        });

        Self { cancel, handle }
    }

    /// Stops the sampler, dropping the partial interval, and returns the samples taken.
    pub async fn stop(self) -> Vec<ThroughputSample> {
        self.cancel.cancel();
        self.handle.await.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_compute_rate_zero_elapsed() {
        let now = Instant::now();
        let a = Snapshot { at: now, bytes: 0 };
        let b = Snapshot { at: now, bytes: 100 };
        assert_eq!(compute_rate(&a, &b), None);
    }

    #[test]
    fn test_to_mbps() {
        assert_eq!(to_mbps(8.0 * 1024.0 * 1024.0), 8.0);
    }

    #[tokio::test]
    async fn test_sampler_reports_counter_growth() {
        let counter = ByteCounter::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let callback: CallbackRef = Arc::new(move |event: ProgressEvent| {
            events_clone.lock().unwrap().push(event);
        });

        let sampler =
            ThroughputSampler::spawn(counter.clone(), Duration::from_millis(20), Some(callback));

        for _ in 0..10 {
            counter.add(1000);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let samples = sampler.stop().await;
        assert!(!samples.is_empty());
        assert!(samples.iter().all(|s| s.bits_per_second >= 0.0));

        let total: u64 = samples.iter().map(|s| s.bytes).sum();
        assert!(total <= 10_000);

        let throughput_events = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Throughput { .. }))
            .count();
        assert_eq!(throughput_events, samples.len());
    }

    #[tokio::test]
    async fn test_stop_before_first_tick() {
        let sampler = ThroughputSampler::spawn(ByteCounter::new(), Duration::from_secs(60), None);
        assert!(sampler.stop().await.is_empty());
    }
}
