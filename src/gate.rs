use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Result of waiting on a [`FlowGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// A permit was consumed, the writer may re-check the buffered amount.
    Open,
    /// The session is tearing down.
    Closed,
}

/// Single-slot "may write" signal between the transport's low-buffer
/// callback and the writer.
///
/// At most one permit is pending at any time; posting while a permit is
/// already pending has no effect.
///
/// # Examples
///
/// ```
/// use rudpperf::gate::{FlowGate, GateState};
///
/// # #[tokio::main]
/// # async fn main() {
/// let gate = FlowGate::new();
/// gate.post();
/// gate.post();
/// assert_eq!(gate.wait().await, GateState::Open);
///
/// gate.close();
/// assert_eq!(gate.wait().await, GateState::Closed);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct FlowGate {
    notify: Notify,
    closed: AtomicBool,
}

impl FlowGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Posts a permit. Never blocks.
    pub fn post(&self) {
        self.notify.notify_one();
    }

    /// Closes the gate and wakes a pending waiter.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Waits for a permit or for the gate to close.
    pub async fn wait(&self) -> GateState {
        if self.is_closed() {
            return GateState::Closed;
        }
        self.notify.notified().await;
        if self.is_closed() {
            GateState::Closed
        } else {
            GateState::Open
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_posts_coalesce() {
        let gate = FlowGate::new();
        gate.post();
        gate.post();
        gate.post();

        assert_eq!(gate.wait().await, GateState::Open);

        // Only one permit was stored, so a second wait must block.
        let second = tokio::time::timeout(Duration::from_millis(50), gate.wait()).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_post_wakes_waiter() {
        let gate = Arc::new(FlowGate::new());
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.post();

        let state = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, GateState::Open);
    }

    #[tokio::test]
    async fn test_close_wakes_waiter() {
        let gate = Arc::new(FlowGate::new());
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.close();

        let state = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, GateState::Closed);
        assert_eq!(gate.wait().await, GateState::Closed);
    }
}
