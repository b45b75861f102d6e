//! Retry buffer for writes that could not be delivered right away.
//!
//! A failed fan-out lands here keyed by destination. A background loop wakes
//! on a fixed interval and re-attempts everything, dropping what got through.
//! Messages for the same destination keep their relative order.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::message::{PeerMessage, Propagate};
use crate::transport::{DeliveryOutcome, Transport};

/// A write waiting for its destination to come back.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub destination: String,
    pub message: Propagate,
}

/// Undelivered writes in the order they failed.
///
/// # Why one list instead of a queue per destination?
///
/// A pass walks the list once and remembers which destinations already
/// failed. That keeps per-destination order without tracking a map of
/// queues that mostly hold nothing.
#[derive(Default)]
pub struct OutboundQueue {
    queued: Mutex<Vec<Outbound>>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a write for `destination` behind everything already queued.
    pub fn enqueue(&self, destination: impl Into<String>, message: Propagate) {
        self.queued.lock().push(Outbound {
            destination: destination.into(),
            message,
        });
    }

    /// Writes queued across all destinations.
    pub fn len(&self) -> usize {
        self.queued.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes queued for one destination.
    pub fn queued_for(&self, destination: &str) -> usize {
        self.queued
            .lock()
            .iter()
            .filter(|outbound| outbound.destination == destination)
            .count()
    }

    /// Attempts every queued message once and returns how many were delivered.
    ///
    /// The batch is taken out of the queue for the duration of the pass so the
    /// lock is never held across a send. Once a destination fails, its later
    /// messages are kept without another attempt. Undelivered messages go
    /// back in front of anything enqueued meanwhile.
    pub async fn retry(&self, transport: &dyn Transport) -> usize {
        let batch = std::mem::take(&mut *self.queued.lock());
        if batch.is_empty() {
            return 0;
        }

        let attempted = batch.len();
        let mut unreachable = HashSet::new();
        let mut kept = Vec::new();
        let mut delivered = 0;

        for outbound in batch {
            if unreachable.contains(&outbound.destination) {
                kept.push(outbound);
                continue;
            }
            let message = PeerMessage::from(outbound.message.clone());
            match transport.deliver(&outbound.destination, &message).await {
                DeliveryOutcome::Delivered => delivered += 1,
                DeliveryOutcome::Rejected => {
                    warn!(peer = %outbound.destination, clock = %outbound.message.vector_clock, "dropping rejected message");
                }
                DeliveryOutcome::Unreachable => {
                    unreachable.insert(outbound.destination.clone());
                    kept.push(outbound);
                }
            }
        }

        let mut queued = self.queued.lock();
        kept.append(&mut queued);
        *queued = kept;

        if delivered > 0 {
            info!(delivered, attempted, remaining = queued.len(), "flushed outbound queue");
        } else {
            debug!(attempted, "no queued message could be delivered");
        }
        delivered
    }
}

/// Runs [`OutboundQueue::retry`] every `every` until `shutdown` flips to true
/// or its sender goes away.
pub async fn run_retry_loop(
    queue: Arc<OutboundQueue>,
    transport: Arc<dyn Transport>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                queue.retry(transport.as_ref()).await;
            }
        }
    }
    debug!("retry loop stopped");
}
