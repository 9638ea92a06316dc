// crates/server/src/jobs/hub.rs
//! Per-job fan-out with a replay buffer for late joiners.
//!
//! Delivery guarantee: every buffered event is delivered either to a live
//! subscriber at broadcast time or, if nobody is attached, via the replay
//! buffer to the first subscriber that attaches later. Never both (the
//! buffer drains on attach) and never neither.

use syncview_core::{FeedEvent, ProgressSnapshot};
use tokio::sync::mpsc;

/// Fan-out broadcaster for one job.
///
/// Uses one unbounded mpsc channel per subscriber rather than a
/// `tokio::sync::broadcast`: the drain-once replay semantics need
/// per-receiver delivery, which broadcast cannot express.
///
/// The buffer is unbounded while no subscriber is attached. Accepted
/// tradeoff: a silent watcher-less job can grow it without limit.
#[derive(Debug, Default)]
pub struct SubscriberHub {
    subscribers: Vec<mpsc::UnboundedSender<FeedEvent>>,
    buffer: Vec<FeedEvent>,
    closed: bool,
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new observer: flush and clear the replay buffer to it,
    /// then send the current progress snapshot, then join the live set.
    ///
    /// For a closed hub (job finished, `done` already in the buffer or
    /// delivered) the sender is dropped after the flush so the receiver
    /// sees the replay and then end-of-stream.
    pub fn attach(&mut self, progress: ProgressSnapshot) -> mpsc::UnboundedReceiver<FeedEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        for event in self.buffer.drain(..) {
            let _ = tx.send(event);
        }
        if !self.closed {
            let _ = tx.send(FeedEvent::progress(progress));
            self.subscribers.push(tx);
        }
        rx
    }

    /// Deliver to every live subscriber; buffer instead when nobody
    /// received it.
    ///
    /// A failed send only drops that subscriber; the rest still receive
    /// the event. Delivery and pruning are one pass, so an event whose
    /// every send failed (including the none-attached case) always lands
    /// in the buffer.
    pub fn broadcast(&mut self, event: FeedEvent) {
        if self.closed {
            return;
        }
        let mut delivered = false;
        self.subscribers.retain(|tx| {
            let sent = tx.send(event.clone()).is_ok();
            delivered |= sent;
            sent
        });
        if !delivered {
            self.buffer.push(event);
        }
    }

    /// Deliver to live subscribers only, never buffering. Used for
    /// keepalives, which carry no job state worth replaying.
    pub fn send_live(&mut self, event: FeedEvent) {
        if self.closed {
            return;
        }
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Broadcast the terminal event and close: subscriber channels are
    /// dropped and nothing is accepted afterwards.
    pub fn close(&mut self, done: FeedEvent) {
        self.broadcast(done);
        self.closed = true;
        self.subscribers.clear();
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
