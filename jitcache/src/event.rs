//! Cross-thread requests to the cache owner.
//!
//! The cache itself is only ever touched from the guest-execution thread.
//! Other threads ask it to do something by scheduling a [`CacheEvent`].

use std::sync::mpsc::{self, Receiver, Sender};

use crate::{BlockCache, HandleJit};

/// Requests that can be scheduled onto the guest-execution thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    /// Run [`BlockCache::clear`]
    ClearCache,
}

/// Event scheduler of the emulator.
pub trait ScheduleEvent {
    /// Schedule `event` to run on the guest-execution thread as soon as possible
    fn schedule_zero_delay(&self, event: CacheEvent);
}

/// Sending half of an [`EventQueue`].
///
/// This handle can be cloned and moved to any thread.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: Sender<CacheEvent>,
}

impl ScheduleEvent for EventSender {
    fn schedule_zero_delay(&self, event: CacheEvent) {
        // The queue only disappears when the guest thread is gone, in which
        // case there is nothing left to clear.
        if self.sender.send(event).is_err() {
            log::debug!("Event queue closed, dropping {event:?}");
        }
    }
}

/// FIFO event queue drained by the guest-execution thread.
pub struct EventQueue {
    sender: Sender<CacheEvent>,
    receiver: Receiver<CacheEvent>,
}

impl EventQueue {
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self { sender, receiver }
    }

    /// Get a new sending handle
    #[must_use]
    pub fn sender(&self) -> EventSender {
        EventSender {
            sender: self.sender.clone(),
        }
    }

    /// Apply every pending event to `cache` in order, returning how many ran.
    ///
    /// Never blocks.
    pub fn run_pending<H: HandleJit>(&self, cache: &mut BlockCache, host: &mut H) -> usize {
        let mut count = 0;
        while let Ok(event) = self.receiver.try_recv() {
            cache.handle_event(host, event);
            count += 1;
        }
        count
    }
}

impl ScheduleEvent for EventQueue {
    fn schedule_zero_delay(&self, event: CacheEvent) {
        // The receiver lives in `self`, so this cannot fail.
        let _ = self.sender.send(event);
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
