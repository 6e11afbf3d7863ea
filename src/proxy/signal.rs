use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc::{self, Receiver, SyncSender},
};

use super::Direction;

/// Single-slot teardown signal shared by the two pipes of one connection.
///
/// The first pipe to stop trips it and wakes the supervisor; every later trip is
/// swallowed, so a connection is torn down exactly once no matter how many errors the
/// closing sockets produce.
#[derive(Debug, Clone)]
pub struct ErrorSignal {
    tripped: Arc<AtomicBool>,
    sender: SyncSender<Direction>,
}

impl ErrorSignal {
    pub fn new() -> (Self, Receiver<Direction>) {
        let (sender, receiver) = mpsc::sync_channel(1);
        let signal = Self {
            tripped: Arc::new(AtomicBool::new(false)),
            sender,
        };
        (signal, receiver)
    }

    /// Reports that the pipe carrying `direction` has stopped. Returns true only for the
    /// first call across all clones.
    pub fn trip(&self, direction: Direction) -> bool {
        if self.tripped.swap(true, Ordering::AcqRel) {
            return false;
        }
        // The slot is empty until the first trip, and nothing else ever sends.
        let _ = self.sender.try_send(direction);
        true
    }
}
