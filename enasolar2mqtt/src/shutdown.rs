//! Process-wide stop signal.
//!
//! `Shutdown` owns the only sender of an otherwise silent channel. Triggering
//! drops that sender, which disconnects the channel and wakes every
//! `ShutdownToken` blocked on it at once.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

#[derive(Clone, Debug)]
pub struct Shutdown {
    sender: Arc<Mutex<Option<Sender<()>>>>,
    receiver: Receiver<()>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(0);
        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
            receiver,
        }
    }

    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            receiver: self.receiver.clone(),
        }
    }

    /// Idempotent.
    pub fn trigger(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }
}

#[derive(Clone, Debug)]
pub struct ShutdownToken {
    receiver: Receiver<()>,
}

impl ShutdownToken {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleeps for `duration` unless shutdown is triggered first.
    /// Returns `true` when the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        matches!(
            self.receiver.recv_timeout(duration),
            Err(RecvTimeoutError::Timeout)
        )
    }

    /// Becomes ready (disconnected) once shutdown is triggered, for use in `select!`.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}
