//! Generation counter shared between a state owner and its in-flight work.
//!
//! The owner bumps the counter on every new run, cancel or reset. Work tagged
//! with an older generation compares unequal and is discarded; a waiter parked
//! on [`GenerationCounter::superseded`] wakes as soon as the counter moves.

use tokio::sync::watch;

use crate::types::Generation;

#[derive(Debug)]
pub struct GenerationCounter {
    sender: watch::Sender<Generation>,
}

impl Default for GenerationCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationCounter {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(0);
        Self { sender }
    }

    pub fn current(&self) -> Generation {
        *self.sender.borrow()
    }

    pub fn bump(&self) -> Generation {
        self.sender.send_modify(|generation| *generation += 1);
        self.current()
    }

    /// Resolves once the counter no longer equals `generation`.
    pub async fn superseded(&self, generation: Generation) {
        let mut receiver = self.sender.subscribe();
        loop {
            if *receiver.borrow_and_update() != generation {
                return;
            }
            if receiver.changed().await.is_err() {
                // sender lives as long as self
                std::future::pending::<()>().await;
            }
        }
    }
}
