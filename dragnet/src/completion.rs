use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

/// Task-wide counted barrier over stage completion.
///
/// Sized to the number of stages at assembly; each stage calls [`done`]
/// exactly once after its result channel has closed, and the task initiator
/// [`wait`]s for the count to reach zero to know the whole chain settled.
///
/// [`done`]: CompletionGate::done
/// [`wait`]: CompletionGate::wait
pub struct CompletionGate {
    remaining: AtomicUsize,
    notify: Notify,
}

impl CompletionGate {
    pub fn new(parties: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(parties),
            notify: Notify::new(),
        }
    }

    pub fn done(&self) {
        let previous = self.remaining.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "completion gate decremented below zero");
        if previous == 1 {
            self.notify.notify_waiters();
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.remaining.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}
