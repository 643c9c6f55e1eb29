use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use tracing::warn;

static QUEUE_LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

fn warn_queue_lock_poison_once(operation: &'static str) {
    if QUEUE_LOCK_POISON_WARNED
        .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
    {
        warn!(operation, "request queue lock poisoned; recovered inner value");
    }
}

#[derive(Debug)]
pub enum QueueItem<T> {
    Request(T),
    /// Stop sentinel; wakes the consumer without carrying work.
    Shutdown,
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<QueueItem<T>>,
    signaled: bool,
}

/// Multi-producer, single-consumer FIFO with an auto-reset wake signal.
#[derive(Debug)]
pub struct RequestQueue<T> {
    state: Mutex<QueueState<T>>,
    signal: Condvar,
}

impl<T> Default for RequestQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RequestQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                signaled: false,
            }),
            signal: Condvar::new(),
        }
    }

    pub fn enqueue(&self, item: T) {
        self.push(QueueItem::Request(item));
    }

    pub fn enqueue_shutdown(&self) {
        self.push(QueueItem::Shutdown);
    }

    pub fn try_dequeue(&self) -> Option<QueueItem<T>> {
        self.lock("try_dequeue").items.pop_front()
    }

    /// Blocks until at least one signal was posted since the last wait returned.
    ///
    /// Returning does not guarantee an item is present; drain with
    /// [`RequestQueue::try_dequeue`] until it yields `None`.
    pub fn wait_for_item(&self) {
        let mut state = self.lock("wait_for_item");
        while !state.signaled {
            state = match self.signal.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => {
                    warn_queue_lock_poison_once("wait_for_item");
                    poisoned.into_inner()
                }
            };
        }
        state.signaled = false;
    }

    /// Same as [`RequestQueue::wait_for_item`] but gives up after `timeout`.
    /// Returns whether a signal was consumed.
    pub fn wait_for_item_timeout(&self, timeout: Duration) -> bool {
        let state = self.lock("wait_for_item_timeout");
        let (mut state, _) = match self
            .signal
            .wait_timeout_while(state, timeout, |state| !state.signaled)
        {
            Ok(result) => result,
            Err(poisoned) => {
                warn_queue_lock_poison_once("wait_for_item_timeout");
                poisoned.into_inner()
            }
        };
        let signaled = state.signaled;
        state.signaled = false;
        signaled
    }

    pub fn len(&self) -> usize {
        self.lock("len").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, item: QueueItem<T>) {
        let mut state = self.lock("enqueue");
        state.items.push_back(item);
        state.signaled = true;
        drop(state);
        self.signal.notify_one();
    }

    fn lock(&self, operation: &'static str) -> MutexGuard<'_, QueueState<T>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn_queue_lock_poison_once(operation);
                poisoned.into_inner()
            }
        }
    }
}
