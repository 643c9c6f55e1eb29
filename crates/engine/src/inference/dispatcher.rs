use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{error, warn};

static DISPATCH_LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

fn warn_dispatch_lock_poison_once(operation: &'static str) {
    if DISPATCH_LOCK_POISON_WARNED
        .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
    {
        warn!(operation, "dispatcher lock poisoned; recovered inner value");
    }
}

type Job<C> = Box<dyn FnOnce(&mut C) + Send>;

/// Callbacks posted from any thread and run on the simulation thread.
///
/// Cloning shares the same pending list.
pub struct MainThreadDispatcher<C> {
    pending: Arc<Mutex<Vec<Job<C>>>>,
}

impl<C> Clone for MainThreadDispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<C> Default for MainThreadDispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> std::fmt::Debug for MainThreadDispatcher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainThreadDispatcher")
            .field("pending", &self.pending_len())
            .finish()
    }
}

impl<C> MainThreadDispatcher<C> {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn post(&self, job: impl FnOnce(&mut C) + Send + 'static) {
        self.lock("post").push(Box::new(job));
    }

    pub fn pending_len(&self) -> usize {
        self.lock("pending_len").len()
    }

    /// Runs every callback queued before this call, in post order.
    ///
    /// Callbacks posted while draining wait for the next call. A panicking
    /// callback is logged and the rest still run. Returns the number run.
    pub fn drain_once(&self, ctx: &mut C) -> usize {
        let jobs = std::mem::take(&mut *self.lock("drain_once"));
        let count = jobs.len();
        for (index, job) in jobs.into_iter().enumerate() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job(ctx))) {
                error!(
                    index,
                    panic = %panic_message(payload.as_ref()),
                    "main_thread_callback_panicked"
                );
            }
        }
        count
    }

    fn lock(&self, operation: &'static str) -> MutexGuard<'_, Vec<Job<C>>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn_dispatch_lock_poison_once(operation);
                poisoned.into_inner()
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[derive(Default)]
    struct Ctx {
        log: Vec<u32>,
        dispatcher: Option<MainThreadDispatcher<Ctx>>,
    }

    #[test]
    fn drain_with_nothing_pending_is_noop() {
        let dispatcher = MainThreadDispatcher::<Ctx>::new();
        let mut ctx = Ctx::default();
        assert_eq!(dispatcher.drain_once(&mut ctx), 0);
        assert!(ctx.log.is_empty());
    }

    #[test]
    fn callbacks_run_in_post_order() {
        let dispatcher = MainThreadDispatcher::<Ctx>::new();
        for value in 1..=3 {
            dispatcher.post(move |ctx: &mut Ctx| ctx.log.push(value));
        }
        let mut ctx = Ctx::default();
        assert_eq!(dispatcher.drain_once(&mut ctx), 3);
        assert_eq!(ctx.log, vec![1, 2, 3]);
        assert_eq!(dispatcher.pending_len(), 0);
    }

    #[test]
    fn callbacks_posted_during_drain_wait_for_next_drain() {
        let dispatcher = MainThreadDispatcher::<Ctx>::new();
        let mut ctx = Ctx {
            dispatcher: Some(dispatcher.clone()),
            ..Ctx::default()
        };
        dispatcher.post(|ctx: &mut Ctx| {
            ctx.log.push(1);
            if let Some(inner) = ctx.dispatcher.clone() {
                inner.post(|ctx: &mut Ctx| ctx.log.push(2));
            }
        });

        assert_eq!(dispatcher.drain_once(&mut ctx), 1);
        assert_eq!(ctx.log, vec![1]);
        assert_eq!(dispatcher.drain_once(&mut ctx), 1);
        assert_eq!(ctx.log, vec![1, 2]);
    }

    #[test]
    fn panicking_callback_does_not_stop_the_rest() {
        let dispatcher = MainThreadDispatcher::<Ctx>::new();
        dispatcher.post(|ctx: &mut Ctx| ctx.log.push(1));
        dispatcher.post(|_: &mut Ctx| panic!("callback failure"));
        dispatcher.post(|ctx: &mut Ctx| ctx.log.push(3));

        let mut ctx = Ctx::default();
        assert_eq!(dispatcher.drain_once(&mut ctx), 3);
        assert_eq!(ctx.log, vec![1, 3]);
    }

    #[test]
    fn post_is_safe_from_other_threads() {
        let dispatcher = MainThreadDispatcher::<Ctx>::new();
        thread::scope(|scope| {
            for value in 0..8u32 {
                let dispatcher = dispatcher.clone();
                scope.spawn(move || dispatcher.post(move |ctx: &mut Ctx| ctx.log.push(value)));
            }
        });
        let mut ctx = Ctx::default();
        assert_eq!(dispatcher.drain_once(&mut ctx), 8);
        ctx.log.sort_unstable();
        assert_eq!(ctx.log, (0..8).collect::<Vec<_>>());
    }
}
