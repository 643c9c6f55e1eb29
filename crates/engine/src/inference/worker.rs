use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::backend::{InferenceError, ModelHandle, ModelLoader, ModelSpec};
use super::dispatcher::{panic_message, MainThreadDispatcher};
use super::queue::{QueueItem, RequestQueue};
use super::{Request, Response};

pub const WORKER_THREAD_NAME: &str = "inference-worker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Starting = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Starting,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Lock-free view of the worker lifecycle, readable from any thread.
#[derive(Debug, Clone)]
pub struct WorkerStatus(Arc<AtomicU8>);

impl WorkerStatus {
    fn new(state: WorkerState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    pub fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Moves `from -> to` only if still in `from`.
    fn advance(&self, from: WorkerState, to: WorkerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    Ready,
    Failed(String),
}

/// Owns the dedicated inference thread.
pub struct InferenceWorker<C: 'static> {
    queue: Arc<RequestQueue<Request<C>>>,
    status: WorkerStatus,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl<C: 'static> std::fmt::Debug for InferenceWorker<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceWorker")
            .field("state", &self.status.get())
            .field("queued", &self.queue.len())
            .finish()
    }
}

struct WorkerContext<C: 'static> {
    queue: Arc<RequestQueue<Request<C>>>,
    dispatcher: MainThreadDispatcher<C>,
    status: WorkerStatus,
    running: Arc<AtomicBool>,
}

impl<C: 'static> InferenceWorker<C> {
    /// Spawns the worker. The model is loaded on the worker thread; the setup
    /// outcome reaches `on_setup` through the dispatcher.
    pub fn spawn(
        mut loader: Box<dyn ModelLoader>,
        spec: ModelSpec,
        queue: Arc<RequestQueue<Request<C>>>,
        dispatcher: MainThreadDispatcher<C>,
        on_setup: impl FnOnce(&mut C, SetupOutcome) + Send + 'static,
    ) -> Result<Self, InferenceError> {
        let status = WorkerStatus::new(WorkerState::Starting);
        let running = Arc::new(AtomicBool::new(true));
        let ctx = WorkerContext {
            queue: Arc::clone(&queue),
            dispatcher,
            status: status.clone(),
            running: Arc::clone(&running),
        };

        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let setup_dispatcher = ctx.dispatcher.clone();
                let announce = move |outcome: SetupOutcome| {
                    setup_dispatcher.post(move |target: &mut C| on_setup(target, outcome));
                };
                run_worker(loader.as_mut(), &spec, &ctx, announce);
            })
            .map_err(InferenceError::SpawnWorker)?;

        Ok(Self {
            queue,
            status,
            running,
            thread: Some(thread),
        })
    }

    pub fn state(&self) -> WorkerState {
        self.status.get()
    }

    pub fn status(&self) -> WorkerStatus {
        self.status.clone()
    }

    /// Clears the run flag and wakes the worker with the stop sentinel.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if !self.status.advance(WorkerState::Running, WorkerState::Stopping) {
            self.status.advance(WorkerState::Starting, WorkerState::Stopping);
        }
        self.queue.enqueue_shutdown();
    }

    /// Stops and waits for the thread. Safe to call more than once.
    pub fn join(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            if let Err(payload) = thread.join() {
                error!(panic = %panic_message(payload.as_ref()), "inference_worker_panicked");
                self.status.set(WorkerState::Stopped);
            }
        }
    }
}

impl<C: 'static> Drop for InferenceWorker<C> {
    fn drop(&mut self) {
        self.join();
    }
}

fn run_worker<C: 'static>(
    loader: &mut dyn ModelLoader,
    spec: &ModelSpec,
    ctx: &WorkerContext<C>,
    announce: impl FnOnce(SetupOutcome),
) {
    let load_started = Instant::now();
    let mut handle = match ModelHandle::load(loader, spec) {
        Ok(handle) => handle,
        Err(err) => {
            error!(error = %err, "model_load_failed");
            ctx.running.store(false, Ordering::Release);
            ctx.status.set(WorkerState::Stopped);
            announce(SetupOutcome::Failed(err.to_string()));
            return;
        }
    };
    info!(
        elapsed_ms = load_started.elapsed().as_millis() as u64,
        "model_load_finished"
    );

    // `stop` may have raced the load.
    if !ctx.status.advance(WorkerState::Starting, WorkerState::Running) {
        release_handle(&mut handle);
        ctx.status.set(WorkerState::Stopped);
        announce(SetupOutcome::Failed(
            "inference worker stopped during model load".to_string(),
        ));
        return;
    }
    announce(SetupOutcome::Ready);

    info!("inference_worker_started");
    while ctx.running.load(Ordering::Acquire) {
        ctx.queue.wait_for_item();
        while let Some(item) = ctx.queue.try_dequeue() {
            match item {
                QueueItem::Shutdown => continue,
                QueueItem::Request(request) => {
                    if !process_request(&mut handle, request, ctx) {
                        break;
                    }
                }
            }
        }
    }

    let mut abandoned = 0usize;
    while let Some(item) = ctx.queue.try_dequeue() {
        if matches!(item, QueueItem::Request(_)) {
            abandoned += 1;
        }
    }
    if abandoned > 0 {
        warn!(abandoned, "inference_requests_abandoned");
    }

    ctx.status.set(WorkerState::Stopping);
    release_handle(&mut handle);
    ctx.status.set(WorkerState::Stopped);
    info!("inference_worker_stopped");
}

/// Returns false once the handle is poisoned; the worker then winds down and
/// stops accepting requests.
fn process_request<C: 'static>(
    handle: &mut ModelHandle,
    request: Request<C>,
    ctx: &WorkerContext<C>,
) -> bool {
    let Request {
        id,
        session_id,
        messages_json,
        tools_json,
        completion,
    } = request;

    debug!(request_id = %id, session_id = %session_id, "inference_started");
    let started = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        handle.infer(&messages_json, tools_json.as_deref())
    }));

    match result {
        Ok(Ok(output)) => {
            let response = Response {
                request_id: id,
                session_id,
                output,
                image: None,
                elapsed: started.elapsed(),
            };
            info!(
                request_id = %id,
                elapsed_ms = response.elapsed.as_millis() as u64,
                "inference_finished"
            );
            ctx.dispatcher
                .post(move |target: &mut C| completion(target, response));
            true
        }
        Ok(Err(err)) => {
            warn!(request_id = %id, session_id = %session_id, error = %err, "inference_request_dropped");
            true
        }
        Err(payload) => {
            error!(
                request_id = %id,
                session_id = %session_id,
                panic = %panic_message(payload.as_ref()),
                "inference_backend_panicked"
            );
            handle.poison();
            ctx.running.store(false, Ordering::Release);
            ctx.status.advance(WorkerState::Running, WorkerState::Stopping);
            false
        }
    }
}

fn release_handle(handle: &mut ModelHandle) {
    if let Err(err) = handle.release() {
        warn!(error = %err, "model_release_failed");
    }
}
