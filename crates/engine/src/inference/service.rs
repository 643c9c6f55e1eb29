use std::sync::Arc;

use tracing::{info, warn};

use super::backend::{InferenceError, ModelLoader, ModelSpec};
use super::dispatcher::MainThreadDispatcher;
use super::queue::RequestQueue;
use super::worker::{InferenceWorker, SetupOutcome, WorkerState};
use super::{InferenceSink, Request};

/// Simulation-side front of the pipeline: owns the request queue, the worker
/// and a handle on the dispatcher results come back through.
pub struct InferenceService<C: 'static> {
    queue: Arc<RequestQueue<Request<C>>>,
    dispatcher: MainThreadDispatcher<C>,
    worker: Option<InferenceWorker<C>>,
}

impl<C: 'static> std::fmt::Debug for InferenceService<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceService")
            .field("state", &self.state())
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl<C: 'static> InferenceService<C> {
    pub fn new(dispatcher: MainThreadDispatcher<C>) -> Self {
        Self {
            queue: Arc::new(RequestQueue::new()),
            dispatcher,
            worker: None,
        }
    }

    pub fn start(
        &mut self,
        loader: Box<dyn ModelLoader>,
        spec: ModelSpec,
        on_setup: impl FnOnce(&mut C, SetupOutcome) + Send + 'static,
    ) -> Result<(), InferenceError> {
        if self.worker.is_some() {
            return Err(InferenceError::AlreadyStarted);
        }
        let worker = InferenceWorker::spawn(
            loader,
            spec,
            Arc::clone(&self.queue),
            self.dispatcher.clone(),
            on_setup,
        )?;
        info!("inference_service_started");
        self.worker = Some(worker);
        Ok(())
    }

    /// `Stopped` when never started.
    pub fn state(&self) -> WorkerState {
        self.worker
            .as_ref()
            .map_or(WorkerState::Stopped, InferenceWorker::state)
    }

    pub fn is_initializing(&self) -> bool {
        self.state() == WorkerState::Starting
    }

    pub fn dispatcher(&self) -> &MainThreadDispatcher<C> {
        &self.dispatcher
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn shutdown(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.join();
            info!("inference_service_shutdown");
        }
    }
}

impl<C: 'static> InferenceSink<C> for InferenceService<C> {
    fn is_model_ready(&self) -> bool {
        self.state() == WorkerState::Running
    }

    fn submit(&self, request: Request<C>) -> bool {
        if !self.is_model_ready() {
            warn!(
                request_id = %request.id,
                session_id = %request.session_id,
                "inference_request_rejected_not_ready"
            );
            return false;
        }
        self.queue.enqueue(request);
        true
    }
}

impl<C: 'static> Drop for InferenceService<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
