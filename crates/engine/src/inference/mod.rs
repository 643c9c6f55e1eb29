//! Background inference pipeline.
//!
//! The simulation thread owns every piece of game state. It talks to the single
//! inference worker through two touchpoints only: the [`RequestQueue`] going out
//! and the [`MainThreadDispatcher`] coming back. Payloads cross by value.

mod backend;
mod dispatcher;
mod queue;
mod service;
mod worker;

use std::fmt;
use std::time::Duration;

use uuid::Uuid;

pub use backend::{
    InferenceBackend, InferenceError, ModelHandle, ModelLoader, ModelSpec, ScriptedBackend,
    ScriptedCall, ScriptedLoader, ScriptedReply, ScriptedTranscript, DEFAULT_DEVICE,
};
pub use dispatcher::MainThreadDispatcher;
pub(crate) use dispatcher::panic_message;
pub use queue::{QueueItem, RequestQueue};
pub use service::InferenceService;
pub use worker::{InferenceWorker, SetupOutcome, WorkerState, WorkerStatus};

pub type RequestId = Uuid;

/// Runs on the simulation thread with the context `C` the dispatcher drains into.
pub type Completion<C> = Box<dyn FnOnce(&mut C, Response) + Send>;

pub struct Request<C> {
    pub id: RequestId,
    pub session_id: String,
    pub messages_json: String,
    pub tools_json: Option<String>,
    pub completion: Completion<C>,
}

impl<C> Request<C> {
    pub fn new(
        session_id: impl Into<String>,
        messages_json: String,
        tools_json: Option<String>,
        completion: Completion<C>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            messages_json,
            tools_json,
            completion,
        }
    }
}

impl<C> fmt::Debug for Request<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("messages_len", &self.messages_json.len())
            .field("has_tools", &self.tools_json.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub request_id: RequestId,
    pub session_id: String,
    pub output: String,
    pub image: Option<Vec<u8>>,
    pub elapsed: Duration,
}

/// Where the session layer hands finished requests.
pub trait InferenceSink<C> {
    fn is_model_ready(&self) -> bool;
    /// Returns `false` when the request was not accepted.
    fn submit(&self, request: Request<C>) -> bool;
}
