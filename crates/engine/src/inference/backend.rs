use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_DEVICE: &str = "CPU";

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("failed to load model from {path}: {reason}")]
    LoadFailed { path: PathBuf, reason: String },
    #[error("inference backend produced no output")]
    NoOutput,
    #[error("inference backend failed: {0}")]
    Backend(String),
    #[error("model handle was already released")]
    Released,
    #[error("model handle is poisoned after a backend panic")]
    Poisoned,
    #[error("inference backend panicked: {0}")]
    Panicked(String),
    #[error("inference worker is already running")]
    AlreadyStarted,
    #[error("failed to spawn inference worker thread: {0}")]
    SpawnWorker(#[source] std::io::Error),
}

/// A loaded model. Calls are blocking and only ever made from the worker thread.
pub trait InferenceBackend: Send {
    fn infer(&mut self, messages_json: &str, tools_json: Option<&str>)
        -> Result<String, InferenceError>;

    fn release(&mut self) {}
}

pub trait ModelLoader: Send {
    fn load_model(
        &mut self,
        model_dir: &Path,
        device: &str,
    ) -> Result<Box<dyn InferenceBackend>, InferenceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub model_dir: PathBuf,
    pub device: String,
}

impl ModelSpec {
    /// Resolves `<models_dir>/<model_id>/`. Only the CPU device is supported;
    /// anything else falls back to it.
    pub fn new(models_dir: &Path, model_id: &str, device: &str) -> Self {
        let device = if device.eq_ignore_ascii_case(DEFAULT_DEVICE) {
            DEFAULT_DEVICE.to_string()
        } else {
            warn!(device, fallback = DEFAULT_DEVICE, "unsupported_inference_device");
            DEFAULT_DEVICE.to_string()
        };
        Self {
            model_dir: models_dir.join(model_id),
            device,
        }
    }
}

enum HandleState {
    Loaded(Box<dyn InferenceBackend>),
    Poisoned,
    Released,
}

/// Owns the loaded backend; released exactly once.
pub struct ModelHandle {
    state: HandleState,
    model_dir: PathBuf,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            HandleState::Loaded(_) => "loaded",
            HandleState::Poisoned => "poisoned",
            HandleState::Released => "released",
        };
        f.debug_struct("ModelHandle")
            .field("state", &state)
            .field("model_dir", &self.model_dir)
            .finish()
    }
}

impl ModelHandle {
    pub fn load(loader: &mut dyn ModelLoader, spec: &ModelSpec) -> Result<Self, InferenceError> {
        info!(model_dir = %spec.model_dir.display(), device = %spec.device, "model_load_started");
        let backend = loader.load_model(&spec.model_dir, &spec.device)?;
        Ok(Self {
            state: HandleState::Loaded(backend),
            model_dir: spec.model_dir.clone(),
        })
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, HandleState::Loaded(_))
    }

    pub fn infer(
        &mut self,
        messages_json: &str,
        tools_json: Option<&str>,
    ) -> Result<String, InferenceError> {
        match &mut self.state {
            HandleState::Loaded(backend) => {
                let output = backend.infer(messages_json, tools_json)?;
                if output.is_empty() {
                    return Err(InferenceError::NoOutput);
                }
                Ok(output)
            }
            HandleState::Poisoned => Err(InferenceError::Poisoned),
            HandleState::Released => Err(InferenceError::Released),
        }
    }

    /// Marks the handle unusable after a backend panic. The backend is still
    /// given a chance to free its resources.
    pub fn poison(&mut self) {
        if let HandleState::Loaded(mut backend) =
            std::mem::replace(&mut self.state, HandleState::Poisoned)
        {
            if panic::catch_unwind(AssertUnwindSafe(|| backend.release())).is_err() {
                warn!(model_dir = %self.model_dir.display(), "model_release_panicked");
            }
        }
    }

    pub fn release(&mut self) -> Result<(), InferenceError> {
        match std::mem::replace(&mut self.state, HandleState::Released) {
            HandleState::Loaded(mut backend) => {
                backend.release();
                info!(model_dir = %self.model_dir.display(), "model_released");
                Ok(())
            }
            HandleState::Poisoned => Ok(()),
            HandleState::Released => Err(InferenceError::Released),
        }
    }
}

impl Drop for ModelHandle {
    fn drop(&mut self) {
        if self.is_loaded() {
            let _ = self.release();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    Text(String),
    Fail(String),
    Panic(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedCall {
    pub messages_json: String,
    pub tools_json: Option<String>,
}

#[derive(Debug, Default)]
struct TranscriptInner {
    calls: Vec<ScriptedCall>,
    loads: u32,
    releases: u32,
}

/// Shared record of what the scripted backend saw.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTranscript {
    inner: Arc<Mutex<TranscriptInner>>,
}

static TRANSCRIPT_LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

impl ScriptedTranscript {
    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.lock().calls.clone()
    }

    pub fn loads(&self) -> u32 {
        self.lock().loads
    }

    pub fn releases(&self) -> u32 {
        self.lock().releases
    }

    fn lock(&self) -> MutexGuard<'_, TranscriptInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                if TRANSCRIPT_LOCK_POISON_WARNED
                    .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    warn!("scripted transcript lock poisoned; recovered inner value");
                }
                poisoned.into_inner()
            }
        }
    }
}

/// In-process backend that replays canned replies in order.
#[derive(Debug)]
pub struct ScriptedBackend {
    replies: VecDeque<ScriptedReply>,
    fallback: Option<String>,
    delay: Duration,
    transcript: ScriptedTranscript,
}

impl ScriptedBackend {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: replies.into_iter().collect(),
            fallback: None,
            delay: Duration::ZERO,
            transcript: ScriptedTranscript::default(),
        }
    }

    /// Reply used once the script runs out; without one the backend reports no output.
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    /// Simulated inference latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn transcript(&self) -> ScriptedTranscript {
        self.transcript.clone()
    }
}

impl InferenceBackend for ScriptedBackend {
    fn infer(
        &mut self,
        messages_json: &str,
        tools_json: Option<&str>,
    ) -> Result<String, InferenceError> {
        self.transcript.lock().calls.push(ScriptedCall {
            messages_json: messages_json.to_string(),
            tools_json: tools_json.map(str::to_string),
        });
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        match self.replies.pop_front() {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Fail(reason)) => Err(InferenceError::Backend(reason)),
            Some(ScriptedReply::Panic(message)) => panic!("{message}"),
            None => match &self.fallback {
                Some(text) => Ok(text.clone()),
                None => Err(InferenceError::NoOutput),
            },
        }
    }

    fn release(&mut self) {
        self.transcript.lock().releases += 1;
        debug!(remaining = self.replies.len(), "scripted_backend_released");
    }
}

/// Hands out one [`ScriptedBackend`]; optionally fails the load instead.
#[derive(Debug)]
pub struct ScriptedLoader {
    backend: Option<ScriptedBackend>,
    load_failure: Option<String>,
    load_delay: Duration,
}

impl ScriptedLoader {
    pub fn new(backend: ScriptedBackend) -> Self {
        Self {
            backend: Some(backend),
            load_failure: None,
            load_delay: Duration::ZERO,
        }
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            backend: None,
            load_failure: Some(reason.into()),
            load_delay: Duration::ZERO,
        }
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }
}

impl ModelLoader for ScriptedLoader {
    fn load_model(
        &mut self,
        model_dir: &Path,
        device: &str,
    ) -> Result<Box<dyn InferenceBackend>, InferenceError> {
        if !self.load_delay.is_zero() {
            thread::sleep(self.load_delay);
        }
        if let Some(reason) = &self.load_failure {
            return Err(InferenceError::LoadFailed {
                path: model_dir.to_path_buf(),
                reason: reason.clone(),
            });
        }
        let backend = self.backend.take().ok_or_else(|| InferenceError::LoadFailed {
            path: model_dir.to_path_buf(),
            reason: "scripted backend already handed out".to_string(),
        })?;
        backend.transcript.lock().loads += 1;
        debug!(model_dir = %model_dir.display(), device, "scripted_model_loaded");
        Ok(Box::new(backend))
    }
}
