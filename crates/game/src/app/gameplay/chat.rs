use std::time::Duration;

use magic_engine::inference::{
    Completion, InferenceError, InferenceService, MainThreadDispatcher, ModelLoader, ModelSpec,
    Response, SetupOutcome,
};
use magic_engine::llm::{
    ChatResult, ChatResultKind, PredefinedMessages, QueryRole, SessionManager, ToolBinding,
    ToolExecutor,
};
use rand::rngs::StdRng;
use tracing::{error, info};
use uuid::Uuid;

use super::events::CombatEventBus;
use super::triggers::{ally_tool_executor, ally_tools_manifest, AllyTriggers, TriggerInputs};
use crate::app::config::LlmConfig;

pub(crate) const INITIALIZING_MESSAGE: &str = "System is initializing, please wait!";
pub(crate) const READY_MESSAGE: &str = "System initialization complete, give me an order!";
pub(crate) const REJECTED_MESSAGE: &str = "The system seems broken... call the developer!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChatChannel {
    /// Short system notices shown over the ally.
    Notice,
    /// Replies shown in the conversation panel.
    Reply,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChatLine {
    pub(crate) channel: ChatChannel,
    pub(crate) text: String,
}

/// What the UI would show. Every line is also logged.
#[derive(Debug, Default)]
pub(crate) struct ChatLog {
    lines: Vec<ChatLine>,
}

impl ChatLog {
    pub(crate) fn push(&mut self, channel: ChatChannel, text: impl Into<String>) {
        let line = ChatLine {
            channel,
            text: text.into(),
        };
        info!(channel = ?line.channel, text = %line.text, "chat_line");
        self.lines.push(line);
    }

    pub(crate) fn lines(&self) -> &[ChatLine] {
        &self.lines
    }
}

fn on_ally_response() -> Completion<AllyChat> {
    Box::new(|chat: &mut AllyChat, response: Response| chat.handle_response(response))
}

/// The round after a tool result runs without the executor, so a tool tag in
/// that reply comes back as plain text and the chain ends there.
fn on_ally_follow_up() -> Completion<AllyChat> {
    Box::new(|chat: &mut AllyChat, response: Response| chat.handle_follow_up(response))
}

/// The ally's language-model side: one chat session with the player, the
/// trigger tool and the chat log. Inference callbacks run against this
/// struct through its dispatcher.
#[derive(Debug)]
pub(crate) struct AllyChat {
    sessions: SessionManager,
    service: InferenceService<AllyChat>,
    tools: ToolExecutor<AllyTriggers>,
    tools_json: String,
    triggers: AllyTriggers,
    log: ChatLog,
    session_id: String,
    initializing_announced: bool,
    rng: StdRng,
}

impl AllyChat {
    pub(crate) fn new(
        llm: &LlmConfig,
        messages: PredefinedMessages,
        triggers: AllyTriggers,
        rng: StdRng,
    ) -> Self {
        let session_id = format!("ally-{}", Uuid::new_v4());
        info!(session_id = %session_id, "ally_chat_created");
        Self {
            sessions: SessionManager::new(llm.system_prompt.as_str())
                .with_request_timeout(llm.request_timeout()),
            service: InferenceService::new(MainThreadDispatcher::new()),
            tools: ally_tool_executor(messages),
            tools_json: ally_tools_manifest(),
            triggers,
            log: ChatLog::default(),
            session_id,
            initializing_announced: false,
            rng,
        }
    }

    /// Starts the worker; the setup outcome arrives through the dispatcher.
    pub(crate) fn start(
        &mut self,
        loader: Box<dyn ModelLoader>,
        spec: ModelSpec,
    ) -> Result<(), InferenceError> {
        self.service
            .start(loader, spec, |chat: &mut AllyChat, outcome| chat.handle_setup(outcome))
    }

    pub(crate) fn dispatcher(&self) -> MainThreadDispatcher<AllyChat> {
        self.service.dispatcher().clone()
    }

    pub(crate) fn session_id(&self) -> &str {
        &self.session_id
    }

    pub(crate) fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub(crate) fn log(&self) -> &ChatLog {
        &self.log
    }

    pub(crate) fn triggers(&self) -> &AllyTriggers {
        &self.triggers
    }

    /// Submits a player line with the tool manifest. A refused query posts
    /// a notice instead.
    pub(crate) fn receive_user_chat(&mut self, text: &str) -> bool {
        let accepted = self.sessions.request_query(
            &self.service,
            &self.session_id,
            text,
            QueryRole::User,
            Some(&self.tools_json),
            on_ally_response(),
        );
        if !accepted {
            self.log.push(ChatChannel::Notice, REJECTED_MESSAGE);
        }
        accepted
    }

    /// Frame tick: initializing notice, request timeouts and trigger cooldowns.
    pub(crate) fn update(&mut self, dt: f32) {
        if self.service.is_initializing() && !self.initializing_announced {
            self.initializing_announced = true;
            self.log.push(ChatChannel::Notice, INITIALIZING_MESSAGE);
        }
        for result in self.sessions.tick(Duration::from_secs_f32(dt.max(0.0))) {
            self.publish(result);
        }
        self.triggers.registry_mut().tick(dt);
    }

    /// Evaluates the triggers while the player lives. Returns how many fired.
    pub(crate) fn route(
        &mut self,
        player_alive: bool,
        inputs: &TriggerInputs,
        events: &mut CombatEventBus,
    ) -> usize {
        if !player_alive {
            return 0;
        }
        self.triggers.registry_mut().route(inputs, events)
    }

    pub(crate) fn shutdown(&mut self) {
        self.service.shutdown();
    }

    fn handle_setup(&mut self, outcome: SetupOutcome) {
        match outcome {
            SetupOutcome::Ready => self.log.push(ChatChannel::Notice, READY_MESSAGE),
            SetupOutcome::Failed(reason) => error!(reason = %reason, "ally_model_unavailable"),
        }
    }

    fn handle_response(&mut self, response: Response) {
        let Self {
            sessions,
            service,
            tools,
            triggers,
            rng,
            ..
        } = self;
        let result = sessions.handle_response_with_tools(
            &*service,
            response,
            ToolBinding {
                executor: tools,
                target: triggers,
            },
            on_ally_follow_up,
            rng,
        );
        if let Some(result) = result {
            self.publish(result);
        }
    }

    fn handle_follow_up(&mut self, response: Response) {
        if let Some(result) = self.sessions.handle_response(response) {
            self.publish(result);
        }
    }

    fn publish(&mut self, result: ChatResult) {
        info!(
            session_id = %result.session_id,
            kind = ?result.kind,
            "ally_chat_result"
        );
        let channel = match result.kind {
            ChatResultKind::Success => ChatChannel::Reply,
            ChatResultKind::Failed | ChatResultKind::Toolcall => ChatChannel::Notice,
        };
        self.log.push(channel, result.text);
    }
}
