use std::collections::BTreeMap;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::inference::{Completion, InferenceSink, Request, RequestId, Response};

use super::protocol::{
    contains_tool_call, extract_tool_call_block, parse_tool_call, serialize_conversation,
    tool_message, Message, Role,
};
use super::tools::ToolExecutor;

pub const TIMEOUT_MESSAGE: &str = "The request took too long. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryRole {
    User,
    Assistant,
    Tool,
}

impl QueryRole {
    fn role(self) -> Role {
        match self {
            QueryRole::User => Role::User,
            QueryRole::Assistant => Role::Assistant,
            QueryRole::Tool => Role::Tool,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatResultKind {
    Success,
    Failed,
    /// A tool ran and a follow-up inference is on its way.
    Toolcall,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatResult {
    pub session_id: String,
    pub kind: ChatResultKind,
    pub text: String,
}

impl ChatResult {
    fn new(session_id: &str, kind: ChatResultKind, text: impl Into<String>) -> Self {
        Self {
            session_id: session_id.to_string(),
            kind,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    request_id: RequestId,
    waited: Duration,
}

#[derive(Debug)]
struct Session {
    messages: Vec<Message>,
    state: SessionState,
    in_flight: Option<InFlight>,
}

impl Session {
    fn new(system_prompt: &str) -> Self {
        Self {
            messages: vec![Message::new(Role::System, system_prompt)],
            state: SessionState::Idle,
            in_flight: None,
        }
    }

    fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message::new(role, content));
    }

    fn finish(&mut self) {
        self.state = SessionState::Idle;
        self.in_flight = None;
    }
}

/// Executor plus the object its handlers act on.
pub struct ToolBinding<'a, T> {
    pub executor: &'a ToolExecutor<T>,
    pub target: &'a mut T,
}

/// Conversation histories and the tool-call round trip. Lives on the
/// simulation thread; responses arrive through the dispatcher.
#[derive(Debug)]
pub struct SessionManager {
    system_prompt: String,
    sessions: BTreeMap<String, Session>,
    request_timeout: Option<Duration>,
}

impl SessionManager {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            sessions: BTreeMap::new(),
            request_timeout: None,
        }
    }

    /// Fails a session still waiting after `timeout`; a response arriving
    /// later is discarded.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout.filter(|timeout| !timeout.is_zero());
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn session_state(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.get(session_id).map(|session| session.state)
    }

    pub fn session_messages(&self, session_id: &str) -> Option<&[Message]> {
        self.sessions
            .get(session_id)
            .map(|session| session.messages.as_slice())
    }

    pub fn last_messages(&self, session_id: &str, count: usize) -> Option<&[Message]> {
        let messages = self.session_messages(session_id)?;
        Some(&messages[messages.len().saturating_sub(count)..])
    }

    /// Appends `text` under `role` and submits the whole history.
    ///
    /// Returns `false` with no side effect when the model is not ready, the
    /// session is already waiting on a response, or the sink refuses.
    pub fn request_query<C>(
        &mut self,
        sink: &dyn InferenceSink<C>,
        session_id: &str,
        text: &str,
        role: QueryRole,
        tools_json: Option<&str>,
        on_completed: Completion<C>,
    ) -> bool {
        self.submit(sink, session_id, text, role, tools_json, on_completed, false)
    }

    #[allow(clippy::too_many_arguments)]
    fn submit<C>(
        &mut self,
        sink: &dyn InferenceSink<C>,
        session_id: &str,
        text: &str,
        role: QueryRole,
        tools_json: Option<&str>,
        on_completed: Completion<C>,
        continuing: bool,
    ) -> bool {
        if !sink.is_model_ready() {
            error!(session_id, "inference_not_ready");
            return false;
        }

        let history = match self.sessions.get(session_id) {
            Some(session) => {
                if session.state == SessionState::Running && !continuing {
                    warn!(session_id, "session_busy_query_rejected");
                    return false;
                }
                session.messages.as_slice()
            }
            None => &[],
        };

        let next = Message::new(role.role(), text);
        let messages_json = if history.is_empty() {
            let system = Message::new(Role::System, self.system_prompt.as_str());
            serialize_conversation(std::slice::from_ref(&system), &next)
        } else {
            serialize_conversation(history, &next)
        };

        let request = Request::new(
            session_id,
            messages_json,
            tools_json.map(str::to_string),
            on_completed,
        );
        let request_id = request.id;
        if !sink.submit(request) {
            warn!(session_id, %request_id, "inference_submit_refused");
            return false;
        }

        let system_prompt = &self.system_prompt;
        let session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                info!(session_id, "session_created");
                Session::new(system_prompt)
            });
        session.messages.push(next);
        session.state = SessionState::Running;
        session.in_flight = Some(InFlight {
            request_id,
            waited: Duration::ZERO,
        });
        debug!(session_id, %request_id, history = session.messages.len(), "inference_requested");
        true
    }

    /// Handles a response for a query made without tools. A tool-call tag in
    /// the reply is returned verbatim as a success.
    pub fn handle_response(&mut self, response: Response) -> Option<ChatResult> {
        let text = response.output.as_str();
        let session_id = response.session_id.as_str();
        let session = match self.accept(&response) {
            Accepted::Session(session) => session,
            Accepted::Missing(result) => return Some(result),
            Accepted::Stale => return None,
        };

        session.push(Role::Assistant, text);
        session.finish();
        if contains_tool_call(text) {
            warn!(session_id, "tool_call_without_executor");
        }
        Some(ChatResult::new(session_id, ChatResultKind::Success, text))
    }

    /// Handles a response for a query made with a tool manifest. A successful
    /// tool with no predefined success pool triggers a second inference round
    /// whose completion comes from `follow_up`; the session stays `Running`
    /// until that round is handled.
    pub fn handle_response_with_tools<C, T, R>(
        &mut self,
        sink: &dyn InferenceSink<C>,
        response: Response,
        binding: ToolBinding<'_, T>,
        follow_up: impl FnOnce() -> Completion<C>,
        rng: &mut R,
    ) -> Option<ChatResult>
    where
        R: Rng + ?Sized,
    {
        let text = response.output.as_str();
        let session_id = response.session_id.as_str();
        let session = match self.accept(&response) {
            Accepted::Session(session) => session,
            Accepted::Missing(result) => return Some(result),
            Accepted::Stale => return None,
        };

        session.push(Role::Assistant, text);
        if !contains_tool_call(text) {
            session.finish();
            return Some(ChatResult::new(session_id, ChatResultKind::Success, text));
        }

        let Some(block) = extract_tool_call_block(text) else {
            error!(session_id, "tool_call_block_unterminated");
            session.finish();
            return Some(ChatResult::new(session_id, ChatResultKind::Failed, text));
        };
        let call = match parse_tool_call(block) {
            Ok(call) => call,
            Err(err) => {
                error!(session_id, error = %err, "tool_call_parse_failed");
                session.finish();
                return Some(ChatResult::new(session_id, ChatResultKind::Failed, text));
            }
        };

        let outcome = binding.executor.execute(binding.target, &call);
        let messages = binding.executor.messages();
        let tool_msg = tool_message(&call.name, outcome.as_ref());

        let succeeded = outcome.as_ref().is_some_and(|outcome| outcome.is_success());
        if !succeeded {
            info!(session_id, tool = %call.name, "tool_call_failed");
            session.push(Role::Tool, tool_msg);
            let reply = match messages.sample_failed(rng) {
                Some(sampled) => {
                    session.push(Role::Assistant, sampled);
                    sampled.to_string()
                }
                None => text.to_string(),
            };
            session.finish();
            return Some(ChatResult::new(session_id, ChatResultKind::Failed, reply));
        }

        info!(session_id, tool = %call.name, "tool_call_succeeded");
        if let Some(sampled) = messages.sample_success(rng) {
            session.push(Role::Tool, tool_msg);
            session.push(Role::Assistant, sampled);
            session.finish();
            return Some(ChatResult::new(session_id, ChatResultKind::Success, sampled));
        }

        let resubmitted = self.submit(
            sink,
            session_id,
            &tool_msg,
            QueryRole::Tool,
            None,
            follow_up(),
            true,
        );
        if resubmitted {
            let notice = messages.sample_tool_use(rng).unwrap_or(text);
            return Some(ChatResult::new(session_id, ChatResultKind::Toolcall, notice));
        }

        warn!(session_id, "tool_follow_up_not_submitted");
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.push(Role::Tool, tool_msg);
            session.finish();
        }
        Some(ChatResult::new(session_id, ChatResultKind::Failed, text))
    }

    /// Advances request timers; returns a `Failed` result per timed-out session.
    pub fn tick(&mut self, dt: Duration) -> Vec<ChatResult> {
        let Some(timeout) = self.request_timeout else {
            return Vec::new();
        };
        let mut timed_out = Vec::new();
        for (session_id, session) in &mut self.sessions {
            let Some(in_flight) = session.in_flight.as_mut() else {
                continue;
            };
            in_flight.waited = in_flight.waited.saturating_add(dt);
            if in_flight.waited >= timeout {
                warn!(
                    session_id = %session_id,
                    request_id = %in_flight.request_id,
                    waited_ms = in_flight.waited.as_millis() as u64,
                    "inference_request_timed_out"
                );
                session.finish();
                timed_out.push(ChatResult::new(
                    session_id,
                    ChatResultKind::Failed,
                    TIMEOUT_MESSAGE,
                ));
            }
        }
        timed_out
    }

    fn accept(&mut self, response: &Response) -> Accepted<'_> {
        let session_id = response.session_id.as_str();
        debug!(
            session_id,
            request_id = %response.request_id,
            elapsed_secs = response.elapsed.as_secs(),
            "inference_response_received"
        );
        let Some(session) = self.sessions.get_mut(session_id) else {
            error!(session_id, "response_for_unknown_session");
            return Accepted::Missing(ChatResult::new(
                session_id,
                ChatResultKind::Failed,
                response.output.as_str(),
            ));
        };
        match session.in_flight {
            Some(in_flight) if in_flight.request_id == response.request_id => {}
            _ => {
                debug!(session_id, request_id = %response.request_id, "stale_response_discarded");
                return Accepted::Stale;
            }
        }

        let recent = &session.messages[session.messages.len().saturating_sub(3)..];
        debug!(session_id, recent = ?recent, "session_recent_messages");
        Accepted::Session(session)
    }
}

enum Accepted<'a> {
    Session(&'a mut Session),
    Missing(ChatResult),
    Stale,
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::llm::protocol::ToolCallOutput;
    use crate::llm::tools::PredefinedMessages;

    struct Ctx;

    struct RecordingSink {
        ready: Cell<bool>,
        accept: Cell<bool>,
        submitted: RefCell<Vec<Request<Ctx>>>,
    }

    impl RecordingSink {
        fn ready() -> Self {
            Self {
                ready: Cell::new(true),
                accept: Cell::new(true),
                submitted: RefCell::new(Vec::new()),
            }
        }

        fn take_last(&self) -> Request<Ctx> {
            self.submitted.borrow_mut().pop().expect("a submitted request")
        }
    }

    impl InferenceSink<Ctx> for RecordingSink {
        fn is_model_ready(&self) -> bool {
            self.ready.get()
        }

        fn submit(&self, request: Request<Ctx>) -> bool {
            if !self.accept.get() {
                return false;
            }
            self.submitted.borrow_mut().push(request);
            true
        }
    }

    #[derive(Default)]
    struct Ally {
        triggers: Vec<(String, f32)>,
    }

    fn noop() -> Completion<Ctx> {
        Box::new(|_: &mut Ctx, _: Response| {})
    }

    fn reply(request: &Request<Ctx>, output: &str) -> Response {
        Response {
            request_id: request.id,
            session_id: request.session_id.clone(),
            output: output.to_string(),
            image: None,
            elapsed: Duration::from_millis(1500),
        }
    }

    fn executor(messages: PredefinedMessages) -> ToolExecutor<Ally> {
        let mut executor = ToolExecutor::new(messages);
        executor.register2(
            "CreatePlayerHealthPointTrigger",
            ["skill", "threshold"],
            |ally: &mut Ally, skill: String, threshold: f32| {
                if skill != "SHIELD" {
                    return ToolCallOutput::failed();
                }
                ally.triggers.push((skill, threshold));
                ToolCallOutput::success().with_output("threshold", threshold as f64)
            },
        );
        executor
    }

    const SHIELD_CALL: &str = "<tool_call>{\"name\":\"CreatePlayerHealthPointTrigger\",\"arguments\":{\"skill\":\"SHIELD\",\"threshold\":0.3}}</tool_call>";

    fn roles(manager: &SessionManager, session_id: &str) -> Vec<Role> {
        manager
            .session_messages(session_id)
            .expect("session")
            .iter()
            .map(|message| message.role)
            .collect()
    }

    #[test]
    fn not_ready_rejects_without_creating_session() {
        let sink = RecordingSink::ready();
        sink.ready.set(false);
        let mut manager = SessionManager::new("sys");
        assert!(!manager.request_query(&sink, "s", "hi", QueryRole::User, None, noop()));
        assert!(manager.session_state("s").is_none());
        assert!(sink.submitted.borrow().is_empty());
    }

    #[test]
    fn plain_reply_round_trip() {
        let sink = RecordingSink::ready();
        let mut manager = SessionManager::new("sys");
        assert!(manager.request_query(&sink, "s", "hello", QueryRole::User, None, noop()));
        assert_eq!(manager.session_state("s"), Some(SessionState::Running));

        let request = sink.take_last();
        assert_eq!(
            request.messages_json,
            r#"[{"role":"system","content":"sys"},{"role":"user","content":"hello"}]"#
        );

        let result = manager.handle_response(reply(&request, "hi there")).expect("result");
        assert_eq!(result.kind, ChatResultKind::Success);
        assert_eq!(result.text, "hi there");
        assert_eq!(manager.session_state("s"), Some(SessionState::Idle));
        assert_eq!(roles(&manager, "s"), vec![Role::System, Role::User, Role::Assistant]);
    }

    #[test]
    fn system_message_is_seeded_once() {
        let sink = RecordingSink::ready();
        let mut manager = SessionManager::new("sys");
        for text in ["one", "two"] {
            assert!(manager.request_query(&sink, "s", text, QueryRole::User, None, noop()));
            let request = sink.take_last();
            manager.handle_response(reply(&request, "ok"));
        }
        let system_count = roles(&manager, "s")
            .into_iter()
            .filter(|role| *role == Role::System)
            .count();
        assert_eq!(system_count, 1);
        assert_eq!(manager.session_messages("s").map(<[Message]>::len), Some(5));
        assert_eq!(manager.last_messages("s", 2).map(<[Message]>::len), Some(2));
        assert_eq!(manager.last_messages("s", 50).map(<[Message]>::len), Some(5));
    }

    #[test]
    fn busy_session_rejects_second_query() {
        let sink = RecordingSink::ready();
        let mut manager = SessionManager::new("sys");
        assert!(manager.request_query(&sink, "s", "one", QueryRole::User, None, noop()));
        assert!(!manager.request_query(&sink, "s", "two", QueryRole::User, None, noop()));
        assert_eq!(sink.submitted.borrow().len(), 1);
        assert_eq!(manager.session_messages("s").map(<[Message]>::len), Some(2));

        assert!(manager.request_query(&sink, "other", "x", QueryRole::User, None, noop()));
    }

    #[test]
    fn refused_submit_leaves_no_trace() {
        let sink = RecordingSink::ready();
        sink.accept.set(false);
        let mut manager = SessionManager::new("sys");
        assert!(!manager.request_query(&sink, "s", "hi", QueryRole::User, None, noop()));
        assert!(manager.session_state("s").is_none());
    }

    #[test]
    fn predefined_success_message_short_circuits() {
        let sink = RecordingSink::ready();
        let mut manager = SessionManager::new("sys");
        let executor = executor(PredefinedMessages {
            success: vec!["Shield is ready.".to_string()],
            ..PredefinedMessages::default()
        });
        let mut ally = Ally::default();
        let mut rng = StdRng::seed_from_u64(1);

        manager.request_query(&sink, "s", "protect me", QueryRole::User, Some("[]"), noop());
        let request = sink.take_last();
        assert_eq!(request.tools_json.as_deref(), Some("[]"));

        let result = manager
            .handle_response_with_tools(
                &sink,
                reply(&request, SHIELD_CALL),
                ToolBinding {
                    executor: &executor,
                    target: &mut ally,
                },
                noop,
                &mut rng,
            )
            .expect("result");

        assert_eq!(result.kind, ChatResultKind::Success);
        assert_eq!(result.text, "Shield is ready.");
        assert_eq!(ally.triggers.len(), 1);
        assert_eq!(manager.session_state("s"), Some(SessionState::Idle));
        assert_eq!(
            roles(&manager, "s"),
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert!(sink.submitted.borrow().is_empty());
    }

    #[test]
    fn success_without_pool_reinfers_and_stays_running() {
        let sink = RecordingSink::ready();
        let mut manager = SessionManager::new("sys");
        let executor = executor(PredefinedMessages {
            tool_use: vec!["Working on it...".to_string()],
            ..PredefinedMessages::default()
        });
        let mut ally = Ally::default();
        let mut rng = StdRng::seed_from_u64(2);

        manager.request_query(&sink, "s", "protect me", QueryRole::User, Some("[]"), noop());
        let first = sink.take_last();
        let result = manager
            .handle_response_with_tools(
                &sink,
                reply(&first, SHIELD_CALL),
                ToolBinding {
                    executor: &executor,
                    target: &mut ally,
                },
                noop,
                &mut rng,
            )
            .expect("result");
        assert_eq!(result.kind, ChatResultKind::Toolcall);
        assert_eq!(result.text, "Working on it...");
        assert_eq!(manager.session_state("s"), Some(SessionState::Running));

        let second = sink.take_last();
        assert!(second.tools_json.is_none());
        assert!(second.messages_json.ends_with(
            r#"{"role":"tool","content":"{\"name\":\"CreatePlayerHealthPointTrigger\",\"result\":\"Success\",\"output\":{\"threshold\":0.30000001192092896}}"}]"#
        ));

        // The first response is now stale.
        assert!(manager.handle_response(reply(&first, "late")).is_none());

        let done = manager
            .handle_response(reply(&second, "I'll shield you below 30%."))
            .expect("result");
        assert_eq!(done.kind, ChatResultKind::Success);
        assert_eq!(manager.session_state("s"), Some(SessionState::Idle));
        assert_eq!(
            roles(&manager, "s"),
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
    }

    #[test]
    fn failed_tool_without_pool_returns_raw_text() {
        let sink = RecordingSink::ready();
        let mut manager = SessionManager::new("sys");
        let executor = executor(PredefinedMessages::default());
        let mut ally = Ally::default();
        let mut rng = StdRng::seed_from_u64(3);

        manager.request_query(&sink, "s", "heal", QueryRole::User, Some("[]"), noop());
        let request = sink.take_last();
        let raw = "<tool_call>{\"name\":\"Heal\",\"arguments\":{}}</tool_call>";
        let result = manager
            .handle_response_with_tools(
                &sink,
                reply(&request, raw),
                ToolBinding {
                    executor: &executor,
                    target: &mut ally,
                },
                noop,
                &mut rng,
            )
            .expect("result");

        assert_eq!(result.kind, ChatResultKind::Failed);
        assert_eq!(result.text, raw);
        assert_eq!(manager.session_state("s"), Some(SessionState::Idle));
        let messages = manager.session_messages("s").expect("session");
        assert_eq!(messages.last().map(|m| m.role), Some(Role::Tool));
        assert_eq!(messages.last().map(|m| m.content.as_str()), Some(r#"{"name":"Heal","result":"Failed"}"#));
    }

    #[test]
    fn failed_tool_with_pool_samples_failure_message() {
        let sink = RecordingSink::ready();
        let mut manager = SessionManager::new("sys");
        let executor = executor(PredefinedMessages {
            failed: vec!["I can't do that.".to_string()],
            ..PredefinedMessages::default()
        });
        let mut ally = Ally::default();
        let mut rng = StdRng::seed_from_u64(4);

        manager.request_query(&sink, "s", "dance", QueryRole::User, Some("[]"), noop());
        let request = sink.take_last();
        let call = "<tool_call>{\"name\":\"CreatePlayerHealthPointTrigger\",\"arguments\":{\"skill\":\"DANCE\",\"threshold\":0.5}}</tool_call>";
        let result = manager
            .handle_response_with_tools(
                &sink,
                reply(&request, call),
                ToolBinding {
                    executor: &executor,
                    target: &mut ally,
                },
                noop,
                &mut rng,
            )
            .expect("result");

        assert_eq!(result.kind, ChatResultKind::Failed);
        assert_eq!(result.text, "I can't do that.");
        assert_eq!(
            roles(&manager, "s"),
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
    }

    #[test]
    fn malformed_tool_json_fails_turn() {
        let sink = RecordingSink::ready();
        let mut manager = SessionManager::new("sys");
        let executor = executor(PredefinedMessages::default());
        let mut ally = Ally::default();
        let mut rng = StdRng::seed_from_u64(5);

        manager.request_query(&sink, "s", "x", QueryRole::User, Some("[]"), noop());
        let request = sink.take_last();
        let result = manager
            .handle_response_with_tools(
                &sink,
                reply(&request, "<tool_call>{not json</tool_call>"),
                ToolBinding {
                    executor: &executor,
                    target: &mut ally,
                },
                noop,
                &mut rng,
            )
            .expect("result");
        assert_eq!(result.kind, ChatResultKind::Failed);
        assert_eq!(manager.session_state("s"), Some(SessionState::Idle));
        assert!(ally.triggers.is_empty());
    }

    #[test]
    fn tool_tag_without_executor_is_raw_success() {
        let sink = RecordingSink::ready();
        let mut manager = SessionManager::new("sys");
        manager.request_query(&sink, "s", "x", QueryRole::User, None, noop());
        let request = sink.take_last();
        let result = manager.handle_response(reply(&request, SHIELD_CALL)).expect("result");
        assert_eq!(result.kind, ChatResultKind::Success);
        assert_eq!(result.text, SHIELD_CALL);
    }

    #[test]
    fn response_for_unknown_session_fails() {
        let mut manager = SessionManager::new("sys");
        let response = Response {
            request_id: RequestId::new_v4(),
            session_id: "ghost".to_string(),
            output: "boo".to_string(),
            image: None,
            elapsed: Duration::ZERO,
        };
        let result = manager.handle_response(response).expect("result");
        assert_eq!(result.kind, ChatResultKind::Failed);
        assert_eq!(result.text, "boo");
    }

    #[test]
    fn timeout_fails_stuck_session_and_discards_late_response() {
        let sink = RecordingSink::ready();
        let mut manager =
            SessionManager::new("sys").with_request_timeout(Some(Duration::from_secs(10)));
        manager.request_query(&sink, "s", "x", QueryRole::User, None, noop());
        let request = sink.take_last();

        assert!(manager.tick(Duration::from_secs(6)).is_empty());
        let timed_out = manager.tick(Duration::from_secs(6));
        assert_eq!(timed_out.len(), 1);
        assert_eq!(timed_out[0].kind, ChatResultKind::Failed);
        assert_eq!(manager.session_state("s"), Some(SessionState::Idle));

        assert!(manager.handle_response(reply(&request, "late")).is_none());
        assert_eq!(manager.session_messages("s").map(<[Message]>::len), Some(2));
    }

    #[test]
    fn no_timeout_means_tick_is_inert() {
        let sink = RecordingSink::ready();
        let mut manager = SessionManager::new("sys");
        manager.request_query(&sink, "s", "x", QueryRole::User, None, noop());
        assert!(manager.tick(Duration::from_secs(3600)).is_empty());
        assert_eq!(manager.session_state("s"), Some(SessionState::Running));
    }
}
