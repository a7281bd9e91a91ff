//! Conversation state machine: alternates LLM turns and tool batches until
//! the model answers or a budget runs out.

use std::time::Duration;

use {
    conduit_config::SessionConfig,
    conduit_mcp::{FailureKind, McpManager, StartReport, ToolDefinition},
    futures::future::join_all,
    serde_json::{Value, json},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    llm_client::{LlmClient, LlmTurn},
    model::{ChatMessage, ToolCall, ToolCallResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingLlm,
    AwaitingTools,
    Done,
    Failed,
}

/// Why a session ended in [`SessionState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    #[error("turn limit of {max_turns} exceeded")]
    TurnLimitExceeded { max_turns: usize },
    #[error("LLM unavailable: {message}")]
    LlmUnavailable { message: String },
    #[error("session timed out")]
    TimedOut,
    #[error("session cancelled")]
    Cancelled,
}

impl FailureReason {
    fn tool_failure_kind(&self) -> FailureKind {
        match self {
            Self::TimedOut => FailureKind::Timeout,
            _ => FailureKind::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Done { answer: String },
    Failed(FailureReason),
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub system_prompt: String,
    /// LLM calls allowed per utterance.
    pub max_turns: usize,
    pub tool_timeout: Duration,
    /// Wall-clock bound on one `send`, tool calls included.
    pub session_timeout: Option<Duration>,
}

impl SessionOptions {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            system_prompt: config.system_prompt.clone(),
            max_turns: config.max_turns.max(1),
            tool_timeout: Duration::from_secs(config.tool_timeout_secs),
            session_timeout: config.session_timeout_secs.map(Duration::from_secs),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

pub struct ChatSession {
    manager: McpManager,
    llm: LlmClient,
    options: SessionOptions,
    transcript: Vec<ChatMessage>,
    state: SessionState,
    failure: Option<FailureReason>,
    /// Tool catalog sent to the model; fixed for the session's lifetime.
    tool_schemas: Vec<Value>,
    cancel: CancellationToken,
}

impl ChatSession {
    pub fn new(manager: McpManager, llm: LlmClient, options: SessionOptions) -> Self {
        let transcript = vec![ChatMessage::system(options.system_prompt.clone())];
        Self {
            manager,
            llm,
            options,
            transcript,
            state: SessionState::Idle,
            failure: None,
            tool_schemas: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Connect every server and snapshot the tool catalog.
    ///
    /// Servers that fail to connect are reported and left out; the session
    /// still works with whatever tools remain, possibly none.
    pub async fn start(&mut self) -> StartReport {
        let report = self.manager.start_all().await;
        self.tool_schemas = self
            .manager
            .tool_definitions()
            .into_iter()
            .map(tool_schema)
            .collect();
        info!(tools = self.tool_schemas.len(), "chat session ready");
        report
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Set once the session has failed; later sends are refused.
    pub fn failure(&self) -> Option<&FailureReason> {
        self.failure.as_ref()
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn tool_schemas(&self) -> &[Value] {
        &self.tool_schemas
    }

    /// Token that aborts the in-flight `send` when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one user utterance to completion.
    ///
    /// May be called again after `Done`; once `Failed`, every call returns
    /// the original failure without touching the model.
    pub async fn send(&mut self, utterance: &str) -> SessionOutcome {
        if let Some(reason) = &self.failure {
            return SessionOutcome::Failed(reason.clone());
        }

        self.transcript.push(ChatMessage::user(utterance));
        let cancel = self.cancel.clone();
        let deadline = self.options.session_timeout;

        let result = {
            let turns = self.run_turns();
            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(FailureReason::Cancelled),
                () = wait_for(deadline) => Err(FailureReason::TimedOut),
                result = turns => result,
            }
        };

        match result {
            Ok(answer) => {
                self.state = SessionState::Done;
                SessionOutcome::Done { answer }
            },
            Err(reason) => {
                self.close_dangling_batch(&reason);
                warn!(reason = %reason, "chat session failed");
                self.state = SessionState::Failed;
                self.failure = Some(reason.clone());
                SessionOutcome::Failed(reason)
            },
        }
    }

    /// Disconnect every server. Safe to call in any state.
    pub async fn shutdown(&mut self) {
        self.manager.disconnect_all().await;
    }

    async fn run_turns(&mut self) -> Result<String, FailureReason> {
        let max_turns = self.options.max_turns;
        for turn in 1..=max_turns {
            self.state = SessionState::AwaitingLlm;
            let llm_turn = self
                .llm
                .converse(&self.transcript, &self.tool_schemas)
                .await
                .map_err(|e| FailureReason::LlmUnavailable {
                    message: e.to_string(),
                })?;

            match llm_turn {
                LlmTurn::Final { text } => {
                    debug!(turn, "LLM produced final answer");
                    self.transcript.push(ChatMessage::assistant(text.clone()));
                    return Ok(text);
                },
                LlmTurn::ToolCalls { text, calls } => {
                    info!(turn, tool_calls = calls.len(), "dispatching tool calls");
                    self.transcript
                        .push(ChatMessage::assistant_with_tools(text, calls.clone()));
                    self.state = SessionState::AwaitingTools;
                    let results = self.dispatch(&calls).await;
                    self.transcript.push(ChatMessage::tool_results(results));
                },
            }
        }

        warn!(max_turns, "turn limit reached without a final answer");
        Err(FailureReason::TurnLimitExceeded { max_turns })
    }

    /// Run a batch concurrently. Results come back in request order no
    /// matter which call finishes first.
    async fn dispatch(&self, calls: &[ToolCall]) -> Vec<ToolCallResult> {
        join_all(calls.iter().map(|call| self.run_tool(call))).await
    }

    async fn run_tool(&self, call: &ToolCall) -> ToolCallResult {
        debug!(tool = %call.name, id = %call.id, "calling tool");
        match self
            .manager
            .call_tool(&call.name, call.arguments.clone(), self.options.tool_timeout)
            .await
        {
            Ok(result) if result.is_error => ToolCallResult::tool_error(&call.id, result.render()),
            Ok(result) => ToolCallResult::success(&call.id, result.render()),
            Err(e) => {
                warn!(tool = %call.name, kind = %e.kind(), error = %e, "tool call failed");
                ToolCallResult::failure(&call.id, e.kind(), &e.to_string())
            },
        }
    }

    /// Give every call of an interrupted batch a failure result so the
    /// transcript never holds a tool call without its answer.
    fn close_dangling_batch(&mut self, reason: &FailureReason) {
        let Some(ChatMessage::Assistant { tool_calls, .. }) = self.transcript.last() else {
            return;
        };
        if tool_calls.is_empty() {
            return;
        }
        let kind = reason.tool_failure_kind();
        let message = reason.to_string();
        let results = tool_calls
            .iter()
            .map(|call| ToolCallResult::failure(&call.id, kind, &message))
            .collect();
        self.transcript.push(ChatMessage::tool_results(results));
    }
}

fn tool_schema(def: ToolDefinition) -> Value {
    json!({
        "name": def.name,
        "description": def.description.unwrap_or_default(),
        "parameters": def.input_schema,
    })
}

async fn wait_for(deadline: Option<Duration>) {
    match deadline {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    };

    use {
        async_trait::async_trait,
        conduit_mcp::{
            ManagerOptions, McpTransportError, ServerTransport, ToolsCallResult, TransportResult,
            types::ToolContent,
        },
    };

    use super::*;
    use crate::{
        error::{Error, Result},
        llm_client::RetryPolicy,
        model::{CompletionResponse, LlmProvider},
    };

    // ── Fake MCP server ─────────────────────────────────────────────────

    type ToolHandler = dyn Fn(&str) -> (Duration, TransportResult<ToolsCallResult>) + Send + Sync;

    struct FakeServer {
        name: String,
        tools: Vec<&'static str>,
        reachable: bool,
        handler: Box<ToolHandler>,
    }

    impl FakeServer {
        fn new(name: &str, tools: Vec<&'static str>) -> Self {
            let server = name.to_string();
            Self {
                name: name.into(),
                tools,
                reachable: true,
                handler: Box::new(move |tool: &str| {
                    (Duration::ZERO, Ok(text(&format!("{server}:{tool}"))))
                }),
            }
        }

        fn unreachable(mut self) -> Self {
            self.reachable = false;
            self
        }

        fn on_call(
            mut self,
            f: impl Fn(&str) -> (Duration, TransportResult<ToolsCallResult>) + Send + Sync + 'static,
        ) -> Self {
            self.handler = Box::new(f);
            self
        }
    }

    #[async_trait]
    impl ServerTransport for FakeServer {
        fn server_name(&self) -> &str {
            &self.name
        }

        async fn connect(&self) -> TransportResult<()> {
            if self.reachable {
                Ok(())
            } else {
                Err(McpTransportError::Connection("refused".into()))
            }
        }

        async fn list_tools(&self) -> TransportResult<Vec<ToolDefinition>> {
            Ok(self
                .tools
                .iter()
                .map(|t| ToolDefinition {
                    name: (*t).into(),
                    server: self.name.clone(),
                    description: Some(format!("{t} tool")),
                    input_schema: json!({"type": "object"}),
                })
                .collect())
        }

        async fn call_tool(
            &self,
            name: &str,
            _arguments: Value,
            _timeout: Duration,
        ) -> TransportResult<ToolsCallResult> {
            let (delay, result) = (self.handler)(name);
            tokio::time::sleep(delay).await;
            result
        }

        async fn disconnect(&self) {}
    }

    fn text(s: &str) -> ToolsCallResult {
        ToolsCallResult {
            content: vec![ToolContent::Text { text: s.into() }],
            is_error: false,
            structured_content: None,
        }
    }

    // ── Fake LLM ────────────────────────────────────────────────────────

    type Responder = dyn Fn(&[ChatMessage]) -> Result<CompletionResponse> + Send + Sync;

    struct FakeLlm {
        respond: Box<Responder>,
        calls: AtomicU32,
    }

    impl FakeLlm {
        fn new(
            f: impl Fn(&[ChatMessage]) -> Result<CompletionResponse> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                respond: Box::new(f),
                calls: AtomicU32::new(0),
            })
        }

        /// Plays `script` in order, then answers "done" forever.
        fn scripted(script: Vec<CompletionResponse>) -> Arc<Self> {
            let script = Mutex::new(script.into_iter());
            Self::new(move |_| {
                Ok(script.lock().unwrap().next().unwrap_or_else(|| answer("done")))
            })
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for FakeLlm {
        fn name(&self) -> &str {
            "fake"
        }

        fn id(&self) -> &str {
            "fake-model"
        }

        async fn complete(
            &self,
            messages: &[ChatMessage],
            _tools: &[Value],
        ) -> Result<CompletionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.respond)(messages)
        }
    }

    fn answer(s: &str) -> CompletionResponse {
        CompletionResponse {
            text: Some(s.into()),
            ..Default::default()
        }
    }

    fn tool_calls(calls: &[(&str, &str)]) -> CompletionResponse {
        CompletionResponse {
            tool_calls: calls
                .iter()
                .map(|(id, name)| ToolCall {
                    id: (*id).into(),
                    name: (*name).into(),
                    arguments: json!({}),
                })
                .collect(),
            ..Default::default()
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    fn fast_manager(servers: Vec<FakeServer>) -> McpManager {
        let servers = servers
            .into_iter()
            .map(|s| Arc::new(s) as Arc<dyn ServerTransport>)
            .collect();
        McpManager::new(servers, ManagerOptions {
            connect_attempts: 1,
            connect_retry_delay: Duration::from_millis(1),
            tool_attempts: 1,
            tool_retry_delay: Duration::from_millis(1),
            protocol_error_threshold: 3,
        })
    }

    fn options() -> SessionOptions {
        SessionOptions {
            system_prompt: "test".into(),
            max_turns: 5,
            tool_timeout: Duration::from_secs(5),
            session_timeout: None,
        }
    }

    async fn session(
        servers: Vec<FakeServer>,
        llm: Arc<FakeLlm>,
        options: SessionOptions,
    ) -> ChatSession {
        let client = LlmClient::new(llm).with_retry_policy(RetryPolicy {
            rate_limit_initial_delay: Duration::from_millis(1),
            rate_limit_max_delay: Duration::from_millis(2),
            server_retry_delay: Duration::from_millis(1),
            max_attempts: 2,
        });
        let mut session = ChatSession::new(fast_manager(servers), client, options);
        session.start().await;
        session
    }

    fn last_results(session: &ChatSession) -> Vec<ToolCallResult> {
        session
            .transcript()
            .iter()
            .rev()
            .find_map(|m| match m {
                ChatMessage::ToolResults { results } => Some(results.clone()),
                _ => None,
            })
            .expect("no tool results in transcript")
    }

    // ── Tests ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn tool_results_keep_request_order() {
        let slow = FakeServer::new("slow", vec!["lookup"]).on_call(|_| {
            (Duration::from_millis(100), Ok(text("slow answer")))
        });
        let fast = FakeServer::new("fast", vec!["quick"]);
        let llm = FakeLlm::scripted(vec![tool_calls(&[("c1", "lookup"), ("c2", "quick")])]);
        let mut session = session(vec![slow, fast], llm, options()).await;

        let outcome = session.send("go").await;
        assert_eq!(outcome, SessionOutcome::Done {
            answer: "done".into()
        });
        let results = last_results(&session);
        let ids: Vec<_> = results.iter().map(|r| r.tool_call_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert_eq!(results[0].content, "slow answer");
        assert_eq!(results[1].content, "fast:quick");
        assert_eq!(session.state(), SessionState::Done);
    }

    #[tokio::test]
    async fn unreachable_server_leaves_others_usable() {
        let down = FakeServer::new("down", vec!["broken"]).unreachable();
        let up = FakeServer::new("up", vec!["works"]);
        let llm = FakeLlm::scripted(vec![tool_calls(&[("c1", "works")])]);

        let client = LlmClient::new(llm);
        let mut session = ChatSession::new(fast_manager(vec![down, up]), client, options());
        let report = session.start().await;
        assert_eq!(report.connected, vec!["up"]);
        assert_eq!(report.failed.len(), 1);

        let names: Vec<_> = session
            .tool_schemas()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["works"]);

        let outcome = session.send("go").await;
        assert!(matches!(outcome, SessionOutcome::Done { .. }));
        assert_eq!(last_results(&session)[0].content, "up:works");
    }

    #[tokio::test]
    async fn session_without_servers_still_converses() {
        let llm = FakeLlm::scripted(vec![answer("hello")]);
        let mut session = session(vec![], llm, options()).await;
        assert!(session.tool_schemas().is_empty());
        assert_eq!(session.send("hi").await, SessionOutcome::Done {
            answer: "hello".into()
        });
    }

    #[tokio::test]
    async fn endless_tool_calls_hit_turn_limit() {
        let server = FakeServer::new("srv", vec!["again"]);
        let llm = FakeLlm::new(|_| Ok(tool_calls(&[("c", "again")])));
        let mut session = session(vec![server], llm.clone(), SessionOptions {
            max_turns: 3,
            ..options()
        })
        .await;

        let outcome = session.send("loop").await;
        assert_eq!(
            outcome,
            SessionOutcome::Failed(FailureReason::TurnLimitExceeded { max_turns: 3 })
        );
        assert_eq!(llm.call_count(), 3);
        assert_eq!(session.state(), SessionState::Failed);
        // Every request still got its answer.
        assert!(matches!(
            session.transcript().last(),
            Some(ChatMessage::ToolResults { .. })
        ));
    }

    #[tokio::test]
    async fn auth_failure_is_reported_to_model() {
        let server = FakeServer::new("secure", vec!["fetch"]).on_call(|_| {
            (
                Duration::ZERO,
                Err(McpTransportError::Auth("token refresh failed".into())),
            )
        });
        let llm = FakeLlm::scripted(vec![tool_calls(&[("c1", "fetch")]), answer("sorry")]);
        let mut session = session(vec![server], llm, options()).await;

        let outcome = session.send("fetch it").await;
        assert_eq!(outcome, SessionOutcome::Done {
            answer: "sorry".into()
        });
        let result = &last_results(&session)[0];
        assert!(result.is_error);
        assert_eq!(result.failure, Some(FailureKind::Auth));
        assert!(result.content.starts_with("[auth_error]"));
    }

    #[tokio::test]
    async fn unknown_tool_becomes_failure_result() {
        let llm = FakeLlm::scripted(vec![tool_calls(&[("c1", "nonexistent")])]);
        let mut session = session(vec![FakeServer::new("srv", vec!["real"])], llm, options()).await;

        assert!(matches!(session.send("go").await, SessionOutcome::Done { .. }));
        let result = &last_results(&session)[0];
        assert_eq!(result.failure, Some(FailureKind::UnknownTool));
        assert!(result.content.starts_with("[unknown_tool]"));
    }

    #[tokio::test]
    async fn tool_level_error_keeps_content() {
        let server = FakeServer::new("weather", vec!["forecast"]).on_call(|_| {
            let mut result = text("city not found");
            result.is_error = true;
            (Duration::ZERO, Ok(result))
        });
        let llm = FakeLlm::scripted(vec![tool_calls(&[("c1", "forecast")])]);
        let mut session = session(vec![server], llm, options()).await;

        session.send("weather?").await;
        let result = &last_results(&session)[0];
        assert!(result.is_error);
        assert_eq!(result.content, "city not found");
        assert!(result.failure.is_none());
    }

    #[tokio::test]
    async fn colliding_tools_route_by_qualified_name() {
        let alpha = FakeServer::new("alpha", vec!["search"]);
        let beta = FakeServer::new("beta", vec!["search"]);
        let llm = FakeLlm::scripted(vec![tool_calls(&[("c1", "beta__search")])]);
        let mut session = session(vec![alpha, beta], llm, options()).await;

        let names: Vec<_> = session
            .tool_schemas()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["alpha__search", "beta__search"]);

        session.send("search").await;
        assert_eq!(last_results(&session)[0].content, "beta:search");
    }

    #[tokio::test]
    async fn llm_outage_fails_session_permanently() {
        let llm = FakeLlm::new(|_| {
            Err(Error::Transient {
                message: "503".into(),
            })
        });
        let mut session = session(vec![], llm.clone(), options()).await;

        let outcome = session.send("hi").await;
        assert!(matches!(
            outcome,
            SessionOutcome::Failed(FailureReason::LlmUnavailable { .. })
        ));
        assert_eq!(llm.call_count(), 2);

        let again = session.send("hello?").await;
        assert_eq!(again, outcome);
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn cancellation_closes_inflight_batch() {
        let server = FakeServer::new("slow", vec!["wait"])
            .on_call(|_| (Duration::from_secs(30), Ok(text("late"))));
        let llm = FakeLlm::scripted(vec![tool_calls(&[("c1", "wait"), ("c2", "wait")])]);
        let mut session = session(vec![server], llm, options()).await;

        let token = session.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let outcome = session.send("go").await;
        assert_eq!(outcome, SessionOutcome::Failed(FailureReason::Cancelled));
        let results = last_results(&session);
        assert_eq!(results.len(), 2);
        assert!(
            results
                .iter()
                .all(|r| r.failure == Some(FailureKind::Cancelled))
        );
    }

    #[tokio::test]
    async fn session_timeout_fails_with_timed_out() {
        let server = FakeServer::new("slow", vec!["wait"])
            .on_call(|_| (Duration::from_secs(30), Ok(text("late"))));
        let llm = FakeLlm::scripted(vec![tool_calls(&[("c1", "wait")])]);
        let mut session = session(vec![server], llm, SessionOptions {
            session_timeout: Some(Duration::from_millis(50)),
            ..options()
        })
        .await;

        let outcome = session.send("go").await;
        assert_eq!(outcome, SessionOutcome::Failed(FailureReason::TimedOut));
        assert_eq!(last_results(&session)[0].failure, Some(FailureKind::Timeout));
    }

    #[tokio::test]
    async fn conversation_continues_after_done() {
        let seen = Arc::new(AtomicU32::new(0));
        let seen_in_llm = Arc::clone(&seen);
        let llm = FakeLlm::new(move |messages| {
            seen_in_llm.store(messages.len() as u32, Ordering::SeqCst);
            Ok(answer("ok"))
        });
        let mut session = session(vec![], llm, options()).await;

        assert!(matches!(session.send("one").await, SessionOutcome::Done { .. }));
        assert!(matches!(session.send("two").await, SessionOutcome::Done { .. }));
        // system, user, assistant, user
        assert_eq!(seen.load(Ordering::SeqCst), 4);
        assert_eq!(session.transcript().len(), 5);
    }
}
