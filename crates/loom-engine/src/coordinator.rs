use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use loom_core::errors::ProviderError;
use loom_core::events::SessionEvent;
use loom_core::ids::{ProjectId, SessionId};
use loom_core::messages::{Message, ToolRecord};
use loom_core::permissions::{Confirmer, PermissionDecision};
use loom_core::provider::{CompletionProvider, CompletionRequest};
use loom_core::state::{ExecutionState, ExecutionStatus};
use loom_core::tools::{ToolContext, ToolInvocation, ToolOutcome};
use loom_core::transcript::TranscriptStore;

use crate::bus::{EventBus, Subscription};
use crate::error::CoordinatorError;
use crate::fallback::FallbackResponder;
use crate::parser;
use crate::permissions::PermissionGate;
use crate::registry::ToolRegistry;
use crate::truncate;

/// Collaborators injected into a coordinator.
pub struct CoordinatorDeps {
    pub provider: Arc<dyn CompletionProvider>,
    pub registry: Arc<ToolRegistry>,
    pub permissions: Arc<PermissionGate>,
    pub transcript: Arc<dyn TranscriptStore>,
    pub events: Arc<EventBus>,
    pub project_root: PathBuf,
    /// Consulted for `ask` decisions on dangerous or confirmation-flagged tools.
    /// Without one, `ask` permits execution.
    pub confirmer: Option<Arc<dyn Confirmer>>,
}

#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    pub system_prompt: Option<String>,
    /// Max characters of each tool result shown in the final text.
    pub preview_chars: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            preview_chars: 200,
        }
    }
}

/// What one accepted message produced.
#[derive(Clone, Debug)]
pub struct TurnReport {
    pub status: ExecutionStatus,
    pub content: String,
    pub outcomes: Vec<ToolRecord>,
    /// The content came from the local fallback responder.
    pub fallback: bool,
    pub tokens_used: u64,
}

/// Per-session turn state machine: idle → thinking → executing → completed | failed.
/// At most one turn runs at a time; a message arriving mid-turn is rejected.
pub struct ExecutionCoordinator {
    session_id: SessionId,
    project_id: ProjectId,
    deps: CoordinatorDeps,
    config: CoordinatorConfig,
    fallback: FallbackResponder,
    busy: AtomicBool,
    state: Mutex<ExecutionState>,
    active: Mutex<Option<CancellationToken>>,
}

/// Releases the single-flight flag on every exit path, including unwinding
/// and the turn future being dropped.
struct TurnGuard<'a> {
    coordinator: &'a ExecutionCoordinator,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        let c = self.coordinator;
        {
            let mut state = c.state.lock();
            if state.is_busy() {
                state.finish(ExecutionStatus::Failed);
            }
        }
        *c.active.lock() = None;
        c.busy.store(false, Ordering::Release);
    }
}

impl ExecutionCoordinator {
    pub fn new(
        session_id: SessionId,
        project_id: ProjectId,
        deps: CoordinatorDeps,
        config: CoordinatorConfig,
    ) -> Self {
        let fallback = FallbackResponder::new(deps.registry.names());
        Self {
            session_id,
            project_id,
            deps,
            config,
            fallback,
            busy: AtomicBool::new(false),
            state: Mutex::new(ExecutionState::default()),
            active: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn state(&self) -> ExecutionState {
        self.state.lock().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Events for this session only.
    pub fn subscribe(&self) -> Subscription {
        self.deps.events.subscribe_session(self.session_id.clone())
    }

    /// Cancel the turn in flight. Returns false when idle.
    pub fn abort(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(token) => {
                info!(session_id = %self.session_id, "abort requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn try_begin(&self) -> Option<TurnGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TurnGuard { coordinator: self })
    }

    fn emit(&self, event: SessionEvent) {
        self.deps.events.publish(event);
    }

    fn set_status(&self, status: ExecutionStatus, current_tool: Option<String>) {
        {
            let mut state = self.state.lock();
            if status.is_terminal() {
                state.finish(status);
            } else {
                state.status = status;
                state.current_tool = current_tool.clone();
            }
        }
        self.emit(SessionEvent::Status {
            session_id: self.session_id.clone(),
            status,
            current_tool,
        });
    }

    fn emit_error(&self, kind: &str, message: impl Into<String>) {
        self.emit(SessionEvent::Error {
            session_id: self.session_id.clone(),
            kind: kind.to_string(),
            message: message.into(),
        });
    }

    /// Run one turn for `text`. Tool and provider failures resolve into the
    /// report; only reentrancy, abort, and transcript failures return `Err`.
    #[instrument(skip(self, text), fields(session_id = %self.session_id))]
    pub async fn handle_message(&self, text: &str) -> Result<TurnReport, CoordinatorError> {
        let Some(_guard) = self.try_begin() else {
            warn!("turn already in flight, message rejected");
            return Err(CoordinatorError::Busy(self.session_id.clone()));
        };

        let cancel = CancellationToken::new();
        *self.active.lock() = Some(cancel.clone());
        self.state.lock().begin_turn();
        self.set_status(ExecutionStatus::Thinking, None);
        info!("turn started");

        match self.run_turn(text, &cancel).await {
            Ok(report) => {
                info!(status = report.status.as_str(), tools = report.outcomes.len(), fallback = report.fallback, "turn finished");
                Ok(report)
            }
            Err(err) => {
                match &err {
                    CoordinatorError::Aborted => warn!("turn aborted"),
                    other => error!(error = %other, "turn failed"),
                }
                self.emit_error(err.error_kind(), format!("turn failed: {}", err.error_kind()));
                self.set_status(ExecutionStatus::Failed, None);
                Err(err)
            }
        }
    }

    async fn run_turn(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnReport, CoordinatorError> {
        let mut messages = self.deps.transcript.history(&self.session_id).await?;
        messages.push(Message::user(text));
        let request = CompletionRequest {
            system_prompt: self.config.system_prompt.clone(),
            messages,
            tools: self.deps.registry.definitions(),
        };

        let completion = tokio::select! {
            result = self.deps.provider.complete(&request) => result,
            _ = cancel.cancelled() => {
                self.append_turn(text, Message::assistant("[turn aborted]")).await?;
                return Err(CoordinatorError::Aborted);
            }
        };

        let completion = match completion {
            Ok(c) => c,
            Err(err) => return self.fall_back(text, &err).await,
        };

        let tokens_used = completion.tokens_used;
        self.state.lock().tokens_used += tokens_used;

        let invocations = parser::parse_invocations(&completion.text);
        let prose = parser::strip_invocations(&completion.text);
        debug!(invocations = invocations.len(), tokens_used, "completion received");

        let mut records = Vec::with_capacity(invocations.len());
        let mut aborted = false;
        if !invocations.is_empty() {
            self.set_status(ExecutionStatus::Executing, None);
            for invocation in invocations {
                if cancel.is_cancelled() {
                    aborted = true;
                    break;
                }
                let record = self.run_invocation(invocation, cancel).await;
                records.push(record);
            }
            aborted |= cancel.is_cancelled();
        }

        let content = synthesize(&prose, &records, self.config.preview_chars);
        if aborted {
            let message = Message::assistant(format!("{content}\n\n[turn aborted]").trim().to_string())
                .with_tool_calls(records);
            self.append_turn(text, message).await?;
            return Err(CoordinatorError::Aborted);
        }

        self.emit(SessionEvent::Content {
            session_id: self.session_id.clone(),
            text: content.clone(),
        });
        let message = Message::assistant(content.clone()).with_tool_calls(records.clone());
        self.append_turn(text, message).await?;
        self.set_status(ExecutionStatus::Completed, None);

        Ok(TurnReport {
            status: ExecutionStatus::Completed,
            content,
            outcomes: records,
            fallback: false,
            tokens_used,
        })
    }

    async fn fall_back(
        &self,
        text: &str,
        err: &ProviderError,
    ) -> Result<TurnReport, CoordinatorError> {
        let kind = err.error_kind();
        warn!(provider = self.deps.provider.name(), error_kind = kind, retryable = err.is_retryable(), "completion provider failed, using fallback");

        let content = self.fallback.respond(text);
        self.emit_error(kind, "completion provider unavailable; replied with local fallback");
        self.emit(SessionEvent::Content {
            session_id: self.session_id.clone(),
            text: content.clone(),
        });
        self.append_turn(text, Message::assistant(content.clone())).await?;
        self.set_status(ExecutionStatus::Failed, None);

        Ok(TurnReport {
            status: ExecutionStatus::Failed,
            content,
            outcomes: Vec::new(),
            fallback: true,
            tokens_used: 0,
        })
    }

    async fn append_turn(&self, text: &str, assistant: Message) -> Result<(), CoordinatorError> {
        self.deps
            .transcript
            .append(&self.session_id, Message::user(text))
            .await?;
        self.deps.transcript.append(&self.session_id, assistant).await?;
        Ok(())
    }

    async fn run_invocation(&self, invocation: ToolInvocation, cancel: &CancellationToken) -> ToolRecord {
        self.set_status(ExecutionStatus::Executing, Some(invocation.name.clone()));
        self.emit(SessionEvent::ToolCall {
            session_id: self.session_id.clone(),
            invocation_id: invocation.id.clone(),
            tool_name: invocation.name.clone(),
            input: invocation.input.clone(),
        });

        let start = Instant::now();
        let outcome = self.dispatch(&invocation, cancel).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        self.emit(SessionEvent::ToolResult {
            session_id: self.session_id.clone(),
            invocation_id: invocation.id.clone(),
            tool_name: invocation.name.clone(),
            result: outcome.result.clone(),
            error: outcome.error.clone(),
            duration_ms,
        });
        ToolRecord::merge(invocation, outcome)
    }

    async fn dispatch(&self, invocation: &ToolInvocation, cancel: &CancellationToken) -> ToolOutcome {
        let id = invocation.id.clone();
        let name = invocation.name.as_str();

        let decision = self.deps.permissions.decision(name);
        if decision == PermissionDecision::Deny {
            info!(tool = name, "tool call denied by permission rule");
            return ToolOutcome::failure(id, format!("permission denied: {name} is denied"));
        }

        let Some(tool) = self.deps.registry.get(name) else {
            warn!(tool = name, "unknown tool requested");
            return ToolOutcome::failure(id, format!("unknown tool: {name}"));
        };

        if decision == PermissionDecision::Ask {
            if let Some(confirmer) = &self.deps.confirmer {
                let definition = tool.to_definition();
                if definition.dangerous || definition.requires_confirmation {
                    let confirmed = tokio::select! {
                        ok = confirmer.confirm(invocation, &definition) => ok,
                        _ = cancel.cancelled() => false,
                    };
                    if !confirmed {
                        info!(tool = name, "tool call not confirmed");
                        return ToolOutcome::failure(id, format!("permission denied: {name} was not confirmed"));
                    }
                }
            }
        }

        let ctx = ToolContext {
            project_id: self.project_id.clone(),
            session_id: self.session_id.clone(),
            project_root: self.deps.project_root.clone(),
            cancel: cancel.clone(),
            permissions: self.deps.permissions.snapshot(),
        };

        let result = std::panic::AssertUnwindSafe(tool.execute(invocation.input.clone(), &ctx))
            .catch_unwind()
            .await;
        match result {
            Ok(Ok(value)) => ToolOutcome::success(id, value),
            Ok(Err(e)) => {
                debug!(tool = name, error = %e, "tool returned error");
                ToolOutcome::failure(id, e.to_string())
            }
            Err(panic) => {
                let msg = panic_message(&panic);
                error!(tool = name, panic = %msg, "tool panicked during execution");
                ToolOutcome::failure(id, "internal error: tool crashed")
            }
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

/// Prose followed by one line per tool record.
fn synthesize(prose: &str, records: &[ToolRecord], preview_chars: usize) -> String {
    let mut out = prose.trim().to_string();
    if records.is_empty() {
        return out;
    }
    if !out.is_empty() {
        out.push_str("\n\n");
    }
    let lines: Vec<String> = records
        .iter()
        .map(|r| match (&r.output, &r.error) {
            (_, Some(err)) => format!("{} → error: {}", r.name, truncate::preview(err, preview_chars)),
            (Some(serde_json::Value::String(s)), None) => {
                format!("{} → {}", r.name, truncate::preview(s, preview_chars))
            }
            (Some(value), None) => {
                format!("{} → {}", r.name, truncate::preview(&value.to_string(), preview_chars))
            }
            (None, None) => format!("{} → (no output)", r.name),
        })
        .collect();
    out.push_str(&lines.join("\n"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use loom_core::messages::Role;
    use loom_core::permissions::PermissionBehavior;
    use loom_core::tools::{Tool, ToolCategory, ToolDefinition, ToolError, ToolInput};
    use loom_core::transcript::{InMemoryTranscript, TranscriptError};

    use crate::registry::ToolSource;
    use crate::scripted::{ScriptedProvider, ScriptedResponse};

    struct CountingTool {
        name: &'static str,
        calls: AtomicUsize,
        dangerous: bool,
    }

    impl CountingTool {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self { name, calls: AtomicUsize::new(0), dangerous: false })
        }

        fn dangerous(name: &'static str) -> Arc<Self> {
            Arc::new(Self { name, calls: AtomicUsize::new(0), dangerous: true })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "counts calls and echoes its input"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn category(&self) -> ToolCategory {
            ToolCategory::Custom("test".into())
        }
        fn dangerous(&self) -> bool {
            self.dangerous
        }
        async fn execute(&self, input: ToolInput, _ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if input.get("fail").is_some() {
                return Err(ToolError::ExecutionFailed("asked to fail".into()));
            }
            Ok(serde_json::json!({"call": n, "input": input}))
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &str {
            "explode"
        }
        fn description(&self) -> &str {
            "panics"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn category(&self) -> ToolCategory {
            ToolCategory::Custom("test".into())
        }
        async fn execute(&self, _input: ToolInput, _ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
            panic!("boom");
        }
    }

    struct Refuse;

    #[async_trait]
    impl Confirmer for Refuse {
        async fn confirm(&self, _invocation: &ToolInvocation, _definition: &ToolDefinition) -> bool {
            false
        }
    }

    struct Harness {
        coordinator: Arc<ExecutionCoordinator>,
        provider: Arc<ScriptedProvider>,
        transcript: Arc<InMemoryTranscript>,
        permissions: Arc<PermissionGate>,
        tool: Arc<CountingTool>,
    }

    fn harness_with(
        responses: Vec<ScriptedResponse>,
        tool: Arc<CountingTool>,
        confirmer: Option<Arc<dyn Confirmer>>,
    ) -> Harness {
        let provider = Arc::new(ScriptedProvider::new(responses));
        let transcript = Arc::new(InMemoryTranscript::new());
        let permissions = Arc::new(PermissionGate::new());
        let mut registry = ToolRegistry::new();
        registry.register(Arc::clone(&tool) as Arc<dyn Tool>, ToolSource::BuiltIn);
        registry.register(Arc::new(PanickingTool), ToolSource::BuiltIn);

        let deps = CoordinatorDeps {
            provider: Arc::clone(&provider) as Arc<dyn CompletionProvider>,
            registry: Arc::new(registry),
            permissions: Arc::clone(&permissions),
            transcript: Arc::clone(&transcript) as Arc<dyn TranscriptStore>,
            events: Arc::new(EventBus::new()),
            project_root: std::env::temp_dir(),
            confirmer,
        };
        let coordinator = Arc::new(ExecutionCoordinator::new(
            SessionId::new(),
            ProjectId::new(),
            deps,
            CoordinatorConfig::default(),
        ));
        Harness { coordinator, provider, transcript, permissions, tool }
    }

    /// Store whose reads or writes always fail.
    struct BrokenTranscript {
        history_fails: bool,
    }

    #[async_trait]
    impl TranscriptStore for BrokenTranscript {
        async fn append(&self, _session_id: &SessionId, _message: Message) -> Result<(), TranscriptError> {
            Err(TranscriptError::Write("disk full".into()))
        }

        async fn history(&self, _session_id: &SessionId) -> Result<Vec<Message>, TranscriptError> {
            if self.history_fails {
                Err(TranscriptError::Unavailable("store offline".into()))
            } else {
                Ok(Vec::new())
            }
        }
    }

    fn broken_coordinator(
        responses: Vec<ScriptedResponse>,
        history_fails: bool,
    ) -> (Arc<ExecutionCoordinator>, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new(responses));
        let mut registry = ToolRegistry::new();
        registry.register(CountingTool::new("echo") as Arc<dyn Tool>, ToolSource::BuiltIn);
        let deps = CoordinatorDeps {
            provider: Arc::clone(&provider) as Arc<dyn CompletionProvider>,
            registry: Arc::new(registry),
            permissions: Arc::new(PermissionGate::new()),
            transcript: Arc::new(BrokenTranscript { history_fails }),
            events: Arc::new(EventBus::new()),
            project_root: std::env::temp_dir(),
            confirmer: None,
        };
        let coordinator = Arc::new(ExecutionCoordinator::new(
            SessionId::new(),
            ProjectId::new(),
            deps,
            CoordinatorConfig::default(),
        ));
        (coordinator, provider)
    }

    fn harness(responses: Vec<ScriptedResponse>) -> Harness {
        harness_with(responses, CountingTool::new("echo"), None)
    }

    fn invoke(name: &str, params: &[(&str, &str)]) -> String {
        let mut s = format!("<invoke name=\"{name}\">");
        for (k, v) in params {
            s.push_str(&format!("<parameter name=\"{k}\">{v}</parameter>"));
        }
        s.push_str("</invoke>");
        s
    }

    fn types(events: &[SessionEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.event_type()).collect()
    }

    #[tokio::test]
    async fn text_only_turn_completes() {
        let h = harness(vec![ScriptedResponse::with_tokens("Hello there.", 12)]);
        let mut events = h.coordinator.subscribe();

        let report = h.coordinator.handle_message("hi").await.unwrap();
        assert_eq!(report.status, ExecutionStatus::Completed);
        assert_eq!(report.content, "Hello there.");
        assert!(!report.fallback);
        assert_eq!(report.tokens_used, 12);

        let events = events.drain();
        assert_eq!(types(&events), ["status", "content", "status"]);

        let history = h.transcript.history(h.coordinator.session_id()).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);

        let state = h.coordinator.state();
        assert_eq!(state.status, ExecutionStatus::Completed);
        assert_eq!(state.tokens_used, 12);
        assert!(!h.coordinator.is_busy());
    }

    #[tokio::test]
    async fn tools_run_in_parse_order_and_events_follow() {
        let text = format!(
            "Working on it.\n{}\n{}",
            invoke("echo", &[("n", "1")]),
            invoke("echo", &[("n", "2")])
        );
        let h = harness(vec![ScriptedResponse::text(text)]);
        let mut events = h.coordinator.subscribe();

        let report = h.coordinator.handle_message("do two things").await.unwrap();
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.outcomes[0].output.as_ref().unwrap()["call"], 1);
        assert_eq!(report.outcomes[0].input["n"], 1);
        assert_eq!(report.outcomes[1].output.as_ref().unwrap()["call"], 2);
        assert!(report.content.starts_with("Working on it.\n\necho → "));

        let events = events.drain();
        assert_eq!(
            types(&events),
            [
                "status", "status", "status", "tool_call", "tool_result", "status", "tool_call",
                "tool_result", "content", "status"
            ]
        );

        let history = h.transcript.history(h.coordinator.session_id()).await.unwrap();
        assert_eq!(history[1].tool_calls.len(), 2);
        assert_eq!(history[1].tool_calls[0].id, report.outcomes[0].id);
    }

    #[tokio::test]
    async fn denied_tool_is_never_invoked() {
        let h = harness(vec![ScriptedResponse::text(invoke("echo", &[("x", "1")]))]);
        h.permissions.set("echo", PermissionBehavior::Deny);

        let report = h.coordinator.handle_message("go").await.unwrap();
        assert_eq!(h.tool.calls(), 0);
        let error = report.outcomes[0].error.as_deref().unwrap();
        assert!(error.contains("denied"));
        assert_eq!(report.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_tool_and_failures_do_not_stop_the_turn() {
        let text = format!(
            "{}{}{}{}",
            invoke("missing", &[]),
            invoke("echo", &[("fail", "true")]),
            invoke("explode", &[]),
            invoke("echo", &[("n", "4")])
        );
        let h = harness(vec![ScriptedResponse::text(text)]);

        let report = h.coordinator.handle_message("go").await.unwrap();
        let errors: Vec<_> = report.outcomes.iter().map(|o| o.error.clone()).collect();
        assert_eq!(errors[0].as_deref(), Some("unknown tool: missing"));
        assert!(errors[1].as_deref().unwrap().contains("asked to fail"));
        assert_eq!(errors[2].as_deref(), Some("internal error: tool crashed"));
        assert!(errors[3].is_none());
        assert_eq!(h.tool.calls(), 2);
        assert!(!h.coordinator.is_busy());
    }

    #[tokio::test]
    async fn provider_failure_uses_fallback() {
        let h = harness(vec![ScriptedResponse::Error(ProviderError::ServerError {
            status: 500,
            body: "secret internal detail".into(),
        })]);
        let mut events = h.coordinator.subscribe();

        let report = h.coordinator.handle_message("hello").await.unwrap();
        let expected = FallbackResponder::new(vec!["echo".into(), "explode".into()]).respond("hello");
        assert!(report.fallback);
        assert_eq!(report.status, ExecutionStatus::Failed);
        assert_eq!(report.content, expected);

        let history = h.transcript.history(h.coordinator.session_id()).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].content, expected);

        let events = events.drain();
        assert_eq!(types(&events), ["status", "error", "content", "status"]);
        let raw = serde_json::to_string(&events).unwrap();
        assert!(!raw.contains("secret internal detail"));
        assert!(!h.coordinator.is_busy());
    }

    #[tokio::test]
    async fn second_message_is_rejected_while_busy() {
        let h = harness(vec![
            ScriptedResponse::delayed(Duration::from_millis(300), ScriptedResponse::text("slow")),
            ScriptedResponse::text("next"),
        ]);

        let first = {
            let c = Arc::clone(&h.coordinator);
            tokio::spawn(async move { c.handle_message("one").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.coordinator.is_busy());
        assert!(h.coordinator.state().is_busy());

        let err = h.coordinator.handle_message("two").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Busy(_)));

        first.await.unwrap().unwrap();
        assert_eq!(h.provider.call_count(), 1);
        assert_eq!(h.transcript.len(h.coordinator.session_id()), 2);

        let report = h.coordinator.handle_message("three").await.unwrap();
        assert_eq!(report.content, "next");
    }

    #[tokio::test]
    async fn history_and_tools_reach_the_provider() {
        let h = harness(vec![ScriptedResponse::text("a"), ScriptedResponse::text("b")]);
        h.coordinator.handle_message("first").await.unwrap();
        h.coordinator.handle_message("second").await.unwrap();

        let requests = h.provider.requests();
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(requests[1].messages.len(), 3);
        assert_eq!(requests[1].messages[2].content, "second");
        let tool_names: Vec<_> = requests[1].tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(tool_names, ["echo", "explode"]);
    }

    #[tokio::test]
    async fn abort_during_provider_call() {
        let h = harness(vec![ScriptedResponse::delayed(
            Duration::from_secs(10),
            ScriptedResponse::text("never"),
        )]);
        let mut events = h.coordinator.subscribe();

        let turn = {
            let c = Arc::clone(&h.coordinator);
            tokio::spawn(async move { c.handle_message("wait").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.coordinator.abort());

        let err = turn.await.unwrap().unwrap_err();
        assert!(matches!(err, CoordinatorError::Aborted));
        assert!(!h.coordinator.abort());
        assert_eq!(h.coordinator.state().status, ExecutionStatus::Failed);
        assert_eq!(h.transcript.len(h.coordinator.session_id()), 2);
        assert!(types(&events.drain()).contains(&"error"));
    }

    #[tokio::test]
    async fn unreadable_history_fails_the_turn() {
        let (coordinator, provider) = broken_coordinator(vec![ScriptedResponse::text("unused")], true);
        let mut events = coordinator.subscribe();

        let err = coordinator.handle_message("hello").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Transcript(TranscriptError::Unavailable(_))));
        assert_eq!(provider.remaining(), 1);

        let events = events.drain();
        assert_eq!(types(&events), ["status", "error", "status"]);
        match &events[1] {
            SessionEvent::Error { kind, .. } => assert_eq!(kind, "transcript"),
            other => panic!("unexpected event {other:?}"),
        }
        match &events[2] {
            SessionEvent::Status { status, .. } => assert_eq!(*status, ExecutionStatus::Failed),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(coordinator.state().status, ExecutionStatus::Failed);
        assert!(!coordinator.is_busy());
    }

    #[tokio::test]
    async fn failed_append_fails_the_turn_and_releases_it() {
        let (coordinator, _provider) = broken_coordinator(
            vec![ScriptedResponse::text("first"), ScriptedResponse::text("second")],
            false,
        );
        let mut events = coordinator.subscribe();

        let err = coordinator.handle_message("hello").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Transcript(TranscriptError::Write(_))));
        let kinds = types(&events.drain());
        assert_eq!(kinds.last(), Some(&"status"));
        assert!(kinds.contains(&"error"));
        assert_eq!(coordinator.state().status, ExecutionStatus::Failed);
        assert!(!coordinator.is_busy());

        // The next message is accepted rather than rejected as busy.
        let err = coordinator.handle_message("again").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Transcript(_)));
    }

    #[tokio::test]
    async fn refused_confirmation_blocks_dangerous_tool() {
        let tool = CountingTool::dangerous("echo");
        let h = harness_with(
            vec![ScriptedResponse::text(invoke("echo", &[]))],
            tool,
            Some(Arc::new(Refuse)),
        );
        let report = h.coordinator.handle_message("go").await.unwrap();
        assert_eq!(h.tool.calls(), 0);
        assert!(report.outcomes[0].error.as_deref().unwrap().contains("denied"));
    }

    #[tokio::test]
    async fn explicit_allow_skips_confirmation() {
        let tool = CountingTool::dangerous("echo");
        let h = harness_with(
            vec![ScriptedResponse::text(invoke("echo", &[]))],
            tool,
            Some(Arc::new(Refuse)),
        );
        h.permissions.set("echo", PermissionBehavior::Allow);
        let report = h.coordinator.handle_message("go").await.unwrap();
        assert_eq!(h.tool.calls(), 1);
        assert!(report.outcomes[0].error.is_none());
    }

    #[test]
    fn synthesize_formats_records() {
        let record = |name: &str, output: Option<serde_json::Value>, error: Option<&str>| ToolRecord {
            id: loom_core::ids::ToolCallId::new(),
            name: name.into(),
            input: ToolInput::new(),
            output,
            error: error.map(str::to_string),
        };
        let records = [
            record("bash", Some(serde_json::json!("line\nnext")), None),
            record("kill_shell", None, Some("unknown shell id: shell_1")),
            record("bash_output", Some(serde_json::json!({"completed": true})), None),
        ];
        let text = synthesize("Done.", &records, 200);
        assert_eq!(
            text,
            "Done.\n\nbash → line next\nkill_shell → error: unknown shell id: shell_1\nbash_output → {\"completed\":true}"
        );
        assert_eq!(synthesize("  only prose ", &[], 10), "only prose");
        assert!(synthesize("", &records[..1], 3).starts_with("bash → lin…"));
    }
}
