//! Conversation orchestration.
//!
//! A [`SessionOrchestrator`] owns one conversation: its log, its token budget,
//! and the engine that answers it. It serialises generations so that at most
//! one is in flight, applies streamed chunks to the active target in order,
//! and always returns to [`SessionState::Idle`] whether a generation
//! completes, fails, or is cancelled. Nothing it does fails outward except a
//! rejected submission.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use edgechat_core::{
    Author, ChatError, Chunk, GenerationOutcome, InferenceEngine, Message, MessageId, ModelSpec,
    SessionEvent, SilentReplyPolicy, Visibility,
};
use edgechat_logging::{EventLogger, TranscriptEvent};

use crate::conversation_log::ConversationLog;
use crate::inference_session::{InferenceSession, SessionHandle, DEFAULT_CHUNK_BUFFER};
use crate::prompt::PromptTemplate;
use crate::session_state::SessionState;
use crate::token_budget::TokenBudgetTracker;

/// Default capacity of the session event broadcast.
const DEFAULT_EVENT_BUFFER: usize = 256;

/// Tunables for a conversation.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub silent_replies: SilentReplyPolicy,
    /// Reject prompts containing turn delimiters instead of escaping them.
    pub reject_control_tokens: bool,
    pub chunk_buffer: usize,
    pub event_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            silent_replies: SilentReplyPolicy::default(),
            reject_control_tokens: false,
            chunk_buffer: DEFAULT_CHUNK_BUFFER,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// Returned by a successful submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationTicket {
    pub session_id: Uuid,
    /// The submitted prompt as recorded in the log.
    pub prompt_id: MessageId,
    /// The placeholder receiving the reply.
    pub target: MessageId,
}

struct ActiveGeneration {
    session_id: Uuid,
    target: MessageId,
    cancel: CancellationToken,
}

struct Inner {
    log: ConversationLog,
    state: SessionState,
    active: Option<ActiveGeneration>,
    engine: Arc<dyn InferenceEngine>,
    template: PromptTemplate,
    model_id: String,
    /// Bumped whenever the conversation is reset; stale recomputes are skipped.
    epoch: u64,
}

struct Shared {
    id: Uuid,
    config: OrchestratorConfig,
    inner: Mutex<Inner>,
    budget: TokenBudgetTracker,
    state_tx: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

/// Handle to one conversation. Cloning shares the same conversation.
#[derive(Clone)]
pub struct SessionOrchestrator {
    shared: Arc<Shared>,
}

impl SessionOrchestrator {
    pub fn new(engine: Arc<dyn InferenceEngine>, model: &ModelSpec, config: OrchestratorConfig) -> Self {
        let template = PromptTemplate::for_style(model.prompt_style)
            .rejecting_control_tokens(config.reject_control_tokens);
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let id = Uuid::new_v4();

        info!(conversation_id = %id, model = %model.id, engine = engine.name(), "Conversation created");

        Self {
            shared: Arc::new(Shared {
                id,
                inner: Mutex::new(Inner {
                    log: ConversationLog::with_end_marker(template.end_marker()),
                    state: SessionState::Idle,
                    active: None,
                    engine,
                    template,
                    model_id: model.id.clone(),
                    epoch: 0,
                }),
                budget: TokenBudgetTracker::new(model.context_tokens),
                state_tx,
                events,
                config,
            }),
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        self.shared.id
    }

    /// Submit a prompt typed by the user.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<GenerationTicket, ChatError> {
        self.submit(text, Visibility::Visible).await
    }

    /// Submit a prompt that stays out of the visible transcript.
    pub async fn send_silently(&self, text: impl Into<String>) -> Result<GenerationTicket, ChatError> {
        self.submit(text, Visibility::Silent).await
    }

    /// Start a generation for `text`.
    ///
    /// Fails with [`ChatError::Busy`] while another generation is in flight and
    /// with [`ChatError::InvalidPrompt`] for blank or disallowed input; in both
    /// cases the log is left untouched.
    #[instrument(skip(self, text), fields(conversation_id = %self.shared.id))]
    pub async fn submit(
        &self,
        text: impl Into<String>,
        visibility: Visibility,
    ) -> Result<GenerationTicket, ChatError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ChatError::InvalidPrompt("prompt is empty".to_string()));
        }

        let mut inner = self.shared.inner.lock().await;
        if inner.state.is_generating() {
            warn!(?visibility, "Rejected submission: generation already in progress");
            EventLogger::log_event(
                &self.shared.id.to_string(),
                TranscriptEvent::Rejected {
                    reason: ChatError::Busy.to_string(),
                },
            );
            return Err(ChatError::Busy);
        }

        let prompt = inner.template.format(&text)?;

        let prompt_id = match visibility {
            Visibility::Visible => inner.log.append_complete(text.clone(), Author::User),
            Visibility::Silent => inner.log.append_hidden(text.clone(), Author::External),
        };
        self.announce_appended(&inner.log, prompt_id);

        let reply_visible = visibility == Visibility::Visible
            || self.shared.config.silent_replies == SilentReplyPolicy::Transcript;
        let target = if reply_visible {
            inner.log.append_placeholder(Author::Model)
        } else {
            inner.log.append_background_placeholder(Author::Model)
        };
        self.announce_appended(&inner.log, target);

        let engine = Arc::clone(&inner.engine);
        let (handle, chunks) =
            InferenceSession::start(Arc::clone(&engine), prompt, self.shared.config.chunk_buffer);
        let session_id = handle.id();

        inner.active = Some(ActiveGeneration {
            session_id,
            target,
            cancel: handle.cancellation(),
        });
        self.set_state(&mut inner, SessionState::Generating);
        let epoch = inner.epoch;
        let budget_ticket = self.shared.budget.ticket();
        drop(inner);

        debug!(%session_id, ?visibility, "Generation started");
        EventLogger::log_event(
            &self.shared.id.to_string(),
            TranscriptEvent::Prompt {
                silent: visibility == Visibility::Silent,
                text,
            },
        );
        self.emit(SessionEvent::GenerationStarted {
            session_id,
            visibility,
        });

        let (pumped_tx, pumped_rx) = oneshot::channel();
        tokio::spawn(self.clone().pump(session_id, chunks, pumped_tx));
        tokio::spawn(self.clone().recompute_after(handle, pumped_rx, engine, epoch, budget_ticket));

        Ok(GenerationTicket {
            session_id,
            prompt_id,
            target,
        })
    }

    /// Wait until the conversation is idle, then submit.
    ///
    /// Retries if another submitter claims the idle slot first.
    pub async fn submit_when_idle(
        &self,
        text: impl Into<String>,
        visibility: Visibility,
    ) -> Result<GenerationTicket, ChatError> {
        let text = text.into();
        let mut state_rx = self.shared.state_tx.subscribe();
        loop {
            if state_rx.wait_for(SessionState::input_enabled).await.is_err() {
                return Err(ChatError::ChannelClosed("session state".to_string()));
            }
            match self.submit(text.clone(), visibility).await {
                Err(ChatError::Busy) => continue,
                other => return other,
            }
        }
    }

    /// Apply chunks of one generation in arrival order until its terminal chunk.
    async fn pump(self, session_id: Uuid, mut chunks: mpsc::Receiver<Chunk>, pumped: oneshot::Sender<()>) {
        let mut terminated = false;
        while let Some(chunk) = chunks.recv().await {
            let terminal = chunk.is_done();
            self.apply_chunk(session_id, chunk).await;
            if terminal {
                terminated = true;
                break;
            }
        }
        if !terminated {
            self.apply_chunk(
                session_id,
                Chunk::Failed("inference session ended without a result".to_string()),
            )
            .await;
        }
        let _ = pumped.send(());
    }

    async fn apply_chunk(&self, session_id: Uuid, chunk: Chunk) {
        let mut inner = self.shared.inner.lock().await;
        let Some(target) = inner
            .active
            .as_ref()
            .filter(|active| active.session_id == session_id)
            .map(|active| active.target)
        else {
            debug!(%session_id, "Dropping chunk for a generation that is no longer active");
            return;
        };

        match chunk {
            Chunk::Delta(text) => {
                inner.log.append_chunk(target, &text, false);
                self.shared.budget.decrement();
                let delta = inner.template.strip_end_marker(&text);
                self.emit(SessionEvent::MessageUpdated { id: target, delta });
            }
            Chunk::Done(text) => {
                inner.log.append_chunk(target, &text, true);
                let delta = inner.template.strip_end_marker(&text);
                if !delta.is_empty() {
                    self.emit(SessionEvent::MessageUpdated { id: target, delta });
                }
                self.emit(SessionEvent::MessageCompleted { id: target });
                if let Some(reply) = inner.log.get(target) {
                    EventLogger::log_event(
                        &self.shared.id.to_string(),
                        TranscriptEvent::Reply {
                            text: reply.text.clone(),
                        },
                    );
                }
                self.finish(&mut inner, session_id, GenerationOutcome::Completed);
            }
            Chunk::Failed(message) => {
                error!(%session_id, error = %message, "Generation failed");
                self.surface_error(&mut inner, target, &message);
                EventLogger::log_event(
                    &self.shared.id.to_string(),
                    TranscriptEvent::Error {
                        error_msg: message.clone(),
                    },
                );
                self.finish(&mut inner, session_id, GenerationOutcome::Failed(message));
            }
            Chunk::Cancelled => {
                inner.log.append_chunk(target, "", true);
                self.emit(SessionEvent::MessageCompleted { id: target });
                self.finish(&mut inner, session_id, GenerationOutcome::Cancelled);
            }
        }
    }

    /// Record a generation error as one visible model message.
    ///
    /// A visible placeholder that never received text becomes the error
    /// message; otherwise the placeholder is closed and the error appended.
    fn surface_error(&self, inner: &mut Inner, target: MessageId, message: &str) {
        let reuse_placeholder = inner
            .log
            .get(target)
            .map(|m| m.visible && m.text.is_empty())
            .unwrap_or(false);

        if reuse_placeholder {
            inner.log.append_chunk(target, message, true);
            self.emit(SessionEvent::MessageUpdated {
                id: target,
                delta: message.to_string(),
            });
            self.emit(SessionEvent::MessageCompleted { id: target });
        } else {
            inner.log.append_chunk(target, "", true);
            self.emit(SessionEvent::MessageCompleted { id: target });
            let id = inner.log.append_placeholder(Author::Model);
            self.announce_appended(&inner.log, id);
            inner.log.append_chunk(id, message, true);
            self.emit(SessionEvent::MessageUpdated {
                id,
                delta: message.to_string(),
            });
            self.emit(SessionEvent::MessageCompleted { id });
        }
    }

    fn finish(&self, inner: &mut Inner, session_id: Uuid, outcome: GenerationOutcome) {
        inner.active = None;
        self.set_state(inner, SessionState::Idle);
        debug!(%session_id, ?outcome, "Generation finished");
        self.emit(SessionEvent::GenerationFinished { session_id, outcome });
    }

    /// Replace the budget estimate once the session has released the engine.
    ///
    /// Runs off the chunk path; it never touches state or input enablement.
    /// A slow estimate that lands after a later generation's is discarded.
    async fn recompute_after(
        self,
        handle: SessionHandle,
        pumped: oneshot::Receiver<()>,
        engine: Arc<dyn InferenceEngine>,
        epoch: u64,
        ticket: u64,
    ) {
        let session_id = handle.id();
        let _ = tokio::join!(handle.finished(), pumped);

        let context = {
            let inner = self.shared.inner.lock().await;
            if inner.epoch != epoch {
                debug!(%session_id, "Conversation reset since generation; skipping recompute");
                return;
            }
            inner
                .log
                .entries()
                .iter()
                .map(|m| inner.template.format_turn(m))
                .collect::<String>()
        };

        match self
            .shared
            .budget
            .recompute_with(ticket, engine.as_ref(), &context)
            .await
        {
            Ok(Some(remaining)) => self.emit(SessionEvent::BudgetRecomputed { remaining }),
            Ok(None) => debug!(%session_id, "Budget recompute superseded"),
            Err(e) => warn!(%session_id, error = %e, "Token budget recompute failed"),
        }
    }

    /// Cancel the in-flight generation, if any. The log is kept.
    pub async fn cancel(&self) -> bool {
        let inner = self.shared.inner.lock().await;
        match &inner.active {
            Some(active) => {
                active.cancel.cancel();
                info!(session_id = %active.session_id, "Generation cancelled");
                true
            }
            None => false,
        }
    }

    /// Empty the conversation, cancelling any in-flight generation.
    ///
    /// Returns to idle immediately; chunks still in flight for the cancelled
    /// generation are discarded.
    pub async fn clear(&self) {
        let mut inner = self.shared.inner.lock().await;
        self.reset(&mut inner);
        self.shared.budget.reset();
        info!(conversation_id = %self.shared.id, "Conversation cleared");
        self.emit(SessionEvent::Cleared);
    }

    /// Install a different engine and model, starting a fresh conversation.
    pub async fn switch_model(&self, engine: Arc<dyn InferenceEngine>, model: &ModelSpec) {
        let mut inner = self.shared.inner.lock().await;
        self.reset(&mut inner);
        inner.template = PromptTemplate::for_style(model.prompt_style)
            .rejecting_control_tokens(self.shared.config.reject_control_tokens);
        inner.log = ConversationLog::with_end_marker(inner.template.end_marker());
        inner.engine = engine;
        inner.model_id = model.id.clone();
        self.shared.budget.set_capacity(model.context_tokens);
        info!(conversation_id = %self.shared.id, model = %model.id, "Model switched");
        self.emit(SessionEvent::ModelSwitched {
            model_id: model.id.clone(),
        });
    }

    fn reset(&self, inner: &mut Inner) {
        if let Some(active) = inner.active.take() {
            active.cancel.cancel();
            self.emit(SessionEvent::GenerationFinished {
                session_id: active.session_id,
                outcome: GenerationOutcome::Cancelled,
            });
        }
        inner.log.clear();
        inner.epoch += 1;
        self.set_state(inner, SessionState::Idle);
    }

    /// Wait until no generation is in flight.
    pub async fn wait_idle(&self) {
        let mut state_rx = self.shared.state_tx.subscribe();
        let _ = state_rx.wait_for(SessionState::input_enabled).await;
    }

    fn set_state(&self, inner: &mut Inner, state: SessionState) {
        inner.state = state;
        self.shared.state_tx.send_replace(state);
    }

    fn announce_appended(&self, log: &ConversationLog, id: MessageId) {
        if let Some(message) = log.get(id) {
            self.emit(SessionEvent::MessageAppended {
                id,
                author: message.author,
                visible: message.visible,
            });
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.shared.events.send(event);
    }

    /// Visible transcript, newest first.
    pub async fn snapshot(&self) -> Vec<Message> {
        self.shared.inner.lock().await.log.snapshot()
    }

    /// Background buffer of silent exchanges, newest first.
    pub async fn background(&self) -> Vec<Message> {
        self.shared.inner.lock().await.log.background()
    }

    pub async fn message(&self, id: MessageId) -> Option<Message> {
        self.shared.inner.lock().await.log.get(id).cloned()
    }

    pub async fn model_id(&self) -> String {
        self.shared.inner.lock().await.model_id.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state_tx.borrow()
    }

    pub fn input_enabled(&self) -> bool {
        self.state().input_enabled()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn budget(&self) -> &TokenBudgetTracker {
        &self.shared.budget
    }

    pub fn tokens_remaining(&self) -> usize {
        self.shared.budget.remaining()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use async_trait::async_trait;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    use edgechat_engine::providers::mock::MockEngine;
    use edgechat_engine::ModelCatalog;

    fn model() -> ModelSpec {
        ModelCatalog::new().default_model().unwrap().clone()
    }

    fn orchestrator(engine: MockEngine) -> SessionOrchestrator {
        SessionOrchestrator::new(Arc::new(engine), &model(), OrchestratorConfig::default())
    }

    async fn settle(orchestrator: &SessionOrchestrator) {
        timeout(Duration::from_secs(5), orchestrator.wait_idle())
            .await
            .expect("conversation did not return to idle");
    }

    async fn next_recompute(rx: &mut broadcast::Receiver<SessionEvent>) -> usize {
        timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(SessionEvent::BudgetRecomputed { remaining }) = rx.recv().await {
                    return remaining;
                }
            }
        })
        .await
        .expect("no budget recompute")
    }

    #[tokio::test]
    async fn test_visible_submission_streams_into_placeholder() {
        let orch = orchestrator(MockEngine::new().with_chunks(["a", "b", "c<end_of_turn>"]));
        let ticket = orch.send_message("hello").await.unwrap();
        assert!(!orch.input_enabled());

        settle(&orch).await;

        let snapshot = orch.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, ticket.target);
        assert_eq!(snapshot[0].author, Author::Model);
        assert_eq!(snapshot[0].text, "abc");
        assert!(!snapshot[0].loading);
        assert_eq!(snapshot[1].author, Author::User);
        assert_eq!(snapshot[1].text, "hello");
        assert_eq!(orch.state(), SessionState::Idle);
        assert!(orch.input_enabled());
    }

    #[tokio::test]
    async fn test_second_submission_is_rejected_while_generating() {
        let gate = Arc::new(Notify::new());
        let orch = orchestrator(
            MockEngine::new()
                .with_chunks(["first"])
                .with_gate(Arc::clone(&gate)),
        );

        let ticket = orch.send_message("one").await.unwrap();
        let err = orch.send_message("two").await.unwrap_err();
        assert!(err.is_busy());
        let err = orch.send_silently("sensor").await.unwrap_err();
        assert!(err.is_busy());

        gate.notify_one();
        settle(&orch).await;

        let snapshot = orch.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, ticket.target);
        assert_eq!(snapshot[0].text, "first");
        assert!(orch.background().await.is_empty());
    }

    #[tokio::test]
    async fn test_engine_failure_before_any_chunk() {
        let orch = orchestrator(MockEngine::new().failing_before("model not loaded"));
        orch.send_message("hello").await.unwrap();
        settle(&orch).await;

        let snapshot = orch.snapshot().await;
        let model_messages: Vec<_> = snapshot
            .iter()
            .filter(|m| m.author == Author::Model)
            .collect();
        assert_eq!(model_messages.len(), 1);
        assert_eq!(model_messages[0].text, "model not loaded");
        assert!(!model_messages[0].loading);
        assert!(orch.input_enabled());
        assert_eq!(orch.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_engine_failure_mid_stream_appends_error() {
        let orch = orchestrator(MockEngine::new().with_chunks(["partial"]).failing_after("gpu lost"));
        orch.send_message("hello").await.unwrap();
        settle(&orch).await;

        let snapshot = orch.snapshot().await;
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].text, "gpu lost");
        assert_eq!(snapshot[0].author, Author::Model);
        assert_eq!(snapshot[1].text, "partial");
        assert!(!snapshot[1].loading);
        assert!(orch.input_enabled());
    }

    #[tokio::test]
    async fn test_clear_during_generation() {
        let gate = Arc::new(Notify::new());
        let orch = orchestrator(
            MockEngine::new()
                .with_chunks(["late"])
                .with_gate(Arc::clone(&gate)),
        );
        let mut events = orch.subscribe();

        let ticket = orch.send_message("hello").await.unwrap();
        orch.clear().await;
        assert_eq!(orch.state(), SessionState::Idle);
        assert!(orch.snapshot().await.is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(orch.snapshot().await.is_empty());
        assert!(orch.message(ticket.target).await.is_none());
        assert!(orch.input_enabled());

        let mut saw_cleared = false;
        while let Ok(event) = events.try_recv() {
            if event == SessionEvent::Cleared {
                saw_cleared = true;
            }
            assert_ne!(
                event,
                SessionEvent::MessageUpdated {
                    id: ticket.target,
                    delta: "late".into()
                }
            );
        }
        assert!(saw_cleared);

        orch.send_message("again").await.unwrap();
        settle(&orch).await;
        assert_eq!(orch.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn test_silent_submission_hides_prompt_and_keeps_reply() {
        let orch = orchestrator(MockEngine::new().with_chunks(["It is ", "21 degrees"]));
        let ticket = orch.send_silently("sensor reading").await.unwrap();
        settle(&orch).await;

        let snapshot = orch.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, ticket.target);
        assert_eq!(snapshot[0].text, "It is 21 degrees");

        let background = orch.background().await;
        assert_eq!(background.len(), 1);
        assert_eq!(background[0].id, ticket.prompt_id);
        assert_eq!(background[0].author, Author::External);
    }

    #[tokio::test]
    async fn test_background_policy_keeps_reply_hidden() {
        let config = OrchestratorConfig {
            silent_replies: SilentReplyPolicy::Background,
            ..Default::default()
        };
        let orch = SessionOrchestrator::new(
            Arc::new(MockEngine::new().with_chunks(["noted"])),
            &model(),
            config,
        );
        orch.send_silently("sensor reading").await.unwrap();
        settle(&orch).await;

        assert!(orch.snapshot().await.is_empty());
        let background = orch.background().await;
        assert_eq!(background.len(), 2);
        assert_eq!(background[0].text, "noted");
    }

    #[tokio::test]
    async fn test_silent_failure_is_visible() {
        let config = OrchestratorConfig {
            silent_replies: SilentReplyPolicy::Background,
            ..Default::default()
        };
        let orch = SessionOrchestrator::new(
            Arc::new(MockEngine::new().failing_before("offline")),
            &model(),
            config,
        );
        orch.send_silently("sensor reading").await.unwrap();
        settle(&orch).await;

        let snapshot = orch.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].text, "offline");
    }

    #[tokio::test]
    async fn test_budget_recomputed_after_completion() {
        let orch = orchestrator(MockEngine::new().with_chunks(["a", "b"]).with_remaining(777));
        let mut events = orch.subscribe();
        assert_eq!(orch.tokens_remaining(), 1024);

        orch.send_message("hello").await.unwrap();
        let remaining = next_recompute(&mut events).await;
        assert_eq!(remaining, 777);
        assert_eq!(orch.tokens_remaining(), 777);
        assert_eq!(orch.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_budget_decrements_once_per_streamed_chunk() {
        let estimate_gate = Arc::new(Notify::new());
        let orch = orchestrator(
            MockEngine::new()
                .with_chunks(["a", "b", "c"])
                .with_remaining(500)
                .with_estimate_gate(Arc::clone(&estimate_gate)),
        );
        let mut events = orch.subscribe();

        orch.send_message("hello").await.unwrap();
        settle(&orch).await;

        // Three deltas, and nothing for the empty terminal chunk.
        assert_eq!(orch.tokens_remaining(), 1024 - 3);

        estimate_gate.notify_one();
        assert_eq!(next_recompute(&mut events).await, 500);
        assert_eq!(orch.tokens_remaining(), 500);
    }

    /// Parks its first estimate until released; later estimates answer at once.
    struct SlowFirstEstimate {
        calls: AtomicUsize,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl InferenceEngine for SlowFirstEstimate {
        fn name(&self) -> &str {
            "slow-first-estimate"
        }

        async fn generate(&self, _prompt: &str, tx: mpsc::Sender<String>) -> anyhow::Result<()> {
            let _ = tx.send("ok".to_string()).await;
            Ok(())
        }

        async fn estimate_remaining(&self, _context: &str) -> anyhow::Result<usize> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.release.notified().await;
                return Ok(300);
            }
            Ok(800)
        }
    }

    #[tokio::test]
    async fn test_slow_recompute_does_not_overwrite_newer_one() {
        let release = Arc::new(Notify::new());
        let engine = SlowFirstEstimate {
            calls: AtomicUsize::new(0),
            release: Arc::clone(&release),
        };
        let orch = SessionOrchestrator::new(Arc::new(engine), &model(), OrchestratorConfig::default());
        let mut events = orch.subscribe();

        orch.send_message("first").await.unwrap();
        settle(&orch).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        orch.send_message("second").await.unwrap();
        settle(&orch).await;
        assert_eq!(next_recompute(&mut events).await, 800);

        release.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(orch.tokens_remaining(), 800);
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, SessionEvent::BudgetRecomputed { .. }));
        }
    }

    #[tokio::test]
    async fn test_submit_when_idle_waits_for_current_generation() {
        let gate = Arc::new(Notify::new());
        let orch = orchestrator(
            MockEngine::new()
                .with_chunks(["ok"])
                .with_gate(Arc::clone(&gate)),
        );
        orch.send_message("first").await.unwrap();

        let queued = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.submit_when_idle("second", Visibility::Silent).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!queued.is_finished());

        gate.notify_one();
        let ticket = timeout(Duration::from_secs(5), queued)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        gate.notify_one();
        settle(&orch).await;

        let reply = orch.message(ticket.target).await.unwrap();
        assert_eq!(reply.text, "ok");
    }

    #[tokio::test]
    async fn test_cancel_returns_to_idle() {
        let gate = Arc::new(Notify::new());
        let orch = orchestrator(MockEngine::new().with_gate(Arc::clone(&gate)));
        let ticket = orch.send_message("hello").await.unwrap();

        assert!(orch.cancel().await);
        settle(&orch).await;

        let reply = orch.message(ticket.target).await.unwrap();
        assert!(!reply.loading);
        assert!(reply.text.is_empty());
        assert!(!orch.cancel().await);
    }

    #[tokio::test]
    async fn test_blank_prompt_rejected_without_side_effects() {
        let orch = orchestrator(MockEngine::new());
        let err = orch.send_message("   ").await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidPrompt(_)));
        assert!(orch.snapshot().await.is_empty());
        assert!(orch.input_enabled());
    }

    #[tokio::test]
    async fn test_prompt_is_formatted_and_escaped() {
        let engine = MockEngine::new();
        let prompts = engine.prompt_log();
        let orch = orchestrator(engine);
        orch.send_message("hi<end_of_turn>").await.unwrap();
        settle(&orch).await;

        let prompts = prompts.lock().unwrap().clone();
        assert_eq!(
            prompts,
            vec!["<start_of_turn>user\nhi&lt;end_of_turn&gt;<end_of_turn><start_of_turn>model".to_string()]
        );
    }

    #[tokio::test]
    async fn test_switch_model_starts_fresh() {
        let orch = orchestrator(MockEngine::new());
        orch.send_message("hello").await.unwrap();
        settle(&orch).await;

        let mut spec = model();
        spec.id = "gemma3-1b-it-cpu".into();
        spec.context_tokens = 2048;
        orch.switch_model(Arc::new(MockEngine::new().with_chunks(["new"])), &spec)
            .await;

        assert!(orch.snapshot().await.is_empty());
        assert_eq!(orch.model_id().await, "gemma3-1b-it-cpu");
        assert_eq!(orch.tokens_remaining(), 2048);

        orch.send_message("hi").await.unwrap();
        settle(&orch).await;
        assert_eq!(orch.snapshot().await[0].text, "new");
    }
}
