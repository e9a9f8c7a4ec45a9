//! Chat orchestrator: the per-turn state machine.
//!
//! A turn moves `Idle → Sending → Streaming → (Completed | Errored |
//! Cancelled)` and back to `Idle`:
//! 1. Validate and stage the user message, clearing the input (Sending)
//! 2. Append an empty assistant placeholder before any network I/O
//! 3. Open the response stream and decode it (Streaming)
//! 4. Append each decoded fragment to the placeholder in arrival order
//! 5. Finish quietly on end of stream or stop, or write the error into the
//!    placeholder on failure
//!
//! All state lives behind `Rc<RefCell<_>>` so the UI can call `stop_turn`
//! while `send_turn` is suspended. No borrow is held across an `.await`.

use std::cell::RefCell;
use std::rc::Rc;
use futures::StreamExt;
use chat_types::{
    ChatError,
    attachment::Attachment,
    config::{ChatConfig, ChatSettings, ThinkingMode, TokenBudget},
    event::{ChatEvent, DeltaKind},
    message::{ContentBlock, Message, MessageContent, Role},
    thinking::{self, StreamDelta},
    wire::{MessagesRequest, WireMessage},
};
use crate::attachments::{self, IngestReport};
use crate::cancel::CancelToken;
use crate::decoder::decode_stream;
use crate::event_bus::EventBus;
use crate::ports::{FileSource, LlmPort};
use crate::store::SessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    /// User message staged, waiting for response headers
    Sending,
    /// Applying decoded fragments
    Streaming,
}

/// How a call to [`ChatOrchestrator::send_turn`] ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Nothing to send; no message was created
    Skipped,
    /// A turn was in flight, so the send acted as a stop
    Stopped,
    Completed,
    /// Stopped by the user; partial content kept
    Cancelled,
    /// The placeholder now carries this error
    Errored(String),
}

/// The turn currently allowed to mutate the transcript
struct InFlight {
    turn_id: u64,
    cancel: CancelToken,
}

struct TurnState {
    settings: ChatSettings,
    input: String,
    attachments: Vec<Attachment>,
    phase: TurnPhase,
    in_flight: Option<InFlight>,
    turn_counter: u64,
}

/// Everything a running turn needs, captured when it starts
struct ActiveTurn {
    turn_id: u64,
    session_id: String,
    message_id: String,
    cancel: CancelToken,
    request: MessagesRequest,
}

/// Clone-cheap handle; clones share one turn state.
#[derive(Clone)]
pub struct ChatOrchestrator {
    store: Rc<RefCell<SessionStore>>,
    llm: Rc<dyn LlmPort>,
    bus: EventBus,
    system_prompt: Rc<str>,
    state: Rc<RefCell<TurnState>>,
}

impl ChatOrchestrator {
    pub fn new(
        config: &ChatConfig,
        store: Rc<RefCell<SessionStore>>,
        llm: Rc<dyn LlmPort>,
        bus: EventBus,
    ) -> Self {
        Self {
            store,
            llm,
            bus,
            system_prompt: Rc::from(config.system_prompt.as_str()),
            state: Rc::new(RefCell::new(TurnState {
                settings: config.settings(),
                input: String::new(),
                attachments: Vec::new(),
                phase: TurnPhase::Idle,
                in_flight: None,
                turn_counter: 0,
            })),
        }
    }

    // ─── Observable state ────────────────────────────────────

    pub fn store(&self) -> Rc<RefCell<SessionStore>> {
        self.store.clone()
    }

    pub fn phase(&self) -> TurnPhase {
        self.state.borrow().phase
    }

    pub fn is_loading(&self) -> bool {
        self.phase() != TurnPhase::Idle
    }

    /// Messages of the current session.
    pub fn messages(&self) -> Vec<Message> {
        self.store.borrow().current_messages().to_vec()
    }

    pub fn settings(&self) -> ChatSettings {
        self.state.borrow().settings.clone()
    }

    pub fn input(&self) -> String {
        self.state.borrow().input.clone()
    }

    pub fn attachments(&self) -> Vec<Attachment> {
        self.state.borrow().attachments.clone()
    }

    // ─── Input staging ───────────────────────────────────────

    pub fn set_input(&self, text: impl Into<String>) {
        self.state.borrow_mut().input = text.into();
    }

    pub fn set_model(&self, model: impl Into<String>) {
        let model = model.into();
        log::info!("Model set to {}", model);
        self.state.borrow_mut().settings.model = model;
    }

    pub fn set_thinking_mode(&self, mode: ThinkingMode) {
        self.state.borrow_mut().settings.thinking_mode = mode;
    }

    /// Ingest files from a picker or paste event and stage the readable ones.
    pub async fn add_files(&self, files: Vec<Rc<dyn FileSource>>) -> IngestReport {
        let report = attachments::ingest(files).await;

        for rejection in &report.rejected {
            self.bus.emit(ChatEvent::AttachmentRejected {
                name: rejection.name.clone(),
                reason: rejection.reason.clone(),
            });
        }
        if !report.attachments.is_empty() {
            let count = {
                let mut state = self.state.borrow_mut();
                state.attachments.extend(report.attachments.iter().cloned());
                state.attachments.len()
            };
            self.bus.emit(ChatEvent::AttachmentsChanged { count });
        }
        report
    }

    pub fn remove_attachment(&self, index: usize) -> Option<Attachment> {
        let (removed, count) = {
            let mut state = self.state.borrow_mut();
            if index >= state.attachments.len() {
                return None;
            }
            let removed = state.attachments.remove(index);
            (removed, state.attachments.len())
        };
        self.bus.emit(ChatEvent::AttachmentsChanged { count });
        Some(removed)
    }

    // ─── Sessions ────────────────────────────────────────────

    pub async fn new_session(&self) -> String {
        let (id, save) = {
            let mut store = self.store.borrow_mut();
            let id = store.new_session();
            (id, store.save())
        };
        save.await;
        id
    }

    pub fn select_session(&self, id: &str) -> bool {
        self.store.borrow_mut().select_session(id)
    }

    pub async fn delete_session(&self, id: &str) -> bool {
        let (deleted, save) = {
            let mut store = self.store.borrow_mut();
            let deleted = store.delete_session(id);
            (deleted, store.save())
        };
        if deleted {
            save.await;
        }
        deleted
    }

    // ─── Turns ───────────────────────────────────────────────

    /// Send the staged input as a new turn and drive it to completion.
    ///
    /// While a turn is in flight this acts as [`stop_turn`](Self::stop_turn).
    pub async fn send_turn(&self) -> TurnOutcome {
        if self.is_loading() {
            self.stop_turn();
            return TurnOutcome::Stopped;
        }

        let Some(turn) = self.begin_turn() else {
            return TurnOutcome::Skipped;
        };
        self.save().await;

        let outcome = self.run_turn(&turn).await;
        self.finish_turn(&turn, &outcome);
        self.save().await;
        outcome
    }

    /// Abort the in-flight turn, keeping whatever content it already wrote.
    pub fn stop_turn(&self) {
        let mut state = self.state.borrow_mut();
        if let Some(in_flight) = state.in_flight.take() {
            log::info!("Stopping turn {}", in_flight.turn_id);
            in_flight.cancel.cancel();
        }
        state.phase = TurnPhase::Idle;
    }

    /// Stage the user message and placeholder. `None` when there is nothing to send.
    fn begin_turn(&self) -> Option<ActiveTurn> {
        let mut state = self.state.borrow_mut();
        let text = state.input.trim().to_string();
        if text.is_empty() && state.attachments.is_empty() {
            return None;
        }

        let had_attachments = !state.attachments.is_empty();
        let content = if !had_attachments {
            MessageContent::Text(text)
        } else {
            let mut blocks: Vec<ContentBlock> = state
                .attachments
                .drain(..)
                .map(Attachment::into_block)
                .collect();
            if !text.is_empty() {
                blocks.push(ContentBlock::text(text));
            }
            MessageContent::Blocks(blocks)
        };
        state.input.clear();

        let mut store = self.store.borrow_mut();
        let session_id = store.ensure_current();
        store.append_message(&session_id, Message::user(content));
        let history = wire_history(store.get(&session_id).map(|s| s.messages.as_slice()).unwrap_or(&[]));

        let placeholder = Message::placeholder();
        let message_id = placeholder.id().to_string();
        store.append_message(&session_id, placeholder);
        drop(store);

        state.turn_counter += 1;
        let turn_id = state.turn_counter;
        let cancel = CancelToken::new();
        state.in_flight = Some(InFlight {
            turn_id,
            cancel: cancel.clone(),
        });
        state.phase = TurnPhase::Sending;

        let request = build_request(&state.settings, &self.system_prompt, history);
        drop(state);

        log::info!(
            "Turn {} started: model={} messages={}",
            turn_id,
            request.model,
            request.messages.len()
        );
        if had_attachments {
            self.bus.emit(ChatEvent::AttachmentsChanged { count: 0 });
        }
        self.bus.emit(ChatEvent::TurnStarted {
            turn_id,
            session_id: session_id.clone(),
            message_id: message_id.clone(),
        });

        Some(ActiveTurn {
            turn_id,
            session_id,
            message_id,
            cancel,
            request,
        })
    }

    async fn run_turn(&self, turn: &ActiveTurn) -> TurnOutcome {
        let opened = turn
            .cancel
            .run(self.llm.stream_messages(turn.request.clone()))
            .await;
        let chunks = match opened {
            Err(_aborted) => return TurnOutcome::Cancelled,
            Ok(Err(e)) => return self.fail(turn, e),
            Ok(Ok(chunks)) => chunks,
        };

        {
            let mut state = self.state.borrow_mut();
            if state.owns(turn.turn_id) {
                state.phase = TurnPhase::Streaming;
            }
        }

        let mut deltas = Box::pin(turn.cancel.guard(decode_stream(chunks)));
        while let Some(item) = deltas.next().await {
            if turn.cancel.is_cancelled() {
                break;
            }
            match item {
                Ok(delta) => {
                    self.apply_delta(turn, &delta);
                    self.save().await;
                }
                Err(e) => return self.fail(turn, e),
            }
        }

        if turn.cancel.is_cancelled() {
            TurnOutcome::Cancelled
        } else {
            TurnOutcome::Completed
        }
    }

    fn apply_delta(&self, turn: &ActiveTurn, delta: &StreamDelta) {
        let applied = self
            .store
            .borrow_mut()
            .patch_message(&turn.session_id, &turn.message_id, |m| {
                m.content.push_str(delta.fragment())
            });
        if !applied {
            log::debug!("Turn {}: placeholder gone, dropping fragment", turn.turn_id);
            return;
        }
        self.bus.emit(ChatEvent::Delta {
            turn_id: turn.turn_id,
            message_id: turn.message_id.clone(),
            kind: DeltaKind::from(delta),
        });
    }

    /// Replace the placeholder content with the error. A cancelled turn
    /// resolves quietly instead.
    fn fail(&self, turn: &ActiveTurn, error: ChatError) -> TurnOutcome {
        if turn.cancel.is_cancelled() {
            return TurnOutcome::Cancelled;
        }
        log::error!("Turn {} failed: {}", turn.turn_id, error);
        self.store
            .borrow_mut()
            .patch_message(&turn.session_id, &turn.message_id, |m| m.fail(&error));
        TurnOutcome::Errored(error.to_string())
    }

    fn finish_turn(&self, turn: &ActiveTurn, outcome: &TurnOutcome) {
        {
            let mut state = self.state.borrow_mut();
            if state.owns(turn.turn_id) {
                state.in_flight = None;
                state.phase = TurnPhase::Idle;
            }
        }

        let turn_id = turn.turn_id;
        let event = match outcome {
            TurnOutcome::Completed => ChatEvent::TurnCompleted { turn_id },
            TurnOutcome::Cancelled => ChatEvent::TurnCancelled { turn_id },
            TurnOutcome::Errored(message) => ChatEvent::TurnFailed {
                turn_id,
                message: message.clone(),
            },
            TurnOutcome::Skipped | TurnOutcome::Stopped => return,
        };
        log::info!("Turn {} finished: {:?}", turn_id, outcome);
        self.bus.emit(event);
    }

    async fn save(&self) {
        let save = self.store.borrow().save();
        save.await;
    }
}

impl TurnState {
    /// Whether `turn_id` is still the in-flight turn
    fn owns(&self, turn_id: u64) -> bool {
        matches!(&self.in_flight, Some(f) if f.turn_id == turn_id)
    }
}

/// Transcript to request history. Assistant turns are sent as their clean
/// answer text; failed turns and turns with no answer are left out.
pub fn wire_history(messages: &[Message]) -> Vec<WireMessage> {
    messages
        .iter()
        .filter(|m| !m.is_error)
        .filter_map(|m| match (m.role(), &m.content) {
            (Role::Assistant, MessageContent::Text(text)) => {
                let clean = thinking::clean_text(text);
                (!clean.is_empty()).then(|| WireMessage {
                    role: Role::Assistant,
                    content: MessageContent::Text(clean),
                })
            }
            (role, content) => Some(WireMessage {
                role,
                content: content.clone(),
            }),
        })
        .collect()
}

pub fn build_request(
    settings: &ChatSettings,
    system_prompt: &str,
    messages: Vec<WireMessage>,
) -> MessagesRequest {
    let budget = TokenBudget::for_model(&settings.model, settings.thinking_mode);
    MessagesRequest {
        model: settings.model.clone(),
        max_tokens: budget.max_tokens,
        messages,
        stream: true,
        system: system_prompt.to_string(),
        thinking: budget.thinking,
    }
}
