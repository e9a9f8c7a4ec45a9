//! Session Store: the single owner of every chat session.
//!
//! All transcript mutation goes through the narrow operations here, so the
//! session invariants (one current session, titles derived once, messages
//! owned by exactly one session) hold in one place. Persistence is a whole
//! snapshot written under one key after each mutation.

use std::future::Future;
use std::rc::Rc;
use chat_types::{
    event::ChatEvent,
    message::Message,
    session::{derive_title, ChatSession, SessionSummary, DEFAULT_TITLE},
};
use crate::event_bus::EventBus;
use crate::ports::StoragePort;

pub struct SessionStore {
    /// Most recent first
    sessions: Vec<ChatSession>,
    current: Option<String>,
    storage: Rc<dyn StoragePort>,
    key: String,
    bus: EventBus,
}

impl SessionStore {
    /// An empty store. Nothing is read from storage.
    pub fn new(storage: Rc<dyn StoragePort>, key: impl Into<String>, bus: EventBus) -> Self {
        Self {
            sessions: Vec::new(),
            current: None,
            storage,
            key: key.into(),
            bus,
        }
    }

    /// Restore the persisted session list and select a current session.
    /// Missing or unreadable data yields an empty list.
    pub async fn load(storage: Rc<dyn StoragePort>, key: impl Into<String>, bus: EventBus) -> Self {
        let mut store = Self::new(storage, key, bus);

        match store.storage.get(&store.key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<Vec<ChatSession>>(&bytes) {
                Ok(sessions) => {
                    log::info!("Restored {} sessions from {}", sessions.len(), store.storage.backend_name());
                    store.sessions = sessions;
                }
                Err(e) => log::warn!("Discarding unreadable session data: {}", e),
            },
            Ok(None) => {}
            Err(e) => log::warn!("Failed to read sessions: {}", e),
        }

        store.ensure_current();
        store
    }

    /// Snapshot the session list and return a future that writes it.
    ///
    /// The snapshot is taken immediately, so the store can be borrowed only
    /// for this call and released before awaiting.
    pub fn save(&self) -> impl Future<Output = ()> + 'static {
        let storage = self.storage.clone();
        let key = self.key.clone();
        let payload = serde_json::to_vec(&self.sessions);
        async move {
            match payload {
                Ok(bytes) => {
                    if let Err(e) = storage.set(&key, &bytes).await {
                        log::warn!("Failed to persist sessions: {}", e);
                    }
                }
                Err(e) => log::error!("Failed to serialize sessions: {}", e),
            }
        }
    }

    // ─── Queries ─────────────────────────────────────────────

    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        self.sessions.iter().map(ChatSession::summary).collect()
    }

    pub fn get(&self, id: &str) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn current(&self) -> Option<&ChatSession> {
        self.current.as_deref().and_then(|id| self.get(id))
    }

    /// Messages of the current session, empty when there is none.
    pub fn current_messages(&self) -> &[Message] {
        self.current().map(|s| s.messages.as_slice()).unwrap_or(&[])
    }

    pub fn message(&self, session_id: &str, message_id: &str) -> Option<&Message> {
        self.get(session_id)?
            .messages
            .iter()
            .find(|m| m.id() == message_id)
    }

    // ─── Session lifecycle ───────────────────────────────────

    /// Create an empty session at the top of the list and make it current.
    pub fn new_session(&mut self) -> String {
        let id = chat_types::new_id();
        self.sessions.insert(0, ChatSession::new(id.clone()));
        self.current = Some(id.clone());
        log::info!("Created session {}", id);
        self.bus.emit(ChatEvent::SessionsChanged);
        id
    }

    pub fn select_session(&mut self, id: &str) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        if self.current.as_deref() != Some(id) {
            self.current = Some(id.to_string());
            self.bus.emit(ChatEvent::SessionsChanged);
        }
        true
    }

    /// Delete a session permanently. Deleting the current session selects
    /// the next one, or a fresh session when none remain.
    pub fn delete_session(&mut self, id: &str) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id != id);
        if self.sessions.len() == before {
            return false;
        }
        log::info!("Deleted session {}", id);

        if self.current.as_deref() == Some(id) {
            self.current = None;
        }
        self.ensure_current();
        self.bus.emit(ChatEvent::SessionsChanged);
        true
    }

    /// The current session id, selecting or creating one if needed.
    pub fn ensure_current(&mut self) -> String {
        if let Some(id) = self.current.clone().filter(|id| self.get(id).is_some()) {
            return id;
        }
        match self.sessions.first().map(|s| s.id.clone()) {
            Some(id) => {
                self.current = Some(id.clone());
                id
            }
            None => self.new_session(),
        }
    }

    // ─── Message updates ─────────────────────────────────────

    /// Append a message to a session. The first user message names it.
    pub fn append_message(&mut self, session_id: &str, message: Message) -> bool {
        let Some(session) = self.session_mut(session_id) else {
            log::warn!("append_message: unknown session {}", session_id);
            return false;
        };
        if session.messages.is_empty() && session.title == DEFAULT_TITLE {
            if let Some(title) = derive_title(&message) {
                session.title = title;
            }
        }
        session.messages.push(message);
        session.touch();
        self.bus.emit(ChatEvent::MessagesChanged {
            session_id: session_id.to_string(),
        });
        true
    }

    /// Mutate one message in place. Returns false if it no longer exists,
    /// e.g. because its session was deleted mid-turn.
    pub fn patch_message(
        &mut self,
        session_id: &str,
        message_id: &str,
        patch: impl FnOnce(&mut Message),
    ) -> bool {
        let message = self
            .session_mut(session_id)
            .and_then(|s| s.messages.iter_mut().find(|m| m.id() == message_id));
        match message {
            Some(message) => {
                patch(message);
                true
            }
            None => false,
        }
    }

    /// Replace a session's whole transcript.
    pub fn replace_messages(&mut self, session_id: &str, messages: Vec<Message>) -> bool {
        let Some(session) = self.session_mut(session_id) else {
            return false;
        };
        if session.messages.is_empty() && session.title == DEFAULT_TITLE {
            if let Some(title) = messages.first().and_then(derive_title) {
                session.title = title;
            }
        }
        session.messages = messages;
        session.touch();
        self.bus.emit(ChatEvent::MessagesChanged {
            session_id: session_id.to_string(),
        });
        true
    }

    fn session_mut(&mut self, id: &str) -> Option<&mut ChatSession> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }
}
