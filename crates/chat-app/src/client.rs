//! `ChatClient`, the JavaScript-facing handle on the chat core.
//!
//! Every method returns immediately; long-running work (turns, file reads,
//! persistence) runs on `spawn_local` and reports back through the event
//! bus. Register a change callback with `setOnChange` and re-read state when
//! it fires.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use js_sys::{Function, Promise};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{future_to_promise, spawn_local};
use web_sys::{ClipboardEvent, FileList};

use chat_core::event_bus::EventBus;
use chat_core::orchestrator::ChatOrchestrator;
use chat_core::ports::{LlmPort, StoragePort};
use chat_core::store::SessionStore;
use chat_platform::files::{files_from_clipboard, files_from_list};
use chat_platform::llm::AnthropicProvider;
use chat_platform::storage::open_storage;
use chat_types::config::{ChatConfig, ChatSettings};
use chat_types::thinking;

use crate::view::{self, to_js, IngestView, SegmentView, TurnResult};

#[wasm_bindgen]
pub struct ChatClient {
    orchestrator: ChatOrchestrator,
    bus: EventBus,
    storage: Rc<dyn StoragePort>,
    settings_key: String,
}

#[wasm_bindgen]
impl ChatClient {
    /// Open storage, restore sessions and settings, and wire the adapters.
    pub async fn create() -> ChatClient {
        let mut config = ChatConfig::default();
        let storage = open_storage(&config.storage.backend).await;

        if let Some(settings) = restore_settings(storage.as_ref(), &config.storage.settings_key).await {
            config.apply_settings(settings);
        }
        if config.api.auth_token.is_empty() {
            log::warn!("No API key was configured at build time; requests will fail");
        }

        let bus = EventBus::new();
        let store = SessionStore::load(storage.clone(), config.storage.sessions_key.clone(), bus.clone()).await;
        let llm: Rc<dyn LlmPort> = Rc::new(AnthropicProvider::new(config.api.clone()));
        let orchestrator = ChatOrchestrator::new(&config, Rc::new(RefCell::new(store)), llm, bus.clone());

        log::info!("Chat client ready: model={} base_url={}", config.model, config.api.base_url);
        ChatClient {
            orchestrator,
            bus,
            storage,
            settings_key: config.storage.settings_key,
        }
    }

    // ─── Change notification ─────────────────────────────

    /// Call `callback` (coalesced, on a microtask) whenever state changes.
    #[wasm_bindgen(js_name = setOnChange)]
    pub fn set_on_change(&self, callback: Function) {
        let scheduled = Rc::new(Cell::new(false));
        self.bus.set_waker(move || {
            if scheduled.replace(true) {
                return;
            }
            let callback = callback.clone();
            let scheduled = scheduled.clone();
            spawn_local(async move {
                scheduled.set(false);
                if let Err(e) = callback.call0(&JsValue::NULL) {
                    log::warn!("Change callback threw: {:?}", e);
                }
            });
        });
    }

    #[wasm_bindgen(js_name = clearOnChange)]
    pub fn clear_on_change(&self) {
        self.bus.clear_waker();
    }

    /// Events since the last drain, oldest first.
    #[wasm_bindgen(js_name = drainEvents)]
    pub fn drain_events(&self) -> JsValue {
        to_js(&self.bus.drain())
    }

    // ─── Turns ───────────────────────────────────────────

    /// Send the staged input. Resolves to `{ outcome, error? }` when the
    /// turn ends. While a turn is in flight this stops it instead.
    #[wasm_bindgen(js_name = sendTurn)]
    pub fn send_turn(&self) -> Promise {
        let orchestrator = self.orchestrator.clone();
        future_to_promise(async move {
            let outcome = orchestrator.send_turn().await;
            Ok(to_js(&TurnResult::from(&outcome)))
        })
    }

    #[wasm_bindgen(js_name = stopTurn)]
    pub fn stop_turn(&self) {
        self.orchestrator.stop_turn();
    }

    #[wasm_bindgen(js_name = isLoading)]
    pub fn is_loading(&self) -> bool {
        self.orchestrator.is_loading()
    }

    // ─── Input & attachments ─────────────────────────────

    #[wasm_bindgen(js_name = setInput)]
    pub fn set_input(&self, text: String) {
        self.orchestrator.set_input(text);
    }

    pub fn input(&self) -> String {
        self.orchestrator.input()
    }

    /// Ingest the files of a file picker. Resolves to `{ accepted, rejected }`.
    #[wasm_bindgen(js_name = addFiles)]
    pub fn add_files(&self, files: FileList) -> Promise {
        let orchestrator = self.orchestrator.clone();
        let files = files_from_list(&files);
        future_to_promise(async move {
            let report = orchestrator.add_files(files).await;
            Ok(to_js(&IngestView::from(report)))
        })
    }

    /// Take the files out of a paste event. Returns false, leaving the event
    /// alone, when it carries no files.
    #[wasm_bindgen(js_name = handlePaste)]
    pub fn handle_paste(&self, event: ClipboardEvent) -> bool {
        let files = files_from_clipboard(&event);
        if files.is_empty() {
            return false;
        }
        event.prevent_default();
        let orchestrator = self.orchestrator.clone();
        spawn_local(async move {
            orchestrator.add_files(files).await;
        });
        true
    }

    #[wasm_bindgen(js_name = removeAttachment)]
    pub fn remove_attachment(&self, index: usize) -> bool {
        self.orchestrator.remove_attachment(index).is_some()
    }

    pub fn attachments(&self) -> JsValue {
        to_js(&self.orchestrator.attachments())
    }

    // ─── Sessions ────────────────────────────────────────

    pub fn sessions(&self) -> JsValue {
        to_js(&self.orchestrator.store().borrow().summaries())
    }

    #[wasm_bindgen(js_name = currentSessionId)]
    pub fn current_session_id(&self) -> Option<String> {
        self.orchestrator.store().borrow().current_id().map(str::to_string)
    }

    /// Messages of the current session.
    pub fn messages(&self) -> JsValue {
        to_js(&self.orchestrator.messages())
    }

    /// Resolves to the new session's id.
    #[wasm_bindgen(js_name = newSession)]
    pub fn new_session(&self) -> Promise {
        let orchestrator = self.orchestrator.clone();
        future_to_promise(async move { Ok(JsValue::from_str(&orchestrator.new_session().await)) })
    }

    #[wasm_bindgen(js_name = selectSession)]
    pub fn select_session(&self, id: &str) -> bool {
        self.orchestrator.select_session(id)
    }

    #[wasm_bindgen(js_name = deleteSession)]
    pub fn delete_session(&self, id: String) -> Promise {
        let orchestrator = self.orchestrator.clone();
        future_to_promise(async move { Ok(JsValue::from_bool(orchestrator.delete_session(&id).await)) })
    }

    // ─── Settings ────────────────────────────────────────

    pub fn models(&self) -> JsValue {
        to_js(&view::models())
    }

    pub fn settings(&self) -> JsValue {
        to_js(&self.orchestrator.settings())
    }

    #[wasm_bindgen(js_name = setModel)]
    pub fn set_model(&self, model: String) {
        self.orchestrator.set_model(model);
        self.save_settings();
    }

    /// `"adaptive"` or `"deep"`. Returns false for anything else.
    #[wasm_bindgen(js_name = setThinkingMode)]
    pub fn set_thinking_mode(&self, mode: &str) -> bool {
        let Some(mode) = view::parse_thinking_mode(mode) else {
            log::warn!("Unknown thinking mode: {}", mode);
            return false;
        };
        self.orchestrator.set_thinking_mode(mode);
        self.save_settings();
        true
    }

    // ─── Content helpers ─────────────────────────────────

    /// `{ before, thinking, after, generating }` for a message's content.
    #[wasm_bindgen(js_name = splitThinking)]
    pub fn split_thinking(content: &str) -> JsValue {
        to_js(&thinking::split(content))
    }

    /// Every answer and thinking region of a message's content, in order.
    pub fn segments(content: &str) -> JsValue {
        let segments: Vec<SegmentView> = thinking::segments(content)
            .into_iter()
            .map(SegmentView::from)
            .collect();
        to_js(&segments)
    }

    #[wasm_bindgen(js_name = cleanText)]
    pub fn clean_text(content: &str) -> String {
        thinking::clean_text(content)
    }

    /// Clipboard text for one message: answer text only, no reasoning.
    #[wasm_bindgen(js_name = copyText)]
    pub fn copy_text(&self, session_id: &str, message_id: &str) -> Option<String> {
        self.orchestrator
            .store()
            .borrow()
            .message(session_id, message_id)
            .map(|m| m.copy_text())
    }
}

impl ChatClient {
    /// Persist the model and thinking mode (fire-and-forget)
    fn save_settings(&self) {
        let settings = self.orchestrator.settings();
        let json = match serde_json::to_vec(&settings) {
            Ok(json) => json,
            Err(e) => {
                log::error!("Failed to serialize settings: {}", e);
                return;
            }
        };
        let storage = self.storage.clone();
        let key = self.settings_key.clone();
        spawn_local(async move {
            match storage.set(&key, &json).await {
                Ok(()) => log::debug!("Settings saved"),
                Err(e) => log::warn!("Failed to save settings: {}", e),
            }
        });
    }
}

async fn restore_settings(storage: &dyn StoragePort, key: &str) -> Option<ChatSettings> {
    let data = match storage.get(key).await {
        Ok(data) => data?,
        Err(e) => {
            log::warn!("Failed to read settings: {}", e);
            return None;
        }
    };
    match serde_json::from_slice::<ChatSettings>(&data) {
        Ok(settings) => {
            log::info!("Settings restored from storage");
            Some(settings)
        }
        Err(e) => {
            log::warn!("Discarding unreadable settings: {}", e);
            None
        }
    }
}
