//! Anthropic Messages API adapter.
//!
//! Sends a streaming `POST /v1/messages` through browser `fetch()` via
//! gloo-net and hands the raw body chunks to the core decoder. Each request
//! owns an `AbortController`: dropping the body stream, or the request
//! future before headers arrive, aborts the fetch. The same controller
//! enforces the overall timeout.

use std::cell::Cell;
use std::rc::Rc;
use async_trait::async_trait;
use futures::stream;
use gloo_net::http::Request;
use gloo_timers::callback::Timeout;
use js_sys::{Reflect, Uint8Array};
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{AbortController, ReadableStreamDefaultReader};

use chat_core::ports::{ByteStream, LlmPort};
use chat_types::{
    ChatError, Result,
    config::ApiConfig,
    wire::{ErrorResponse, MessagesRequest},
};

pub struct AnthropicProvider {
    config: ApiConfig,
}

impl AnthropicProvider {
    pub fn new(config: ApiConfig) -> Self {
        Self { config }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait(?Send)]
impl LlmPort for AnthropicProvider {
    async fn stream_messages(&self, req: MessagesRequest) -> Result<ByteStream> {
        if self.config.auth_token.is_empty() {
            return Err(ChatError::Config("No API key configured".to_string()));
        }

        let guard = FetchGuard::new(self.config.timeout_ms)?;
        log::debug!("POST {} model={}", self.endpoint(), req.model);

        let response = Request::post(&self.endpoint())
            .header("content-type", "application/json")
            .header("x-api-key", &self.config.auth_token)
            .header("anthropic-version", &self.config.api_version)
            .header("anthropic-dangerously-allow-browser", "true")
            .abort_signal(Some(&guard.controller.signal()))
            .json(&req)
            .map_err(|e| ChatError::Serialization(e.to_string()))?
            .send()
            .await
            .map_err(|e| guard.fetch_error(e.to_string()))?;

        if !response.ok() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            log::warn!("Messages API returned HTTP {}", status);
            return Err(http_error(status, &body));
        }

        let body = response
            .body()
            .ok_or_else(|| ChatError::Stream("Response has no body".to_string()))?;
        let reader: ReadableStreamDefaultReader = body.get_reader().unchecked_into();

        Ok(read_body(reader, guard))
    }
}

/// Error for a non-2xx response: the API's own message when the body
/// carries one, the status and raw body otherwise.
pub fn http_error(status: u16, body: &str) -> ChatError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .map(|r| r.error.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("API Error {}: {}", status, body));
    ChatError::Http { status, message }
}

// ─── Abort + timeout ─────────────────────────────────────────

/// Aborts its fetch when dropped. Also aborts when the timeout fires.
struct FetchGuard {
    controller: AbortController,
    timed_out: Rc<Cell<bool>>,
    timeout_ms: u32,
    _timer: Timeout,
}

impl FetchGuard {
    fn new(timeout_ms: u32) -> Result<Self> {
        let controller = AbortController::new().map_err(|e| ChatError::JsInterop(format!("{:?}", e)))?;
        let timed_out = Rc::new(Cell::new(false));

        let timer = {
            let controller = controller.clone();
            let timed_out = timed_out.clone();
            Timeout::new(timeout_ms, move || {
                log::warn!("Request timed out after {}ms", timeout_ms);
                timed_out.set(true);
                controller.abort();
            })
        };

        Ok(Self {
            controller,
            timed_out,
            timeout_ms,
            _timer: timer,
        })
    }

    fn fetch_error(&self, message: String) -> ChatError {
        if self.timed_out.get() {
            ChatError::Timeout(self.timeout_ms)
        } else {
            ChatError::network(message)
        }
    }
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        self.controller.abort();
    }
}

// ─── Body reader ─────────────────────────────────────────────

struct BodyState {
    reader: ReadableStreamDefaultReader,
    guard: FetchGuard,
    done: bool,
}

fn read_body(reader: ReadableStreamDefaultReader, guard: FetchGuard) -> ByteStream {
    let state = BodyState {
        reader,
        guard,
        done: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        match read_chunk(&state.reader).await {
            Ok(Some(bytes)) => Some((Ok(bytes), state)),
            Ok(None) => None,
            Err(e) => {
                state.done = true;
                let error = state.guard.fetch_error(js_error_message(&e));
                Some((Err(error), state))
            }
        }
    }))
}

/// `Ok(None)` once the body is exhausted.
async fn read_chunk(reader: &ReadableStreamDefaultReader) -> std::result::Result<Option<Vec<u8>>, JsValue> {
    let result = JsFuture::from(reader.read()).await?;
    let done = Reflect::get(&result, &JsValue::from_str("done"))?.is_truthy();
    if done {
        return Ok(None);
    }
    let value = Reflect::get(&result, &JsValue::from_str("value"))?;
    Ok(Some(Uint8Array::new(&value).to_vec()))
}

fn js_error_message(value: &JsValue) -> String {
    value
        .dyn_ref::<js_sys::Error>()
        .map(|e| String::from(e.message()))
        .or_else(|| value.as_string())
        .unwrap_or_else(|| format!("{:?}", value))
}
