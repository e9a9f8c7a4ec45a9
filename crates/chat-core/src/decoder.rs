//! Stream Decoder: raw response chunks to semantic deltas.
//!
//! Records are newline-delimited `data: <json>` lines. A line is only
//! interpreted once its terminating newline has arrived (or the stream has
//! ended), so the decoded output is the same however the transport chunks
//! the body. Malformed records are logged and skipped; an `error` event
//! ends the stream with that error.

use std::collections::VecDeque;
use futures::stream::{self, Stream, StreamExt};
use chat_types::{
    ChatError, Result,
    thinking::StreamDelta,
    wire::{BlockDelta, StreamEvent},
};

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// Which kind of content block the stream is currently inside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Block {
    #[default]
    Answer,
    /// The turn's thinking region, currently open
    Thinking,
    /// A thinking block after the region was already used. Its reasoning
    /// is dropped so the message keeps a single thinking region.
    ExtraThinking,
}

/// Incremental decoder state. Feed chunks with [`push`](Self::push), call
/// [`finish`](Self::finish) at end of stream, and pop deltas in between.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    /// Trailing bytes of an incomplete UTF-8 sequence
    undecoded: Vec<u8>,
    /// Text after the last newline seen
    partial_line: String,
    block: Block,
    region_opened: bool,
    ready: VecDeque<StreamDelta>,
    error: Option<ChatError>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one transport chunk and decode every line it completes.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.error.is_some() {
            return;
        }
        self.append_utf8(chunk);

        let Some(last_newline) = self.partial_line.rfind('\n') else {
            return;
        };
        let tail = self.partial_line.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial_line, tail);
        for line in complete.split('\n') {
            if self.error.is_some() {
                break;
            }
            self.process_line(line);
        }
    }

    /// Signal end of stream; the buffered last line is now complete.
    pub fn finish(&mut self) {
        if !self.undecoded.is_empty() {
            let rest = std::mem::take(&mut self.undecoded);
            self.partial_line.push_str(&String::from_utf8_lossy(&rest));
        }
        let line = std::mem::take(&mut self.partial_line);
        if self.error.is_none() && !line.is_empty() {
            self.process_line(&line);
        }
    }

    /// Next decoded delta, in arrival order.
    pub fn pop(&mut self) -> Option<StreamDelta> {
        self.ready.pop_front()
    }

    /// The stream error, once every delta decoded before it has been popped.
    pub fn take_error(&mut self) -> Option<ChatError> {
        if self.ready.is_empty() {
            self.error.take()
        } else {
            None
        }
    }

    fn append_utf8(&mut self, chunk: &[u8]) {
        self.undecoded.extend_from_slice(chunk);
        loop {
            match std::str::from_utf8(&self.undecoded) {
                Ok(text) => {
                    self.partial_line.push_str(text);
                    self.undecoded.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    self.partial_line
                        .push_str(&String::from_utf8_lossy(&self.undecoded[..valid]));
                    match e.error_len() {
                        // Sequence cut by the chunk boundary; wait for the rest
                        None => {
                            self.undecoded.drain(..valid);
                            return;
                        }
                        Some(invalid) => {
                            self.partial_line.push(char::REPLACEMENT_CHARACTER);
                            self.undecoded.drain(..valid + invalid);
                        }
                    }
                }
            }
        }
    }

    fn process_line(&mut self, line: &str) {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() {
            return;
        }
        let Some(data) = line.strip_prefix(DATA_PREFIX) else {
            // `event:`, `id:`, comments
            return;
        };
        let data = data.strip_prefix(' ').unwrap_or(data);
        if data.trim() == DONE_SENTINEL {
            return;
        }

        match serde_json::from_str::<StreamEvent>(data) {
            Ok(event) => self.classify(event),
            Err(e) => log::warn!("Failed to parse stream event: {} ({})", line, e),
        }
    }

    fn classify(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::MessageStart { message } => {
                if let Some(text) = message.content.into_iter().next().and_then(|b| b.text) {
                    self.emit_text(text);
                }
            }
            StreamEvent::ContentBlockStart { content_block } => {
                self.close_thinking();
                if content_block.kind == "thinking" {
                    if self.region_opened {
                        log::debug!("Dropping additional thinking block");
                        self.block = Block::ExtraThinking;
                    } else {
                        self.region_opened = true;
                        self.block = Block::Thinking;
                        self.ready.push_back(StreamDelta::ThinkingStart);
                    }
                }
            }
            StreamEvent::ContentBlockDelta { delta } => match delta {
                BlockDelta::TextDelta { text } => self.emit_text(text),
                BlockDelta::ThinkingDelta { thinking } => {
                    // Reasoning outside the open region is lost, including
                    // deltas that arrive without a thinking block start.
                    if self.block == Block::Thinking && !thinking.is_empty() {
                        self.ready.push_back(StreamDelta::Thinking(thinking));
                    }
                }
                BlockDelta::Other => {}
            },
            StreamEvent::ContentBlockStop => self.close_thinking(),
            StreamEvent::Error { error } => {
                let message = if error.message.is_empty() {
                    "Unknown stream error".to_string()
                } else {
                    error.message
                };
                log::warn!("Stream error event: {}", message);
                self.error = Some(ChatError::Stream(message));
            }
            StreamEvent::Other => {}
        }
    }

    fn emit_text(&mut self, text: String) {
        if !text.is_empty() {
            self.ready.push_back(StreamDelta::Text(text));
        }
    }

    fn close_thinking(&mut self) {
        if self.block == Block::Thinking {
            self.ready.push_back(StreamDelta::ThinkingEnd);
        }
        self.block = Block::Answer;
    }
}

/// Decode a chunked response body into a lazy stream of deltas.
///
/// The stream ends after the first error, whether it came from the
/// transport or from an `error` event.
pub fn decode_stream<S>(chunks: S) -> impl Stream<Item = Result<StreamDelta>>
where
    S: Stream<Item = Result<Vec<u8>>> + Unpin,
{
    struct State<S> {
        chunks: S,
        decoder: StreamDecoder,
        done: bool,
    }

    let state = State {
        chunks,
        decoder: StreamDecoder::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(delta) = state.decoder.pop() {
                return Some((Ok(delta), state));
            }
            if let Some(err) = state.decoder.take_error() {
                state.done = true;
                return Some((Err(err), state));
            }
            if state.done {
                return None;
            }

            match state.chunks.next().await {
                Some(Ok(bytes)) => state.decoder.push(&bytes),
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.decoder.finish();
                    state.done = true;
                }
            }
        }
    })
}
