//! Port traits: the hexagonal architecture boundary.
//!
//! These traits are defined here in `chat-core` (pure Rust).
//! Implementations live in `chat-platform` (browser adapters).
//! The core never imports platform code; it only depends on these traits.

use std::pin::Pin;
use async_trait::async_trait;
use futures::Stream;
use chat_types::{Result, wire::MessagesRequest};

// ─── LLM Port ────────────────────────────────────────────────

/// Raw response body, chunked the way the transport delivered it.
/// Chunk boundaries carry no meaning; the decoder reassembles records.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>>>>;

#[async_trait(?Send)]
pub trait LlmPort {
    /// Send a streaming request and resolve once response headers arrive.
    ///
    /// Non-2xx responses resolve to `ChatError::Http`. Dropping the returned
    /// stream must release the underlying connection.
    async fn stream_messages(&self, req: MessagesRequest) -> Result<ByteStream>;
}

// ─── Storage Port ────────────────────────────────────────────

#[async_trait(?Send)]
pub trait StoragePort {
    /// Get a value by key
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Set a value
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Delete a value
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a key exists
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Name of this backend (for logging/debug)
    fn backend_name(&self) -> &str;
}

// ─── File Port ───────────────────────────────────────────────

/// A user-supplied file, from a picker or a paste event.
#[async_trait(?Send)]
pub trait FileSource {
    fn name(&self) -> String;

    /// Size in bytes, known before reading
    fn size(&self) -> u64;

    /// MIME type reported by the browser, possibly empty
    fn media_type(&self) -> String;

    async fn read_bytes(&self) -> Result<Vec<u8>>;
}
