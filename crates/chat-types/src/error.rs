use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChatError {
    #[error("{message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("{0}")]
    Stream(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Failed to read {name}: {message}")]
    Attachment { name: String, message: String },

    #[error("File {name} is too large ({size} bytes). The maximum is 5MB.")]
    AttachmentTooLarge { name: String, size: u64 },

    #[error("Request timed out after {0}ms")]
    Timeout(u32),

    #[error("Cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JS interop error: {0}")]
    JsInterop(String),

    #[error("{0}")]
    Other(String),
}

impl ChatError {
    /// Build a network error, expanding the browser's terse `fetch` failure.
    pub fn network(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains("Failed to fetch") {
            ChatError::Network(
                "Failed to fetch. The request may have been blocked by CORS, \
                 a proxy error, or an oversized request body."
                    .to_string(),
            )
        } else {
            ChatError::Network(message)
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::Serialization(e.to_string())
    }
}
