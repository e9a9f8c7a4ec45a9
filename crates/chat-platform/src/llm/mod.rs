pub mod anthropic;

pub use anthropic::{http_error, AnthropicProvider};
