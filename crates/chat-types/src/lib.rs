pub mod message;
pub mod thinking;
pub mod attachment;
pub mod event;
pub mod wire;
pub mod config;
pub mod error;
pub mod session;


pub use error::ChatError;
pub type Result<T> = std::result::Result<T, ChatError>;

/// Fresh unique identifier for messages and sessions.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
