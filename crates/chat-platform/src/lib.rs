//! Browser adapters for the chat-core ports: Messages API over `fetch`,
//! localStorage persistence, and `File` ingestion.

pub mod llm;
pub mod storage;
pub mod files;
