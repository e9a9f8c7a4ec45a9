//! Platform-free chat core: port traits, the stream decoder, the session
//! store, attachment ingestion, and the turn orchestrator.

pub mod ports;
pub mod event_bus;
pub mod cancel;
pub mod decoder;
pub mod store;
pub mod attachments;
pub mod orchestrator;

#[cfg(test)]
mod tests;

pub use orchestrator::{ChatOrchestrator, TurnOutcome, TurnPhase};
