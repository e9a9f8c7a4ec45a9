//! Chat App: WASM entry point.
//!
//! This crate is the composition root (DI wiring layer).
//! It assembles the platform adapters, hands them to the orchestrator, and
//! exposes the result to the page's JavaScript UI as `ChatClient`.

mod client;
mod view;


pub use client::ChatClient;

use wasm_bindgen::prelude::*;

/// WASM entry point, run when the module is instantiated
#[wasm_bindgen(start)]
pub fn main() {
    wasm_logger::init(wasm_logger::Config::default());
    log::info!("Chat WASM starting...");
}
