//! Plain serializable shapes handed to JavaScript.

use serde::Serialize;
use wasm_bindgen::JsValue;
use gloo_utils::format::JsValueSerdeExt;

use chat_core::attachments::IngestReport;
use chat_core::TurnOutcome;
use chat_types::config::{model_label, supports_thinking, ThinkingMode, AVAILABLE_MODELS};
use chat_types::thinking::Segment;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelView {
    pub id: &'static str,
    pub label: String,
    pub supports_thinking: bool,
}

pub fn models() -> Vec<ModelView> {
    AVAILABLE_MODELS
        .iter()
        .map(|&id| ModelView {
            id,
            label: model_label(id),
            supports_thinking: supports_thinking(id),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentView {
    pub kind: &'static str,
    pub text: String,
    /// Only meaningful for thinking segments
    pub open: bool,
}

impl From<Segment> for SegmentView {
    fn from(segment: Segment) -> Self {
        match segment {
            Segment::Answer(text) => SegmentView {
                kind: "answer",
                text,
                open: false,
            },
            Segment::Thinking { text, open } => SegmentView {
                kind: "thinking",
                text,
                open,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResult {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&TurnOutcome> for TurnResult {
    fn from(outcome: &TurnOutcome) -> Self {
        let (name, error) = match outcome {
            TurnOutcome::Skipped => ("skipped", None),
            TurnOutcome::Stopped => ("stopped", None),
            TurnOutcome::Completed => ("completed", None),
            TurnOutcome::Cancelled => ("cancelled", None),
            TurnOutcome::Errored(message) => ("errored", Some(message.clone())),
        };
        TurnResult { outcome: name, error }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestView {
    pub accepted: usize,
    pub rejected: Vec<chat_types::attachment::AttachmentRejection>,
}

impl From<IngestReport> for IngestView {
    fn from(report: IngestReport) -> Self {
        IngestView {
            accepted: report.attachments.len(),
            rejected: report.rejected,
        }
    }
}

pub fn parse_thinking_mode(mode: &str) -> Option<ThinkingMode> {
    serde_json::from_value(serde_json::Value::String(mode.to_string())).ok()
}

/// Serialize for JavaScript; `null` if serialization fails.
pub fn to_js<T: Serialize + ?Sized>(value: &T) -> JsValue {
    JsValue::from_serde(value).unwrap_or_else(|e| {
        log::error!("Failed to convert value for JS: {}", e);
        JsValue::NULL
    })
}
