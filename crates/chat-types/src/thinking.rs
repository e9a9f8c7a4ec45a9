//! Thinking/answer multiplexing.
//!
//! Streamed reasoning is kept structured (`StreamDelta`, `Segment`) and only
//! flattened into a single string at the transcript boundary, where a
//! thinking region is delimited by two sentinel substrings. Sentinels are not
//! escaped: model output that contains them literally decodes ambiguously.

use serde::Serialize;

pub const THINKING_START: &str = "___THINKING_START___";
pub const THINKING_END: &str = "___THINKING_END___";

/// One semantic unit decoded from the response stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamDelta {
    /// Answer text
    Text(String),
    /// Reasoning text
    Thinking(String),
    /// The thinking region opens
    ThinkingStart,
    /// The thinking region closes
    ThinkingEnd,
}

impl StreamDelta {
    /// The fragment this delta contributes to the encoded content string.
    pub fn fragment(&self) -> &str {
        match self {
            StreamDelta::Text(s) | StreamDelta::Thinking(s) => s,
            StreamDelta::ThinkingStart => THINKING_START,
            StreamDelta::ThinkingEnd => THINKING_END,
        }
    }
}

/// The first thinking region of a content string, split out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThinkingSplit<'a> {
    /// Answer text before the start sentinel (the whole string when absent)
    pub before: &'a str,
    pub thinking: Option<&'a str>,
    /// Answer text after the end sentinel
    pub after: &'a str,
    /// A start sentinel without a matching end: reasoning still streaming
    pub generating: bool,
}

impl ThinkingSplit<'_> {
    pub fn answer(&self) -> String {
        let mut answer = String::with_capacity(self.before.len() + self.after.len());
        answer.push_str(self.before);
        answer.push_str(self.after);
        answer
    }

    /// Inverse of [`split`].
    pub fn encode(&self) -> String {
        let mut out = String::from(self.before);
        if let Some(thinking) = self.thinking {
            out.push_str(THINKING_START);
            out.push_str(thinking);
            if !self.generating {
                out.push_str(THINKING_END);
            }
        }
        out.push_str(self.after);
        out
    }
}

/// Split the first thinking region out of `content`.
pub fn split(content: &str) -> ThinkingSplit<'_> {
    let Some(start) = content.find(THINKING_START) else {
        return ThinkingSplit {
            before: content,
            thinking: None,
            after: "",
            generating: false,
        };
    };

    let before = &content[..start];
    let rest = &content[start + THINKING_START.len()..];
    match rest.find(THINKING_END) {
        Some(end) => ThinkingSplit {
            before,
            thinking: Some(&rest[..end]),
            after: &rest[end + THINKING_END.len()..],
            generating: false,
        },
        None => ThinkingSplit {
            before,
            thinking: Some(rest),
            after: "",
            generating: true,
        },
    }
}

/// A run of content of a single kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Answer(String),
    Thinking { text: String, open: bool },
}

/// Parse every region of `content` into segments, in order.
pub fn segments(content: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut rest = content;

    while let Some(start) = rest.find(THINKING_START) {
        if start > 0 {
            out.push(Segment::Answer(rest[..start].to_string()));
        }
        let inner = &rest[start + THINKING_START.len()..];
        match inner.find(THINKING_END) {
            Some(end) => {
                out.push(Segment::Thinking {
                    text: inner[..end].to_string(),
                    open: false,
                });
                rest = &inner[end + THINKING_END.len()..];
            }
            None => {
                out.push(Segment::Thinking {
                    text: inner.to_string(),
                    open: true,
                });
                return out;
            }
        }
    }

    if !rest.is_empty() {
        out.push(Segment::Answer(rest.to_string()));
    }
    out
}

/// Flatten segments back into the marker-delimited string form.
pub fn encode_segments(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Answer(text) => out.push_str(text),
            Segment::Thinking { text, open } => {
                out.push_str(THINKING_START);
                out.push_str(text);
                if !open {
                    out.push_str(THINKING_END);
                }
            }
        }
    }
    out
}

/// Answer text only: every closed region and a trailing open region removed.
pub fn clean_text(content: &str) -> String {
    segments(content)
        .into_iter()
        .filter_map(|s| match s {
            Segment::Answer(text) => Some(text),
            Segment::Thinking { .. } => None,
        })
        .collect::<String>()
        .trim()
        .to_string()
}
