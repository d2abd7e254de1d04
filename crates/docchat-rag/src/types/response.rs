//! Answers, streamed fragments and their wire framing

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Deduplicated attribution labels of the chunks placed in the prompt
pub type Sources = BTreeSet<String>;

/// Complete answer from the blocking query form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    /// Model output
    #[serde(rename = "answer")]
    pub text: String,
    /// Attribution labels
    pub sources: Sources,
}

/// One element of a streamed answer
///
/// The first fragment of every stream has empty `text` and exists to deliver
/// `sources` before any model output.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamFragment {
    pub text: String,
    pub sources: Sources,
}

/// Newline-delimited wire event for streamed answers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamEvent {
    /// Incremental answer text
    Chunk { chunk: String },
    /// Normal completion
    Done { sources: Vec<String>, done: bool },
    /// Error termination
    Error { error: String },
}

impl StreamEvent {
    pub fn chunk(text: impl Into<String>) -> Self {
        Self::Chunk { chunk: text.into() }
    }

    pub fn done(sources: &Sources) -> Self {
        Self::Done {
            sources: sources.iter().cloned().collect(),
            done: true,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk { .. })
    }

    /// Serialize as one NDJSON line (trailing newline included)
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"error":"failed to encode event: {}"}}"#, e)
        });
        line.push('\n');
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_framing() {
        assert_eq!(StreamEvent::chunk("Hel").to_line(), "{\"chunk\":\"Hel\"}\n");

        let sources: Sources = ["b.pdf".to_string(), "a.txt".to_string()].into_iter().collect();
        assert_eq!(
            StreamEvent::done(&sources).to_line(),
            "{\"sources\":[\"a.txt\",\"b.pdf\"],\"done\":true}\n"
        );
        assert_eq!(
            StreamEvent::error("quota").to_line(),
            "{\"error\":\"quota\"}\n"
        );
    }

    #[test]
    fn test_events_parse_independently() {
        let lines = "{\"chunk\":\"a\"}\n{\"sources\":[],\"done\":true}\n";
        let events: Vec<StreamEvent> = lines
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(events[0], StreamEvent::chunk("a"));
        assert!(!events[0].is_terminal());
        assert!(events[1].is_terminal());
    }
}
