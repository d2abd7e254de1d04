//! In-memory conversations: fixed document scope plus recorded turns

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::retrieval::{FinishedAnswer, StreamOutcome, TurnRecorder};
use crate::types::{DocumentId, Role, Sources, Turn};

/// A stored chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedTurn {
    pub role: Role,
    pub content: String,
    /// Attribution labels (assistant turns only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl RecordedTurn {
    pub fn as_turn(&self) -> Turn {
        Turn {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Conversation metadata as returned to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationInfo {
    pub id: i64,
    pub title: String,
    /// Documents every turn searches, in priority order
    pub document_ids: Vec<DocumentId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Conversation {
    info: ConversationInfo,
    turns: Vec<RecordedTurn>,
}

/// Conversations keyed by id
///
/// The document scope is set when a conversation starts and never changes.
#[derive(Debug)]
pub struct ConversationLog {
    conversations: DashMap<i64, Conversation>,
    next_id: AtomicI64,
}

impl Default for ConversationLog {
    fn default() -> Self {
        Self {
            conversations: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a conversation over `document_ids`
    pub fn start(&self, document_ids: Vec<DocumentId>, title: impl Into<String>) -> ConversationInfo {
        let info = ConversationInfo {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            title: title.into(),
            document_ids,
            created_at: Utc::now(),
        };
        tracing::debug!(
            "Conversation {} started over {} documents",
            info.id,
            info.document_ids.len()
        );
        self.conversations.insert(
            info.id,
            Conversation {
                info: info.clone(),
                turns: Vec::new(),
            },
        );
        info
    }

    pub fn info(&self, conversation_id: i64) -> Option<ConversationInfo> {
        self.conversations
            .get(&conversation_id)
            .map(|c| c.info.clone())
    }

    /// Document scope fixed at start
    pub fn scope(&self, conversation_id: i64) -> Option<Vec<DocumentId>> {
        self.conversations
            .get(&conversation_id)
            .map(|c| c.info.document_ids.clone())
    }

    /// Prior turns in the shape the query engine consumes
    pub fn history(&self, conversation_id: i64) -> Vec<Turn> {
        self.conversations
            .get(&conversation_id)
            .map(|c| c.turns.iter().map(RecordedTurn::as_turn).collect())
            .unwrap_or_default()
    }

    /// All stored messages, oldest first; `None` for an unknown conversation
    pub fn messages(&self, conversation_id: i64) -> Option<Vec<RecordedTurn>> {
        self.conversations
            .get(&conversation_id)
            .map(|c| c.turns.clone())
    }

    pub fn record_user(&self, conversation_id: i64, content: &str) {
        self.push(conversation_id, Role::User, content.to_string(), Vec::new());
    }

    pub fn record_assistant(&self, conversation_id: i64, content: String, sources: &Sources) {
        self.push(
            conversation_id,
            Role::Assistant,
            content,
            sources.iter().cloned().collect(),
        );
    }

    /// Finalizer that stores a streamed answer in `conversation_id`
    pub fn recorder(self: &Arc<Self>, conversation_id: i64) -> Arc<dyn TurnRecorder> {
        Arc::new(ConversationRecorder {
            log: Arc::clone(self),
            conversation_id,
        })
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    fn push(&self, conversation_id: i64, role: Role, content: String, sources: Vec<String>) {
        match self.conversations.get_mut(&conversation_id) {
            Some(mut conversation) => conversation.turns.push(RecordedTurn {
                role,
                content,
                sources,
                created_at: Utc::now(),
            }),
            None => tracing::warn!(
                "Dropping {:?} turn for unknown conversation {}",
                role,
                conversation_id
            ),
        }
    }
}

struct ConversationRecorder {
    log: Arc<ConversationLog>,
    conversation_id: i64,
}

impl TurnRecorder for ConversationRecorder {
    fn record(&self, answer: FinishedAnswer) {
        if answer.text.trim().is_empty() {
            tracing::debug!(
                "Conversation {}: nothing to record ({:?})",
                self.conversation_id,
                answer.outcome
            );
            return;
        }
        if answer.outcome != StreamOutcome::Completed {
            tracing::info!(
                "Conversation {}: recording partial answer ({:?})",
                self.conversation_id,
                answer.outcome
            );
        }
        self.log
            .record_assistant(self.conversation_id, answer.text, &answer.sources);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_keeps_order() {
        let log = ConversationLog::new();
        let first = log.start(vec![DocumentId(1)], "first").id;
        let second = log.start(vec![DocumentId(2)], "second").id;
        log.record_user(first, "hi");
        log.record_assistant(first, "hello".to_string(), &Sources::new());
        log.record_user(second, "other");

        assert_eq!(log.history(first), vec![Turn::user("hi"), Turn::assistant("hello")]);
        assert_eq!(log.history(second).len(), 1);
        assert!(log.history(99).is_empty());
    }

    #[test]
    fn test_scope_is_fixed_at_start() {
        let log = ConversationLog::new();
        let a = log.start(vec![DocumentId(4), DocumentId(2)], "a");
        let b = log.start(vec![DocumentId(7)], "b");

        assert_ne!(a.id, b.id);
        log.record_user(a.id, "q");
        assert_eq!(log.scope(a.id), Some(vec![DocumentId(4), DocumentId(2)]));
        assert_eq!(log.scope(b.id), Some(vec![DocumentId(7)]));
        assert_eq!(log.scope(99), None);
    }

    #[test]
    fn test_turns_for_unknown_conversation_are_dropped() {
        let log = ConversationLog::new();
        log.record_user(42, "lost");
        assert!(log.messages(42).is_none());
        assert!(log.is_empty());
    }

    #[test]
    fn test_recorder_skips_empty_partials() {
        let log = Arc::new(ConversationLog::new());
        let id = log.start(vec![], "partial").id;
        let recorder = log.recorder(id);

        recorder.record(FinishedAnswer {
            text: "  ".to_string(),
            sources: Sources::new(),
            outcome: StreamOutcome::Cancelled,
        });
        assert_eq!(log.messages(id), Some(Vec::new()));

        recorder.record(FinishedAnswer {
            text: "Half an ans".to_string(),
            sources: ["a.pdf".to_string()].into_iter().collect(),
            outcome: StreamOutcome::Cancelled,
        });
        let messages = log.messages(id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[0].sources, vec!["a.pdf".to_string()]);
    }
}
