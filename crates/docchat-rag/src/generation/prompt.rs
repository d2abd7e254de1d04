//! Prompt templates for grounded answers

use crate::types::{RetrievalResult, Sources, Turn};

/// Sentence the model is told to use when the context has no answer
pub const FALLBACK_ANSWER: &str = "I could not find an answer to that in the provided documents.";

/// Prompt builder for document-grounded chat
pub struct PromptBuilder;

impl PromptBuilder {
    /// Chunk texts joined by blank lines, in retrieval order
    pub fn build_context(results: &[RetrievalResult]) -> String {
        results
            .iter()
            .map(|r| r.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Deduplicated attribution labels of the given results
    pub fn collect_sources(results: &[RetrievalResult]) -> Sources {
        results.iter().map(|r| r.source.clone()).collect()
    }

    /// The last `max_turns` turns, one `Role: content` line each
    pub fn render_history(history: &[Turn], max_turns: usize) -> String {
        let skip = history.len().saturating_sub(max_turns);
        history[skip..]
            .iter()
            .map(|turn| format!("{}: {}\n", turn.role.label(), turn.content))
            .collect()
    }

    /// Full grounding prompt: instructions, context, recent history, question
    pub fn build_grounding_prompt(
        question: &str,
        context: &str,
        history: &[Turn],
        max_turns: usize,
    ) -> String {
        format!(
            r#"You are a helpful assistant that answers questions
based on the provided document context.
Answer questions ONLY using the document context below.
If the answer is not found in the context, say:
"{fallback}"
Be clear, concise, and helpful.

DOCUMENT CONTEXT:
{context}

CONVERSATION HISTORY:
{history}

User: {question}
Assistant:"#,
            fallback = FALLBACK_ANSWER,
            context = context,
            history = Self::render_history(history, max_turns),
            question = question,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(content: &str, source: &str) -> RetrievalResult {
        RetrievalResult {
            content: content.to_string(),
            source: source.to_string(),
            namespace: "1".to_string(),
            similarity: 0.5,
        }
    }

    #[test]
    fn test_context_and_sources() {
        let results = vec![
            result("alpha", "a.pdf"),
            result("beta", "b.txt"),
            result("gamma", "a.pdf"),
        ];
        assert_eq!(PromptBuilder::build_context(&results), "alpha\n\nbeta\n\ngamma");

        let sources = PromptBuilder::collect_sources(&results);
        assert_eq!(sources.len(), 2);
        assert!(sources.contains("a.pdf") && sources.contains("b.txt"));
    }

    #[test]
    fn test_history_window_keeps_latest_turns() {
        let history: Vec<Turn> = (0..10)
            .map(|i| {
                if i % 2 == 0 {
                    Turn::user(format!("question {}", i))
                } else {
                    Turn::assistant(format!("reply {}", i))
                }
            })
            .collect();

        let rendered = PromptBuilder::render_history(&history, 6);
        assert_eq!(rendered.lines().count(), 6);
        assert!(rendered.starts_with("User: question 4\n"));
        assert!(rendered.ends_with("Assistant: reply 9\n"));
        assert!(!rendered.contains("question 2"));
    }

    #[test]
    fn test_short_history_used_in_full() {
        let history = vec![Turn::user("hi"), Turn::assistant("hello")];
        assert_eq!(
            PromptBuilder::render_history(&history, 6),
            "User: hi\nAssistant: hello\n"
        );
    }

    #[test]
    fn test_prompt_layout() {
        let prompt = PromptBuilder::build_grounding_prompt(
            "What grew?",
            "Revenue grew.",
            &[Turn::user("Hello")],
            6,
        );
        assert!(prompt.contains(FALLBACK_ANSWER));
        assert!(prompt.contains("DOCUMENT CONTEXT:\nRevenue grew.\n"));
        assert!(prompt.contains("CONVERSATION HISTORY:\nUser: Hello\n"));
        assert!(prompt.ends_with("User: What grew?\nAssistant:"));
    }
}
