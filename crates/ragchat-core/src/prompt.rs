//! Prompt assembly ("query wrapper").
//!
//! Builds the single prompt string sent to the language model, in this
//! fixed order:
//!
//! 1. system preamble
//! 2. retrieved chunks, highest similarity first, numbered `[1]`, `[2]`, …
//! 3. recent conversation turns, oldest first
//! 4. the current query, last
//!
//! The budget is measured in characters. When the full prompt does not fit,
//! content is dropped from the least relevant end: lowest-similarity chunks
//! first, then the oldest turns. The preamble and the query are never cut;
//! if those two alone exceed the budget the result is
//! [`RagError::PromptTooLarge`].

use tracing::debug;

use crate::error::{RagError, RagResult};
use crate::models::{RetrievedChunk, Turn};

/// Default instructions placed at the top of every prompt.
pub const DEFAULT_PREAMBLE: &str = "You are in the role of a chatbot in an ongoing conversation. \
The user is providing you with documents as sources and wants you to consider only these \
provided sources when replying; you shall not rely on general knowledge other than the \
'Source facts' below. The dialogue consists of pairs of (1) user queries and (2) your \
responses. Consider these previous queries and responses (if any) when replying to the \
'new_query' at the end.";

/// Default number of previous turns offered to the model.
pub const DEFAULT_HISTORY_TURNS: usize = 5;

/// The assembled prompt plus a record of what made it in.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPrompt {
    pub text: String,
    /// Chunk references included, in prompt order.
    pub chunks_used: Vec<String>,
    pub turns_used: usize,
    pub chunks_dropped: usize,
    pub turns_dropped: usize,
}

#[derive(Debug, Clone)]
pub struct PromptAssembler {
    history_turns: usize,
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_TURNS)
    }
}

impl PromptAssembler {
    /// `history_turns` bounds the conversation window before any budget
    /// truncation happens.
    pub fn new(history_turns: usize) -> Self {
        Self { history_turns }
    }

    pub fn assemble(
        &self,
        preamble: &str,
        retrieved: &[RetrievedChunk],
        history: &[Turn],
        query: &str,
        max_length: usize,
    ) -> RagResult<AssembledPrompt> {
        if query.trim().is_empty() {
            return Err(RagError::InvalidArgument("query is empty".to_string()));
        }

        let mut chunks: Vec<&RetrievedChunk> = retrieved.iter().collect();
        chunks.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut turns: Vec<&Turn> = history.iter().filter(|t| t.is_complete()).collect();
        turns.sort_by_key(|t| t.timestamp);
        let window_start = turns.len().saturating_sub(self.history_turns);
        let turns = &turns[window_start..];

        let required = char_len(&render(preamble, &[], &[], query));
        if required > max_length {
            return Err(RagError::PromptTooLarge {
                required,
                budget: max_length,
            });
        }

        let mut n_chunks = chunks.len();
        let mut first_turn = 0;
        let text = loop {
            let text = render(preamble, &chunks[..n_chunks], &turns[first_turn..], query);
            if char_len(&text) <= max_length {
                break text;
            }
            if n_chunks > 0 {
                n_chunks -= 1;
            } else {
                first_turn += 1;
            }
        };

        let chunks_dropped = chunks.len() - n_chunks;
        if chunks_dropped > 0 || first_turn > 0 {
            debug!(
                chunks_dropped,
                turns_dropped = first_turn,
                max_length,
                "prompt truncated to fit budget"
            );
        }

        Ok(AssembledPrompt {
            text,
            chunks_used: chunks[..n_chunks]
                .iter()
                .map(|c| c.chunk_ref.clone())
                .collect(),
            turns_used: turns.len() - first_turn,
            chunks_dropped,
            turns_dropped: first_turn,
        })
    }
}

fn render(preamble: &str, chunks: &[&RetrievedChunk], turns: &[&Turn], query: &str) -> String {
    let mut sections: Vec<String> = Vec::with_capacity(4);

    if !preamble.is_empty() {
        sections.push(preamble.to_string());
    }

    if !chunks.is_empty() {
        let mut s = String::from("Source facts:");
        for (i, c) in chunks.iter().enumerate() {
            s.push_str(&format!("\n[{}] {}", i + 1, c.text));
        }
        sections.push(s);
    }

    if !turns.is_empty() {
        let lines: Vec<String> = turns
            .iter()
            .map(|t| {
                format!(
                    "previous_query: {}\nprevious_response: {}",
                    t.query,
                    t.response.as_deref().unwrap_or_default()
                )
            })
            .collect();
        sections.push(lines.join("\n"));
    }

    sections.push(format!("new_query: {}", query));
    sections.join("\n\n")
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn hit(r: &str, text: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            chunk_ref: r.to_string(),
            document_id: "d".to_string(),
            text: text.to_string(),
            score,
        }
    }

    fn history(n: usize) -> Vec<Turn> {
        let base = Utc::now() - Duration::minutes(60);
        (0..n)
            .map(|i| Turn {
                query: format!("q{}", i),
                response: Some(format!("r{}", i)),
                timestamp: base + Duration::minutes(i as i64),
                provenance: Vec::new(),
            })
            .collect()
    }

    #[test]
    fn test_section_order() {
        let a = PromptAssembler::default();
        let p = a
            .assemble(
                "PRE",
                &[hit("d:1", "low", 0.1), hit("d:0", "high", 0.9)],
                &history(2),
                "the question",
                10_000,
            )
            .unwrap();
        let text = &p.text;
        let pre = text.find("PRE").unwrap();
        let high = text.find("[1] high").unwrap();
        let low = text.find("[2] low").unwrap();
        let q0 = text.find("previous_query: q0").unwrap();
        let q1 = text.find("previous_query: q1").unwrap();
        let query = text.find("new_query: the question").unwrap();
        assert!(pre < high && high < low && low < q0 && q0 < q1 && q1 < query);
        assert!(text.ends_with("new_query: the question"));
        assert_eq!(p.chunks_used, vec!["d:0", "d:1"]);
        assert_eq!(p.turns_used, 2);
    }

    #[test]
    fn test_nan_score_does_not_break_ordering() {
        let p = PromptAssembler::default()
            .assemble(
                "PRE",
                &[
                    hit("d:0", "low", 0.2),
                    hit("d:1", "odd", f32::NAN),
                    hit("d:2", "high", 0.9),
                ],
                &[],
                "q",
                10_000,
            )
            .unwrap();
        assert_eq!(p.chunks_used.len(), 3);
        let high = p.chunks_used.iter().position(|r| r == "d:2").unwrap();
        let low = p.chunks_used.iter().position(|r| r == "d:0").unwrap();
        assert!(high < low);
    }

    #[test]
    fn test_history_window_and_incomplete_turns() {
        let mut turns = history(8);
        turns[7].response = None;
        let p = PromptAssembler::new(5)
            .assemble("PRE", &[], &turns, "q", 10_000)
            .unwrap();
        assert_eq!(p.turns_used, 5);
        assert!(!p.text.contains("previous_query: q1\n"));
        assert!(p.text.contains("previous_query: q2"));
        assert!(p.text.contains("previous_query: q6"));
        assert!(!p.text.contains("previous_query: q7"));
    }

    #[test]
    fn test_drops_chunks_before_history() {
        let a = PromptAssembler::default();
        let chunks = vec![
            hit("d:0", &"a".repeat(50), 0.9),
            hit("d:1", &"b".repeat(50), 0.5),
        ];
        let turns = history(2);
        let full = a.assemble("PRE", &chunks, &turns, "q", 10_000).unwrap();
        let budget = char_len(&full.text) - 10;

        let p = a.assemble("PRE", &chunks, &turns, "q", budget).unwrap();
        assert!(char_len(&p.text) <= budget);
        assert_eq!(p.chunks_used, vec!["d:0"]);
        assert_eq!(p.turns_used, 2);
        assert_eq!(p.chunks_dropped, 1);
    }

    #[test]
    fn test_drops_oldest_turns_after_chunks() {
        let a = PromptAssembler::default();
        let chunks = vec![hit("d:0", "context", 0.9)];
        let turns = history(3);
        let mandatory = char_len(&render("PRE", &[], &[], "q"));
        let p = a
            .assemble("PRE", &chunks, &turns, "q", mandatory + 45)
            .unwrap();
        assert!(p.chunks_used.is_empty());
        assert!(p.turns_dropped >= 1);
        assert!(p.text.contains("previous_query: q2"));
        assert!(!p.text.contains("previous_query: q0"));
        assert!(p.text.starts_with("PRE"));
        assert!(p.text.ends_with("new_query: q"));
    }

    #[test]
    fn test_never_exceeds_budget() {
        let a = PromptAssembler::default();
        let chunks: Vec<RetrievedChunk> = (0..6)
            .map(|i| hit(&format!("d:{}", i), &"x".repeat(30 + i * 7), 1.0 - i as f32 * 0.1))
            .collect();
        let turns = history(5);
        let mandatory = char_len(&render("PREAMBLE", &[], &[], "what now?"));
        for budget in (mandatory..mandatory + 600).step_by(17) {
            let p = a
                .assemble("PREAMBLE", &chunks, &turns, "what now?", budget)
                .unwrap();
            assert!(char_len(&p.text) <= budget);
            assert!(p.text.starts_with("PREAMBLE"));
            assert!(p.text.ends_with("new_query: what now?"));
        }
    }

    #[test]
    fn test_prompt_too_large() {
        let a = PromptAssembler::default();
        let err = a
            .assemble("a long preamble", &[], &[], "a long query", 10)
            .unwrap_err();
        assert!(matches!(err, RagError::PromptTooLarge { budget: 10, .. }));
    }

    #[test]
    fn test_empty_query_rejected() {
        let a = PromptAssembler::default();
        assert!(matches!(
            a.assemble("PRE", &[], &[], "  ", 100),
            Err(RagError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_deterministic() {
        let a = PromptAssembler::default();
        let chunks = vec![hit("d:0", "same", 0.5), hit("d:1", "same score", 0.5)];
        let p1 = a.assemble("P", &chunks, &history(3), "q", 80).unwrap();
        let p2 = a.assemble("P", &chunks, &history(3), "q", 80).unwrap();
        assert_eq!(p1.text, p2.text);
        assert_eq!(p1.chunks_used, p2.chunks_used);
    }
}
