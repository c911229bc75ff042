use rig::completion::CompletionRequest;
use rig::message::{AssistantContent, Message, Text, UserContent};
use rig::OneOrMany;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::oracle::Oracle;

/// Rough token estimate: four characters per token.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

/// A single turn in an agent's conversation memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Token-budgeted conversation memory with oracle-backed summarization.
///
/// Recent turns are kept verbatim; when the estimate exceeds the budget, the
/// oldest half is folded into a running summary by one oracle call. Callers
/// only rely on the contract: append a turn, read the history, stay within
/// budget. A failed summarization degrades (the turns stay) rather than
/// losing anything.
pub struct SummaryBufferMemory {
    turns: Vec<Turn>,
    summary: String,
    token_budget: usize,
}

impl SummaryBufferMemory {
    pub fn new(token_budget: usize) -> Self {
        Self {
            turns: Vec::new(),
            summary: String::new(),
            token_budget,
        }
    }

    pub fn append(&mut self, role: TurnRole, content: &str) {
        self.turns.push(Turn {
            role,
            content: content.to_string(),
            timestamp: Some(chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()),
        });
    }

    pub fn history(&self) -> &[Turn] {
        &self.turns
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn estimated_tokens(&self) -> usize {
        let chars: usize = self.summary.len()
            + self
                .turns
                .iter()
                .map(|t| t.content.len())
                .sum::<usize>();
        chars / CHARS_PER_TOKEN
    }

    pub fn over_budget(&self) -> bool {
        self.estimated_tokens() > self.token_budget
    }

    /// Fold the oldest half of the buffer into the running summary.
    ///
    /// The turns are only dropped once the oracle produced a usable summary;
    /// any failure keeps them in place.
    pub async fn compact(&mut self, oracle: &dyn Oracle) {
        if self.turns.len() < 4 {
            return;
        }
        let fold_count = self.turns.len() / 2;

        let mut conversation = String::new();
        for turn in &self.turns[..fold_count] {
            let ts = turn.timestamp.as_deref().unwrap_or("unknown");
            conversation.push_str(&format!(
                "[{ts}] {}: {}\n",
                turn.role.as_str().to_uppercase(),
                turn.content
            ));
        }

        let prompt = format!(
            "You maintain the running summary of a conversation. Fold the new turns below \
             into the current summary, keeping user facts, decisions, and open threads. \
             Respond with ONLY the updated summary text, no preamble.\n\n\
             ## Current Summary\n{}\n\n\
             ## Turns to Fold In\n{}",
            if self.summary.is_empty() {
                "(empty)"
            } else {
                self.summary.as_str()
            },
            conversation
        );

        let request = CompletionRequest {
            preamble: None,
            chat_history: OneOrMany::one(Message::User {
                content: OneOrMany::one(UserContent::Text(Text { text: prompt })),
            }),
            documents: Vec::new(),
            tools: Vec::new(),
            temperature: Some(0.3),
            max_tokens: Some(1024),
            tool_choice: None,
            additional_params: None,
        };

        match oracle.complete(request).await {
            Ok(choice) => {
                let text: String = choice
                    .iter()
                    .filter_map(|c| match c {
                        AssistantContent::Text(t) => Some(t.text.clone()),
                        _ => None,
                    })
                    .collect();
                if text.trim().is_empty() {
                    warn!("Memory summarization returned no text; keeping turns");
                } else {
                    self.summary = text.trim().to_string();
                    self.turns.drain(..fold_count);
                }
            }
            Err(e) => {
                warn!("Memory summarization failed, keeping turns: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{text_reply, FakeOracle};

    #[test]
    fn append_and_history() {
        let mut memory = SummaryBufferMemory::new(1000);
        memory.append(TurnRole::User, "hello");
        memory.append(TurnRole::Assistant, "hi there");
        assert_eq!(memory.history().len(), 2);
        assert_eq!(memory.history()[0].role, TurnRole::User);
    }

    #[test]
    fn over_budget_uses_char_estimate() {
        let mut memory = SummaryBufferMemory::new(10);
        assert!(!memory.over_budget());
        memory.append(TurnRole::User, &"x".repeat(100));
        assert!(memory.over_budget());
    }

    #[tokio::test]
    async fn compact_folds_oldest_half_into_summary() {
        let mut memory = SummaryBufferMemory::new(10);
        for i in 0..6 {
            memory.append(TurnRole::User, &format!("message number {i}"));
        }

        let oracle = FakeOracle::scripted(vec![text_reply("summary of the early turns")]);
        memory.compact(oracle.as_ref()).await;

        assert_eq!(memory.summary(), "summary of the early turns");
        assert_eq!(memory.history().len(), 3);
        assert!(memory.history()[0].content.contains("3"));
    }

    #[tokio::test]
    async fn failed_compaction_keeps_turns() {
        let mut memory = SummaryBufferMemory::new(10);
        for i in 0..6 {
            memory.append(TurnRole::User, &format!("message number {i}"));
        }

        let oracle = FakeOracle::failing();
        memory.compact(oracle.as_ref()).await;

        assert!(memory.summary().is_empty());
        assert_eq!(memory.history().len(), 6);
    }

    #[tokio::test]
    async fn short_buffers_are_not_compacted() {
        let mut memory = SummaryBufferMemory::new(1);
        memory.append(TurnRole::User, "only one turn");

        let oracle = FakeOracle::failing();
        memory.compact(oracle.as_ref()).await;
        assert_eq!(memory.history().len(), 1);
    }
}
