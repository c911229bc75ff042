use std::sync::Arc;

use anyhow::Result;
use rig::completion::CompletionRequest;
use rig::message::{
    AssistantContent, Message, Text, ToolCall, ToolResult, ToolResultContent, UserContent,
};
use rig::OneOrMany;
use tracing::{debug, info, warn};

use crate::agent::context::ContextBuilder;
use crate::agent::decision::Specialist;
use crate::agent::memory::{SummaryBufferMemory, TurnRole};
use crate::oracle::Oracle;
use crate::tools::ToolRegistry;

/// A specialist persona behind the narrowest possible contract: one
/// question in, one answer string out.
///
/// Internally this is a single oracle turn with a bounded tool-call loop.
/// The agent owns its conversation memory exclusively; nothing here is
/// shared with the manager or the other specialist.
pub struct SpecialistAgent {
    role: Specialist,
    oracle: Arc<dyn Oracle>,
    context: ContextBuilder,
    memory: SummaryBufferMemory,
    tools: ToolRegistry,
    max_tool_iterations: usize,
    temperature: f64,
    max_tokens: u64,
}

impl SpecialistAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        role: Specialist,
        oracle: Arc<dyn Oracle>,
        tools: ToolRegistry,
        max_tool_iterations: usize,
        temperature: f64,
        max_tokens: u64,
        memory_token_budget: usize,
    ) -> Self {
        let preamble = match role {
            Specialist::DataScientist => {
                "You are a data scientist. Answer data questions — analysis, modeling, \
                 trends, technical detail — using your tools when current information is \
                 needed. Be concise and factual."
            }
            Specialist::BusinessAnalyst => {
                "You are a business analyst. Answer business questions — pricing, strategy, \
                 market insights — using your tools when current information is needed. \
                 Be concise and factual."
            }
        };
        Self {
            role,
            oracle,
            context: ContextBuilder::new(preamble),
            memory: SummaryBufferMemory::new(memory_token_budget),
            tools,
            max_tool_iterations,
            temperature,
            max_tokens,
        }
    }

    pub fn role(&self) -> Specialist {
        self.role
    }

    /// Collapse one question into one answer.
    ///
    /// Never fails: oracle errors, bad tool arguments, and iteration
    /// exhaustion all come back as descriptive answer text, so from the
    /// caller's perspective a specialist only ever returns strings.
    pub async fn ask(&mut self, question: &str) -> String {
        debug!("Specialist {} asked: {question}", self.role);

        let answer = match self.run_turn(question).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Specialist {} turn failed: {e}", self.role);
                format!("I could not complete this request: {e}")
            }
        };

        self.memory.append(TurnRole::User, question);
        self.memory.append(TurnRole::Assistant, &answer);
        if self.memory.over_budget() {
            let oracle = self.oracle.clone();
            self.memory.compact(oracle.as_ref()).await;
        }

        answer
    }

    /// Run the oracle <> tool loop until the model produces a text answer
    /// or the iteration cap is reached.
    async fn run_turn(&self, question: &str) -> Result<String> {
        let system_prompt = self.context.system_prompt(&self.memory);
        let mut chat_history = self.context.build_history(&self.memory);
        let mut current_prompt = ContextBuilder::user_message(question);
        let tool_defs = self.tools.definitions();

        for iteration in 0..self.max_tool_iterations {
            let mut all_messages = chat_history.clone();
            all_messages.push(current_prompt.clone());

            let request = CompletionRequest {
                preamble: Some(system_prompt.clone()),
                chat_history: OneOrMany::many(all_messages)
                    .unwrap_or_else(|_| OneOrMany::one(current_prompt.clone())),
                documents: Vec::new(),
                tools: tool_defs.clone(),
                temperature: Some(self.temperature),
                max_tokens: Some(self.max_tokens),
                tool_choice: None,
                additional_params: None,
            };

            let choice = self.oracle.complete(request).await?;

            let mut text_content = String::new();
            let mut tool_calls: Vec<ToolCall> = Vec::new();
            for content in choice.iter() {
                match content {
                    AssistantContent::Text(t) => text_content.push_str(&t.text),
                    AssistantContent::ToolCall(tc) => tool_calls.push(tc.clone()),
                    _ => {}
                }
            }

            if tool_calls.is_empty() {
                if text_content.is_empty() {
                    text_content = "I finished processing but have nothing further to add.".into();
                }
                debug!(
                    "Specialist {} answered in {} iteration(s)",
                    self.role,
                    iteration + 1
                );
                return Ok(text_content);
            }

            chat_history.push(current_prompt);
            chat_history.push(Message::Assistant {
                id: None,
                content: choice.clone(),
            });

            let mut tool_results: Vec<UserContent> = Vec::new();
            for tc in &tool_calls {
                info!(
                    "Specialist {} tool call [{}/{}]: {}",
                    self.role,
                    iteration + 1,
                    self.max_tool_iterations,
                    tc.function.name
                );

                let result = match self
                    .tools
                    .execute(&tc.function.name, tc.function.arguments.clone())
                    .await
                {
                    Ok(r) => r,
                    Err(e) => format!("Error executing {}: {e}", tc.function.name),
                };

                tool_results.push(UserContent::ToolResult(ToolResult {
                    id: tc.id.clone(),
                    call_id: tc.call_id.clone(),
                    content: OneOrMany::one(ToolResultContent::Text(Text { text: result })),
                }));
            }

            tool_results.push(UserContent::Text(Text {
                text: "If more tool calls are needed, make them. Otherwise, answer the question."
                    .into(),
            }));
            current_prompt = Message::User {
                content: OneOrMany::many(tool_results).unwrap_or_else(|_| {
                    OneOrMany::one(UserContent::Text(Text {
                        text: "Answer the question with what you have.".into(),
                    }))
                }),
            };
        }

        warn!(
            "Specialist {} hit its tool iteration cap ({})",
            self.role, self.max_tool_iterations
        );
        Ok("I ran out of tool budget before finishing; here is what I have so far.".into())
    }
}
