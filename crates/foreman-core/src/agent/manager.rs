use std::sync::Arc;

use rig::completion::{CompletionRequest, ToolDefinition};
use rig::message::{
    AssistantContent, Message, Text, ToolCall, ToolChoice, ToolResult, ToolResultContent,
    UserContent,
};
use rig::OneOrMany;
use tracing::{debug, info, warn};

use crate::agent::context::ContextBuilder;
use crate::agent::decision::{decision_tool_definition, Decision, DECISION_TOOL};
use crate::agent::memory::{SummaryBufferMemory, Turn, TurnRole};
use crate::oracle::Oracle;
use crate::tools::ToolRegistry;

const MANAGER_PREAMBLE: &str = "\
You are a manager agent responsible for solving business and data-science problems.

You have two experts available as tools:
- `ask_business_analyst`: strategies, pricing models, and market approaches.
- `ask_data_scientist`: analysis, modeling, and technical questions.

Solve problems on your own when you are confident. Otherwise, delegate part of
the task by calling the appropriate expert tool.

The user cannot see what the experts do. Forward their findings in your own
words. Always finish your turn by calling the `route_decision` tool with the
route you took and a user-facing `output`.";

/// The manager's decision step: one bounded two-level tool-calling turn
/// that must terminate by emitting a structured `Decision`.
///
/// Specialist tools may be consulted zero or more times inside the turn;
/// their answers are folded into the turn's context before the final
/// decision. Free text without the required structure is a protocol
/// violation: one forced retry, then fail closed.
pub struct ManagerAgent {
    oracle: Arc<dyn Oracle>,
    context: ContextBuilder,
    memory: SummaryBufferMemory,
    tools: ToolRegistry,
    max_decision_steps: usize,
    temperature: f64,
    max_tokens: u64,
}

impl ManagerAgent {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        tools: ToolRegistry,
        max_decision_steps: usize,
        temperature: f64,
        max_tokens: u64,
        memory_token_budget: usize,
    ) -> Self {
        Self {
            oracle,
            context: ContextBuilder::new(MANAGER_PREAMBLE),
            memory: SummaryBufferMemory::new(memory_token_budget),
            tools,
            max_decision_steps: max_decision_steps.max(1),
            temperature,
            max_tokens,
        }
    }

    /// The manager's view of the conversation so far.
    pub fn history(&self) -> &[Turn] {
        self.memory.history()
    }

    /// Seed the manager's memory from externally persisted history
    /// (a presentation shell re-injecting a stored conversation).
    pub fn seed_history(&mut self, turns: &[(TurnRole, String)]) {
        for (role, content) in turns {
            self.memory.append(*role, content);
        }
    }

    /// Produce exactly one decision for the given input.
    ///
    /// This never fails: transport errors and protocol breakdowns are
    /// folded into fail-closed decisions so the routing loop always has a
    /// valid `Decision` to act on.
    pub async fn decide(&mut self, input: &str) -> Decision {
        let decision = self.run_decision_turn(input).await;

        self.memory.append(TurnRole::User, input);
        self.memory.append(TurnRole::Assistant, &decision.output);
        if self.memory.over_budget() {
            let oracle = self.oracle.clone();
            self.memory.compact(oracle.as_ref()).await;
        }

        decision
    }

    async fn run_decision_turn(&self, input: &str) -> Decision {
        let system_prompt = self.context.system_prompt(&self.memory);
        let mut chat_history = self.context.build_history(&self.memory);
        let mut current_prompt = ContextBuilder::user_message(input);

        let mut tool_defs: Vec<ToolDefinition> = self.tools.definitions();
        tool_defs.push(decision_tool_definition());

        // One-shot forcing of the decision tool after a shape violation.
        let mut forced_choice: Option<ToolChoice> = None;
        let mut retried = false;
        let mut last_text = String::new();

        for step in 0..self.max_decision_steps {
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
                tool_choice: forced_choice.take(),
                additional_params: None,
            };

            let choice = match self.oracle.complete(request).await {
                Ok(c) => c,
                Err(e) => {
                    warn!("Manager decision call failed: {e}");
                    return Decision::fail_closed(format!(
                        "I ran into an internal problem while handling this request: {e}"
                    ));
                }
            };

            let mut text_content = String::new();
            let mut decision_call: Option<ToolCall> = None;
            let mut delegate_calls: Vec<ToolCall> = Vec::new();
            for content in choice.iter() {
                match content {
                    AssistantContent::Text(t) => text_content.push_str(&t.text),
                    AssistantContent::ToolCall(tc) if tc.function.name == DECISION_TOOL => {
                        decision_call = Some(tc.clone());
                    }
                    AssistantContent::ToolCall(tc) => delegate_calls.push(tc.clone()),
                    _ => {}
                }
            }

            // A well-formed decision ends the turn, whatever else came with it.
            if let Some(tc) = &decision_call {
                match Decision::from_args(&tc.function.arguments) {
                    Ok(decision) => {
                        debug!(
                            "Manager decision [{}/{}]: route={}",
                            step + 1,
                            self.max_decision_steps,
                            decision.route.as_str()
                        );
                        return decision;
                    }
                    Err(e) => {
                        warn!("Malformed decision arguments: {e}");
                    }
                }
            }

            if decision_call.is_none() && !delegate_calls.is_empty() {
                // Delegation round: consult the experts, feed answers back.
                chat_history.push(current_prompt);
                chat_history.push(Message::Assistant {
                    id: None,
                    content: choice.clone(),
                });

                let mut tool_results: Vec<UserContent> = Vec::new();
                for tc in &delegate_calls {
                    info!(
                        "Manager delegation [{}/{}]: {}",
                        step + 1,
                        self.max_decision_steps,
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
                    text: "When you have what you need, finish by calling `route_decision`."
                        .into(),
                }));
                current_prompt = Message::User {
                    content: OneOrMany::many(tool_results).unwrap_or_else(|_| {
                        OneOrMany::one(UserContent::Text(Text {
                            text: "Finish by calling `route_decision`.".into(),
                        }))
                    }),
                };
                continue;
            }

            // No usable decision and no delegation: protocol violation.
            if !text_content.is_empty() {
                last_text = text_content.clone();
            }
            if !retried {
                retried = true;
                chat_history.push(current_prompt);
                chat_history.push(Message::Assistant {
                    id: None,
                    content: OneOrMany::one(AssistantContent::Text(Text {
                        text: text_content,
                    })),
                });
                current_prompt = ContextBuilder::user_message(
                    "Your last reply did not contain a routing decision. Call the \
                     `route_decision` tool now, with both `route` and `output`.",
                );
                forced_choice = Some(ToolChoice::Specific {
                    function_names: vec![DECISION_TOOL.to_string()],
                });
                continue;
            }

            warn!("Manager failed to produce a structured decision after retry; failing closed");
            return Decision::fail_closed(if last_text.is_empty() {
                "I was unable to route this request.".to_string()
            } else {
                last_text
            });
        }

        warn!(
            "Manager decision turn hit its step cap ({}) without a decision",
            self.max_decision_steps
        );
        Decision::fail_closed(if last_text.is_empty() {
            "I could not reach a decision within my step budget.".to_string()
        } else {
            last_text
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::decision::Route;
    use crate::testing::{decision_reply, text_reply, tool_call_reply, FakeOracle};
    use crate::tools::Tool;
    use anyhow::Result;
    use async_trait::async_trait;

    struct CannedExpert {
        name: &'static str,
        answer: &'static str,
    }

    #[async_trait]
    impl Tool for CannedExpert {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "Canned expert."
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {"question": {"type": "string"}},
                "required": ["question"]
            })
        }
        async fn execute(&self, _params: serde_json::Value) -> Result<String> {
            Ok(self.answer.to_string())
        }
    }

    fn manager_with(oracle: Arc<FakeOracle>) -> ManagerAgent {
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(CannedExpert {
            name: "ask_data_scientist",
            answer: "Partly cloudy at 18°C.",
        }));
        ManagerAgent::new(oracle, tools, 5, 0.0, 512, 1_000_000)
    }

    #[tokio::test]
    async fn direct_decision_ends_the_turn() {
        let oracle = FakeOracle::scripted(vec![decision_reply("end", "All done.")]);
        let mut manager = manager_with(oracle.clone());

        let decision = manager.decide("hello").await;
        assert_eq!(decision.route, Route::End);
        assert_eq!(decision.output, "All done.");
        assert_eq!(oracle.calls(), 1);
    }

    #[tokio::test]
    async fn delegation_result_feeds_final_decision() {
        let oracle = FakeOracle::scripted(vec![
            tool_call_reply(
                "ask_data_scientist",
                serde_json::json!({"question": "weather in Paris?"}),
            ),
            decision_reply(
                "data_scientist",
                "The current weather is Partly cloudy at 18°C.",
            ),
        ]);
        let mut manager = manager_with(oracle.clone());

        let decision = manager.decide("What's the weather in Paris?").await;
        assert_eq!(decision.route, Route::DataScientist);
        assert_eq!(
            decision.output,
            "The current weather is Partly cloudy at 18°C."
        );
        assert_eq!(oracle.calls(), 2);
    }

    #[tokio::test]
    async fn unknown_route_normalizes_to_end() {
        let oracle = FakeOracle::scripted(vec![decision_reply("intern", "odd route")]);
        let mut manager = manager_with(oracle);

        let decision = manager.decide("hi").await;
        assert_eq!(decision.route, Route::End);
    }

    #[tokio::test]
    async fn violation_corrected_on_retry_uses_corrected_decision() {
        let oracle = FakeOracle::scripted(vec![
            text_reply("Here is my answer without any structure."),
            decision_reply("end", "Structured after all."),
        ]);
        let mut manager = manager_with(oracle.clone());

        let decision = manager.decide("hi").await;
        assert_eq!(decision.route, Route::End);
        assert_eq!(decision.output, "Structured after all.");
        // The retry request must have forced the decision tool.
        assert_eq!(oracle.forced_flags(), vec![false, true]);
    }

    #[tokio::test]
    async fn persistent_violation_fails_closed_with_raw_text() {
        let oracle = FakeOracle::scripted(vec![
            text_reply("free text one"),
            text_reply("free text two"),
        ]);
        let mut manager = manager_with(oracle);

        let decision = manager.decide("hi").await;
        assert_eq!(decision.route, Route::End);
        assert_eq!(decision.output, "free text two");
    }

    #[tokio::test]
    async fn oracle_failure_fails_closed() {
        let mut manager = manager_with(FakeOracle::failing());
        let decision = manager.decide("hi").await;
        assert_eq!(decision.route, Route::End);
        assert!(decision.output.contains("internal problem"));
    }

    #[tokio::test]
    async fn step_cap_fails_closed() {
        // The model delegates forever and never decides.
        let replies = (0..8)
            .map(|_| {
                tool_call_reply(
                    "ask_data_scientist",
                    serde_json::json!({"question": "again"}),
                )
            })
            .collect();
        let mut manager = manager_with(FakeOracle::scripted(replies));

        let decision = manager.decide("hi").await;
        assert_eq!(decision.route, Route::End);
    }

    #[tokio::test]
    async fn decisions_are_recorded_in_memory() {
        let oracle = FakeOracle::scripted(vec![decision_reply("end", "Done.")]);
        let mut manager = manager_with(oracle);

        manager.decide("first question").await;
        let history = manager.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "first question");
        assert_eq!(history[1].content, "Done.");
    }
}
