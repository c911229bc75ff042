use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::agent::decision::{Route, Specialist};
use crate::agent::manager::ManagerAgent;
use crate::agent::memory::{Turn, TurnRole};

/// One delegation record, surfaced to the presentation layer as part of
/// the turn's trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub role: Specialist,
    pub response: String,
}

/// The unit of work threaded through the routing loop. Created fresh per
/// incoming user message and discarded once the loop terminates.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub input: String,
    pub output: String,
    pub route: Route,
    /// Append-only from the loop's perspective; the manager's memory may
    /// compact it internally.
    pub chat_history: Vec<Turn>,
    pub intermediate_steps: Vec<TraceStep>,
}

impl ConversationState {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: String::new(),
            route: Route::End,
            chat_history: Vec::new(),
            intermediate_steps: Vec::new(),
        }
    }
}

/// What the presentation boundary receives: the final output plus the
/// ordered trace of delegations.
#[derive(Debug, Clone)]
pub struct RouterReply {
    pub output: String,
    pub intermediate_steps: Vec<TraceStep>,
}

/// The routing control loop: an explicit two-state machine (deciding /
/// done) driven solely by the structured `route` signal.
///
/// Each iteration re-invokes the manager with the SAME input — the manager
/// re-evaluates with the delegated answer already in its context, since the
/// specialist call happened inside the decision turn. The loop carries a
/// configurable iteration ceiling and fails closed when it is reached.
pub struct Router {
    manager: ManagerAgent,
    max_iterations: usize,
}

impl Router {
    pub fn new(manager: ManagerAgent, max_iterations: usize) -> Self {
        Self {
            manager,
            max_iterations: max_iterations.max(1),
        }
    }

    /// Seed the manager's memory from externally persisted history.
    pub fn seed_history(&mut self, turns: &[(TurnRole, String)]) {
        self.manager.seed_history(turns);
    }

    /// Run one user message through the loop until the manager routes to
    /// `end` (or the ceiling forces termination).
    pub async fn handle(&mut self, input: &str) -> RouterReply {
        let mut state = ConversationState::new(input);

        for iteration in 1..=self.max_iterations {
            let decision = self.manager.decide(&state.input).await;

            state.output = decision.output;
            state.route = decision.route;
            state.chat_history = self.manager.history().to_vec();

            match state.route.specialist() {
                None => {
                    debug!("Routing loop finished after {iteration} iteration(s)");
                    return Self::finish(state);
                }
                Some(role) => {
                    debug!(
                        "Routing loop iteration {iteration}: delegated to {}",
                        role.as_str()
                    );
                    state.intermediate_steps.push(TraceStep {
                        role,
                        response: state.output.clone(),
                    });
                }
            }
        }

        warn!(
            "Routing loop hit its iteration ceiling ({}); forcing termination",
            self.max_iterations
        );
        state.route = Route::End;
        Self::finish(state)
    }

    fn finish(state: ConversationState) -> RouterReply {
        RouterReply {
            output: state.output,
            intermediate_steps: state.intermediate_steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{decision_reply, tool_call_reply, FakeOracle};
    use crate::tools::{Tool, ToolRegistry};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct CannedExpert {
        name: &'static str,
        answer: String,
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
            Ok(self.answer.clone())
        }
    }

    fn router_with(oracle: Arc<FakeOracle>, max_iterations: usize) -> Router {
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(CannedExpert {
            name: "ask_data_scientist",
            answer: "Partly cloudy at 18°C.".into(),
        }));
        tools.register(Box::new(CannedExpert {
            name: "ask_business_analyst",
            answer: "Price it at $49/mo.".into(),
        }));
        let manager = ManagerAgent::new(oracle, tools, 5, 0.0, 512, 1_000_000);
        Router::new(manager, max_iterations)
    }

    #[tokio::test]
    async fn immediate_end_is_one_iteration_with_empty_trace() {
        let oracle = FakeOracle::scripted(vec![decision_reply("end", "Direct answer.")]);
        let mut router = router_with(oracle.clone(), 8);

        let reply = router.handle("hello").await;
        assert_eq!(reply.output, "Direct answer.");
        assert!(reply.intermediate_steps.is_empty());
        // One decision turn -> one oracle call.
        assert_eq!(oracle.calls(), 1);
    }

    #[tokio::test]
    async fn delegate_then_end_yields_one_trace_entry() {
        let oracle = FakeOracle::scripted(vec![
            // Iteration 1: consult the data scientist, then report the route.
            tool_call_reply(
                "ask_data_scientist",
                serde_json::json!({"question": "weather in Paris?"}),
            ),
            decision_reply(
                "data_scientist",
                "The current weather is Partly cloudy at 18°C.",
            ),
            // Iteration 2: done.
            decision_reply("end", "Anything else?"),
        ]);
        let mut router = router_with(oracle, 8);

        let reply = router.handle("What's the weather in Paris?").await;
        assert_eq!(reply.output, "Anything else?");
        assert_eq!(reply.intermediate_steps.len(), 1);
        assert_eq!(
            reply.intermediate_steps[0],
            TraceStep {
                role: Specialist::DataScientist,
                response: "The current weather is Partly cloudy at 18°C.".into(),
            }
        );
    }

    #[tokio::test]
    async fn trace_grows_once_per_non_end_iteration_in_order() {
        let oracle = FakeOracle::scripted(vec![
            decision_reply("data_scientist", "numbers gathered"),
            decision_reply("business_analyst", "pricing considered"),
            decision_reply("end", "final"),
        ]);
        let mut router = router_with(oracle, 8);

        let reply = router.handle("plan a launch").await;
        assert_eq!(reply.intermediate_steps.len(), 2);
        assert_eq!(
            reply.intermediate_steps[0].role,
            Specialist::DataScientist
        );
        assert_eq!(
            reply.intermediate_steps[1].role,
            Specialist::BusinessAnalyst
        );
    }

    #[tokio::test]
    async fn unknown_route_is_treated_as_end() {
        let oracle = FakeOracle::scripted(vec![decision_reply("supervisor", "mystery route")]);
        let mut router = router_with(oracle, 8);

        let reply = router.handle("hi").await;
        assert_eq!(reply.output, "mystery route");
        assert!(reply.intermediate_steps.is_empty());
    }

    #[tokio::test]
    async fn failed_specialist_answer_still_reaches_the_trace() {
        // The specialist tool's failure text comes back through the manager
        // like any normal answer.
        let oracle = FakeOracle::scripted(vec![
            decision_reply(
                "data_scientist",
                "The data scientist could not complete this request: connection refused",
            ),
            decision_reply("end", "Sorry about that."),
        ]);
        let mut router = router_with(oracle, 8);

        let reply = router.handle("look this up").await;
        assert_eq!(reply.intermediate_steps.len(), 1);
        assert!(reply.intermediate_steps[0]
            .response
            .contains("connection refused"));
    }

    #[tokio::test]
    async fn iteration_ceiling_fails_closed_with_best_known_output() {
        // A manager that never routes to end.
        let replies = (0..10)
            .map(|i| decision_reply("data_scientist", &format!("still working ({i})")))
            .collect();
        let mut router = router_with(FakeOracle::scripted(replies), 3);

        let reply = router.handle("never ends").await;
        assert_eq!(reply.output, "still working (2)");
        assert_eq!(reply.intermediate_steps.len(), 3);
    }

    #[tokio::test]
    async fn oracle_failure_degrades_to_explanatory_output() {
        let mut router = router_with(FakeOracle::failing(), 8);
        let reply = router.handle("hi").await;
        assert!(reply.output.contains("internal problem"));
        assert!(reply.intermediate_steps.is_empty());
    }
}
