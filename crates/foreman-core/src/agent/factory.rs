use std::sync::Arc;

use tokio::sync::Mutex;

use foreman_config::Config;

use crate::agent::decision::Specialist;
use crate::agent::manager::ManagerAgent;
use crate::agent::router::Router;
use crate::agent::specialist::SpecialistAgent;
use crate::oracle::OraclePool;
use crate::tools::delegate::AskSpecialistTool;
use crate::tools::search::SearchTool;
use crate::tools::ToolRegistry;

/// Builds per-conversation routing loops.
///
/// Each conversation gets its own manager and specialists, and therefore
/// its own memories: nothing is shared between sessions, and nothing lives
/// in module-level state.
#[derive(Clone)]
pub struct RouterFactory {
    oracles: OraclePool,
    defaults: foreman_config::AgentDefaults,
    search: foreman_config::SearchConfig,
}

impl RouterFactory {
    pub fn new(oracles: OraclePool, config: &Config) -> Self {
        Self {
            oracles,
            defaults: config.agents.defaults.clone(),
            search: config.tools.search.clone(),
        }
    }

    pub fn build(&self) -> Router {
        let d = &self.defaults;
        let worker = self.oracles.worker();

        let mut manager_tools = ToolRegistry::new();
        for role in Specialist::all() {
            let specialist = SpecialistAgent::new(
                role,
                worker.clone(),
                self.specialist_tools(),
                d.max_tool_iterations as usize,
                d.temperature as f64,
                d.max_tokens as u64,
                d.memory_token_budget,
            );
            manager_tools.register(Box::new(AskSpecialistTool::new(
                role,
                Arc::new(Mutex::new(specialist)),
            )));
        }

        let manager = ManagerAgent::new(
            self.oracles.manager(),
            manager_tools,
            d.max_decision_steps as usize,
            d.temperature as f64,
            d.max_tokens as u64,
            d.memory_token_budget,
        );

        Router::new(manager, d.max_route_iterations as usize)
    }

    fn specialist_tools(&self) -> ToolRegistry {
        let api_key = if self.search.api_key.is_empty() {
            std::env::var("TAVILY_API_KEY").unwrap_or_default()
        } else {
            self.search.api_key.clone()
        };
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(SearchTool::new(api_key, self.search.max_results)));
        tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::decision::Specialist;
    use crate::oracle::Oracle;
    use crate::testing::{decision_reply, text_reply, tool_call_reply, FakeOracle};
    use std::collections::HashMap;

    fn pool(
        manager: Arc<FakeOracle>,
        worker: Arc<FakeOracle>,
    ) -> OraclePool {
        let mut oracles: HashMap<String, Arc<dyn Oracle>> = HashMap::new();
        oracles.insert(OraclePool::MANAGER_TIER.to_string(), manager);
        oracles.insert(OraclePool::WORKER_TIER.to_string(), worker);
        OraclePool::new(oracles)
    }

    #[tokio::test]
    async fn factory_wires_a_full_two_level_turn() {
        // Manager tier: delegate to the data scientist, report the route,
        // then finish on the next loop iteration.
        let manager_oracle = FakeOracle::scripted(vec![
            tool_call_reply(
                "ask_data_scientist",
                serde_json::json!({"question": "What's the weather in Paris?"}),
            ),
            decision_reply(
                "data_scientist",
                "The current weather is Partly cloudy at 18°C.",
            ),
            decision_reply("end", "Let me know if you need anything else."),
        ]);
        // Worker tier: the specialist answers without touching its tools.
        let worker_oracle = FakeOracle::scripted(vec![text_reply("Partly cloudy at 18°C.")]);

        let factory = RouterFactory::new(
            pool(manager_oracle, worker_oracle.clone()),
            &Config::default(),
        );
        let mut router = factory.build();

        let reply = router.handle("What's the weather in Paris?").await;
        assert_eq!(reply.output, "Let me know if you need anything else.");
        assert_eq!(reply.intermediate_steps.len(), 1);
        assert_eq!(reply.intermediate_steps[0].role, Specialist::DataScientist);
        assert_eq!(
            reply.intermediate_steps[0].response,
            "The current weather is Partly cloudy at 18°C."
        );
        // The specialist's oracle was consulted exactly once.
        assert_eq!(worker_oracle.calls(), 1);
    }

    #[tokio::test]
    async fn each_build_gets_fresh_agents() {
        let factory = RouterFactory::new(
            pool(
                FakeOracle::scripted(vec![decision_reply("end", "a")]),
                FakeOracle::scripted(vec![]),
            ),
            &Config::default(),
        );
        let mut first = factory.build();
        let _second = factory.build();

        let reply = first.handle("hi").await;
        assert_eq!(reply.output, "a");
    }
}
