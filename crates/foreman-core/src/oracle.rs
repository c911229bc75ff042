use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::completion::{CompletionModel, CompletionRequest};
use rig::message::AssistantContent;
use rig::OneOrMany;

/// One reasoning-oracle turn: a completion request in, the model's content
/// parts out.
///
/// Agents depend on this trait rather than on a concrete client so a scripted
/// implementation can stand in during tests.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Model name, for logging.
    fn model_name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<OneOrMany<AssistantContent>>;
}

/// Oracle backed by a rig completion model.
#[allow(deprecated)]
pub struct RigOracle {
    handle: CompletionModelHandle<'static>,
    model_name: String,
}

#[allow(deprecated)]
impl RigOracle {
    pub fn new(handle: CompletionModelHandle<'static>, model_name: impl Into<String>) -> Self {
        Self {
            handle,
            model_name: model_name.into(),
        }
    }
}

#[allow(deprecated)]
#[async_trait]
impl Oracle for RigOracle {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<OneOrMany<AssistantContent>> {
        let response = self
            .handle
            .completion(request)
            .await
            .map_err(|e| anyhow::anyhow!("LLM completion error: {e}"))?;
        Ok(response.choice)
    }
}

/// Pool of named oracle tiers ("manager", "worker").
///
/// Unknown tier names fall back to "manager". The "manager" tier must always
/// be present — this is validated at construction time.
#[derive(Clone)]
pub struct OraclePool {
    oracles: HashMap<String, Arc<dyn Oracle>>,
}

impl OraclePool {
    pub const MANAGER_TIER: &'static str = "manager";
    pub const WORKER_TIER: &'static str = "worker";

    /// Create a new OraclePool. Panics if no "manager" tier is present.
    pub fn new(oracles: HashMap<String, Arc<dyn Oracle>>) -> Self {
        assert!(
            oracles.contains_key(Self::MANAGER_TIER),
            "OraclePool must contain a \"manager\" tier"
        );
        Self { oracles }
    }

    /// Get a specific tier. Falls back to "manager" if the tier is not found.
    pub fn get(&self, tier: &str) -> Arc<dyn Oracle> {
        self.oracles
            .get(tier)
            .or_else(|| self.oracles.get(Self::MANAGER_TIER))
            .expect("manager tier must exist")
            .clone()
    }

    pub fn manager(&self) -> Arc<dyn Oracle> {
        self.get(Self::MANAGER_TIER)
    }

    pub fn worker(&self) -> Arc<dyn Oracle> {
        self.get(Self::WORKER_TIER)
    }

    /// List all available tier names.
    pub fn tiers(&self) -> Vec<&str> {
        self.oracles.keys().map(|k| k.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeOracle;

    #[test]
    fn worker_tier_falls_back_to_manager() {
        let mut oracles: HashMap<String, Arc<dyn Oracle>> = HashMap::new();
        oracles.insert(
            OraclePool::MANAGER_TIER.to_string(),
            FakeOracle::scripted(vec![]),
        );
        let pool = OraclePool::new(oracles);
        assert_eq!(pool.worker().model_name(), pool.manager().model_name());
    }

    #[test]
    #[should_panic(expected = "manager")]
    fn missing_manager_tier_panics() {
        OraclePool::new(HashMap::new());
    }
}
