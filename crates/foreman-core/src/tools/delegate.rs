use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::agent::decision::Specialist;
use crate::agent::specialist::SpecialistAgent;
use crate::tools::Tool;

/// Exposes a specialist agent as a callable tool for the manager's
/// decision turn: one question in, one answer string out.
///
/// The specialist's own conversation memory stays private; only the answer
/// crosses this boundary.
pub struct AskSpecialistTool {
    role: Specialist,
    specialist: Arc<Mutex<SpecialistAgent>>,
}

impl AskSpecialistTool {
    pub fn new(role: Specialist, specialist: Arc<Mutex<SpecialistAgent>>) -> Self {
        Self { role, specialist }
    }
}

#[async_trait]
impl Tool for AskSpecialistTool {
    fn name(&self) -> &str {
        self.role.tool_name()
    }

    fn description(&self) -> &str {
        match self.role {
            Specialist::DataScientist => {
                "Ask data-science questions: analysis, modeling, trends, or anything technical."
            }
            Specialist::BusinessAnalyst => {
                "Ask business questions: pricing, strategy, or market insights."
            }
        }
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The question to put to this expert"
                }
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let question = params
            .get("question")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing required parameter: question"))?;

        let mut specialist = self.specialist.lock().await;
        Ok(specialist.ask(question).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::specialist::SpecialistAgent;
    use crate::testing::{text_reply, FakeOracle};
    use crate::tools::ToolRegistry;

    fn make_tool(replies: Vec<rig::OneOrMany<rig::message::AssistantContent>>) -> AskSpecialistTool {
        let specialist = SpecialistAgent::new(
            Specialist::DataScientist,
            FakeOracle::scripted(replies),
            ToolRegistry::new(),
            4,
            0.0,
            512,
            1_000_000,
        );
        AskSpecialistTool::new(
            Specialist::DataScientist,
            Arc::new(Mutex::new(specialist)),
        )
    }

    #[tokio::test]
    async fn answer_passes_through() {
        let tool = make_tool(vec![text_reply("42")]);
        let out = tool
            .execute(serde_json::json!({"question": "what is 6 * 7?"}))
            .await
            .unwrap();
        assert_eq!(out, "42");
    }

    #[tokio::test]
    async fn names_follow_the_role() {
        let tool = make_tool(vec![]);
        assert_eq!(tool.name(), "ask_data_scientist");
    }

    #[tokio::test]
    async fn missing_question_is_an_error() {
        let tool = make_tool(vec![]);
        assert!(tool.execute(serde_json::json!({})).await.is_err());
    }
}
