//! Scripted oracle and reply builders shared by the agent tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use rig::completion::CompletionRequest;
use rig::message::{AssistantContent, Text, ToolCall, ToolFunction};
use rig::OneOrMany;

use crate::agent::decision::DECISION_TOOL;
use crate::oracle::Oracle;

/// Oracle that replays a fixed script of replies, in order.
/// An exhausted script (or `failing()`) produces transport errors.
pub(crate) struct FakeOracle {
    replies: Mutex<VecDeque<OneOrMany<AssistantContent>>>,
    /// Whether each observed request carried a forced tool choice.
    forced: Mutex<Vec<bool>>,
    fail: bool,
}

impl FakeOracle {
    pub fn scripted(replies: Vec<OneOrMany<AssistantContent>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            forced: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            forced: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    /// Number of completion calls observed.
    pub fn calls(&self) -> usize {
        self.forced.lock().unwrap().len()
    }

    /// Per-call record of whether `tool_choice` was set.
    pub fn forced_flags(&self) -> Vec<bool> {
        self.forced.lock().unwrap().clone()
    }
}

#[async_trait]
impl Oracle for FakeOracle {
    fn model_name(&self) -> &str {
        "fake-oracle"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<OneOrMany<AssistantContent>> {
        self.forced
            .lock()
            .unwrap()
            .push(request.tool_choice.is_some());
        if self.fail {
            anyhow::bail!("simulated transport failure");
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("fake oracle script exhausted"))
    }
}

pub(crate) fn text_reply(text: &str) -> OneOrMany<AssistantContent> {
    OneOrMany::one(AssistantContent::Text(Text {
        text: text.to_string(),
    }))
}

pub(crate) fn tool_call_reply(
    name: &str,
    arguments: serde_json::Value,
) -> OneOrMany<AssistantContent> {
    OneOrMany::one(AssistantContent::ToolCall(ToolCall {
        id: format!("call-{name}"),
        call_id: None,
        function: ToolFunction {
            name: name.to_string(),
            arguments,
        },
        signature: None,
        additional_params: None,
    }))
}

pub(crate) fn decision_reply(route: &str, output: &str) -> OneOrMany<AssistantContent> {
    tool_call_reply(
        DECISION_TOOL,
        serde_json::json!({"route": route, "output": output}),
    )
}
