use anyhow::Result;
use async_trait::async_trait;

use super::Tool;

const SEARCH_ENDPOINT: &str = "https://api.tavily.com/search";

/// Web search via the Tavily API.
///
/// Returns the API's direct answer when it provides one, otherwise falls
/// back to the first result's content.
pub struct SearchTool {
    api_key: String,
    max_results: u32,
}

impl SearchTool {
    pub fn new(api_key: String, max_results: u32) -> Self {
        Self {
            api_key,
            max_results,
        }
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Look up current information from the internet, including weather, news, or general facts."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let query = params
            .get("query")
            .and_then(|q| q.as_str())
            .unwrap_or("")
            .to_string();

        if query.is_empty() {
            return Ok("Error: query is required".into());
        }

        if self.api_key.is_empty() {
            return Ok(
                "Error: TAVILY_API_KEY not configured. Set tools.search.apiKey in config.json \
                 or the TAVILY_API_KEY env var."
                    .into(),
            );
        }

        let client = reqwest::Client::new();
        let resp = client
            .post(SEARCH_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "query": query,
                "max_results": self.max_results,
                "include_answer": true,
            }))
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await?;

        resp.error_for_status_ref()
            .map_err(|e| anyhow::anyhow!("search API error: {e}"))?;

        let body: serde_json::Value = resp.json().await?;
        Ok(extract_answer(&body))
    }
}

/// Pull a usable answer out of a search response.
///
/// Preference order: the API's direct answer, then a structured weather
/// payload embedded in the first result's content, then the raw content.
fn extract_answer(body: &serde_json::Value) -> String {
    if let Some(answer) = body.get("answer").and_then(|a| a.as_str()) {
        if !answer.is_empty() {
            return answer.to_string();
        }
    }

    let first_content = body
        .get("results")
        .and_then(|r| r.as_array())
        .and_then(|r| r.first())
        .and_then(|f| f.get("content"))
        .and_then(|c| c.as_str());

    let Some(content) = first_content else {
        return "No valid result found.".into();
    };

    // Some result feeds pack a raw weather payload into the content field.
    if let Ok(data) = serde_json::from_str::<serde_json::Value>(content) {
        if let Some(current) = data.get("current") {
            let condition = current
                .get("condition")
                .and_then(|c| c.get("text"))
                .and_then(|t| t.as_str())
                .unwrap_or("unknown");
            if let Some(temp) = current.get("temp_c").and_then(|t| t.as_f64()) {
                return format!("The current weather is {condition} at {temp}°C.");
            }
        }
    }

    if content.is_empty() {
        "Could not extract a result.".into()
    } else {
        content.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_answer_preferred() {
        let body = serde_json::json!({
            "answer": "Partly cloudy at 18°C.",
            "results": [{"content": "ignored"}]
        });
        assert_eq!(extract_answer(&body), "Partly cloudy at 18°C.");
    }

    #[test]
    fn weather_payload_extracted_from_first_result() {
        let payload = serde_json::json!({
            "current": {
                "condition": {"text": "Partly cloudy"},
                "temp_c": 18.0
            }
        });
        let body = serde_json::json!({
            "answer": "",
            "results": [{"content": payload.to_string()}]
        });
        assert_eq!(
            extract_answer(&body),
            "The current weather is Partly cloudy at 18°C."
        );
    }

    #[test]
    fn falls_back_to_raw_content() {
        let body = serde_json::json!({
            "results": [{"content": "Paris is the capital of France."}]
        });
        assert_eq!(extract_answer(&body), "Paris is the capital of France.");
    }

    #[test]
    fn empty_response_reports_no_result() {
        let body = serde_json::json!({"results": []});
        assert_eq!(extract_answer(&body), "No valid result found.");
    }

    #[tokio::test]
    async fn missing_api_key_degrades_to_observation() {
        let tool = SearchTool::new(String::new(), 5);
        let out = tool
            .execute(serde_json::json!({"query": "weather in Paris"}))
            .await
            .unwrap();
        assert!(out.starts_with("Error: TAVILY_API_KEY"));
    }
}
