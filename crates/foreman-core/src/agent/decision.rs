use rig::completion::ToolDefinition;
use serde::{Deserialize, Serialize};

/// Name of the tool the manager must call to end its decision turn.
pub const DECISION_TOOL: &str = "route_decision";

/// The two expert roles the manager can delegate to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specialist {
    DataScientist,
    BusinessAnalyst,
}

impl Specialist {
    pub fn all() -> [Specialist; 2] {
        [Specialist::DataScientist, Specialist::BusinessAnalyst]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Specialist::DataScientist => "data_scientist",
            Specialist::BusinessAnalyst => "business_analyst",
        }
    }

    /// Name of the manager-side tool that asks this expert a question.
    pub fn tool_name(&self) -> &'static str {
        match self {
            Specialist::DataScientist => "ask_data_scientist",
            Specialist::BusinessAnalyst => "ask_business_analyst",
        }
    }
}

impl std::fmt::Display for Specialist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The routing signal chosen by the manager each iteration.
///
/// The raw value arrives as an untrusted string from the oracle; it is
/// normalized into this closed enum at the boundary and never compared as a
/// string deeper in the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Route {
    DataScientist,
    BusinessAnalyst,
    #[default]
    End,
}

impl Route {
    /// Normalize an untrusted routing string. Anything unrecognized
    /// terminates the loop rather than crashing it.
    pub fn normalize(raw: &str) -> Route {
        match raw.trim() {
            "data_scientist" => Route::DataScientist,
            "business_analyst" => Route::BusinessAnalyst,
            _ => Route::End,
        }
    }

    pub fn specialist(self) -> Option<Specialist> {
        match self {
            Route::DataScientist => Some(Specialist::DataScientist),
            Route::BusinessAnalyst => Some(Specialist::BusinessAnalyst),
            Route::End => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Route::DataScientist => "data_scientist",
            Route::BusinessAnalyst => "business_analyst",
            Route::End => "end",
        }
    }
}

/// A decision-shape protocol violation.
#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    #[error("decision arguments are not an object")]
    NotAnObject,
    #[error("decision is missing the `route` field")]
    MissingRoute,
    #[error("decision is missing the `output` field")]
    MissingOutput,
}

/// One routing decision: where to go next and what to tell the user.
/// This is the only channel through which the loop learns what to do.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub route: Route,
    pub output: String,
}

impl Decision {
    /// Parse a decision from the `route_decision` tool-call arguments.
    pub fn from_args(args: &serde_json::Value) -> Result<Decision, DecisionError> {
        let obj = args.as_object().ok_or(DecisionError::NotAnObject)?;
        let route = obj
            .get("route")
            .and_then(|r| r.as_str())
            .ok_or(DecisionError::MissingRoute)?;
        let output = obj
            .get("output")
            .and_then(|o| o.as_str())
            .ok_or(DecisionError::MissingOutput)?;
        Ok(Decision {
            route: Route::normalize(route),
            output: output.to_string(),
        })
    }

    /// Terminal decision used when the protocol breaks down: the loop ends
    /// and the given text is surfaced to the user.
    pub fn fail_closed(output: impl Into<String>) -> Decision {
        Decision {
            route: Route::End,
            output: output.into(),
        }
    }
}

/// Definition of the `route_decision` tool the manager must call.
pub fn decision_tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: DECISION_TOOL.to_string(),
        description: "Finish the turn. Set `route` to the expert consulted for this step, \
                      or `end` when the answer is complete. `output` is the message shown \
                      to the user."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "route": {
                    "type": "string",
                    "enum": ["data_scientist", "business_analyst", "end"],
                    "description": "Where to delegate next."
                },
                "output": {
                    "type": "string",
                    "description": "Message to give back to the user."
                }
            },
            "required": ["route", "output"]
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_routes_normalize() {
        assert_eq!(Route::normalize("data_scientist"), Route::DataScientist);
        assert_eq!(Route::normalize("business_analyst"), Route::BusinessAnalyst);
        assert_eq!(Route::normalize("end"), Route::End);
    }

    #[test]
    fn unknown_routes_normalize_to_end() {
        assert_eq!(Route::normalize("manager"), Route::End);
        assert_eq!(Route::normalize(""), Route::End);
        assert_eq!(Route::normalize("DATA_SCIENTIST"), Route::End);
    }

    #[test]
    fn decision_parses_from_args() {
        let args = serde_json::json!({"route": "data_scientist", "output": "working on it"});
        let decision = Decision::from_args(&args).unwrap();
        assert_eq!(decision.route, Route::DataScientist);
        assert_eq!(decision.output, "working on it");
    }

    #[test]
    fn missing_fields_are_violations() {
        assert!(matches!(
            Decision::from_args(&serde_json::json!({"output": "x"})),
            Err(DecisionError::MissingRoute)
        ));
        assert!(matches!(
            Decision::from_args(&serde_json::json!({"route": "end"})),
            Err(DecisionError::MissingOutput)
        ));
        assert!(matches!(
            Decision::from_args(&serde_json::json!("text")),
            Err(DecisionError::NotAnObject)
        ));
    }

    #[test]
    fn specialist_round_trip() {
        for s in Specialist::all() {
            assert_eq!(Route::normalize(s.as_str()).specialist(), Some(s));
        }
    }
}
