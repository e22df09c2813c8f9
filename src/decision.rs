//! One structured orchestrator call per turn: which pre-steps to run and which
//! twists the narrator should consider. Primary provider, then exactly one
//! fallback attempt, then a safe empty decision.

use crate::agents::{ORCHESTRATOR_PREAMBLE, system_prompt};
use crate::error::DecisionError;
use crate::message::{ChatMessage, recent};
use crate::provider::{LanguageModel, ObjectRequest, Usage};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;

pub const ORCHESTRATOR_FAILED: &str = "orchestrator failed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PreStep {
    WorldAdvance { description: String },
    FactionTurn { faction: String, situation: String },
}

impl fmt::Display for PreStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreStep::WorldAdvance { description } => write!(f, "World advance: {description}"),
            PreStep::FactionTurn { faction, .. } => write!(f, "Faction turn: {faction}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Twist {
    pub situation: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Decision {
    pub pre_steps: Vec<PreStep>,
    pub suggested_twists: Vec<Twist>,
    pub reasoning: String,
}

impl Decision {
    pub fn fallback(detail: impl fmt::Display) -> Self {
        Self {
            pre_steps: Vec::new(),
            suggested_twists: Vec::new(),
            reasoning: format!("{ORCHESTRATOR_FAILED}: {detail}"),
        }
    }

    pub fn from_value(value: Value) -> Result<Self, DecisionError> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Strict JSON schema for structured output. Every property is required and no
/// extra keys are allowed, at every level.
pub fn decision_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["preSteps", "suggestedTwists", "reasoning"],
        "properties": {
            "preSteps": {
                "type": "array",
                "items": {
                    "anyOf": [
                        {
                            "type": "object",
                            "additionalProperties": false,
                            "required": ["type", "description"],
                            "properties": {
                                "type": { "type": "string", "enum": ["world_advance"] },
                                "description": { "type": "string" }
                            }
                        },
                        {
                            "type": "object",
                            "additionalProperties": false,
                            "required": ["type", "faction", "situation"],
                            "properties": {
                                "type": { "type": "string", "enum": ["faction_turn"] },
                                "faction": { "type": "string" },
                                "situation": { "type": "string" }
                            }
                        }
                    ]
                }
            },
            "suggestedTwists": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["situation", "reason"],
                    "properties": {
                        "situation": { "type": "string" },
                        "reason": { "type": "string" }
                    }
                }
            },
            "reasoning": { "type": "string" }
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    Primary,
    Fallback,
    Default,
}

#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub decision: Decision,
    pub usage: Usage,
    pub source: DecisionSource,
}

pub struct DecisionEngine {
    primary: Arc<dyn LanguageModel>,
    fallback: Option<Arc<dyn LanguageModel>>,
    history_window: usize,
}

impl DecisionEngine {
    pub fn new(primary: Arc<dyn LanguageModel>, fallback: Option<Arc<dyn LanguageModel>>) -> Self {
        Self {
            primary,
            fallback,
            history_window: 12,
        }
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window.max(1);
        self
    }

    /// Never fails: the worst case is an empty decision whose reasoning starts
    /// with [`ORCHESTRATOR_FAILED`].
    pub async fn decide(&self, game_system: &str, messages: &[ChatMessage]) -> DecisionOutcome {
        let request = ObjectRequest {
            system: system_prompt(ORCHESTRATOR_PREAMBLE, game_system),
            messages: recent(messages, self.history_window),
            schema_name: "decision".to_string(),
            schema: decision_schema(),
        };

        let primary_error = match attempt(self.primary.as_ref(), request.clone()).await {
            Ok((decision, usage)) => {
                return DecisionOutcome {
                    decision,
                    usage,
                    source: DecisionSource::Primary,
                };
            }
            Err(e) => {
                log::warn!("Orchestrator call on {} failed: {e}", self.primary.name());
                e
            }
        };

        let Some(fallback) = &self.fallback else {
            return DecisionOutcome {
                decision: Decision::fallback(primary_error),
                usage: Usage::default(),
                source: DecisionSource::Default,
            };
        };

        match attempt(fallback.as_ref(), request).await {
            Ok((decision, usage)) => {
                log::info!("Orchestrator recovered on {}", fallback.name());
                DecisionOutcome {
                    decision,
                    usage,
                    source: DecisionSource::Fallback,
                }
            }
            Err(e) => {
                log::error!("Orchestrator fallback on {} failed too: {e}", fallback.name());
                DecisionOutcome {
                    decision: Decision::fallback(format!("{primary_error}; fallback: {e}")),
                    usage: Usage::default(),
                    source: DecisionSource::Default,
                }
            }
        }
    }
}

async fn attempt(
    model: &dyn LanguageModel,
    request: ObjectRequest,
) -> Result<(Decision, Usage), DecisionError> {
    let response = model.generate_object(request).await?;
    let decision = Decision::from_value(response.value)?;
    log::debug!(
        "Orchestrator chose {} pre-steps, {} twists",
        decision.pre_steps.len(),
        decision.suggested_twists.len()
    );
    Ok((decision, response.usage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Reply, ScriptedModel};

    fn valid() -> Value {
        json!({
            "preSteps": [
                {"type": "world_advance", "description": "Night falls over the harbor"},
                {"type": "faction_turn", "faction": "Lamplighters", "situation": "a rival smuggler docked"}
            ],
            "suggestedTwists": [{"situation": "bribing the guard", "reason": "he is loyal but poor"}],
            "reasoning": "the clock struck midnight"
        })
    }

    #[test]
    fn parses_tagged_steps_and_rejects_unknown_keys() {
        let decision = Decision::from_value(valid()).unwrap();
        assert_eq!(
            decision.pre_steps[1],
            PreStep::FactionTurn {
                faction: "Lamplighters".into(),
                situation: "a rival smuggler docked".into()
            }
        );

        let mut extra = valid();
        extra["mood"] = json!("grim");
        assert!(Decision::from_value(extra).is_err());

        let bad_variant = json!({
            "preSteps": [{"type": "faction_turn", "faction": "Lamplighters"}],
            "suggestedTwists": [],
            "reasoning": ""
        });
        assert!(Decision::from_value(bad_variant).is_err());

        let unknown_tag = json!({
            "preSteps": [{"type": "weather", "description": "rain"}],
            "suggestedTwists": [],
            "reasoning": ""
        });
        assert!(Decision::from_value(unknown_tag).is_err());
    }

    #[tokio::test]
    async fn primary_success() {
        let primary = Arc::new(ScriptedModel::new("primary", vec![Reply::Object(valid())]));
        let engine = DecisionEngine::new(primary, None);
        let outcome = engine.decide("", &[ChatMessage::user("I wait")]).await;
        assert_eq!(outcome.source, DecisionSource::Primary);
        assert_eq!(outcome.decision.pre_steps.len(), 2);
        assert_eq!(outcome.usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn invalid_primary_object_falls_back_once() {
        let primary = Arc::new(ScriptedModel::new(
            "primary",
            vec![Reply::Object(json!({"preSteps": "none"}))],
        ));
        let fallback = Arc::new(ScriptedModel::new("fallback", vec![Reply::Object(valid())]));
        let engine = DecisionEngine::new(primary, Some(fallback.clone()));

        let outcome = engine.decide("", &[ChatMessage::user("I wait")]).await;
        assert_eq!(outcome.source, DecisionSource::Fallback);
        assert_eq!(outcome.decision.reasoning, "the clock struck midnight");
        assert_eq!(fallback.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn both_providers_failing_yields_safe_default() {
        let primary = Arc::new(ScriptedModel::new("primary", vec![Reply::Fail("timeout")]));
        let fallback = Arc::new(ScriptedModel::new(
            "fallback",
            vec![Reply::Fail("overloaded"), Reply::Object(valid())],
        ));
        let engine = DecisionEngine::new(primary, Some(fallback.clone()));

        let outcome = engine.decide("", &[ChatMessage::user("I wait")]).await;
        assert_eq!(outcome.source, DecisionSource::Default);
        assert!(outcome.decision.pre_steps.is_empty());
        assert!(outcome.decision.suggested_twists.is_empty());
        assert!(outcome.decision.reasoning.starts_with(ORCHESTRATOR_FAILED));
        assert!(outcome.decision.reasoning.contains("timeout"));
        assert!(outcome.decision.reasoning.contains("overloaded"));
        assert_eq!(fallback.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn only_recent_history_is_sent() {
        let primary = Arc::new(ScriptedModel::new("primary", vec![Reply::Object(valid())]));
        let engine = DecisionEngine::new(primary.clone(), None).with_history_window(2);
        let history: Vec<_> = (0..6).map(|i| ChatMessage::user(format!("m{i}"))).collect();
        engine.decide("Setting: a drowned city", &history).await;

        let requests = primary.requests.lock().unwrap();
        assert_eq!(requests[0].messages.len(), 2);
        assert_eq!(requests[0].messages[0].text(), "m4");
        assert!(requests[0].system.contains("a drowned city"));
    }
}
