//! Plain-language explanations for a single policy delta.
//!
//! The text comes from an external language model through [`TextGenerator`] and is
//! stored through [`ExplanationCache`]. Once an explanation exists for a delta it is
//! returned as-is and the generator is not called again. Generator failures and
//! unusable responses degrade to a fixed template; they never reach the caller.

use std::future::Future;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::deltas::PolicyDelta;

pub const UNAVAILABLE_EXPLANATION: &str = "Unable to generate explanation.";

pub const FALLBACK_REASONS: [&str; 3] = [
    "Policy renewal with updated rates",
    "Changes in coverage or risk factors",
    "Market conditions or regulatory changes",
];

static JSON_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{[^}]+\}").expect("valid JSON block pattern"));

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("no language model is configured")]
    Unconfigured,
    #[error("language model request failed: {0}")]
    Transport(String),
    #[error("language model returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("language model response had no text")]
    EmptyResponse,
}

/// Anything that turns a prompt into text.
pub trait TextGenerator {
    fn generate(&self, prompt: &str) -> impl Future<Output = Result<String, GenerationError>> + Send;
}

/// Storage for generated explanations, keyed by delta id.
pub trait ExplanationCache {
    type Error;

    fn find(
        &self,
        delta_id: Uuid,
    ) -> impl Future<Output = Result<Option<DeltaExplanation>, Self::Error>> + Send;

    /// Last write wins when two requests race on the same delta.
    fn store(
        &self,
        explanation: &DeltaExplanation,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// A cached explanation. At most one per delta; never edited after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeltaExplanation {
    pub delta_id: Uuid,
    pub explanation: String,
    pub possible_reasons: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// What the caller gets back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Explanation {
    pub explanation: String,
    pub possible_reasons: Vec<String>,
}

impl From<DeltaExplanation> for Explanation {
    fn from(cached: DeltaExplanation) -> Self {
        Explanation {
            explanation: cached.explanation,
            possible_reasons: cached.possible_reasons,
        }
    }
}

/// Policy attributes quoted in the prompt.
#[derive(Debug, Clone, Default)]
pub struct PolicyContext {
    pub policy_type: Option<String>,
    pub carrier: Option<String>,
}

pub fn build_prompt(policy: &PolicyContext, delta: &PolicyDelta) -> String {
    let policy_type = policy.policy_type.as_deref().unwrap_or("None");
    let carrier = policy.carrier.as_deref().unwrap_or("None");
    let field_label = delta.field_key.label();
    let old_value = delta.old_value.as_deref().unwrap_or("not set");
    let new_value = delta.new_value.as_deref().unwrap_or("removed");

    format!(
        r#"A user's insurance policy has changed. Explain this change in simple, helpful terms.

Policy type: {policy_type}
Carrier: {carrier}
Change: The {field_label} changed from {old_value} to {new_value}.
Change type: {delta_type}
Severity: {severity}

Please provide:
1. A brief explanation of what this change means for the policyholder (2-3 sentences)
2. Three possible reasons why this change might have occurred

Format your response as JSON:
{{"explanation": "...", "possible_reasons": ["reason 1", "reason 2", "reason 3"]}}
"#,
        delta_type = delta.delta_type,
        severity = delta.severity,
    )
}

/// Deterministic explanation used whenever the model is unavailable or unusable.
pub fn fallback(delta: &PolicyDelta) -> Explanation {
    Explanation {
        explanation: format!(
            "Your {} has {}. This may affect your coverage or costs.",
            delta.field_key.label(),
            delta.delta_type
        ),
        possible_reasons: FALLBACK_REASONS.iter().map(|r| r.to_string()).collect(),
    }
}

/// Pull the first brace-delimited block out of a model response.
///
/// `None` means the block was present but not valid JSON. A response with no block
/// at all is used verbatim as the explanation.
pub fn parse_response(response: &str) -> Option<Explanation> {
    let Some(block) = JSON_BLOCK.find(response) else {
        return Some(Explanation {
            explanation: response.trim().to_string(),
            possible_reasons: Vec::new(),
        });
    };

    let parsed: serde_json::Value = serde_json::from_str(block.as_str()).ok()?;
    let explanation = parsed
        .get("explanation")
        .and_then(|v| v.as_str())
        .unwrap_or(UNAVAILABLE_EXPLANATION)
        .to_string();
    let possible_reasons = parsed
        .get("possible_reasons")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();

    Some(Explanation {
        explanation,
        possible_reasons,
    })
}

/// Explain a delta, generating and caching the text on first request.
///
/// Only cache errors propagate; everything on the generation side falls back.
pub async fn explain<G, C>(
    generator: &G,
    cache: &C,
    policy: &PolicyContext,
    delta: &PolicyDelta,
) -> Result<Explanation, C::Error>
where
    G: TextGenerator,
    C: ExplanationCache,
{
    if let Some(cached) = cache.find(delta.id).await? {
        tracing::debug!(delta_id = %delta.id, "explanation cache hit");
        return Ok(cached.into());
    }

    let prompt = build_prompt(policy, delta);
    let result = match generator.generate(&prompt).await {
        Ok(response) => parse_response(&response).unwrap_or_else(|| {
            tracing::warn!(delta_id = %delta.id, "explanation response was not valid JSON");
            fallback(delta)
        }),
        Err(err) => {
            tracing::warn!(delta_id = %delta.id, error = %err, "explanation generation failed");
            fallback(delta)
        }
    };

    cache
        .store(&DeltaExplanation {
            delta_id: delta.id,
            explanation: result.explanation.clone(),
            possible_reasons: result.possible_reasons.clone(),
            created_at: Utc::now(),
        })
        .await?;

    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::convert::Infallible;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::deltas::{DeltaType, Severity};
    use crate::policy::TrackedField;

    struct ScriptedGenerator {
        reply: Result<&'static str, ()>,
        calls: AtomicUsize,
    }

    impl ScriptedGenerator {
        fn replying(reply: &'static str) -> Self {
            Self {
                reply: Ok(reply),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err(()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply
                .map(str::to_string)
                .map_err(|_| GenerationError::Transport("connection reset".to_string()))
        }
    }

    #[derive(Default)]
    struct MemoryCache {
        rows: Mutex<HashMap<Uuid, DeltaExplanation>>,
    }

    impl ExplanationCache for MemoryCache {
        type Error = Infallible;

        async fn find(&self, delta_id: Uuid) -> Result<Option<DeltaExplanation>, Infallible> {
            Ok(self.rows.lock().unwrap().get(&delta_id).cloned())
        }

        async fn store(&self, explanation: &DeltaExplanation) -> Result<(), Infallible> {
            self.rows
                .lock()
                .unwrap()
                .insert(explanation.delta_id, explanation.clone());
            Ok(())
        }
    }

    fn premium_delta() -> PolicyDelta {
        PolicyDelta {
            id: Uuid::now_v7(),
            policy_id: Uuid::now_v7(),
            document_id: None,
            field_key: TrackedField::PremiumAmount,
            old_value: Some("1000".to_string()),
            new_value: Some("1250".to_string()),
            delta_type: DeltaType::Increased,
            severity: Severity::Critical,
            is_acknowledged: false,
            created_at: Utc::now(),
        }
    }

    fn context() -> PolicyContext {
        PolicyContext {
            policy_type: Some("auto".to_string()),
            carrier: Some("Acme Mutual".to_string()),
        }
    }

    const GOOD_REPLY: &str = r#"Sure! {"explanation": "Your premium went up by 25%.", "possible_reasons": ["Rate filing", "Claims history", "Inflation"]} Hope that helps."#;

    #[test]
    fn prompt_embeds_policy_and_change() {
        let mut delta = premium_delta();
        delta.old_value = None;
        let prompt = build_prompt(&context(), &delta);
        assert!(prompt.contains("Policy type: auto"));
        assert!(prompt.contains("Carrier: Acme Mutual"));
        assert!(prompt.contains("The premium changed from not set to 1250."));
        assert!(prompt.contains("Change type: increased"));
        assert!(prompt.contains("Severity: critical"));
        assert!(prompt.contains(r#"{"explanation": "...""#));
    }

    #[test]
    fn parse_takes_first_brace_block() {
        let parsed = parse_response(GOOD_REPLY).unwrap();
        assert_eq!(parsed.explanation, "Your premium went up by 25%.");
        assert_eq!(
            parsed.possible_reasons,
            vec!["Rate filing", "Claims history", "Inflation"]
        );
    }

    #[test]
    fn parse_without_block_uses_trimmed_text() {
        let parsed = parse_response("  The premium rose.\n").unwrap();
        assert_eq!(parsed.explanation, "The premium rose.");
        assert!(parsed.possible_reasons.is_empty());
    }

    #[test]
    fn parse_invalid_block_is_none() {
        assert_eq!(parse_response("{explanation: nope}"), None);
    }

    #[test]
    fn parse_missing_explanation_key_uses_placeholder() {
        let parsed = parse_response(r#"{"possible_reasons": ["a"]}"#).unwrap();
        assert_eq!(parsed.explanation, UNAVAILABLE_EXPLANATION);
        assert_eq!(parsed.possible_reasons, vec!["a"]);
    }

    #[test]
    fn fallback_names_field_and_change() {
        let result = fallback(&premium_delta());
        assert_eq!(
            result.explanation,
            "Your premium has increased. This may affect your coverage or costs."
        );
        assert_eq!(result.possible_reasons.len(), 3);
    }

    #[tokio::test]
    async fn second_call_hits_cache_without_generating() {
        let generator = ScriptedGenerator::replying(GOOD_REPLY);
        let cache = MemoryCache::default();
        let delta = premium_delta();

        let first = explain(&generator, &cache, &context(), &delta).await.unwrap();
        let second = explain(&generator, &cache, &context(), &delta).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn generator_failure_falls_back_and_is_cached() {
        let generator = ScriptedGenerator::failing();
        let cache = MemoryCache::default();
        let delta = premium_delta();

        let result = explain(&generator, &cache, &context(), &delta).await.unwrap();
        assert_eq!(result, fallback(&delta));

        let stored = cache.find(delta.id).await.unwrap().unwrap();
        assert_eq!(stored.explanation, result.explanation);
        assert_eq!(stored.possible_reasons, result.possible_reasons);
    }

    #[tokio::test]
    async fn malformed_json_falls_back() {
        let generator = ScriptedGenerator::replying("{not json at all}");
        let cache = MemoryCache::default();
        let delta = premium_delta();

        let result = explain(&generator, &cache, &context(), &delta).await.unwrap();
        assert_eq!(result, fallback(&delta));
    }

    #[tokio::test]
    async fn existing_row_is_returned_untouched() {
        let generator = ScriptedGenerator::replying(GOOD_REPLY);
        let cache = MemoryCache::default();
        let delta = premium_delta();
        let stored = DeltaExplanation {
            delta_id: delta.id,
            explanation: "Cached text".to_string(),
            possible_reasons: vec![],
            created_at: Utc::now(),
        };
        cache.store(&stored).await.unwrap();

        let result = explain(&generator, &cache, &context(), &delta).await.unwrap();
        assert_eq!(result.explanation, "Cached text");
        assert!(result.possible_reasons.is_empty());
        assert_eq!(generator.calls(), 0);
    }
}
