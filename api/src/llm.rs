//! HTTP text generator for delta explanations, plus the Postgres explanation cache.

use chrono::{DateTime, Utc};
use covrabl_core::explain::{DeltaExplanation, ExplanationCache, GenerationError, TextGenerator};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::{LlmConfig, LlmProvider};

const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const MAX_TOKENS: u32 = 500;

pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn provider(&self) -> LlmProvider {
        self.config.provider
    }

    async fn post(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, GenerationError> {
        let response = request
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn anthropic(&self, prompt: &str) -> Result<String, GenerationError> {
        let request = self
            .http
            .post(ANTHROPIC_MESSAGES_URL)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&json!({
                "model": self.config.model,
                "max_tokens": MAX_TOKENS,
                "messages": [{"role": "user", "content": prompt}],
            }));

        let body: AnthropicResponse = self
            .post(request)
            .await?
            .json()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        body.content
            .into_iter()
            .find_map(|block| block.text)
            .filter(|text| !text.trim().is_empty())
            .ok_or(GenerationError::EmptyResponse)
    }

    async fn openai(&self, prompt: &str) -> Result<String, GenerationError> {
        let request = self
            .http
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "model": self.config.model,
                "max_tokens": MAX_TOKENS,
                "messages": [{"role": "user", "content": prompt}],
            }));

        let body: OpenAiResponse = self
            .post(request)
            .await?
            .json()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(GenerationError::EmptyResponse)
    }
}

impl TextGenerator for LlmClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        match self.config.provider {
            LlmProvider::Anthropic => self.anthropic(prompt).await,
            LlmProvider::OpenAi => self.openai(prompt).await,
            LlmProvider::Disabled => Err(GenerationError::Unconfigured),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Explanation cache over the `delta_explanations` table.
pub struct PgExplanationCache<'a> {
    pool: &'a PgPool,
}

impl<'a> PgExplanationCache<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ExplanationRow {
    delta_id: Uuid,
    explanation: String,
    possible_reasons: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl ExplanationRow {
    fn into_explanation(self) -> DeltaExplanation {
        DeltaExplanation {
            delta_id: self.delta_id,
            explanation: self.explanation,
            possible_reasons: serde_json::from_value(self.possible_reasons).unwrap_or_default(),
            created_at: self.created_at,
        }
    }
}

impl ExplanationCache for PgExplanationCache<'_> {
    type Error = sqlx::Error;

    async fn find(&self, delta_id: Uuid) -> Result<Option<DeltaExplanation>, sqlx::Error> {
        let row = sqlx::query_as::<_, ExplanationRow>(
            "SELECT delta_id, explanation, possible_reasons, created_at \
             FROM delta_explanations WHERE delta_id = $1",
        )
        .bind(delta_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(ExplanationRow::into_explanation))
    }

    async fn store(&self, explanation: &DeltaExplanation) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO delta_explanations (delta_id, explanation, possible_reasons, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (delta_id) DO UPDATE
            SET explanation = EXCLUDED.explanation,
                possible_reasons = EXCLUDED.possible_reasons,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(explanation.delta_id)
        .bind(&explanation.explanation)
        .bind(serde_json::json!(explanation.possible_reasons))
        .bind(explanation.created_at)
        .execute(self.pool)
        .await?;
        Ok(())
    }
}
