use std::sync::Arc;

use covrabl_core::scores::AdequacyThresholds;
use sqlx::PgPool;

use crate::llm::LlmClient;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub llm: Arc<LlmClient>,
    pub thresholds: Arc<AdequacyThresholds>,
}
