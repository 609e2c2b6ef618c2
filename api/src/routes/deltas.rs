use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use uuid::Uuid;

use covrabl_core::deltas::{NewPolicyDelta, PolicyDelta, Severity};
use covrabl_core::error::ApiError;
use covrabl_core::explain::{self, Explanation, PolicyContext};

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::extract::AppQuery;
use crate::llm::PgExplanationCache;
use crate::routes::policies::fetch_owned_policy;
use crate::state::AppState;

pub fn read_router() -> Router<AppState> {
    Router::new()
        .route("/v1/deltas", get(list_deltas))
        .route("/v1/policies/{id}/deltas", get(list_policy_deltas))
}

pub fn write_router() -> Router<AppState> {
    Router::new()
        .route("/v1/deltas/acknowledge-all", put(acknowledge_all))
        .route("/v1/deltas/{id}/acknowledge", put(acknowledge_delta))
}

pub fn explain_router() -> Router<AppState> {
    Router::new().route("/v1/deltas/{id}/explain", post(explain_delta))
}

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;

#[derive(sqlx::FromRow)]
pub(crate) struct DeltaRow {
    id: Uuid,
    policy_id: Uuid,
    document_id: Option<Uuid>,
    field_key: String,
    old_value: Option<String>,
    new_value: Option<String>,
    delta_type: String,
    severity: String,
    is_acknowledged: bool,
    created_at: DateTime<Utc>,
}

impl DeltaRow {
    fn into_delta(self) -> Result<PolicyDelta, AppError> {
        let id = self.id;
        let corrupt = |e: covrabl_core::policy::UnknownValue| {
            AppError::Internal(format!("stored delta {id} is unreadable: {e}"))
        };
        Ok(PolicyDelta {
            id: self.id,
            policy_id: self.policy_id,
            document_id: self.document_id,
            field_key: self.field_key.parse().map_err(corrupt)?,
            old_value: self.old_value,
            new_value: self.new_value,
            delta_type: self.delta_type.parse().map_err(corrupt)?,
            severity: self.severity.parse().map_err(corrupt)?,
            is_acknowledged: self.is_acknowledged,
            created_at: self.created_at,
        })
    }
}

/// Persist one staged delta inside the caller's transaction.
pub(crate) async fn insert_delta(
    conn: &mut PgConnection,
    delta: &NewPolicyDelta,
) -> Result<PolicyDelta, AppError> {
    sqlx::query_as::<_, DeltaRow>(
        r#"
        INSERT INTO policy_deltas
            (id, policy_id, document_id, field_key, old_value, new_value, delta_type, severity)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id, policy_id, document_id, field_key, old_value, new_value, delta_type,
                  severity, is_acknowledged, created_at
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(delta.policy_id)
    .bind(delta.document_id)
    .bind(delta.field_key.as_str())
    .bind(&delta.old_value)
    .bind(&delta.new_value)
    .bind(delta.delta_type.as_str())
    .bind(delta.severity.as_str())
    .fetch_one(conn)
    .await?
    .into_delta()
}

// ──────────────────────────────────────────────
// GET /v1/deltas
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListDeltasParams {
    pub acknowledged: Option<bool>,
    /// critical, warning or info
    pub severity: Option<String>,
    /// 1-based page number
    pub page: Option<i64>,
    /// Page size, 1..=200 (default 50)
    pub limit: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct DeltaListRow {
    #[sqlx(flatten)]
    delta: DeltaRow,
    carrier: Option<String>,
    policy_type: Option<String>,
    explanation: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct DeltaListItem {
    #[serde(flatten)]
    pub delta: PolicyDelta,
    pub carrier: Option<String>,
    pub policy_type: Option<String>,
    /// Cached explanation text, when one has been generated.
    pub explanation: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct DeltaListResponse {
    pub items: Vec<DeltaListItem>,
    /// Matching deltas across all pages.
    pub total: i64,
    /// Unacknowledged deltas of the caller, ignoring filters.
    pub unacknowledged_count: i64,
}

/// `(limit, offset)` for a 1-based page.
fn page_window(page: Option<i64>, limit: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let page = page.unwrap_or(1).max(1);
    (limit, (page - 1).saturating_mul(limit))
}

fn parse_severity_filter(raw: Option<&str>) -> Result<Option<Severity>, AppError> {
    raw.map(|value| {
        value.parse::<Severity>().map_err(|_| AppError::Validation {
            message: format!("Unknown severity '{value}'"),
            field: Some("severity".to_string()),
            received: Some(serde_json::Value::String(value.to_string())),
            docs_hint: Some("Use one of: critical, warning, info.".to_string()),
        })
    })
    .transpose()
}

/// List deltas across all of the caller's policies
///
/// Newest first. Filter by acknowledgement state and/or severity.
#[utoipa::path(
    get,
    path = "/v1/deltas",
    params(ListDeltasParams),
    responses(
        (status = 200, description = "Page of deltas", body = DeltaListResponse),
        (status = 400, description = "Invalid filter", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "deltas"
)]
pub async fn list_deltas(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppQuery(params): AppQuery<ListDeltasParams>,
) -> Result<Json<DeltaListResponse>, AppError> {
    let severity = parse_severity_filter(params.severity.as_deref())?;
    let severity = severity.map(|s| s.as_str());
    let (limit, offset) = page_window(params.page, params.limit);

    let rows = sqlx::query_as::<_, DeltaListRow>(
        r#"
        SELECT d.id, d.policy_id, d.document_id, d.field_key, d.old_value, d.new_value,
               d.delta_type, d.severity, d.is_acknowledged, d.created_at,
               p.carrier, p.policy_type, e.explanation
        FROM policy_deltas d
        JOIN policies p ON p.id = d.policy_id
        LEFT JOIN delta_explanations e ON e.delta_id = d.id
        WHERE p.user_id = $1
          AND ($2::boolean IS NULL OR d.is_acknowledged = $2)
          AND ($3::text IS NULL OR d.severity = $3)
        ORDER BY d.created_at DESC, d.id DESC
        LIMIT $4 OFFSET $5
        "#,
    )
    .bind(auth.user_id)
    .bind(params.acknowledged)
    .bind(severity)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.db)
    .await?;

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM policy_deltas d
        JOIN policies p ON p.id = d.policy_id
        WHERE p.user_id = $1
          AND ($2::boolean IS NULL OR d.is_acknowledged = $2)
          AND ($3::text IS NULL OR d.severity = $3)
        "#,
    )
    .bind(auth.user_id)
    .bind(params.acknowledged)
    .bind(severity)
    .fetch_one(&state.db)
    .await?;

    let unacknowledged_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM policy_deltas d \
         JOIN policies p ON p.id = d.policy_id \
         WHERE p.user_id = $1 AND d.is_acknowledged = FALSE",
    )
    .bind(auth.user_id)
    .fetch_one(&state.db)
    .await?;

    let items = rows
        .into_iter()
        .map(|row| {
            Ok(DeltaListItem {
                delta: row.delta.into_delta()?,
                carrier: row.carrier,
                policy_type: row.policy_type,
                explanation: row.explanation,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    Ok(Json(DeltaListResponse {
        items,
        total,
        unacknowledged_count,
    }))
}

// ──────────────────────────────────────────────
// GET /v1/policies/{id}/deltas
// ──────────────────────────────────────────────

#[utoipa::path(
    get,
    path = "/v1/policies/{id}/deltas",
    params(("id" = Uuid, Path, description = "Policy id")),
    responses(
        (status = 200, description = "All deltas of the policy, newest first", body = Vec<PolicyDelta>),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "deltas"
)]
pub async fn list_policy_deltas(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(policy_id): Path<Uuid>,
) -> Result<Json<Vec<PolicyDelta>>, AppError> {
    fetch_owned_policy(&state.db, auth.user_id, policy_id).await?;

    let rows = sqlx::query_as::<_, DeltaRow>(
        "SELECT id, policy_id, document_id, field_key, old_value, new_value, delta_type, \
                severity, is_acknowledged, created_at \
         FROM policy_deltas WHERE policy_id = $1 \
         ORDER BY created_at DESC, id DESC",
    )
    .bind(policy_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(
        rows.into_iter()
            .map(DeltaRow::into_delta)
            .collect::<Result<_, _>>()?,
    ))
}

// ──────────────────────────────────────────────
// PUT /v1/deltas/{id}/acknowledge, PUT /v1/deltas/acknowledge-all
// ──────────────────────────────────────────────

#[utoipa::path(
    put,
    path = "/v1/deltas/{id}/acknowledge",
    params(("id" = Uuid, Path, description = "Delta id")),
    responses(
        (status = 200, description = "Delta acknowledged", body = PolicyDelta),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "deltas"
)]
pub async fn acknowledge_delta(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(delta_id): Path<Uuid>,
) -> Result<Json<PolicyDelta>, AppError> {
    let row = sqlx::query_as::<_, DeltaRow>(
        r#"
        UPDATE policy_deltas d
        SET is_acknowledged = TRUE
        FROM policies p
        WHERE d.id = $1 AND p.id = d.policy_id AND p.user_id = $2
        RETURNING d.id, d.policy_id, d.document_id, d.field_key, d.old_value, d.new_value,
                  d.delta_type, d.severity, d.is_acknowledged, d.created_at
        "#,
    )
    .bind(delta_id)
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::not_found("Delta"))?;

    Ok(Json(row.into_delta()?))
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AcknowledgeAllResponse {
    /// Number of deltas that were unacknowledged before the call.
    pub acknowledged: u64,
}

#[utoipa::path(
    put,
    path = "/v1/deltas/acknowledge-all",
    responses(
        (status = 200, description = "All deltas acknowledged", body = AcknowledgeAllResponse),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "deltas"
)]
pub async fn acknowledge_all(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<AcknowledgeAllResponse>, AppError> {
    let result = sqlx::query(
        "UPDATE policy_deltas SET is_acknowledged = TRUE \
         WHERE is_acknowledged = FALSE \
           AND policy_id IN (SELECT id FROM policies WHERE user_id = $1)",
    )
    .bind(auth.user_id)
    .execute(&state.db)
    .await?;

    tracing::info!(
        user_id = %auth.user_id,
        key_id = %auth.key_id,
        acknowledged = result.rows_affected(),
        "deltas acknowledged"
    );

    Ok(Json(AcknowledgeAllResponse {
        acknowledged: result.rows_affected(),
    }))
}

// ──────────────────────────────────────────────
// POST /v1/deltas/{id}/explain
// ──────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct ExplainRow {
    #[sqlx(flatten)]
    delta: DeltaRow,
    carrier: Option<String>,
    policy_type: Option<String>,
}

/// Explain a delta in plain language
///
/// The first call generates and caches the explanation; later calls return the cached
/// text. When the language model is unavailable a fixed template is returned instead.
#[utoipa::path(
    post,
    path = "/v1/deltas/{id}/explain",
    params(("id" = Uuid, Path, description = "Delta id")),
    responses(
        (status = 200, description = "Explanation", body = Explanation),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "deltas"
)]
pub async fn explain_delta(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(delta_id): Path<Uuid>,
) -> Result<Json<Explanation>, AppError> {
    let row = sqlx::query_as::<_, ExplainRow>(
        r#"
        SELECT d.id, d.policy_id, d.document_id, d.field_key, d.old_value, d.new_value,
               d.delta_type, d.severity, d.is_acknowledged, d.created_at,
               p.carrier, p.policy_type
        FROM policy_deltas d
        JOIN policies p ON p.id = d.policy_id
        WHERE d.id = $1 AND p.user_id = $2
        "#,
    )
    .bind(delta_id)
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::not_found("Delta"))?;

    let context = PolicyContext {
        policy_type: row.policy_type,
        carrier: row.carrier,
    };
    let delta = row.delta.into_delta()?;
    let cache = PgExplanationCache::new(&state.db);

    let explanation = explain::explain(state.llm.as_ref(), &cache, &context, &delta).await?;
    Ok(Json(explanation))
}

#[cfg(test)]
mod tests {
    use axum::extract::{Path, State};
    use serde_json::json;

    use super::*;
    use crate::extract::AppJson;
    use crate::routes::policies::{CreatePolicyRequest, ExtractionRequest, apply_extraction, create_policy};
    use crate::routes::test_support::integration_state_if_available;
    use covrabl_core::explain::FALLBACK_REASONS;

    #[test]
    fn page_window_clamps() {
        assert_eq!(page_window(None, None), (50, 0));
        assert_eq!(page_window(Some(3), Some(20)), (20, 40));
        assert_eq!(page_window(Some(0), Some(0)), (1, 0));
        assert_eq!(page_window(Some(-4), Some(10_000)), (200, 0));
    }

    #[test]
    fn severity_filter_must_be_known() {
        assert_eq!(parse_severity_filter(None).unwrap(), None);
        assert_eq!(
            parse_severity_filter(Some("critical")).unwrap(),
            Some(Severity::Critical)
        );
        let err = parse_severity_filter(Some("urgent")).unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    async fn policy_with_premium_delta(state: &AppState, auth: &AuthenticatedUser) -> Uuid {
        let (_, Json(created)) = create_policy(
            State(state.clone()),
            auth.clone(),
            AppJson(CreatePolicyRequest {
                nickname: None,
                fields: serde_json::from_value(json!({
                    "policy_type": "auto", "carrier": "Acme", "premium_amount": 1000
                }))
                .unwrap(),
                details: vec![],
            }),
        )
        .await
        .expect("create policy");

        apply_extraction(
            State(state.clone()),
            auth.clone(),
            Path(created.id),
            AppJson(ExtractionRequest {
                document_id: None,
                fields: serde_json::from_value(json!({
                    "policy_type": "auto", "carrier": "Acme", "premium_amount": 1101
                }))
                .unwrap(),
            }),
        )
        .await
        .expect("apply extraction");

        created.id
    }

    #[tokio::test]
    async fn list_filter_and_acknowledge() {
        let Some((state, auth)) = integration_state_if_available().await else {
            return;
        };
        policy_with_premium_delta(&state, &auth).await;

        let Json(page) = list_deltas(
            State(state.clone()),
            auth.clone(),
            AppQuery(ListDeltasParams {
                acknowledged: Some(false),
                severity: Some("warning".to_string()),
                page: None,
                limit: None,
            }),
        )
        .await
        .expect("list deltas");
        assert_eq!(page.total, 1);
        assert_eq!(page.unacknowledged_count, 1);
        assert_eq!(page.items[0].carrier.as_deref(), Some("Acme"));
        assert_eq!(page.items[0].explanation, None);

        let Json(acked) = acknowledge_delta(
            State(state.clone()),
            auth.clone(),
            Path(page.items[0].delta.id),
        )
        .await
        .expect("acknowledge");
        assert!(acked.is_acknowledged);

        let Json(all) = acknowledge_all(State(state.clone()), auth.clone())
            .await
            .expect("acknowledge all");
        assert_eq!(all.acknowledged, 0);
    }

    #[tokio::test]
    async fn explain_falls_back_and_caches() {
        let Some((state, auth)) = integration_state_if_available().await else {
            return;
        };
        let policy_id = policy_with_premium_delta(&state, &auth).await;
        let Json(deltas) = list_policy_deltas(State(state.clone()), auth.clone(), Path(policy_id))
            .await
            .expect("policy deltas");
        let delta_id = deltas[0].id;

        let Json(first) = explain_delta(State(state.clone()), auth.clone(), Path(delta_id))
            .await
            .expect("explain");
        assert_eq!(first.explanation, "Your premium has increased. This may affect your coverage or costs.");
        assert_eq!(first.possible_reasons.len(), FALLBACK_REASONS.len());

        let Json(second) = explain_delta(State(state.clone()), auth.clone(), Path(delta_id))
            .await
            .expect("explain again");
        assert_eq!(first, second);

        let Some((_, stranger)) = integration_state_if_available().await else {
            return;
        };
        let err = explain_delta(State(state), stranger, Path(delta_id))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }
}
