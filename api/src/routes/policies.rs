use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgExecutor};
use uuid::Uuid;

use covrabl_core::deltas::{PolicyDelta, detect};
use covrabl_core::error::ApiError;
use covrabl_core::policy::{Extraction, PENDING_EXTRACTION, PolicyRevision, PolicySnapshot};

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::routes::{deltas, premium_history, reminders};
use crate::state::AppState;

pub fn read_router() -> Router<AppState> {
    Router::new()
        .route("/v1/policies", get(list_policies))
        .route("/v1/policies/{id}", get(get_policy))
}

pub fn write_router() -> Router<AppState> {
    Router::new()
        .route("/v1/policies", post(create_policy))
        .route("/v1/policies/{id}", axum::routing::delete(delete_policy))
        .route("/v1/policies/{id}/extraction", put(apply_extraction))
}

pub const DEFAULT_POLICY_TYPE: &str = "other";

// ──────────────────────────────────────────────
// Rows and responses
// ──────────────────────────────────────────────

#[derive(sqlx::FromRow)]
pub(crate) struct PolicyRow {
    pub id: Uuid,
    pub nickname: Option<String>,
    pub policy_type: Option<String>,
    pub carrier: Option<String>,
    pub policy_number: Option<String>,
    pub scope: Option<String>,
    pub coverage_amount: Option<Decimal>,
    pub deductible: Option<Decimal>,
    pub premium_amount: Option<Decimal>,
    pub renewal_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PolicyRow {
    pub fn snapshot(&self) -> PolicySnapshot {
        PolicySnapshot {
            id: self.id,
            policy_type: self.policy_type.clone(),
            carrier: self.carrier.clone(),
            policy_number: self.policy_number.clone(),
            scope: self.scope.clone(),
            coverage_amount: self.coverage_amount,
            deductible: self.deductible,
            premium_amount: self.premium_amount,
            renewal_date: self.renewal_date,
            created_at: Some(self.created_at),
        }
    }

    fn into_response(self, details: Vec<PolicyDetail>) -> PolicyResponse {
        PolicyResponse {
            id: self.id,
            nickname: self.nickname,
            policy_type: self.policy_type,
            carrier: self.carrier,
            policy_number: self.policy_number,
            scope: self.scope,
            coverage_amount: self.coverage_amount,
            deductible: self.deductible,
            premium_amount: self.premium_amount,
            renewal_date: self.renewal_date,
            created_at: self.created_at,
            updated_at: self.updated_at,
            details,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct PolicyDetail {
    pub field_name: String,
    pub field_value: String,
}

#[derive(sqlx::FromRow)]
struct PolicyDetailRow {
    policy_id: Uuid,
    field_name: String,
    field_value: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PolicyResponse {
    pub id: Uuid,
    pub nickname: Option<String>,
    pub policy_type: Option<String>,
    pub carrier: Option<String>,
    pub policy_number: Option<String>,
    pub scope: Option<String>,
    pub coverage_amount: Option<Decimal>,
    pub deductible: Option<Decimal>,
    pub premium_amount: Option<Decimal>,
    pub renewal_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub details: Vec<PolicyDetail>,
}

// ──────────────────────────────────────────────
// Shared queries
// ──────────────────────────────────────────────

/// Policy owned by `user_id`. Someone else's policy is reported as missing.
pub(crate) async fn fetch_owned_policy<'e, E: PgExecutor<'e>>(
    executor: E,
    user_id: Uuid,
    policy_id: Uuid,
) -> Result<PolicyRow, AppError> {
    sqlx::query_as::<_, PolicyRow>(
        "SELECT id, nickname, policy_type, carrier, policy_number, scope, coverage_amount, \
                deductible, premium_amount, renewal_date, created_at, updated_at \
         FROM policies WHERE id = $1 AND user_id = $2",
    )
    .bind(policy_id)
    .bind(user_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| AppError::not_found("Policy"))
}

/// Same as [`fetch_owned_policy`], holding a row lock until the transaction ends.
async fn lock_owned_policy(
    conn: &mut PgConnection,
    user_id: Uuid,
    policy_id: Uuid,
) -> Result<PolicyRow, AppError> {
    sqlx::query_as::<_, PolicyRow>(
        "SELECT id, nickname, policy_type, carrier, policy_number, scope, coverage_amount, \
                deductible, premium_amount, renewal_date, created_at, updated_at \
         FROM policies WHERE id = $1 AND user_id = $2 \
         FOR UPDATE",
    )
    .bind(policy_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| AppError::not_found("Policy"))
}

pub(crate) async fn list_user_policies<'e, E: PgExecutor<'e>>(
    executor: E,
    user_id: Uuid,
) -> Result<Vec<PolicyRow>, AppError> {
    Ok(sqlx::query_as::<_, PolicyRow>(
        "SELECT id, nickname, policy_type, carrier, policy_number, scope, coverage_amount, \
                deductible, premium_amount, renewal_date, created_at, updated_at \
         FROM policies WHERE user_id = $1 \
         ORDER BY created_at DESC, id DESC",
    )
    .bind(user_id)
    .fetch_all(executor)
    .await?)
}

/// Details of the given policies, grouped by policy id.
pub(crate) async fn fetch_details<'e, E: PgExecutor<'e>>(
    executor: E,
    policy_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<PolicyDetail>>, AppError> {
    let rows = sqlx::query_as::<_, PolicyDetailRow>(
        "SELECT policy_id, field_name, field_value FROM policy_details \
         WHERE policy_id = ANY($1) \
         ORDER BY field_name, id",
    )
    .bind(policy_ids)
    .fetch_all(executor)
    .await?;

    let mut grouped: HashMap<Uuid, Vec<PolicyDetail>> = HashMap::new();
    for row in rows {
        grouped.entry(row.policy_id).or_default().push(PolicyDetail {
            field_name: row.field_name,
            field_value: row.field_value,
        });
    }
    Ok(grouped)
}

async fn write_policy_fields(
    conn: &mut PgConnection,
    policy: &PolicySnapshot,
) -> Result<PolicyRow, AppError> {
    Ok(sqlx::query_as::<_, PolicyRow>(
        r#"
        UPDATE policies
        SET carrier = $2, policy_number = $3, policy_type = $4, scope = $5,
            coverage_amount = $6, deductible = $7, premium_amount = $8, renewal_date = $9,
            updated_at = NOW()
        WHERE id = $1
        RETURNING id, nickname, policy_type, carrier, policy_number, scope, coverage_amount,
                  deductible, premium_amount, renewal_date, created_at, updated_at
        "#,
    )
    .bind(policy.id)
    .bind(&policy.carrier)
    .bind(&policy.policy_number)
    .bind(&policy.policy_type)
    .bind(&policy.scope)
    .bind(policy.coverage_amount)
    .bind(policy.deductible)
    .bind(policy.premium_amount)
    .bind(policy.renewal_date)
    .fetch_one(conn)
    .await?)
}

// ──────────────────────────────────────────────
// POST /v1/policies
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreatePolicyRequest {
    #[serde(default)]
    pub nickname: Option<String>,
    /// Tracked fields, same shape as an extraction.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub fields: Extraction,
    #[serde(default)]
    pub details: Vec<PolicyDetail>,
}

fn validate_details(details: &[PolicyDetail]) -> Result<(), AppError> {
    for (i, detail) in details.iter().enumerate() {
        if detail.field_name.trim().is_empty() {
            return Err(AppError::Validation {
                message: "field_name must not be empty".to_string(),
                field: Some(format!("details[{i}].field_name")),
                received: None,
                docs_hint: None,
            });
        }
    }
    Ok(())
}

/// Placeholder defaults for a policy created before extraction has run.
fn with_creation_defaults(mut revision: PolicyRevision) -> PolicyRevision {
    revision
        .policy_type
        .get_or_insert_with(|| DEFAULT_POLICY_TYPE.to_string());
    revision
        .carrier
        .get_or_insert_with(|| PENDING_EXTRACTION.to_string());
    revision
}

#[utoipa::path(
    post,
    path = "/v1/policies",
    request_body = CreatePolicyRequest,
    responses(
        (status = 201, description = "Policy created", body = PolicyResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "policies"
)]
pub async fn create_policy(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppJson(req): AppJson<CreatePolicyRequest>,
) -> Result<(StatusCode, Json<PolicyResponse>), AppError> {
    validate_details(&req.details)?;
    let revision = with_creation_defaults(PolicyRevision::from_extraction(&req.fields)?);
    let policy_id = Uuid::now_v7();
    let today = Utc::now().date_naive();

    let mut tx = state.db.begin().await?;

    let row = sqlx::query_as::<_, PolicyRow>(
        r#"
        INSERT INTO policies (id, user_id, nickname, policy_type, carrier, policy_number, scope,
                              coverage_amount, deductible, premium_amount, renewal_date)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING id, nickname, policy_type, carrier, policy_number, scope, coverage_amount,
                  deductible, premium_amount, renewal_date, created_at, updated_at
        "#,
    )
    .bind(policy_id)
    .bind(auth.user_id)
    .bind(&req.nickname)
    .bind(&revision.policy_type)
    .bind(&revision.carrier)
    .bind(&revision.policy_number)
    .bind(&revision.scope)
    .bind(revision.coverage_amount)
    .bind(revision.deductible)
    .bind(revision.premium_amount)
    .bind(revision.renewal_date)
    .fetch_one(&mut *tx)
    .await?;

    for detail in &req.details {
        sqlx::query(
            "INSERT INTO policy_details (id, policy_id, field_name, field_value) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::now_v7())
        .bind(policy_id)
        .bind(detail.field_name.trim())
        .bind(&detail.field_value)
        .execute(&mut *tx)
        .await?;
    }

    if let Some(renewal_date) = row.renewal_date {
        reminders::replace_reminders(&mut tx, policy_id, Some(renewal_date), today).await?;
    }

    tx.commit().await?;

    tracing::info!(user_id = %auth.user_id, policy_id = %policy_id, "policy created");

    Ok((StatusCode::CREATED, Json(row.into_response(req.details))))
}

// ──────────────────────────────────────────────
// GET /v1/policies, GET /v1/policies/{id}
// ──────────────────────────────────────────────

#[utoipa::path(
    get,
    path = "/v1/policies",
    responses(
        (status = 200, description = "Policies of the caller, newest first", body = Vec<PolicyResponse>),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "policies"
)]
pub async fn list_policies(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<Vec<PolicyResponse>>, AppError> {
    let rows = list_user_policies(&state.db, auth.user_id).await?;
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut details = fetch_details(&state.db, &ids).await?;

    Ok(Json(
        rows.into_iter()
            .map(|row| {
                let own = details.remove(&row.id).unwrap_or_default();
                row.into_response(own)
            })
            .collect(),
    ))
}

#[utoipa::path(
    get,
    path = "/v1/policies/{id}",
    params(("id" = Uuid, Path, description = "Policy id")),
    responses(
        (status = 200, description = "Policy with details", body = PolicyResponse),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "policies"
)]
pub async fn get_policy(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(policy_id): Path<Uuid>,
) -> Result<Json<PolicyResponse>, AppError> {
    let row = fetch_owned_policy(&state.db, auth.user_id, policy_id).await?;
    let details = fetch_details(&state.db, &[policy_id])
        .await?
        .remove(&policy_id)
        .unwrap_or_default();
    Ok(Json(row.into_response(details)))
}

// ──────────────────────────────────────────────
// DELETE /v1/policies/{id}
// ──────────────────────────────────────────────

#[utoipa::path(
    delete,
    path = "/v1/policies/{id}",
    params(("id" = Uuid, Path, description = "Policy id")),
    responses(
        (status = 204, description = "Policy and everything derived from it deleted"),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "policies"
)]
pub async fn delete_policy(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(policy_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let result = sqlx::query("DELETE FROM policies WHERE id = $1 AND user_id = $2")
        .bind(policy_id)
        .bind(auth.user_id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Policy"));
    }

    tracing::info!(user_id = %auth.user_id, policy_id = %policy_id, "policy deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ──────────────────────────────────────────────
// PUT /v1/policies/{id}/extraction
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ExtractionRequest {
    /// Source document, when the extraction came from an upload.
    #[serde(default)]
    pub document_id: Option<Uuid>,
    /// Extracted values keyed by tracked field name. Missing keys are allowed.
    #[schema(value_type = Object)]
    pub fields: Extraction,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ExtractionResponse {
    pub deltas: Vec<PolicyDelta>,
    pub policy: PolicyResponse,
}

/// Apply a new extraction to a policy
///
/// Detects field changes against the stored values, records them as deltas and writes
/// the revised fields, all in one transaction. Premium history and renewal reminders
/// follow the revised values.
#[utoipa::path(
    put,
    path = "/v1/policies/{id}/extraction",
    params(("id" = Uuid, Path, description = "Policy id")),
    request_body = ExtractionRequest,
    responses(
        (status = 200, description = "Deltas recorded and policy revised", body = ExtractionResponse),
        (status = 400, description = "A field could not be normalised", body = ApiError),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "policies"
)]
pub async fn apply_extraction(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(policy_id): Path<Uuid>,
    AppJson(req): AppJson<ExtractionRequest>,
) -> Result<Json<ExtractionResponse>, AppError> {
    let revision = PolicyRevision::from_extraction(&req.fields)?;
    let today = Utc::now().date_naive();

    let mut tx = state.db.begin().await?;

    let current = lock_owned_policy(&mut tx, auth.user_id, policy_id).await?;
    let before = current.snapshot();

    let staged = detect(&before, &revision.to_extraction(), req.document_id);
    let mut recorded = Vec::with_capacity(staged.len());
    for delta in &staged {
        recorded.push(deltas::insert_delta(&mut tx, delta).await?);
    }

    let after = revision.apply_to(&before);
    let row = write_policy_fields(&mut tx, &after).await?;

    if after.premium_amount != before.premium_amount {
        if let Some(amount) = after.premium_amount {
            premium_history::record_premium_change(&mut tx, policy_id, amount, today).await?;
        }
    }
    if after.renewal_date != before.renewal_date {
        reminders::replace_reminders(&mut tx, policy_id, after.renewal_date, today).await?;
    }

    let details = fetch_details(&mut *tx, &[policy_id])
        .await?
        .remove(&policy_id)
        .unwrap_or_default();

    tx.commit().await?;

    tracing::info!(
        user_id = %auth.user_id,
        policy_id = %policy_id,
        delta_count = recorded.len(),
        "extraction applied"
    );

    Ok(Json(ExtractionResponse {
        deltas: recorded,
        policy: row.into_response(details),
    }))
}
