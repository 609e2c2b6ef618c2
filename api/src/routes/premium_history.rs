use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use sqlx::PgConnection;
use uuid::Uuid;

use covrabl_core::error::ApiError;
use covrabl_core::policy::MAX_AMOUNT;
use covrabl_core::premiums::{PremiumEntry, PremiumSource, PremiumTrend, summarize};

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::routes::policies::fetch_owned_policy;
use crate::state::AppState;

pub fn read_router() -> Router<AppState> {
    Router::new().route("/v1/policies/{id}/premium-history", get(list_premium_history))
}

pub fn write_router() -> Router<AppState> {
    Router::new()
        .route("/v1/policies/{id}/premium-history", post(add_premium_entry))
        .route(
            "/v1/policies/{id}/premium-history/{entry_id}",
            delete(delete_premium_entry),
        )
}

#[derive(sqlx::FromRow)]
struct PremiumRow {
    id: Uuid,
    amount: Decimal,
    effective_date: NaiveDate,
    source: String,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl PremiumRow {
    fn into_entry(self) -> Result<PremiumEntry, AppError> {
        let source: PremiumSource = self.source.parse().map_err(|e| {
            AppError::Internal(format!("premium entry {} is unreadable: {e}", self.id))
        })?;
        Ok(PremiumEntry {
            id: self.id,
            amount: self.amount,
            effective_date: self.effective_date,
            source,
            notes: self.notes,
            created_at: self.created_at,
        })
    }
}

/// Add an `extraction` entry for `amount` dated `today`, unless the same amount is
/// already recorded for that date.
pub(crate) async fn record_premium_change(
    conn: &mut PgConnection,
    policy_id: Uuid,
    amount: Decimal,
    today: NaiveDate,
) -> Result<(), AppError> {
    let existing = sqlx::query_as::<_, PremiumRow>(
        "SELECT id, amount, effective_date, source, notes, created_at \
         FROM premium_history WHERE policy_id = $1 AND effective_date = $2",
    )
    .bind(policy_id)
    .bind(today)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(PremiumRow::into_entry)
    .collect::<Result<Vec<_>, _>>()?;

    if covrabl_core::premiums::is_duplicate(&existing, amount, today) {
        return Ok(());
    }

    sqlx::query(
        "INSERT INTO premium_history (id, policy_id, amount, effective_date, source) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(Uuid::now_v7())
    .bind(policy_id)
    .bind(amount)
    .bind(today)
    .bind(PremiumSource::Extraction.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[utoipa::path(
    get,
    path = "/v1/policies/{id}/premium-history",
    params(("id" = Uuid, Path, description = "Policy id")),
    responses(
        (status = 200, description = "Premium history, oldest first, with change percentages", body = PremiumTrend),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "premium-history"
)]
pub async fn list_premium_history(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(policy_id): Path<Uuid>,
) -> Result<Json<PremiumTrend>, AppError> {
    fetch_owned_policy(&state.db, auth.user_id, policy_id).await?;

    let entries = sqlx::query_as::<_, PremiumRow>(
        "SELECT id, amount, effective_date, source, notes, created_at \
         FROM premium_history WHERE policy_id = $1 \
         ORDER BY effective_date ASC, created_at ASC",
    )
    .bind(policy_id)
    .fetch_all(&state.db)
    .await?
    .into_iter()
    .map(PremiumRow::into_entry)
    .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(summarize(entries)))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct AddPremiumRequest {
    /// Annual premium in dollars, a number or a decimal string
    pub amount: Decimal,
    pub effective_date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
}

#[utoipa::path(
    post,
    path = "/v1/policies/{id}/premium-history",
    params(("id" = Uuid, Path, description = "Policy id")),
    request_body = AddPremiumRequest,
    responses(
        (status = 201, description = "Entry recorded", body = PremiumEntry),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "premium-history"
)]
pub async fn add_premium_entry(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(policy_id): Path<Uuid>,
    AppJson(req): AppJson<AddPremiumRequest>,
) -> Result<(StatusCode, Json<PremiumEntry>), AppError> {
    let amount = req
        .amount
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    if (amount.is_sign_negative() && !amount.is_zero()) || amount > MAX_AMOUNT {
        return Err(AppError::Validation {
            message: "amount must be between 0 and 999999999999.99".to_string(),
            field: Some("amount".to_string()),
            received: Some(serde_json::Value::String(req.amount.to_string())),
            docs_hint: Some("Amounts are dollars per year, at most two decimals.".to_string()),
        });
    }
    let amount = amount.abs();
    fetch_owned_policy(&state.db, auth.user_id, policy_id).await?;

    let entry = sqlx::query_as::<_, PremiumRow>(
        r#"
        INSERT INTO premium_history (id, policy_id, amount, effective_date, source, notes)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, amount, effective_date, source, notes, created_at
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(policy_id)
    .bind(amount)
    .bind(req.effective_date)
    .bind(PremiumSource::Manual.as_str())
    .bind(&req.notes)
    .fetch_one(&state.db)
    .await?
    .into_entry()?;

    Ok((StatusCode::CREATED, Json(entry)))
}

#[utoipa::path(
    delete,
    path = "/v1/policies/{id}/premium-history/{entry_id}",
    params(
        ("id" = Uuid, Path, description = "Policy id"),
        ("entry_id" = Uuid, Path, description = "Premium history entry id")
    ),
    responses(
        (status = 204, description = "Entry deleted"),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "premium-history"
)]
pub async fn delete_premium_entry(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path((policy_id, entry_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    let result = sqlx::query(
        "DELETE FROM premium_history h \
         USING policies p \
         WHERE h.id = $1 AND h.policy_id = $2 AND p.id = h.policy_id AND p.user_id = $3",
    )
    .bind(entry_id)
    .bind(policy_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Premium history entry"));
    }
    Ok(StatusCode::NO_CONTENT)
}
