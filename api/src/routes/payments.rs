use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use sqlx::PgExecutor;
use uuid::Uuid;

use covrabl_core::error::ApiError;
use covrabl_core::policy::MAX_AMOUNT;
use covrabl_core::premiums::{PaymentFrequency, PremiumPayment};

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::routes::policies::fetch_owned_policy;
use crate::state::AppState;

pub fn read_router() -> Router<AppState> {
    Router::new().route("/v1/policies/{id}/payments", get(list_payments))
}

pub fn write_router() -> Router<AppState> {
    Router::new()
        .route("/v1/policies/{id}/payments", post(add_payment))
        .route(
            "/v1/policies/{id}/payments/{payment_id}",
            delete(delete_payment),
        )
        .route(
            "/v1/policies/{id}/payments/{payment_id}/paid",
            put(mark_payment_paid),
        )
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    policy_id: Uuid,
    amount: Decimal,
    frequency: String,
    due_date: NaiveDate,
    paid_date: Option<NaiveDate>,
    payment_method: Option<String>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl PaymentRow {
    fn into_payment(self) -> Result<PremiumPayment, AppError> {
        let frequency: PaymentFrequency = self.frequency.parse().map_err(|e| {
            AppError::Internal(format!("premium payment {} is unreadable: {e}", self.id))
        })?;
        Ok(PremiumPayment {
            id: self.id,
            policy_id: self.policy_id,
            amount: self.amount,
            frequency,
            due_date: self.due_date,
            paid_date: self.paid_date,
            payment_method: self.payment_method,
            notes: self.notes,
            created_at: self.created_at,
        })
    }
}

/// Unpaid payments across every policy the user owns, earliest due first.
pub(crate) async fn unpaid_payments<'e, E: PgExecutor<'e>>(
    executor: E,
    user_id: Uuid,
) -> Result<Vec<PremiumPayment>, AppError> {
    sqlx::query_as::<_, PaymentRow>(
        "SELECT pp.id, pp.policy_id, pp.amount, pp.frequency, pp.due_date, pp.paid_date, \
                pp.payment_method, pp.notes, pp.created_at \
         FROM premium_payments pp \
         JOIN policies p ON p.id = pp.policy_id \
         WHERE p.user_id = $1 AND pp.paid_date IS NULL \
         ORDER BY pp.due_date ASC, pp.id ASC",
    )
    .bind(user_id)
    .fetch_all(executor)
    .await?
    .into_iter()
    .map(PaymentRow::into_payment)
    .collect()
}

#[utoipa::path(
    get,
    path = "/v1/policies/{id}/payments",
    params(("id" = Uuid, Path, description = "Policy id")),
    responses(
        (status = 200, description = "Scheduled payments, earliest due first", body = Vec<PremiumPayment>),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn list_payments(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(policy_id): Path<Uuid>,
) -> Result<Json<Vec<PremiumPayment>>, AppError> {
    fetch_owned_policy(&state.db, auth.user_id, policy_id).await?;

    let payments = sqlx::query_as::<_, PaymentRow>(
        "SELECT id, policy_id, amount, frequency, due_date, paid_date, payment_method, notes, \
                created_at \
         FROM premium_payments WHERE policy_id = $1 ORDER BY due_date ASC, id ASC",
    )
    .bind(policy_id)
    .fetch_all(&state.db)
    .await?
    .into_iter()
    .map(PaymentRow::into_payment)
    .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(payments))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct AddPaymentRequest {
    /// Amount due in dollars, a number or a decimal string
    pub amount: Decimal,
    pub frequency: PaymentFrequency,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[utoipa::path(
    post,
    path = "/v1/policies/{id}/payments",
    params(("id" = Uuid, Path, description = "Policy id")),
    request_body = AddPaymentRequest,
    responses(
        (status = 201, description = "Payment scheduled", body = PremiumPayment),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn add_payment(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(policy_id): Path<Uuid>,
    AppJson(req): AppJson<AddPaymentRequest>,
) -> Result<(StatusCode, Json<PremiumPayment>), AppError> {
    let amount = req
        .amount
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    if (amount.is_sign_negative() && !amount.is_zero()) || amount > MAX_AMOUNT {
        return Err(AppError::Validation {
            message: "amount must be between 0 and 999999999999.99".to_string(),
            field: Some("amount".to_string()),
            received: Some(serde_json::Value::String(req.amount.to_string())),
            docs_hint: Some("Amounts are dollars, at most two decimals.".to_string()),
        });
    }
    fetch_owned_policy(&state.db, auth.user_id, policy_id).await?;

    let payment = sqlx::query_as::<_, PaymentRow>(
        r#"
        INSERT INTO premium_payments
            (id, policy_id, amount, frequency, due_date, payment_method, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id, policy_id, amount, frequency, due_date, paid_date, payment_method, notes,
                  created_at
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(policy_id)
    .bind(amount.abs())
    .bind(req.frequency.as_str())
    .bind(req.due_date)
    .bind(&req.payment_method)
    .bind(&req.notes)
    .fetch_one(&state.db)
    .await?
    .into_payment()?;

    tracing::info!(
        user_id = %auth.user_id,
        policy_id = %policy_id,
        payment_id = %payment.id,
        due_date = %payment.due_date,
        "premium payment scheduled"
    );
    Ok((StatusCode::CREATED, Json(payment)))
}

#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct MarkPaidRequest {
    /// Defaults to today
    #[serde(default)]
    pub paid_date: Option<NaiveDate>,
    #[serde(default)]
    pub payment_method: Option<String>,
}

#[utoipa::path(
    put,
    path = "/v1/policies/{id}/payments/{payment_id}/paid",
    params(
        ("id" = Uuid, Path, description = "Policy id"),
        ("payment_id" = Uuid, Path, description = "Payment id")
    ),
    request_body = MarkPaidRequest,
    responses(
        (status = 200, description = "Payment marked as paid", body = PremiumPayment),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn mark_payment_paid(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path((policy_id, payment_id)): Path<(Uuid, Uuid)>,
    AppJson(req): AppJson<MarkPaidRequest>,
) -> Result<Json<PremiumPayment>, AppError> {
    let paid_date = req.paid_date.unwrap_or_else(|| Utc::now().date_naive());

    let payment = sqlx::query_as::<_, PaymentRow>(
        "UPDATE premium_payments pp \
         SET paid_date = $4, payment_method = COALESCE($5, pp.payment_method) \
         FROM policies p \
         WHERE pp.id = $1 AND pp.policy_id = $2 AND p.id = pp.policy_id AND p.user_id = $3 \
         RETURNING pp.id, pp.policy_id, pp.amount, pp.frequency, pp.due_date, pp.paid_date, \
                   pp.payment_method, pp.notes, pp.created_at",
    )
    .bind(payment_id)
    .bind(policy_id)
    .bind(auth.user_id)
    .bind(paid_date)
    .bind(&req.payment_method)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::not_found("Premium payment"))?
    .into_payment()?;

    Ok(Json(payment))
}

#[utoipa::path(
    delete,
    path = "/v1/policies/{id}/payments/{payment_id}",
    params(
        ("id" = Uuid, Path, description = "Policy id"),
        ("payment_id" = Uuid, Path, description = "Payment id")
    ),
    responses(
        (status = 204, description = "Payment deleted"),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn delete_payment(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path((policy_id, payment_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    let result = sqlx::query(
        "DELETE FROM premium_payments pp \
         USING policies p \
         WHERE pp.id = $1 AND pp.policy_id = $2 AND p.id = pp.policy_id AND p.user_id = $3",
    )
    .bind(payment_id)
    .bind(policy_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Premium payment"));
    }
    Ok(StatusCode::NO_CONTENT)
}
