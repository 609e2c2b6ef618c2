use axum::extract::{Path, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::PgConnection;
use uuid::Uuid;

use covrabl_core::error::ApiError;
use covrabl_core::reminders::{SmartAlert, policy_label, reminder_dates, smart_alerts};

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::routes::payments::unpaid_payments;
use crate::routes::policies::list_user_policies;
use crate::state::AppState;

pub fn read_router() -> Router<AppState> {
    Router::new()
        .route("/v1/reminders/active", get(active_reminders))
        .route("/v1/reminders/smart", get(smart_reminders))
}

pub fn write_router() -> Router<AppState> {
    Router::new().route("/v1/reminders/{id}/dismiss", put(dismiss_reminder))
}

/// Replace a policy's reminders with the schedule for `renewal_date`.
pub(crate) async fn replace_reminders(
    conn: &mut PgConnection,
    policy_id: Uuid,
    renewal_date: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM renewal_reminders WHERE policy_id = $1")
        .bind(policy_id)
        .execute(&mut *conn)
        .await?;

    let Some(renewal_date) = renewal_date else {
        return Ok(());
    };
    for remind_at in reminder_dates(renewal_date, today) {
        sqlx::query(
            "INSERT INTO renewal_reminders (id, policy_id, remind_at) VALUES ($1, $2, $3)",
        )
        .bind(Uuid::now_v7())
        .bind(policy_id)
        .bind(remind_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[derive(Debug, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct ActiveReminder {
    pub id: Uuid,
    pub policy_id: Uuid,
    pub remind_at: NaiveDate,
    pub dismissed: bool,
    pub created_at: DateTime<Utc>,
    pub carrier: Option<String>,
    pub policy_type: Option<String>,
    pub nickname: Option<String>,
    pub renewal_date: Option<NaiveDate>,
}

#[utoipa::path(
    get,
    path = "/v1/reminders/active",
    responses(
        (status = 200, description = "Undismissed reminders due today or earlier", body = Vec<ActiveReminder>),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "reminders"
)]
pub async fn active_reminders(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<Vec<ActiveReminder>>, AppError> {
    let rows = sqlx::query_as::<_, ActiveReminder>(
        r#"
        SELECT r.id, r.policy_id, r.remind_at, r.dismissed, r.created_at,
               p.carrier, p.policy_type, p.nickname, p.renewal_date
        FROM renewal_reminders r
        JOIN policies p ON p.id = r.policy_id
        WHERE p.user_id = $1
          AND r.dismissed = FALSE
          AND r.remind_at <= $2
        ORDER BY r.remind_at ASC, r.id ASC
        "#,
    )
    .bind(auth.user_id)
    .bind(Utc::now().date_naive())
    .fetch_all(&state.db)
    .await?;

    Ok(Json(rows))
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct DismissResponse {
    pub id: Uuid,
    pub dismissed: bool,
}

#[utoipa::path(
    put,
    path = "/v1/reminders/{id}/dismiss",
    params(("id" = Uuid, Path, description = "Reminder id")),
    responses(
        (status = 200, description = "Reminder dismissed", body = DismissResponse),
        (status = 404, description = "Not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "reminders"
)]
pub async fn dismiss_reminder(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(reminder_id): Path<Uuid>,
) -> Result<Json<DismissResponse>, AppError> {
    let id: Uuid = sqlx::query_scalar(
        "UPDATE renewal_reminders r SET dismissed = TRUE \
         FROM policies p \
         WHERE r.id = $1 AND p.id = r.policy_id AND p.user_id = $2 \
         RETURNING r.id",
    )
    .bind(reminder_id)
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::not_found("Reminder"))?;

    Ok(Json(DismissResponse {
        id,
        dismissed: true,
    }))
}

/// Computed alerts: overdue and upcoming premium payments, upcoming renewals, possibly
/// expired policies, annual reviews
#[utoipa::path(
    get,
    path = "/v1/reminders/smart",
    responses(
        (status = 200, description = "Alerts, high severity first", body = Vec<SmartAlert>),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "reminders"
)]
pub async fn smart_reminders(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<Vec<SmartAlert>>, AppError> {
    let rows = list_user_policies(&state.db, auth.user_id).await?;
    let payments = unpaid_payments(&state.db, auth.user_id).await?;
    let snapshots: Vec<_> = rows.iter().map(|row| row.snapshot()).collect();
    let labelled = rows
        .iter()
        .zip(&snapshots)
        .map(|(row, snapshot)| (snapshot, policy_label(row.nickname.as_deref(), snapshot)));

    Ok(Json(smart_alerts(
        labelled,
        &payments,
        Utc::now().date_naive(),
    )))
}

#[cfg(test)]
mod tests {
    use axum::extract::{Path, State};
    use chrono::Days;
    use serde_json::json;

    use super::*;
    use crate::extract::AppJson;
    use crate::routes::policies::{CreatePolicyRequest, create_policy};
    use crate::routes::test_support::integration_state_if_available;
    use covrabl_core::reminders::AlertKind;

    #[tokio::test]
    async fn renewal_schedules_reminders_and_alerts() {
        let Some((state, auth)) = integration_state_if_available().await else {
            return;
        };
        let today = Utc::now().date_naive();
        let renewal = today.checked_add_days(Days::new(7)).unwrap();

        let (_, Json(policy)) = create_policy(
            State(state.clone()),
            auth.clone(),
            AppJson(CreatePolicyRequest {
                nickname: Some("Family car".to_string()),
                fields: serde_json::from_value(json!({
                    "policy_type": "auto",
                    "carrier": "Acme",
                    "renewal_date": renewal.format("%Y-%m-%d").to_string()
                }))
                .unwrap(),
                details: vec![],
            }),
        )
        .await
        .expect("create policy");

        // Only the 7-day reminder is not in the past, and it is due today
        let Json(active) = active_reminders(State(state.clone()), auth.clone())
            .await
            .expect("active reminders");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].policy_id, policy.id);
        assert_eq!(active[0].remind_at, today);

        let Json(alerts) = smart_reminders(State(state.clone()), auth.clone())
            .await
            .expect("smart reminders");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::Renewal);
        assert_eq!(alerts[0].title, "Renewal approaching: Family car");

        dismiss_reminder(State(state.clone()), auth.clone(), Path(active[0].id))
            .await
            .expect("dismiss");
        let Json(active) = active_reminders(State(state.clone()), auth.clone())
            .await
            .expect("active reminders");
        assert!(active.is_empty());

        let Some((_, stranger)) = integration_state_if_available().await else {
            return;
        };
        let err = dismiss_reminder(State(state), stranger, Path(Uuid::now_v7()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }
}
