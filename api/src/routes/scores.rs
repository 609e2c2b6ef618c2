use std::collections::HashMap;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use uuid::Uuid;

use covrabl_core::error::ApiError;
use covrabl_core::scores::{OVERALL, PolicyDetails, PortfolioScores, ScoreResult, score_portfolio};

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::routes::policies::{fetch_details, list_user_policies};
use crate::state::AppState;

pub fn read_router() -> Router<AppState> {
    Router::new().route("/v1/coverage-scores", get(get_scores))
}

pub fn write_router() -> Router<AppState> {
    Router::new().route("/v1/coverage-scores/recalculate", post(recalculate_scores))
}

/// Score the caller's current policies and replace the cached rows.
///
/// Rows for categories missing from this pass are deleted in the same transaction.
/// `rebuild` deletes every cached row first.
async fn compute_and_store(
    state: &AppState,
    user_id: Uuid,
    rebuild: bool,
) -> Result<PortfolioScores, AppError> {
    let policies = list_user_policies(&state.db, user_id).await?;
    let ids: Vec<Uuid> = policies.iter().map(|p| p.id).collect();
    let details: PolicyDetails = fetch_details(&state.db, &ids)
        .await?
        .into_iter()
        .map(|(policy_id, fields)| {
            let by_name: HashMap<String, String> = fields
                .into_iter()
                .map(|d| (d.field_name.to_lowercase(), d.field_value))
                .collect();
            (policy_id, by_name)
        })
        .collect();

    let snapshots: Vec<_> = policies.iter().map(|p| p.snapshot()).collect();
    let scores = score_portfolio(&snapshots, &details, &state.thresholds, Utc::now());

    // an empty keep-list matches every row
    let keep: Vec<String> = if rebuild {
        Vec::new()
    } else {
        scores
            .categories
            .keys()
            .map(|c| c.as_str().to_string())
            .chain([OVERALL.to_string()])
            .collect()
    };

    let mut tx = state.db.begin().await?;
    let purged = sqlx::query(
        "DELETE FROM coverage_scores WHERE user_id = $1 AND category <> ALL($2)",
    )
    .bind(user_id)
    .bind(keep)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    for (category, result) in &scores.categories {
        upsert_score(&mut tx, user_id, category.as_str(), result).await?;
    }
    upsert_score(&mut tx, user_id, OVERALL, &scores.overall).await?;
    tx.commit().await?;

    tracing::debug!(
        user_id = %user_id,
        overall = scores.overall.score,
        policy_count = scores.policy_count,
        purged,
        "coverage scores recalculated"
    );

    Ok(scores)
}

async fn upsert_score(
    conn: &mut sqlx::PgConnection,
    user_id: Uuid,
    category: &str,
    result: &ScoreResult,
) -> Result<(), AppError> {
    let breakdown = serde_json::to_value(&result.breakdown)
        .map_err(|e| AppError::Internal(format!("Failed to serialize breakdown: {e}")))?;
    let insights = serde_json::to_value(&result.insights)
        .map_err(|e| AppError::Internal(format!("Failed to serialize insights: {e}")))?;

    sqlx::query(
        r#"
        INSERT INTO coverage_scores (user_id, category, score, breakdown, insights, last_calculated)
        VALUES ($1, $2, $3, $4, $5, NOW())
        ON CONFLICT (user_id, category) DO UPDATE
        SET score = EXCLUDED.score,
            breakdown = EXCLUDED.breakdown,
            insights = EXCLUDED.insights,
            last_calculated = EXCLUDED.last_calculated
        "#,
    )
    .bind(user_id)
    .bind(category)
    .bind(result.score)
    .bind(breakdown)
    .bind(insights)
    .execute(conn)
    .await?;
    Ok(())
}

/// Current coverage scores
///
/// Recomputed from the caller's policies on every call; the stored rows are a cache.
#[utoipa::path(
    get,
    path = "/v1/coverage-scores",
    responses(
        (status = 200, description = "Overall and per-category scores", body = PortfolioScores),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "scores"
)]
pub async fn get_scores(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<PortfolioScores>, AppError> {
    Ok(Json(compute_and_store(&state, auth.user_id, false).await?))
}

#[utoipa::path(
    post,
    path = "/v1/coverage-scores/recalculate",
    responses(
        (status = 200, description = "Scores rebuilt from scratch", body = PortfolioScores),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "scores"
)]
pub async fn recalculate_scores(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<PortfolioScores>, AppError> {
    Ok(Json(compute_and_store(&state, auth.user_id, true).await?))
}

#[cfg(test)]
mod tests {
    use axum::extract::State;
    use serde_json::json;

    use super::*;
    use crate::extract::AppJson;
    use crate::routes::policies::{CreatePolicyRequest, PolicyDetail, create_policy};
    use crate::routes::test_support::integration_state_if_available;
    use covrabl_core::scores::Category;

    #[tokio::test]
    async fn scores_are_cached_per_category_and_overall() {
        let Some((state, auth)) = integration_state_if_available().await else {
            return;
        };

        create_policy(
            State(state.clone()),
            auth.clone(),
            AppJson(CreatePolicyRequest {
                nickname: None,
                fields: serde_json::from_value(json!({
                    "policy_type": "Auto", "carrier": "Acme", "coverage_amount": 100000
                }))
                .unwrap(),
                details: vec![PolicyDetail {
                    field_name: "Coverage_Type".to_string(),
                    field_value: "Comprehensive, Collision, Uninsured Motorist".to_string(),
                }],
            }),
        )
        .await
        .expect("create policy");

        let Json(scores) = get_scores(State(state.clone()), auth.clone())
            .await
            .expect("scores");
        assert_eq!(scores.policy_count, 1);
        assert_eq!(scores.categories[&Category::Auto].score, 100);
        assert_eq!(scores.overall.score, 100);

        let Json(rebuilt) = recalculate_scores(State(state.clone()), auth.clone())
            .await
            .expect("recalculate");
        assert_eq!(rebuilt, scores);

        let rows: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM coverage_scores WHERE user_id = $1")
                .bind(auth.user_id)
                .fetch_one(&state.db)
                .await
                .expect("count");
        assert_eq!(rows, Category::SCORED.len() as i64 + 1);
    }

    async fn cached_categories(state: &AppState, user_id: Uuid) -> Vec<String> {
        sqlx::query_scalar(
            "SELECT category FROM coverage_scores WHERE user_id = $1 ORDER BY category",
        )
        .bind(user_id)
        .fetch_all(&state.db)
        .await
        .expect("cached categories")
    }

    async fn add_policy(state: &AppState, auth: &AuthenticatedUser, policy_type: &str) {
        create_policy(
            State(state.clone()),
            auth.clone(),
            AppJson(CreatePolicyRequest {
                nickname: None,
                fields: serde_json::from_value(json!({
                    "policy_type": policy_type, "carrier": "Acme", "coverage_amount": 300000
                }))
                .unwrap(),
                details: vec![],
            }),
        )
        .await
        .expect("create policy");
    }

    #[tokio::test]
    async fn renters_row_is_dropped_once_a_home_policy_exists() {
        let Some((state, auth)) = integration_state_if_available().await else {
            return;
        };

        add_policy(&state, &auth, "renters").await;
        let Json(first) = get_scores(State(state.clone()), auth.clone())
            .await
            .expect("scores");
        assert!(first.categories.contains_key(&Category::Renters));
        assert!(
            cached_categories(&state, auth.user_id)
                .await
                .contains(&Category::Renters.as_str().to_string())
        );

        add_policy(&state, &auth, "home").await;
        let Json(second) = get_scores(State(state.clone()), auth.clone())
            .await
            .expect("scores");
        assert!(!second.categories.contains_key(&Category::Renters));

        let cached = cached_categories(&state, auth.user_id).await;
        assert!(!cached.contains(&Category::Renters.as_str().to_string()));
        assert!(cached.contains(&OVERALL.to_string()));
        assert_eq!(cached.len(), Category::SCORED.len() + 1);
    }

    #[tokio::test]
    async fn recalculate_replaces_rows_in_one_pass() {
        let Some((state, auth)) = integration_state_if_available().await else {
            return;
        };

        sqlx::query(
            "INSERT INTO coverage_scores (user_id, category, score) VALUES ($1, 'retired', 10)",
        )
        .bind(auth.user_id)
        .execute(&state.db)
        .await
        .expect("seed stale row");

        let Json(rebuilt) = recalculate_scores(State(state.clone()), auth.clone())
            .await
            .expect("recalculate");
        assert_eq!(rebuilt.overall.score, 0);

        let cached = cached_categories(&state, auth.user_id).await;
        assert!(!cached.contains(&"retired".to_string()));
        assert_eq!(cached.len(), Category::SCORED.len() + 1);
    }

    #[tokio::test]
    async fn no_policies_scores_zero() {
        let Some((state, auth)) = integration_state_if_available().await else {
            return;
        };
        let Json(scores) = get_scores(State(state), auth).await.expect("scores");
        assert_eq!(scores.overall.score, 0);
        assert_eq!(scores.policy_count, 0);
    }
}
