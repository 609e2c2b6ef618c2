use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use covrabl_core::auth;
use covrabl_core::error::ApiError;

use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn register_router() -> Router<AppState> {
    Router::new().route("/v1/auth/register", post(register))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Shown once. Only its hash is stored.
    pub api_key: String,
    pub key_prefix: String,
}

fn validate_registration(req: &RegisterRequest) -> Result<(), AppError> {
    let email = req.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::Validation {
            message: "email must be a valid address".to_string(),
            field: Some("email".to_string()),
            received: Some(serde_json::Value::String(req.email.clone())),
            docs_hint: None,
        });
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation {
            message: format!("password must be at least {MIN_PASSWORD_LEN} characters"),
            field: Some("password".to_string()),
            received: None,
            docs_hint: None,
        });
    }
    Ok(())
}

/// Create a user and issue its first API key
#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = RegisterResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 409, description = "Email already exists", body = ApiError)
    ),
    tag = "auth"
)]
pub async fn register(
    State(state): State<AppState>,
    AppJson(req): AppJson<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    validate_registration(&req)?;

    let email = req.email.trim().to_lowercase();
    let password_hash = auth::hash_password(&req.password).map_err(AppError::Internal)?;
    let (api_key, key_hash) = auth::generate_api_key();
    let key_prefix = auth::key_prefix(&api_key);
    let user_id = Uuid::now_v7();

    let mut tx = state.db.begin().await?;

    sqlx::query(
        "INSERT INTO users (id, email, password_hash, display_name) VALUES ($1, $2, $3, $4)",
    )
    .bind(user_id)
    .bind(&email)
    .bind(&password_hash)
    .bind(&req.display_name)
    .execute(&mut *tx)
    .await
    .map_err(|e| {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.code().as_deref() == Some("23505") {
                return AppError::Conflict {
                    message: format!("Email '{email}' is already registered"),
                    field: Some("email".to_string()),
                };
            }
        }
        AppError::Database(e)
    })?;

    sqlx::query(
        "INSERT INTO api_keys (id, user_id, key_hash, key_prefix) VALUES ($1, $2, $3, $4)",
    )
    .bind(Uuid::now_v7())
    .bind(user_id)
    .bind(&key_hash)
    .bind(&key_prefix)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(user_id = %user_id, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id,
            email,
            display_name: req.display_name,
            api_key,
            key_prefix,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::integration_state_if_available;

    fn request(email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            display_name: None,
        }
    }

    #[test]
    fn email_needs_at_sign() {
        let err = validate_registration(&request("not-an-email", "long enough")).unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "email"));
    }

    #[test]
    fn short_password_is_rejected() {
        let err = validate_registration(&request("a@b.example", "short")).unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "password"));
        assert!(validate_registration(&request("a@b.example", "12345678")).is_ok());
    }

    #[tokio::test]
    async fn register_issues_key_and_rejects_duplicate_email() {
        let Some((state, _)) = integration_state_if_available().await else {
            return;
        };
        let email = format!("Register-{}@Example.test", Uuid::now_v7());

        let (status, Json(created)) = register(
            State(state.clone()),
            AppJson(request(&email, "correct horse")),
        )
        .await
        .expect("register");
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.email, email.to_lowercase());
        assert!(created.api_key.starts_with(auth::API_KEY_PREFIX));
        assert_eq!(created.key_prefix, auth::key_prefix(&created.api_key));

        let stored: String = sqlx::query_scalar("SELECT key_hash FROM api_keys WHERE user_id = $1")
            .bind(created.user_id)
            .fetch_one(&state.db)
            .await
            .expect("key row");
        assert_eq!(stored, auth::hash_token(&created.api_key));

        let err = register(State(state), AppJson(request(&email, "another password")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { field: Some(ref f), .. } if f == "email"));
    }
}
