use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use covrabl_core::error::{self, ApiError};
use covrabl_core::policy::FieldError;

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Missing or invalid credentials (401)
    Unauthorized {
        message: String,
        docs_hint: Option<String>,
    },
    /// Entity missing or owned by someone else (404). The two cases are not distinguished.
    NotFound { resource: &'static str },
    /// Unique constraint hit (409)
    Conflict {
        message: String,
        field: Option<String>,
    },
    /// Database error (500)
    Database(sqlx::Error),
    /// Internal error (500)
    Internal(String),
}

impl AppError {
    pub fn not_found(resource: &'static str) -> Self {
        AppError::NotFound { resource }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    received,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::Unauthorized { message, docs_hint } => (
                StatusCode::UNAUTHORIZED,
                ApiError {
                    error: error::codes::UNAUTHORIZED.to_string(),
                    message,
                    field: None,
                    received: None,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::NotFound { resource } => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: error::codes::NOT_FOUND.to_string(),
                    message: format!("{resource} not found"),
                    field: None,
                    received: None,
                    request_id,
                    docs_hint: None,
                },
            ),
            AppError::Conflict { message, field } => (
                StatusCode::CONFLICT,
                ApiError {
                    error: error::codes::CONFLICT.to_string(),
                    message,
                    field,
                    received: None,
                    request_id,
                    docs_hint: None,
                },
            ),
            AppError::Database(err) => {
                if let sqlx::Error::Database(ref db_err) = err {
                    if db_err.code().as_deref() == Some("23505") {
                        return AppError::Conflict {
                            message: "Resource already exists".to_string(),
                            field: None,
                        }
                        .into_response();
                    }
                }

                tracing::error!(error = ?err, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: "An internal error occurred".to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: "An internal error occurred".to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err)
    }
}

impl From<FieldError> for AppError {
    fn from(err: FieldError) -> Self {
        AppError::Validation {
            message: err.message,
            field: Some(format!("fields.{}", err.field)),
            received: Some(err.received),
            docs_hint: Some(
                "Amounts are dollars and cents (number or numeric string); dates are YYYY-MM-DD."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_variant() {
        let cases = [
            (
                AppError::Validation {
                    message: "bad".to_string(),
                    field: None,
                    received: None,
                    docs_hint: None,
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::Unauthorized {
                    message: "no".to_string(),
                    docs_hint: None,
                },
                StatusCode::UNAUTHORIZED,
            ),
            (AppError::not_found("Policy"), StatusCode::NOT_FOUND),
            (
                AppError::Conflict {
                    message: "dup".to_string(),
                    field: Some("email".to_string()),
                },
                StatusCode::CONFLICT,
            ),
            (
                AppError::Internal("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn field_error_names_the_extraction_field() {
        let err: AppError = FieldError {
            field: "premium_amount".to_string(),
            message: "must be a non-negative number".to_string(),
            received: serde_json::json!("abc"),
        }
        .into();

        match err {
            AppError::Validation {
                field, received, ..
            } => {
                assert_eq!(field.as_deref(), Some("fields.premium_amount"));
                assert_eq!(received, Some(serde_json::json!("abc")));
            }
            other => panic!("unexpected error variant: {:?}", other),
        }
    }
}
