use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::allocation::AllocationError;
use crate::auth::CredentialError;
use crate::import::ImportError;
use crate::store::StoreError;

#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    pub code: String,
    pub request_id: String,
}

impl ProblemDetails {
    fn new(status: StatusCode, code: impl Into<String>, detail: impl Into<String>) -> Self {
        let code = code.into();
        let title = status
            .canonical_reason()
            .unwrap_or("Unknown Error")
            .to_string();
        Self {
            r#type: format!("https://festreg.dev/problems/{code}"),
            title,
            status: status.as_u16(),
            detail: detail.into(),
            instance: None,
            code,
            request_id: "unknown".to_string(),
        }
    }

    fn set_request_id(&mut self, request_id: impl Into<String>) {
        let request_id = request_id.into();
        self.request_id = request_id.clone();
        if self.instance.is_none() {
            self.instance = Some(request_id);
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub problem: Box<ProblemDetails>,
}

impl ApiError {
    fn with_status(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::NOT_FOUND, code, message)
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::CONFLICT, code, message)
    }

    pub fn unauthorized(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::UNAUTHORIZED, code, message)
    }

    pub fn forbidden(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::FORBIDDEN, code, message)
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.problem.set_request_id(request_id);
        self
    }

    /// Maps a storage failure, logging anything that is not a client error.
    pub fn from_store(e: StoreError, request_id: &str, action: &str) -> Self {
        let err = match &e {
            StoreError::Conflict(constraint) => match constraint.as_str() {
                "users_nickname_key" => {
                    ApiError::conflict("nickname_taken", "Nickname is already taken")
                }
                "users_username_key" => {
                    ApiError::conflict("username_taken", "Username is already taken")
                }
                _ => ApiError::conflict("conflict", "Conflicting record exists"),
            },
            StoreError::NotFound(_) => ApiError::not_found("not_found", "Record not found"),
            StoreError::Corrupt(_) | StoreError::Query(_) | StoreError::Unavailable(_) => {
                tracing::error!(error = %e, request_id = %request_id, "Failed to {action}");
                ApiError::internal("internal_error", format!("Failed to {action}"))
            }
        };
        err.with_request_id(request_id)
    }
}

impl From<AllocationError> for ApiError {
    fn from(e: AllocationError) -> Self {
        let code = e.code();
        match e {
            AllocationError::CapacityExceeded { .. }
            | AllocationError::AlreadyMember { .. }
            | AllocationError::NotMember { .. } => ApiError::conflict(code, e.to_string()),
            AllocationError::PoolNotFound(_) | AllocationError::UserNotFound(_) => {
                ApiError::not_found(code, e.to_string())
            }
            AllocationError::Storage(StoreError::Conflict(_)) => {
                ApiError::conflict(code, e.to_string())
            }
            AllocationError::Storage(ref inner) => {
                tracing::error!(error = %inner, "Allocation storage failure");
                ApiError::internal(code, "Failed to update membership")
            }
        }
    }
}

impl From<ImportError> for ApiError {
    fn from(e: ImportError) -> Self {
        match e {
            ImportError::Csv(_) => ApiError::bad_request("invalid_csv", e.to_string()),
            ImportError::MissingColumn(_) => ApiError::bad_request("missing_column", e.to_string()),
            ImportError::Persistence(ref inner) => {
                tracing::error!(error = %inner, "Shift import rolled back");
                ApiError::internal("import_failed", "Failed to store imported shifts")
            }
        }
    }
}

impl From<CredentialError> for ApiError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::PasswordMismatch => {
                ApiError::bad_request("password_mismatch", e.to_string())
            }
            CredentialError::PasswordTooShort => {
                ApiError::bad_request("password_too_short", e.to_string())
            }
            CredentialError::InvalidCredentials => {
                ApiError::unauthorized("invalid_credentials", "Invalid username or password")
            }
            CredentialError::InvalidToken(_) => {
                ApiError::unauthorized("unauthorized", "Missing or invalid session token")
            }
            CredentialError::Hashing(_) | CredentialError::Signing(_) => {
                tracing::error!(error = %e, "Credential operation failed");
                ApiError::internal("internal_error", "Failed to process credentials")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.problem)).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}
