//! HTTP rendering of ledger errors.
//!
//! Every failure is a JSON body `{"code": ..., "message": ...}`.  Store,
//! archive, and configuration failures are collapsed into `INTERNAL_ERROR`
//! with a generic message; their detail only goes to the log.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use ledger_contracts::error::LedgerError;

#[derive(Debug)]
pub struct ApiError(pub LedgerError);

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            LedgerError::Validation { .. } | LedgerError::Batch { .. } => StatusCode::BAD_REQUEST,
            LedgerError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            LedgerError::Forbidden { .. } | LedgerError::ModuleNotAllowed { .. } => StatusCode::FORBIDDEN,
            LedgerError::AlreadySealed { .. }
            | LedgerError::SealConflict { .. }
            | LedgerError::RetentionLocked { .. } => StatusCode::CONFLICT,
            // Fork conflicts reach here only after the engine's retries.
            LedgerError::ForkConflict { .. } | LedgerError::Timeout { .. } | LedgerError::Store { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            LedgerError::ChainBroken { .. } | LedgerError::Archive { .. } | LedgerError::Config { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn body(&self) -> ErrorBody {
        match &self.0 {
            LedgerError::Store { .. }
            | LedgerError::Archive { .. }
            | LedgerError::Config { .. }
            | LedgerError::ChainBroken { .. } => ErrorBody {
                code: "INTERNAL_ERROR",
                message: "internal error".to_string(),
            },
            other => ErrorBody {
                code: other.code(),
                message: other.to_string(),
            },
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.0.code(), error = %self.0, "request failed");
        }
        (status, Json(self.body())).into_response()
    }
}
