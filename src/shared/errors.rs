use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::security::permissions::{Module, PermAction};

/// Error taxonomy for the core engine. Every domain variant is recoverable
/// by the caller and maps to a distinct, actionable message; none of them
/// leaves an entity partially modified.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("actor is not authorized for {module}.{action}")]
    Unauthorized { module: Module, action: PermAction },

    #[error("transition from '{from}' to '{to}' is not permitted")]
    InvalidTransition { from: String, to: String },

    #[error("lead has no assigned agent")]
    MissingAssignee,

    #[error("agent does not belong to the lead's agency")]
    CrossAgencyViolation,

    #[error("record was modified by another request")]
    ConcurrentModification,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("request is not authenticated")]
    Unauthenticated,

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
}

impl CoreError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized { .. } => StatusCode::FORBIDDEN,
            Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::MissingAssignee => StatusCode::UNPROCESSABLE_ENTITY,
            Self::CrossAgencyViolation => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ConcurrentModification => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Database(_) | Self::Pool(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "unauthorized",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::MissingAssignee => "missing_assignee",
            Self::CrossAgencyViolation => "cross_agency_violation",
            Self::ConcurrentModification => "concurrent_modification",
            Self::NotFound(_) => "not_found",
            Self::Unauthenticated => "unauthenticated",
            Self::Database(_) => "database_error",
            Self::Pool(_) => "pool_error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Unauthorized { module, action } => {
                format!("You don't have permission for {}.{}", module, action)
            }
            Self::InvalidTransition { from, to } => {
                format!("Cannot move this record from '{}' to '{}'", from, to)
            }
            Self::MissingAssignee => "Assign an agent before approving".to_string(),
            Self::CrossAgencyViolation => {
                "The selected agent belongs to a different agency".to_string()
            }
            Self::ConcurrentModification => {
                "This record changed while you were editing it, please retry".to_string()
            }
            Self::NotFound(what) => format!("{} not found", what),
            Self::Unauthenticated => "Authentication is required".to_string(),
            Self::Database(_) | Self::Pool(_) => "An internal error occurred".to_string(),
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("internal error: {}", self);
        }
        let body = Json(json!({
            "error": self.error_code(),
            "message": self.message()
        }));
        (status, body).into_response()
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err = CoreError::Unauthorized {
            module: Module::Properties,
            action: PermAction::Edit,
        };
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.error_code(), "unauthorized");

        assert_eq!(
            CoreError::ConcurrentModification.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            CoreError::NotFound("Property").status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_messages_are_actionable() {
        assert!(CoreError::MissingAssignee.message().contains("Assign an agent"));
        assert!(CoreError::ConcurrentModification.message().contains("retry"));
    }
}
