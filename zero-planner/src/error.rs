//! Error types for zero-planner.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use zero_common::ValidationError;

/// Planner service errors.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Simulation failed: {0}")]
    Simulation(#[from] SimulationError),

    #[error("Worker pool unavailable: {0}")]
    WorkerPool(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Common(#[from] zero_common::Error),
}

impl PlannerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::Validation(_) | Self::Simulation(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Common(e) => {
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::WorkerPool(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PlannerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

/// Fault in one sequence's data. Isolated to that sequence within a batch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationError {
    #[error("security not found in directory: {isin} ({symbol})")]
    UnknownSecurity { isin: String, symbol: String },

    #[error("action {index} ({isin}): quantity must be positive, got {quantity}")]
    InvalidQuantity {
        index: usize,
        isin: String,
        quantity: f64,
    },

    #[error("action {index} ({isin}): price must be finite and non-negative, got {price}")]
    InvalidPrice { index: usize, isin: String, price: f64 },

    #[error("action {index} ({isin}): value must be finite and non-negative, got {value}")]
    InvalidValue { index: usize, isin: String, value: f64 },
}
