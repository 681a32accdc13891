use axum::{
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::lifecycle::VoucherError;
use crate::services::qr_code::QrRenderError;
use crate::services::redemption::RedemptionOutcome;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A business rule turned the request down; nothing was changed
    #[error("{message}")]
    Rejected {
        kind: &'static str,
        message: String,
    },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Redemption failed")]
    RedemptionFailed,

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Rejected { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Persistence(_) | AppError::RedemptionFailed | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable error kind for response bodies
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::Rejected { kind, .. } => *kind,
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::Persistence(_) => "persistence_error",
            AppError::RedemptionFailed => "redemption_failed",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Maps a non-successful redemption outcome to its error response
    pub fn from_outcome(outcome: &RedemptionOutcome) -> Self {
        let rejected = |message: &str| AppError::Rejected {
            kind: outcome.result_type(),
            message: message.to_string(),
        };

        match outcome {
            RedemptionOutcome::Redeemed { .. } | RedemptionOutcome::RedemptionFailed => {
                AppError::RedemptionFailed
            }
            RedemptionOutcome::VoucherNotFound => AppError::NotFound("Voucher not found".to_string()),
            RedemptionOutcome::Expired => rejected("Voucher has expired"),
            RedemptionOutcome::AlreadyUsed => rejected("Voucher has already been used"),
            RedemptionOutcome::LocationMismatch { required, .. } => AppError::Rejected {
                kind: outcome.result_type(),
                message: format!("Voucher can only be redeemed in {}", required),
            },
            RedemptionOutcome::MerchantNotAssociated => {
                rejected("Voucher is not distributed to this merchant")
            }
            RedemptionOutcome::NoneAvailable => rejected("Voucher has no redemptions left"),
        }
    }
}

impl From<VoucherError> for AppError {
    fn from(err: VoucherError) -> Self {
        match err {
            VoucherError::Validation(msg) => AppError::Validation(msg),
            VoucherError::NotFound => AppError::NotFound("Voucher not found".to_string()),
            VoucherError::Persistence(e) => AppError::Persistence(e),
            VoucherError::CodeGeneration(e) => AppError::Internal(e.into()),
        }
    }
}

impl From<QrRenderError> for AppError {
    fn from(err: QrRenderError) -> Self {
        match err {
            QrRenderError::NotQrVoucher => AppError::Validation(err.to_string()),
            QrRenderError::QrCodeError(_) => AppError::Internal(err.into()),
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = match &self {
            AppError::Persistence(e) => {
                tracing::error!(error = %e, "Persistence failure");
                "Database error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!(error = %e, "Internal failure");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "success": false,
            "error": self.kind(),
            "message": message,
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
