// Shared enums and the error taxonomy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::rpc::RpcError;

/// What a transaction paid for. Stored as text in the transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionKind {
    SessionOpen,
    SessionUse,
    CreditTopup,
    CreditSpend,
    Other,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::SessionOpen => "session-open",
            TransactionKind::SessionUse => "session-use",
            TransactionKind::CreditTopup => "credit-topup",
            TransactionKind::CreditSpend => "credit-spend",
            TransactionKind::Other => "other",
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session-open" => Ok(TransactionKind::SessionOpen),
            "session-use" => Ok(TransactionKind::SessionUse),
            "credit-topup" => Ok(TransactionKind::CreditTopup),
            "credit-spend" => Ok(TransactionKind::CreditSpend),
            "other" => Ok(TransactionKind::Other),
            other => Err(format!("unknown transaction kind: {other}")),
        }
    }
}

/// Lifecycle of a submitted transaction. `Confirmed` and `Failed` are
/// terminal: once written they are never overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Confirmed => "confirmed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "confirmed" => Ok(TransactionStatus::Confirmed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

/// Lifecycle of a payment session. `Expired`, `Revoked` and `Depleted` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Expired,
    Revoked,
    Depleted,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Expired => "expired",
            SessionStatus::Revoked => "revoked",
            SessionStatus::Depleted => "depleted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "expired" => Ok(SessionStatus::Expired),
            "revoked" => Ok(SessionStatus::Revoked),
            "depleted" => Ok(SessionStatus::Depleted),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Settlement RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Payment rejected by payer: {0}")]
    PaymentRejected(String),

    #[error("Insufficient on-chain funds: {0}")]
    InsufficientFunds(String),

    #[error("Payment session not found")]
    SessionNotFound,

    #[error("Payment session expired")]
    SessionExpired,

    #[error("Payment session revoked")]
    SessionRevoked,

    #[error("Payment session depleted")]
    SessionDepleted,

    #[error("Insufficient session balance: {remaining} remaining, {requested} requested")]
    InsufficientSessionBalance { remaining: f64, requested: f64 },

    #[error("Insufficient credits: {balance} available, {requested} requested")]
    InsufficientCredits { balance: f64, requested: f64 },

    #[error("Auto top-up required: balance {balance} below threshold {threshold}")]
    AutoTopupRequired {
        balance: f64,
        threshold: f64,
        suggested_amount: f64,
    },

    #[error("Payment required: {amount_usd} USD")]
    PaymentRequired { amount_usd: f64 },

    #[error("Invalid payment header: {0}")]
    InvalidHeader(String),

    #[error("Payment verification failed: {0}")]
    VerificationFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PaymentError {
    /// Stable machine-readable code carried in error responses.
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::Database(_) => "database_error",
            PaymentError::Rpc(_) => "rpc_error",
            PaymentError::PaymentRejected(_) => "payment_rejected",
            PaymentError::InsufficientFunds(_) => "insufficient_funds",
            PaymentError::SessionNotFound => "session_not_found",
            PaymentError::SessionExpired => "session_expired",
            PaymentError::SessionRevoked => "session_revoked",
            PaymentError::SessionDepleted => "session_depleted",
            PaymentError::InsufficientSessionBalance { .. } => "insufficient_session_balance",
            PaymentError::InsufficientCredits { .. } => "insufficient_credits",
            PaymentError::AutoTopupRequired { .. } => "auto_topup_required",
            PaymentError::PaymentRequired { .. } => "payment_required",
            PaymentError::InvalidHeader(_) => "invalid_payment_header",
            PaymentError::VerificationFailed(_) => "verification_failed",
            PaymentError::NotFound(_) => "not_found",
            PaymentError::InvalidRequest(_) => "invalid_request",
            PaymentError::Internal(_) => "internal_error",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            PaymentError::Database(_) | PaymentError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            PaymentError::Rpc(_) => StatusCode::BAD_GATEWAY,
            PaymentError::PaymentRejected(_)
            | PaymentError::InsufficientFunds(_)
            | PaymentError::SessionExpired
            | PaymentError::SessionRevoked
            | PaymentError::SessionDepleted
            | PaymentError::InsufficientSessionBalance { .. }
            | PaymentError::InsufficientCredits { .. }
            | PaymentError::AutoTopupRequired { .. }
            | PaymentError::PaymentRequired { .. }
            | PaymentError::VerificationFailed(_) => StatusCode::PAYMENT_REQUIRED,
            PaymentError::SessionNotFound | PaymentError::NotFound(_) => StatusCode::NOT_FOUND,
            PaymentError::InvalidHeader(_) | PaymentError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
        }
    }
}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        // 402 responses name the amount the caller still needs to cover.
        match &self {
            PaymentError::PaymentRequired { amount_usd } => {
                body["amount_usd"] = serde_json::json!(amount_usd);
            }
            PaymentError::AutoTopupRequired {
                suggested_amount, ..
            } => {
                body["suggested_topup_usd"] = serde_json::json!(suggested_amount);
            }
            _ => {}
        }
        (status, Json(body)).into_response()
    }
}

pub type PaymentResult<T> = std::result::Result<T, PaymentError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            TransactionKind::SessionOpen,
            TransactionKind::SessionUse,
            TransactionKind::CreditTopup,
            TransactionKind::CreditSpend,
            TransactionKind::Other,
        ] {
            assert_eq!(TransactionKind::from_str(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(TransactionStatus::Confirmed.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());

        assert!(!SessionStatus::Active.is_terminal());
        assert!(SessionStatus::Expired.is_terminal());
        assert!(SessionStatus::Revoked.is_terminal());
        assert!(SessionStatus::Depleted.is_terminal());
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            PaymentError::InsufficientCredits {
                balance: 0.0,
                requested: 1.0
            }
            .code(),
            "insufficient_credits"
        );
        assert_eq!(PaymentError::SessionNotFound.code(), "session_not_found");
    }
}
