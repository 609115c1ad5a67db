use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("slot not found: {0}")]
    SlotNotFound(String),

    #[error("booking not found: {0}")]
    BookingNotFound(String),

    #[error("payment not found: {0}")]
    PaymentNotFound(String),

    #[error("business not found: {0}")]
    BusinessNotFound(String),

    #[error("slot {slot_id} does not belong to business {business_id}")]
    BusinessMismatch { slot_id: String, business_id: String },

    #[error("business {0} is suspended")]
    BusinessSuspended(String),

    #[error("slot {0} is already reserved")]
    SlotAlreadyReserved(String),

    #[error("slot {0} is already booked")]
    SlotAlreadyBooked(String),

    #[error("invalid {entity} transition: {event} from {from}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        event: String,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("cannot cancel within {hours} hours of the appointment")]
    CancellationWindow { hours: i64 },

    #[error("{0}")]
    Policy(String),

    #[error("actor is not allowed to manage business {0}")]
    Forbidden(String),

    #[error("transaction id does not match payment {0}")]
    TransactionMismatch(String),

    #[error("payment {0} has expired")]
    PaymentExpired(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

/// Coarse classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidTransition,
    Conflict,
    Policy,
    Infrastructure,
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::SlotNotFound(_) => "SLOT_NOT_FOUND",
            EngineError::BookingNotFound(_) => "BOOKING_NOT_FOUND",
            EngineError::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
            EngineError::BusinessNotFound(_) => "BUSINESS_NOT_FOUND",
            EngineError::BusinessMismatch { .. } => "BUSINESS_MISMATCH",
            EngineError::BusinessSuspended(_) => "BUSINESS_SUSPENDED",
            EngineError::SlotAlreadyReserved(_) => "SLOT_ALREADY_RESERVED",
            EngineError::SlotAlreadyBooked(_) => "SLOT_ALREADY_BOOKED",
            EngineError::InvalidTransition { .. } => "INVALID_TRANSITION",
            EngineError::Conflict(_) => "CONFLICT",
            EngineError::CancellationWindow { .. } => "CANCELLATION_WINDOW",
            EngineError::Policy(_) => "POLICY_VIOLATION",
            EngineError::Forbidden(_) => "FORBIDDEN",
            EngineError::TransactionMismatch(_) => "TRANSACTION_MISMATCH",
            EngineError::PaymentExpired(_) => "PAYMENT_EXPIRED",
            EngineError::Database(_) | EngineError::Internal(_) => "DATABASE_ERROR",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::SlotNotFound(_)
            | EngineError::BookingNotFound(_)
            | EngineError::PaymentNotFound(_)
            | EngineError::BusinessNotFound(_) => ErrorKind::NotFound,
            EngineError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            EngineError::SlotAlreadyReserved(_)
            | EngineError::SlotAlreadyBooked(_)
            | EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::BusinessMismatch { .. }
            | EngineError::BusinessSuspended(_)
            | EngineError::CancellationWindow { .. }
            | EngineError::Policy(_)
            | EngineError::Forbidden(_)
            | EngineError::TransactionMismatch(_)
            | EngineError::PaymentExpired(_) => ErrorKind::Policy,
            EngineError::Database(_) | EngineError::Internal(_) => ErrorKind::Infrastructure,
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidTransition | ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Policy if matches!(self, EngineError::Forbidden(_)) => StatusCode::FORBIDDEN,
            ErrorKind::Policy => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Infrastructure => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({ "error": self.to_string(), "code": self.code() });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_kinds() {
        let err = EngineError::SlotAlreadyBooked("s1".to_string());
        assert_eq!(err.code(), "SLOT_ALREADY_BOOKED");
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = EngineError::InvalidTransition {
            entity: "booking",
            from: "rejected".to_string(),
            event: "cancel".to_string(),
        };
        assert_eq!(err.code(), "INVALID_TRANSITION");
        assert_eq!(err.to_string(), "invalid booking transition: cancel from rejected");

        let err = EngineError::from(anyhow::anyhow!("disk full"));
        assert_eq!(err.code(), "DATABASE_ERROR");
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
    }

    #[test]
    fn test_status_mapping() {
        let res = EngineError::BookingNotFound("x".to_string()).into_response();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = EngineError::Forbidden("b1".to_string()).into_response();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = EngineError::BusinessSuspended("b1".to_string()).into_response();
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let res = EngineError::Conflict("lost race".to_string()).into_response();
        assert_eq!(res.status(), StatusCode::CONFLICT);
    }
}
