use diesel_async::pooled_connection::PoolError;
use shared::Unit;
use thiserror::Error;
use uuid::Uuid;

pub type ShelterResult<T> = Result<T, ShelterError>;

/// Every way a shelter operation can fail.
///
/// Business-rule outcomes (`InvalidState`, `InsufficientStock`,
/// `ActiveRequestExists`, `Unavailable`, ...) are expected and carry enough
/// context to show the user. `StorageFault` covers persistence failures,
/// including aborted atomic units.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShelterError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("you already have an active request; modify it or wait until it is completed")]
    ActiveRequestExists,

    #[error("{0} is not available right now")]
    Unavailable(String),

    #[error("insufficient stock: requested {requested}, only {available} {unit} available")]
    InsufficientStock {
        requested: i32,
        available: i32,
        unit: Unit,
    },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("a matching item already exists in the inventory ({name}, {quantity} in stock)")]
    DuplicateItem { id: Uuid, name: String, quantity: i32 },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage fault: {0}")]
    StorageFault(String),
}

impl ShelterError {
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageFault(msg.into())
    }

    /// Stable machine-readable code, one per kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidState(_) => "invalid_state",
            Self::ActiveRequestExists => "active_request_exists",
            Self::Unavailable(_) => "unavailable",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::InvalidOperation(_) => "invalid_operation",
            Self::DuplicateItem { .. } => "duplicate_item",
            Self::Validation(_) => "validation_error",
            Self::StorageFault(_) => "storage_fault",
        }
    }

    /// True for expected rejections, false for infrastructure failures.
    pub fn is_business_rule(&self) -> bool {
        !matches!(self, Self::StorageFault(_))
    }
}

impl From<diesel::result::Error> for ShelterError {
    fn from(err: diesel::result::Error) -> Self {
        Self::StorageFault(err.to_string())
    }
}

impl From<bb8::RunError<PoolError>> for ShelterError {
    fn from(err: bb8::RunError<PoolError>) -> Self {
        Self::StorageFault(format!("connection pool: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_message_names_what_is_left() {
        let err = ShelterError::InsufficientStock {
            requested: 5,
            available: 3,
            unit: Unit::Kilograms,
        };
        assert_eq!(
            err.to_string(),
            "insufficient stock: requested 5, only 3 kg available"
        );
        assert_eq!(err.code(), "insufficient_stock");
        assert!(err.is_business_rule());
    }

    #[test]
    fn storage_faults_are_not_business_rules() {
        let err = ShelterError::from(diesel::result::Error::NotFound);
        assert_eq!(err.code(), "storage_fault");
        assert!(!err.is_business_rule());
    }
}
