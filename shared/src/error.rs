use thiserror::Error;
use uuid::Uuid;

use crate::application::ApplicationEvent;
use crate::auth::{Action, Denial};
use crate::reservation::ReservationEvent;
use crate::{ApplicationStatus, ReservationStatus, SellerStatus};

/// Errors surfaced at the transition boundary.
///
/// None of these are fatal; every variant leaves persisted state untouched.
#[derive(Debug, Error)]
pub enum MarketError {
    #[error(transparent)]
    GuardViolation(#[from] Guard),
    #[error("{0}")]
    ResourceExhausted(String),
    #[error("{0}")]
    Validation(String),
    /// Deliberately does not say whether the record is missing or merely not
    /// the caller's.
    #[error("Not found")]
    NotFound,
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Why a transition was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Guard {
    #[error("{action} is not permitted: {denial}")]
    Forbidden { action: Action, denial: Denial },
    #[error("Cannot {event} a reservation that is {from}")]
    Reservation {
        from: ReservationStatus,
        event: ReservationEvent,
    },
    #[error("Cannot {event} an application that is {from}")]
    Application {
        from: ApplicationStatus,
        event: ApplicationEvent,
    },
    #[error("Seller standing changed to {0} in the meantime")]
    Standing(SellerStatus),
    #[error("Store {store_id} changed visibility in the meantime")]
    StoreVisibility { store_id: Uuid, active: bool },
    #[error("{0}")]
    Ineligible(&'static str),
}

impl MarketError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::GuardViolation(_) => "guard_violation",
            Self::ResourceExhausted(_) => "resource_exhausted",
            Self::Validation(_) => "validation_error",
            Self::NotFound => "not_found",
            Self::Storage(_) => "storage_error",
        }
    }

    /// True when the actor, not the state, was the reason for refusal.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::GuardViolation(Guard::Forbidden { .. }))
    }
}

impl From<diesel::result::Error> for MarketError {
    fn from(err: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};

        match err {
            Error::NotFound => Self::NotFound,
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                Self::Validation("A record with these details already exists.".to_string())
            }
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<crate::ParseEnumError> for MarketError {
    fn from(err: crate::ParseEnumError) -> Self {
        Self::Storage(err.to_string())
    }
}
