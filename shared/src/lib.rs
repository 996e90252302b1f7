use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod application;
pub mod auth;
pub mod catalog;
pub mod error;
pub mod evidence;
pub mod ledger;
pub mod limits;
pub mod notification;
pub mod reservation;
pub mod standing;

pub use catalog::TankType;
pub use error::{Guard, MarketError};
pub use notification::Notice;

/// Error returned when a stored status string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => Err($crate::ParseEnumError {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

pub(crate) use string_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Seller,
    Admin,
}

string_enum!(Role, "role" {
    Customer => "customer",
    Seller => "seller",
    Admin => "admin",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellerStatus {
    Pending,
    Approved,
    Rejected,
    Suspended,
}

string_enum!(SellerStatus, "seller status" {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
    Suspended => "suspended",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    PendingApproval,
    Approved,
    Rejected,
    Cancelled,
}

string_enum!(ReservationStatus, "reservation status" {
    Pending => "pending",
    PendingApproval => "pending_approval",
    Approved => "approved",
    Rejected => "rejected",
    Cancelled => "cancelled",
});

impl ReservationStatus {
    pub const ALL: [ReservationStatus; 5] = [
        Self::Pending,
        Self::PendingApproval,
        Self::Approved,
        Self::Rejected,
        Self::Cancelled,
    ];

    /// Statuses a seller still has to act on or wait for.
    pub const OPEN: [ReservationStatus; 3] = [Self::Pending, Self::Rejected, Self::PendingApproval];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
}

string_enum!(ApplicationStatus, "application status" {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub seller_status: Option<SellerStatus>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Actor {
    pub fn customer(username: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            role: Role::Customer,
            seller_status: None,
            phone: None,
            address: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn admin(username: impl Into<String>) -> Self {
        Self {
            role: Role::Admin,
            ..Self::customer(username)
        }
    }

    /// An approved seller, the only standing that may use the seller portal.
    pub fn is_seller(&self) -> bool {
        self.role == Role::Seller && self.seller_status == Some(SellerStatus::Approved)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    pub owner_photo: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TankOffering {
    pub id: Uuid,
    pub store_id: Uuid,
    pub tank_type: TankType,
    pub stock: i32,
    pub price: BigDecimal,
    pub active: bool,
}

impl TankOffering {
    /// Whether customers can see and reserve this offering right now.
    pub fn is_available(&self) -> bool {
        self.active && self.stock > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub store_id: Uuid,
    pub tank_id: Uuid,
    pub name: String,
    pub status: ReservationStatus,
    pub pickup_proof: Option<String>,
    pub pickup_proof_uploaded_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub notified: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellerApplication {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub business_name: String,
    pub business_address: String,
    pub business_permit: String,
    pub dti_certificate: Option<String>,
    pub mayors_permit: Option<String>,
    pub valid_id: String,
    pub tin_number: Option<String>,
    pub phone: String,
    pub email: String,
    pub status: ApplicationStatus,
    pub rejection_reason: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub message: String,
    pub reservation_id: Option<Uuid>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_match_storage_values() {
        assert_eq!(ReservationStatus::PendingApproval.as_str(), "pending_approval");
        assert_eq!(
            "pending_approval".parse::<ReservationStatus>().unwrap(),
            ReservationStatus::PendingApproval
        );
        assert_eq!(
            serde_json::to_value(ReservationStatus::PendingApproval).unwrap(),
            serde_json::json!("pending_approval")
        );
    }

    #[test]
    fn unknown_status_is_rejected() {
        let err = "archived".parse::<ApplicationStatus>().unwrap_err();
        assert_eq!(err.kind, "application status");
        assert_eq!(err.value, "archived");
    }

    #[test]
    fn new_actors_start_as_customers() {
        let actor = Actor::customer("maria");
        assert_eq!(actor.role, Role::Customer);
        assert_eq!(actor.seller_status, None);
        assert!(!actor.is_seller());
        assert!(Actor::admin("root").is_admin());
    }
}
