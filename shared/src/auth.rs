//! Role/status authorization gate.
//!
//! Evaluated per request against a freshly loaded actor. Nothing here is
//! cached, so a suspension takes effect on the very next request.

use serde::Serialize;
use std::fmt;

use crate::error::{Guard, MarketError};
use crate::{Actor, Role, SellerStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    // customer portal, open to every role
    BrowseStores,
    Reserve,
    CancelReservation,
    ViewOrders,
    ViewNotifications,
    // customers becoming sellers
    ApplyAsSeller,
    // seller portal
    ManageStores,
    UploadPickupProof,
    // admin portal
    ReviewPickup,
    ReviewApplication,
    ToggleStore,
    ManageSellers,
    ViewReports,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Portal {
    Customer,
    Applicant,
    Seller,
    Admin,
}

impl Action {
    fn portal(&self) -> Portal {
        match self {
            Self::BrowseStores
            | Self::Reserve
            | Self::CancelReservation
            | Self::ViewOrders
            | Self::ViewNotifications => Portal::Customer,
            Self::ApplyAsSeller => Portal::Applicant,
            Self::ManageStores | Self::UploadPickupProof => Portal::Seller,
            Self::ReviewPickup
            | Self::ReviewApplication
            | Self::ToggleStore
            | Self::ManageSellers
            | Self::ViewReports => Portal::Admin,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::BrowseStores => "browsing stores",
            Self::Reserve => "reserving a tank",
            Self::CancelReservation => "cancelling a reservation",
            Self::ViewOrders => "viewing orders",
            Self::ViewNotifications => "viewing notifications",
            Self::ApplyAsSeller => "applying as a seller",
            Self::ManageStores => "managing stores",
            Self::UploadPickupProof => "uploading pickup proof",
            Self::ReviewPickup => "reviewing pickup proof",
            Self::ReviewApplication => "reviewing seller applications",
            Self::ToggleStore => "activating stores",
            Self::ManageSellers => "managing sellers",
            Self::ViewReports => "viewing admin reports",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Denial {
    /// A seller whose account is pending, rejected or suspended.
    AwaitingApproval,
    SellersOnly,
    AdminsOnly,
    AlreadySeller,
    CustomersOnly,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::AwaitingApproval => "your seller account is not approved",
            Self::SellersOnly => "you must be an approved seller",
            Self::AdminsOnly => "admin access required",
            Self::AlreadySeller => "you are already a seller",
            Self::CustomersOnly => "only customer accounts can do this",
        };
        f.write_str(text)
    }
}

/// Decide whether an actor with this role and status may invoke `action`.
pub fn authorize(role: Role, status: Option<SellerStatus>, action: Action) -> Result<(), Denial> {
    match action.portal() {
        Portal::Customer => Ok(()),
        Portal::Applicant => match role {
            Role::Customer => Ok(()),
            Role::Seller => Err(Denial::AlreadySeller),
            Role::Admin => Err(Denial::CustomersOnly),
        },
        Portal::Seller => match (role, status) {
            (Role::Seller, Some(SellerStatus::Approved)) => Ok(()),
            (Role::Seller, _) => Err(Denial::AwaitingApproval),
            _ => Err(Denial::SellersOnly),
        },
        Portal::Admin => match role {
            Role::Admin => Ok(()),
            _ => Err(Denial::AdminsOnly),
        },
    }
}

/// Gate check in error form, for use at the top of every transition.
pub fn ensure(actor: &Actor, action: Action) -> Result<(), MarketError> {
    authorize(actor.role, actor.seller_status, action)
        .map_err(|denial| MarketError::from(Guard::Forbidden { action, denial }))
}

/// Where an actor lands after signing in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Landing {
    AdminDashboard,
    SellerStores,
    SellerPending,
    CustomerMap,
}

pub fn landing(role: Role, status: Option<SellerStatus>) -> Landing {
    match (role, status) {
        (Role::Admin, _) => Landing::AdminDashboard,
        (Role::Seller, Some(SellerStatus::Approved)) => Landing::SellerStores,
        (Role::Seller, _) => Landing::SellerPending,
        (Role::Customer, _) => Landing::CustomerMap,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn customer_actions_are_open_to_every_role() {
        for role in [Role::Customer, Role::Seller, Role::Admin] {
            assert_eq!(authorize(role, None, Action::Reserve), Ok(()));
            assert_eq!(authorize(role, None, Action::ViewNotifications), Ok(()));
        }
    }

    #[test]
    fn seller_portal_requires_approved_status() {
        assert_eq!(
            authorize(Role::Seller, Some(SellerStatus::Approved), Action::UploadPickupProof),
            Ok(())
        );
        for status in [
            SellerStatus::Pending,
            SellerStatus::Rejected,
            SellerStatus::Suspended,
        ] {
            assert_eq!(
                authorize(Role::Seller, Some(status), Action::ManageStores),
                Err(Denial::AwaitingApproval)
            );
        }
        assert_eq!(
            authorize(Role::Customer, None, Action::ManageStores),
            Err(Denial::SellersOnly)
        );
        assert_eq!(
            authorize(Role::Admin, None, Action::UploadPickupProof),
            Err(Denial::SellersOnly)
        );
    }

    #[test]
    fn admin_portal_ignores_status() {
        assert_eq!(authorize(Role::Admin, None, Action::ReviewPickup), Ok(()));
        assert_eq!(
            authorize(Role::Seller, Some(SellerStatus::Approved), Action::ReviewPickup),
            Err(Denial::AdminsOnly)
        );
    }

    #[test]
    fn only_customers_apply() {
        assert_eq!(authorize(Role::Customer, None, Action::ApplyAsSeller), Ok(()));
        assert_eq!(
            authorize(Role::Seller, Some(SellerStatus::Suspended), Action::ApplyAsSeller),
            Err(Denial::AlreadySeller)
        );
        assert_eq!(
            authorize(Role::Admin, None, Action::ApplyAsSeller),
            Err(Denial::CustomersOnly)
        );
    }

    #[test]
    fn ensure_reports_forbidden_guard() {
        let actor = Actor::customer("ana");
        let err = ensure(&actor, Action::ReviewApplication).unwrap_err();
        assert!(err.is_forbidden());
        assert_eq!(
            err.to_string(),
            "reviewing seller applications is not permitted: admin access required"
        );
    }

    #[test]
    fn landing_follows_role_and_status() {
        assert_eq!(landing(Role::Admin, None), Landing::AdminDashboard);
        assert_eq!(
            landing(Role::Seller, Some(SellerStatus::Approved)),
            Landing::SellerStores
        );
        assert_eq!(
            landing(Role::Seller, Some(SellerStatus::Suspended)),
            Landing::SellerPending
        );
        assert_eq!(landing(Role::Customer, None), Landing::CustomerMap);
    }
}
