//! Admin suspension and reactivation of sellers.

use serde::Serialize;
use uuid::Uuid;

use crate::auth::{self, Action};
use crate::error::MarketError;
use crate::notification::{self, Notice};
use crate::{Actor, Role, SellerStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StandingChange {
    pub actor_id: Uuid,
    pub expected: SellerStatus,
    pub next: SellerStatus,
    /// Take every store of the seller off the map.
    pub deactivate_stores: bool,
    pub notices: Vec<Notice>,
}

/// Suspend an approved seller, or reinstate one in any other status.
///
/// Reinstating leaves the seller's stores inactive; the seller or an admin
/// turns them back on.
pub fn toggle_suspension(admin: &Actor, seller: &Actor) -> Result<StandingChange, MarketError> {
    auth::ensure(admin, Action::ManageSellers)?;
    if seller.role != Role::Seller {
        return Err(MarketError::NotFound);
    }
    let current = seller.seller_status.unwrap_or(SellerStatus::Pending);

    Ok(match current {
        SellerStatus::Approved => StandingChange {
            actor_id: seller.id,
            expected: current,
            next: SellerStatus::Suspended,
            deactivate_stores: true,
            notices: vec![Notice::to(seller.id, notification::seller_suspended())],
        },
        _ => StandingChange {
            actor_id: seller.id,
            expected: current,
            next: SellerStatus::Approved,
            deactivate_stores: false,
            notices: Vec::new(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seller(status: SellerStatus) -> Actor {
        Actor {
            role: Role::Seller,
            seller_status: Some(status),
            ..Actor::customer("seller")
        }
    }

    #[test]
    fn suspending_an_approved_seller_closes_stores() {
        let seller = seller(SellerStatus::Approved);
        let change = toggle_suspension(&Actor::admin("admin"), &seller).unwrap();

        assert_eq!(change.next, SellerStatus::Suspended);
        assert!(change.deactivate_stores);
        assert_eq!(change.notices.len(), 1);
        assert_eq!(change.notices[0].recipient_id, seller.id);
    }

    #[test]
    fn reinstating_is_silent() {
        let change =
            toggle_suspension(&Actor::admin("admin"), &seller(SellerStatus::Suspended)).unwrap();
        assert_eq!(change.next, SellerStatus::Approved);
        assert!(!change.deactivate_stores);
        assert!(change.notices.is_empty());
    }

    #[test]
    fn customers_are_not_sellers() {
        assert!(matches!(
            toggle_suspension(&Actor::admin("admin"), &Actor::customer("c")),
            Err(MarketError::NotFound)
        ));
    }
}
