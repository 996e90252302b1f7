//! Persistence port for the marketplace.
//!
//! Every write method applies one change plan atomically: the status
//! compare-and-swap, the stock adjustment and the outbox entries for the
//! plan's notices commit together or not at all.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::application::ApplicationChange;
use shared::catalog::{OfferingUpdate, StoreListing};
use shared::reservation::{Placement, ReservationChange};
use shared::standing::StandingChange;
use shared::*;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// A notification waiting to be delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub message: String,
    pub reservation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFilter {
    /// Stores visible to customers.
    Active,
    OwnedBy(Uuid),
    All,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub customer_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    /// Empty means any status.
    pub statuses: Vec<ReservationStatus>,
}

impl ReservationFilter {
    pub fn for_customer(customer_id: Uuid) -> Self {
        Self {
            customer_id: Some(customer_id),
            ..Default::default()
        }
    }

    fn matches(&self, reservation: &Reservation) -> bool {
        self.customer_id.map_or(true, |id| reservation.customer_id == id)
            && self.store_id.map_or(true, |id| reservation.store_id == id)
            && (self.statuses.is_empty() || self.statuses.contains(&reservation.status))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DashboardCounts {
    pub pending_applications: i64,
    pub approved_sellers: i64,
    pub stores: i64,
    pub customers: i64,
    pub pending_reviews: i64,
}

#[async_trait]
pub trait MarketStore: Send + Sync {
    async fn insert_actor(&self, actor: &Actor) -> Result<(), MarketError>;

    async fn actor(&self, id: Uuid) -> Result<Actor, MarketError>;

    async fn actor_by_username(&self, username: &str) -> Result<Option<Actor>, MarketError>;

    async fn sellers(&self, status: SellerStatus) -> Result<Vec<Actor>, MarketError>;

    async fn dashboard(&self) -> Result<DashboardCounts, MarketError>;

    async fn insert_listing(&self, listing: &StoreListing) -> Result<(), MarketError>;

    async fn store(&self, id: Uuid) -> Result<Store, MarketError>;

    async fn stores(&self, filter: StoreFilter) -> Result<Vec<Store>, MarketError>;

    /// Sets `active` only while it still equals `expected`.
    async fn set_store_active(
        &self,
        id: Uuid,
        expected: bool,
        active: bool,
    ) -> Result<Store, MarketError>;

    /// Removes the store with its offerings, reservations and the
    /// notifications that reference them.
    async fn delete_store(&self, id: Uuid) -> Result<(), MarketError>;

    async fn offering(&self, id: Uuid) -> Result<TankOffering, MarketError>;

    async fn offerings(&self, store_id: Uuid) -> Result<Vec<TankOffering>, MarketError>;

    async fn update_offering(
        &self,
        id: Uuid,
        update: &OfferingUpdate,
    ) -> Result<TankOffering, MarketError>;

    /// Takes the hold and inserts the reservation. Fails with
    /// `ResourceExhausted` when another reservation took the last unit first.
    async fn place_reservation(&self, placement: &Placement) -> Result<Reservation, MarketError>;

    /// Fails with a guard violation when the status moved since the change
    /// was planned.
    async fn commit_reservation(
        &self,
        change: &ReservationChange,
    ) -> Result<Reservation, MarketError>;

    async fn reservation(&self, id: Uuid) -> Result<Reservation, MarketError>;

    /// Newest first.
    async fn reservations(
        &self,
        filter: &ReservationFilter,
    ) -> Result<Vec<Reservation>, MarketError>;

    async fn application(&self, id: Uuid) -> Result<SellerApplication, MarketError>;

    async fn application_for(
        &self,
        actor_id: Uuid,
    ) -> Result<Option<SellerApplication>, MarketError>;

    /// Newest first. `None` lists every application.
    async fn applications(
        &self,
        status: Option<ApplicationStatus>,
    ) -> Result<Vec<SellerApplication>, MarketError>;

    /// Stores a new application, replacing a rejected one for the same actor.
    async fn save_application(&self, application: &SellerApplication) -> Result<(), MarketError>;

    async fn commit_application(
        &self,
        change: &ApplicationChange,
    ) -> Result<SellerApplication, MarketError>;

    async fn commit_standing(&self, change: &StandingChange) -> Result<Actor, MarketError>;

    /// Newest first.
    async fn notifications(&self, recipient_id: Uuid) -> Result<Vec<Notification>, MarketError>;

    /// Marks the given notifications read. Ids that are not the recipient's
    /// are skipped.
    async fn mark_read(&self, recipient_id: Uuid, ids: &[Uuid]) -> Result<usize, MarketError>;

    async fn unread_count(&self, recipient_id: Uuid) -> Result<i64, MarketError>;

    /// Oldest first.
    async fn pending_outbox(&self, limit: i64) -> Result<Vec<OutboxEntry>, MarketError>;

    /// Turns the entry into a notification and marks it processed in one
    /// step. Returns `None` if another dispatcher got there first.
    async fn deliver(&self, entry: &OutboxEntry) -> Result<Option<Notification>, MarketError>;
}
