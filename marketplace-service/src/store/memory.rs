use async_trait::async_trait;
use chrono::Utc;
use shared::application::ApplicationChange;
use shared::catalog::{OfferingUpdate, StoreListing};
use shared::ledger::{self, StockAdjustment};
use shared::reservation::{Placement, ReservationChange};
use shared::standing::StandingChange;
use shared::*;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{DashboardCounts, MarketStore, OutboxEntry, ReservationFilter, StoreFilter};

#[derive(Default)]
struct Tables {
    actors: HashMap<Uuid, Actor>,
    stores: HashMap<Uuid, Store>,
    offerings: HashMap<Uuid, TankOffering>,
    reservations: HashMap<Uuid, Reservation>,
    applications: HashMap<Uuid, SellerApplication>,
    // insertion order doubles as creation order
    notifications: Vec<Notification>,
    outbox: Vec<(OutboxEntry, bool)>,
}

impl Tables {
    fn enqueue(&mut self, notices: &[Notice]) {
        let now = Utc::now();
        self.outbox.extend(notices.iter().map(|notice| {
            let entry = OutboxEntry {
                id: Uuid::new_v4(),
                recipient_id: notice.recipient_id,
                message: notice.message.clone(),
                reservation_id: notice.reservation_id,
                created_at: now,
            };
            (entry, false)
        }));
    }

    /// Validates the adjustment without applying it.
    fn check_stock(&self, adjustment: &StockAdjustment) -> Result<i32, MarketError> {
        let offering = self
            .offerings
            .get(&adjustment.tank_id)
            .ok_or(MarketError::NotFound)?;
        ledger::adjust_stock(offering.stock, adjustment.delta)
    }

    fn set_stock(&mut self, tank_id: Uuid, stock: i32) {
        if let Some(offering) = self.offerings.get_mut(&tank_id) {
            offering.stock = stock;
        }
    }
}

/// In-process backend for development and tests.
///
/// A single lock serialises every operation, which gives each change plan the
/// same all-or-nothing behaviour as a database transaction.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T, K: Ord>(items: &mut [T], key: impl Fn(&T) -> K) {
    items.sort_by(|a, b| key(b).cmp(&key(a)));
}

fn duplicate() -> MarketError {
    MarketError::validation("A record with these details already exists.")
}

#[async_trait]
impl MarketStore for MemoryStore {
    async fn insert_actor(&self, actor: &Actor) -> Result<(), MarketError> {
        let mut tables = self.tables.lock().await;
        if tables.actors.contains_key(&actor.id)
            || tables.actors.values().any(|a| a.username == actor.username)
        {
            return Err(duplicate());
        }
        tables.actors.insert(actor.id, actor.clone());
        Ok(())
    }

    async fn actor(&self, id: Uuid) -> Result<Actor, MarketError> {
        let tables = self.tables.lock().await;
        tables.actors.get(&id).cloned().ok_or(MarketError::NotFound)
    }

    async fn actor_by_username(&self, username: &str) -> Result<Option<Actor>, MarketError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .actors
            .values()
            .find(|a| a.username == username)
            .cloned())
    }

    async fn sellers(&self, status: SellerStatus) -> Result<Vec<Actor>, MarketError> {
        let tables = self.tables.lock().await;
        let mut sellers: Vec<_> = tables
            .actors
            .values()
            .filter(|a| a.role == Role::Seller && a.seller_status == Some(status))
            .cloned()
            .collect();
        sellers.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(sellers)
    }

    async fn dashboard(&self) -> Result<DashboardCounts, MarketError> {
        let tables = self.tables.lock().await;
        let count = |n: usize| n as i64;
        Ok(DashboardCounts {
            pending_applications: count(
                tables
                    .applications
                    .values()
                    .filter(|a| a.status == ApplicationStatus::Pending)
                    .count(),
            ),
            approved_sellers: count(tables.actors.values().filter(|a| a.is_seller()).count()),
            stores: count(tables.stores.len()),
            customers: count(
                tables
                    .actors
                    .values()
                    .filter(|a| a.role == Role::Customer)
                    .count(),
            ),
            pending_reviews: count(
                tables
                    .reservations
                    .values()
                    .filter(|r| r.status == ReservationStatus::PendingApproval)
                    .count(),
            ),
        })
    }

    async fn insert_listing(&self, listing: &StoreListing) -> Result<(), MarketError> {
        let mut tables = self.tables.lock().await;
        if !tables.actors.contains_key(&listing.store.owner_id) {
            return Err(MarketError::NotFound);
        }
        tables.stores.insert(listing.store.id, listing.store.clone());
        for offering in &listing.offerings {
            tables.offerings.insert(offering.id, offering.clone());
        }
        Ok(())
    }

    async fn store(&self, id: Uuid) -> Result<Store, MarketError> {
        let tables = self.tables.lock().await;
        tables.stores.get(&id).cloned().ok_or(MarketError::NotFound)
    }

    async fn stores(&self, filter: StoreFilter) -> Result<Vec<Store>, MarketError> {
        let tables = self.tables.lock().await;
        let mut stores: Vec<_> = tables
            .stores
            .values()
            .filter(|s| match filter {
                StoreFilter::Active => s.active,
                StoreFilter::OwnedBy(owner) => s.owner_id == owner,
                StoreFilter::All => true,
            })
            .cloned()
            .collect();
        newest_first(&mut stores, |s| (s.created_at, s.id));
        Ok(stores)
    }

    async fn set_store_active(
        &self,
        id: Uuid,
        expected: bool,
        active: bool,
    ) -> Result<Store, MarketError> {
        let mut tables = self.tables.lock().await;
        let store = tables.stores.get_mut(&id).ok_or(MarketError::NotFound)?;
        if store.active != expected {
            return Err(Guard::StoreVisibility {
                store_id: id,
                active: store.active,
            }
            .into());
        }
        store.active = active;
        Ok(store.clone())
    }

    async fn delete_store(&self, id: Uuid) -> Result<(), MarketError> {
        let mut tables = self.tables.lock().await;
        tables.stores.remove(&id).ok_or(MarketError::NotFound)?;
        tables.offerings.retain(|_, o| o.store_id != id);

        let removed: HashSet<Uuid> = tables
            .reservations
            .values()
            .filter(|r| r.store_id == id)
            .map(|r| r.id)
            .collect();
        tables.reservations.retain(|rid, _| !removed.contains(rid));
        tables
            .notifications
            .retain(|n| n.reservation_id.map_or(true, |rid| !removed.contains(&rid)));
        for (entry, _) in tables.outbox.iter_mut() {
            if entry.reservation_id.is_some_and(|rid| removed.contains(&rid)) {
                entry.reservation_id = None;
            }
        }
        Ok(())
    }

    async fn offering(&self, id: Uuid) -> Result<TankOffering, MarketError> {
        let tables = self.tables.lock().await;
        tables.offerings.get(&id).cloned().ok_or(MarketError::NotFound)
    }

    async fn offerings(&self, store_id: Uuid) -> Result<Vec<TankOffering>, MarketError> {
        let tables = self.tables.lock().await;
        let mut offerings: Vec<_> = tables
            .offerings
            .values()
            .filter(|o| o.store_id == store_id)
            .cloned()
            .collect();
        offerings.sort_by_key(|o| o.tank_type);
        Ok(offerings)
    }

    async fn update_offering(
        &self,
        id: Uuid,
        update: &OfferingUpdate,
    ) -> Result<TankOffering, MarketError> {
        let mut tables = self.tables.lock().await;
        let offering = tables.offerings.get_mut(&id).ok_or(MarketError::NotFound)?;
        offering.price = update.price.clone();
        offering.active = update.active;
        Ok(offering.clone())
    }

    async fn place_reservation(&self, placement: &Placement) -> Result<Reservation, MarketError> {
        let mut tables = self.tables.lock().await;
        let stock = tables.check_stock(&placement.hold)?;
        if tables.reservations.contains_key(&placement.reservation.id) {
            return Err(duplicate());
        }

        tables.set_stock(placement.hold.tank_id, stock);
        tables
            .reservations
            .insert(placement.reservation.id, placement.reservation.clone());
        tables.enqueue(&placement.notices);
        Ok(placement.reservation.clone())
    }

    async fn commit_reservation(
        &self,
        change: &ReservationChange,
    ) -> Result<Reservation, MarketError> {
        let mut tables = self.tables.lock().await;
        let current = tables
            .reservations
            .get(&change.reservation_id)
            .ok_or(MarketError::NotFound)?
            .status;
        if current != change.expected {
            return Err(Guard::Reservation {
                from: current,
                event: change.event,
            }
            .into());
        }
        let stock = match &change.stock {
            Some(adjustment) => Some((adjustment.tank_id, tables.check_stock(adjustment)?)),
            None => None,
        };

        if let Some((tank_id, stock)) = stock {
            tables.set_stock(tank_id, stock);
        }
        let reservation = tables
            .reservations
            .get_mut(&change.reservation_id)
            .ok_or(MarketError::NotFound)?;
        change.apply_to(reservation);
        let updated = reservation.clone();
        tables.enqueue(&change.notices);
        Ok(updated)
    }

    async fn reservation(&self, id: Uuid) -> Result<Reservation, MarketError> {
        let tables = self.tables.lock().await;
        tables
            .reservations
            .get(&id)
            .cloned()
            .ok_or(MarketError::NotFound)
    }

    async fn reservations(
        &self,
        filter: &ReservationFilter,
    ) -> Result<Vec<Reservation>, MarketError> {
        let tables = self.tables.lock().await;
        let mut reservations: Vec<_> = tables
            .reservations
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        newest_first(&mut reservations, |r| (r.created_at, r.id));
        Ok(reservations)
    }

    async fn application(&self, id: Uuid) -> Result<SellerApplication, MarketError> {
        let tables = self.tables.lock().await;
        tables
            .applications
            .get(&id)
            .cloned()
            .ok_or(MarketError::NotFound)
    }

    async fn application_for(
        &self,
        actor_id: Uuid,
    ) -> Result<Option<SellerApplication>, MarketError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .applications
            .values()
            .find(|a| a.actor_id == actor_id)
            .cloned())
    }

    async fn applications(
        &self,
        status: Option<ApplicationStatus>,
    ) -> Result<Vec<SellerApplication>, MarketError> {
        let tables = self.tables.lock().await;
        let mut applications: Vec<_> = tables
            .applications
            .values()
            .filter(|a| status.map_or(true, |s| a.status == s))
            .cloned()
            .collect();
        newest_first(&mut applications, |a| (a.created_at, a.id));
        Ok(applications)
    }

    async fn save_application(&self, application: &SellerApplication) -> Result<(), MarketError> {
        let mut tables = self.tables.lock().await;
        tables.applications.retain(|_, a| {
            !(a.actor_id == application.actor_id && a.status == ApplicationStatus::Rejected)
        });
        if tables
            .applications
            .values()
            .any(|a| a.actor_id == application.actor_id)
        {
            return Err(duplicate());
        }
        tables
            .applications
            .insert(application.id, application.clone());
        Ok(())
    }

    async fn commit_application(
        &self,
        change: &ApplicationChange,
    ) -> Result<SellerApplication, MarketError> {
        let mut tables = self.tables.lock().await;
        let current = tables
            .applications
            .get(&change.application_id)
            .ok_or(MarketError::NotFound)?
            .status;
        if current != change.expected {
            return Err(Guard::Application {
                from: current,
                event: change.event,
            }
            .into());
        }
        if change.promote {
            let actor = tables
                .actors
                .get_mut(&change.actor_id)
                .ok_or(MarketError::NotFound)?;
            actor.role = Role::Seller;
            actor.seller_status = Some(SellerStatus::Approved);
            actor.updated_at = change.reviewed_at;
        }

        let application = tables
            .applications
            .get_mut(&change.application_id)
            .ok_or(MarketError::NotFound)?;
        change.apply_to(application);
        let updated = application.clone();
        tables.enqueue(&change.notices);
        Ok(updated)
    }

    async fn commit_standing(&self, change: &StandingChange) -> Result<Actor, MarketError> {
        let mut tables = self.tables.lock().await;
        let actor = tables
            .actors
            .get_mut(&change.actor_id)
            .ok_or(MarketError::NotFound)?;
        let current = actor.seller_status.unwrap_or(SellerStatus::Pending);
        if current != change.expected {
            return Err(Guard::Standing(current).into());
        }
        actor.seller_status = Some(change.next);
        actor.updated_at = Utc::now();
        let updated = actor.clone();

        if change.deactivate_stores {
            for store in tables.stores.values_mut() {
                if store.owner_id == change.actor_id {
                    store.active = false;
                }
            }
        }
        tables.enqueue(&change.notices);
        Ok(updated)
    }

    async fn notifications(&self, recipient_id: Uuid) -> Result<Vec<Notification>, MarketError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .notifications
            .iter()
            .rev()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, recipient_id: Uuid, ids: &[Uuid]) -> Result<usize, MarketError> {
        let mut tables = self.tables.lock().await;
        let mut marked = 0;
        for notification in tables.notifications.iter_mut() {
            if notification.recipient_id == recipient_id
                && !notification.read
                && ids.contains(&notification.id)
            {
                notification.read = true;
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn unread_count(&self, recipient_id: Uuid) -> Result<i64, MarketError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .notifications
            .iter()
            .filter(|n| n.recipient_id == recipient_id && !n.read)
            .count() as i64)
    }

    async fn pending_outbox(&self, limit: i64) -> Result<Vec<OutboxEntry>, MarketError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .outbox
            .iter()
            .filter(|(_, processed)| !processed)
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|(entry, _)| entry.clone())
            .collect())
    }

    async fn deliver(&self, entry: &OutboxEntry) -> Result<Option<Notification>, MarketError> {
        let mut tables = self.tables.lock().await;
        let Some((_, processed)) = tables
            .outbox
            .iter_mut()
            .find(|(queued, processed)| queued.id == entry.id && !*processed)
        else {
            return Ok(None);
        };
        *processed = true;

        let notification = Notification {
            id: Uuid::new_v4(),
            recipient_id: entry.recipient_id,
            message: entry.message.clone(),
            reservation_id: entry.reservation_id,
            read: false,
            created_at: Utc::now(),
        };
        tables.notifications.push(notification.clone());
        Ok(Some(notification))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use shared::reservation;

    async fn seeded(stock: i32) -> (MemoryStore, Actor, Store, TankOffering) {
        let store = MemoryStore::new();
        let seller = Actor {
            role: Role::Seller,
            seller_status: Some(SellerStatus::Approved),
            ..Actor::customer("seller")
        };
        store.insert_actor(&seller).await.unwrap();

        let shop = Store {
            id: Uuid::new_v4(),
            owner_id: seller.id,
            name: "Gasul Corner".to_string(),
            description: "Quality propane gas supplier".to_string(),
            latitude: 14.6,
            longitude: 121.0,
            owner_photo: None,
            active: true,
            created_at: Utc::now(),
        };
        let tank = TankOffering {
            id: Uuid::new_v4(),
            store_id: shop.id,
            tank_type: TankType::PriceGas,
            stock,
            price: BigDecimal::from(880),
            active: true,
        };
        store
            .insert_listing(&StoreListing {
                store: shop.clone(),
                offerings: vec![tank.clone()],
            })
            .await
            .unwrap();
        (store, seller, shop, tank)
    }

    #[tokio::test]
    async fn stale_hold_is_refused_without_side_effects() {
        let (store, _, shop, tank) = seeded(1).await;
        let customer = Actor::customer("juan");

        // both plans were made while one unit was left
        let first = reservation::place(&customer, &shop, &tank, "Juan", Utc::now()).unwrap();
        let second = reservation::place(&customer, &shop, &tank, "Juan", Utc::now()).unwrap();

        store.place_reservation(&first).await.unwrap();
        let err = store.place_reservation(&second).await.unwrap_err();
        assert!(matches!(err, MarketError::ResourceExhausted(_)));

        assert_eq!(store.offering(tank.id).await.unwrap().stock, 0);
        assert_eq!(store.pending_outbox(10).await.unwrap().len(), 1);
        assert!(store.reservation(second.reservation.id).await.is_err());
    }

    #[tokio::test]
    async fn stale_transition_loses_the_race() {
        let (store, _, shop, tank) = seeded(2).await;
        let customer = Actor::customer("juan");
        let placed = reservation::place(&customer, &shop, &tank, "Juan", Utc::now()).unwrap();
        let booked = store.place_reservation(&placed).await.unwrap();

        let cancel = reservation::cancel(&customer, &booked, &shop).unwrap();
        store.commit_reservation(&cancel).await.unwrap();
        let err = store.commit_reservation(&cancel).await.unwrap_err();

        assert!(matches!(
            err,
            MarketError::GuardViolation(Guard::Reservation {
                from: ReservationStatus::Cancelled,
                ..
            })
        ));
        // released once, not twice
        assert_eq!(store.offering(tank.id).await.unwrap().stock, 2);
    }

    #[tokio::test]
    async fn delivery_is_once_per_entry() {
        let (store, seller, shop, tank) = seeded(2).await;
        let customer = Actor::customer("juan");
        let placed = reservation::place(&customer, &shop, &tank, "Juan", Utc::now()).unwrap();
        store.place_reservation(&placed).await.unwrap();

        let entries = store.pending_outbox(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(store.deliver(&entries[0]).await.unwrap().is_some());
        assert!(store.deliver(&entries[0]).await.unwrap().is_none());

        assert!(store.pending_outbox(10).await.unwrap().is_empty());
        assert_eq!(store.unread_count(seller.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn marking_read_leaves_later_deliveries_unread() {
        let (store, seller, shop, tank) = seeded(2).await;
        let customer = Actor::customer("juan");
        let first = reservation::place(&customer, &shop, &tank, "Juan", Utc::now()).unwrap();
        store.place_reservation(&first).await.unwrap();
        for entry in store.pending_outbox(10).await.unwrap() {
            store.deliver(&entry).await.unwrap();
        }
        let listed: Vec<Uuid> = store
            .notifications(seller.id)
            .await
            .unwrap()
            .iter()
            .map(|n| n.id)
            .collect();

        // delivered after the inbox was listed
        let second = reservation::place(&customer, &shop, &tank, "Juan", Utc::now()).unwrap();
        store.place_reservation(&second).await.unwrap();
        for entry in store.pending_outbox(10).await.unwrap() {
            store.deliver(&entry).await.unwrap();
        }

        assert_eq!(store.mark_read(seller.id, &listed).await.unwrap(), 1);
        assert_eq!(store.unread_count(seller.id).await.unwrap(), 1);
        // someone else's ids are ignored
        assert_eq!(store.mark_read(customer.id, &listed).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_visibility_toggle_is_refused() {
        let (store, _, shop, _) = seeded(1).await;

        // two admins both saw the store active
        let closed = store.set_store_active(shop.id, true, false).await.unwrap();
        assert!(!closed.active);
        let err = store.set_store_active(shop.id, true, false).await.unwrap_err();
        assert!(matches!(
            err,
            MarketError::GuardViolation(Guard::StoreVisibility { active: false, .. })
        ));
        assert!(!store.store(shop.id).await.unwrap().active);
    }

    #[tokio::test]
    async fn deleting_a_store_cascades() {
        let (store, seller, shop, tank) = seeded(2).await;
        let customer = Actor::customer("juan");
        let placed = reservation::place(&customer, &shop, &tank, "Juan", Utc::now()).unwrap();
        store.place_reservation(&placed).await.unwrap();
        for entry in store.pending_outbox(10).await.unwrap() {
            store.deliver(&entry).await.unwrap();
        }

        store.delete_store(shop.id).await.unwrap();

        assert!(matches!(store.offering(tank.id).await, Err(MarketError::NotFound)));
        assert!(store
            .reservations(&ReservationFilter::for_customer(customer.id))
            .await
            .unwrap()
            .is_empty());
        assert!(store.notifications(seller.id).await.unwrap().is_empty());
    }
}
