use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::application::ApplicationChange;
use shared::catalog::{OfferingUpdate, StoreListing};
use shared::ledger::StockAdjustment;
use shared::reservation::{Placement, ReservationChange};
use shared::standing::StandingChange;
use shared::*;
use uuid::Uuid;

use super::{DashboardCounts, MarketStore, OutboxEntry, ReservationFilter, StoreFilter};
use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<PooledConnection<'_, AsyncPgConnection>, MarketError> {
        self.pool.get().await.map_err(|e| match e {
            bb8::RunError::TimedOut => {
                MarketError::Storage("timed out waiting for a database connection".to_string())
            }
            bb8::RunError::User(e) => MarketError::Storage(format!("database connection: {e}")),
        })
    }
}

/// Writes one outbox row per notice inside the caller's transaction.
async fn enqueue(conn: &mut AsyncPgConnection, notices: &[Notice]) -> Result<(), MarketError> {
    if notices.is_empty() {
        return Ok(());
    }
    let events: Vec<NewOutboxEvent> = notices.iter().map(NewOutboxEvent::from).collect();
    diesel::insert_into(outbox_events::table)
        .values(&events)
        .execute(conn)
        .await?;
    Ok(())
}

/// Conditional stock update; the row is only touched when the result stays
/// non-negative, so concurrent holds cannot oversell.
async fn adjust_stock(
    conn: &mut AsyncPgConnection,
    adjustment: &StockAdjustment,
) -> Result<(), MarketError> {
    let updated = diesel::update(
        tank_offerings::table
            .filter(tank_offerings::id.eq(adjustment.tank_id))
            .filter(tank_offerings::stock.ge(-adjustment.delta)),
    )
    .set(tank_offerings::stock.eq(tank_offerings::stock + adjustment.delta))
    .execute(conn)
    .await?;

    if updated == 0 {
        let exists = tank_offerings::table
            .find(adjustment.tank_id)
            .select(tank_offerings::id)
            .first::<Uuid>(conn)
            .await
            .optional()?;
        return Err(match exists {
            Some(_) => MarketError::ResourceExhausted("This tank is out of stock.".to_string()),
            None => MarketError::NotFound,
        });
    }
    Ok(())
}

#[async_trait]
impl MarketStore for PgStore {
    async fn insert_actor(&self, actor: &Actor) -> Result<(), MarketError> {
        let mut conn = self.conn().await?;
        diesel::insert_into(actors::table)
            .values(&ActorRow::from(actor))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn actor(&self, id: Uuid) -> Result<Actor, MarketError> {
        let mut conn = self.conn().await?;
        let row = actors::table
            .find(id)
            .select(ActorRow::as_select())
            .first(&mut conn)
            .await?;
        Actor::try_from(row)
    }

    async fn actor_by_username(&self, username: &str) -> Result<Option<Actor>, MarketError> {
        let mut conn = self.conn().await?;
        actors::table
            .filter(actors::username.eq(username))
            .select(ActorRow::as_select())
            .first(&mut conn)
            .await
            .optional()?
            .map(Actor::try_from)
            .transpose()
    }

    async fn sellers(&self, status: SellerStatus) -> Result<Vec<Actor>, MarketError> {
        let mut conn = self.conn().await?;
        actors::table
            .filter(actors::role.eq(Role::Seller.as_str()))
            .filter(actors::seller_status.eq(status.as_str()))
            .order(actors::username.asc())
            .select(ActorRow::as_select())
            .load(&mut conn)
            .await?
            .into_iter()
            .map(Actor::try_from)
            .collect()
    }

    async fn dashboard(&self) -> Result<DashboardCounts, MarketError> {
        let mut conn = self.conn().await?;

        let pending_applications = seller_applications::table
            .filter(seller_applications::status.eq(ApplicationStatus::Pending.as_str()))
            .count()
            .get_result(&mut conn)
            .await?;
        let approved_sellers = actors::table
            .filter(actors::role.eq(Role::Seller.as_str()))
            .filter(actors::seller_status.eq(SellerStatus::Approved.as_str()))
            .count()
            .get_result(&mut conn)
            .await?;
        let stores = stores::table.count().get_result(&mut conn).await?;
        let customers = actors::table
            .filter(actors::role.eq(Role::Customer.as_str()))
            .count()
            .get_result(&mut conn)
            .await?;
        let pending_reviews = reservations::table
            .filter(reservations::status.eq(ReservationStatus::PendingApproval.as_str()))
            .count()
            .get_result(&mut conn)
            .await?;

        Ok(DashboardCounts {
            pending_applications,
            approved_sellers,
            stores,
            customers,
            pending_reviews,
        })
    }

    async fn insert_listing(&self, listing: &StoreListing) -> Result<(), MarketError> {
        let mut conn = self.conn().await?;
        let store = StoreRow::from(&listing.store);
        let offerings: Vec<TankOfferingRow> =
            listing.offerings.iter().map(TankOfferingRow::from).collect();

        conn.transaction::<_, MarketError, _>(|conn| {
            Box::pin(async move {
                diesel::insert_into(stores::table)
                    .values(&store)
                    .execute(conn)
                    .await?;
                diesel::insert_into(tank_offerings::table)
                    .values(&offerings)
                    .execute(conn)
                    .await?;
                Ok(())
            })
        })
        .await
    }

    async fn store(&self, id: Uuid) -> Result<Store, MarketError> {
        let mut conn = self.conn().await?;
        let row = stores::table
            .find(id)
            .select(StoreRow::as_select())
            .first(&mut conn)
            .await?;
        Ok(row.into())
    }

    async fn stores(&self, filter: StoreFilter) -> Result<Vec<Store>, MarketError> {
        let mut conn = self.conn().await?;
        let mut query = stores::table.into_boxed();
        match filter {
            StoreFilter::Active => query = query.filter(stores::active.eq(true)),
            StoreFilter::OwnedBy(owner) => query = query.filter(stores::owner_id.eq(owner)),
            StoreFilter::All => {}
        }
        let rows = query
            .order((stores::created_at.desc(), stores::id.desc()))
            .select(StoreRow::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(Store::from).collect())
    }

    async fn set_store_active(
        &self,
        id: Uuid,
        expected: bool,
        active: bool,
    ) -> Result<Store, MarketError> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(
            stores::table
                .filter(stores::id.eq(id))
                .filter(stores::active.eq(expected)),
        )
        .set(stores::active.eq(active))
        .returning(StoreRow::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?;

        match updated {
            Some(row) => Ok(row.into()),
            None => {
                let current: bool = stores::table
                    .find(id)
                    .select(stores::active)
                    .first(&mut conn)
                    .await?;
                Err(Guard::StoreVisibility {
                    store_id: id,
                    active: current,
                }
                .into())
            }
        }
    }

    async fn delete_store(&self, id: Uuid) -> Result<(), MarketError> {
        let mut conn = self.conn().await?;
        // offerings, reservations and their notifications go with it (ON DELETE CASCADE)
        let deleted = diesel::delete(stores::table.find(id))
            .execute(&mut conn)
            .await?;
        if deleted == 0 {
            return Err(MarketError::NotFound);
        }
        Ok(())
    }

    async fn offering(&self, id: Uuid) -> Result<TankOffering, MarketError> {
        let mut conn = self.conn().await?;
        let row = tank_offerings::table
            .find(id)
            .select(TankOfferingRow::as_select())
            .first(&mut conn)
            .await?;
        TankOffering::try_from(row)
    }

    async fn offerings(&self, store_id: Uuid) -> Result<Vec<TankOffering>, MarketError> {
        let mut conn = self.conn().await?;
        tank_offerings::table
            .filter(tank_offerings::store_id.eq(store_id))
            .order(tank_offerings::tank_type.asc())
            .select(TankOfferingRow::as_select())
            .load(&mut conn)
            .await?
            .into_iter()
            .map(TankOffering::try_from)
            .collect()
    }

    async fn update_offering(
        &self,
        id: Uuid,
        update: &OfferingUpdate,
    ) -> Result<TankOffering, MarketError> {
        let mut conn = self.conn().await?;
        let row = diesel::update(tank_offerings::table.find(id))
            .set((
                tank_offerings::price.eq(&update.price),
                tank_offerings::active.eq(update.active),
            ))
            .returning(TankOfferingRow::as_returning())
            .get_result(&mut conn)
            .await?;
        TankOffering::try_from(row)
    }

    async fn place_reservation(&self, placement: &Placement) -> Result<Reservation, MarketError> {
        let mut conn = self.conn().await?;
        let placement = placement.clone();

        conn.transaction::<_, MarketError, _>(|conn| {
            Box::pin(async move {
                adjust_stock(conn, &placement.hold).await?;

                let row = diesel::insert_into(reservations::table)
                    .values(&ReservationRow::from(&placement.reservation))
                    .returning(ReservationRow::as_returning())
                    .get_result(conn)
                    .await?;

                enqueue(conn, &placement.notices).await?;
                Reservation::try_from(row)
            })
        })
        .await
    }

    async fn commit_reservation(
        &self,
        change: &ReservationChange,
    ) -> Result<Reservation, MarketError> {
        let mut conn = self.conn().await?;
        let change = change.clone();

        conn.transaction::<_, MarketError, _>(|conn| {
            Box::pin(async move {
                let updated = diesel::update(
                    reservations::table
                        .filter(reservations::id.eq(change.reservation_id))
                        .filter(reservations::status.eq(change.expected.as_str())),
                )
                .set(&ReservationTransition::from(&change))
                .returning(ReservationRow::as_returning())
                .get_result(conn)
                .await
                .optional()?;

                let Some(row) = updated else {
                    let current: String = reservations::table
                        .find(change.reservation_id)
                        .select(reservations::status)
                        .first(conn)
                        .await?;
                    return Err(Guard::Reservation {
                        from: current.parse()?,
                        event: change.event,
                    }
                    .into());
                };

                if let Some(adjustment) = &change.stock {
                    adjust_stock(conn, adjustment).await?;
                }
                enqueue(conn, &change.notices).await?;
                Reservation::try_from(row)
            })
        })
        .await
    }

    async fn reservation(&self, id: Uuid) -> Result<Reservation, MarketError> {
        let mut conn = self.conn().await?;
        let row = reservations::table
            .find(id)
            .select(ReservationRow::as_select())
            .first(&mut conn)
            .await?;
        Reservation::try_from(row)
    }

    async fn reservations(
        &self,
        filter: &ReservationFilter,
    ) -> Result<Vec<Reservation>, MarketError> {
        let mut conn = self.conn().await?;
        let mut query = reservations::table.into_boxed();
        if let Some(customer_id) = filter.customer_id {
            query = query.filter(reservations::customer_id.eq(customer_id));
        }
        if let Some(store_id) = filter.store_id {
            query = query.filter(reservations::store_id.eq(store_id));
        }
        if !filter.statuses.is_empty() {
            let statuses: Vec<&str> = filter.statuses.iter().map(|s| s.as_str()).collect();
            query = query.filter(reservations::status.eq_any(statuses));
        }

        query
            .order((reservations::created_at.desc(), reservations::id.desc()))
            .select(ReservationRow::as_select())
            .load(&mut conn)
            .await?
            .into_iter()
            .map(Reservation::try_from)
            .collect()
    }

    async fn application(&self, id: Uuid) -> Result<SellerApplication, MarketError> {
        let mut conn = self.conn().await?;
        let row = seller_applications::table
            .find(id)
            .select(SellerApplicationRow::as_select())
            .first(&mut conn)
            .await?;
        SellerApplication::try_from(row)
    }

    async fn application_for(
        &self,
        actor_id: Uuid,
    ) -> Result<Option<SellerApplication>, MarketError> {
        let mut conn = self.conn().await?;
        seller_applications::table
            .filter(seller_applications::actor_id.eq(actor_id))
            .select(SellerApplicationRow::as_select())
            .first(&mut conn)
            .await
            .optional()?
            .map(SellerApplication::try_from)
            .transpose()
    }

    async fn applications(
        &self,
        status: Option<ApplicationStatus>,
    ) -> Result<Vec<SellerApplication>, MarketError> {
        let mut conn = self.conn().await?;
        let mut query = seller_applications::table.into_boxed();
        if let Some(status) = status {
            query = query.filter(seller_applications::status.eq(status.as_str()));
        }

        query
            .order((
                seller_applications::created_at.desc(),
                seller_applications::id.desc(),
            ))
            .select(SellerApplicationRow::as_select())
            .load(&mut conn)
            .await?
            .into_iter()
            .map(SellerApplication::try_from)
            .collect()
    }

    async fn save_application(&self, application: &SellerApplication) -> Result<(), MarketError> {
        let mut conn = self.conn().await?;
        let row = SellerApplicationRow::from(application);

        conn.transaction::<_, MarketError, _>(|conn| {
            Box::pin(async move {
                diesel::delete(
                    seller_applications::table
                        .filter(seller_applications::actor_id.eq(row.actor_id))
                        .filter(
                            seller_applications::status
                                .eq(ApplicationStatus::Rejected.as_str()),
                        ),
                )
                .execute(conn)
                .await?;

                // a pending or approved application trips the UNIQUE (actor_id)
                diesel::insert_into(seller_applications::table)
                    .values(&row)
                    .execute(conn)
                    .await?;
                Ok(())
            })
        })
        .await
    }

    async fn commit_application(
        &self,
        change: &ApplicationChange,
    ) -> Result<SellerApplication, MarketError> {
        let mut conn = self.conn().await?;
        let change = change.clone();

        conn.transaction::<_, MarketError, _>(|conn| {
            Box::pin(async move {
                let updated = diesel::update(
                    seller_applications::table
                        .filter(seller_applications::id.eq(change.application_id))
                        .filter(seller_applications::status.eq(change.expected.as_str())),
                )
                .set(&ApplicationReview::from(&change))
                .returning(SellerApplicationRow::as_returning())
                .get_result(conn)
                .await
                .optional()?;

                let Some(row) = updated else {
                    let current: String = seller_applications::table
                        .find(change.application_id)
                        .select(seller_applications::status)
                        .first(conn)
                        .await?;
                    return Err(Guard::Application {
                        from: current.parse()?,
                        event: change.event,
                    }
                    .into());
                };

                if change.promote {
                    let promoted = diesel::update(actors::table.find(change.actor_id))
                        .set((
                            actors::role.eq(Role::Seller.as_str()),
                            actors::seller_status.eq(SellerStatus::Approved.as_str()),
                            actors::updated_at.eq(change.reviewed_at),
                        ))
                        .execute(conn)
                        .await?;
                    if promoted == 0 {
                        return Err(MarketError::NotFound);
                    }
                }

                enqueue(conn, &change.notices).await?;
                SellerApplication::try_from(row)
            })
        })
        .await
    }

    async fn commit_standing(&self, change: &StandingChange) -> Result<Actor, MarketError> {
        let mut conn = self.conn().await?;
        let change = change.clone();

        conn.transaction::<_, MarketError, _>(|conn| {
            Box::pin(async move {
                let updated = diesel::update(
                    actors::table
                        .filter(actors::id.eq(change.actor_id))
                        .filter(actors::role.eq(Role::Seller.as_str()))
                        .filter(actors::seller_status.eq(change.expected.as_str())),
                )
                .set((
                    actors::seller_status.eq(change.next.as_str()),
                    actors::updated_at.eq(Utc::now()),
                ))
                .returning(ActorRow::as_returning())
                .get_result(conn)
                .await
                .optional()?;

                let Some(row) = updated else {
                    let current: Option<String> = actors::table
                        .find(change.actor_id)
                        .select(actors::seller_status)
                        .first(conn)
                        .await?;
                    let current = match current {
                        Some(status) => status.parse()?,
                        None => SellerStatus::Pending,
                    };
                    return Err(Guard::Standing(current).into());
                };

                if change.deactivate_stores {
                    diesel::update(stores::table.filter(stores::owner_id.eq(change.actor_id)))
                        .set(stores::active.eq(false))
                        .execute(conn)
                        .await?;
                }
                enqueue(conn, &change.notices).await?;
                Actor::try_from(row)
            })
        })
        .await
    }

    async fn notifications(&self, recipient_id: Uuid) -> Result<Vec<Notification>, MarketError> {
        let mut conn = self.conn().await?;
        let rows = notifications::table
            .filter(notifications::recipient_id.eq(recipient_id))
            .order((notifications::created_at.desc(), notifications::id.desc()))
            .select(NotificationRow::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(Notification::from).collect())
    }

    async fn mark_read(&self, recipient_id: Uuid, ids: &[Uuid]) -> Result<usize, MarketError> {
        let mut conn = self.conn().await?;
        let marked = diesel::update(
            notifications::table
                .filter(notifications::recipient_id.eq(recipient_id))
                .filter(notifications::id.eq_any(ids.to_vec()))
                .filter(notifications::is_read.eq(false)),
        )
        .set(notifications::is_read.eq(true))
        .execute(&mut conn)
        .await?;
        Ok(marked)
    }

    async fn unread_count(&self, recipient_id: Uuid) -> Result<i64, MarketError> {
        let mut conn = self.conn().await?;
        let count = notifications::table
            .filter(notifications::recipient_id.eq(recipient_id))
            .filter(notifications::is_read.eq(false))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count)
    }

    async fn pending_outbox(&self, limit: i64) -> Result<Vec<OutboxEntry>, MarketError> {
        let mut conn = self.conn().await?;
        let events = outbox_events::table
            .filter(outbox_events::processed.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(limit)
            .select(DbOutboxEvent::as_select())
            .load(&mut conn)
            .await?;
        Ok(events.into_iter().map(OutboxEntry::from).collect())
    }

    async fn deliver(&self, entry: &OutboxEntry) -> Result<Option<Notification>, MarketError> {
        let mut conn = self.conn().await?;
        let entry = entry.clone();

        conn.transaction::<_, MarketError, _>(|conn| {
            Box::pin(async move {
                let claimed = diesel::update(
                    outbox_events::table
                        .filter(outbox_events::id.eq(entry.id))
                        .filter(outbox_events::processed.eq(false)),
                )
                .set(outbox_events::processed.eq(true))
                .execute(conn)
                .await?;
                if claimed == 0 {
                    return Ok(None);
                }

                let row = NotificationRow {
                    id: Uuid::new_v4(),
                    recipient_id: entry.recipient_id,
                    message: entry.message,
                    reservation_id: entry.reservation_id,
                    is_read: false,
                    created_at: Utc::now(),
                };
                let row = diesel::insert_into(notifications::table)
                    .values(&row)
                    .returning(NotificationRow::as_returning())
                    .get_result(conn)
                    .await?;
                Ok(Some(Notification::from(row)))
            })
        })
        .await
    }
}
