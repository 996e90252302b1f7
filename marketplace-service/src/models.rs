use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared::*;
use uuid::Uuid;

use crate::store::OutboxEntry;

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::actors)]
pub struct ActorRow {
    pub id: Uuid,
    pub username: String,
    pub role: String,
    pub seller_status: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::stores)]
pub struct StoreRow {
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

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::tank_offerings)]
pub struct TankOfferingRow {
    pub id: Uuid,
    pub store_id: Uuid,
    pub tank_type: String,
    pub stock: i32,
    pub price: BigDecimal,
    pub active: bool,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::reservations)]
pub struct ReservationRow {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub store_id: Uuid,
    pub tank_id: Uuid,
    pub name: String,
    pub status: String,
    pub pickup_proof: Option<String>,
    pub pickup_proof_uploaded_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub notified: bool,
    pub created_at: DateTime<Utc>,
}

/// Columns a reservation transition may touch. `None` leaves a column as is.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = crate::schema::reservations)]
pub struct ReservationTransition {
    pub status: String,
    pub pickup_proof: Option<String>,
    pub pickup_proof_uploaded_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::seller_applications)]
pub struct SellerApplicationRow {
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
    pub status: String,
    pub rejection_reason: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = crate::schema::seller_applications)]
pub struct ApplicationReview {
    pub status: String,
    pub rejection_reason: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::notifications)]
pub struct NotificationRow {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub message: String,
    pub reservation_id: Option<Uuid>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct DbOutboxEvent {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub message: String,
    pub reservation_id: Option<Uuid>,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub message: String,
    pub reservation_id: Option<Uuid>,
}

impl From<&Actor> for ActorRow {
    fn from(actor: &Actor) -> Self {
        Self {
            id: actor.id,
            username: actor.username.clone(),
            role: actor.role.as_str().to_string(),
            seller_status: actor.seller_status.map(|s| s.as_str().to_string()),
            phone: actor.phone.clone(),
            address: actor.address.clone(),
            created_at: actor.created_at,
            updated_at: actor.updated_at,
        }
    }
}

impl TryFrom<ActorRow> for Actor {
    type Error = MarketError;

    fn try_from(row: ActorRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            username: row.username,
            role: row.role.parse()?,
            seller_status: row
                .seller_status
                .as_deref()
                .map(str::parse::<SellerStatus>)
                .transpose()?,
            phone: row.phone,
            address: row.address,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<&Store> for StoreRow {
    fn from(store: &Store) -> Self {
        Self {
            id: store.id,
            owner_id: store.owner_id,
            name: store.name.clone(),
            description: store.description.clone(),
            latitude: store.latitude,
            longitude: store.longitude,
            owner_photo: store.owner_photo.clone(),
            active: store.active,
            created_at: store.created_at,
        }
    }
}

impl From<StoreRow> for Store {
    fn from(row: StoreRow) -> Self {
        Self {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            description: row.description,
            latitude: row.latitude,
            longitude: row.longitude,
            owner_photo: row.owner_photo,
            active: row.active,
            created_at: row.created_at,
        }
    }
}

impl From<&TankOffering> for TankOfferingRow {
    fn from(offering: &TankOffering) -> Self {
        Self {
            id: offering.id,
            store_id: offering.store_id,
            tank_type: offering.tank_type.as_str().to_string(),
            stock: offering.stock,
            price: offering.price.clone(),
            active: offering.active,
        }
    }
}

impl TryFrom<TankOfferingRow> for TankOffering {
    type Error = MarketError;

    fn try_from(row: TankOfferingRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            store_id: row.store_id,
            tank_type: row.tank_type.parse()?,
            stock: row.stock,
            price: row.price,
            active: row.active,
        })
    }
}

impl From<&Reservation> for ReservationRow {
    fn from(reservation: &Reservation) -> Self {
        Self {
            id: reservation.id,
            customer_id: reservation.customer_id,
            store_id: reservation.store_id,
            tank_id: reservation.tank_id,
            name: reservation.name.clone(),
            status: reservation.status.as_str().to_string(),
            pickup_proof: reservation.pickup_proof.clone(),
            pickup_proof_uploaded_at: reservation.pickup_proof_uploaded_at,
            rejection_reason: reservation.rejection_reason.clone(),
            reviewed_by: reservation.reviewed_by,
            reviewed_at: reservation.reviewed_at,
            notified: reservation.notified,
            created_at: reservation.created_at,
        }
    }
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = MarketError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            customer_id: row.customer_id,
            store_id: row.store_id,
            tank_id: row.tank_id,
            name: row.name,
            status: row.status.parse()?,
            pickup_proof: row.pickup_proof,
            pickup_proof_uploaded_at: row.pickup_proof_uploaded_at,
            rejection_reason: row.rejection_reason,
            reviewed_by: row.reviewed_by,
            reviewed_at: row.reviewed_at,
            notified: row.notified,
            created_at: row.created_at,
        })
    }
}

impl From<&reservation::ReservationChange> for ReservationTransition {
    fn from(change: &reservation::ReservationChange) -> Self {
        let proof = change.proof.as_ref();
        let review = change.review.as_ref();
        Self {
            status: change.next.as_str().to_string(),
            pickup_proof: proof.map(|p| p.reference.clone()),
            pickup_proof_uploaded_at: proof.map(|p| p.uploaded_at),
            rejection_reason: review.and_then(|r| r.reason.clone()),
            reviewed_by: review.map(|r| r.reviewer),
            reviewed_at: review.map(|r| r.reviewed_at),
        }
    }
}

impl From<&SellerApplication> for SellerApplicationRow {
    fn from(app: &SellerApplication) -> Self {
        Self {
            id: app.id,
            actor_id: app.actor_id,
            business_name: app.business_name.clone(),
            business_address: app.business_address.clone(),
            business_permit: app.business_permit.clone(),
            dti_certificate: app.dti_certificate.clone(),
            mayors_permit: app.mayors_permit.clone(),
            valid_id: app.valid_id.clone(),
            tin_number: app.tin_number.clone(),
            phone: app.phone.clone(),
            email: app.email.clone(),
            status: app.status.as_str().to_string(),
            rejection_reason: app.rejection_reason.clone(),
            reviewed_by: app.reviewed_by,
            reviewed_at: app.reviewed_at,
            created_at: app.created_at,
            updated_at: app.updated_at,
        }
    }
}

impl TryFrom<SellerApplicationRow> for SellerApplication {
    type Error = MarketError;

    fn try_from(row: SellerApplicationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            actor_id: row.actor_id,
            business_name: row.business_name,
            business_address: row.business_address,
            business_permit: row.business_permit,
            dti_certificate: row.dti_certificate,
            mayors_permit: row.mayors_permit,
            valid_id: row.valid_id,
            tin_number: row.tin_number,
            phone: row.phone,
            email: row.email,
            status: row.status.parse()?,
            rejection_reason: row.rejection_reason,
            reviewed_by: row.reviewed_by,
            reviewed_at: row.reviewed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<&application::ApplicationChange> for ApplicationReview {
    fn from(change: &application::ApplicationChange) -> Self {
        Self {
            status: change.next.as_str().to_string(),
            rejection_reason: change.rejection_reason.clone(),
            reviewed_by: Some(change.reviewer),
            reviewed_at: Some(change.reviewed_at),
            updated_at: change.reviewed_at,
        }
    }
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        Self {
            id: row.id,
            recipient_id: row.recipient_id,
            message: row.message,
            reservation_id: row.reservation_id,
            read: row.is_read,
            created_at: row.created_at,
        }
    }
}

impl From<&Notice> for NewOutboxEvent {
    fn from(notice: &Notice) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient_id: notice.recipient_id,
            message: notice.message.clone(),
            reservation_id: notice.reservation_id,
        }
    }
}

impl From<DbOutboxEvent> for OutboxEntry {
    fn from(event: DbOutboxEvent) -> Self {
        Self {
            id: event.id,
            recipient_id: event.recipient_id,
            message: event.message,
            reservation_id: event.reservation_id,
            created_at: event.created_at,
        }
    }
}
