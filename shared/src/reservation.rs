//! Reservation lifecycle.
//!
//! ```text
//!            cancel
//!   pending ────────► cancelled
//!      │
//!      │ upload proof        approve
//!      ▼               ┌──────────────► approved
//!   pending_approval ──┤
//!      ▲               └──────────────► rejected
//!      │                    reject          │
//!      └────────────── upload proof ────────┘
//! ```
//!
//! Functions here are pure. They check the gate, ownership and current state,
//! and return a change plan that a store applies atomically, comparing the
//! status against `expected` so that concurrent transitions cannot both win.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::auth::{self, Action};
use crate::error::{Guard, MarketError};
use crate::ledger::StockAdjustment;
use crate::limits;
use crate::notification::{self, Notice};
use crate::{Actor, Reservation, ReservationStatus, Store, TankOffering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationEvent {
    Cancel,
    UploadProof,
    Approve,
    Reject,
}

impl ReservationEvent {
    pub const ALL: [ReservationEvent; 4] = [Self::Cancel, Self::UploadProof, Self::Approve, Self::Reject];
}

impl fmt::Display for ReservationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cancel => "cancel",
            Self::UploadProof => "upload pickup proof for",
            Self::Approve => "approve",
            Self::Reject => "reject",
        })
    }
}

impl ReservationStatus {
    /// The transition table. Every pair not listed is a guard violation.
    pub fn on(self, event: ReservationEvent) -> Result<ReservationStatus, Guard> {
        use ReservationEvent as E;
        use ReservationStatus as S;

        match (self, event) {
            (S::Pending, E::Cancel) => Ok(S::Cancelled),
            (S::Pending | S::Rejected, E::UploadProof) => Ok(S::PendingApproval),
            (S::PendingApproval, E::Approve) => Ok(S::Approved),
            (S::PendingApproval, E::Reject) => Ok(S::Rejected),
            (from, event) => Err(Guard::Reservation { from, event }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProofRecord {
    pub reference: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewRecord {
    pub reviewer: Uuid,
    pub reviewed_at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// A validated transition of an existing reservation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReservationChange {
    pub reservation_id: Uuid,
    pub event: ReservationEvent,
    pub expected: ReservationStatus,
    pub next: ReservationStatus,
    pub stock: Option<StockAdjustment>,
    pub proof: Option<ProofRecord>,
    pub review: Option<ReviewRecord>,
    pub notices: Vec<Notice>,
}

impl ReservationChange {
    fn new(reservation: &Reservation, event: ReservationEvent) -> Result<Self, MarketError> {
        let next = reservation.status.on(event)?;
        Ok(Self {
            reservation_id: reservation.id,
            event,
            expected: reservation.status,
            next,
            stock: None,
            proof: None,
            review: None,
            notices: Vec::new(),
        })
    }

    /// Field updates for in-memory backends; stock and notices are applied by
    /// the caller.
    pub fn apply_to(&self, reservation: &mut Reservation) {
        reservation.status = self.next;
        if let Some(proof) = &self.proof {
            reservation.pickup_proof = Some(proof.reference.clone());
            reservation.pickup_proof_uploaded_at = Some(proof.uploaded_at);
        }
        if let Some(review) = &self.review {
            reservation.reviewed_by = Some(review.reviewer);
            reservation.reviewed_at = Some(review.reviewed_at);
            if let Some(reason) = &review.reason {
                reservation.rejection_reason = Some(reason.clone());
            }
        }
    }
}

/// A new reservation together with the hold it places on stock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Placement {
    pub reservation: Reservation,
    pub hold: StockAdjustment,
    pub notices: Vec<Notice>,
}

pub fn place(
    customer: &Actor,
    store: &Store,
    tank: &TankOffering,
    name: &str,
    now: DateTime<Utc>,
) -> Result<Placement, MarketError> {
    auth::ensure(customer, Action::Reserve)?;
    if tank.store_id != store.id || !store.active || !tank.active {
        return Err(MarketError::NotFound);
    }
    if tank.stock <= 0 {
        return Err(MarketError::ResourceExhausted(
            "This tank is out of stock.".to_string(),
        ));
    }
    let name = name.trim();
    if name.is_empty() {
        return Err(MarketError::validation("Please provide your name."));
    }
    limits::ensure_fits("Name", name, limits::RESERVATION_NAME)?;

    let reservation = Reservation {
        id: Uuid::new_v4(),
        customer_id: customer.id,
        store_id: store.id,
        tank_id: tank.id,
        name: name.to_string(),
        status: ReservationStatus::Pending,
        pickup_proof: None,
        pickup_proof_uploaded_at: None,
        rejection_reason: None,
        reviewed_by: None,
        reviewed_at: None,
        // the creation notice is queued with the insert below
        notified: true,
        created_at: now,
    };
    let notice = Notice::to(
        store.owner_id,
        notification::new_order(reservation.id, name, tank.tank_type, &store.name),
    )
    .about(reservation.id);

    Ok(Placement {
        hold: StockAdjustment::hold(tank.id),
        reservation,
        notices: vec![notice],
    })
}

pub fn cancel(
    customer: &Actor,
    reservation: &Reservation,
    store: &Store,
) -> Result<ReservationChange, MarketError> {
    auth::ensure(customer, Action::CancelReservation)?;
    if reservation.customer_id != customer.id {
        return Err(MarketError::NotFound);
    }
    ensure_store(reservation, store)?;

    let mut change = ReservationChange::new(reservation, ReservationEvent::Cancel)?;
    change.stock = Some(StockAdjustment::release(reservation.tank_id));
    change.notices.push(
        Notice::to(store.owner_id, notification::order_cancelled(reservation.id))
            .about(reservation.id),
    );
    Ok(change)
}

/// Pre-flight for a proof upload, so that no blob is written for a
/// reservation that cannot take one.
pub fn ensure_proof_accepted(
    seller: &Actor,
    reservation: &Reservation,
    store: &Store,
) -> Result<(), MarketError> {
    auth::ensure(seller, Action::UploadPickupProof)?;
    ensure_store(reservation, store)?;
    if store.owner_id != seller.id {
        return Err(MarketError::NotFound);
    }
    reservation.status.on(ReservationEvent::UploadProof)?;
    Ok(())
}

pub fn attach_proof(
    seller: &Actor,
    reservation: &Reservation,
    store: &Store,
    reference: String,
    now: DateTime<Utc>,
) -> Result<ReservationChange, MarketError> {
    ensure_proof_accepted(seller, reservation, store)?;

    let mut change = ReservationChange::new(reservation, ReservationEvent::UploadProof)?;
    change.proof = Some(ProofRecord {
        reference,
        uploaded_at: now,
    });
    change.notices.push(
        Notice::to(reservation.customer_id, notification::proof_uploaded(reservation.id))
            .about(reservation.id),
    );
    Ok(change)
}

pub fn approve(
    admin: &Actor,
    reservation: &Reservation,
    store: &Store,
    now: DateTime<Utc>,
) -> Result<ReservationChange, MarketError> {
    auth::ensure(admin, Action::ReviewPickup)?;
    ensure_store(reservation, store)?;

    let mut change = ReservationChange::new(reservation, ReservationEvent::Approve)?;
    change.review = Some(ReviewRecord {
        reviewer: admin.id,
        reviewed_at: now,
        reason: None,
    });
    change.notices.push(
        Notice::to(
            reservation.customer_id,
            notification::pickup_approved_for_customer(reservation.id),
        )
        .about(reservation.id),
    );
    change.notices.push(
        Notice::to(
            store.owner_id,
            notification::pickup_approved_for_seller(reservation.id),
        )
        .about(reservation.id),
    );
    Ok(change)
}

pub fn reject(
    admin: &Actor,
    reservation: &Reservation,
    store: &Store,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<ReservationChange, MarketError> {
    auth::ensure(admin, Action::ReviewPickup)?;
    ensure_store(reservation, store)?;

    let mut change = ReservationChange::new(reservation, ReservationEvent::Reject)?;
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(MarketError::validation("Please provide a rejection reason."));
    }

    change.stock = Some(StockAdjustment::release(reservation.tank_id));
    change.review = Some(ReviewRecord {
        reviewer: admin.id,
        reviewed_at: now,
        reason: Some(reason.to_string()),
    });
    change.notices.push(
        Notice::to(
            store.owner_id,
            notification::proof_rejected_for_seller(reservation.id, reason),
        )
        .about(reservation.id),
    );
    change.notices.push(
        Notice::to(
            reservation.customer_id,
            notification::proof_rejected_for_customer(reservation.id),
        )
        .about(reservation.id),
    );
    Ok(change)
}

fn ensure_store(reservation: &Reservation, store: &Store) -> Result<(), MarketError> {
    if reservation.store_id != store.id {
        return Err(MarketError::NotFound);
    }
    Ok(())
}
