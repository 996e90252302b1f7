//! Notices produced by transitions.
//!
//! A transition never writes notifications itself. It returns the notices it
//! wants delivered and the persistence layer queues them in the same atomic
//! unit as the state change.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::TankType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub recipient_id: Uuid,
    pub message: String,
    pub reservation_id: Option<Uuid>,
}

impl Notice {
    pub fn to(recipient_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            recipient_id,
            message: message.into(),
            reservation_id: None,
        }
    }

    pub fn about(mut self, reservation_id: Uuid) -> Self {
        self.reservation_id = Some(reservation_id);
        self
    }
}

pub fn new_order(order: Uuid, name: &str, tank_type: TankType, store_name: &str) -> String {
    format!(
        "New order #{order}! {name} purchased {tank_type} from {store_name}. \
         Please confirm pickup and upload proof."
    )
}

pub fn order_cancelled(order: Uuid) -> String {
    format!("Order #{order} was cancelled by the customer.")
}

pub fn proof_uploaded(order: Uuid) -> String {
    format!("Seller has uploaded pickup proof for your order #{order}. Waiting for admin approval.")
}

pub fn pickup_approved_for_customer(order: Uuid) -> String {
    format!("Your order #{order} has been approved! The pickup is confirmed.")
}

pub fn pickup_approved_for_seller(order: Uuid) -> String {
    format!("Pickup proof for order #{order} has been approved by admin.")
}

pub fn proof_rejected_for_seller(order: Uuid, reason: &str) -> String {
    format!(
        "Pickup proof for order #{order} was rejected. Reason: {reason}. \
         Please upload a new proof."
    )
}

pub fn proof_rejected_for_customer(order: Uuid) -> String {
    format!(
        "Pickup proof for your order #{order} was rejected. The seller will need to resubmit."
    )
}

pub fn application_approved(business_name: &str) -> String {
    format!(
        "Congratulations! Your seller application for '{business_name}' has been APPROVED! \
         You can now create stores and start selling."
    )
}

pub fn application_rejected(business_name: &str, reason: &str) -> String {
    format!("Your seller application for '{business_name}' has been rejected. Reason: {reason}")
}

pub fn seller_suspended() -> String {
    "Your seller account has been suspended. Please contact support for more information."
        .to_string()
}
