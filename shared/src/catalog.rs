//! Stores and their tank offerings.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::auth::{self, Action};
use crate::error::MarketError;
use crate::limits;
use crate::{Actor, Store, TankOffering};

pub const DEFAULT_DESCRIPTION: &str = "Quality propane gas supplier";

/// Prices are stored as NUMERIC(8, 2).
const PRICE_CEILING: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TankType {
    #[serde(rename = "A/S Valve Gasul")]
    AsValveGasul,
    #[serde(rename = "POL Valve Gasul")]
    PolValveGasul,
    #[serde(rename = "Price Gas")]
    PriceGas,
}

crate::string_enum!(TankType, "tank type" {
    AsValveGasul => "A/S Valve Gasul",
    PolValveGasul => "POL Valve Gasul",
    PriceGas => "Price Gas",
});

impl TankType {
    pub const ALL: [TankType; 3] = [Self::AsValveGasul, Self::PolValveGasul, Self::PriceGas];
}

/// Price and opening stock a seller enters for one tank type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfferingTerms {
    pub price: Option<BigDecimal>,
    pub stock: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub tanks_to_sell: Vec<TankType>,
    #[serde(default)]
    pub terms: BTreeMap<TankType, OfferingTerms>,
}

/// A store together with the offerings created for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreListing {
    pub store: Store,
    pub offerings: Vec<TankOffering>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferingUpdate {
    pub price: BigDecimal,
    pub active: bool,
}

/// Validate a draft and lay out the store and its offerings.
///
/// Terms for tank types that were not selected are ignored. Every selected
/// type needs a positive price and a non-negative opening stock.
pub fn open_store(
    seller: &Actor,
    draft: &StoreDraft,
    owner_photo: String,
    now: DateTime<Utc>,
) -> Result<StoreListing, MarketError> {
    auth::ensure(seller, Action::ManageStores)?;

    let name = draft.name.trim();
    if name.is_empty() {
        return Err(MarketError::validation("Store name is required."));
    }
    limits::ensure_fits("Store name", name, limits::STORE_NAME)?;
    if !(-90.0..=90.0).contains(&draft.latitude) || !(-180.0..=180.0).contains(&draft.longitude) {
        return Err(MarketError::validation("Store location is out of range."));
    }
    if draft.tanks_to_sell.is_empty() {
        return Err(MarketError::validation("Select at least one tank to sell."));
    }

    let store = Store {
        id: Uuid::new_v4(),
        owner_id: seller.id,
        name: name.to_string(),
        description: draft
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(DEFAULT_DESCRIPTION)
            .to_string(),
        latitude: draft.latitude,
        longitude: draft.longitude,
        owner_photo: Some(owner_photo),
        active: true,
        created_at: now,
    };

    let mut selected = draft.tanks_to_sell.clone();
    selected.sort();
    selected.dedup();

    let mut offerings = Vec::with_capacity(selected.len());
    for tank_type in selected {
        let terms = draft.terms.get(&tank_type).cloned().unwrap_or_default();
        let price = match terms.price {
            Some(price) => normalize_price(&price)?,
            None => {
                return Err(MarketError::validation(format!(
                    "Price required for selected tank: {tank_type}"
                )))
            }
        };
        let stock = match terms.stock {
            Some(stock) if stock >= 0 => stock,
            Some(_) => {
                return Err(MarketError::validation(format!(
                    "Stock cannot be negative: {tank_type}"
                )))
            }
            None => {
                return Err(MarketError::validation(format!(
                    "Stock required for selected tank: {tank_type}"
                )))
            }
        };
        offerings.push(TankOffering {
            id: Uuid::new_v4(),
            store_id: store.id,
            tank_type,
            stock,
            price,
            active: true,
        });
    }

    Ok(StoreListing { store, offerings })
}

/// Seller-side ownership check. A store owned by someone else looks missing.
pub fn ensure_owner(seller: &Actor, store: &Store) -> Result<(), MarketError> {
    auth::ensure(seller, Action::ManageStores)?;
    if store.owner_id != seller.id {
        return Err(MarketError::NotFound);
    }
    Ok(())
}

/// Offering edits change price and visibility only. Stock moves through the
/// ledger exclusively.
pub fn validate_update(update: &OfferingUpdate) -> Result<OfferingUpdate, MarketError> {
    Ok(OfferingUpdate {
        price: normalize_price(&update.price)?,
        active: update.active,
    })
}

/// Truncates to centavos, then checks the stored value.
fn normalize_price(price: &BigDecimal) -> Result<BigDecimal, MarketError> {
    let price = price.with_scale(2);
    if price <= BigDecimal::zero() {
        return Err(MarketError::validation("Price must be greater than zero."));
    }
    if price >= BigDecimal::from(PRICE_CEILING) {
        return Err(MarketError::validation(format!(
            "Price must be less than {PRICE_CEILING}."
        )));
    }
    Ok(price)
}
