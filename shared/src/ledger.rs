//! Inventory ledger arithmetic.
//!
//! Stock changes only as a side effect of a reservation transition: one unit
//! held on creation, one unit released on cancellation or on rejection of the
//! pickup proof. Backends apply the adjustment in the same atomic unit as the
//! transition that owns it.

use serde::Serialize;
use uuid::Uuid;

use crate::error::MarketError;

/// Units taken by a single reservation.
pub const HOLD: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StockAdjustment {
    pub tank_id: Uuid,
    pub delta: i32,
}

impl StockAdjustment {
    pub fn hold(tank_id: Uuid) -> Self {
        Self {
            tank_id,
            delta: -HOLD,
        }
    }

    pub fn release(tank_id: Uuid) -> Self {
        Self {
            tank_id,
            delta: HOLD,
        }
    }
}

/// Apply `delta` to `stock`, refusing to go below zero.
pub fn adjust_stock(stock: i32, delta: i32) -> Result<i32, MarketError> {
    match stock.checked_add(delta) {
        Some(next) if next >= 0 => Ok(next),
        Some(_) => Err(MarketError::ResourceExhausted(
            "This tank is out of stock.".to_string(),
        )),
        None => Err(MarketError::Storage(format!(
            "stock overflow applying {delta} to {stock}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hold_and_release_cancel_out() {
        let tank = Uuid::new_v4();
        let held = adjust_stock(3, StockAdjustment::hold(tank).delta).unwrap();
        assert_eq!(held, 2);
        assert_eq!(adjust_stock(held, StockAdjustment::release(tank).delta).unwrap(), 3);
    }

    #[test]
    fn never_goes_negative() {
        assert!(matches!(
            adjust_stock(0, -HOLD),
            Err(MarketError::ResourceExhausted(_))
        ));
    }
}
