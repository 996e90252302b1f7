//! Widths of the bounded text columns.

use crate::MarketError;

pub const USERNAME: usize = 150;
pub const PHONE: usize = 20;
pub const STORE_NAME: usize = 100;
pub const RESERVATION_NAME: usize = 100;
pub const BUSINESS_NAME: usize = 200;
pub const TIN_NUMBER: usize = 50;
pub const EMAIL: usize = 254;

/// Counts characters, not bytes, the same way VARCHAR(n) does.
pub fn ensure_fits(field: &str, value: &str, max: usize) -> Result<(), MarketError> {
    if value.chars().count() > max {
        return Err(MarketError::validation(format!(
            "{field} must be at most {max} characters."
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_inclusive_and_counts_characters() {
        assert!(ensure_fits("Name", &"a".repeat(RESERVATION_NAME), RESERVATION_NAME).is_ok());
        assert!(ensure_fits("Name", &"ñ".repeat(RESERVATION_NAME), RESERVATION_NAME).is_ok());

        let err = ensure_fits("Name", &"a".repeat(RESERVATION_NAME + 1), RESERVATION_NAME)
            .unwrap_err();
        assert_eq!(err.to_string(), "Name must be at most 100 characters.");
    }
}
