//! Value objects: equality by value, not identity.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. To
/// "modify" one, construct a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// Price of a catalog item.
///
/// Always finite and non-negative. Deserialization does not re-validate, so
/// values read off the wire should go through [`Price::new`] before being
/// trusted for new writes.
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(f64);

impl Price {
    pub fn new(amount: f64) -> Result<Self, DomainError> {
        if !amount.is_finite() {
            return Err(DomainError::validation("price must be a finite number"));
        }
        if amount < 0.0 {
            return Err(DomainError::validation("price cannot be less than 0"));
        }
        Ok(Self(amount))
    }

    pub fn amount(self) -> f64 {
        self.0
    }
}

impl ValueObject for Price {}

impl core::fmt::Display for Price {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn negative_price_is_rejected() {
        let err = Price::new(-0.01).unwrap_err();
        assert_eq!(err, DomainError::validation("price cannot be less than 0"));
    }

    #[test]
    fn nan_is_rejected() {
        assert!(Price::new(f64::NAN).is_err());
        assert!(Price::new(f64::INFINITY).is_err());
    }

    proptest! {
        #[test]
        fn non_negative_amounts_round_trip(amount in 0.0f64..1_000_000.0) {
            let price = Price::new(amount).unwrap();
            prop_assert_eq!(price.amount(), amount);
        }
    }
}
