use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A price in minor units of a single ISO-4217 currency.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    /// Amount in minor units (cents).
    pub minor: u64,
    /// Upper-case three-letter currency code.
    pub currency: String,
}

impl Money {
    pub fn new(minor: u64, currency: &str) -> Result<Self, TypeError> {
        let currency = currency.trim().to_ascii_uppercase();
        if currency.len() != 3 || !currency.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(TypeError::InvalidCurrency(currency));
        }
        Ok(Self { minor, currency })
    }

    pub fn is_zero(&self) -> bool {
        self.minor == 0
    }

    /// Decimal rendering with two fraction digits, e.g. `"10.00"`.
    pub fn decimal(&self) -> String {
        format!("{}.{:02}", self.minor / 100, self.minor % 100)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.decimal(), self.currency)
    }
}
