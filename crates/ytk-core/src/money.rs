// SPDX-License-Identifier: MIT OR Apache-2.0
//! Monetary amounts in minor units.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A non-negative amount in minor units (yen, cents).
///
/// Never fractional; the currency is stored alongside on the owning row.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero amount.
    pub const ZERO: Money = Money(0);

    /// Wrap an amount already expressed in minor units.
    pub fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    /// The raw minor-unit value.
    pub fn minor(&self) -> u64 {
        self.0
    }

    /// Checked addition.
    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    /// Checked subtraction.
    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Currency of a transaction row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Japanese yen. Minor unit == major unit.
    #[default]
    Jpy,
    /// US dollar, in cents.
    Usd,
    /// Euro, in cents.
    Eur,
}
