//! Outstanding balance of a user.
//!
//! The amount owed is derived on every read and never persisted:
//!
//! ```text
//! amount_to_pay = price + soli_amount - (takes_soli ? global_soli : 0) - amount_paid
//! ```
//!
//! Users without a spot type owe nothing.

use serde::Deserialize;

use crate::model::UserWithSpot;

/// Default global solidarity credit.
pub const DEFAULT_SOLI_AMOUNT: i64 = 25;

/// Process-wide solidarity setting, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SolidarityConfig {
    /// Credit granted to every user with `takes_soli`.
    pub global_amount: i64,
}

impl Default for SolidarityConfig {
    fn default() -> Self {
        Self {
            global_amount: DEFAULT_SOLI_AMOUNT,
        }
    }
}

/// Computes what `entry.user` still owes.
///
/// `entry.spot_type` must be resolved whenever the user holds a spot type.
pub fn amount_to_pay(entry: &UserWithSpot, soli: SolidarityConfig) -> i64 {
    let user = &entry.user;
    if user.spot_type_id.is_none() {
        return 0;
    }

    debug_assert!(
        entry.spot_type.as_ref().map(|s| s.id) == user.spot_type_id,
        "spot type relation not resolved for {}",
        user.id
    );
    let price = entry.spot_type.as_ref().map_or(0, |s| s.price);
    let credit = if user.takes_soli { soli.global_amount } else { 0 };

    price + user.soli_amount - credit - user.amount_paid
}
