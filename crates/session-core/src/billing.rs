//! Cost Calculator
//!
//! Pure billing arithmetic: elapsed time, per-minute rate, and a free
//! introductory window in, billable cost out. No state, no clock.
//!
//! # Money
//!
//! All amounts are integer **minor units** (cents, paise, ...) carried as
//! `i64`, so currency precision is exact and a "round to 2 decimals" step
//! never exists at the arithmetic layer. `rate_per_minute` is minor units
//! per billable minute. Rendering as a decimal string is a display
//! concern, see [`format_amount`].

use serde::{Deserialize, Serialize};

/// Amount in minor units of the session currency.
pub type MinorUnits = i64;

/// Immutable billing parameters, fixed when the call request is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingParams {
    /// Rate per billable minute, in minor units.
    pub rate_per_minute: MinorUnits,
    /// ISO currency code, carried opaquely.
    pub currency: String,
    /// Free introductory minutes before billing starts.
    pub free_minutes: u32,
}

impl BillingParams {
    pub fn new(rate_per_minute: MinorUnits, currency: impl Into<String>, free_minutes: u32) -> Self {
        Self {
            rate_per_minute,
            currency: currency.into(),
            free_minutes,
        }
    }
}

/// Whole billable minutes for a given elapsed time.
///
/// Time inside the free window costs nothing; beyond it, any partial
/// minute counts as a full billable minute (round up, never down or to
/// nearest — this must match what the payment side charges).
pub fn billable_minutes(elapsed_secs: u64, free_minutes: u32) -> u64 {
    let free_secs = u64::from(free_minutes) * 60;
    if elapsed_secs <= free_secs {
        return 0;
    }
    let billable_secs = elapsed_secs - free_secs;
    billable_secs.div_ceil(60)
}

/// Cost accrued after `elapsed_secs` of connected time.
///
/// `accrued_cost` is the *only* way cost is ever produced: callers
/// recompute from elapsed time rather than incrementing a running total,
/// so a replayed or duplicated tick can never double-bill.
pub fn accrued_cost(elapsed_secs: u64, params: &BillingParams) -> MinorUnits {
    billable_minutes(elapsed_secs, params.free_minutes) as MinorUnits * params.rate_per_minute
}

/// Cost of extending a running session by `additional_minutes`.
///
/// Extensions are charged flat: the free-minutes window applies to the
/// start of the call only.
pub fn extension_cost(additional_minutes: u32, params: &BillingParams) -> MinorUnits {
    MinorUnits::from(additional_minutes) * params.rate_per_minute
}

/// Render a minor-unit amount as a two-decimal string, e.g. `"50.00 INR"`.
pub fn format_amount(amount: MinorUnits, currency: &str) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{}{}.{:02} {}", sign, abs / 100, abs % 100, currency)
}
