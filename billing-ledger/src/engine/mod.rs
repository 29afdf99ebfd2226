//! Pure invariant functions shared by every store.
//!
//! Nothing in here touches storage or locks. A store loads the rows a
//! mutation affects, calls into these functions, and persists the result
//! inside the same unit of work.

pub mod numbering;
pub mod rates;
pub mod summary;
pub mod time_entry;
pub mod totals;

use rust_decimal::{Decimal, RoundingStrategy};

/// Round a money amount to centavos, midpoint away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_money_midpoint_away_from_zero() {
        assert_eq!(round_money(dec!(0.005)), dec!(0.01));
        assert_eq!(round_money(dec!(-0.005)), dec!(-0.01));
        assert_eq!(round_money(dec!(333.3333)), dec!(333.33));
        assert_eq!(round_money(dec!(12.345)), dec!(12.35));
    }
}
