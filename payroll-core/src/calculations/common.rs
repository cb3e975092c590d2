//! Rounding and clamping helpers shared by every calculation component.

use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places kept on effective rates.
pub const RATE_SCALE: u32 = 6;

/// Rounds a monetary value to two places, midpoints away from zero.
///
/// Every amount written to a result goes through this: bracket taxes,
/// production lines, fees and the net value.
///
/// # Arguments
///
/// * `value` - The amount to round
///
/// # Returns
///
/// `value` with exactly two decimal places.
///
/// # Examples
///
/// ```
/// use rust_decimal_macros::dec;
/// use payroll_core::calculations::common::round_half_up;
///
/// assert_eq!(round_half_up(dec!(158.825)), dec!(158.83));
/// assert_eq!(round_half_up(dec!(158.824)), dec!(158.82));
/// assert_eq!(round_half_up(dec!(-0.005)), dec!(-0.01));
/// ```
pub fn round_half_up(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Rounds a ratio to [`RATE_SCALE`] places, midpoints away from zero.
///
/// # Arguments
///
/// * `value` - A ratio such as `tax / base`
///
/// # Returns
///
/// `value` with at most six decimal places.
///
/// # Examples
///
/// ```
/// use rust_decimal_macros::dec;
/// use payroll_core::calculations::common::round_rate;
///
/// assert_eq!(round_rate(dec!(0.0794100001)), dec!(0.079410));
/// assert_eq!(round_rate(dec!(0.0000005)), dec!(0.000001));
/// ```
pub fn round_rate(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(RATE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Returns the larger of two amounts.
///
/// # Arguments
///
/// * `a` - First amount
/// * `b` - Second amount
///
/// # Returns
///
/// `a` when it is greater than `b`, otherwise `b`.
///
/// # Examples
///
/// ```
/// use rust_decimal_macros::dec;
/// use payroll_core::calculations::common::max;
///
/// assert_eq!(max(dec!(220.00), dec!(550.00)), dec!(550.00));
/// assert_eq!(max(dec!(-80.00), dec!(0)), dec!(0));
/// ```
pub fn max(
    a: Decimal,
    b: Decimal,
) -> Decimal {
    if a > b { a } else { b }
}

/// Returns the smaller of two amounts.
///
/// # Arguments
///
/// * `a` - First amount
/// * `b` - Second amount
///
/// # Returns
///
/// `a` when it is less than `b`, otherwise `b`.
///
/// # Examples
///
/// ```
/// use rust_decimal_macros::dec;
/// use payroll_core::calculations::common::min;
///
/// assert_eq!(min(dec!(612.40), dec!(550.00)), dec!(550.00));
/// assert_eq!(min(dec!(-80.00), dec!(0)), dec!(-80.00));
/// ```
pub fn min(
    a: Decimal,
    b: Decimal,
) -> Decimal {
    if a < b { a } else { b }
}

/// Clamps a value at zero, returning the clamped value and the amount
/// that was cut off (zero when nothing was clamped).
pub fn clamp_non_negative(value: Decimal) -> (Decimal, Decimal) {
    if value < Decimal::ZERO {
        (Decimal::ZERO, -value)
    } else {
        (value, Decimal::ZERO)
    }
}
