//! Integer arithmetic helpers shared by the polyhedral layer.

/// Greatest common divisor of the absolute values; `gcd(0, 0) == 0`.
pub fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Division rounding towards negative infinity. `d` must be positive.
pub fn floor_div(n: i64, d: i64) -> i64 {
    debug_assert!(d > 0);
    n.div_euclid(d)
}

/// Division rounding towards positive infinity. `d` must be positive.
pub fn ceil_div(n: i64, d: i64) -> i64 {
    debug_assert!(d > 0);
    -floor_div(-n, d)
}

/// Non-negative remainder. `d` must be positive.
pub fn pmod(n: i64, d: i64) -> i64 {
    debug_assert!(d > 0);
    n.rem_euclid(d)
}
