//! Float canonicalization for position comparisons.

use core::cmp::Ordering;

/// Canonicalize a floating-point value for deterministic comparison.
///
/// Rules:
/// - `-0.0` becomes `0.0`
/// - all NaNs become a single canonical NaN
pub fn canonical_f64(v: f64) -> f64 {
    if v == 0.0 {
        // Handles +0.0 and -0.0.
        0.0
    } else if v.is_nan() {
        f64::NAN
    } else {
        v
    }
}

/// Deterministic total ordering for floats.
pub fn stable_total_cmp_f64(a: f64, b: f64) -> Ordering {
    canonical_f64(a).total_cmp(&canonical_f64(b))
}

/// Bitwise equality after canonicalization.
///
/// Unlike `==`, NaN equals NaN, so an unchanged position never looks changed.
pub fn same_f64(a: f64, b: f64) -> bool {
    stable_total_cmp_f64(a, b) == Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::{canonical_f64, same_f64, stable_total_cmp_f64};
    use core::cmp::Ordering;

    #[test]
    fn canonicalizes_negative_zero() {
        assert_eq!(canonical_f64(-0.0), 0.0);
        assert!(same_f64(-0.0, 0.0));
    }

    #[test]
    fn stable_cmp_is_total_and_deterministic() {
        assert_eq!(stable_total_cmp_f64(1.0, 2.0), Ordering::Less);
        assert_eq!(stable_total_cmp_f64(f64::NAN, f64::NAN), Ordering::Equal);
        assert!(same_f64(f64::NAN, -f64::NAN));
        assert!(!same_f64(1.0, 1.0 + f64::EPSILON));
    }
}
