//! Shared guardrails for matcher and refiner bounds.

pub const DEFAULT_TOP_K: usize = 5;
pub const MAX_TOP_K: usize = 64;
pub const DEFAULT_MAX_ROUNDS: usize = 10;
pub const MAX_ROUNDS: usize = 100;
pub const MAX_WORKERS: usize = 256;

pub fn clamp_int(value: usize, minimum: usize, maximum: usize) -> usize {
    value.max(minimum).min(maximum)
}

pub fn clamp_top_k(value: usize) -> usize {
    clamp_int(value, 1, MAX_TOP_K)
}

pub fn clamp_rounds(value: usize) -> usize {
    clamp_int(value, 0, MAX_ROUNDS)
}

/// `0` means "let rayon decide".
pub fn clamp_workers(value: usize) -> usize {
    value.min(MAX_WORKERS)
}

/// Finite and inside `[0, 1]`.
pub fn is_unit_interval(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

/// Clamp a score into `[0, 1]`, mapping NaN to `0`.
pub fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_top_k() {
        assert_eq!(clamp_top_k(0), 1);
        assert_eq!(clamp_top_k(5), 5);
        assert_eq!(clamp_top_k(10_000), MAX_TOP_K);
    }

    #[test]
    fn test_clamp_rounds_allows_zero() {
        assert_eq!(clamp_rounds(0), 0);
        assert_eq!(clamp_rounds(1_000), MAX_ROUNDS);
    }

    #[test]
    fn test_is_unit_interval() {
        assert!(is_unit_interval(0.0));
        assert!(is_unit_interval(1.0));
        assert!(!is_unit_interval(-0.01));
        assert!(!is_unit_interval(1.01));
        assert!(!is_unit_interval(f64::NAN));
    }

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(f64::NAN), 0.0);
        assert_eq!(clamp_score(1.5), 1.0);
        assert_eq!(clamp_score(-2.0), 0.0);
        assert_eq!(clamp_score(0.25), 0.25);
    }
}
