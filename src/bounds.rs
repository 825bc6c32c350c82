//! KL-divergence confidence bounds for Bernoulli precision.
//!
//! The bounds follow KL-LUCB (Kaufmann & Kalyanakrishnan, COLT 2013):
//!
//! ```text
//!   beta(n, t, delta) = ln(k1 * n * t^alpha / delta) + ln ln(k1 * n * t^alpha / delta)
//!   ub(p, N) = max { q >= p : KL(p || q) <= beta / N }
//!   lb(p, N) = min { q <= p : KL(p || q) <= beta / N }
//! ```
//!
//! with `k1 = 405.5` and `alpha = 1.1`. Both bounds are found by bisection, starting
//! from the Pinsker interval `p ± sqrt(level / 2)`, which always contains them.

/// Constant `k1` of the KL-LUCB exploration rate.
pub const KL_LUCB_K1: f64 = 405.5;
/// Exponent `alpha` on the round counter in the KL-LUCB exploration rate.
pub const KL_LUCB_ALPHA: f64 = 1.1;

const BISECTION_STEPS: usize = 32;
const P_FLOOR: f64 = 1e-7;
const P_CEIL: f64 = 1.0 - 1e-7;

/// Bernoulli KL divergence `KL(p || q)` in nats, with both arguments clamped away
/// from `{0, 1}` so the result stays finite.
pub fn bernoulli_kl(p: f64, q: f64) -> f64 {
    let p = p.clamp(P_FLOOR, P_CEIL);
    let q = q.clamp(P_FLOOR, P_CEIL);
    p * (p / q).ln() + (1.0 - p) * ((1.0 - p) / (1.0 - q)).ln()
}

/// KL-LUCB exploration rate for `n_candidates` arms at round `t`.
pub fn exploration_rate(n_candidates: usize, t: u64, delta: f64) -> f64 {
    let n = n_candidates.max(1) as f64;
    let t = t.max(1) as f64;
    let inner = (KL_LUCB_K1 * n * t.powf(KL_LUCB_ALPHA) / delta).ln();
    // inner > ln(405.5) for any delta < 1, so ln(inner) is defined.
    inner + inner.ln()
}

/// Upper KL confidence bound on a Bernoulli mean `p` at divergence budget `level`.
pub fn kl_upper_bound(p: f64, level: f64) -> f64 {
    let p = sanitize_mean(p);
    if !(level.is_finite() && level > 0.0) {
        return if level.is_finite() { p } else { 1.0 };
    }
    let mut lo = p;
    let mut hi = (p + (level / 2.0).sqrt()).min(1.0);
    for _ in 0..BISECTION_STEPS {
        let mid = (lo + hi) / 2.0;
        if bernoulli_kl(p, mid) > level {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    hi
}

/// Lower KL confidence bound on a Bernoulli mean `p` at divergence budget `level`.
pub fn kl_lower_bound(p: f64, level: f64) -> f64 {
    let p = sanitize_mean(p);
    if !(level.is_finite() && level > 0.0) {
        return if level.is_finite() { p } else { 0.0 };
    }
    let mut hi = p;
    let mut lo = (p - (level / 2.0).sqrt()).max(0.0);
    for _ in 0..BISECTION_STEPS {
        let mid = (lo + hi) / 2.0;
        if bernoulli_kl(p, mid) > level {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo
}

fn sanitize_mean(p: f64) -> f64 {
    if p.is_finite() {
        p.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Lower and upper confidence bound of one candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConfidenceBounds {
    pub lower: f64,
    pub upper: f64,
}

impl ConfidenceBounds {
    /// Bounds for `positives / samples` at exploration rate `beta`.
    ///
    /// An unsampled candidate gets the vacuous interval `[0, 1]`.
    pub fn from_counts(positives: u64, samples: u64, beta: f64) -> Self {
        if samples == 0 {
            return Self {
                lower: 0.0,
                upper: 1.0,
            };
        }
        let p = positives.min(samples) as f64 / samples as f64;
        let level = beta / samples as f64;
        Self {
            lower: kl_lower_bound(p, level),
            upper: kl_upper_bound(p, level),
        }
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn kl_is_zero_on_the_diagonal() {
        for p in [0.1, 0.5, 0.9] {
            assert!(bernoulli_kl(p, p).abs() < 1e-12);
        }
        assert!(bernoulli_kl(0.7, 0.5) > 0.0);
    }

    #[test]
    fn exploration_rate_shrinks_as_delta_grows() {
        let tight = exploration_rate(10, 5, 0.01);
        let loose = exploration_rate(10, 5, 0.2);
        assert!(tight > loose);
        assert!(exploration_rate(10, 50, 0.1) > exploration_rate(10, 5, 0.1));
    }

    #[test]
    fn bounds_hit_the_kl_level() {
        let (p, level) = (0.7, 0.01);
        let ub = kl_upper_bound(p, level);
        let lb = kl_lower_bound(p, level);
        assert!((bernoulli_kl(p, ub) - level).abs() < 1e-4, "ub={ub}");
        assert!((bernoulli_kl(p, lb) - level).abs() < 1e-4, "lb={lb}");
    }

    #[test]
    fn unsampled_candidate_has_vacuous_bounds() {
        let b = ConfidenceBounds::from_counts(0, 0, 10.0);
        assert_eq!((b.lower, b.upper), (0.0, 1.0));
    }

    #[test]
    fn more_samples_tighten_the_interval() {
        let beta = exploration_rate(5, 1, 0.1);
        let few = ConfidenceBounds::from_counts(70, 100, beta);
        let many = ConfidenceBounds::from_counts(7_000, 10_000, beta);
        assert!(many.width() < few.width());
    }

    proptest! {
        #[test]
        fn bounds_bracket_the_mean(p in 0.0f64..=1.0, level in 1e-6f64..5.0) {
            let lb = kl_lower_bound(p, level);
            let ub = kl_upper_bound(p, level);
            prop_assert!(0.0 <= lb && lb <= p + 1e-12);
            prop_assert!(p - 1e-12 <= ub && ub <= 1.0);
        }

        #[test]
        fn larger_level_widens_bounds(p in 0.01f64..0.99, a in 1e-4f64..1.0, b in 1e-4f64..1.0) {
            let (small, large) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(kl_upper_bound(p, large) >= kl_upper_bound(p, small) - 1e-6);
            prop_assert!(kl_lower_bound(p, large) <= kl_lower_bound(p, small) + 1e-6);
        }
    }
}
