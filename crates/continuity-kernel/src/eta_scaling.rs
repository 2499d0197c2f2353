//! Learning-rate scaling driven by regime state.
//!
//! The reference pattern for external consumers of regime state: pure
//! functions, a fixed rule table, and fail-open defaults. Regimes arrive as
//! strings because consumers typically read them back out of persisted audit
//! entries; an unrecognized name scales by 1.0 rather than guessing.

use crate::regime::Regime;

/// Scaling rules, first match wins. Rules for the same regime are ordered
/// by descending duration threshold so the longest-dwell rule is tried
/// first.
const ETA_RULES: [(&str, f64, f64); 6] = [
    ("normal", f64::NEG_INFINITY, 1.0),
    ("heightened", 300.0, 0.90),
    ("heightened", f64::NEG_INFINITY, 0.95),
    ("controlled_degradation", f64::NEG_INFINITY, 0.75),
    ("emergency_stabilization", f64::NEG_INFINITY, 0.50),
    ("recovery", f64::NEG_INFINITY, 0.25),
];

/// Scale applied when no rule matches. Fail open: an unknown regime must
/// not silently choke the consumer's learning rate.
const DEFAULT_SCALE: f64 = 1.0;

/// Look up the learning-rate multiplier for a regime name and dwell time.
pub fn compute_scale(regime: &str, duration_seconds: f64) -> f64 {
    for (name, min_duration, scale) in ETA_RULES {
        if regime == name && duration_seconds >= min_duration {
            return scale;
        }
    }
    DEFAULT_SCALE
}

/// Typed convenience over [`compute_scale`] for callers holding a
/// [`Regime`] rather than a persisted name.
pub fn compute_scale_for(regime: Regime, duration_seconds: f64) -> f64 {
    compute_scale(regime.as_str(), duration_seconds)
}

/// Scale a base learning rate by the regime multiplier, clamped to
/// `[0, 1]`. An explicit freeze overrides everything and returns 0.0.
pub fn apply_scaling(eta_base: f64, regime: &str, duration_seconds: f64, freeze: bool) -> f64 {
    if freeze {
        return 0.0;
    }
    let scaled = eta_base * compute_scale(regime, duration_seconds);
    if !scaled.is_finite() {
        return 0.0;
    }
    scaled.clamp(0.0, 1.0)
}
