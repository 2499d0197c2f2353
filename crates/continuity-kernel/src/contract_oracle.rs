//! Contract oracle: an independent re-implementation of the scoring and
//! classification rules, used only to cross-check the primary classifier.
//!
//! Everything here is pure and stateless; the caller passes the current
//! regime and dwell time explicitly. The arithmetic is deliberately written
//! from the rule text rather than shared with `regime_classifier`; any
//! divergence between the two is a bug in one of them or an ambiguity in
//! the rules, never expected behavior.
//!
//! Callers must evaluate the oracle against the classifier's
//! **pre-transition** state (the regime and dwell time in force before the
//! evaluation being checked). Evaluating against post-transition state
//! hides illegal downgrades from the drift guard.

use serde::{Deserialize, Serialize};

use crate::regime::{ContributingFactors, Regime};

/// Weighted score terms, kept as an explicit table so the oracle's
/// arithmetic shape differs from the classifier's inline expression.
const SCORE_TERMS: [(fn(&ContributingFactors) -> f64, f64); 5] = [
    (|f| f.urf_composite_risk, 0.30),
    (|f| f.mse_meta_instability, 0.25),
    (|f| f.predictive_collapse_risk, 0.20),
    (|f| f.consistency_gap, 0.15),
    (|f| 1.0 - bounded(f.csi_continuity_index), 0.10),
];

/// Classification bands in descending severity, each with its lower score
/// bound and the hysteresis threshold used when the band is a downgrade
/// target (`upper bound - 0.05`).
const BANDS: [(Regime, f64, f64); 5] = [
    (Regime::Recovery, 0.90, f64::INFINITY),
    (Regime::EmergencyStabilization, 0.70, 0.85),
    (Regime::ControlledDegradation, 0.50, 0.65),
    (Regime::Heightened, 0.30, 0.45),
    (Regime::Normal, 0.0, 0.25),
];

const ORACLE_MIN_DWELL_SECONDS: f64 = 300.0;

fn bounded(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    if value < 0.0 {
        0.0
    } else if value > 1.0 {
        1.0
    } else {
        value
    }
}

fn rank(regime: Regime) -> usize {
    // The oracle keeps its own severity ranking rather than borrowing the
    // classifier's, so an ordering bug in either shows up as drift.
    match regime {
        Regime::Normal => 0,
        Regime::Heightened => 1,
        Regime::ControlledDegradation => 2,
        Regime::EmergencyStabilization => 3,
        Regime::Recovery => 4,
    }
}

/// Oracle's opinion of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OracleOutcome {
    pub regime: Regime,
    pub score: f64,
}

/// Weighted composite score; each signal bounded to `[0, 1]` before
/// weighting, result bounded to `[0, 1]`.
pub fn compute_score(factors: &ContributingFactors) -> f64 {
    let mut total = 0.0;
    for (extract, weight) in SCORE_TERMS {
        total += weight * bounded(extract(factors));
    }
    bounded(total)
}

/// Classify a score given explicit pre-transition state.
pub fn classify(score: f64, current_regime: Regime, time_in_regime_seconds: f64) -> Regime {
    let mut target = Regime::Recovery;
    for (band, low, _) in BANDS {
        if score >= low {
            target = band;
            break;
        }
    }

    if rank(target) > rank(current_regime) {
        return target;
    }
    if rank(target) == rank(current_regime) {
        return current_regime;
    }

    let hysteresis_threshold = BANDS
        .iter()
        .find(|(band, _, _)| *band == target)
        .map(|(_, _, threshold)| *threshold)
        .unwrap_or(f64::NEG_INFINITY);
    let dwell_satisfied = time_in_regime_seconds >= ORACLE_MIN_DWELL_SECONDS;
    if score < hysteresis_threshold && dwell_satisfied {
        target
    } else {
        current_regime
    }
}

/// Convenience: score and classify in one call.
pub fn compute_and_classify(
    factors: &ContributingFactors,
    current_regime: Regime,
    time_in_regime_seconds: f64,
) -> OracleOutcome {
    let score = compute_score(factors);
    OracleOutcome {
        regime: classify(score, current_regime, time_in_regime_seconds),
        score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regime_classifier;

    #[test]
    fn oracle_score_matches_classifier_score_on_a_grid() {
        let steps = [0.0, 0.1, 0.25, 0.5, 0.75, 0.9, 1.0];
        for &a in &steps {
            for &b in &steps {
                let factors = ContributingFactors::new(a, b, 1.0 - a, b * 0.5, 1.0 - b);
                let ours = compute_score(&factors);
                let theirs = regime_classifier::compute_score(&factors);
                assert!(
                    (ours - theirs).abs() < 1e-12,
                    "score divergence at ({a}, {b}): {ours} vs {theirs}"
                );
            }
        }
    }

    #[test]
    fn oracle_classification_matches_classifier_across_state_space() {
        let scores = [0.0, 0.1, 0.249, 0.25, 0.28, 0.30, 0.449, 0.45, 0.5, 0.649, 0.65, 0.7,
            0.849, 0.85, 0.9, 0.95, 1.0, 1.2];
        let dwells = [0.0, 100.0, 299.9, 300.0, 600.0];
        for &score in &scores {
            for current in Regime::ALL {
                for &dwell in &dwells {
                    let ours = classify(score, current, dwell);
                    let theirs = regime_classifier::classify(score, current, dwell);
                    assert_eq!(
                        ours, theirs,
                        "classification divergence at score={score} current={current} dwell={dwell}"
                    );
                }
            }
        }
    }

    #[test]
    fn oracle_enforces_both_downgrade_gates() {
        assert_eq!(classify(0.28, Regime::Heightened, 600.0), Regime::Heightened);
        assert_eq!(classify(0.20, Regime::Heightened, 100.0), Regime::Heightened);
        assert_eq!(classify(0.20, Regime::Heightened, 600.0), Regime::Normal);
    }

    #[test]
    fn oracle_upgrades_immediately() {
        assert_eq!(classify(0.95, Regime::Normal, 0.0), Regime::Recovery);
        assert_eq!(classify(0.30, Regime::Normal, 0.0), Regime::Heightened);
    }

    #[test]
    fn oracle_score_handles_non_finite_signals() {
        let factors = ContributingFactors {
            urf_composite_risk: f64::NAN,
            mse_meta_instability: f64::INFINITY,
            predictive_collapse_risk: 0.5,
            consistency_gap: -4.0,
            csi_continuity_index: 0.5,
        };
        let score = compute_score(&factors);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn compute_and_classify_bundles_score_and_regime() {
        let factors = ContributingFactors::new(1.0, 1.0, 1.0, 1.0, 0.0);
        let outcome = compute_and_classify(&factors, Regime::Normal, 0.0);
        assert!((outcome.score - 1.0).abs() < 1e-12);
        assert_eq!(outcome.regime, Regime::Recovery);
    }
}
