//! Stateful regime classifier: weighted scoring plus the asymmetric
//! upgrade/downgrade state machine.
//!
//! Upgrades apply immediately; downgrades are gated by both hysteresis
//! (the score must sit meaningfully below the target's upper bound) and a
//! minimum dwell time in the current regime. The classifier is the single
//! authority over regime state; external readers go through [`RegimeClassifier::state`]
//! and receive deep copies, never references into the locked interior.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::regime::{
    ContributingFactors, Posture, Regime, clamp_signal, DOWNGRADE_HYSTERESIS,
    MIN_REGIME_DURATION_SECONDS, WEIGHT_CONSISTENCY_GAP, WEIGHT_CSI_INVERTED, WEIGHT_MSE,
    WEIGHT_PREDICTIVE, WEIGHT_URF,
};

/// Weighted composite risk score over the five contributing signals.
///
/// Every input is clamped to `[0, 1]` individually before weighting, so a
/// noisy upstream feeding garbage (including NaN) still yields a score in
/// `[0, 1]`. Total function; never fails.
pub fn compute_score(factors: &ContributingFactors) -> f64 {
    let weighted = WEIGHT_URF * clamp_signal(factors.urf_composite_risk)
        + WEIGHT_MSE * clamp_signal(factors.mse_meta_instability)
        + WEIGHT_PREDICTIVE * clamp_signal(factors.predictive_collapse_risk)
        + WEIGHT_CONSISTENCY_GAP * clamp_signal(factors.consistency_gap)
        + WEIGHT_CSI_INVERTED * (1.0 - clamp_signal(factors.csi_continuity_index));
    weighted.clamp(0.0, 1.0)
}

/// Decide the next regime from a score and the current (pre-transition)
/// regime state.
///
/// - A more severe target applies immediately, regardless of dwell time.
/// - A less severe target applies only if the score is below the target's
///   upper bound minus [`DOWNGRADE_HYSTERESIS`] **and** the dwell time has
///   reached [`MIN_REGIME_DURATION_SECONDS`]. Neither condition alone is
///   sufficient.
/// - Otherwise the current regime holds.
pub fn classify(score: f64, current: Regime, time_in_regime_seconds: f64) -> Regime {
    let target = Regime::for_score(score);
    if target.severity() > current.severity() {
        return target;
    }
    if target.severity() < current.severity() {
        let hysteresis_threshold = target.score_range().1 - DOWNGRADE_HYSTERESIS;
        if score < hysteresis_threshold && time_in_regime_seconds >= MIN_REGIME_DURATION_SECONDS {
            return target;
        }
        return current;
    }
    current
}

// ---------------------------------------------------------------------------
// RegimeSnapshot: immutable result of one evaluation
// ---------------------------------------------------------------------------

/// Immutable record of one evaluation's outcome.
///
/// When the evaluation transitioned, `transition_from` names the prior
/// regime and `time_in_regime_seconds` reports `0.0` for the new regime,
/// even though the classification decision itself was made against the
/// pre-transition dwell time. That two-phase behavior is what makes the
/// hysteresis and minimum-dwell rules enforceable; do not collapse it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub regime: Regime,
    pub score: f64,
    pub factors: ContributingFactors,
    pub posture: Posture,
    pub timestamp: f64,
    pub transition_from: Option<Regime>,
    pub time_in_regime_seconds: f64,
}

/// Deep-copied view of classifier state, taken under the classifier's lock.
///
/// This is the only sanctioned way external code (the oracle caller, a
/// simulator) inspects pre-transition state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierStateView {
    pub current_regime: Regime,
    pub regime_start_time: Option<f64>,
    pub time_in_regime_seconds: f64,
    pub last_snapshot: Option<RegimeSnapshot>,
}

#[derive(Debug)]
struct ClassifierInner {
    current_regime: Regime,
    regime_start_time: Option<f64>,
    last_snapshot: Option<RegimeSnapshot>,
}

// ---------------------------------------------------------------------------
// RegimeClassifier
// ---------------------------------------------------------------------------

/// The single stateful authority over the system's health regime.
///
/// All mutable state lives behind one mutex; `evaluate` is the only
/// mutating entry point and performs no I/O.
#[derive(Debug)]
pub struct RegimeClassifier {
    inner: Mutex<ClassifierInner>,
}

impl Default for RegimeClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl RegimeClassifier {
    /// Start in Normal with no dwell origin; the origin is initialized
    /// lazily by the first `evaluate` call.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ClassifierInner {
                current_regime: Regime::Normal,
                regime_start_time: None,
                last_snapshot: None,
            }),
        }
    }

    /// Score the signals, classify against the pre-transition dwell time,
    /// commit any transition, and return an immutable snapshot.
    pub fn evaluate(&self, factors: ContributingFactors, timestamp: f64) -> RegimeSnapshot {
        let mut inner = self.inner.lock();

        let score = compute_score(&factors);
        let start = *inner.regime_start_time.get_or_insert(timestamp);
        let dwell = (timestamp - start).max(0.0);

        let next = classify(score, inner.current_regime, dwell);
        let (transition_from, reported_dwell) = if next != inner.current_regime {
            let from = inner.current_regime;
            inner.current_regime = next;
            inner.regime_start_time = Some(timestamp);
            (Some(from), 0.0)
        } else {
            (None, dwell)
        };

        let snapshot = RegimeSnapshot {
            regime: next,
            score,
            factors,
            posture: next.posture(),
            timestamp,
            transition_from,
            time_in_regime_seconds: reported_dwell,
        };
        inner.last_snapshot = Some(snapshot.clone());
        snapshot
    }

    /// Read-only deep copy of current state, with the dwell time computed
    /// against `now`. Never mutates and never exposes interior references.
    pub fn state(&self, now: f64) -> ClassifierStateView {
        let inner = self.inner.lock();
        let time_in_regime_seconds = inner
            .regime_start_time
            .map_or(0.0, |start| (now - start).max(0.0));
        ClassifierStateView {
            current_regime: inner.current_regime,
            regime_start_time: inner.regime_start_time,
            time_in_regime_seconds,
            last_snapshot: inner.last_snapshot.clone(),
        }
    }

    /// The last evaluation's snapshot, if any.
    pub fn last_snapshot(&self) -> Option<RegimeSnapshot> {
        self.inner.lock().last_snapshot.clone()
    }

    /// Posture of the last evaluated snapshot, or Normal's static posture
    /// before the first evaluation. Never triggers an evaluation.
    pub fn posture_adjustments(&self) -> Posture {
        self.inner
            .lock()
            .last_snapshot
            .as_ref()
            .map_or(Regime::Normal.posture(), |snapshot| snapshot.posture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factors_for_score(target: f64) -> ContributingFactors {
        // With every risk signal equal and csi = 1 - x, the score equals x.
        ContributingFactors::new(target, target, target, target, 1.0 - target)
    }

    // -- compute_score --

    #[test]
    fn score_matches_declared_weights() {
        let f = ContributingFactors::new(1.0, 0.0, 0.0, 0.0, 1.0);
        assert!((compute_score(&f) - 0.30).abs() < 1e-12);
        let f = ContributingFactors::new(0.0, 1.0, 0.0, 0.0, 1.0);
        assert!((compute_score(&f) - 0.25).abs() < 1e-12);
        let f = ContributingFactors::new(0.0, 0.0, 1.0, 0.0, 1.0);
        assert!((compute_score(&f) - 0.20).abs() < 1e-12);
        let f = ContributingFactors::new(0.0, 0.0, 0.0, 1.0, 1.0);
        assert!((compute_score(&f) - 0.15).abs() < 1e-12);
        let f = ContributingFactors::new(0.0, 0.0, 0.0, 0.0, 0.0);
        assert!((compute_score(&f) - 0.10).abs() < 1e-12);
    }

    #[test]
    fn score_is_bounded_for_garbage_input() {
        let f = ContributingFactors {
            urf_composite_risk: f64::NAN,
            mse_meta_instability: 99.0,
            predictive_collapse_risk: -3.0,
            consistency_gap: f64::INFINITY,
            csi_continuity_index: f64::NEG_INFINITY,
        };
        let score = compute_score(&f);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn score_monotonic_in_risk_signals_and_antitonic_in_csi() {
        let base = ContributingFactors::new(0.4, 0.4, 0.4, 0.4, 0.6);
        let base_score = compute_score(&base);

        let mut bumped = base;
        bumped.urf_composite_risk = 0.6;
        assert!(compute_score(&bumped) > base_score);

        let mut bumped = base;
        bumped.mse_meta_instability = 0.6;
        assert!(compute_score(&bumped) > base_score);

        let mut bumped = base;
        bumped.predictive_collapse_risk = 0.6;
        assert!(compute_score(&bumped) > base_score);

        let mut bumped = base;
        bumped.consistency_gap = 0.6;
        assert!(compute_score(&bumped) > base_score);

        // csi is inverted: raising it lowers the score.
        let mut bumped = base;
        bumped.csi_continuity_index = 0.9;
        assert!(compute_score(&bumped) < base_score);
    }

    // -- classify --

    #[test]
    fn upgrades_are_never_delayed() {
        assert_eq!(classify(0.95, Regime::Normal, 0.0), Regime::Recovery);
        assert_eq!(classify(0.55, Regime::Normal, 0.0), Regime::ControlledDegradation);
        assert_eq!(
            classify(0.75, Regime::Heightened, 1.0),
            Regime::EmergencyStabilization
        );
    }

    #[test]
    fn downgrade_blocked_by_hysteresis_alone() {
        // 0.28 is inside Normal's range but not below 0.30 - 0.05.
        assert_eq!(classify(0.28, Regime::Heightened, 600.0), Regime::Heightened);
    }

    #[test]
    fn downgrade_blocked_by_min_duration_alone() {
        assert_eq!(classify(0.20, Regime::Heightened, 100.0), Regime::Heightened);
    }

    #[test]
    fn downgrade_applies_when_both_conditions_hold() {
        assert_eq!(classify(0.20, Regime::Heightened, 600.0), Regime::Normal);
        assert_eq!(
            classify(0.20, Regime::Heightened, MIN_REGIME_DURATION_SECONDS),
            Regime::Normal
        );
    }

    #[test]
    fn lower_bound_score_is_an_upgrade() {
        assert_eq!(classify(0.30, Regime::Normal, 0.0), Regime::Heightened);
    }

    #[test]
    fn same_target_holds_regime() {
        assert_eq!(classify(0.40, Regime::Heightened, 50.0), Regime::Heightened);
    }

    #[test]
    fn multi_level_downgrade_goes_straight_to_target() {
        // From EmergencyStabilization with a Normal-band score and both
        // gates satisfied, the downgrade lands directly on Normal.
        assert_eq!(
            classify(0.10, Regime::EmergencyStabilization, 900.0),
            Regime::Normal
        );
    }

    // -- evaluate: two-phase transition behavior --

    #[test]
    fn first_evaluate_initializes_dwell_origin_lazily() {
        let classifier = RegimeClassifier::new();
        let snapshot = classifier.evaluate(factors_for_score(0.1), 1_000.0);
        assert_eq!(snapshot.regime, Regime::Normal);
        assert_eq!(snapshot.time_in_regime_seconds, 0.0);
        assert_eq!(snapshot.transition_from, None);

        let view = classifier.state(1_050.0);
        assert_eq!(view.regime_start_time, Some(1_000.0));
        assert_eq!(view.time_in_regime_seconds, 50.0);
    }

    #[test]
    fn transition_records_origin_and_resets_reported_dwell() {
        let classifier = RegimeClassifier::new();
        classifier.evaluate(factors_for_score(0.1), 0.0);
        let snapshot = classifier.evaluate(factors_for_score(0.4), 120.0);
        assert_eq!(snapshot.regime, Regime::Heightened);
        assert_eq!(snapshot.transition_from, Some(Regime::Normal));
        assert_eq!(snapshot.time_in_regime_seconds, 0.0);

        // Dwell origin moved to the transition timestamp.
        let view = classifier.state(180.0);
        assert_eq!(view.regime_start_time, Some(120.0));
        assert_eq!(view.time_in_regime_seconds, 60.0);
    }

    #[test]
    fn downgrade_decision_uses_pre_transition_dwell() {
        let classifier = RegimeClassifier::new();
        classifier.evaluate(factors_for_score(0.4), 0.0);
        assert_eq!(classifier.state(0.0).current_regime, Regime::Heightened);

        // 100 s in Heightened: a clean low score must still be held.
        let held = classifier.evaluate(factors_for_score(0.1), 100.0);
        assert_eq!(held.regime, Regime::Heightened);
        assert_eq!(held.transition_from, None);

        // 400 s in: both gates pass, the downgrade commits, and the
        // reported dwell resets even though 400 s was used for the decision.
        let downgraded = classifier.evaluate(factors_for_score(0.1), 400.0);
        assert_eq!(downgraded.regime, Regime::Normal);
        assert_eq!(downgraded.transition_from, Some(Regime::Heightened));
        assert_eq!(downgraded.time_in_regime_seconds, 0.0);
    }

    #[test]
    fn steady_state_reports_accumulated_dwell() {
        let classifier = RegimeClassifier::new();
        classifier.evaluate(factors_for_score(0.1), 0.0);
        let snapshot = classifier.evaluate(factors_for_score(0.12), 75.0);
        assert_eq!(snapshot.regime, Regime::Normal);
        assert_eq!(snapshot.time_in_regime_seconds, 75.0);
    }

    // -- read-only surface --

    #[test]
    fn posture_adjustments_defaults_to_normal_before_first_evaluation() {
        let classifier = RegimeClassifier::new();
        assert_eq!(classifier.posture_adjustments(), Regime::Normal.posture());
        assert!(classifier.last_snapshot().is_none());

        classifier.evaluate(factors_for_score(0.8), 0.0);
        assert_eq!(
            classifier.posture_adjustments(),
            Regime::EmergencyStabilization.posture()
        );
    }

    #[test]
    fn state_view_is_a_deep_copy() {
        let classifier = RegimeClassifier::new();
        classifier.evaluate(factors_for_score(0.4), 0.0);
        let view = classifier.state(10.0);

        // Mutating the classifier afterwards must not affect the view.
        classifier.evaluate(factors_for_score(0.95), 20.0);
        assert_eq!(view.current_regime, Regime::Heightened);
        assert_eq!(
            view.last_snapshot.expect("snapshot").regime,
            Regime::Heightened
        );
    }

    #[test]
    fn classifier_is_shareable_across_threads() {
        let classifier = std::sync::Arc::new(RegimeClassifier::new());
        let mut handles = Vec::new();
        for i in 0..4 {
            let classifier = std::sync::Arc::clone(&classifier);
            handles.push(std::thread::spawn(move || {
                for j in 0..50 {
                    let t = (i * 50 + j) as f64;
                    let _ = classifier.evaluate(factors_for_score(0.2), t);
                }
            }));
        }
        for handle in handles {
            handle.join().expect("worker");
        }
        // Every evaluation saw a consistent snapshot; final state is sane.
        let view = classifier.state(1_000.0);
        assert_eq!(view.current_regime, Regime::Normal);
    }
}
