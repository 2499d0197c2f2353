//! End-to-end evaluation pipeline: classifier, oracle cross-check, drift
//! guard, and audit ledger wired in the order the contract requires.
//!
//! The pipeline captures classifier state *before* each evaluation and feeds
//! that pre-transition state to the oracle, so an illegal transition shows
//! up as dual-modality disagreement instead of being laundered through the
//! classifier's own post-transition state. Invariant flags on the persisted
//! entry are computed from observed state, never hardcoded to true.

use parking_lot::Mutex;
use thiserror::Error;

use crate::audit_ledger::{AuditEntry, AuditEntryInput, AuditLedger, AuditLedgerConfig, LedgerError};
use crate::contract_oracle;
use crate::continuity_proofs::{ContinuityProver, ProofResult, ProofSummary};
use crate::drift_guard::{DriftError, DriftGuard, DriftGuardConfig, DriftReport};
use crate::regime::{ContributingFactors, DOWNGRADE_HYSTERESIS, MIN_REGIME_DURATION_SECONDS};
use crate::regime_classifier::{RegimeClassifier, RegimeSnapshot};

/// Errors from one pipeline evaluation.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Drift(#[from] DriftError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Everything one evaluation produced, returned to the caller after the
/// entry has been persisted.
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub snapshot: RegimeSnapshot,
    pub oracle: contract_oracle::OracleOutcome,
    pub drift: DriftReport,
    pub entry: AuditEntry,
}

/// Owns the classifier, drift guard, continuity prover, and ledger, and
/// runs the full per-tick evaluation sequence.
#[derive(Debug)]
pub struct EvaluationPipeline {
    classifier: RegimeClassifier,
    guard: DriftGuard,
    prover: ContinuityProver,
    ledger: AuditLedger,
    epoch_start: Mutex<Option<f64>>,
}

impl EvaluationPipeline {
    pub fn new(
        guard_config: DriftGuardConfig,
        ledger_config: AuditLedgerConfig,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            classifier: RegimeClassifier::new(),
            guard: DriftGuard::new(guard_config)?,
            prover: ContinuityProver::default(),
            ledger: AuditLedger::new(ledger_config)?,
            epoch_start: Mutex::new(None),
        })
    }

    /// Default guard, ephemeral ledger. The common test and simulation
    /// configuration.
    pub fn in_memory() -> Self {
        Self {
            classifier: RegimeClassifier::new(),
            guard: DriftGuard::default(),
            prover: ContinuityProver::default(),
            ledger: AuditLedger::in_memory(),
            epoch_start: Mutex::new(None),
        }
    }

    pub fn classifier(&self) -> &RegimeClassifier {
        &self.classifier
    }

    pub fn ledger(&self) -> &AuditLedger {
        &self.ledger
    }

    pub fn guard(&self) -> &DriftGuard {
        &self.guard
    }

    /// Run one full evaluation: classify, cross-check with the oracle
    /// against pre-call state, drift-check, and persist.
    pub fn run_evaluation(
        &self,
        factors: ContributingFactors,
        timestamp: f64,
    ) -> Result<EvaluationOutcome, PipelineError> {
        // Clamp up front so the persisted factors are the ones scoring
        // actually used, and so non-finite inputs survive JSON encoding.
        let factors = factors.clamped();

        // Pre-transition state is what the oracle and the enforcement
        // flags are judged against.
        let pre = self.classifier.state(timestamp);
        let snapshot = self.classifier.evaluate(factors, timestamp);
        let oracle =
            contract_oracle::compute_and_classify(&factors, pre.current_regime, pre.time_in_regime_seconds);

        let (hysteresis_enforced, min_duration_enforced) =
            downgrade_enforcement(&snapshot, pre.time_in_regime_seconds);
        let ledger_continuity = self
            .ledger
            .latest(1)
            .first()
            .map_or(true, |last| last.regime == pre.current_regime);
        let amplitude_valid = snapshot.posture.within_amplitude_bounds();

        let elapsed_seconds = {
            let mut epoch = self.epoch_start.lock();
            let start = *epoch.get_or_insert(timestamp);
            timestamp - start
        };

        let config = self.ledger.config();
        let mut input = AuditEntryInput {
            timestamp,
            elapsed_seconds,
            regime: snapshot.regime,
            score: snapshot.score,
            contributing_factors: factors,
            posture_adjustments: snapshot.posture,
            oracle_regime: oracle.regime,
            oracle_score: oracle.score,
            dual_modality_agreement: snapshot.regime == oracle.regime,
            transition_from: snapshot.transition_from,
            time_in_previous_regime_seconds: pre.time_in_regime_seconds,
            hysteresis_enforced,
            min_duration_enforced,
            ledger_continuity,
            amplitude_valid,
            drift_detected: false,
            drift_reasons: Vec::new(),
            node_id: config.node_id.clone(),
            version: config.version.clone(),
        };

        let drift = self.guard.check_and_update(&mut input)?;
        let entry = self.ledger.append(input)?;

        Ok(EvaluationOutcome {
            snapshot,
            oracle,
            drift,
            entry,
        })
    }

    /// Run the four continuity proofs over every persisted entry.
    pub fn prove_all(&self) -> Vec<ProofResult> {
        self.prover.prove_all(&self.ledger.entries())
    }

    /// Aggregate proof summary over every persisted entry.
    pub fn proof_summary(&self) -> ProofSummary {
        self.prover.summary(&self.ledger.entries())
    }
}

/// Whether a downgrade committed by this evaluation respected the
/// hysteresis and minimum-dwell gates. Evaluations that did not downgrade
/// trivially satisfy both.
fn downgrade_enforcement(snapshot: &RegimeSnapshot, previous_dwell_seconds: f64) -> (bool, bool) {
    let downgraded = snapshot
        .transition_from
        .is_some_and(|from| snapshot.regime.severity() < from.severity());
    if !downgraded {
        return (true, true);
    }
    let hysteresis_threshold = snapshot.regime.score_range().1 - DOWNGRADE_HYSTERESIS;
    (
        snapshot.score < hysteresis_threshold,
        previous_dwell_seconds >= MIN_REGIME_DURATION_SECONDS,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regime::Regime;

    fn factors_for_score(target: f64) -> ContributingFactors {
        ContributingFactors::new(target, target, target, target, 1.0 - target)
    }

    #[test]
    fn single_evaluation_persists_an_agreeing_entry() {
        let pipeline = EvaluationPipeline::in_memory();
        let outcome = pipeline
            .run_evaluation(factors_for_score(0.1), 1_000.0)
            .expect("evaluation");
        assert_eq!(outcome.snapshot.regime, Regime::Normal);
        assert_eq!(outcome.oracle.regime, Regime::Normal);
        assert!(outcome.entry.dual_modality_agreement);
        assert!(!outcome.drift.drift_detected);
        assert_eq!(pipeline.ledger().len(), 1);
    }

    #[test]
    fn oracle_is_judged_against_pre_call_state() {
        let pipeline = EvaluationPipeline::in_memory();
        pipeline
            .run_evaluation(factors_for_score(0.1), 0.0)
            .expect("first");
        // Upgrade tick: classifier transitions to Heightened; the oracle,
        // fed pre-call Normal state, must agree independently.
        let outcome = pipeline
            .run_evaluation(factors_for_score(0.4), 60.0)
            .expect("second");
        assert_eq!(outcome.snapshot.regime, Regime::Heightened);
        assert_eq!(outcome.snapshot.transition_from, Some(Regime::Normal));
        assert_eq!(outcome.oracle.regime, Regime::Heightened);
        assert!(outcome.entry.dual_modality_agreement);
        assert!((outcome.entry.time_in_previous_regime_seconds - 60.0).abs() < 1e-9);
    }

    #[test]
    fn enforcement_flags_are_true_for_legal_downgrades() {
        let pipeline = EvaluationPipeline::in_memory();
        pipeline
            .run_evaluation(factors_for_score(0.4), 0.0)
            .expect("enter heightened");
        // Held: dwell too short.
        let held = pipeline
            .run_evaluation(factors_for_score(0.1), 100.0)
            .expect("held");
        assert_eq!(held.snapshot.regime, Regime::Heightened);
        assert!(held.entry.hysteresis_enforced);
        assert!(held.entry.min_duration_enforced);

        // Legal downgrade after the dwell gate opens.
        let downgraded = pipeline
            .run_evaluation(factors_for_score(0.1), 400.0)
            .expect("downgrade");
        assert_eq!(downgraded.snapshot.regime, Regime::Normal);
        assert!(downgraded.entry.hysteresis_enforced);
        assert!(downgraded.entry.min_duration_enforced);
        assert!(downgraded.entry.dual_modality_agreement);
    }

    #[test]
    fn elapsed_seconds_counts_from_first_evaluation() {
        let pipeline = EvaluationPipeline::in_memory();
        let first = pipeline
            .run_evaluation(factors_for_score(0.1), 500.0)
            .expect("first");
        assert_eq!(first.entry.elapsed_seconds, 0.0);
        let second = pipeline
            .run_evaluation(factors_for_score(0.1), 530.0)
            .expect("second");
        assert_eq!(second.entry.elapsed_seconds, 30.0);
    }

    #[test]
    fn ledger_chain_verifies_after_a_run() {
        let pipeline = EvaluationPipeline::in_memory();
        for i in 0..10 {
            pipeline
                .run_evaluation(factors_for_score(0.1 + 0.01 * i as f64), i as f64 * 30.0)
                .expect("evaluation");
        }
        let verification = pipeline.ledger().verify_integrity();
        assert!(verification.valid, "{:?}", verification.violations);
    }

    #[test]
    fn proofs_pass_over_a_gradual_trajectory() {
        let pipeline = EvaluationPipeline::in_memory();
        // Ramp up one regime at a time so posture amplitudes move in
        // single steps.
        let script = [
            (0.0, 0.10),
            (60.0, 0.40),
            (120.0, 0.60),
            (600.0, 0.55),
            (1_200.0, 0.40),
        ];
        for (t, score) in script {
            pipeline
                .run_evaluation(factors_for_score(score), t)
                .expect("evaluation");
        }
        let summary = pipeline.proof_summary();
        assert_eq!(summary.failed_proofs, 0, "{:?}", pipeline.prove_all());
        assert_eq!(summary.entries_checked, script.len());
    }

    #[test]
    fn halt_on_drift_propagates_as_pipeline_error() {
        let pipeline = EvaluationPipeline::new(
            DriftGuardConfig {
                halt_on_drift: true,
                ..DriftGuardConfig::default()
            },
            AuditLedgerConfig {
                path: None,
                ..AuditLedgerConfig::default()
            },
        )
        .expect("pipeline");
        // Dual modality stays in agreement on honest inputs, so a halting
        // guard still lets clean evaluations through.
        let outcome = pipeline.run_evaluation(factors_for_score(0.2), 0.0);
        assert!(outcome.is_ok());
    }
}
