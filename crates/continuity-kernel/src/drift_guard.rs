//! Drift guard: per-evaluation comparison of the classifier's output
//! against the contract oracle's, plus invariant-flag and posture-bound
//! checks.
//!
//! All four checks run on every call, with no short-circuiting, and their
//! reasons accumulate, so one entry can surface several divergences at
//! once. Detection is observational by default; escalation to a typed
//! error is an explicit configuration choice visible at the call site.

use thiserror::Error;

use crate::audit_ledger::AuditEntryInput;

pub const DRIFT_GUARD_COMPONENT: &str = "drift_guard";

/// Default tolerance for classifier-vs-oracle score comparison.
pub const DEFAULT_SCORE_DRIFT_THRESHOLD: f64 = 1e-6;

/// Drift guard configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftGuardConfig {
    /// Kill switch: when false, `check` always reports no drift.
    pub enabled: bool,
    /// When true, `check_and_update` raises [`DriftError::Halted`] on
    /// detection instead of returning normally.
    pub halt_on_drift: bool,
    /// Maximum tolerated |classifier score − oracle score|.
    pub score_drift_threshold: f64,
}

impl Default for DriftGuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            halt_on_drift: false,
            score_drift_threshold: DEFAULT_SCORE_DRIFT_THRESHOLD,
        }
    }
}

impl DriftGuardConfig {
    /// Reject non-finite or negative thresholds.
    pub fn validate(self) -> Result<Self, DriftError> {
        if !self.score_drift_threshold.is_finite() || self.score_drift_threshold < 0.0 {
            return Err(DriftError::InvalidConfig {
                field: "score_drift_threshold".to_string(),
                reason: "must be finite and >= 0".to_string(),
            });
        }
        Ok(self)
    }
}

/// Outcome of one drift check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftReport {
    pub drift_detected: bool,
    pub reasons: Vec<String>,
}

impl DriftReport {
    fn clean() -> Self {
        Self {
            drift_detected: false,
            reasons: Vec::new(),
        }
    }
}

/// Errors from drift guard operations.
#[derive(Debug, Error)]
pub enum DriftError {
    #[error("invalid drift guard config field '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },
    /// Drift was detected while `halt_on_drift` is set. Carries the full
    /// offending entry and every accumulated reason so the caller can log
    /// or alert without re-deriving state.
    #[error("drift detected with {} reason(s) at timestamp {}", reasons.len(), entry.timestamp)]
    Halted {
        entry: Box<AuditEntryInput>,
        reasons: Vec<String>,
    },
}

/// Stateless checker; all state lives in the configuration.
#[derive(Debug, Clone)]
pub struct DriftGuard {
    config: DriftGuardConfig,
}

impl Default for DriftGuard {
    fn default() -> Self {
        Self {
            config: DriftGuardConfig::default(),
        }
    }
}

impl DriftGuard {
    pub fn new(config: DriftGuardConfig) -> Result<Self, DriftError> {
        Ok(Self {
            config: config.validate()?,
        })
    }

    pub fn config(&self) -> DriftGuardConfig {
        self.config
    }

    /// Run all four checks and accumulate reasons.
    ///
    /// 1. Dual-modality disagreement (classifier regime ≠ oracle regime).
    /// 2. Score drift beyond the configured threshold.
    /// 3. Any false invariant flag, one reason per flag.
    /// 4. Posture amplitude outside declared bounds.
    pub fn check(&self, entry: &AuditEntryInput) -> DriftReport {
        if !self.config.enabled {
            return DriftReport::clean();
        }

        let mut reasons = Vec::new();

        if entry.regime != entry.oracle_regime {
            reasons.push(format!(
                "dual-modality disagreement: classifier={} oracle={}",
                entry.regime, entry.oracle_regime
            ));
        }

        let score_delta = (entry.score - entry.oracle_score).abs();
        if !(score_delta <= self.config.score_drift_threshold) {
            reasons.push(format!(
                "score drift {score_delta:e} exceeds threshold {:e}",
                self.config.score_drift_threshold
            ));
        }

        if !entry.hysteresis_enforced {
            reasons.push("invariant violated: hysteresis_enforced=false".to_string());
        }
        if !entry.min_duration_enforced {
            reasons.push("invariant violated: min_duration_enforced=false".to_string());
        }
        if !entry.ledger_continuity {
            reasons.push("invariant violated: ledger_continuity=false".to_string());
        }
        if !entry.amplitude_valid {
            reasons.push("invariant violated: amplitude_valid=false".to_string());
        }

        let posture = &entry.posture_adjustments;
        if !(0.5..=2.0).contains(&posture.threshold_multiplier) {
            reasons.push(format!(
                "posture threshold_multiplier {} outside [0.5, 2.0]",
                posture.threshold_multiplier
            ));
        }
        if !(0.0..=1.0).contains(&posture.traffic_limit) {
            reasons.push(format!(
                "posture traffic_limit {} outside [0.0, 1.0]",
                posture.traffic_limit
            ));
        }

        DriftReport {
            drift_detected: !reasons.is_empty(),
            reasons,
        }
    }

    /// Run [`Self::check`] and write the outcome back onto the entry before
    /// it is persisted; escalate only when `halt_on_drift` is configured.
    pub fn check_and_update(
        &self,
        entry: &mut AuditEntryInput,
    ) -> Result<DriftReport, DriftError> {
        let report = self.check(entry);
        entry.dual_modality_agreement = entry.regime == entry.oracle_regime;
        entry.drift_detected = report.drift_detected;
        entry.drift_reasons = report.reasons.clone();

        if self.config.halt_on_drift && report.drift_detected {
            return Err(DriftError::Halted {
                entry: Box::new(entry.clone()),
                reasons: report.reasons,
            });
        }
        Ok(report)
    }
}
