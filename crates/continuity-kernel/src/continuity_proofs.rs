//! Batch continuity proofs: four independent invariant-checking passes
//! over an ordered audit-entry sequence.
//!
//! Proofs are read-only diagnostics. Each returns a structured result with
//! every violation found, never raising; sequences of length 0 or 1 pass
//! trivially. The entry order the proofs assume is the append order the
//! ledger guarantees.

use serde::{Deserialize, Serialize};

use crate::audit_ledger::AuditEntry;

pub const PROOF_LEDGER_CONTINUITY: &str = "ledger_continuity";
pub const PROOF_TEMPORAL_CONTINUITY: &str = "temporal_continuity";
pub const PROOF_AMPLITUDE_CONTINUITY: &str = "amplitude_continuity";
pub const PROOF_REGIME_CONTINUITY: &str = "regime_continuity";

/// Default maximum per-step change allowed for each posture amplitude.
pub const DEFAULT_MAX_AMPLITUDE_DELTA: f64 = 0.5;

/// Result of one proof pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofResult {
    pub proof_name: String,
    pub passed: bool,
    pub violations: Vec<String>,
    pub entries_checked: usize,
}

impl ProofResult {
    fn new(proof_name: &str, violations: Vec<String>, entries_checked: usize) -> Self {
        Self {
            proof_name: proof_name.to_string(),
            passed: violations.is_empty(),
            violations,
            entries_checked,
        }
    }
}

/// Aggregate counts over a full proof run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofSummary {
    pub total_proofs: usize,
    pub passed_proofs: usize,
    pub failed_proofs: usize,
    pub total_violations: usize,
    pub entries_checked: usize,
}

/// Prover configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProverConfig {
    pub max_amplitude_delta: f64,
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            max_amplitude_delta: DEFAULT_MAX_AMPLITUDE_DELTA,
        }
    }
}

/// Runs the four continuity proofs over ordered entry sequences.
#[derive(Debug, Clone, Default)]
pub struct ContinuityProver {
    config: ProverConfig,
}

impl ContinuityProver {
    pub fn new(config: ProverConfig) -> Self {
        Self { config }
    }

    /// Every non-null `transition_from` must equal the immediately
    /// preceding entry's regime.
    pub fn prove_ledger_continuity(&self, entries: &[AuditEntry]) -> ProofResult {
        let mut violations = Vec::new();
        for idx in 1..entries.len() {
            if let Some(from) = entries[idx].transition_from {
                let previous = entries[idx - 1].regime;
                if from != previous {
                    violations.push(format!(
                        "entry {idx}: transition_from={from} but previous regime={previous}"
                    ));
                }
            }
        }
        ProofResult::new(PROOF_LEDGER_CONTINUITY, violations, entries.len())
    }

    /// Both `elapsed_seconds` and `timestamp` must be strictly increasing;
    /// the two checks are independent and both reported.
    pub fn prove_temporal_continuity(&self, entries: &[AuditEntry]) -> ProofResult {
        let mut violations = Vec::new();
        for idx in 1..entries.len() {
            let previous = &entries[idx - 1];
            let current = &entries[idx];
            if current.elapsed_seconds <= previous.elapsed_seconds {
                violations.push(format!(
                    "entry {idx}: elapsed_seconds {} not greater than predecessor's {}",
                    current.elapsed_seconds, previous.elapsed_seconds
                ));
            }
            if current.timestamp <= previous.timestamp {
                violations.push(format!(
                    "entry {idx}: timestamp {} not greater than predecessor's {}",
                    current.timestamp, previous.timestamp
                ));
            }
        }
        ProofResult::new(PROOF_TEMPORAL_CONTINUITY, violations, entries.len())
    }

    /// Consecutive postures may change `threshold_multiplier` and
    /// `traffic_limit` by at most the configured delta; each field is
    /// checked independently.
    pub fn prove_amplitude_continuity(&self, entries: &[AuditEntry]) -> ProofResult {
        let max_delta = self.config.max_amplitude_delta;
        let mut violations = Vec::new();
        for idx in 1..entries.len() {
            let previous = &entries[idx - 1].posture_adjustments;
            let current = &entries[idx].posture_adjustments;
            let multiplier_delta = (current.threshold_multiplier - previous.threshold_multiplier).abs();
            if multiplier_delta > max_delta {
                violations.push(format!(
                    "entry {idx}: threshold_multiplier jump {multiplier_delta} exceeds max delta {max_delta}"
                ));
            }
            let traffic_delta = (current.traffic_limit - previous.traffic_limit).abs();
            if traffic_delta > max_delta {
                violations.push(format!(
                    "entry {idx}: traffic_limit jump {traffic_delta} exceeds max delta {max_delta}"
                ));
            }
        }
        ProofResult::new(PROOF_AMPLITUDE_CONTINUITY, violations, entries.len())
    }

    /// Every entry must carry `hysteresis_enforced` and
    /// `min_duration_enforced` as true.
    pub fn prove_regime_continuity(&self, entries: &[AuditEntry]) -> ProofResult {
        let mut violations = Vec::new();
        for (idx, entry) in entries.iter().enumerate() {
            if !entry.hysteresis_enforced {
                violations.push(format!("entry {idx}: hysteresis_enforced=false"));
            }
            if !entry.min_duration_enforced {
                violations.push(format!("entry {idx}: min_duration_enforced=false"));
            }
        }
        ProofResult::new(PROOF_REGIME_CONTINUITY, violations, entries.len())
    }

    /// Run all four proofs in a fixed order.
    pub fn prove_all(&self, entries: &[AuditEntry]) -> Vec<ProofResult> {
        vec![
            self.prove_ledger_continuity(entries),
            self.prove_temporal_continuity(entries),
            self.prove_amplitude_continuity(entries),
            self.prove_regime_continuity(entries),
        ]
    }

    /// True only if every proof passes.
    pub fn prove_all_pass(&self, entries: &[AuditEntry]) -> bool {
        self.prove_all(entries).iter().all(|result| result.passed)
    }

    /// Aggregate pass/fail/violation counts over all four proofs.
    pub fn summary(&self, entries: &[AuditEntry]) -> ProofSummary {
        let results = self.prove_all(entries);
        let passed = results.iter().filter(|result| result.passed).count();
        let total_violations = results.iter().map(|result| result.violations.len()).sum();
        ProofSummary {
            total_proofs: results.len(),
            passed_proofs: passed,
            failed_proofs: results.len() - passed,
            total_violations,
            entries_checked: entries.len(),
        }
    }
}
