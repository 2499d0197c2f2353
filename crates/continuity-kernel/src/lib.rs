//! Continuity verification kernel: regime classification with hysteresis,
//! an independent contract oracle, a hash-chained audit ledger, drift
//! detection, and batch continuity proofs.
//!
//! The kernel is synchronous and single-process. The classifier is the
//! sole authority over regime state; the oracle re-derives every decision
//! from the same inputs so the drift guard can compare the two; the ledger
//! persists each evaluation as a tamper-evident hash chain; the proofs
//! audit whole entry sequences after the fact. [`evaluation_pipeline`]
//! wires the pieces in the contractually required order.

#![forbid(unsafe_code)]

pub mod audit_ledger;
pub mod contract_oracle;
pub mod continuity_proofs;
pub mod drift_guard;
pub mod eta_scaling;
pub mod evaluation_pipeline;
pub mod regime;
pub mod regime_classifier;

pub use audit_ledger::{AuditEntry, AuditEntryInput, AuditLedger, AuditLedgerConfig, LedgerError};
pub use contract_oracle::OracleOutcome;
pub use continuity_proofs::{ContinuityProver, ProofResult, ProofSummary, ProverConfig};
pub use drift_guard::{DriftError, DriftGuard, DriftGuardConfig, DriftReport};
pub use evaluation_pipeline::{EvaluationOutcome, EvaluationPipeline, PipelineError};
pub use regime::{ContributingFactors, Posture, Regime};
pub use regime_classifier::{ClassifierStateView, RegimeClassifier, RegimeSnapshot};
