//! Append-only, hash-chained audit ledger of classification decisions.
//!
//! Every evaluation produces one [`AuditEntry`]; each entry's
//! `prev_entry_hash` commits to the previous entry's canonical fields, so a
//! mutated historical record breaks the chain for its successor. Entries are
//! held in memory and mirrored line-by-line to a JSONL file; the two never
//! diverge. Verification is read-only and surfaces structured violation
//! lists rather than raising, leaving severity to the caller.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::regime::{ContributingFactors, Posture, Regime};

pub const AUDIT_LEDGER_COMPONENT: &str = "audit_ledger";

/// `prev_entry_hash` of the first entry: a hex-encoded all-zero digest.
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

// ---------------------------------------------------------------------------
// Entry types
// ---------------------------------------------------------------------------

/// Caller-assembled payload for one evaluation, before the ledger derives
/// `entry_id` and `prev_entry_hash`. The drift guard fills the drift fields
/// in place immediately before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntryInput {
    pub timestamp: f64,
    pub elapsed_seconds: f64,
    pub regime: Regime,
    pub score: f64,
    pub contributing_factors: ContributingFactors,
    pub posture_adjustments: Posture,
    pub oracle_regime: Regime,
    pub oracle_score: f64,
    pub dual_modality_agreement: bool,
    pub transition_from: Option<Regime>,
    pub time_in_previous_regime_seconds: f64,
    pub hysteresis_enforced: bool,
    pub min_duration_enforced: bool,
    pub ledger_continuity: bool,
    pub amplitude_valid: bool,
    pub drift_detected: bool,
    pub drift_reasons: Vec<String>,
    pub node_id: String,
    pub version: String,
}

/// One persisted evaluation record. Created only by [`AuditLedger::append`];
/// never mutated afterward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: String,
    pub prev_entry_hash: String,
    pub timestamp: f64,
    pub elapsed_seconds: f64,
    pub regime: Regime,
    pub score: f64,
    pub contributing_factors: ContributingFactors,
    pub posture_adjustments: Posture,
    pub oracle_regime: Regime,
    pub oracle_score: f64,
    pub dual_modality_agreement: bool,
    pub transition_from: Option<Regime>,
    pub time_in_previous_regime_seconds: f64,
    pub hysteresis_enforced: bool,
    pub min_duration_enforced: bool,
    pub ledger_continuity: bool,
    pub amplitude_valid: bool,
    pub drift_detected: bool,
    pub drift_reasons: Vec<String>,
    pub node_id: String,
    pub version: String,
}

// ---------------------------------------------------------------------------
// Canonical hashing
// ---------------------------------------------------------------------------

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Entry identity: hash over the caller-supplied (timestamp, regime,
/// factors) triple. Derived, not a counter, so replaying identical inputs
/// is detectable as a duplicate.
fn compute_entry_id(
    timestamp: f64,
    regime: Regime,
    factors: &ContributingFactors,
) -> Result<String, LedgerError> {
    #[derive(Serialize)]
    struct IdPreimage<'a> {
        timestamp: f64,
        regime: Regime,
        contributing_factors: &'a ContributingFactors,
    }

    let bytes = serde_json::to_vec(&IdPreimage {
        timestamp,
        regime,
        contributing_factors: factors,
    })
    .map_err(|err| LedgerError::serialization(err.to_string()))?;
    Ok(sha256_hex(&bytes))
}

/// Chain hash of an entry: canonical serialization of exactly
/// {timestamp, regime, score, contributing_factors, oracle_regime}.
/// Volatile and derived fields are deliberately excluded so the chain is
/// reproducible from the durable decision content alone.
fn chain_hash(entry: &AuditEntry) -> Result<String, LedgerError> {
    #[derive(Serialize)]
    struct ChainPreimage<'a> {
        timestamp: f64,
        regime: Regime,
        score: f64,
        contributing_factors: &'a ContributingFactors,
        oracle_regime: Regime,
    }

    let bytes = serde_json::to_vec(&ChainPreimage {
        timestamp: entry.timestamp,
        regime: entry.regime,
        score: entry.score,
        contributing_factors: &entry.contributing_factors,
        oracle_regime: entry.oracle_regime,
    })
    .map_err(|err| LedgerError::serialization(err.to_string()))?;
    Ok(sha256_hex(&bytes))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerError {
    InvalidConfig { reason: String },
    Malformed { line: usize, reason: String },
    DuplicateEntryId { entry_id: String },
    Io { path: String, reason: String },
    Serialization { reason: String },
    ImportVerificationFailed { violations: Vec<String> },
}

impl LedgerError {
    fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    fn io(path: &Path, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "CK-AUDIT-0001",
            Self::Malformed { .. } => "CK-AUDIT-0002",
            Self::DuplicateEntryId { .. } => "CK-AUDIT-0003",
            Self::Io { .. } => "CK-AUDIT-0004",
            Self::Serialization { .. } => "CK-AUDIT-0005",
            Self::ImportVerificationFailed { .. } => "CK-AUDIT-0006",
        }
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { reason } => write!(f, "invalid ledger config: {reason}"),
            Self::Malformed { line, reason } => {
                write!(f, "malformed ledger line {line}: {reason}")
            }
            Self::DuplicateEntryId { entry_id } => {
                write!(f, "duplicate entry id: {entry_id}")
            }
            Self::Io { path, reason } => write!(f, "ledger io failure on `{path}`: {reason}"),
            Self::Serialization { reason } => write!(f, "serialization failed: {reason}"),
            Self::ImportVerificationFailed { violations } => write!(
                f,
                "import verification failed with {} violation(s)",
                violations.len()
            ),
        }
    }
}

impl std::error::Error for LedgerError {}

// ---------------------------------------------------------------------------
// Verification report
// ---------------------------------------------------------------------------

/// Outcome of a read-only integrity pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub violations: Vec<String>,
}

impl ChainVerification {
    fn from_violations(violations: Vec<String>) -> Self {
        Self {
            valid: violations.is_empty(),
            violations,
        }
    }
}

// ---------------------------------------------------------------------------
// Structured log events
// ---------------------------------------------------------------------------

/// Stable structured event emitted by ledger operations.
///
/// `timestamp` is the evaluation-clock time the operation concerned;
/// `recorded_at_utc` is the wall-clock moment the event was logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerLogEvent {
    pub component: String,
    pub event: String,
    pub outcome: String,
    pub error_code: Option<String>,
    pub timestamp: f64,
    pub recorded_at_utc: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Ledger configuration; validated at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLedgerConfig {
    /// Backing JSONL file. `None` keeps the ledger memory-only.
    pub path: Option<PathBuf>,
    /// Free-form node identity stamped on entries built by the pipeline.
    pub node_id: String,
    /// Free-form version metadata stamped on entries built by the pipeline.
    pub version: String,
}

impl Default for AuditLedgerConfig {
    fn default() -> Self {
        Self {
            path: None,
            node_id: "node-local".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// AuditLedger
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LedgerInner {
    entries: Vec<AuditEntry>,
    entry_ids: BTreeSet<String>,
    events: Vec<LedgerLogEvent>,
}

/// Append-only, hash-chained, file-mirrored audit ledger.
///
/// `append` serializes the in-memory mutation and the file write under one
/// lock; reads return independent copies.
#[derive(Debug)]
pub struct AuditLedger {
    config: AuditLedgerConfig,
    inner: Mutex<LedgerInner>,
}

impl AuditLedger {
    /// Create a ledger, eagerly loading the backing file if it exists.
    ///
    /// A malformed persisted line is a hard load failure, not a skip.
    pub fn new(config: AuditLedgerConfig) -> Result<Self, LedgerError> {
        if config.node_id.trim().is_empty() {
            return Err(LedgerError::InvalidConfig {
                reason: "node_id must not be empty".to_string(),
            });
        }
        if config.version.trim().is_empty() {
            return Err(LedgerError::InvalidConfig {
                reason: "version must not be empty".to_string(),
            });
        }

        let mut inner = LedgerInner::default();
        if let Some(path) = &config.path {
            if path.exists() {
                inner.entries = read_entries(path)?;
                inner.entry_ids = inner
                    .entries
                    .iter()
                    .map(|entry| entry.entry_id.clone())
                    .collect();
            }
        }

        Ok(Self {
            config,
            inner: Mutex::new(inner),
        })
    }

    /// Memory-only ledger with default metadata; convenient for tests and
    /// embedded use.
    pub fn in_memory() -> Self {
        Self {
            config: AuditLedgerConfig::default(),
            inner: Mutex::new(LedgerInner::default()),
        }
    }

    pub fn config(&self) -> &AuditLedgerConfig {
        &self.config
    }

    /// Derive `entry_id` and `prev_entry_hash`, reject duplicates, append
    /// in memory, and mirror the entry as one JSONL line before returning.
    pub fn append(&self, input: AuditEntryInput) -> Result<AuditEntry, LedgerError> {
        let mut inner = self.inner.lock();

        let entry_id =
            compute_entry_id(input.timestamp, input.regime, &input.contributing_factors)?;
        if inner.entry_ids.contains(&entry_id) {
            let err = LedgerError::DuplicateEntryId { entry_id };
            record_event(&mut inner, "append", "rejected", Some(err.code()), input.timestamp);
            return Err(err);
        }

        let prev_entry_hash = match inner.entries.last() {
            Some(last) => chain_hash(last)?,
            None => GENESIS_HASH.to_string(),
        };

        let entry = AuditEntry {
            entry_id,
            prev_entry_hash,
            timestamp: input.timestamp,
            elapsed_seconds: input.elapsed_seconds,
            regime: input.regime,
            score: input.score,
            contributing_factors: input.contributing_factors,
            posture_adjustments: input.posture_adjustments,
            oracle_regime: input.oracle_regime,
            oracle_score: input.oracle_score,
            dual_modality_agreement: input.dual_modality_agreement,
            transition_from: input.transition_from,
            time_in_previous_regime_seconds: input.time_in_previous_regime_seconds,
            hysteresis_enforced: input.hysteresis_enforced,
            min_duration_enforced: input.min_duration_enforced,
            ledger_continuity: input.ledger_continuity,
            amplitude_valid: input.amplitude_valid,
            drift_detected: input.drift_detected,
            drift_reasons: input.drift_reasons,
            node_id: input.node_id,
            version: input.version,
        };

        // Persist first so the file and memory cannot diverge on failure.
        if let Some(path) = &self.config.path {
            append_line(path, &entry)?;
        }
        inner.entry_ids.insert(entry.entry_id.clone());
        inner.entries.push(entry.clone());
        record_event(&mut inner, "append", "success", None, entry.timestamp);
        Ok(entry)
    }

    /// Recompute every `prev_entry_hash` from its predecessor and compare.
    /// Entry 0 must point to the genesis constant. Read-only.
    pub fn verify_hash_chain(&self) -> ChainVerification {
        let inner = self.inner.lock();
        verify_chain_of(&inner.entries)
    }

    /// Recompute every `entry_id` from its own fields; check both the
    /// recomputation and ledger-wide uniqueness. Read-only.
    pub fn verify_entry_ids(&self) -> ChainVerification {
        let inner = self.inner.lock();
        verify_ids_of(&inner.entries)
    }

    /// Union of [`Self::verify_hash_chain`] and [`Self::verify_entry_ids`].
    pub fn verify_integrity(&self) -> ChainVerification {
        let inner = self.inner.lock();
        let mut violations = verify_chain_of(&inner.entries).violations;
        violations.extend(verify_ids_of(&inner.entries).violations);
        ChainVerification::from_violations(violations)
    }

    // -- query surface (copy-returning) --

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.inner.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// The most recent `n` entries, oldest first.
    pub fn latest(&self, n: usize) -> Vec<AuditEntry> {
        let inner = self.inner.lock();
        let skip = inner.entries.len().saturating_sub(n);
        inner.entries[skip..].to_vec()
    }

    /// Entries with `start <= timestamp <= end`.
    pub fn query_by_time_window(&self, start: f64, end: f64) -> Vec<AuditEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.timestamp >= start && entry.timestamp <= end)
            .cloned()
            .collect()
    }

    pub fn query_by_regime(&self, regime: Regime) -> Vec<AuditEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.regime == regime)
            .cloned()
            .collect()
    }

    pub fn query_drift_events(&self) -> Vec<AuditEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.drift_detected)
            .cloned()
            .collect()
    }

    pub fn query_by_entry_id(&self, entry_id: &str) -> Option<AuditEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .find(|entry| entry.entry_id == entry_id)
            .cloned()
    }

    /// Structured log events recorded by ledger operations, in order.
    pub fn events(&self) -> Vec<LedgerLogEvent> {
        self.inner.lock().events.clone()
    }

    // -- bulk serialize / deserialize --

    /// Write every entry to `path` as JSONL.
    pub fn export(&self, path: &Path) -> Result<usize, LedgerError> {
        let inner = self.inner.lock();
        let mut out = String::new();
        for entry in &inner.entries {
            let line = serde_json::to_string(entry)
                .map_err(|err| LedgerError::serialization(err.to_string()))?;
            out.push_str(&line);
            out.push('\n');
        }
        fs::write(path, out).map_err(|err| LedgerError::io(path, &err))?;
        Ok(inner.entries.len())
    }

    /// Load entries from `path` and append them after the existing ones.
    ///
    /// With `verify = true` the combined sequence is integrity-checked
    /// post-load; on failure the imported entries are dropped and the
    /// in-memory state is left exactly as before the call. The backing
    /// file is only extended after verification passes.
    pub fn import(&self, path: &Path, verify: bool) -> Result<usize, LedgerError> {
        let imported = read_entries(path)?;
        let mut inner = self.inner.lock();

        for entry in &imported {
            if inner.entry_ids.contains(&entry.entry_id) {
                let err = LedgerError::DuplicateEntryId {
                    entry_id: entry.entry_id.clone(),
                };
                record_event(&mut inner, "import", "rejected", Some(err.code()), entry.timestamp);
                return Err(err);
            }
        }

        let pre_len = inner.entries.len();
        inner.entries.extend(imported.iter().cloned());

        if verify {
            let mut violations = verify_chain_of(&inner.entries).violations;
            violations.extend(verify_ids_of(&inner.entries).violations);
            if !violations.is_empty() {
                inner.entries.truncate(pre_len);
                let err = LedgerError::ImportVerificationFailed { violations };
                record_event(&mut inner, "import", "rolled_back", Some(err.code()), 0.0);
                return Err(err);
            }
        }

        if let Some(backing) = &self.config.path {
            for entry in &imported {
                if let Err(err) = append_line(backing, entry) {
                    // Keep memory and file in lockstep: drop anything the
                    // file did not accept.
                    inner.entries.truncate(pre_len);
                    record_event(&mut inner, "import", "rolled_back", Some(err.code()), 0.0);
                    return Err(err);
                }
            }
        }

        for entry in &imported {
            inner.entry_ids.insert(entry.entry_id.clone());
        }
        record_event(&mut inner, "import", "success", None, 0.0);
        Ok(imported.len())
    }

    /// Test-only reset: drop every entry and truncate the backing file.
    pub fn clear(&self) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.entry_ids.clear();
        if let Some(path) = &self.config.path {
            if path.exists() {
                fs::write(path, "").map_err(|err| LedgerError::io(path, &err))?;
            }
        }
        record_event(&mut inner, "clear", "success", None, 0.0);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Free verification passes, usable on any ordered entry sequence
// ---------------------------------------------------------------------------

/// Hash-chain verification over an ordered slice.
pub fn verify_chain_of(entries: &[AuditEntry]) -> ChainVerification {
    let mut violations = Vec::new();
    for (idx, entry) in entries.iter().enumerate() {
        let expected = if idx == 0 {
            GENESIS_HASH.to_string()
        } else {
            match chain_hash(&entries[idx - 1]) {
                Ok(hash) => hash,
                Err(err) => {
                    violations.push(format!("entry {idx}: failed to canonicalize predecessor: {err}"));
                    continue;
                }
            }
        };
        if entry.prev_entry_hash != expected {
            violations.push(format!(
                "entry {idx} (id {}): prev_entry_hash mismatch: expected {expected}, found {}",
                entry.entry_id, entry.prev_entry_hash
            ));
        }
    }
    ChainVerification::from_violations(violations)
}

/// Entry-id verification over an ordered slice: recomputation match plus
/// ledger-wide uniqueness.
pub fn verify_ids_of(entries: &[AuditEntry]) -> ChainVerification {
    let mut violations = Vec::new();
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    for (idx, entry) in entries.iter().enumerate() {
        match compute_entry_id(entry.timestamp, entry.regime, &entry.contributing_factors) {
            Ok(expected) => {
                if entry.entry_id != expected {
                    violations.push(format!(
                        "entry {idx} (id {}): entry_id does not match recomputed hash {expected}",
                        entry.entry_id
                    ));
                }
            }
            Err(err) => {
                violations.push(format!("entry {idx}: failed to canonicalize: {err}"));
            }
        }
        if !seen.insert(entry.entry_id.as_str()) {
            violations.push(format!(
                "entry {idx}: duplicate entry_id {}",
                entry.entry_id
            ));
        }
    }
    ChainVerification::from_violations(violations)
}

fn record_event(
    inner: &mut LedgerInner,
    event: &str,
    outcome: &str,
    error_code: Option<&str>,
    timestamp: f64,
) {
    inner.events.push(LedgerLogEvent {
        component: AUDIT_LEDGER_COMPONENT.to_string(),
        event: event.to_string(),
        outcome: outcome.to_string(),
        error_code: error_code.map(str::to_string),
        timestamp,
        recorded_at_utc: Utc::now().to_rfc3339(),
    });
}

fn append_line(path: &Path, entry: &AuditEntry) -> Result<(), LedgerError> {
    let line = serde_json::to_string(entry)
        .map_err(|err| LedgerError::serialization(err.to_string()))?;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| LedgerError::io(path, &err))?;
    writeln!(file, "{line}").map_err(|err| LedgerError::io(path, &err))?;
    Ok(())
}

fn read_entries(path: &Path) -> Result<Vec<AuditEntry>, LedgerError> {
    let contents = fs::read_to_string(path).map_err(|err| LedgerError::io(path, &err))?;
    let mut entries = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: AuditEntry =
            serde_json::from_str(line).map_err(|err| LedgerError::Malformed {
                line: idx + 1,
                reason: err.to_string(),
            })?;
        entries.push(entry);
    }
    Ok(entries)
}
