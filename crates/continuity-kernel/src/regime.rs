//! Regime model: contributing signals, the ordered regime enum, score
//! ranges, and per-regime postures.
//!
//! Pure data with no dependencies on the rest of the crate. The classifier,
//! the contract oracle, the drift guard, and the continuity proofs all speak
//! in terms of these types; none of them extend or reinterpret them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Margin a score must drop below a downgrade target's upper bound before
/// the downgrade is allowed.
pub const DOWNGRADE_HYSTERESIS: f64 = 0.05;

/// Minimum dwell time in a regime before any downgrade is allowed.
pub const MIN_REGIME_DURATION_SECONDS: f64 = 300.0;

/// Weight applied to `urf_composite_risk`.
pub const WEIGHT_URF: f64 = 0.30;
/// Weight applied to `mse_meta_instability`.
pub const WEIGHT_MSE: f64 = 0.25;
/// Weight applied to `predictive_collapse_risk`.
pub const WEIGHT_PREDICTIVE: f64 = 0.20;
/// Weight applied to `consistency_gap`.
pub const WEIGHT_CONSISTENCY_GAP: f64 = 0.15;
/// Weight applied to the inverted `csi_continuity_index`.
pub const WEIGHT_CSI_INVERTED: f64 = 0.10;

/// Clamp a signal to `[0.0, 1.0]`; non-finite inputs collapse to `0.0`.
pub fn clamp_signal(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// ContributingFactors: the five weighted risk signals
// ---------------------------------------------------------------------------

/// The five risk signals an evaluation is scored from.
///
/// All fields are in `[0.0, 1.0]`. `csi_continuity_index` is the one
/// health-positive signal (higher = healthier); it is inverted before
/// weighting. Use [`ContributingFactors::new`] to construct with clamping;
/// scoring clamps again defensively, so out-of-range values arriving via
/// deserialization cannot push a score outside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContributingFactors {
    pub urf_composite_risk: f64,
    pub mse_meta_instability: f64,
    pub predictive_collapse_risk: f64,
    pub consistency_gap: f64,
    pub csi_continuity_index: f64,
}

impl ContributingFactors {
    /// Build a factor set, clamping every signal to `[0.0, 1.0]`.
    pub fn new(
        urf_composite_risk: f64,
        mse_meta_instability: f64,
        predictive_collapse_risk: f64,
        consistency_gap: f64,
        csi_continuity_index: f64,
    ) -> Self {
        Self {
            urf_composite_risk: clamp_signal(urf_composite_risk),
            mse_meta_instability: clamp_signal(mse_meta_instability),
            predictive_collapse_risk: clamp_signal(predictive_collapse_risk),
            consistency_gap: clamp_signal(consistency_gap),
            csi_continuity_index: clamp_signal(csi_continuity_index),
        }
    }

    /// A fully healthy signal set: zero risk, full continuity.
    pub fn healthy() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0, 1.0)
    }

    /// Return a copy with every signal re-clamped.
    pub fn clamped(self) -> Self {
        Self::new(
            self.urf_composite_risk,
            self.mse_meta_instability,
            self.predictive_collapse_risk,
            self.consistency_gap,
            self.csi_continuity_index,
        )
    }
}

// ---------------------------------------------------------------------------
// Regime: five ordered operational-health states
// ---------------------------------------------------------------------------

/// Operational-health regime, strictly ordered by severity.
///
/// Each regime owns a half-open score range `[low, high)`; Recovery's range
/// is unbounded above and absorbs any score at or beyond its lower bound,
/// including scores ≥ 1.0.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Normal,
    Heightened,
    ControlledDegradation,
    EmergencyStabilization,
    Recovery,
}

impl Regime {
    /// All regimes in ascending severity order.
    pub const ALL: [Regime; 5] = [
        Regime::Normal,
        Regime::Heightened,
        Regime::ControlledDegradation,
        Regime::EmergencyStabilization,
        Regime::Recovery,
    ];

    /// Severity rank; strictly increasing with operational concern.
    pub fn severity(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Heightened => 1,
            Self::ControlledDegradation => 2,
            Self::EmergencyStabilization => 3,
            Self::Recovery => 4,
        }
    }

    /// Half-open score range `[low, high)` owned by this regime.
    pub fn score_range(self) -> (f64, f64) {
        match self {
            Self::Normal => (0.0, 0.30),
            Self::Heightened => (0.30, 0.50),
            Self::ControlledDegradation => (0.50, 0.70),
            Self::EmergencyStabilization => (0.70, 0.90),
            Self::Recovery => (0.90, f64::INFINITY),
        }
    }

    /// Resolve a score to the regime whose range contains it.
    ///
    /// A score exactly on a lower bound belongs to the more severe regime
    /// (half-open ranges). Scores unmatched by any bounded range, including
    /// anything >= 1.0 and non-finite values, map to Recovery.
    pub fn for_score(score: f64) -> Self {
        if score < 0.30 {
            return Self::Normal;
        }
        if score < 0.50 {
            return Self::Heightened;
        }
        if score < 0.70 {
            return Self::ControlledDegradation;
        }
        if score < 0.90 {
            return Self::EmergencyStabilization;
        }
        Self::Recovery
    }

    /// Canonical snake_case name, as persisted in the ledger.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Heightened => "heightened",
            Self::ControlledDegradation => "controlled_degradation",
            Self::EmergencyStabilization => "emergency_stabilization",
            Self::Recovery => "recovery",
        }
    }

    /// Parse a canonical regime name; unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "normal" => Some(Self::Normal),
            "heightened" => Some(Self::Heightened),
            "controlled_degradation" => Some(Self::ControlledDegradation),
            "emergency_stabilization" => Some(Self::EmergencyStabilization),
            "recovery" => Some(Self::Recovery),
            _ => None,
        }
    }

    /// Static posture for this regime.
    pub fn posture(self) -> Posture {
        match self {
            Self::Normal => Posture {
                threshold_multiplier: 1.0,
                traffic_limit: 1.0,
                deployment_freeze: false,
                safe_mode_forced: false,
                monitoring_interval_seconds: 60,
            },
            Self::Heightened => Posture {
                threshold_multiplier: 1.2,
                traffic_limit: 0.8,
                deployment_freeze: false,
                safe_mode_forced: false,
                monitoring_interval_seconds: 30,
            },
            Self::ControlledDegradation => Posture {
                threshold_multiplier: 1.5,
                traffic_limit: 0.5,
                deployment_freeze: true,
                safe_mode_forced: false,
                monitoring_interval_seconds: 15,
            },
            Self::EmergencyStabilization => Posture {
                threshold_multiplier: 2.0,
                traffic_limit: 0.2,
                deployment_freeze: true,
                safe_mode_forced: true,
                monitoring_interval_seconds: 5,
            },
            Self::Recovery => Posture {
                threshold_multiplier: 1.6,
                traffic_limit: 0.4,
                deployment_freeze: true,
                safe_mode_forced: true,
                monitoring_interval_seconds: 10,
            },
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Posture: behavioral knobs attached to each regime
// ---------------------------------------------------------------------------

/// The fixed behavioral knobs a regime imposes on downstream consumers.
///
/// Postures are static lookup data owned by [`Regime::posture`]; they are
/// never derived per-instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Posture {
    /// Multiplier applied to alerting/decision thresholds; within `[0.5, 2.0]`.
    pub threshold_multiplier: f64,
    /// Fraction of normal traffic admitted; within `[0.0, 1.0]`.
    pub traffic_limit: f64,
    /// Whether deployments are frozen in this regime.
    pub deployment_freeze: bool,
    /// Whether safe mode is forced in this regime.
    pub safe_mode_forced: bool,
    /// Monitoring cadence while in this regime.
    pub monitoring_interval_seconds: u32,
}

impl Posture {
    /// Whether this posture sits inside the declared amplitude bounds.
    pub fn within_amplitude_bounds(&self) -> bool {
        (0.5..=2.0).contains(&self.threshold_multiplier)
            && (0.0..=1.0).contains(&self.traffic_limit)
    }
}
