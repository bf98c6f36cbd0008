//! Data-model records shared across the estimator, screener, optimizer, and
//! drift analyzer.
//!
//! Every record here is an immutable value produced by exactly one component
//! operation. Optional fields are modeled as `Option<T>` rather than null
//! sentinels, except where numeric absence is naturally encoded (e.g.
//! `Sharpe` is simply absent, not `NaN`, when `sigma_p == 0`).

use std::collections::HashMap;

use chrono::NaiveDate;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Opaque, caller-supplied stable identifier for an asset. The core never
/// mints these.
pub type AssetKey = String;

// ---------------------------------------------------------------------
// Return panel / estimator inputs
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    /// Factor applied to per-period mean/variance to bring them to an
    /// annual scale.
    pub fn annualization_factor(self) -> f64 {
        match self {
            Frequency::Daily => 252.0,
            Frequency::Weekly => 52.0,
            Frequency::Monthly => 12.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnKind {
    Simple,
    Log,
}

/// A panel of asset returns aligned on a common set of observation dates.
///
/// Invariants (enforced by the Estimator, not by construction): dates
/// strictly ascending; no NaN/inf; at least 2 observations and 2 assets.
#[derive(Debug, Clone)]
pub struct ReturnPanel {
    pub asset_keys: Vec<AssetKey>,
    pub dates: Vec<NaiveDate>,
    /// m (dates) x n (assets)
    pub returns: DMatrix<f64>,
    pub frequency: Frequency,
    pub return_kind: ReturnKind,
}

impl ReturnPanel {
    pub fn num_assets(&self) -> usize {
        self.asset_keys.len()
    }

    pub fn num_observations(&self) -> usize {
        self.dates.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MuEstimator {
    Historical,
    Ewma { half_life: Option<u32> },
    Shrinkage { alpha: Option<u32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CovEstimator {
    Sample,
    LedoitWolf,
}

/// Tunables for the Estimator, caller-supplied, never read from
/// environment or disk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorOptions {
    /// EWMA half-life in periods. `None` defaults to half the observation count.
    pub ewma_half_life: Option<f64>,
    /// Shrinkage-toward-grand-mean intensity, in [0,1]. Default 0.1.
    pub shrinkage_alpha: f64,
}

impl Default for EstimatorOptions {
    fn default() -> Self {
        Self {
            ewma_half_life: None,
            shrinkage_alpha: 0.1,
        }
    }
}

/// Versioned bundle (μ, Σ, ρ, σ, annualization, rf, estimator choices) that
/// parameterizes every downstream computation.
#[derive(Debug, Clone)]
pub struct AssumptionSet {
    pub asset_keys: Vec<AssetKey>,
    pub mu: DVector<f64>,
    pub sigma: DMatrix<f64>,
    pub sigma_diag: DVector<f64>,
    pub corr: DMatrix<f64>,
    pub annualization_factor: f64,
    pub rf: f64,
    pub mu_estimator: MuEstimator,
    pub cov_estimator: CovEstimator,
    pub psd_repair_applied: bool,
    pub psd_repair_note: Option<String>,
}

impl AssumptionSet {
    pub fn num_assets(&self) -> usize {
        self.asset_keys.len()
    }

    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.asset_keys.iter().position(|k| k == key)
    }
}

// ---------------------------------------------------------------------
// Optimizer
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunType {
    Mvp,
    FrontierPoint,
    FrontierSeries,
    Tangency,
}

/// The caller-supplied constraint bundle for an optimization run.
#[derive(Debug, Clone, Default)]
pub struct OptimizationConstraints {
    pub long_only: bool,
    pub min_weight: Option<f64>,
    pub max_weight: Option<f64>,
    pub per_asset_bounds: HashMap<AssetKey, (f64, f64)>,
    pub leverage_cap: Option<f64>,
    pub concentration_cap: Option<f64>,
    pub turnover_cap: Option<f64>,
    pub target_return: Option<f64>,
}

impl OptimizationConstraints {
    /// Validate internal bound coherence (min <= max). Does not resolve
    /// asset keys to columns; that happens once per optimize() call.
    pub fn validate_shape(&self) -> Result<(), String> {
        if let (Some(lo), Some(hi)) = (self.min_weight, self.max_weight) {
            if lo > hi {
                return Err(format!(
                    "uniform bounds incoherent: min_weight {lo} > max_weight {hi}"
                ));
            }
        }
        for (asset, (lo, hi)) in &self.per_asset_bounds {
            if lo > hi {
                return Err(format!(
                    "per-asset bounds incoherent for {asset}: min {lo} > max {hi}"
                ));
            }
        }
        if let Some(l) = self.leverage_cap {
            if l < 1.0 {
                return Err(format!("leverage_cap {l} must be >= 1"));
            }
        }
        if let Some(c) = self.concentration_cap {
            if !(c > 0.0 && c <= 1.0) {
                return Err(format!("concentration_cap {c} must be in (0,1]"));
            }
        }
        if let Some(t) = self.turnover_cap {
            if t < 0.0 {
                return Err(format!("turnover_cap {t} must be >= 0"));
            }
        }
        Ok(())
    }
}

/// Tunables for the Optimizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOptions {
    pub constraint_tolerance: f64,
    pub objective_tolerance: f64,
    pub max_iterations: usize,
    pub frontier_points: usize,
    pub weight_zero_floor: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            constraint_tolerance: 1e-8,
            objective_tolerance: 1e-6,
            max_iterations: 200,
            frontier_points: 20,
            weight_zero_floor: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverStatus {
    Success,
    Infeasible,
    Error,
}

/// Marginal / component / percent risk contributions. `crc` sums to the
/// portfolio volatility and `prc` sums to 1.
#[derive(Debug, Clone)]
pub struct RiskDecomposition {
    pub mcr: Vec<f64>,
    pub crc: Vec<f64>,
    pub prc: Vec<f64>,
}

/// The result of one optimizer run. `SUCCESS` implies every field
/// marked "when SUCCESS" is populated; other statuses leave them `None` and
/// populate `infeasibility_reason` / carry the solver message in the
/// warning list instead.
#[derive(Debug, Clone)]
pub struct SolverResult {
    pub status: SolverStatus,
    pub run_type: RunType,
    pub weights: Option<Vec<f64>>,
    pub mu_p: Option<f64>,
    pub sigma2_p: Option<f64>,
    pub sigma_p: Option<f64>,
    pub sharpe: Option<f64>,
    pub hhi: Option<f64>,
    pub effective_n: Option<f64>,
    pub risk_decomposition: Option<RiskDecomposition>,
    pub infeasibility_reason: Option<String>,
    pub warnings: Vec<String>,
    pub solver_tag: &'static str,
    /// Present only for FRONTIER_SERIES members, ties results to a common
    /// series identifier supplied by the caller.
    pub series_id: Option<String>,
    pub target_return: Option<f64>,
}

// ---------------------------------------------------------------------
// Screener
// ---------------------------------------------------------------------

/// Asset class/sector metadata supplied by the caller's metadata provider.
/// Sector is nullable for non-equity assets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetMetadata {
    pub class: String,
    pub sector: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalWeights {
    pub avg_corr: f64,
    pub mvr: f64,
    pub gap: f64,
    pub hhi_red: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            avg_corr: 0.40,
            mvr: 0.30,
            gap: 0.15,
            hhi_red: 0.15,
        }
    }
}

impl SignalWeights {
    pub fn validate(&self) -> Result<(), String> {
        let sum = self.avg_corr + self.mvr + self.gap + self.hhi_red;
        if (sum - 1.0).abs() > 1e-9 {
            return Err(format!("signal weights must sum to 1, got {sum}"));
        }
        if [self.avg_corr, self.mvr, self.gap, self.hhi_red]
            .iter()
            .any(|&v| v < 0.0)
        {
            return Err("signal weights must be non-negative".to_string());
        }
        Ok(())
    }
}

/// Tunables for the Screener.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenerOptions {
    pub signal_weights: SignalWeights,
    /// δ, the nominal pro-forma add-weight for a candidate.
    pub add_weight: f64,
    /// Aggregate reference weight below which an asset class counts as
    /// "absent" for gap scoring.
    pub gap_class_threshold: f64,
    pub top_k: usize,
}

impl Default for ScreenerOptions {
    fn default() -> Self {
        Self {
            signal_weights: SignalWeights::default(),
            add_weight: 0.05,
            gap_class_threshold: 0.02,
            top_k: 10,
        }
    }
}

/// A single screening invocation's inputs, as resolved by the caller: exactly
/// one reference-weight source is the caller's concern, the core only ever
/// sees the resolved weight map.
#[derive(Debug, Clone)]
pub struct ScreeningInput {
    pub reference_weights: HashMap<AssetKey, f64>,
    pub candidate_keys: Vec<AssetKey>,
    pub metadata: HashMap<AssetKey, AssetMetadata>,
    pub options: ScreenerOptions,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSignals {
    pub avg_corr: f64,
    pub mvr: f64,
    pub gap: f64,
    pub hhi_red: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedSignals {
    pub avg_corr: f64,
    pub mvr: f64,
    pub gap: f64,
    pub hhi_red: f64,
}

#[derive(Debug, Clone)]
pub struct ScreeningScoreRow {
    pub candidate: AssetKey,
    pub raw: RawSignals,
    pub normalized: NormalizedSignals,
    pub composite: f64,
    /// Dense rank, 1 = best.
    pub rank: usize,
    pub explanation: Option<String>,
}

/// The full result of one screening run: the ranked rows plus any warnings
/// raised along the way (e.g. a signal with a degenerate min-max range),
/// attached to the record rather than only logged.
#[derive(Debug, Clone)]
pub struct ScreeningReport {
    pub rows: Vec<ScreeningScoreRow>,
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------
// Drift Analyzer
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftOptions {
    pub threshold: f64,
}

impl Default for DriftOptions {
    fn default() -> Self {
        Self { threshold: 0.05 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriftRow {
    pub asset: AssetKey,
    pub target: f64,
    pub current: f64,
    pub abs_delta: f64,
    pub breached: bool,
}

#[derive(Debug, Clone)]
pub struct DriftReport {
    pub run_key: String,
    pub check_date: NaiveDate,
    pub threshold: f64,
    pub rows: Vec<DriftRow>,
    pub any_breach: bool,
    pub explanations: Vec<String>,
}
