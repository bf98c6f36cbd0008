//! Optimizer: MVP, FRONTIER_POINT, FRONTIER_SERIES, and TANGENCY runs over a
//! shared convex-QP core (`optimizer_qp`), with a per-run lifecycle logged as
//! `NEW → VALIDATING → PRECHECK → SOLVING → CLEANING → DECOMPOSING → DONE`,
//! diverting to `INFEASIBLE`/`ERROR` as appropriate.

use crate::error::{CoreError, CoreResult};
use crate::optimizer_qp::{build_problem, clean_weights, resolve_bounds, solve as solve_qp};
use crate::risk::{effective_n, hhi, portfolio_variance, risk_decomposition};
use crate::types::{
    AssumptionSet, OptimizationConstraints, RunType, SolverOptions, SolverResult, SolverStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    New,
    Validating,
    Precheck,
    Solving,
    Cleaning,
    Decomposing,
    Done,
}

fn log_transition(from: RunState, to: RunState) {
    tracing::debug!(?from, ?to, "optimizer run state transition");
}

fn infeasible(run_type: RunType, reason: impl Into<String>, tag: &'static str) -> SolverResult {
    SolverResult {
        status: SolverStatus::Infeasible,
        run_type,
        weights: None,
        mu_p: None,
        sigma2_p: None,
        sigma_p: None,
        sharpe: None,
        hhi: None,
        effective_n: None,
        risk_decomposition: None,
        infeasibility_reason: Some(reason.into()),
        warnings: Vec::new(),
        solver_tag: tag,
        series_id: None,
        target_return: None,
    }
}

fn error_result(run_type: RunType, message: impl Into<String>, tag: &'static str) -> SolverResult {
    SolverResult {
        status: SolverStatus::Error,
        run_type,
        weights: None,
        mu_p: None,
        sigma2_p: None,
        sigma_p: None,
        sharpe: None,
        hhi: None,
        effective_n: None,
        risk_decomposition: None,
        infeasibility_reason: Some(message.into()),
        warnings: Vec::new(),
        solver_tag: tag,
        series_id: None,
        target_return: None,
    }
}

/// PRECHECK diagnostics common to every run type: jointly infeasible bounds
/// against 1ᵀw=1.
fn check_joint_bounds(bounds: &[(f64, f64)]) -> Option<String> {
    let sum_min: f64 = bounds.iter().map(|&(lo, _)| lo.max(f64::NEG_INFINITY)).filter(|v| v.is_finite()).sum();
    let sum_max: f64 = bounds.iter().map(|&(_, hi)| hi).filter(|v| v.is_finite()).sum();
    let finite_min_count = bounds.iter().filter(|&&(lo, _)| lo.is_finite()).count();
    let finite_max_count = bounds.iter().filter(|&&(_, hi)| hi.is_finite()).count();

    if finite_min_count == bounds.len() && sum_min > 1.0 {
        return Some(format!(
            "sum of per-asset minimum weights {sum_min:.6} exceeds 1; no feasible portfolio sums to 1"
        ));
    }
    if finite_max_count == bounds.len() && sum_max < 1.0 {
        return Some(format!(
            "sum of per-asset maximum weights {sum_max:.6} is below 1; no feasible portfolio sums to 1"
        ));
    }
    None
}

fn decompose(
    weights: &[f64],
    assumptions: &AssumptionSet,
    run_type: RunType,
    solver_tag: &'static str,
    target_return: Option<f64>,
    warnings: Vec<String>,
) -> CoreResult<SolverResult> {
    let sigma2_p = portfolio_variance(weights, &assumptions.sigma);
    let sigma_p = sigma2_p.max(0.0).sqrt();
    let mu_p: f64 = weights.iter().zip(assumptions.mu.iter()).map(|(w, m)| w * m).sum();
    let sharpe = if sigma_p > 0.0 {
        Some((mu_p - assumptions.rf) / sigma_p)
    } else {
        None
    };
    let decomposition = if sigma_p > 0.0 {
        Some(risk_decomposition(weights, &assumptions.sigma, sigma_p)?)
    } else {
        None
    };

    Ok(SolverResult {
        status: SolverStatus::Success,
        run_type,
        weights: Some(weights.to_vec()),
        mu_p: Some(mu_p),
        sigma2_p: Some(sigma2_p),
        sigma_p: Some(sigma_p),
        sharpe,
        hhi: Some(hhi(weights)),
        effective_n: effective_n(weights),
        risk_decomposition: decomposition,
        infeasibility_reason: None,
        warnings,
        solver_tag,
        series_id: None,
        target_return,
    })
}

/// Runs one convex QP solve (MVP or a single FRONTIER_POINT) through the
/// full NEW→DONE lifecycle.
fn run_convex(
    assumptions: &AssumptionSet,
    run_type: RunType,
    constraints: &OptimizationConstraints,
    prev_weights: Option<&[f64]>,
    options: &SolverOptions,
    target_return: Option<f64>,
) -> CoreResult<SolverResult> {
    log_transition(RunState::New, RunState::Validating);
    constraints.validate_shape().map_err(CoreError::invalid_input)?;

    log_transition(RunState::Validating, RunState::Precheck);
    let n = assumptions.num_assets();
    let bounds = resolve_bounds(&assumptions.asset_keys, constraints);

    let mut warnings = Vec::new();
    let turnover_dropped = constraints.turnover_cap.is_some() && prev_weights.is_none();
    if turnover_dropped {
        let msg = "turnover_cap set but no prev_weights supplied; turnover constraint dropped".to_string();
        tracing::warn!(%msg);
        warnings.push(msg);
    }

    if let Some(reason) = check_joint_bounds(&bounds) {
        return Ok(infeasible(run_type, reason, "qp_precheck"));
    }

    if let Some(r_star) = target_return {
        let max_mu = assumptions.mu.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min_mu = assumptions.mu.iter().cloned().fold(f64::INFINITY, f64::min);
        if r_star > max_mu {
            return Ok(infeasible(
                run_type,
                format!("target return {r_star:.6} exceeds the maximum achievable asset return {max_mu:.6}"),
                "qp_precheck",
            ));
        }
        if r_star < min_mu {
            return Ok(infeasible(
                run_type,
                format!("target return {r_star:.6} is below the minimum asset return {min_mu:.6}"),
                "qp_precheck",
            ));
        }
    }

    log_transition(RunState::Precheck, RunState::Solving);
    let effective_constraints = OptimizationConstraints {
        turnover_cap: if turnover_dropped { None } else { constraints.turnover_cap },
        ..constraints.clone()
    };
    let problem = build_problem(
        &assumptions.sigma,
        &assumptions.mu,
        &bounds,
        &effective_constraints,
        prev_weights,
        target_return,
    )?;
    let n_vars_ok = problem.n_assets == n;
    if !n_vars_ok {
        return Err(CoreError::numerical("QP variable count mismatch"));
    }

    let solution = solve_qp(&problem, options)?;
    if !solution.solved {
        let status_lower = solution.status_tag.to_lowercase();
        if status_lower.contains("infeasible") {
            return Ok(infeasible(
                run_type,
                format!("solver reported infeasible: {}", solution.status_tag),
                "qp_solve",
            ));
        }
        return Ok(error_result(
            run_type,
            format!("solver did not converge: {}", solution.status_tag),
            "qp_solve",
        ));
    }

    log_transition(RunState::Solving, RunState::Cleaning);
    let cleaned = clean_weights(&solution.weights, options.weight_zero_floor);

    log_transition(RunState::Cleaning, RunState::Decomposing);
    let result = decompose(&cleaned, assumptions, run_type, "clarabel_qp", target_return, warnings)?;

    log_transition(RunState::Decomposing, RunState::Done);
    Ok(result)
}

fn solve_mvp(
    assumptions: &AssumptionSet,
    constraints: &OptimizationConstraints,
    prev_weights: Option<&[f64]>,
    options: &SolverOptions,
) -> CoreResult<SolverResult> {
    run_convex(assumptions, RunType::Mvp, constraints, prev_weights, options, None)
}

fn solve_frontier_point(
    assumptions: &AssumptionSet,
    constraints: &OptimizationConstraints,
    prev_weights: Option<&[f64]>,
    options: &SolverOptions,
) -> CoreResult<SolverResult> {
    let r_star = constraints.target_return.ok_or_else(|| {
        CoreError::invalid_input("FRONTIER_POINT requires constraints.target_return")
    })?;
    run_convex(
        assumptions,
        RunType::FrontierPoint,
        constraints,
        prev_weights,
        options,
        Some(r_star),
    )
}

fn solve_frontier_series(
    assumptions: &AssumptionSet,
    constraints: &OptimizationConstraints,
    prev_weights: Option<&[f64]>,
    options: &SolverOptions,
    series_id: Option<String>,
) -> CoreResult<Vec<SolverResult>> {
    let min_mu = assumptions.mu.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_mu = assumptions.mu.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let k = options.frontier_points.max(2);

    let mut results = Vec::with_capacity(k);
    for i in 0..k {
        let t = i as f64 / (k - 1) as f64;
        let r_star = min_mu + t * (max_mu - min_mu);
        let point_constraints = OptimizationConstraints {
            target_return: Some(r_star),
            ..constraints.clone()
        };
        let mut result = run_convex(
            assumptions,
            RunType::FrontierSeries,
            &point_constraints,
            prev_weights,
            options,
            Some(r_star),
        )?;
        result.series_id = series_id.clone();
        results.push(result);
    }
    Ok(results)
}

/// Deterministic restart seeds for the TANGENCY search: 1/n uniform,
/// μ-weighted, and inverse-variance-weighted target returns.
fn seed_target_returns(assumptions: &AssumptionSet) -> Vec<f64> {
    let n = assumptions.num_assets();
    let mu = &assumptions.mu;

    let uniform: Vec<f64> = vec![1.0 / n as f64; n];

    let mu_shift = mu.iter().cloned().fold(f64::INFINITY, f64::min).min(0.0).abs() + 1e-9;
    let mu_pos: Vec<f64> = mu.iter().map(|m| m + mu_shift).collect();
    let mu_sum: f64 = mu_pos.iter().sum();
    let mu_weighted: Vec<f64> = mu_pos.iter().map(|v| v / mu_sum).collect();

    let inv_var: Vec<f64> = (0..n).map(|i| 1.0 / assumptions.sigma[(i, i)].max(1e-12)).collect();
    let inv_var_sum: f64 = inv_var.iter().sum();
    let inv_var_weighted: Vec<f64> = inv_var.iter().map(|v| v / inv_var_sum).collect();

    [uniform, mu_weighted, inv_var_weighted]
        .iter()
        .map(|w| w.iter().zip(mu.iter()).map(|(wi, mi)| wi * mi).sum())
        .collect()
}

/// Golden-section search maximizing `f` over `[lo, hi]`, assuming
/// unimodality (the Sharpe ratio along the efficient frontier is unimodal).
fn golden_section_max(
    lo: f64,
    hi: f64,
    tolerance: f64,
    max_iterations: usize,
    mut f: impl FnMut(f64) -> f64,
) -> f64 {
    const INV_PHI: f64 = 0.6180339887498949;
    let mut a = lo;
    let mut b = hi;
    let mut c = b - INV_PHI * (b - a);
    let mut d = a + INV_PHI * (b - a);
    let mut fc = f(c);
    let mut fd = f(d);

    for _ in 0..max_iterations {
        if (b - a).abs() < tolerance {
            break;
        }
        if fc > fd {
            b = d;
            d = c;
            fd = fc;
            c = b - INV_PHI * (b - a);
            fc = f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + INV_PHI * (b - a);
            fd = f(d);
        }
    }
    (a + b) / 2.0
}

fn solve_tangency(
    assumptions: &AssumptionSet,
    constraints: &OptimizationConstraints,
    prev_weights: Option<&[f64]>,
    options: &SolverOptions,
) -> CoreResult<SolverResult> {
    let max_mu = assumptions.mu.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max_mu <= assumptions.rf {
        return Ok(infeasible(
            RunType::Tangency,
            "No asset has expected return exceeding the risk-free rate; tangency portfolio undefined.",
            "golden_section_tangency",
        ));
    }
    let min_mu = assumptions.mu.iter().cloned().fold(f64::INFINITY, f64::min);
    let eps = (max_mu - min_mu) * 1e-6;
    let lo = min_mu + eps;
    let hi = max_mu - eps;
    if lo >= hi {
        return Ok(infeasible(
            RunType::Tangency,
            "asset expected returns are too close together to bracket a tangency search",
            "golden_section_tangency",
        ));
    }

    let eval_at = |r_star: f64| -> CoreResult<SolverResult> {
        let point_constraints = OptimizationConstraints {
            target_return: Some(r_star),
            ..constraints.clone()
        };
        run_convex(
            assumptions,
            RunType::Tangency,
            &point_constraints,
            prev_weights,
            options,
            Some(r_star),
        )
    };

    let mut best: Option<SolverResult> = None;
    let mut update_best = |candidate: SolverResult| {
        if candidate.status != SolverStatus::Success {
            return;
        }
        let candidate_sharpe = candidate.sharpe.unwrap_or(f64::NEG_INFINITY);
        let replace = match &best {
            None => true,
            Some(current) => candidate_sharpe > current.sharpe.unwrap_or(f64::NEG_INFINITY),
        };
        if replace {
            best = Some(candidate);
        }
    };

    for seed_r in seed_target_returns(assumptions) {
        let clamped = seed_r.clamp(lo, hi);
        if let Ok(result) = eval_at(clamped) {
            update_best(result);
        }
    }

    let mut sharpe_cache_err: Option<CoreError> = None;
    let best_r = golden_section_max(lo, hi, options.objective_tolerance, options.max_iterations, |r| {
        match eval_at(r) {
            Ok(result) if result.status == SolverStatus::Success => result.sharpe.unwrap_or(f64::NEG_INFINITY),
            Ok(_) => f64::NEG_INFINITY,
            Err(e) => {
                sharpe_cache_err = Some(e);
                f64::NEG_INFINITY
            }
        }
    });
    if let Some(e) = sharpe_cache_err {
        return Err(e);
    }
    if let Ok(result) = eval_at(best_r) {
        update_best(result);
    }

    match best {
        Some(mut result) => {
            result.solver_tag = "golden_section_tangency";
            Ok(result)
        }
        None => Ok(infeasible(
            RunType::Tangency,
            "no feasible portfolio found along the efficient frontier search interval",
            "golden_section_tangency",
        )),
    }
}

/// Single entry point for all four run types.
pub fn optimize(
    assumptions: &AssumptionSet,
    run_type: RunType,
    constraints: &OptimizationConstraints,
    prev_weights: Option<&[f64]>,
    options: SolverOptions,
    series_id: Option<String>,
) -> CoreResult<Vec<SolverResult>> {
    match run_type {
        RunType::Mvp => Ok(vec![solve_mvp(assumptions, constraints, prev_weights, &options)?]),
        RunType::FrontierPoint => {
            Ok(vec![solve_frontier_point(assumptions, constraints, prev_weights, &options)?])
        }
        RunType::FrontierSeries => {
            solve_frontier_series(assumptions, constraints, prev_weights, &options, series_id)
        }
        RunType::Tangency => Ok(vec![solve_tangency(assumptions, constraints, prev_weights, &options)?]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CovEstimator, MuEstimator};
    use nalgebra::{DMatrix, DVector};

    fn two_asset_assumptions() -> AssumptionSet {
        let sigma = DMatrix::from_row_slice(2, 2, &[0.04, 0.0, 0.0, 0.09]);
        let sigma_diag = crate::linalg::stdev_from_cov(&sigma);
        let corr = crate::linalg::cov_to_corr(&sigma, &sigma_diag);
        AssumptionSet {
            asset_keys: vec!["A".into(), "B".into()],
            mu: DVector::from_vec(vec![0.06, 0.10]),
            sigma,
            sigma_diag,
            corr,
            annualization_factor: 252.0,
            rf: 0.01,
            mu_estimator: MuEstimator::Historical,
            cov_estimator: CovEstimator::Sample,
            psd_repair_applied: false,
            psd_repair_note: None,
        }
    }

    #[test]
    fn mvp_weights_sum_to_one_and_are_long_only() {
        let assumptions = two_asset_assumptions();
        let constraints = OptimizationConstraints {
            long_only: true,
            ..Default::default()
        };
        let results = optimize(
            &assumptions,
            RunType::Mvp,
            &constraints,
            None,
            SolverOptions::default(),
            None,
        )
        .unwrap();
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.status, SolverStatus::Success);
        let w = r.weights.as_ref().unwrap();
        let sum: f64 = w.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(w.iter().all(|&wi| wi >= -1e-9));
    }

    #[test]
    fn tangency_infeasible_when_no_asset_beats_rf() {
        let mut assumptions = two_asset_assumptions();
        assumptions.rf = 0.5;
        let results = optimize(
            &assumptions,
            RunType::Tangency,
            &OptimizationConstraints::default(),
            None,
            SolverOptions::default(),
            None,
        )
        .unwrap();
        assert_eq!(results[0].status, SolverStatus::Infeasible);
    }

    #[test]
    fn frontier_point_out_of_range_target_is_infeasible() {
        let assumptions = two_asset_assumptions();
        let constraints = OptimizationConstraints {
            target_return: Some(5.0),
            ..Default::default()
        };
        let results = optimize(
            &assumptions,
            RunType::FrontierPoint,
            &constraints,
            None,
            SolverOptions::default(),
            None,
        )
        .unwrap();
        assert_eq!(results[0].status, SolverStatus::Infeasible);
    }

    #[test]
    fn jointly_infeasible_bounds_are_detected_before_solving() {
        let assumptions = two_asset_assumptions();
        let mut per_asset_bounds = std::collections::HashMap::new();
        per_asset_bounds.insert("A".to_string(), (0.7, 1.0));
        per_asset_bounds.insert("B".to_string(), (0.7, 1.0));
        let constraints = OptimizationConstraints {
            per_asset_bounds,
            ..Default::default()
        };
        let results = optimize(
            &assumptions,
            RunType::Mvp,
            &constraints,
            None,
            SolverOptions::default(),
            None,
        )
        .unwrap();
        assert_eq!(results[0].status, SolverStatus::Infeasible);
    }

    #[test]
    fn turnover_cap_without_prev_weights_is_dropped_with_warning() {
        let assumptions = two_asset_assumptions();
        let constraints = OptimizationConstraints {
            turnover_cap: Some(0.1),
            ..Default::default()
        };
        let results = optimize(
            &assumptions,
            RunType::Mvp,
            &constraints,
            None,
            SolverOptions::default(),
            None,
        )
        .unwrap();
        assert_eq!(results[0].status, SolverStatus::Success);
        assert!(results[0].warnings.iter().any(|w| w.contains("turnover")));
    }

    #[test]
    fn frontier_series_produces_requested_point_count() {
        let assumptions = two_asset_assumptions();
        let mut options = SolverOptions::default();
        options.frontier_points = 5;
        let results = optimize(
            &assumptions,
            RunType::FrontierSeries,
            &OptimizationConstraints::default(),
            None,
            options,
            Some("series-1".to_string()),
        )
        .unwrap();
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.series_id.as_deref() == Some("series-1")));
    }
}
