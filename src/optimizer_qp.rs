//! Constraint assembly and the single `clarabel` QP solve shared by every
//! Optimizer run type. Every run type reduces to:
//!
//!   minimize  wᵀΣw
//!   subject to a stack of linear equality/inequality rows
//!
//! Equalities are encoded as two opposing inequality rows (`Ax <= b` and
//! `-Ax <= -b`) so the whole problem lives under a single
//! `NonnegativeConeT`, the only cone this corpus is seen using directly.
//! Leverage and turnover L1-norm caps are linearized with slack variables
//! (`|x| <= t  <=>  -t <= x <= t`).

use clarabel::algebra::*;
use clarabel::solver::*;
use nalgebra::DMatrix;

use crate::error::{CoreError, CoreResult};
use crate::types::{AssetKey, OptimizationConstraints, SolverOptions};

/// Per-asset effective (lo, hi) bounds after folding in long_only,
/// uniform bounds, per-asset overrides, and the concentration cap.
pub fn resolve_bounds(
    asset_keys: &[AssetKey],
    constraints: &OptimizationConstraints,
) -> Vec<(f64, f64)> {
    asset_keys
        .iter()
        .map(|key| {
            let mut lo = if constraints.long_only { 0.0 } else { f64::NEG_INFINITY };
            let mut hi = f64::INFINITY;
            if let Some(v) = constraints.min_weight {
                lo = lo.max(v);
            }
            if let Some(v) = constraints.max_weight {
                hi = hi.min(v);
            }
            if let Some(&(asset_lo, asset_hi)) = constraints.per_asset_bounds.get(key) {
                lo = lo.max(asset_lo);
                hi = hi.min(asset_hi);
            }
            if let Some(c) = constraints.concentration_cap {
                lo = lo.max(-c);
                hi = hi.min(c);
            }
            (lo, hi)
        })
        .collect()
}

struct RowBuilder {
    rows: Vec<usize>,
    cols: Vec<usize>,
    vals: Vec<f64>,
    b: Vec<f64>,
    next_row: usize,
}

impl RowBuilder {
    fn new() -> Self {
        Self {
            rows: Vec::new(),
            cols: Vec::new(),
            vals: Vec::new(),
            b: Vec::new(),
            next_row: 0,
        }
    }

    /// Adds one row encoding `sum(coeffs[i].1 * x[coeffs[i].0]) <= bound`.
    fn push(&mut self, coeffs: &[(usize, f64)], bound: f64) {
        for &(col, val) in coeffs {
            self.rows.push(self.next_row);
            self.cols.push(col);
            self.vals.push(val);
        }
        self.b.push(bound);
        self.next_row += 1;
    }

    /// Adds both directions of an equality row (`= bound`).
    fn push_equality(&mut self, coeffs: &[(usize, f64)], bound: f64) {
        self.push(coeffs, bound);
        let negated: Vec<(usize, f64)> = coeffs.iter().map(|&(c, v)| (c, -v)).collect();
        self.push(&negated, -bound);
    }
}

/// An assembled quadratic program ready for `clarabel`.
pub struct QpProblem {
    pub n_total: usize,
    pub n_assets: usize,
    pub p: DMatrix<f64>,
    pub q: Vec<f64>,
    pub a_rows: usize,
    pub a_triplets: (Vec<usize>, Vec<usize>, Vec<f64>),
    pub b: Vec<f64>,
}

/// Builds the QP for MVP / FRONTIER_POINT (the only two distinct convex
/// forms — FRONTIER_SERIES is FRONTIER_POINT iterated, TANGENCY is
/// FRONTIER_POINT evaluated along a golden-section search over R*, see
/// `optimizer.rs`).
pub fn build_problem(
    sigma: &DMatrix<f64>,
    mu: &nalgebra::DVector<f64>,
    bounds: &[(f64, f64)],
    constraints: &OptimizationConstraints,
    prev_weights: Option<&[f64]>,
    target_return: Option<f64>,
) -> CoreResult<QpProblem> {
    let n = sigma.nrows();
    let leverage_active = constraints.leverage_cap.is_some();
    let turnover_active = constraints.turnover_cap.is_some() && prev_weights.is_some();

    let lev_offset = n;
    let lev_n = if leverage_active { n } else { 0 };
    let turn_offset = lev_offset + lev_n;
    let turn_n = if turnover_active { n } else { 0 };
    let n_total = n + lev_n + turn_n;

    let mut p = DMatrix::zeros(n_total, n_total);
    for i in 0..n {
        for j in 0..n {
            p[(i, j)] = 2.0 * sigma[(i, j)];
        }
    }
    let q = vec![0.0; n_total];

    let mut rb = RowBuilder::new();

    // 1^T w = 1
    let budget: Vec<(usize, f64)> = (0..n).map(|i| (i, 1.0)).collect();
    rb.push_equality(&budget, 1.0);

    // w^T mu = R*
    if let Some(r_star) = target_return {
        let target_row: Vec<(usize, f64)> = (0..n).map(|i| (i, mu[i])).collect();
        rb.push_equality(&target_row, r_star);
    }

    // Per-asset bounds.
    for (i, &(lo, hi)) in bounds.iter().enumerate() {
        if hi.is_finite() {
            rb.push(&[(i, 1.0)], hi);
        }
        if lo.is_finite() {
            rb.push(&[(i, -1.0)], -lo);
        }
    }

    // Leverage cap: -t_i <= w_i <= t_i, sum(t_i) <= L.
    if let Some(l) = constraints.leverage_cap {
        for i in 0..n {
            let t_i = lev_offset + i;
            rb.push(&[(i, 1.0), (t_i, -1.0)], 0.0);
            rb.push(&[(i, -1.0), (t_i, -1.0)], 0.0);
        }
        let sum_t: Vec<(usize, f64)> = (0..n).map(|i| (lev_offset + i, 1.0)).collect();
        rb.push(&sum_t, l);
    }

    // Turnover cap: -s_i <= w_i - prev_i <= s_i, sum(s_i) <= T.
    if let (Some(t_cap), Some(prev)) = (constraints.turnover_cap, prev_weights) {
        if prev.len() != n {
            return Err(CoreError::invalid_input(format!(
                "prev_weights length {} does not match {} assets",
                prev.len(),
                n
            )));
        }
        for i in 0..n {
            let s_i = turn_offset + i;
            rb.push(&[(i, 1.0), (s_i, -1.0)], prev[i]);
            rb.push(&[(i, -1.0), (s_i, -1.0)], -prev[i]);
        }
        let sum_s: Vec<(usize, f64)> = (0..n).map(|i| (turn_offset + i, 1.0)).collect();
        rb.push(&sum_s, t_cap);
    }

    Ok(QpProblem {
        n_total,
        n_assets: n,
        p,
        q,
        a_rows: rb.next_row,
        a_triplets: (rb.rows, rb.cols, rb.vals),
        b: rb.b,
    })
}

pub struct QpSolution {
    pub weights: Vec<f64>,
    pub status_tag: String,
    pub solved: bool,
}

/// Invokes `clarabel`'s interior-point solver on an assembled problem.
pub fn solve(problem: &QpProblem, options: &SolverOptions) -> CoreResult<QpSolution> {
    let p_rows: Vec<Vec<f64>> = (0..problem.n_total)
        .map(|i| (0..problem.n_total).map(|j| problem.p[(i, j)]).collect())
        .collect();
    let p_matrix = CscMatrix::from(&p_rows);

    let (rows, cols, vals) = &problem.a_triplets;
    let a_matrix =
        CscMatrix::new_from_triplets(problem.a_rows, problem.n_total, rows.clone(), cols.clone(), vals.clone());

    let cones: Vec<SupportedConeT<f64>> = vec![NonnegativeConeT(problem.a_rows)];

    let mut settings = DefaultSettings::default();
    settings.verbose = false;
    settings.max_iter = options.max_iterations as u32;
    settings.tol_feas = options.constraint_tolerance;
    settings.tol_gap_abs = options.objective_tolerance;
    settings.tol_gap_rel = options.objective_tolerance;

    let mut solver = DefaultSolver::new(&p_matrix, &problem.q, &a_matrix, &problem.b, &cones, settings);
    solver.solve();

    let status_tag = format!("{:?}", solver.solution.status);
    let solved = status_tag.to_lowercase().contains("solved");

    let weights = solver.solution.x[..problem.n_assets].to_vec();
    Ok(QpSolution {
        weights,
        status_tag,
        solved,
    })
}

/// Zero out negligible weights below `floor`, then renormalize to sum to 1.
pub fn clean_weights(weights: &[f64], floor: f64) -> Vec<f64> {
    let cleaned: Vec<f64> = weights
        .iter()
        .map(|&w| if w.abs() < floor { 0.0 } else { w })
        .collect();
    let sum: f64 = cleaned.iter().sum();
    if sum.abs() < 1e-12 {
        return cleaned;
    }
    cleaned.iter().map(|&w| w / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OptimizationConstraints;

    #[test]
    fn resolve_bounds_applies_long_only_and_uniform() {
        let constraints = OptimizationConstraints {
            long_only: true,
            max_weight: Some(0.5),
            ..Default::default()
        };
        let bounds = resolve_bounds(&["A".to_string(), "B".to_string()], &constraints);
        assert_eq!(bounds, vec![(0.0, 0.5), (0.0, 0.5)]);
    }

    #[test]
    fn clean_weights_zeros_small_and_renormalizes() {
        let w = vec![1e-9, 0.5, 0.5];
        let cleaned = clean_weights(&w, 1e-6);
        assert_eq!(cleaned[0], 0.0);
        let sum: f64 = cleaned.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn build_problem_budget_row_is_equality_pair() {
        let sigma = DMatrix::<f64>::identity(2, 2);
        let mu = nalgebra::DVector::from_vec(vec![0.05, 0.08]);
        let constraints = OptimizationConstraints::default();
        let bounds = resolve_bounds(&["A".to_string(), "B".to_string()], &constraints);
        let problem = build_problem(&sigma, &mu, &bounds, &constraints, None, None).unwrap();
        // Exactly the two budget rows, nothing else, when no bounds/caps apply.
        assert_eq!(problem.a_rows, 2);
        assert_eq!(problem.b, vec![1.0, -1.0]);
    }
}
