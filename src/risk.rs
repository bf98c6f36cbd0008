//! Risk Kernel: the pure-function primitives layer shared by the Screener,
//! Optimizer, and Drift Analyzer, and consumed externally by the backtest
//! loop. Every function here is a pure function of its arguments — no
//! state, no I/O, no allocation retained across calls.

use nalgebra::DMatrix;
use statrs::statistics::{Data, OrderStatistics};

use crate::error::{CoreError, CoreResult};

/// wᵀΣw.
pub fn portfolio_variance(weights: &[f64], sigma: &DMatrix<f64>) -> f64 {
    let n = weights.len();
    let mut variance = 0.0;
    for i in 0..n {
        let mut row_sum = 0.0;
        for j in 0..n {
            row_sum += sigma[(i, j)] * weights[j];
        }
        variance += weights[i] * row_sum;
    }
    variance
}

/// √(wᵀΣw).
pub fn portfolio_vol(weights: &[f64], sigma: &DMatrix<f64>) -> f64 {
    portfolio_variance(weights, sigma).max(0.0).sqrt()
}

/// Marginal, component, and percent contributions to portfolio risk.
/// Asserts the documented invariants hold within 1e-6; since the
/// construction is algebraically exact this only guards against a caller
/// passing a `sigma_p` that does not actually correspond to `w`/`sigma`.
pub fn risk_decomposition(
    weights: &[f64],
    sigma: &DMatrix<f64>,
    sigma_p: f64,
) -> CoreResult<crate::types::RiskDecomposition> {
    if sigma_p <= 0.0 {
        return Err(CoreError::numerical(
            "risk decomposition undefined for zero portfolio volatility",
        ));
    }
    let n = weights.len();
    let mut mcr = vec![0.0; n];
    for i in 0..n {
        let mut row_sum = 0.0;
        for j in 0..n {
            row_sum += sigma[(i, j)] * weights[j];
        }
        mcr[i] = row_sum / sigma_p;
    }
    let crc: Vec<f64> = weights.iter().zip(&mcr).map(|(w, m)| w * m).collect();
    let prc: Vec<f64> = crc.iter().map(|c| c / sigma_p).collect();

    let crc_sum: f64 = crc.iter().sum();
    let prc_sum: f64 = prc.iter().sum();
    if (crc_sum - sigma_p).abs() > 1e-6 {
        return Err(CoreError::numerical(format!(
            "risk decomposition invariant violated: sum(CRC)={crc_sum} != sigma_p={sigma_p}"
        )));
    }
    if (prc_sum - 1.0).abs() > 1e-6 {
        return Err(CoreError::numerical(format!(
            "risk decomposition invariant violated: sum(PRC)={prc_sum} != 1"
        )));
    }

    Ok(crate::types::RiskDecomposition { mcr, crc, prc })
}

/// HHI(w) = Σwᵢ².
pub fn hhi(weights: &[f64]) -> f64 {
    weights.iter().map(|w| w * w).sum()
}

/// 1/HHI(w). Undefined (returns `None`) only when `hhi == 0`, which cannot
/// happen for a weight vector that sums to 1 unless every weight is zero.
pub fn effective_n(weights: &[f64]) -> Option<f64> {
    let h = hhi(weights);
    if h <= 0.0 {
        None
    } else {
        Some(1.0 / h)
    }
}

/// V₀ = 1, Vₜ = Vₜ₋₁·(1 + rₜ), using simple returns unconditionally.
pub fn wealth_index(simple_returns: &[f64]) -> Vec<f64> {
    let mut wealth = Vec::with_capacity(simple_returns.len() + 1);
    wealth.push(1.0);
    for &r in simple_returns {
        let prev = *wealth.last().unwrap();
        wealth.push(prev * (1.0 + r));
    }
    wealth
}

/// drawdown(V) = V / cummax(V) - 1, a value in (-∞, 0] at every point.
pub fn drawdown(wealth: &[f64]) -> Vec<f64> {
    let mut running_max = f64::MIN;
    wealth
        .iter()
        .map(|&v| {
            running_max = running_max.max(v);
            v / running_max - 1.0
        })
        .collect()
}

/// min(drawdown), reported as the (negative) trough.
pub fn max_drawdown(drawdown_series: &[f64]) -> f64 {
    drawdown_series.iter().cloned().fold(0.0, f64::min)
}

fn validate_alpha(alpha: f64) -> CoreResult<()> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(CoreError::invalid_input(format!(
            "confidence level alpha must be in (0,1), got {alpha}"
        )));
    }
    Ok(())
}

/// historical_var(r, α) = -quantile(r, α).
pub fn historical_var(returns: &[f64], alpha: f64) -> CoreResult<f64> {
    validate_alpha(alpha)?;
    if returns.is_empty() {
        return Err(CoreError::invalid_input(
            "historical_var requires a non-empty return series",
        ));
    }
    let mut data = Data::new(returns.to_vec());
    let q = data.quantile(alpha);
    Ok(-q)
}

/// cvar(r, α) = -mean(r | r <= quantile(r, α)).
pub fn cvar(returns: &[f64], alpha: f64) -> CoreResult<f64> {
    validate_alpha(alpha)?;
    if returns.is_empty() {
        return Err(CoreError::invalid_input("cvar requires a non-empty return series"));
    }
    let mut data = Data::new(returns.to_vec());
    let q = data.quantile(alpha);
    let tail: Vec<f64> = returns.iter().cloned().filter(|&r| r <= q).collect();
    if tail.is_empty() {
        // Degenerate: no observation at or below the quantile (can happen
        // with very small samples). Fall back to the single worst return.
        let worst = returns.iter().cloned().fold(f64::INFINITY, f64::min);
        return Ok(-worst);
    }
    let mean_tail = tail.iter().sum::<f64>() / tail.len() as f64;
    Ok(-mean_tail)
}
