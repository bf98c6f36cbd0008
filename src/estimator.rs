//! Estimator: returns → (μ, Σ, ρ) with validation and PSD repair.

use nalgebra::{DMatrix, DVector};

use crate::error::{CoreError, CoreResult};
use crate::linalg::{check_psd, cov_to_corr, nearest_psd_repair, stdev_from_cov, symmetrize};
use crate::types::{AssumptionSet, CovEstimator, EstimatorOptions, MuEstimator, ReturnPanel};

const DEGENERATE_VARIANCE_FLOOR: f64 = 1e-14;

fn validate_panel(panel: &ReturnPanel) -> CoreResult<()> {
    let m = panel.num_observations();
    let n = panel.num_assets();

    if n < 2 {
        return Err(CoreError::invalid_input(format!(
            "panel must contain at least 2 assets, got {n}"
        )));
    }
    if m < 2 {
        return Err(CoreError::invalid_input(format!(
            "panel must contain at least 2 observations, got {m}"
        )));
    }
    if panel.returns.nrows() != m || panel.returns.ncols() != n {
        return Err(CoreError::invalid_input(format!(
            "returns matrix shape {}x{} does not match {} dates x {} assets",
            panel.returns.nrows(),
            panel.returns.ncols(),
            m,
            n
        )));
    }
    for w in panel.dates.windows(2) {
        if w[1] <= w[0] {
            return Err(CoreError::invalid_input(
                "observation dates must be strictly ascending",
            ));
        }
    }
    if panel.returns.iter().any(|v| !v.is_finite()) {
        return Err(CoreError::invalid_input(
            "return panel contains NaN or non-finite values after alignment",
        ));
    }
    Ok(())
}

fn column_means(r: &DMatrix<f64>) -> DVector<f64> {
    let m = r.nrows() as f64;
    DVector::from_iterator(r.ncols(), (0..r.ncols()).map(|j| r.column(j).sum() / m))
}

/// Exponentially weighted mean, most recent observation at the last row.
/// weights wₜ ∝ (1/2)^((m-1-t)/h), normalized to sum to 1.
fn ewma_mean(r: &DMatrix<f64>, half_life: f64) -> DVector<f64> {
    let m = r.nrows();
    let raw_weights: Vec<f64> = (0..m)
        .map(|t| (0.5f64).powf((m as f64 - 1.0 - t as f64) / half_life))
        .collect();
    let weight_sum: f64 = raw_weights.iter().sum();
    let weights: Vec<f64> = raw_weights.iter().map(|w| w / weight_sum).collect();

    DVector::from_iterator(
        r.ncols(),
        (0..r.ncols()).map(|j| (0..m).map(|t| weights[t] * r[(t, j)]).sum()),
    )
}

fn shrinkage_mean(historical: &DVector<f64>, alpha: f64) -> DVector<f64> {
    let grand_mean = historical.sum() / historical.len() as f64;
    historical.map(|h| (1.0 - alpha) * h + alpha * grand_mean)
}

fn centered(r: &DMatrix<f64>, means: &DVector<f64>) -> DMatrix<f64> {
    let m = r.nrows();
    let mut out = r.clone();
    for t in 0..m {
        for j in 0..r.ncols() {
            out[(t, j)] -= means[j];
        }
    }
    out
}

/// Sample covariance, denominator m-1.
fn sample_covariance(r: &DMatrix<f64>) -> DMatrix<f64> {
    let m = r.nrows() as f64;
    let means = column_means(r);
    let x = centered(r, &means);
    symmetrize(&((x.transpose() * &x) / (m - 1.0)))
}

/// Population covariance, denominator m — the convention Ledoit-Wolf's
/// shrinkage-intensity derivation uses internally.
fn population_covariance(r: &DMatrix<f64>) -> DMatrix<f64> {
    let m = r.nrows() as f64;
    let means = column_means(r);
    let x = centered(r, &means);
    symmetrize(&((x.transpose() * &x) / m))
}

/// Ledoit-Wolf shrinkage toward F = (trace(S)/n)·I, analytically-derived
/// intensity (Ledoit & Wolf, 2004, constant-identity-target variant).
fn ledoit_wolf_covariance(r: &DMatrix<f64>) -> DMatrix<f64> {
    let m = r.nrows();
    let n = r.ncols();
    let means = column_means(r);
    let x = centered(r, &means);
    let s = population_covariance(r);

    let mu_bar = s.trace() / n as f64;
    let target = DMatrix::<f64>::identity(n, n) * mu_bar;

    // gamma_hat: squared Frobenius distance between S and the target.
    let diff = &s - &target;
    let gamma_hat: f64 = diff.iter().map(|v| v * v).sum();

    // pi_hat: average over observations of the squared Frobenius distance
    // between each rank-1 outer product and S, which estimates the sum of
    // asymptotic variances of the sample covariance entries.
    let mut pi_hat = 0.0;
    for t in 0..m {
        let row = x.row(t).clone_owned();
        let outer = row.transpose() * &row;
        let dev = &outer - &s;
        pi_hat += dev.iter().map(|v| v * v).sum::<f64>();
    }
    pi_hat /= m as f64;

    let delta = if gamma_hat > 0.0 {
        (pi_hat / (m as f64) / gamma_hat).clamp(0.0, 1.0)
    } else {
        0.0
    };

    symmetrize(&(&target * delta + &s * (1.0 - delta)))
}

fn check_degenerate(panel: &ReturnPanel) -> CoreResult<()> {
    let means = column_means(&panel.returns);
    let x = centered(&panel.returns, &means);
    let m = panel.num_observations() as f64;
    for (j, key) in panel.asset_keys.iter().enumerate() {
        let variance: f64 = x.column(j).iter().map(|v| v * v).sum::<f64>() / (m - 1.0);
        if variance < DEGENERATE_VARIANCE_FLOOR {
            return Err(CoreError::degenerate_asset(
                key.clone(),
                format!("all-zero (or near-zero) variance over the observed window: {variance:e}"),
            ));
        }
    }
    Ok(())
}

/// Builds an `AssumptionSet` from a return panel, annualizing the chosen
/// mean/covariance estimators and repairing the covariance estimate to the
/// nearest positive semi-definite matrix when needed.
pub fn estimate(
    panel: &ReturnPanel,
    rf: f64,
    mu_estimator: MuEstimator,
    cov_estimator: CovEstimator,
    options: EstimatorOptions,
) -> CoreResult<AssumptionSet> {
    validate_panel(panel)?;
    check_degenerate(panel)?;

    let m_obs = panel.num_observations() as f64;
    let annualization_factor = panel.frequency.annualization_factor();

    let historical = column_means(&panel.returns);
    let mu_period = match mu_estimator {
        MuEstimator::Historical => historical.clone(),
        MuEstimator::Ewma { half_life } => {
            let h = half_life.map(|v| v as f64).or(options.ewma_half_life).unwrap_or(m_obs / 2.0);
            ewma_mean(&panel.returns, h)
        }
        MuEstimator::Shrinkage { alpha } => {
            let a = alpha.map(|v| v as f64 / 100.0).unwrap_or(options.shrinkage_alpha);
            shrinkage_mean(&historical, a)
        }
    };

    let sigma_period = match cov_estimator {
        CovEstimator::Sample => sample_covariance(&panel.returns),
        CovEstimator::LedoitWolf => ledoit_wolf_covariance(&panel.returns),
    };

    let mu = mu_period * annualization_factor;
    let mut sigma = sigma_period * annualization_factor;
    sigma = symmetrize(&sigma);

    let psd = check_psd(&sigma);
    let (psd_repair_applied, psd_repair_note) = if psd.passed {
        (false, None)
    } else {
        let (repaired, original_min) = nearest_psd_repair(&sigma);
        sigma = repaired;
        (
            true,
            Some(format!(
                "nearest-PSD repair applied: original minimum eigenvalue {original_min:e}"
            )),
        )
    };

    let sigma_diag = stdev_from_cov(&sigma);
    let corr = cov_to_corr(&sigma, &sigma_diag);

    if mu.iter().any(|v| !v.is_finite()) || sigma.iter().any(|v| !v.is_finite()) {
        return Err(CoreError::numerical(
            "non-finite value produced during estimation",
        ));
    }

    if psd_repair_applied {
        tracing::warn!(note = %psd_repair_note.as_deref().unwrap_or(""), "PSD repair applied to covariance estimate");
    }

    Ok(AssumptionSet {
        asset_keys: panel.asset_keys.clone(),
        mu,
        sigma,
        sigma_diag,
        corr,
        annualization_factor,
        rf,
        mu_estimator,
        cov_estimator,
        psd_repair_applied,
        psd_repair_note,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Frequency, ReturnKind};
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn two_asset_panel() -> ReturnPanel {
        let dates = vec![
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 4).unwrap(),
        ];
        let returns = DMatrix::from_row_slice(
            3,
            2,
            &[0.01, -0.005, -0.02, 0.01, 0.015, 0.02],
        );
        ReturnPanel {
            asset_keys: vec!["A".to_string(), "B".to_string()],
            dates,
            returns,
            frequency: Frequency::Daily,
            return_kind: ReturnKind::Simple,
        }
    }

    #[test]
    fn seed_scenario_one_produces_finite_psd_assumption_set() {
        let panel = two_asset_panel();
        let result = estimate(
            &panel,
            0.02,
            MuEstimator::Historical,
            CovEstimator::Sample,
            EstimatorOptions::default(),
        )
        .unwrap();

        assert!(result.mu.iter().all(|v| v.is_finite()));
        let psd = check_psd(&result.sigma);
        assert!(psd.min_eigenvalue > 0.0);
        assert!(!result.psd_repair_applied);
        assert_relative_eq!(result.corr[(0, 0)], 1.0, epsilon = 1e-9);
        assert_relative_eq!(result.corr[(1, 1)], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn sigma_sym_and_corr_roundtrip_reconstructs_sigma() {
        let panel = two_asset_panel();
        let result = estimate(
            &panel,
            0.0,
            MuEstimator::Historical,
            CovEstimator::Sample,
            EstimatorOptions::default(),
        )
        .unwrap();

        let n = result.num_assets();
        for i in 0..n {
            for j in 0..n {
                let reconstructed = result.sigma_diag[i] * result.sigma_diag[j] * result.corr[(i, j)];
                assert_relative_eq!(reconstructed, result.sigma[(i, j)], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn rejects_single_observation_panel() {
        let mut panel = two_asset_panel();
        panel.dates.truncate(1);
        panel.returns = panel.returns.rows(0, 1).clone_owned();
        let result = estimate(
            &panel,
            0.0,
            MuEstimator::Historical,
            CovEstimator::Sample,
            EstimatorOptions::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_degenerate_zero_variance_asset() {
        let dates = vec![
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 4).unwrap(),
        ];
        let returns = DMatrix::from_row_slice(3, 2, &[0.01, 0.0, 0.02, 0.0, -0.01, 0.0]);
        let panel = ReturnPanel {
            asset_keys: vec!["A".to_string(), "FLAT".to_string()],
            dates,
            returns,
            frequency: Frequency::Daily,
            return_kind: ReturnKind::Simple,
        };
        let result = estimate(
            &panel,
            0.0,
            MuEstimator::Historical,
            CovEstimator::Sample,
            EstimatorOptions::default(),
        );
        assert!(matches!(result, Err(CoreError::DegenerateAsset { .. })));
    }

    #[test]
    fn ledoit_wolf_is_symmetric_and_shrinks_toward_identity_like_target() {
        let panel = two_asset_panel();
        let result = estimate(
            &panel,
            0.0,
            MuEstimator::Historical,
            CovEstimator::LedoitWolf,
            EstimatorOptions::default(),
        )
        .unwrap();
        assert_relative_eq!(result.sigma[(0, 1)], result.sigma[(1, 0)], epsilon = 1e-12);
    }
}
