//! Shared linear-algebra foundation used by more than one component:
//! symmetrization, the PSD floor check, nearest-PSD repair, and
//! covariance/correlation conversion.

use nalgebra::{DMatrix, DVector, SymmetricEigen};

/// Σ ← (Σ + Σᵀ) / 2.
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    (m + m.transpose()) * 0.5
}

/// Frobenius norm, used to scale the PSD floor tolerance (ε·‖Σ‖).
pub fn frobenius_norm(m: &DMatrix<f64>) -> f64 {
    m.iter().map(|v| v * v).sum::<f64>().sqrt()
}

const PSD_EPS: f64 = 1e-10;

/// Result of checking whether a covariance matrix is positive semi-definite
/// within tolerance.
pub struct PsdCheck {
    pub min_eigenvalue: f64,
    pub passed: bool,
}

pub fn check_psd(sigma: &DMatrix<f64>) -> PsdCheck {
    let eig = SymmetricEigen::new(sigma.clone());
    let min_eigenvalue = eig.eigenvalues.iter().cloned().fold(f64::INFINITY, f64::min);
    let tolerance = -PSD_EPS * frobenius_norm(sigma);
    PsdCheck {
        min_eigenvalue,
        passed: min_eigenvalue >= tolerance,
    }
}

/// Nearest-PSD repair: clip negative eigenvalues to zero and reconstruct
/// Σ′ = Q·diag(max(λ,0))·Qᵀ, then re-symmetrize.
///
/// Returns the repaired matrix and the original (pre-repair) minimum
/// eigenvalue, which callers attach to the repair note.
pub fn nearest_psd_repair(sigma: &DMatrix<f64>) -> (DMatrix<f64>, f64) {
    let eig = SymmetricEigen::new(sigma.clone());
    let original_min = eig.eigenvalues.iter().cloned().fold(f64::INFINITY, f64::min);

    let clipped: DVector<f64> = eig.eigenvalues.map(|lambda| lambda.max(0.0));
    let q = &eig.eigenvectors;
    let reconstructed = q * DMatrix::from_diagonal(&clipped) * q.transpose();

    (symmetrize(&reconstructed), original_min)
}

/// σ = sqrt(diag(Σ)).
pub fn stdev_from_cov(sigma: &DMatrix<f64>) -> DVector<f64> {
    DVector::from_iterator(sigma.nrows(), (0..sigma.nrows()).map(|i| sigma[(i, i)].max(0.0).sqrt()))
}

/// ρᵢⱼ = Σᵢⱼ / (σᵢσⱼ), with diag forced to exactly 1 and values clipped to
/// [-1, 1].
pub fn cov_to_corr(sigma: &DMatrix<f64>, sigma_diag: &DVector<f64>) -> DMatrix<f64> {
    let n = sigma.nrows();
    let mut corr = DMatrix::zeros(n, n);
    for i in 0..n {
        for j in 0..n {
            if i == j {
                corr[(i, j)] = 1.0;
                continue;
            }
            let denom = sigma_diag[i] * sigma_diag[j];
            let value = if denom > 0.0 { sigma[(i, j)] / denom } else { 0.0 };
            corr[(i, j)] = value.clamp(-1.0, 1.0);
        }
    }
    corr
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn symmetrize_fixes_small_asymmetry() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.3, 1.0]);
        let s = symmetrize(&m);
        assert_relative_eq!(s[(0, 1)], s[(1, 0)], epsilon = 1e-12);
    }

    #[test]
    fn psd_check_passes_for_identity() {
        let m = DMatrix::<f64>::identity(3, 3);
        let check = check_psd(&m);
        assert!(check.passed);
        assert_relative_eq!(check.min_eigenvalue, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn nearest_psd_repair_clips_negative_eigenvalue() {
        // A symmetric indefinite matrix with one negative eigenvalue.
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        let check = check_psd(&m);
        assert!(!check.passed);

        let (repaired, original_min) = nearest_psd_repair(&m);
        assert!(original_min < 0.0);
        let repaired_check = check_psd(&repaired);
        assert!(repaired_check.passed);
        // Repaired matrix stays symmetric.
        assert_relative_eq!(repaired[(0, 1)], repaired[(1, 0)], epsilon = 1e-9);
    }

    #[test]
    fn cov_to_corr_has_unit_diagonal() {
        let sigma = DMatrix::from_row_slice(2, 2, &[0.04, 0.01, 0.01, 0.09]);
        let sd = stdev_from_cov(&sigma);
        let corr = cov_to_corr(&sigma, &sd);
        assert_relative_eq!(corr[(0, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(corr[(1, 1)], 1.0, epsilon = 1e-12);
        assert!(corr[(0, 1)].abs() <= 1.0);
    }
}
