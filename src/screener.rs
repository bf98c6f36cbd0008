//! Screener: ranks candidates by diversification contribution to a
//! reference portfolio, independent of whether they are already held.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};

use crate::error::{CoreError, CoreResult};
use crate::risk::{hhi, portfolio_vol};
use crate::types::{
    AssetKey, NormalizedSignals, RawSignals, ScreeningInput, ScreeningReport, ScreeningScoreRow,
};

/// Resolves `reference_weights` and a candidate key into aligned index
/// vectors/submatrices against the full `AssumptionSet` correlation and
/// covariance data.
struct ResolvedReference<'a> {
    reference_keys: Vec<&'a AssetKey>,
    w_r: DVector<f64>,
    sigma_r: DMatrix<f64>,
}

fn resolve_reference<'a>(
    assumptions: &'a crate::types::AssumptionSet,
    reference_weights: &'a HashMap<AssetKey, f64>,
) -> CoreResult<ResolvedReference<'a>> {
    let reference_keys: Vec<&AssetKey> = reference_weights.keys().collect();
    if reference_keys.is_empty() {
        return Err(CoreError::invalid_input(
            "screener requires a non-empty reference weight map",
        ));
    }
    let mut indices = Vec::with_capacity(reference_keys.len());
    for key in &reference_keys {
        let idx = assumptions.index_of(key).ok_or_else(|| {
            CoreError::invalid_input(format!("reference asset {key} not found in assumption set"))
        })?;
        indices.push(idx);
    }
    let w_r = DVector::from_iterator(
        reference_keys.len(),
        reference_keys.iter().map(|k| reference_weights[*k]),
    );
    let n = indices.len();
    let mut sigma_r = DMatrix::zeros(n, n);
    for i in 0..n {
        for j in 0..n {
            sigma_r[(i, j)] = assumptions.sigma[(indices[i], indices[j])];
        }
    }
    Ok(ResolvedReference {
        reference_keys,
        w_r,
        sigma_r,
    })
}

fn avg_corr(
    assumptions: &crate::types::AssumptionSet,
    reference_keys: &[&AssetKey],
    candidate_idx: usize,
) -> f64 {
    let n = reference_keys.len() as f64;
    let sum: f64 = reference_keys
        .iter()
        .map(|key| {
            let r_idx = assumptions.index_of(key).expect("resolved earlier");
            assumptions.corr[(candidate_idx, r_idx)]
        })
        .sum();
    sum / n
}

/// σ_pro and the pro-forma weighted-average pairwise correlation on the
/// augmented reference ∪ {c} block, pro-forma weights (1-δ)·w_R on the
/// reference plus δ on c. The average correlation is the off-diagonal
/// entries of the augmented correlation matrix weighted by the product of
/// each pair's pro-forma weights, so it reflects how much each pair actually
/// matters to the resulting portfolio rather than a plain unweighted mean.
fn pro_forma_stats(
    assumptions: &crate::types::AssumptionSet,
    reference_keys: &[&AssetKey],
    w_r: &DVector<f64>,
    candidate_idx: usize,
    delta: f64,
) -> (f64, f64, f64) {
    let n = reference_keys.len();
    let mut sigma_aug = DMatrix::zeros(n + 1, n + 1);
    let mut corr_aug = DMatrix::zeros(n + 1, n + 1);
    let mut idxs: Vec<usize> = reference_keys
        .iter()
        .map(|k| assumptions.index_of(k).expect("resolved earlier"))
        .collect();
    idxs.push(candidate_idx);
    for i in 0..=n {
        for j in 0..=n {
            sigma_aug[(i, j)] = assumptions.sigma[(idxs[i], idxs[j])];
            corr_aug[(i, j)] = assumptions.corr[(idxs[i], idxs[j])];
        }
    }
    let mut w_pro = vec![0.0; n + 1];
    for i in 0..n {
        w_pro[i] = (1.0 - delta) * w_r[i];
    }
    w_pro[n] = delta;

    let sigma_pro = portfolio_vol(&w_pro, &sigma_aug);
    let hhi_pro = hhi(&w_pro);

    let mut weighted_corr_sum = 0.0;
    let mut weight_sum = 0.0;
    for i in 0..=n {
        for j in 0..=n {
            if i == j {
                continue;
            }
            let pair_weight = w_pro[i] * w_pro[j];
            weighted_corr_sum += pair_weight * corr_aug[(i, j)];
            weight_sum += pair_weight;
        }
    }
    let corr_pro = if weight_sum > 0.0 {
        weighted_corr_sum / weight_sum
    } else {
        0.0
    };

    (sigma_pro, hhi_pro, corr_pro)
}

fn gap_score(
    metadata: &HashMap<AssetKey, crate::types::AssetMetadata>,
    candidate: &AssetKey,
    reference_weights: &HashMap<AssetKey, f64>,
    threshold: f64,
) -> f64 {
    let candidate_meta = match metadata.get(candidate) {
        Some(m) => m,
        None => return 0.0,
    };

    let mut class_weight = 0.0;
    let mut sector_present = false;
    for (key, weight) in reference_weights {
        if let Some(meta) = metadata.get(key) {
            if meta.class == candidate_meta.class {
                class_weight += weight;
                if meta.sector.is_some() && meta.sector == candidate_meta.sector {
                    sector_present = true;
                }
            }
        }
    }

    if class_weight < threshold {
        1.0
    } else if !sector_present {
        0.5
    } else {
        0.0
    }
}

/// Min-max normalization over the candidate set, with the degenerate-range
/// fallback (all candidates receive 0.5 and the event is recorded).
fn normalize(values: &[f64], invert: bool, events: &mut Vec<String>, label: &str) -> Vec<f64> {
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if (max - min).abs() < 1e-12 {
        events.push(format!(
            "{label} had a degenerate range (all candidates equal); normalized to 0.5"
        ));
        return vec![0.5; values.len()];
    }
    values
        .iter()
        .map(|&v| {
            let n = (v - min) / (max - min);
            if invert {
                1.0 - n
            } else {
                n
            }
        })
        .collect()
}

/// Describes what `gap_score` found, for use in a candidate's explanation.
fn gap_description(gap: f64) -> Option<&'static str> {
    if gap >= 1.0 {
        Some("fills an asset-class gap the reference portfolio currently has none of")
    } else if gap >= 0.5 {
        Some("fills a sector gap within an asset class the reference already holds")
    } else {
        None
    }
}

/// Runs the full screening pipeline for every candidate in `input` against
/// `assumptions`, returning ranked rows plus any warnings raised along the
/// way.
pub fn screen(
    assumptions: &crate::types::AssumptionSet,
    input: &ScreeningInput,
) -> CoreResult<ScreeningReport> {
    input
        .options
        .signal_weights
        .validate()
        .map_err(CoreError::invalid_input)?;

    if input.candidate_keys.is_empty() {
        return Err(CoreError::invalid_input(
            "screener requires at least one candidate",
        ));
    }

    let resolved = resolve_reference(assumptions, &input.reference_weights)?;
    let hhi_r = hhi(resolved.w_r.as_slice());

    let mut raw_rows = Vec::with_capacity(input.candidate_keys.len());
    for candidate in &input.candidate_keys {
        let candidate_idx = assumptions.index_of(candidate).ok_or_else(|| {
            CoreError::invalid_input(format!("candidate {candidate} not found in assumption set"))
        })?;

        let corr_signal = avg_corr(assumptions, &resolved.reference_keys, candidate_idx);

        let sigma_reference = portfolio_vol(resolved.w_r.as_slice(), &resolved.sigma_r);
        let (sigma_pro, hhi_pro, corr_pro) = pro_forma_stats(
            assumptions,
            &resolved.reference_keys,
            &resolved.w_r,
            candidate_idx,
            input.options.add_weight,
        );
        let mvr_signal = sigma_reference - sigma_pro;
        let hhi_red_signal = hhi_r - hhi_pro;

        let gap = gap_score(
            &input.metadata,
            candidate,
            &input.reference_weights,
            input.options.gap_class_threshold,
        );

        raw_rows.push((
            candidate.clone(),
            RawSignals {
                avg_corr: corr_signal,
                mvr: mvr_signal,
                gap,
                hhi_red: hhi_red_signal,
            },
            hhi_r,
            hhi_pro,
            corr_pro,
        ));
    }

    let mut events = Vec::new();
    let avg_corr_vals: Vec<f64> = raw_rows.iter().map(|r| r.1.avg_corr).collect();
    let mvr_vals: Vec<f64> = raw_rows.iter().map(|r| r.1.mvr).collect();
    let hhi_red_vals: Vec<f64> = raw_rows.iter().map(|r| r.1.hhi_red).collect();

    let avg_corr_norm = normalize(&avg_corr_vals, true, &mut events, "AvgCorr");
    let mvr_norm = normalize(&mvr_vals, false, &mut events, "MVR");
    let hhi_red_norm = normalize(&hhi_red_vals, false, &mut events, "HHIRed");

    let weights = input.options.signal_weights;
    let mut scored: Vec<(AssetKey, RawSignals, NormalizedSignals, f64, f64, f64, f64)> =
        Vec::with_capacity(raw_rows.len());

    for (i, (candidate, raw, hhi_r_val, hhi_pro, corr_pro)) in raw_rows.into_iter().enumerate() {
        let normalized = NormalizedSignals {
            avg_corr: avg_corr_norm[i],
            mvr: mvr_norm[i],
            gap: raw.gap,
            hhi_red: hhi_red_norm[i],
        };
        let composite = weights.avg_corr * normalized.avg_corr
            + weights.mvr * normalized.mvr
            + weights.gap * normalized.gap
            + weights.hhi_red * normalized.hhi_red;
        scored.push((candidate, raw, normalized, composite, hhi_r_val, hhi_pro, corr_pro));
    }

    scored.sort_by(|a, b| {
        b.3.partial_cmp(&a.3)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    let top_k = input.options.top_k;
    let mut rows = Vec::with_capacity(scored.len());
    for (rank, (candidate, raw, normalized, composite, hhi_r_val, hhi_pro, corr_pro)) in
        scored.into_iter().enumerate()
    {
        let explanation = if rank < top_k {
            let effective_n_before = 1.0 / hhi_r_val;
            let effective_n_after = 1.0 / hhi_pro;
            let gap_clause = match gap_description(raw.gap) {
                Some(text) => format!(" It also {text}."),
                None => String::new(),
            };
            Some(format!(
                "{candidate}: average pairwise correlation to the reference is {:.3}; \
                 at a {:.1}% pro-forma weight the combined portfolio's average pairwise \
                 correlation would be {:.3} and effective N would move from {:.2} to {:.2}.{}",
                raw.avg_corr,
                input.options.add_weight * 100.0,
                corr_pro,
                effective_n_before,
                effective_n_after,
                gap_clause,
            ))
        } else {
            None
        };

        rows.push(ScreeningScoreRow {
            candidate,
            raw,
            normalized,
            composite,
            rank: rank + 1,
            explanation,
        });
    }

    for e in &events {
        tracing::warn!(event = %e, "screener normalization degenerate range");
    }

    Ok(ScreeningReport { rows, warnings: events })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        AssetMetadata, CovEstimator, MuEstimator, ScreenerOptions,
    };
    use nalgebra::DMatrix as M;

    fn three_asset_assumptions() -> crate::types::AssumptionSet {
        let sigma = M::from_row_slice(
            3,
            3,
            &[
                0.04, 0.01, 0.00, //
                0.01, 0.09, 0.00, //
                0.00, 0.00, 0.02, //
            ],
        );
        let sigma_diag = crate::linalg::stdev_from_cov(&sigma);
        let corr = crate::linalg::cov_to_corr(&sigma, &sigma_diag);
        crate::types::AssumptionSet {
            asset_keys: vec!["A".into(), "B".into(), "C".into()],
            mu: nalgebra::DVector::from_vec(vec![0.05, 0.07, 0.03]),
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
    fn low_correlation_candidate_ranks_above_high_correlation_one() {
        let assumptions = three_asset_assumptions();
        let mut reference_weights = HashMap::new();
        reference_weights.insert("A".to_string(), 0.6);
        reference_weights.insert("B".to_string(), 0.4);

        let input = ScreeningInput {
            reference_weights,
            candidate_keys: vec!["C".to_string()],
            metadata: HashMap::new(),
            options: ScreenerOptions::default(),
        };

        let report = screen(&assumptions, &input).unwrap();
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].rank, 1);
    }

    #[test]
    fn gap_score_is_one_when_class_absent() {
        let assumptions = three_asset_assumptions();
        let mut reference_weights = HashMap::new();
        reference_weights.insert("A".to_string(), 1.0);

        let mut metadata = HashMap::new();
        metadata.insert(
            "A".to_string(),
            AssetMetadata {
                class: "equity".to_string(),
                sector: Some("tech".to_string()),
            },
        );
        metadata.insert(
            "B".to_string(),
            AssetMetadata {
                class: "bond".to_string(),
                sector: None,
            },
        );

        let input = ScreeningInput {
            reference_weights,
            candidate_keys: vec!["B".to_string()],
            metadata,
            options: ScreenerOptions::default(),
        };

        let report = screen(&assumptions, &input).unwrap();
        assert_eq!(report.rows[0].raw.gap, 1.0);
        assert!(report.rows[0]
            .explanation
            .as_ref()
            .unwrap()
            .contains("asset-class gap"));
    }

    #[test]
    fn degenerate_range_falls_back_to_half_and_is_recorded() {
        let assumptions = three_asset_assumptions();
        let mut reference_weights = HashMap::new();
        reference_weights.insert("A".to_string(), 1.0);

        let input = ScreeningInput {
            reference_weights,
            candidate_keys: vec!["B".to_string(), "C".to_string()],
            metadata: HashMap::new(),
            options: ScreenerOptions::default(),
        };

        // Only asserts this doesn't error; a true degenerate-range case
        // requires two candidates with identical signal values, which this
        // fixture's asymmetric covariance doesn't produce. Coverage for the
        // fallback itself lives in `normalize`'s direct behavior below.
        let report = screen(&assumptions, &input).unwrap();
        assert_eq!(report.rows.len(), 2);
    }

    #[test]
    fn normalize_degenerate_range_yields_half_for_all() {
        let mut events = Vec::new();
        let out = normalize(&[0.5, 0.5, 0.5], false, &mut events, "test");
        assert_eq!(out, vec![0.5, 0.5, 0.5]);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn ties_broken_by_ascending_candidate_key() {
        let mut events = Vec::new();
        let _ = normalize(&[1.0, 2.0], false, &mut events, "test");
        // Composite-tie ordering is covered at the `screen()` sort-key
        // level; this just documents the comparator's tie-break clause.
        let mut rows = vec![("z".to_string(), 1.0), ("a".to_string(), 1.0)];
        rows.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        assert_eq!(rows[0].0, "a");
    }
}
