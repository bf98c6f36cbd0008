//! Drift Analyzer: wealth-growth renormalization of target weights against a
//! price panel, independent of the return kind used upstream.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::error::{CoreError, CoreResult};
use crate::types::{AssetKey, DriftOptions, DriftReport, DriftRow};

/// A dense price panel indexed by date and asset key, as supplied by the
/// price panel provider.
#[derive(Debug, Clone)]
pub struct PricePanel {
    pub prices: HashMap<(AssetKey, NaiveDate), f64>,
}

impl PricePanel {
    fn price_at(&self, asset: &AssetKey, date: NaiveDate) -> CoreResult<f64> {
        let price = self
            .prices
            .get(&(asset.clone(), date))
            .copied()
            .ok_or_else(|| CoreError::numerical(format!("missing price for {asset} at {date}")))?;
        if price <= 0.0 {
            return Err(CoreError::numerical(format!(
                "non-positive price for {asset} at {date}: {price}"
            )));
        }
        Ok(price)
    }
}

fn explain(asset: &AssetKey, target: f64, current: f64) -> String {
    let delta_pp = (current - target) * 100.0;
    format!(
        "{asset} has drifted from {:.1}% to {:.1}% ({}{:.1} pp) due to price appreciation since last rebalance.",
        target * 100.0,
        current * 100.0,
        if delta_pp >= 0.0 { "+" } else { "" },
        delta_pp,
    )
}

/// Renormalizes target weights forward from `t0` to `t1` by price growth and
/// reports any asset whose implied current weight has drifted past `theta`.
pub fn check_drift(
    run_key: impl Into<String>,
    target_weights: &HashMap<AssetKey, f64>,
    prices: &PricePanel,
    t0: NaiveDate,
    t1: NaiveDate,
    options: DriftOptions,
) -> CoreResult<DriftReport> {
    if target_weights.is_empty() {
        return Err(CoreError::invalid_input(
            "check_drift requires a non-empty target weight map",
        ));
    }

    let mut assets: Vec<&AssetKey> = target_weights.keys().collect();
    assets.sort();

    let mut grown: Vec<(AssetKey, f64, f64)> = Vec::with_capacity(assets.len());
    for asset in &assets {
        let target = target_weights[*asset];
        let p0 = prices.price_at(asset, t0)?;
        let p1 = prices.price_at(asset, t1)?;
        let growth = p1 / p0;
        grown.push(((*asset).clone(), target, target * growth));
    }

    let denom: f64 = grown.iter().map(|(_, _, g)| g).sum();
    if denom.abs() < 1e-15 {
        return Err(CoreError::numerical(
            "sum of grown target weights is zero; implied weights undefined",
        ));
    }

    let mut rows = Vec::with_capacity(grown.len());
    let mut explanations = Vec::new();
    let mut any_breach = false;

    for (asset, target, grown_weight) in grown {
        let current = grown_weight / denom;
        let abs_delta = (current - target).abs();
        let breached = abs_delta > options.threshold;
        if breached {
            any_breach = true;
            explanations.push(explain(&asset, target, current));
        }
        rows.push(DriftRow {
            asset,
            target,
            current,
            abs_delta,
            breached,
        });
    }

    Ok(DriftReport {
        run_key: run_key.into(),
        check_date: t1,
        threshold: options.threshold,
        rows,
        any_breach,
        explanations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panel(a0: f64, b0: f64, a1: f64, b1: f64, t0: NaiveDate, t1: NaiveDate) -> PricePanel {
        let mut prices = HashMap::new();
        prices.insert(("A".to_string(), t0), a0);
        prices.insert(("B".to_string(), t0), b0);
        prices.insert(("A".to_string(), t1), a1);
        prices.insert(("B".to_string(), t1), b1);
        PricePanel { prices }
    }

    #[test]
    fn seed_scenario_no_breach_at_moderate_appreciation() {
        let t0 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let t1 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let prices = panel(100.0, 100.0, 120.0, 100.0, t0, t1);
        let mut targets = HashMap::new();
        targets.insert("A".to_string(), 0.5);
        targets.insert("B".to_string(), 0.5);

        let report = check_drift("run-1", &targets, &prices, t0, t1, DriftOptions::default()).unwrap();
        assert!(!report.any_breach);

        let row_a = report.rows.iter().find(|r| r.asset == "A").unwrap();
        assert!((row_a.current - 0.545_454_545_45).abs() < 1e-6);
        assert!((row_a.abs_delta - 0.045_454_545_45).abs() < 1e-6);
    }

    #[test]
    fn seed_scenario_breach_at_large_appreciation() {
        let t0 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let t1 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let prices = panel(100.0, 100.0, 150.0, 100.0, t0, t1);
        let mut targets = HashMap::new();
        targets.insert("A".to_string(), 0.5);
        targets.insert("B".to_string(), 0.5);

        let report = check_drift("run-1", &targets, &prices, t0, t1, DriftOptions::default()).unwrap();
        assert!(report.any_breach);
        let row_a = report.rows.iter().find(|r| r.asset == "A").unwrap();
        assert!((row_a.current - 0.6).abs() < 1e-9);
        assert!(report.explanations.iter().any(|e| e.contains("+10.0 pp")));
    }

    #[test]
    fn implied_weights_sum_to_one_and_deltas_are_nonnegative() {
        let t0 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let t1 = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let prices = panel(80.0, 120.0, 95.0, 110.0, t0, t1);
        let mut targets = HashMap::new();
        targets.insert("A".to_string(), 0.3);
        targets.insert("B".to_string(), 0.7);

        let report = check_drift("run-2", &targets, &prices, t0, t1, DriftOptions::default()).unwrap();
        let sum: f64 = report.rows.iter().map(|r| r.current).sum();
        assert!((sum - 1.0).abs() < 1e-10);
        assert!(report.rows.iter().all(|r| r.abs_delta >= 0.0));
    }

    #[test]
    fn missing_price_is_an_error_naming_the_asset() {
        let t0 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let t1 = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let mut prices = HashMap::new();
        prices.insert(("A".to_string(), t0), 100.0);
        let panel = PricePanel { prices };
        let mut targets = HashMap::new();
        targets.insert("A".to_string(), 1.0);

        let result = check_drift("run-3", &targets, &panel, t0, t1, DriftOptions::default());
        assert!(matches!(result, Err(CoreError::Numerical(msg)) if msg.contains("A")));
    }

    #[test]
    fn non_positive_price_is_an_error() {
        let t0 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let t1 = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let mut prices = HashMap::new();
        prices.insert(("A".to_string(), t0), 100.0);
        prices.insert(("A".to_string(), t1), -5.0);
        let panel = PricePanel { prices };
        let mut targets = HashMap::new();
        targets.insert("A".to_string(), 1.0);

        let result = check_drift("run-4", &targets, &panel, t0, t1, DriftOptions::default());
        assert!(result.is_err());
    }
}
