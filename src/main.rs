use anyhow::Result;
use chrono::NaiveDate;
use nalgebra::DMatrix;
use tracing::info;

use portfolio_core::drift::{check_drift, PricePanel};
use portfolio_core::estimator::estimate;
use portfolio_core::optimizer::optimize;
use portfolio_core::screener::screen;
use portfolio_core::types::{
    AssetMetadata, CovEstimator, DriftOptions, EstimatorOptions, Frequency, MuEstimator,
    OptimizationConstraints, ReturnKind, ReturnPanel, RunType, ScreenerOptions, ScreeningInput,
    SolverOptions,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    info!("running portfolio-core demo scenarios");
    run_examples()?;
    Ok(())
}

fn run_examples() -> Result<()> {
    let dates = vec![
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
        NaiveDate::from_ymd_opt(2024, 1, 4).unwrap(),
    ];
    let returns = DMatrix::from_row_slice(3, 2, &[0.01, -0.005, -0.02, 0.01, 0.015, 0.02]);
    let panel = ReturnPanel {
        asset_keys: vec!["AAA".to_string(), "BBB".to_string()],
        dates,
        returns,
        frequency: Frequency::Daily,
        return_kind: ReturnKind::Simple,
    };

    let assumptions = estimate(
        &panel,
        0.02,
        MuEstimator::Historical,
        CovEstimator::Sample,
        EstimatorOptions::default(),
    )?;
    info!(mu = ?assumptions.mu.as_slice(), "estimator produced assumption set");

    let mvp_constraints = OptimizationConstraints {
        long_only: true,
        ..Default::default()
    };
    let mvp = optimize(
        &assumptions,
        RunType::Mvp,
        &mvp_constraints,
        None,
        SolverOptions::default(),
        None,
    )?;
    info!(result = ?mvp[0], "minimum-variance portfolio");

    let tangency = optimize(
        &assumptions,
        RunType::Tangency,
        &OptimizationConstraints::default(),
        None,
        SolverOptions::default(),
        None,
    )?;
    info!(result = ?tangency[0], "tangency portfolio");

    let mut reference_weights = std::collections::HashMap::new();
    reference_weights.insert("AAA".to_string(), 1.0);
    let screening_input = ScreeningInput {
        reference_weights,
        candidate_keys: vec!["BBB".to_string()],
        metadata: std::collections::HashMap::from([
            (
                "AAA".to_string(),
                AssetMetadata {
                    class: "equity".to_string(),
                    sector: Some("tech".to_string()),
                },
            ),
            (
                "BBB".to_string(),
                AssetMetadata {
                    class: "bond".to_string(),
                    sector: None,
                },
            ),
        ]),
        options: ScreenerOptions::default(),
    };
    let screened = screen(&assumptions, &screening_input)?;
    info!(rows = ?screened.rows, warnings = ?screened.warnings, "screener ranking");

    let t0 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let t1 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let mut prices = std::collections::HashMap::new();
    prices.insert(("AAA".to_string(), t0), 100.0);
    prices.insert(("BBB".to_string(), t0), 100.0);
    prices.insert(("AAA".to_string(), t1), 120.0);
    prices.insert(("BBB".to_string(), t1), 100.0);
    let price_panel = PricePanel { prices };
    let mut targets = std::collections::HashMap::new();
    targets.insert("AAA".to_string(), 0.5);
    targets.insert("BBB".to_string(), 0.5);
    let drift_report = check_drift("demo-run", &targets, &price_panel, t0, t1, DriftOptions::default())?;
    info!(any_breach = drift_report.any_breach, "drift check");

    Ok(())
}
