//! Decision metrics derived from raw simulator outputs.
//!
//! Ratio metrics never fail: a degenerate denominator yields [`SENTINEL_MAX`]
//! so a minimising search simply steers away from it.

use crate::consts::{ASSET_LIFETIME_YEARS, KG_PER_TONNE, SENTINEL_MAX};
use crate::evolution::objective::{MetricValues, Objective};
use crate::simulator::RawSimulationResult;

/// Pounds spent per tonne of scope 1 carbon saved over the asset lifetime.
pub fn carbon_cost(capex: f64, carbon_balance_scope_1: f64) -> f64 {
    if capex > 0.0 {
        if carbon_balance_scope_1 > 0.0 {
            capex / (carbon_balance_scope_1 * ASSET_LIFETIME_YEARS / KG_PER_TONNE)
        } else {
            SENTINEL_MAX
        }
    } else {
        0.0
    }
}

/// Years until the yearly cost saving pays back the capex.
pub fn payback_horizon(capex: f64, cost_balance: f64) -> f64 {
    if capex > 0.0 {
        if cost_balance > 0.0 {
            capex / cost_balance
        } else {
            SENTINEL_MAX
        }
    } else {
        0.0
    }
}

/// Metrics of one scenario, measured against the site's baseline run.
pub fn site_metrics(result: &RawSimulationResult, baseline: &RawSimulationResult) -> MetricValues {
    let carbon_balance_scope_1 = baseline.scope_1_emissions - result.scope_1_emissions;
    let carbon_balance_scope_2 = baseline.scope_2_emissions - result.scope_2_emissions;
    let cost_balance = baseline.operating_cost() - result.operating_cost();

    MetricValues::from([
        (Objective::CarbonBalanceScope1, carbon_balance_scope_1),
        (Objective::CarbonBalanceScope2, carbon_balance_scope_2),
        (Objective::CostBalance, cost_balance),
        (Objective::Capex, result.capex),
        (
            Objective::PaybackHorizon,
            payback_horizon(result.capex, cost_balance),
        ),
        (Objective::AnnualisedCost, result.annualised_cost),
        (
            Objective::CarbonCost,
            carbon_cost(result.capex, carbon_balance_scope_1),
        ),
    ])
}

const ADDITIVE: [Objective; 5] = [
    Objective::CarbonBalanceScope1,
    Objective::CarbonBalanceScope2,
    Objective::CostBalance,
    Objective::Capex,
    Objective::AnnualisedCost,
];

/// Portfolio metrics: additive metrics are summed, ratios are recomputed
/// from the sums rather than summed themselves.
pub fn portfolio_metrics<'a>(sites: impl IntoIterator<Item = &'a MetricValues>) -> MetricValues {
    let mut totals = MetricValues::new();
    for site in sites {
        for objective in ADDITIVE {
            if let Some(value) = site.get(&objective) {
                *totals.entry(objective).or_insert(0.0) += value;
            }
        }
    }

    let capex = totals.get(&Objective::Capex).copied().unwrap_or(0.0);
    let cost_balance = totals.get(&Objective::CostBalance).copied().unwrap_or(0.0);
    let carbon_balance_scope_1 = totals
        .get(&Objective::CarbonBalanceScope1)
        .copied()
        .unwrap_or(0.0);
    totals.insert(
        Objective::PaybackHorizon,
        payback_horizon(capex, cost_balance),
    );
    totals.insert(
        Objective::CarbonCost,
        carbon_cost(capex, carbon_balance_scope_1),
    );
    totals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_carbon_cost() {
        assert_eq!(carbon_cost(10.0, 10.0), 50.0);
        assert_eq!(carbon_cost(10.0, 0.0), SENTINEL_MAX);
        assert_eq!(carbon_cost(10.0, -5.0), SENTINEL_MAX);
        assert_eq!(carbon_cost(0.0, 10.0), 0.0);
        assert_eq!(carbon_cost(-10.0, 10.0), 0.0);
    }

    #[test]
    fn test_payback_horizon() {
        assert_eq!(payback_horizon(10.0, 10.0), 1.0);
        assert_eq!(payback_horizon(100.0, 25.0), 4.0);
        assert_eq!(payback_horizon(10.0, 0.0), SENTINEL_MAX);
        assert_eq!(payback_horizon(10.0, -5.0), SENTINEL_MAX);
        assert_eq!(payback_horizon(0.0, 10.0), 0.0);
        assert_eq!(payback_horizon(-10.0, 10.0), 0.0);
    }

    #[test]
    fn test_site_metrics_against_baseline() {
        let baseline = RawSimulationResult {
            scope_1_emissions: 1000.0,
            scope_2_emissions: 400.0,
            total_gas_import_cost: 900.0,
            total_electricity_import_cost: 300.0,
            ..Default::default()
        };
        let retrofit = RawSimulationResult {
            capex: 2000.0,
            annualised_cost: 150.0,
            scope_1_emissions: 500.0,
            scope_2_emissions: 450.0,
            total_gas_import_cost: 400.0,
            total_electricity_import_cost: 400.0,
            ..Default::default()
        };
        let metrics = site_metrics(&retrofit, &baseline);
        assert_eq!(metrics[&Objective::CarbonBalanceScope1], 500.0);
        assert_eq!(metrics[&Objective::CarbonBalanceScope2], -50.0);
        assert_eq!(metrics[&Objective::CostBalance], 400.0);
        assert_eq!(metrics[&Objective::PaybackHorizon], 5.0);
        assert_eq!(metrics[&Objective::CarbonCost], 200.0);
        assert_eq!(metrics[&Objective::AnnualisedCost], 150.0);
    }

    #[test]
    fn test_portfolio_ratios_recomputed_from_sums() {
        let a = MetricValues::from([
            (Objective::Capex, 100.0),
            (Objective::CostBalance, 50.0),
            (Objective::PaybackHorizon, 2.0),
        ]);
        let b = MetricValues::from([
            (Objective::Capex, 0.0),
            (Objective::CostBalance, -10.0),
            (Objective::PaybackHorizon, 0.0),
        ]);
        let totals = portfolio_metrics([&a, &b]);
        assert_eq!(totals[&Objective::Capex], 100.0);
        assert_eq!(totals[&Objective::CostBalance], 40.0);
        assert_eq!(totals[&Objective::PaybackHorizon], 2.5);
    }
}
