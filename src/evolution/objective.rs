use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Copy, Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum OptimizationDirection {
    Maximize,
    Minimize,
}

/// The decision metrics a task can optimise or constrain.
///
/// Balances are "savings against the site's baseline", so larger is better.
/// Everything else is a cost.
#[derive(Copy, Clone, Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Objective {
    #[serde(rename = "carbon_balance_scope_1")]
    CarbonBalanceScope1,
    #[serde(rename = "carbon_balance_scope_2")]
    CarbonBalanceScope2,
    #[serde(rename = "cost_balance")]
    CostBalance,
    #[serde(rename = "capex")]
    Capex,
    #[serde(rename = "payback_horizon")]
    PaybackHorizon,
    #[serde(rename = "annualised_cost")]
    AnnualisedCost,
    #[serde(rename = "carbon_cost")]
    CarbonCost,
}

impl Objective {
    pub const ALL: [Objective; 7] = [
        Objective::CarbonBalanceScope1,
        Objective::CarbonBalanceScope2,
        Objective::CostBalance,
        Objective::Capex,
        Objective::PaybackHorizon,
        Objective::AnnualisedCost,
        Objective::CarbonCost,
    ];

    pub fn direction(&self) -> OptimizationDirection {
        match self {
            Objective::CarbonBalanceScope1
            | Objective::CarbonBalanceScope2
            | Objective::CostBalance => OptimizationDirection::Maximize,
            Objective::Capex
            | Objective::PaybackHorizon
            | Objective::AnnualisedCost
            | Objective::CarbonCost => OptimizationDirection::Minimize,
        }
    }

    /// Turns a metric value into a cost, so that smaller is always better.
    pub fn as_cost(&self, value: f64) -> f64 {
        match self.direction() {
            OptimizationDirection::Maximize => -value,
            OptimizationDirection::Minimize => value,
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Objective::CarbonBalanceScope1 => "carbon_balance_scope_1",
            Objective::CarbonBalanceScope2 => "carbon_balance_scope_2",
            Objective::CostBalance => "cost_balance",
            Objective::Capex => "capex",
            Objective::PaybackHorizon => "payback_horizon",
            Objective::AnnualisedCost => "annualised_cost",
            Objective::CarbonCost => "carbon_cost",
        };
        f.write_str(name)
    }
}

/// Feasibility window for one metric. A missing side is unbounded.
#[derive(Copy, Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Bounds {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl Bounds {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Bounds { min, max }
    }

    pub fn at_most(max: f64) -> Self {
        Bounds {
            min: None,
            max: Some(max),
        }
    }

    pub fn at_least(min: f64) -> Self {
        Bounds {
            min: Some(min),
            max: None,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.violation(value) <= 0.0
    }

    /// How far `value` lies outside the window (0 when inside).
    pub fn violation(&self, value: f64) -> f64 {
        if value.is_nan() {
            return f64::INFINITY;
        }
        let below = self.min.map_or(0.0, |min| (min - value).max(0.0));
        let above = self.max.map_or(0.0, |max| (value - max).max(0.0));
        below + above
    }
}

pub type Constraints = BTreeMap<Objective, Bounds>;

pub type MetricValues = BTreeMap<Objective, f64>;

/// Sum of bound violations of `metrics` against `constraints`.
/// A constrained metric that is missing counts as infinitely violated.
pub fn total_violation(metrics: &MetricValues, constraints: &Constraints) -> f64 {
    constraints
        .iter()
        .map(|(objective, bounds)| match metrics.get(objective) {
            Some(value) => bounds.violation(*value),
            None => f64::INFINITY,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directions_follow_savings_convention() {
        assert_eq!(
            Objective::CostBalance.direction(),
            OptimizationDirection::Maximize
        );
        assert_eq!(
            Objective::CarbonBalanceScope1.direction(),
            OptimizationDirection::Maximize
        );
        assert_eq!(Objective::Capex.direction(), OptimizationDirection::Minimize);
        assert_eq!(
            Objective::PaybackHorizon.direction(),
            OptimizationDirection::Minimize
        );
        assert_eq!(Objective::CostBalance.as_cost(5.0), -5.0);
        assert_eq!(Objective::Capex.as_cost(5.0), 5.0);
    }

    #[test]
    fn test_bounds_violation() {
        let bounds = Bounds::new(Some(0.0), Some(10.0));
        assert!(bounds.contains(0.0));
        assert!(bounds.contains(10.0));
        assert_eq!(bounds.violation(12.0), 2.0);
        assert_eq!(bounds.violation(-3.0), 3.0);
        assert!(!bounds.contains(f64::NAN));
        assert!(Bounds::default().contains(1e300));
    }

    #[test]
    fn test_objective_serde_names() {
        let json = serde_json::to_string(&Objective::CarbonBalanceScope1).unwrap();
        assert_eq!(json, "\"carbon_balance_scope_1\"");
        let parsed: Objective = serde_json::from_str("\"annualised_cost\"").unwrap();
        assert_eq!(parsed, Objective::AnnualisedCost);
    }

    #[test]
    fn test_missing_constrained_metric_is_infeasible() {
        let mut constraints = Constraints::new();
        constraints.insert(Objective::Capex, Bounds::at_most(100.0));
        let metrics = MetricValues::new();
        assert!(total_violation(&metrics, &constraints).is_infinite());
    }
}
