//! Sites, the ranges their assets may take, and evaluated solutions.
//!
//! A [`Scenario`] is compared by content, so it doubles as the cache key.

use crate::evolution::metrics::portfolio_metrics;
use crate::evolution::objective::{total_violation, Constraints, MetricValues, Objective};
use crate::simulator::RawSimulationResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// A single concrete attribute value handed to the simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AttributeValue::Bool(a), AttributeValue::Bool(b)) => a == b,
            (AttributeValue::Int(a), AttributeValue::Int(b)) => a == b,
            // bitwise, so that Eq and Hash agree
            (AttributeValue::Float(a), AttributeValue::Float(b)) => a.to_bits() == b.to_bits(),
            (AttributeValue::Text(a), AttributeValue::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for AttributeValue {}

impl Hash for AttributeValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            AttributeValue::Bool(value) => value.hash(state),
            AttributeValue::Int(value) => value.hash(state),
            AttributeValue::Float(value) => value.to_bits().hash(state),
            AttributeValue::Text(value) => value.hash(state),
        }
    }
}

/// Legal values of one attribute of one asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttributeRange {
    Fixed {
        value: AttributeValue,
    },
    Choices {
        values: Vec<AttributeValue>,
    },
    Integer {
        min: i64,
        max: i64,
        #[serde(default = "default_step")]
        step: i64,
    },
    Continuous {
        min: f64,
        max: f64,
    },
}

fn default_step() -> i64 {
    1
}

fn default_mandatory() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetRange {
    /// Optional assets may be left out of a scenario entirely.
    #[serde(default = "default_mandatory")]
    pub mandatory: bool,
    pub attributes: BTreeMap<String, AttributeRange>,
}

/// Declares, per asset, which attributes are fixed and which are searchable.
pub type SiteRange = BTreeMap<String, AssetRange>;

pub type AssetConfig = BTreeMap<String, AttributeValue>;

/// One fully resolved simulator input for a site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Scenario {
    pub site_id: String,
    pub bundle_id: String,
    pub assets: BTreeMap<String, AssetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SiteConfig {
    /// Ceiling on the capital expenditure of any scenario for this site.
    #[serde(default)]
    pub capex_limit: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Site {
    pub site_id: String,
    /// Reference to the dataset snapshot the simulator reads for this site.
    pub bundle_id: String,
    /// The building as it is today; balances are measured against it.
    #[serde(default)]
    pub baseline: BTreeMap<String, AssetConfig>,
    pub site_range: SiteRange,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub config: SiteConfig,
}

impl Site {
    pub fn baseline_scenario(&self) -> Scenario {
        Scenario {
            site_id: self.site_id.clone(),
            bundle_id: self.bundle_id.clone(),
            assets: self.baseline.clone(),
        }
    }

    /// Violation of the per-site constraints and CAPEX ceiling.
    pub fn constraint_violation(&self, metrics: &MetricValues) -> f64 {
        let capex_violation = match (self.config.capex_limit, metrics.get(&Objective::Capex)) {
            (Some(limit), Some(capex)) => (capex - limit).max(0.0),
            _ => 0.0,
        };
        total_violation(metrics, &self.constraints) + capex_violation
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteSolution {
    pub scenario: Scenario,
    pub metric_values: MetricValues,
    pub simulation_result: RawSimulationResult,
    pub constraint_violation: f64,
    pub is_feasible: bool,
}

impl PartialEq for SiteSolution {
    fn eq(&self, other: &Self) -> bool {
        self.scenario == other.scenario
    }
}

impl Eq for SiteSolution {}

impl Hash for SiteSolution {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.scenario.hash(state);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSolution {
    /// site_id -> solution chosen for that site
    pub solutions: BTreeMap<String, SiteSolution>,
    pub metric_values: MetricValues,
    pub simulation_result: RawSimulationResult,
    pub constraint_violation: f64,
    pub is_feasible: bool,
}

impl PortfolioSolution {
    /// Aggregates per-site solutions and checks them against the portfolio constraints.
    pub fn from_site_solutions(
        solutions: BTreeMap<String, SiteSolution>,
        constraints: &Constraints,
    ) -> Self {
        let metric_values = portfolio_metrics(solutions.values().map(|s| &s.metric_values));
        let simulation_result = solutions
            .values()
            .map(|s| &s.simulation_result)
            .cloned()
            .sum::<RawSimulationResult>();
        let site_violation: f64 = solutions.values().map(|s| s.constraint_violation).sum();
        let constraint_violation = site_violation + total_violation(&metric_values, constraints);

        PortfolioSolution {
            solutions,
            metric_values,
            simulation_result,
            constraint_violation,
            is_feasible: constraint_violation <= 0.0,
        }
    }

    pub fn metric(&self, objective: Objective) -> f64 {
        self.metric_values
            .get(&objective)
            .copied()
            .unwrap_or(f64::NAN)
    }

    /// Objective values turned into costs (smaller is better) for `objectives`.
    pub fn costs(&self, objectives: &[Objective]) -> Vec<f64> {
        objectives
            .iter()
            .map(|objective| objective.as_cost(self.metric(*objective)))
            .collect()
    }

    pub fn scenarios(&self) -> impl Iterator<Item = &Scenario> {
        self.solutions.values().map(|s| &s.scenario)
    }

    pub fn is_dominated_by(&self, other: &PortfolioSolution, objectives: &[Objective]) -> bool {
        let self_costs = self.costs(objectives);
        let other_costs = other.costs(objectives);

        // Check if 'other' is at least as good as 'self' in all objectives
        let other_is_at_least_as_good_in_all = self_costs
            .iter()
            .zip(other_costs.iter())
            .all(|(&self_cost, &other_cost)| other_cost <= self_cost);

        // Check if 'other' is strictly better than 'self' in at least one objective
        let other_is_strictly_better_in_one = self_costs
            .iter()
            .zip(other_costs.iter())
            .any(|(&self_cost, &other_cost)| other_cost < self_cost);

        other_is_at_least_as_good_in_all && other_is_strictly_better_in_one
    }
}

impl PartialEq for PortfolioSolution {
    fn eq(&self, other: &Self) -> bool {
        self.solutions == other.solutions
    }
}

impl Eq for PortfolioSolution {}

impl Hash for PortfolioSolution {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (site_id, solution) in &self.solutions {
            site_id.hash(state);
            solution.hash(state);
        }
    }
}
