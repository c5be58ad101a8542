use crate::portfolio::Scenario;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::Add;
use tokio::runtime::Handle;

/// Aggregate outputs of one simulator run. Energy in kWh, money in pounds,
/// emissions in kg CO2e, all annual except `capex`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawSimulationResult {
    pub capex: f64,
    #[serde(default)]
    pub annualised_cost: f64,
    #[serde(default)]
    pub total_gas_used: f64,
    #[serde(default)]
    pub total_electricity_imported: f64,
    #[serde(default)]
    pub total_electricity_generated: f64,
    #[serde(default)]
    pub total_electricity_exported: f64,
    #[serde(default)]
    pub total_heat_load: f64,
    #[serde(default)]
    pub total_dhw_load: f64,
    #[serde(default)]
    pub total_heat_shortfall: f64,
    #[serde(default)]
    pub total_dhw_shortfall: f64,
    #[serde(default)]
    pub scope_1_emissions: f64,
    #[serde(default)]
    pub scope_2_emissions: f64,
    #[serde(default)]
    pub total_gas_import_cost: f64,
    #[serde(default)]
    pub total_electricity_import_cost: f64,
    #[serde(default)]
    pub total_electricity_export_gain: f64,
}

impl RawSimulationResult {
    /// Net yearly running cost of the scenario.
    pub fn operating_cost(&self) -> f64 {
        self.total_gas_import_cost + self.total_electricity_import_cost
            - self.total_electricity_export_gain
    }
}

impl Add for RawSimulationResult {
    type Output = RawSimulationResult;

    fn add(self, other: RawSimulationResult) -> RawSimulationResult {
        RawSimulationResult {
            capex: self.capex + other.capex,
            annualised_cost: self.annualised_cost + other.annualised_cost,
            total_gas_used: self.total_gas_used + other.total_gas_used,
            total_electricity_imported: self.total_electricity_imported
                + other.total_electricity_imported,
            total_electricity_generated: self.total_electricity_generated
                + other.total_electricity_generated,
            total_electricity_exported: self.total_electricity_exported
                + other.total_electricity_exported,
            total_heat_load: self.total_heat_load + other.total_heat_load,
            total_dhw_load: self.total_dhw_load + other.total_dhw_load,
            total_heat_shortfall: self.total_heat_shortfall + other.total_heat_shortfall,
            total_dhw_shortfall: self.total_dhw_shortfall + other.total_dhw_shortfall,
            scope_1_emissions: self.scope_1_emissions + other.scope_1_emissions,
            scope_2_emissions: self.scope_2_emissions + other.scope_2_emissions,
            total_gas_import_cost: self.total_gas_import_cost + other.total_gas_import_cost,
            total_electricity_import_cost: self.total_electricity_import_cost
                + other.total_electricity_import_cost,
            total_electricity_export_gain: self.total_electricity_export_gain
                + other.total_electricity_export_gain,
        }
    }
}

impl Sum for RawSimulationResult {
    fn sum<I: Iterator<Item = RawSimulationResult>>(iter: I) -> Self {
        iter.fold(RawSimulationResult::default(), Add::add)
    }
}

/// The building-energy simulator. Deterministic and side-effect free, but slow.
///
/// Called from blocking/rayon threads, never from async tasks.
pub trait Simulator: Send + Sync {
    fn simulate(&self, scenario: &Scenario) -> Result<RawSimulationResult>;
}

/// Simulator living behind an HTTP endpoint (`POST {base_url}/simulate`).
pub struct HttpSimulator {
    client: reqwest::Client,
    base_url: String,
    runtime: Handle,
}

impl HttpSimulator {
    /// Must be built inside a tokio runtime; requests are driven on it.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let runtime = Handle::try_current().context("HttpSimulator needs a tokio runtime")?;
        Ok(HttpSimulator {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            runtime,
        })
    }
}

impl Simulator for HttpSimulator {
    fn simulate(&self, scenario: &Scenario) -> Result<RawSimulationResult> {
        let url = format!("{}/simulate", self.base_url);
        self.runtime.block_on(async {
            let response = self
                .client
                .post(&url)
                .json(scenario)
                .send()
                .await
                .with_context(|| format!("simulator request for site {} failed", scenario.site_id))?
                .error_for_status()?;
            let result = response.json::<RawSimulationResult>().await?;
            Ok::<_, anyhow::Error>(result)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_sum_fieldwise() {
        let a = RawSimulationResult {
            capex: 10.0,
            scope_1_emissions: 3.0,
            total_gas_import_cost: 5.0,
            total_electricity_export_gain: 1.0,
            ..Default::default()
        };
        let b = RawSimulationResult {
            capex: 2.5,
            scope_1_emissions: 1.0,
            total_electricity_import_cost: 4.0,
            ..Default::default()
        };
        let total: RawSimulationResult = vec![a, b].into_iter().sum();
        assert_eq!(total.capex, 12.5);
        assert_eq!(total.scope_1_emissions, 4.0);
        assert_eq!(total.operating_cost(), 8.0);
    }

    #[test]
    fn test_partial_payload_deserializes() {
        let result: RawSimulationResult =
            serde_json::from_str(r#"{"capex": 1200.0, "scope_1_emissions": 40.5}"#).unwrap();
        assert_eq!(result.capex, 1200.0);
        assert_eq!(result.total_heat_shortfall, 0.0);
    }
}
