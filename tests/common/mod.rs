#![allow(dead_code)]

use anyhow::bail;
use hestia::portfolio::{AssetConfig, AssetRange, AttributeRange, AttributeValue, Scenario, Site, SiteConfig, SiteRange};
use hestia::simulator::{RawSimulationResult, Simulator};
use hestia::Constraints;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Closed-form stand-in for the building simulator.
///
/// A bigger heat pump costs more up front but cuts gas use; solar panels
/// cost money and shave electricity imports. Bundle `broken` fails and
/// bundle `panic` panics.
#[derive(Default)]
pub struct SyntheticSimulator {
    calls: AtomicUsize,
}

impl SyntheticSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn int_attribute(scenario: &Scenario, asset: &str, attribute: &str) -> f64 {
    match scenario.assets.get(asset).and_then(|a| a.get(attribute)) {
        Some(AttributeValue::Int(value)) => *value as f64,
        _ => 0.0,
    }
}

impl Simulator for SyntheticSimulator {
    fn simulate(&self, scenario: &Scenario) -> anyhow::Result<RawSimulationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match scenario.bundle_id.as_str() {
            "broken" => bail!("bundle {} cannot be read", scenario.bundle_id),
            "panic" => panic!("simulator crashed"),
            _ => {}
        }

        let heat_pump = int_attribute(scenario, "heat_pump", "size");
        let panels = int_attribute(scenario, "solar", "panels");
        let capex = 2000.0 * heat_pump + 400.0 * panels;

        Ok(RawSimulationResult {
            capex,
            annualised_cost: capex / 20.0,
            scope_1_emissions: 5000.0 - 900.0 * heat_pump,
            scope_2_emissions: 2000.0 + 150.0 * heat_pump - 60.0 * panels,
            total_gas_import_cost: 1500.0 - 250.0 * heat_pump,
            total_electricity_import_cost: 800.0 + 120.0 * heat_pump - 40.0 * panels,
            total_electricity_export_gain: 10.0 * panels,
            ..RawSimulationResult::default()
        })
    }
}

fn asset(pairs: &[(&str, AttributeValue)]) -> AssetConfig {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

/// Heat pump sized 0-4; the baseline has none.
pub fn heat_pump_site(bundle_id: &str) -> Site {
    Site {
        site_id: "site-a".into(),
        bundle_id: bundle_id.into(),
        baseline: BTreeMap::from([(
            "heat_pump".to_string(),
            asset(&[("size", AttributeValue::Int(0))]),
        )]),
        site_range: SiteRange::from([(
            "heat_pump".to_string(),
            AssetRange {
                mandatory: true,
                attributes: BTreeMap::from([(
                    "size".to_string(),
                    AttributeRange::Integer {
                        min: 0,
                        max: 4,
                        step: 1,
                    },
                )]),
            },
        )]),
        constraints: Constraints::new(),
        config: SiteConfig::default(),
    }
}

/// Optional solar array of 0, 4 or 8 panels next to a fixed building fabric.
pub fn solar_site(bundle_id: &str) -> Site {
    Site {
        site_id: "site-b".into(),
        bundle_id: bundle_id.into(),
        baseline: BTreeMap::new(),
        site_range: SiteRange::from([
            (
                "building".to_string(),
                AssetRange {
                    mandatory: true,
                    attributes: BTreeMap::from([(
                        "fabric".to_string(),
                        AttributeRange::Fixed {
                            value: AttributeValue::Text("solid".into()),
                        },
                    )]),
                },
            ),
            (
                "solar".to_string(),
                AssetRange {
                    mandatory: false,
                    attributes: BTreeMap::from([(
                        "panels".to_string(),
                        AttributeRange::Integer {
                            min: 0,
                            max: 8,
                            step: 4,
                        },
                    )]),
                },
            ),
        ]),
        constraints: Constraints::new(),
        config: SiteConfig::default(),
    }
}

/// Replaces `asset.attribute` with a 0-1000 integer range.
pub fn widen(mut site: Site, asset: &str, attribute: &str) -> Site {
    if let Some(range) = site.site_range.get_mut(asset) {
        range.attributes.insert(
            attribute.to_string(),
            AttributeRange::Integer {
                min: 0,
                max: 1000,
                step: 1,
            },
        );
    }
    site
}
