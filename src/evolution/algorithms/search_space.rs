//! Maps a portfolio's SiteRanges onto a flat chromosome and back.
//!
//! Every searchable attribute becomes one gene, and every optional asset an
//! extra 0/1 presence gene. Fixed attributes never appear in the chromosome;
//! they are written into every decoded scenario as constants.

use crate::evolution::EvolutionError;
use crate::portfolio::{AssetConfig, AttributeRange, AttributeValue, PortfolioSolution, Scenario, Site};
use rand::Rng;
use std::collections::BTreeMap;

const MAX_POSITIONS: i64 = 1 << 53;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gene {
    /// Integral values in `[lower, upper]`, stored as f64.
    Integer { lower: i64, upper: i64 },
    Continuous { lower: f64, upper: f64 },
}

impl Gene {
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            Gene::Integer { lower, upper } => rng.gen_range(lower..=upper) as f64,
            Gene::Continuous { lower, upper } => rng.gen_range(lower..=upper),
        }
    }

    pub fn clip(&self, value: f64) -> f64 {
        match *self {
            Gene::Integer { lower, upper } => value.round().clamp(lower as f64, upper as f64),
            Gene::Continuous { lower, upper } => value.clamp(lower, upper),
        }
    }

    pub fn lower(&self) -> f64 {
        match *self {
            Gene::Integer { lower, .. } => lower as f64,
            Gene::Continuous { lower, .. } => lower,
        }
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Presence {
        asset: String,
    },
    Choice {
        asset: String,
        attribute: String,
        values: Vec<AttributeValue>,
    },
    Stepped {
        asset: String,
        attribute: String,
        min: i64,
        step: i64,
    },
    Continuous {
        asset: String,
        attribute: String,
    },
}

impl Slot {
    fn asset(&self) -> &str {
        match self {
            Slot::Presence { asset }
            | Slot::Choice { asset, .. }
            | Slot::Stepped { asset, .. }
            | Slot::Continuous { asset, .. } => asset,
        }
    }
}

/// Search space of a single site.
#[derive(Debug, Clone)]
pub struct SiteSearchSpace {
    site_id: String,
    bundle_id: String,
    genes: Vec<Gene>,
    slots: Vec<Slot>,
    /// Every asset with its fixed attributes already filled in.
    fixed: BTreeMap<String, AssetConfig>,
}

impl SiteSearchSpace {
    pub fn new(site: &Site) -> Result<Self, EvolutionError> {
        let mut genes = Vec::new();
        let mut slots = Vec::new();
        let mut fixed = BTreeMap::new();

        for (asset, asset_range) in &site.site_range {
            if !asset_range.mandatory {
                genes.push(Gene::Integer { lower: 0, upper: 1 });
                slots.push(Slot::Presence {
                    asset: asset.clone(),
                });
            }

            let mut constants = AssetConfig::new();
            for (attribute, range) in &asset_range.attributes {
                let invalid = |reason: &str| EvolutionError::InvalidSiteRange {
                    site_id: site.site_id.clone(),
                    asset: asset.clone(),
                    attribute: attribute.clone(),
                    reason: reason.to_string(),
                };

                match range {
                    AttributeRange::Fixed { value } => {
                        constants.insert(attribute.clone(), value.clone());
                    }
                    AttributeRange::Choices { values } => match values.len() {
                        0 => return Err(invalid("no legal values")),
                        1 => {
                            constants.insert(attribute.clone(), values[0].clone());
                        }
                        n => {
                            genes.push(Gene::Integer {
                                lower: 0,
                                upper: n as i64 - 1,
                            });
                            slots.push(Slot::Choice {
                                asset: asset.clone(),
                                attribute: attribute.clone(),
                                values: values.clone(),
                            });
                        }
                    },
                    AttributeRange::Integer { min, max, step } => {
                        if *step <= 0 {
                            return Err(invalid("step must be positive"));
                        }
                        if max < min {
                            return Err(invalid("max is below min"));
                        }
                        // genes hold positions as f64, exact only up to 2^53
                        let positions = max
                            .checked_sub(*min)
                            .map(|span| span / step)
                            .filter(|positions| *positions <= MAX_POSITIONS)
                            .ok_or_else(|| invalid("range too wide"))?;
                        if positions == 0 {
                            constants.insert(attribute.clone(), AttributeValue::Int(*min));
                        } else {
                            genes.push(Gene::Integer {
                                lower: 0,
                                upper: positions,
                            });
                            slots.push(Slot::Stepped {
                                asset: asset.clone(),
                                attribute: attribute.clone(),
                                min: *min,
                                step: *step,
                            });
                        }
                    }
                    AttributeRange::Continuous { min, max } => {
                        if !(min.is_finite() && max.is_finite()) || max < min {
                            return Err(invalid("bounds must be finite with min <= max"));
                        }
                        if min == max {
                            constants.insert(attribute.clone(), AttributeValue::Float(*min));
                        } else {
                            genes.push(Gene::Continuous {
                                lower: *min,
                                upper: *max,
                            });
                            slots.push(Slot::Continuous {
                                asset: asset.clone(),
                                attribute: attribute.clone(),
                            });
                        }
                    }
                }
            }
            fixed.insert(asset.clone(), constants);
        }

        Ok(SiteSearchSpace {
            site_id: site.site_id.clone(),
            bundle_id: site.bundle_id.clone(),
            genes,
            slots,
            fixed,
        })
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn genes(&self) -> &[Gene] {
        &self.genes
    }

    pub fn decode(&self, chromosome: &[f64]) -> Scenario {
        let mut assets = self.fixed.clone();

        for (slot, (gene, value)) in self.slots.iter().zip(self.genes.iter().zip(chromosome)) {
            let value = gene.clip(*value);
            match slot {
                Slot::Presence { asset } => {
                    if value < 0.5 {
                        assets.remove(asset);
                    }
                }
                Slot::Choice {
                    asset,
                    attribute,
                    values,
                } => {
                    if let Some(config) = assets.get_mut(asset) {
                        config.insert(attribute.clone(), values[value as usize].clone());
                    }
                }
                Slot::Stepped {
                    asset,
                    attribute,
                    min,
                    step,
                } => {
                    if let Some(config) = assets.get_mut(asset) {
                        let resolved = min + (value as i64) * step;
                        config.insert(attribute.clone(), AttributeValue::Int(resolved));
                    }
                }
                Slot::Continuous { asset, attribute } => {
                    if let Some(config) = assets.get_mut(asset) {
                        config.insert(attribute.clone(), AttributeValue::Float(value));
                    }
                }
            }
        }

        Scenario {
            site_id: self.site_id.clone(),
            bundle_id: self.bundle_id.clone(),
            assets,
        }
    }

    /// Inverse of [`decode`](Self::decode), used to warm-start from known
    /// scenarios. `None` if the scenario lies outside this search space.
    pub fn encode(&self, scenario: &Scenario) -> Option<Vec<f64>> {
        if scenario.site_id != self.site_id {
            return None;
        }

        self.slots
            .iter()
            .zip(&self.genes)
            .map(|(slot, gene)| {
                let config = match scenario.assets.get(slot.asset()) {
                    Some(config) => config,
                    // genes of an absent asset are irrelevant
                    None => {
                        return match slot {
                            Slot::Presence { .. } => Some(0.0),
                            _ => Some(gene.lower()),
                        }
                    }
                };
                match slot {
                    Slot::Presence { .. } => Some(1.0),
                    Slot::Choice {
                        attribute, values, ..
                    } => {
                        let value = config.get(attribute)?;
                        values.iter().position(|v| v == value).map(|i| i as f64)
                    }
                    Slot::Stepped {
                        attribute,
                        min,
                        step,
                        ..
                    } => match config.get(attribute)? {
                        AttributeValue::Int(v) => {
                            let offset = v.checked_sub(*min)?;
                            if offset % step != 0 {
                                return None;
                            }
                            let position = (offset / step) as f64;
                            (gene.clip(position) == position).then_some(position)
                        }
                        _ => None,
                    },
                    Slot::Continuous { attribute, .. } => {
                        let value = match config.get(attribute)? {
                            AttributeValue::Float(v) => *v,
                            AttributeValue::Int(v) => *v as f64,
                            _ => return None,
                        };
                        (gene.clip(value) == value).then_some(value)
                    }
                }
            })
            .collect()
    }
}

/// Search space of a whole portfolio: the site chromosomes laid end to end.
#[derive(Debug, Clone)]
pub struct SearchSpace {
    sites: Vec<SiteSearchSpace>,
    offsets: Vec<usize>,
    genes: Vec<Gene>,
}

impl SearchSpace {
    pub fn new(portfolio: &[Site]) -> Result<Self, EvolutionError> {
        let sites = portfolio
            .iter()
            .map(SiteSearchSpace::new)
            .collect::<Result<Vec<_>, _>>()?;

        let mut offsets = Vec::with_capacity(sites.len() + 1);
        let mut genes = Vec::new();
        offsets.push(0);
        for site in &sites {
            genes.extend_from_slice(site.genes());
            offsets.push(genes.len());
        }

        Ok(SearchSpace {
            sites,
            offsets,
            genes,
        })
    }

    pub fn genes(&self) -> &[Gene] {
        &self.genes
    }

    /// One scenario per site, in portfolio order.
    pub fn decode(&self, chromosome: &[f64]) -> Vec<Scenario> {
        self.sites
            .iter()
            .enumerate()
            .map(|(i, site)| site.decode(&chromosome[self.offsets[i]..self.offsets[i + 1]]))
            .collect()
    }

    pub fn encode(&self, solution: &PortfolioSolution) -> Option<Vec<f64>> {
        let mut chromosome = Vec::with_capacity(self.genes.len());
        for site in &self.sites {
            let site_solution = solution.solutions.get(site.site_id())?;
            chromosome.extend(site.encode(&site_solution.scenario)?);
        }
        Some(chromosome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::{AssetRange, SiteConfig, SiteRange};
    use crate::evolution::objective::Constraints;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn site() -> Site {
        let mut site_range = SiteRange::new();
        site_range.insert(
            "building".into(),
            AssetRange {
                mandatory: true,
                attributes: BTreeMap::from([
                    (
                        "floor_area".to_string(),
                        AttributeRange::Fixed {
                            value: AttributeValue::Float(120.0),
                        },
                    ),
                    (
                        "fabric".to_string(),
                        AttributeRange::Choices {
                            values: vec![
                                AttributeValue::Text("none".into()),
                                AttributeValue::Text("loft".into()),
                                AttributeValue::Text("cavity".into()),
                            ],
                        },
                    ),
                ]),
            },
        );
        site_range.insert(
            "battery".into(),
            AssetRange {
                mandatory: false,
                attributes: BTreeMap::from([
                    (
                        "capacity".to_string(),
                        AttributeRange::Integer {
                            min: 0,
                            max: 20,
                            step: 5,
                        },
                    ),
                    (
                        "efficiency".to_string(),
                        AttributeRange::Continuous { min: 0.8, max: 0.95 },
                    ),
                ]),
            },
        );
        Site {
            site_id: "site-a".into(),
            bundle_id: "bundle-1".into(),
            baseline: BTreeMap::new(),
            site_range,
            constraints: Constraints::new(),
            config: SiteConfig::default(),
        }
    }

    #[test]
    fn test_genes_cover_mutable_attributes_only() {
        let space = SiteSearchSpace::new(&site()).unwrap();
        // battery: presence, capacity, efficiency; building: fabric
        assert_eq!(
            space.genes(),
            &[
                Gene::Integer { lower: 0, upper: 1 },
                Gene::Integer { lower: 0, upper: 4 },
                Gene::Continuous {
                    lower: 0.8,
                    upper: 0.95
                },
                Gene::Integer { lower: 0, upper: 2 },
            ]
        );
    }

    #[test]
    fn test_decode_bakes_in_fixed_values() {
        let space = SiteSearchSpace::new(&site()).unwrap();
        let scenario = space.decode(&[1.0, 3.0, 0.9, 2.0]);

        assert_eq!(
            scenario.assets["building"]["floor_area"],
            AttributeValue::Float(120.0)
        );
        assert_eq!(
            scenario.assets["building"]["fabric"],
            AttributeValue::Text("cavity".into())
        );
        assert_eq!(scenario.assets["battery"]["capacity"], AttributeValue::Int(15));
        assert_eq!(scenario.assets["battery"]["efficiency"], AttributeValue::Float(0.9));
    }

    #[test]
    fn test_absent_optional_asset_ignores_its_genes() {
        let space = SiteSearchSpace::new(&site()).unwrap();
        let a = space.decode(&[0.0, 3.0, 0.9, 1.0]);
        let b = space.decode(&[0.0, 1.0, 0.85, 1.0]);
        assert!(!a.assets.contains_key("battery"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_encode_inverts_decode() {
        let space = SiteSearchSpace::new(&site()).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            let chromosome: Vec<f64> = space.genes().iter().map(|g| g.sample(&mut rng)).collect();
            let scenario = space.decode(&chromosome);
            let encoded = space.encode(&scenario).expect("scenario is inside the space");
            assert_eq!(space.decode(&encoded), scenario);
        }
    }

    #[test]
    fn test_encode_rejects_foreign_values() {
        let space = SiteSearchSpace::new(&site()).unwrap();
        let mut scenario = space.decode(&[1.0, 1.0, 0.9, 0.0]);
        scenario
            .assets
            .get_mut("battery")
            .unwrap()
            .insert("capacity".into(), AttributeValue::Int(7));
        assert!(space.encode(&scenario).is_none());
    }

    #[test]
    fn test_invalid_range_is_reported() {
        let mut bad = site();
        bad.site_range.get_mut("battery").unwrap().attributes.insert(
            "capacity".into(),
            AttributeRange::Integer {
                min: 10,
                max: 0,
                step: 1,
            },
        );
        assert!(matches!(
            SiteSearchSpace::new(&bad),
            Err(EvolutionError::InvalidSiteRange { .. })
        ));
    }

    #[test]
    fn test_overly_wide_range_is_reported() {
        let mut bad = site();
        bad.site_range.get_mut("battery").unwrap().attributes.insert(
            "capacity".into(),
            AttributeRange::Integer {
                min: i64::MIN,
                max: i64::MAX,
                step: 1,
            },
        );
        assert!(matches!(
            SiteSearchSpace::new(&bad),
            Err(EvolutionError::InvalidSiteRange { ref reason, .. }) if reason == "range too wide"
        ));

        // a wide range with a coarse step is still usable
        bad.site_range.get_mut("battery").unwrap().attributes.insert(
            "capacity".into(),
            AttributeRange::Integer {
                min: 0,
                max: i64::MAX,
                step: 1 << 61,
            },
        );
        let space = SiteSearchSpace::new(&bad).unwrap();
        assert_eq!(space.genes()[1], Gene::Integer { lower: 0, upper: 3 });
    }

    #[test]
    fn test_encode_rejects_values_far_below_min() {
        let mut wide = site();
        wide.site_range.get_mut("battery").unwrap().attributes.insert(
            "capacity".into(),
            AttributeRange::Integer {
                min: 1,
                max: 9,
                step: 2,
            },
        );
        let space = SiteSearchSpace::new(&wide).unwrap();
        let mut scenario = space.decode(&[1.0, 1.0, 0.9, 0.0]);
        scenario
            .assets
            .get_mut("battery")
            .unwrap()
            .insert("capacity".into(), AttributeValue::Int(i64::MIN));
        assert!(space.encode(&scenario).is_none());
    }

    #[test]
    fn test_portfolio_space_concatenates_sites() {
        let mut second = site();
        second.site_id = "site-b".into();
        let space = SearchSpace::new(&[site(), second]).unwrap();
        assert_eq!(space.genes().len(), 8);

        let scenarios = space.decode(&[1.0, 0.0, 0.8, 0.0, 0.0, 0.0, 0.8, 2.0]);
        assert_eq!(scenarios[0].site_id, "site-a");
        assert_eq!(scenarios[1].site_id, "site-b");
        assert!(scenarios[0].assets.contains_key("battery"));
        assert!(!scenarios[1].assets.contains_key("battery"));
    }
}
