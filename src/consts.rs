/// Returned by ratio metrics when capex is spent but nothing is saved.
pub const SENTINEL_MAX: f64 = 1.0e10;

/// Asset lifetime used to turn annual carbon savings into lifetime savings.
pub const ASSET_LIFETIME_YEARS: f64 = 20.0;

/// kg -> tonnes
pub const KG_PER_TONNE: f64 = 1000.0;

pub const FLOAT_COMPARISON_EPSILON: f64 = 1e-9;

/// Half-width of the perturbation applied to a continuous gene, as a fraction of its range.
pub const PERTURBATION: f64 = 0.1;

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
