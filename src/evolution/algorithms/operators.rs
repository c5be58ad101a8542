use crate::consts::PERTURBATION;
use crate::evolution::algorithms::search_space::Gene;
use rand::prelude::*;

pub fn random_chromosome<R: Rng + ?Sized>(genes: &[Gene], rng: &mut R) -> Vec<f64> {
    genes.iter().map(|gene| gene.sample(rng)).collect()
}

/// Picks `k` contestants at random and returns the index of the winner.
/// `better(a, b)` is true when `a` beats `b`.
pub fn tournament_selection<R, F>(population_size: usize, k: usize, rng: &mut R, better: F) -> usize
where
    R: Rng + ?Sized,
    F: Fn(usize, usize) -> bool,
{
    if population_size == 0 {
        return 0;
    }
    let k = k.clamp(1, population_size);
    let contestants = rand::seq::index::sample(rng, population_size, k);
    contestants
        .iter()
        .reduce(|best, challenger| if better(challenger, best) { challenger } else { best })
        .unwrap_or(0)
}

/// Uniform crossover for integer genes, blend crossover for continuous genes.
/// Returns a copy of `parent_1` when the crossover coin comes up tails.
pub fn crossover<R: Rng + ?Sized>(
    parent_1: &[f64],
    parent_2: &[f64],
    genes: &[Gene],
    crossover_rate: f64,
    rng: &mut R,
) -> Vec<f64> {
    if !rng.gen_bool(crossover_rate) {
        return parent_1.to_vec();
    }

    parent_1
        .iter()
        .zip(parent_2.iter())
        .zip(genes.iter())
        .map(|((&gene_1, &gene_2), gene)| match gene {
            Gene::Integer { .. } => {
                if rng.gen_bool(0.5) {
                    gene_1
                } else {
                    gene_2
                }
            }
            Gene::Continuous { .. } => {
                let alpha: f64 = rng.gen_range(0.0..1.0);
                gene.clip(alpha * gene_1 + (1.0 - alpha) * gene_2)
            }
        })
        .collect()
}

/// Each gene mutates independently with probability `mutation_rate`.
///
/// Integer genes are redrawn uniformly within their bounds; continuous genes
/// are nudged by up to [`PERTURBATION`] of their range. Both are clipped.
pub fn mutate<R: Rng + ?Sized>(chromosome: &mut [f64], genes: &[Gene], mutation_rate: f64, rng: &mut R) {
    for (value, gene) in chromosome.iter_mut().zip(genes.iter()) {
        if !rng.gen_bool(mutation_rate) {
            continue;
        }
        *value = match *gene {
            Gene::Integer { .. } => gene.sample(rng),
            Gene::Continuous { lower, upper } => {
                let half_width = PERTURBATION * (upper - lower);
                *value + rng.gen_range(-half_width..=half_width)
            }
        };
        *value = gene.clip(*value);
    }
}
