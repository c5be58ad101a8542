//! Dominance, non-dominated sorting and crowding distance.
//!
//! Everything here works on cost vectors (smaller is better); callers turn
//! metric values into costs with [`Objective::as_cost`].

use crate::evolution::objective::Objective;
use crate::portfolio::PortfolioSolution;
use rayon::prelude::*;
use std::collections::HashSet;
use tracing::warn;

/// `a` Pareto-dominates `b`: no worse anywhere, strictly better somewhere.
pub fn dominates(a: &[f64], b: &[f64]) -> bool {
    let mut strictly_better = false;
    for (&a_cost, &b_cost) in a.iter().zip(b.iter()) {
        if a_cost > b_cost {
            return false;
        }
        if a_cost < b_cost {
            strictly_better = true;
        }
    }
    strictly_better
}

/// Constrained dominance.
///
/// Feasible beats infeasible (even on identical costs). Between two
/// infeasible candidates the smaller total violation wins, and equal
/// violations fall back to plain Pareto dominance.
pub fn constrained_dominates(
    a_costs: &[f64],
    a_violation: f64,
    b_costs: &[f64],
    b_violation: f64,
) -> bool {
    let a_feasible = a_violation <= 0.0;
    let b_feasible = b_violation <= 0.0;
    match (a_feasible, b_feasible) {
        (true, false) => true,
        (false, true) => false,
        (true, true) => dominates(a_costs, b_costs),
        (false, false) => {
            if a_violation < b_violation {
                true
            } else if a_violation > b_violation {
                false
            } else {
                dominates(a_costs, b_costs)
            }
        }
    }
}

/// Finds the indices of rows of `costs` that no other row dominates.
///
/// O(N^2), parallelised over the outer loop.
pub fn find_non_dominated_indices(costs: &[Vec<f64>]) -> Vec<usize> {
    if costs.is_empty() {
        return vec![];
    }

    costs
        .par_iter()
        .enumerate()
        .filter(|(i, candidate)| {
            !costs
                .iter()
                .enumerate()
                .any(|(j, other)| *i != j && dominates(other, candidate))
        })
        .map(|(i, _)| i)
        .collect()
}

/// Rows with identical cost vectors collapse to the first occurrence.
fn distinct_rows(costs: &[Vec<f64>]) -> Vec<usize> {
    let mut seen: HashSet<Vec<u64>> = HashSet::new();
    costs
        .iter()
        .enumerate()
        .filter(|(_, row)| {
            // -0.0 and 0.0 are the same point
            let key = row.iter().map(|c| (c + 0.0).to_bits()).collect::<Vec<u64>>();
            seen.insert(key)
        })
        .map(|(i, _)| i)
        .collect()
}

/// The non-dominated subset of `solutions` on `objectives`.
///
/// Solutions that coincide in the selected objective space are reported
/// once. No ordering is guaranteed.
pub fn select_pareto(
    solutions: &[PortfolioSolution],
    objectives: &[Objective],
) -> Vec<PortfolioSolution> {
    let costs: Vec<Vec<f64>> = solutions.iter().map(|s| s.costs(objectives)).collect();
    let distinct = distinct_rows(&costs);
    let distinct_costs: Vec<Vec<f64>> = distinct.iter().map(|&i| costs[i].clone()).collect();

    find_non_dominated_indices(&distinct_costs)
        .into_iter()
        .map(|k| solutions[distinct[k]].clone())
        .collect()
}

/// Partitions candidates into successive fronts under constrained dominance.
/// `fronts[0]` is the best front; each entry indexes into `costs`.
pub fn build_pareto_fronts(costs: &[Vec<f64>], violations: &[f64]) -> Vec<Vec<usize>> {
    let mut fronts: Vec<Vec<usize>> = Vec::new();
    let mut remaining: Vec<usize> = (0..costs.len()).collect();

    while !remaining.is_empty() {
        let front: Vec<usize> = remaining
            .par_iter()
            .copied()
            .filter(|&i| {
                !remaining.iter().any(|&j| {
                    i != j && constrained_dominates(&costs[j], violations[j], &costs[i], violations[i])
                })
            })
            .collect();

        if front.is_empty() {
            // dominance is acyclic, so this only happens with NaN-poisoned input
            warn!(
                remaining = remaining.len(),
                "no non-dominated candidates left, closing the sort with a final front"
            );
            fronts.push(remaining);
            break;
        }

        let members: HashSet<usize> = front.iter().copied().collect();
        remaining.retain(|i| !members.contains(i));
        fronts.push(front);
    }

    fronts
}

/// Crowding distance of every member of `front`, in the same order.
/// Boundary members get infinity.
pub fn crowding_distances(front: &[usize], costs: &[Vec<f64>]) -> Vec<f64> {
    let n = front.len();
    if n <= 2 {
        return vec![f64::INFINITY; n];
    }

    let objectives = costs[front[0]].len();
    let mut distances = vec![0.0; n];

    for objective in 0..objectives {
        let value = |position: usize| costs[front[position]][objective];
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| value(a).total_cmp(&value(b)));

        distances[order[0]] = f64::INFINITY;
        distances[order[n - 1]] = f64::INFINITY;

        let range = value(order[n - 1]) - value(order[0]);
        if range > 0.0 && range.is_finite() {
            for k in 1..n - 1 {
                distances[order[k]] += (value(order[k + 1]) - value(order[k - 1])) / range;
            }
        }
    }

    distances
}
