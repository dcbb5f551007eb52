use std::collections::BTreeSet;

use log::debug;

use crate::factors::factor::Factor;
use crate::factors::variable_set::VariableSet;

// Elimination order heuristics offered by the model adapter.
// The propagation core consumes an order as a black box; callers may also
// bypass these entirely by supplying an explicit order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderMethod {
    // Greedy min-fill: repeatedly eliminate the variable whose elimination
    // adds the fewest edges to the induced graph
    MinFill,
    // Natural order 0..n, useful for tests and debugging
    Natural,
}

// An immutable discrete graphical model: variables with cardinalities and a
// list of non-negative factors over them. The propagation engine reads it
// only through this interface.
pub struct GraphicalModel {
    cardinalities: Vec<usize>,
    factors: Vec<Factor>,
}

impl GraphicalModel {
    pub fn new(cardinalities: Vec<usize>) -> Self {
        GraphicalModel {
            cardinalities,
            factors: Vec::new(),
        }
    }

    pub fn add_factor(&mut self, factor: Factor) -> &mut Self {
        assert!(
            !factor.scope().is_empty(),
            "Scalar factors carry no structure; fold constants into a unary factor instead."
        );
        for (variable, cardinality) in factor.scope().iter() {
            assert!(variable < self.num_variables(), "Factor scope variable out of range.");
            assert_eq!(
                cardinality, self.cardinalities[variable],
                "Factor scope cardinality disagrees with the model."
            );
        }
        self.factors.push(factor);
        self
    }

    pub fn num_variables(&self) -> usize {
        self.cardinalities.len()
    }

    pub fn cardinality(&self, variable: usize) -> usize {
        self.cardinalities[variable]
    }

    pub fn cardinalities(&self) -> &[usize] {
        &self.cardinalities
    }

    pub fn num_factors(&self) -> usize {
        self.factors.len()
    }

    pub fn factor(&self, index: usize) -> &Factor {
        &self.factors[index]
    }

    pub fn factors_iter(&self) -> std::slice::Iter<Factor> {
        self.factors.iter()
    }

    // Indices of the factors whose scope contains the given variable
    pub fn with_variable(&self, variable: usize) -> Vec<usize> {
        self.factors
            .iter()
            .enumerate()
            .filter(|(_, factor)| factor.scope().contains(variable))
            .map(|(index, _)| index)
            .collect()
    }

    // Moral-graph adjacency: every pair of variables sharing a factor scope
    fn adjacency(&self) -> Vec<BTreeSet<usize>> {
        let mut adjacency = vec![BTreeSet::new(); self.num_variables()];
        for factor in &self.factors {
            let scope = factor.scope().variables();
            for (position, &a) in scope.iter().enumerate() {
                for &b in &scope[position + 1..] {
                    adjacency[a].insert(b);
                    adjacency[b].insert(a);
                }
            }
        }
        adjacency
    }

    pub fn order(&self, method: OrderMethod) -> Vec<usize> {
        match method {
            OrderMethod::Natural => (0..self.num_variables()).collect(),
            OrderMethod::MinFill => self.min_fill_order(),
        }
    }

    fn min_fill_order(&self) -> Vec<usize> {
        let mut adjacency = self.adjacency();
        let mut eliminated = vec![false; self.num_variables()];
        let mut order = Vec::with_capacity(self.num_variables());

        for _ in 0..self.num_variables() {
            // Pick the variable whose elimination adds the fewest fill edges;
            // ties break towards the smallest variable id
            let mut best = None;
            let mut best_fill = usize::MAX;
            for candidate in 0..self.num_variables() {
                if eliminated[candidate] {
                    continue;
                }
                let neighbors: Vec<usize> = adjacency[candidate]
                    .iter()
                    .copied()
                    .filter(|neighbor| !eliminated[*neighbor])
                    .collect();
                let mut fill = 0;
                for (position, &a) in neighbors.iter().enumerate() {
                    for &b in &neighbors[position + 1..] {
                        fill += !adjacency[a].contains(&b) as usize;
                    }
                }
                if fill < best_fill {
                    best_fill = fill;
                    best = Some(candidate);
                }
            }
            let chosen = best.expect("Fewer eliminable variables than variables in the model.");
            debug!("Min-fill picked variable {} with {} fill edges", chosen, best_fill);

            let neighbors: Vec<usize> = adjacency[chosen]
                .iter()
                .copied()
                .filter(|neighbor| !eliminated[*neighbor])
                .collect();
            for (position, &a) in neighbors.iter().enumerate() {
                for &b in &neighbors[position + 1..] {
                    adjacency[a].insert(b);
                    adjacency[b].insert(a);
                }
            }
            eliminated[chosen] = true;
            order.push(chosen);
        }

        order
    }

    // Largest number of un-eliminated neighbors at any elimination step;
    // i-bound at or above this value makes propagation exact
    pub fn induced_width(&self, order: &[usize]) -> usize {
        let mut adjacency = self.adjacency();
        let mut eliminated = vec![false; self.num_variables()];
        let mut width = 0;

        for &variable in order {
            let neighbors: Vec<usize> = adjacency[variable]
                .iter()
                .copied()
                .filter(|neighbor| !eliminated[*neighbor])
                .collect();
            width = width.max(neighbors.len());
            for (position, &a) in neighbors.iter().enumerate() {
                for &b in &neighbors[position + 1..] {
                    adjacency[a].insert(b);
                    adjacency[b].insert(a);
                }
            }
            eliminated[variable] = true;
        }

        width
    }

    // Parent of each variable in the bucket-tree induced by the order:
    // the earliest-eliminated remaining neighbor at the variable's turn.
    // None marks a root (or an isolated variable).
    pub fn pseudo_tree(&self, order: &[usize]) -> Vec<Option<usize>> {
        let mut position = vec![0; self.num_variables()];
        for (index, &variable) in order.iter().enumerate() {
            position[variable] = index;
        }

        let mut adjacency = self.adjacency();
        let mut eliminated = vec![false; self.num_variables()];
        let mut parents = vec![None; self.num_variables()];

        for &variable in order {
            let neighbors: Vec<usize> = adjacency[variable]
                .iter()
                .copied()
                .filter(|neighbor| !eliminated[*neighbor])
                .collect();
            parents[variable] = neighbors
                .iter()
                .copied()
                .min_by_key(|neighbor| position[*neighbor]);
            for (index, &a) in neighbors.iter().enumerate() {
                for &b in &neighbors[index + 1..] {
                    adjacency[a].insert(b);
                    adjacency[b].insert(a);
                }
            }
            eliminated[variable] = true;
        }

        parents
    }

    // Joint log-probability of a complete assignment, straight from the
    // original factors; used by test harnesses, not by the algorithm
    pub fn log_probability(&self, assignment: &[usize]) -> f64 {
        assert_eq!(assignment.len(), self.num_variables());
        self.factors
            .iter()
            .map(|factor| {
                let states: Vec<usize> = factor
                    .scope()
                    .variables()
                    .iter()
                    .map(|variable| assignment[*variable])
                    .collect();
                factor.value_at(&states).ln()
            })
            .sum()
    }

    // Asserts evidence: slices every factor on the observed values and pins
    // each observed variable with a delta indicator factor, so the variable
    // keeps a cluster and the conditioned constants stay in the model.
    pub fn condition(&self, evidence: &[(usize, usize)]) -> GraphicalModel {
        let mut model = GraphicalModel::new(self.cardinalities.clone());
        let mut delta_scale = vec![1.; self.num_variables()];

        for factor in &self.factors {
            let mut conditioned = factor.clone();
            let mut last_observed = None;
            for &(variable, state) in evidence {
                if conditioned.scope().contains(variable) {
                    conditioned = conditioned.condition(variable, state);
                    last_observed = Some(variable);
                }
            }
            if conditioned.scope().is_empty() {
                // fully observed factor: keep its value on one of its variables
                if let Some(variable) = last_observed {
                    delta_scale[variable] *= conditioned[0];
                }
            } else {
                model.add_factor(conditioned);
            }
        }

        for &(variable, state) in evidence {
            let mut values = vec![0.; self.cardinality(variable)];
            values[state] = delta_scale[variable];
            model.add_factor(Factor::new(
                VariableSet::singleton(variable, self.cardinality(variable)),
                values,
            ));
        }

        model
    }
}
