use std::fmt::Display;
use std::ops::Index;

use ndarray::Array1;

use super::variable_set::VariableSet;

// A dense factor over a sorted variable scope.
// The table is stored row-major with the last scope variable varying fastest,
// which matches the UAI table convention once scopes are sorted.
// Scalar factors (empty scope, single entry) are valid and act as identities
// under multiplication, so freshly initialized messages compose with any
// belief without special cases.
#[derive(Clone, Debug)]
pub struct Factor {
    scope: VariableSet,
    table: Array1<f64>,
}

// Offsets for flat indexing: strides[i] is the distance between consecutive
// states of the i-th scope variable
fn strides(scope: &VariableSet) -> Vec<usize> {
    let mut strides = vec![1; scope.len()];
    for position in (0..scope.len().saturating_sub(1)).rev() {
        strides[position] = strides[position + 1] * scope.cardinality_at(position + 1);
    }
    strides
}

// Advances a joint state like an odometer (last variable fastest);
// returns false after wrapping past the final state
fn advance(states: &mut [usize], scope: &VariableSet) -> bool {
    for position in (0..states.len()).rev() {
        states[position] += 1;
        if states[position] < scope.cardinality_at(position) {
            return true;
        }
        states[position] = 0;
    }
    false
}

impl Factor {
    pub fn new(scope: VariableSet, values: Vec<f64>) -> Self {
        assert_eq!(
            scope.num_states(),
            values.len(),
            "Table length does not match the number of joint states of the scope."
        );
        Factor {
            scope,
            table: values.into(),
        }
    }

    pub fn scalar(value: f64) -> Self {
        Factor {
            scope: VariableSet::empty(),
            table: Array1::from_elem(1, value),
        }
    }

    pub fn identity() -> Self {
        Factor::scalar(1.)
    }

    // Builds a factor from a scope in arbitrary order with values listed in
    // that order (last listed variable fastest), reindexing into sorted order
    pub fn from_unsorted_scope(
        variables: Vec<usize>,
        cardinalities: Vec<usize>,
        values: Vec<f64>,
    ) -> Self {
        let scope = VariableSet::from_pairs(
            variables
                .iter()
                .copied()
                .zip(cardinalities.iter().copied())
                .collect(),
        );
        assert_eq!(scope.len(), variables.len(), "Scope variables must be distinct.");
        assert_eq!(scope.num_states(), values.len());

        if scope.variables() == variables.as_slice() {
            return Factor::new(scope, values);
        }

        // listed_position[i] = where the i-th sorted variable appears in the listed order
        let listed_position: Vec<usize> = scope
            .variables()
            .iter()
            .map(|variable| {
                variables
                    .iter()
                    .position(|candidate| candidate == variable)
                    .unwrap()
            })
            .collect();
        let sorted_strides = strides(&scope);

        let mut table = Array1::zeros(values.len());
        let mut states = vec![0; variables.len()]; // joint state in listed order
        for value in values {
            let index: usize = listed_position
                .iter()
                .zip(sorted_strides.iter())
                .map(|(position, stride)| states[*position] * stride)
                .sum();
            table[index] = value;

            for position in (0..states.len()).rev() {
                states[position] += 1;
                if states[position] < cardinalities[position] {
                    break;
                }
                states[position] = 0;
            }
        }

        Factor { scope, table }
    }

    pub fn scope(&self) -> &VariableSet {
        &self.scope
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    // Never true in practice: even a scalar factor has one entry
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    // Value at a joint state given in scope order
    pub fn value_at(&self, states: &[usize]) -> f64 {
        let strides = strides(&self.scope);
        let index: usize = states
            .iter()
            .zip(strides.iter())
            .map(|(state, stride)| state * stride)
            .sum();
        self.table[index]
    }

    pub fn product(&self, other: &Factor) -> Factor {
        let scope = self.scope.union(&other.scope);
        let positions_left = aligned_positions(&self.scope, &scope);
        let positions_right = aligned_positions(&other.scope, &scope);
        let strides_left = strides(&self.scope);
        let strides_right = strides(&other.scope);

        let mut table = Array1::zeros(scope.num_states());
        let mut states = vec![0; scope.len()];
        for entry in table.iter_mut() {
            let left = aligned_index(&positions_left, &strides_left, &states);
            let right = aligned_index(&positions_right, &strides_right, &states);
            *entry = self.table[left] * other.table[right];
            advance(&mut states, &scope);
        }
        Factor { scope, table }
    }

    pub fn sum_eliminate(&self, eliminated: &VariableSet) -> Factor {
        self.eliminate(eliminated, 0., |accumulator, value| *accumulator += value)
    }

    pub fn max_eliminate(&self, eliminated: &VariableSet) -> Factor {
        self.eliminate(eliminated, f64::NEG_INFINITY, |accumulator, value| {
            *accumulator = accumulator.max(value)
        })
    }

    fn eliminate(
        &self,
        eliminated: &VariableSet,
        initial: f64,
        mut fold: impl FnMut(&mut f64, f64),
    ) -> Factor {
        let scope = self.scope.difference(eliminated);
        let positions = aligned_positions(&scope, &self.scope);
        let out_strides = strides(&scope);

        let mut table = Array1::from_elem(scope.num_states(), initial);
        let mut states = vec![0; self.scope.len()];
        for value in self.table.iter() {
            let index: usize = positions
                .iter()
                .zip(out_strides.iter())
                .map(|(position, stride)| states[*position] * stride)
                .sum();
            fold(&mut table[index], *value);
            advance(&mut states, &self.scope);
        }
        Factor { scope, table }
    }

    // Sum-marginal onto the kept variables
    pub fn marginal(&self, kept: &VariableSet) -> Factor {
        self.sum_eliminate(&self.scope.difference(kept))
    }

    // Max-marginal onto the kept variables
    pub fn max_marginal(&self, kept: &VariableSet) -> Factor {
        self.max_eliminate(&self.scope.difference(kept))
    }

    // Fixes a variable to one of its states and drops it from the scope
    pub fn condition(&self, variable: usize, state: usize) -> Factor {
        let Some(fixed_position) = self.scope.position(variable) else {
            return self.clone();
        };
        let scope = self.scope.without(variable);
        let self_strides = strides(&self.scope);
        let positions = aligned_positions(&scope, &self.scope);
        let base = state * self_strides[fixed_position];

        let mut table = Array1::zeros(scope.num_states());
        let mut states = vec![0; scope.len()];
        for entry in table.iter_mut() {
            let index: usize = positions
                .iter()
                .zip(states.iter())
                .map(|(position, state)| state * self_strides[*position])
                .sum();
            *entry = self.table[base + index];
            advance(&mut states, &scope);
        }
        Factor { scope, table }
    }

    pub fn max(&self) -> f64 {
        self.table.iter().fold(f64::NEG_INFINITY, |max, value| max.max(*value))
    }

    pub fn sum(&self) -> f64 {
        self.table.sum()
    }

    // Flat index of the first largest entry
    pub fn argmax(&self) -> usize {
        let mut best = 0;
        for (index, value) in self.table.iter().enumerate() {
            if *value > self.table[best] {
                best = index;
            }
        }
        best
    }

    // Joint state (in scope order) of the first largest entry
    pub fn argmax_assignment(&self) -> Vec<usize> {
        let mut index = self.argmax();
        let strides = strides(&self.scope);
        strides
            .iter()
            .map(|stride| {
                let state = index / stride;
                index %= stride;
                state
            })
            .collect()
    }

    pub fn div_assign_scalar(&mut self, divisor: f64) {
        self.table /= divisor;
    }

    // Rescales the table to sum to one; a zero sum deliberately propagates
    // non-finite entries (degenerate evidence must stay visible)
    pub fn normalize(&mut self) {
        let sum = self.sum();
        self.table /= sum;
    }
}

// positions[i] = where the i-th variable of `inner` sits in `outer`
// Assumption: `outer` contains every variable of `inner`
fn aligned_positions(inner: &VariableSet, outer: &VariableSet) -> Vec<usize> {
    inner
        .variables()
        .iter()
        .map(|variable| outer.position(*variable).unwrap())
        .collect()
}

fn aligned_index(positions: &[usize], strides: &[usize], states: &[usize]) -> usize {
    positions
        .iter()
        .zip(strides.iter())
        .map(|(position, stride)| states[*position] * stride)
        .sum()
}

impl Index<usize> for Factor {
    type Output = f64;

    fn index(&self, index: usize) -> &Self::Output {
        &self.table[index]
    }
}

impl Display for Factor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [", self.scope)?;
        for (index, value) in self.table.iter().enumerate() {
            if index > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairwise() -> Factor {
        // scope {0 (card 2), 1 (card 3)}, last variable fastest
        Factor::new(
            VariableSet::from_pairs(vec![(0, 2), (1, 3)]),
            vec![1., 2., 3., 4., 5., 6.],
        )
    }

    #[test]
    fn product_aligns_scopes() {
        let unary = Factor::new(VariableSet::singleton(1, 3), vec![10., 20., 30.]);
        let product = pairwise().product(&unary);

        assert_eq!(product.scope().variables(), &[0, 1]);
        assert_eq!(
            (0..6).map(|index| product[index]).collect::<Vec<_>>(),
            vec![10., 40., 90., 40., 100., 180.]
        );
    }

    #[test]
    fn tables_are_never_empty() {
        assert!(!Factor::identity().is_empty());
        assert_eq!(Factor::identity().len(), 1);
        assert!(!pairwise().is_empty());
    }

    #[test]
    fn product_with_identity_is_identity_operation() {
        let factor = pairwise();
        let product = factor.product(&Factor::identity());
        assert_eq!(product.scope(), factor.scope());
        assert_eq!((0..6).map(|i| product[i]).collect::<Vec<_>>(), vec![1., 2., 3., 4., 5., 6.]);
    }

    #[test]
    fn sum_and_max_elimination() {
        let factor = pairwise();
        let eliminated = VariableSet::singleton(1, 3);

        let summed = factor.sum_eliminate(&eliminated);
        assert_eq!(summed.scope().variables(), &[0]);
        assert_eq!(summed[0], 6.);
        assert_eq!(summed[1], 15.);

        let maxed = factor.max_eliminate(&eliminated);
        assert_eq!(maxed[0], 3.);
        assert_eq!(maxed[1], 6.);

        // eliminating everything yields a scalar
        let scalar = factor.sum_eliminate(factor.scope());
        assert!(scalar.scope().is_empty());
        assert_eq!(scalar[0], 21.);
    }

    #[test]
    fn marginal_is_complement_elimination() {
        let factor = pairwise();
        let kept = VariableSet::singleton(0, 2);
        let marginal = factor.marginal(&kept);
        assert_eq!(marginal.scope().variables(), &[0]);
        assert_eq!(marginal[0], 6.);
        assert_eq!(marginal[1], 15.);
    }

    #[test]
    fn conditioning_slices_the_table() {
        let factor = pairwise();
        let conditioned = factor.condition(1, 2);
        assert_eq!(conditioned.scope().variables(), &[0]);
        assert_eq!(conditioned[0], 3.);
        assert_eq!(conditioned[1], 6.);

        let fully = conditioned.condition(0, 1);
        assert!(fully.scope().is_empty());
        assert_eq!(fully[0], 6.);
    }

    #[test]
    fn unsorted_scope_is_reindexed() {
        // listed as (1, 0): table rows iterate variable 1 slowest
        let factor = Factor::from_unsorted_scope(
            vec![1, 0],
            vec![3, 2],
            vec![1., 2., 3., 4., 5., 6.],
        );
        assert_eq!(factor.scope().variables(), &[0, 1]);
        // entry for state (x0=1, x1=2) was listed at position (2, 1)
        assert_eq!(factor.value_at(&[1, 2]), 6.);
        assert_eq!(factor.value_at(&[0, 2]), 5.);
        assert_eq!(factor.value_at(&[1, 0]), 2.);
    }

    #[test]
    fn argmax_assignment_decodes_states() {
        let factor = pairwise();
        assert_eq!(factor.argmax(), 5);
        assert_eq!(factor.argmax_assignment(), vec![1, 2]);
    }

    #[test]
    fn normalization_and_scaling() {
        let mut factor = pairwise();
        factor.div_assign_scalar(factor.max());
        assert_eq!(factor.max(), 1.);

        let mut marginal = factor.marginal(&VariableSet::singleton(0, 2));
        marginal.normalize();
        assert!((marginal[0] + marginal[1] - 1.).abs() < 1e-12);
    }
}
