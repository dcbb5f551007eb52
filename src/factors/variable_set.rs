use std::fmt::Display;

// A sorted set of variable ids together with their cardinalities.
// All scope arithmetic in the crate (separators, elimination sets, message
// scopes) goes through this type, so the ordering invariant is maintained in
// exactly one place.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableSet {
    variables: Vec<usize>,
    cardinalities: Vec<usize>,
}

impl VariableSet {
    pub fn empty() -> Self {
        VariableSet {
            variables: Vec::new(),
            cardinalities: Vec::new(),
        }
    }

    pub fn singleton(variable: usize, cardinality: usize) -> Self {
        VariableSet {
            variables: vec![variable],
            cardinalities: vec![cardinality],
        }
    }

    // Creates a set from (variable, cardinality) pairs that are not necessarily sorted
    pub fn from_pairs(mut pairs: Vec<(usize, usize)>) -> Self {
        pairs.sort_unstable_by_key(|(variable, _)| *variable);
        pairs.dedup_by_key(|(variable, _)| *variable);
        let (variables, cardinalities) = pairs.into_iter().unzip();
        VariableSet {
            variables,
            cardinalities,
        }
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn variables(&self) -> &[usize] {
        &self.variables
    }

    pub fn cardinality_at(&self, position: usize) -> usize {
        self.cardinalities[position]
    }

    pub fn position(&self, variable: usize) -> Option<usize> {
        self.variables.binary_search(&variable).ok()
    }

    pub fn contains(&self, variable: usize) -> bool {
        self.position(variable).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.variables
            .iter()
            .copied()
            .zip(self.cardinalities.iter().copied())
    }

    // Number of joint states of the set; 1 for the empty (scalar) scope
    pub fn num_states(&self) -> usize {
        self.cardinalities.iter().product()
    }

    pub fn union(&self, other: &VariableSet) -> VariableSet {
        let mut variables = Vec::with_capacity(self.len() + other.len());
        let mut cardinalities = Vec::with_capacity(self.len() + other.len());
        let mut left = self.iter().peekable();
        let mut right = other.iter().peekable();
        loop {
            let (variable, cardinality) = match (left.peek(), right.peek()) {
                (Some(&(lv, lc)), Some(&(rv, rc))) => {
                    if lv < rv {
                        left.next();
                        (lv, lc)
                    } else if rv < lv {
                        right.next();
                        (rv, rc)
                    } else {
                        debug_assert_eq!(lc, rc, "cardinality mismatch for variable {}", lv);
                        left.next();
                        right.next();
                        (lv, lc)
                    }
                }
                (Some(&(lv, lc)), None) => {
                    left.next();
                    (lv, lc)
                }
                (None, Some(&(rv, rc))) => {
                    right.next();
                    (rv, rc)
                }
                (None, None) => break,
            };
            variables.push(variable);
            cardinalities.push(cardinality);
        }
        VariableSet {
            variables,
            cardinalities,
        }
    }

    // Size of the union without materializing it; used by the merge scorer
    pub fn union_size(&self, other: &VariableSet) -> usize {
        let shared = self
            .variables
            .iter()
            .filter(|variable| other.contains(**variable))
            .count();
        self.len() + other.len() - shared
    }

    pub fn intersection(&self, other: &VariableSet) -> VariableSet {
        let (variables, cardinalities) = self
            .iter()
            .filter(|(variable, _)| other.contains(*variable))
            .unzip();
        VariableSet {
            variables,
            cardinalities,
        }
    }

    pub fn difference(&self, other: &VariableSet) -> VariableSet {
        let (variables, cardinalities) = self
            .iter()
            .filter(|(variable, _)| !other.contains(*variable))
            .unzip();
        VariableSet {
            variables,
            cardinalities,
        }
    }

    pub fn without(&self, variable: usize) -> VariableSet {
        let (variables, cardinalities) = self
            .iter()
            .filter(|(candidate, _)| *candidate != variable)
            .unzip();
        VariableSet {
            variables,
            cardinalities,
        }
    }
}

impl Display for VariableSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (position, variable) in self.variables.iter().enumerate() {
            if position > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", variable)?;
        }
        write!(f, "}}")
    }
}
