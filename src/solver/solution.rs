use std::fmt::Display;
use std::ops::{Index, IndexMut};

use crate::model::graphical_model::GraphicalModel;

// A (possibly partial) assignment: one label per variable, None = undecided
pub struct Solution {
    labels: Vec<Option<usize>>,
}

impl Solution {
    pub fn new(model: &GraphicalModel) -> Self {
        Solution {
            labels: vec![None; model.num_variables()],
        }
    }

    pub fn is_fully_labeled(&self) -> bool {
        self.labels.iter().all(|label| label.is_some())
    }

    pub fn num_labeled(&self) -> usize {
        self.labels.iter().filter(|label| label.is_some()).count()
    }

    // The complete assignment, or None while any variable is undecided
    pub fn as_complete(&self) -> Option<Vec<usize>> {
        self.labels.iter().copied().collect()
    }
}

impl Index<usize> for Solution {
    type Output = Option<usize>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.labels[index]
    }
}

impl IndexMut<usize> for Solution {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.labels[index]
    }
}

fn label_to_str(label: Option<usize>) -> String {
    match label {
        Some(label) => label.to_string(),
        None => "None".to_string(),
    }
}

impl std::fmt::Debug for Solution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}",
            self.labels
                .iter()
                .map(|label| label_to_str(*label))
                .collect::<Vec<_>>()
        )
    }
}

impl Display for Solution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}",
            self.labels
                .iter()
                .map(|label| label_to_str(*label))
                .collect::<Vec<_>>()
        )
    }
}
