use std::time::Duration;

use crate::error::Error;
use crate::model::graphical_model::{GraphicalModel, OrderMethod};

// Inference tasks: partition function (PR), posterior marginals (MAR),
// maximum-aposteriori assignment (MAP). PR and MAR use sum elimination,
// MAP uses max elimination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Task {
    PR,
    MAR,
    MAP,
}

pub struct SolverOptions {
    i_bound: usize, // 0 means unbounded (exact inference)
    max_iterations: usize,
    time_max: Duration,
    eps: f64,
    task: Task,
    order_method: OrderMethod,
    order: Option<Vec<usize>>,
    pseudo_tree: Option<Vec<Option<usize>>>,
}

impl SolverOptions {
    pub fn default() -> Self {
        SolverOptions {
            i_bound: 4,
            max_iterations: 10,
            time_max: Duration::new(20 * 60, 0), // 20 minutes
            eps: 1e-8,
            task: Task::MAR,
            order_method: OrderMethod::MinFill,
            order: None,
            pseudo_tree: None,
        }
    }

    pub fn set_i_bound(&mut self, value: usize) -> &mut Self {
        self.i_bound = value;
        self
    }

    pub fn set_max_iterations(&mut self, value: usize) -> &mut Self {
        self.max_iterations = value;
        self
    }

    pub fn set_time_max(&mut self, value: Duration) -> &mut Self {
        self.time_max = value;
        self
    }

    pub fn set_eps(&mut self, value: f64) -> &mut Self {
        self.eps = value;
        self
    }

    pub fn set_task(&mut self, value: Task) -> &mut Self {
        self.task = value;
        self
    }

    pub fn set_order_method(&mut self, value: OrderMethod) -> &mut Self {
        self.order_method = value;
        self.order = None;
        self.pseudo_tree = None;
        self
    }

    // Overrides the order heuristic with an explicit elimination order
    pub fn set_order(&mut self, value: Vec<usize>) -> &mut Self {
        self.order = Some(value);
        self.pseudo_tree = None;
        self
    }

    pub fn set_pseudo_tree(&mut self, value: Vec<Option<usize>>) -> &mut Self {
        self.pseudo_tree = Some(value);
        self
    }

    pub fn i_bound(&self) -> usize {
        self.i_bound
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn time_max(&self) -> Duration {
        self.time_max
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    pub fn task(&self) -> Task {
        self.task
    }

    pub fn order_method(&self) -> OrderMethod {
        self.order_method
    }

    pub fn order(&self) -> Option<&Vec<usize>> {
        self.order.as_ref()
    }

    pub fn pseudo_tree(&self) -> Option<&Vec<Option<usize>>> {
        self.pseudo_tree.as_ref()
    }
}

pub trait Solver<'a>: Sized {
    fn init(model: &'a GraphicalModel, options: &SolverOptions) -> Result<Self, Error>;
    fn run(self, options: &SolverOptions) -> Self;
}
