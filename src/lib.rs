pub mod error;

pub mod factors {
    pub mod factor;
    pub mod variable_set;
}

pub mod model {
    pub mod graphical_model;
    pub mod uai;
}

pub mod joingraph {
    pub mod builder;
    pub mod join_graph;
}

pub mod message {
    pub mod messages;
}

pub mod solver {
    pub mod ijgp;
    pub mod solution;
    pub mod solver;
}

pub use error::Error;
pub use factors::factor::Factor;
pub use factors::variable_set::VariableSet;
pub use joingraph::join_graph::JoinGraph;
pub use model::graphical_model::{GraphicalModel, OrderMethod};
pub use model::uai::UAI;
pub use solver::ijgp::IJGP;
pub use solver::solution::Solution;
pub use solver::solver::{Solver, SolverOptions, Task};
