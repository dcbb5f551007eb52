use std::time::{Duration, Instant};

use log::{debug, info};
use petgraph::graph::NodeIndex;

use crate::error::Error;
use crate::factors::factor::Factor;
use crate::factors::variable_set::VariableSet;
use crate::joingraph::join_graph::JoinGraph;
use crate::message::messages::Messages;
use crate::model::graphical_model::GraphicalModel;

use super::solution::Solution;
use super::solver::{Solver, SolverOptions, Task};

// Iterative propagation over a mini-bucket join graph.
//
// Each iteration runs one forward sweep over the construction-order schedule
// and one backward sweep over its exact reverse, then refreshes per-variable
// beliefs (PR/MAR) or decodes an assignment (MAP). With an i-bound at or
// above the induced width of the order the join graph is a tree and a single
// iteration is exact; below it the graph is cyclic and this is loopy
// propagation, so convergence is not guaranteed and the running objective is
// not a bound (clusters overcount evidence on cycles).
pub struct IJGP<'a> {
    model: &'a GraphicalModel,
    graph: JoinGraph,
    messages: Messages,
    task: Task,
    order: Vec<usize>,
    pseudo_tree: Vec<Option<usize>>,
    exact: bool,
    log_z: f64,
    beliefs: Vec<Factor>,
    solution: Solution,
    iterations: usize,
    elapsed: Duration,
    converged: bool,
}

impl<'a> IJGP<'a> {
    // Sum or max elimination depending on the task
    fn eliminate(&self, factor: &Factor, eliminated: &VariableSet) -> Factor {
        match self.task {
            Task::MAP => factor.max_eliminate(eliminated),
            Task::PR | Task::MAR => factor.sum_eliminate(eliminated),
        }
    }

    // Forward sweep in schedule creation order. Every message is normalized
    // by its maximum for numerical stability and the logs of the divisors
    // accumulate into the running objective; the root beliefs contribute the
    // remainder. A message normalizing to zero turns the objective non-finite
    // on purpose: it signals zero-probability evidence.
    fn forward_pass(&mut self) {
        debug!("Begin forward (top-down) pass");
        self.log_z = 0.;

        for position in 0..self.graph.schedule().len() {
            let edge = self.graph.schedule()[position];
            let (from, to) = self.graph.endpoints(edge);
            let eliminated = self
                .graph
                .cluster(from)
                .scope
                .difference(self.graph.separator(edge));

            let belief = self.messages.belief_excluding(&self.graph, from, to);
            let mut message = self.eliminate(&belief, &eliminated);
            let max = message.max();
            message.div_assign_scalar(max);
            self.log_z += max.ln();
            self.messages.set_forward(edge, message);
        }

        // roots aggregate the rest of the objective
        for &root in self.graph.roots() {
            let belief = self.messages.belief(&self.graph, root);
            self.log_z += match self.task {
                Task::MAP => belief.max().ln(),
                Task::PR | Task::MAR => belief.sum().ln(),
            };
        }

        debug!("Finished forward pass with objective {}", self.log_z);
    }

    // Backward sweep in exact reverse schedule order; no log accumulation
    fn backward_pass(&mut self) {
        debug!("Begin backward (bottom-up) pass");

        for position in (0..self.graph.schedule().len()).rev() {
            let edge = self.graph.schedule()[position];
            let (from, to) = self.graph.endpoints(edge);
            let eliminated = self
                .graph
                .cluster(to)
                .scope
                .difference(self.graph.separator(edge));

            let belief = self.messages.belief_excluding(&self.graph, to, from);
            let mut message = self.eliminate(&belief, &eliminated);
            let max = message.max();
            message.div_assign_scalar(max);
            self.messages.set_backward(edge, message);
        }
    }

    // Refreshes per-variable beliefs from the current messages, or decodes a
    // MAP assignment. Variables without a cluster (no factor mentions them)
    // keep their uniform default.
    fn update(&mut self) {
        match self.task {
            Task::PR | Task::MAR => {
                for variable in 0..self.model.num_variables() {
                    let Some(&cluster) = self.graph.clusters_of(variable).first() else {
                        continue;
                    };
                    let belief = self.messages.belief(&self.graph, cluster);
                    let kept =
                        VariableSet::singleton(variable, self.model.cardinality(variable));
                    let mut marginal = belief.marginal(&kept);
                    marginal.normalize();
                    self.beliefs[variable] = marginal;
                }
            }
            Task::MAP => {
                for variable in 0..self.model.num_variables() {
                    let Some(&cluster) = self.graph.clusters_of(variable).first() else {
                        continue;
                    };
                    let belief = self.messages.belief(&self.graph, cluster);
                    let kept =
                        VariableSet::singleton(variable, self.model.cardinality(variable));
                    let mut marginal = belief.max_marginal(&kept);
                    let max = marginal.max();
                    marginal.div_assign_scalar(max);
                    self.beliefs[variable] = marginal;
                }
                self.decode_assignment();
            }
        }
    }

    // Greedy MAP decode: walk variables in reverse elimination order, use the
    // origin cluster's forward-only belief, condition on every already
    // decided later variable sharing its scope, then take the arg-max state.
    // Locally consistent; on a cyclic join graph not guaranteed globally
    // optimal, and the conditioning assumes the origin cluster still contains
    // the later-eliminated variables it needs.
    fn decode_assignment(&mut self) {
        for position in (0..self.order.len()).rev() {
            let variable = self.order[position];
            let Some(&cluster) = self.graph.clusters_of(variable).first() else {
                self.solution[variable] = Some(0);
                continue;
            };
            let mut belief = self.messages.incoming(&self.graph, cluster);

            for later_position in ((position + 1)..self.order.len()).rev() {
                let later = self.order[later_position];
                if !self.graph.cluster(cluster).scope.contains(later) {
                    continue;
                }
                if let Some(state) = self.solution[later] {
                    belief = belief.condition(later, state);
                }
            }

            let kept = VariableSet::singleton(variable, self.model.cardinality(variable));
            let marginal = belief.max_marginal(&kept);
            self.solution[variable] = Some(marginal.argmax());
        }
    }

    // The running log-objective: log-partition estimate for PR/MAR, log of
    // the MAP value for MAP. Not a bound in either direction.
    pub fn log_z(&self) -> f64 {
        self.log_z
    }

    pub fn belief(&self, variable: usize) -> &Factor {
        &self.beliefs[variable]
    }

    pub fn beliefs(&self) -> &[Factor] {
        &self.beliefs
    }

    // Full belief of one cluster (potential times all incident messages)
    pub fn cluster_belief(&self, cluster: NodeIndex<usize>) -> Factor {
        self.messages.belief(&self.graph, cluster)
    }

    // Beliefs over arbitrary variable sets are not supported: the join graph
    // only carries marginals per variable or per cluster
    pub fn belief_over(&self, variables: &VariableSet) -> Result<Factor, Error> {
        Err(Error::UnsupportedBeliefQuery(
            variables.variables().to_vec(),
        ))
    }

    // Always fails: cluster overcounting invalidates bounding guarantees
    pub fn upper_bound(&self) -> Result<f64, Error> {
        Err(Error::BoundNotSupported)
    }

    // Always fails, same reason as `upper_bound`
    pub fn lower_bound(&self) -> Result<f64, Error> {
        Err(Error::BoundNotSupported)
    }

    pub fn solution(&self) -> &Solution {
        &self.solution
    }

    pub fn join_graph(&self) -> &JoinGraph {
        &self.graph
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn pseudo_tree(&self) -> &[Option<usize>] {
        &self.pseudo_tree
    }

    pub fn is_exact(&self) -> bool {
        self.exact
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn converged(&self) -> bool {
        self.converged
    }
}

impl<'a> Solver<'a> for IJGP<'a> {
    fn init(model: &'a GraphicalModel, options: &SolverOptions) -> Result<Self, Error> {
        let order = match options.order() {
            Some(order) => order.clone(),
            None => model.order(options.order_method()),
        };
        let pseudo_tree = match options.pseudo_tree() {
            Some(pseudo_tree) => pseudo_tree.clone(),
            None => model.pseudo_tree(&order),
        };

        let induced_width = model.induced_width(&order);
        let exact = options.i_bound() == 0 || options.i_bound() >= induced_width;
        info!(
            "Initializing join-graph propagation: i-bound {}, induced width {}, exact {}",
            options.i_bound(),
            induced_width,
            exact
        );

        let graph = JoinGraph::build(model, &order, options.i_bound())?;
        let messages = Messages::new(&graph);

        // pre-iteration defaults: uniform marginals, undecided assignment
        let beliefs = (0..model.num_variables())
            .map(|variable| {
                let cardinality = model.cardinality(variable);
                let mut belief = Factor::new(
                    VariableSet::singleton(variable, cardinality),
                    vec![1.; cardinality],
                );
                belief.normalize();
                belief
            })
            .collect();

        Ok(IJGP {
            model,
            graph,
            messages,
            task: options.task(),
            order,
            pseudo_tree,
            exact,
            log_z: 0.,
            beliefs,
            solution: Solution::new(model),
            iterations: 0,
            elapsed: Duration::ZERO,
            converged: false,
        })
    }

    fn run(mut self, options: &SolverOptions) -> Self {
        let time_start = Instant::now();
        // exact inference needs exactly one sweep over the join tree
        let max_iterations = if self.exact { 1 } else { options.max_iterations() };

        loop {
            // the only cancellation point: between iterations
            if time_start.elapsed() >= options.time_max() {
                break;
            }

            let previous = self.log_z;
            self.forward_pass();
            self.backward_pass();
            self.update();
            self.iterations += 1;

            let delta = (self.log_z - previous).abs();
            info!(
                "IJGP iteration {}: objective {:.6} (delta {:.3e}, elapsed {:?})",
                self.iterations,
                self.log_z,
                delta,
                time_start.elapsed()
            );

            if self.exact || delta < options.eps() {
                self.converged = true;
                break;
            }
            if self.iterations >= max_iterations {
                break;
            }
        }

        self.elapsed = time_start.elapsed();
        self
    }
}

#[cfg(test)]
mod tests {
    use crate::factors::factor::Factor;

    use super::*;

    // X - Y - Z chain with cardinalities 2, 2, 3:
    // P(X), P(Y|X), P(Z|Y) as conditional tables
    fn chain_model() -> GraphicalModel {
        let mut model = GraphicalModel::new(vec![2, 2, 3]);
        model.add_factor(Factor::new(VariableSet::singleton(0, 2), vec![0.6, 0.4]));
        model.add_factor(Factor::new(
            VariableSet::from_pairs(vec![(0, 2), (1, 2)]),
            vec![0.7, 0.3, 0.2, 0.8],
        ));
        model.add_factor(Factor::new(
            VariableSet::from_pairs(vec![(1, 2), (2, 3)]),
            vec![0.5, 0.25, 0.25, 0.1, 0.3, 0.6],
        ));
        model
    }

    // a cycle of pairwise factors, induced width 2: loopy under i-bound 1
    fn triangle_model() -> GraphicalModel {
        let mut model = GraphicalModel::new(vec![2, 2, 2]);
        for (a, b) in [(0, 1), (1, 2), (0, 2)] {
            model.add_factor(Factor::new(
                VariableSet::from_pairs(vec![(a, 2), (b, 2)]),
                vec![1.2, 0.4, 0.6, 1.5],
            ));
        }
        model
    }

    fn joint_states(cardinalities: &[usize]) -> Vec<Vec<usize>> {
        let mut states = vec![vec![0; cardinalities.len()]];
        let total: usize = cardinalities.iter().product();
        let mut current = vec![0; cardinalities.len()];
        for _ in 1..total {
            for position in (0..cardinalities.len()).rev() {
                current[position] += 1;
                if current[position] < cardinalities[position] {
                    break;
                }
                current[position] = 0;
            }
            states.push(current.clone());
        }
        states
    }

    fn brute_force_log_z(model: &GraphicalModel) -> f64 {
        joint_states(model.cardinalities())
            .iter()
            .map(|state| model.log_probability(state).exp())
            .sum::<f64>()
            .ln()
    }

    fn brute_force_marginal(model: &GraphicalModel, variable: usize) -> Vec<f64> {
        let mut marginal = vec![0.; model.cardinality(variable)];
        for state in joint_states(model.cardinalities()) {
            marginal[state[variable]] += model.log_probability(&state).exp();
        }
        let total: f64 = marginal.iter().sum();
        marginal.iter().map(|mass| mass / total).collect()
    }

    fn brute_force_map(model: &GraphicalModel) -> (Vec<usize>, f64) {
        joint_states(model.cardinalities())
            .into_iter()
            .map(|state| {
                let log_probability = model.log_probability(&state);
                (state, log_probability)
            })
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
            .unwrap()
    }

    fn options_for(task: Task, i_bound: usize) -> SolverOptions {
        let mut options = SolverOptions::default();
        options
            .set_task(task)
            .set_i_bound(i_bound)
            .set_order(vec![0, 1, 2]);
        options
    }

    #[test]
    fn exact_marginals_on_the_chain() {
        let model = chain_model();
        let options = options_for(Task::MAR, 2);
        let solver = IJGP::init(&model, &options).unwrap().run(&options);

        assert!(solver.is_exact());
        assert_eq!(solver.iterations(), 1);
        assert!(solver.converged());

        for variable in 0..3 {
            let expected = brute_force_marginal(&model, variable);
            let belief = solver.belief(variable);
            assert_eq!(belief.scope().variables(), &[variable]);
            for (state, probability) in expected.iter().enumerate() {
                assert!(
                    (belief[state] - probability).abs() < 1e-9,
                    "marginal mismatch for variable {} state {}",
                    variable,
                    state
                );
            }
        }
    }

    #[test]
    fn exact_log_partition_on_the_chain() {
        let model = chain_model();
        let options = options_for(Task::PR, 2);
        let solver = IJGP::init(&model, &options).unwrap().run(&options);

        assert!((solver.log_z() - brute_force_log_z(&model)).abs() < 1e-9);
    }

    #[test]
    fn exact_map_assignment_on_the_chain() {
        let model = chain_model();
        let options = options_for(Task::MAP, 2);
        let solver = IJGP::init(&model, &options).unwrap().run(&options);

        let (expected_assignment, expected_value) = brute_force_map(&model);
        let decoded = solver.solution().as_complete().unwrap();
        assert_eq!(decoded, expected_assignment);

        // the reported objective is the log-MAP-value in the exact regime
        assert!((solver.log_z() - expected_value).abs() < 1e-9);
        // and the decoded assignment really has that probability
        assert!((model.log_probability(&decoded) - expected_value).abs() < 1e-9);
    }

    #[test]
    fn map_decode_is_sound_under_a_small_i_bound() {
        let model = triangle_model();
        let mut options = options_for(Task::MAP, 1);
        options.set_max_iterations(10);
        let solver = IJGP::init(&model, &options).unwrap().run(&options);

        let decoded = solver.solution().as_complete().unwrap();
        assert!(model.log_probability(&decoded).is_finite());
    }

    #[test]
    fn split_buckets_still_terminate() {
        let model = chain_model();
        let mut options = options_for(Task::MAR, 1);
        options.set_max_iterations(25);
        let solver = IJGP::init(&model, &options).unwrap().run(&options);

        for node in solver.join_graph().node_indices() {
            assert!(solver.join_graph().cluster(node).scope.len() <= 2);
        }
        assert!(solver.iterations() <= 25);
        assert!(solver.log_z().is_finite());
    }

    #[test]
    fn loopy_propagation_respects_the_iteration_cap() {
        let model = triangle_model();
        let mut options = options_for(Task::PR, 1);
        // zero tolerance: the delta test can never stop a noisy sequence early
        options.set_max_iterations(7).set_eps(0.);
        let solver = IJGP::init(&model, &options).unwrap().run(&options);

        assert!(!solver.is_exact());
        assert_eq!(solver.iterations(), 7);
        assert!(solver.log_z().is_finite());
    }

    #[test]
    fn expired_time_budget_returns_defaults() {
        let model = chain_model();
        let mut options = options_for(Task::MAR, 2);
        options.set_time_max(Duration::ZERO);
        let solver = IJGP::init(&model, &options).unwrap().run(&options);

        assert_eq!(solver.iterations(), 0);
        assert!(!solver.converged());
        // pre-iteration defaults: uniform marginals
        for variable in 0..3 {
            let belief = solver.belief(variable);
            let uniform = 1. / model.cardinality(variable) as f64;
            for state in 0..model.cardinality(variable) {
                assert!((belief[state] - uniform).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn bounds_are_permanently_unsupported() {
        let model = chain_model();
        let options = options_for(Task::PR, 2);
        let solver = IJGP::init(&model, &options).unwrap().run(&options);

        assert!(matches!(solver.upper_bound(), Err(Error::BoundNotSupported)));
        assert!(matches!(solver.lower_bound(), Err(Error::BoundNotSupported)));

        let query = VariableSet::from_pairs(vec![(0, 2), (1, 2)]);
        assert!(matches!(
            solver.belief_over(&query),
            Err(Error::UnsupportedBeliefQuery(_))
        ));
    }

    #[test]
    fn zero_probability_evidence_surfaces_as_non_finite() {
        let mut model = GraphicalModel::new(vec![2, 2]);
        model.add_factor(Factor::new(
            VariableSet::from_pairs(vec![(0, 2), (1, 2)]),
            vec![1., 0., 0., 1.],
        ));
        // contradictory evidence on both endpoints
        let conditioned = model.condition(&[(0, 0), (1, 1)]);

        let mut options = SolverOptions::default();
        options.set_task(Task::PR).set_i_bound(2).set_order(vec![0, 1]);
        let solver = IJGP::init(&conditioned, &options).unwrap().run(&options);
        assert!(!solver.log_z().is_finite());
    }

    #[test]
    fn evidence_yields_probability_of_evidence() {
        let model = chain_model();
        let conditioned = model.condition(&[(2, 1)]);
        let mut options = SolverOptions::default();
        options.set_task(Task::PR).set_i_bound(3).set_order(vec![0, 1, 2]);
        let solver = IJGP::init(&conditioned, &options).unwrap().run(&options);

        let expected = brute_force_log_z(&conditioned);
        assert!((solver.log_z() - expected).abs() < 1e-9);
    }
}
