use std::collections::{BTreeSet, HashMap};
use std::mem;

use bitvec::prelude::LocalBits;
use bitvec::vec::BitVec;
use log::debug;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};

use crate::error::Error;
use crate::factors::factor::Factor;
use crate::factors::variable_set::VariableSet;
use crate::model::graphical_model::GraphicalModel;

use super::join_graph::{Cluster, JoinGraph};

fn sorted_pair(a: usize, b: usize) -> (usize, usize) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

// Merge score for two bucket scopes, as a priority key.
// The pair is rejected (None) when the union would exceed the i-bound,
// relaxed so that a merge may always keep the size of its larger member:
// the effective bound is max(i_bound, |F1|-1, |F2|-1), and the union must
// stay within bound + 1 (scopes still include the bucket variable).
// Otherwise the key is |F1| + |F2|: the real score is its reciprocal, so
// ordering ascending by the denominator prefers merging smaller scopes.
fn merge_score(
    scopes: &[VariableSet],
    i_bound: usize,
    first: usize,
    second: usize,
) -> Option<usize> {
    let f1 = &scopes[first];
    let f2 = &scopes[second];
    let bound = i_bound
        .max(f1.len().saturating_sub(1))
        .max(f2.len().saturating_sub(1));
    if f1.union_size(f2) > bound.saturating_add(1) {
        None
    } else {
        Some(f1.len() + f2.len())
    }
}

impl JoinGraph {
    // Runs the mini-bucket algorithm schematically (scopes only) over the
    // elimination order and connects the resulting mini-buckets into a join
    // graph: clusters, separators, schedule, roots and clique potentials.
    // i_bound = 0 means unbounded, which collapses every bucket into a single
    // cluster and makes a single propagation iteration exact.
    // Deterministic given (model, order, i_bound): the priority structure is
    // ordered by (score denominator, pair), and a merge always folds the
    // higher slot index into the lower one.
    pub fn build(
        model: &GraphicalModel,
        order: &[usize],
        i_bound: usize,
    ) -> Result<JoinGraph, Error> {
        let i_bound = if i_bound == 0 { usize::MAX } else { i_bound };
        validate_order(model, order)?;

        let num_slots = model.num_factors();

        // Live factor scopes ("slots"); merged slots take unions, absorbed
        // slots are emptied and marked
        let mut scopes: Vec<VariableSet> = model
            .factors_iter()
            .map(|factor| factor.scope().clone())
            .collect();
        let mut absorbed = BitVec::<usize, LocalBits>::repeat(false, num_slots);

        // Slot ids per variable, kept sorted ascending
        let mut buckets: Vec<Vec<usize>> = (0..model.num_variables())
            .map(|variable| model.with_variable(variable))
            .collect();

        // Per slot: original factor indices folded in so far, and the
        // clusters whose messages feed into it
        let mut originals: Vec<Vec<usize>> = (0..num_slots).map(|slot| vec![slot]).collect();
        let mut feeders: Vec<Vec<NodeIndex<usize>>> = vec![Vec::new(); num_slots];

        let mut graph: DiGraph<Cluster, VariableSet, usize> =
            DiGraph::with_capacity(num_slots, num_slots);
        let mut schedule: Vec<EdgeIndex<usize>> = Vec::new();
        let mut clusters_of: Vec<Vec<NodeIndex<usize>>> =
            vec![Vec::new(); model.num_variables()];

        for &variable in order {
            let mut ids = buckets[variable].clone();
            if ids.is_empty() {
                continue;
            }
            debug!(
                "Creating clusters for variable {} from {} bucket scopes",
                variable,
                ids.len()
            );

            // Priority structure over unordered slot pairs: a BTreeSet keyed
            // by (denominator, pair) with a side table pair -> denominator so
            // entries can be removed and rescored after each merge
            let mut queue: BTreeSet<(usize, (usize, usize))> = BTreeSet::new();
            let mut key_of: HashMap<(usize, usize), usize> = HashMap::new();
            for (position, &i) in ids.iter().enumerate() {
                for &j in &ids[..position] {
                    if let Some(denominator) = merge_score(&scopes, i_bound, i, j) {
                        let pair = sorted_pair(i, j);
                        queue.insert((denominator, pair));
                        key_of.insert(pair, denominator);
                    }
                }
            }

            // Repeatedly merge the best pair until only rejected pairs remain
            while let Some(&(denominator, (low, high))) = queue.iter().next() {
                queue.remove(&(denominator, (low, high)));
                key_of.remove(&(low, high));
                debug!("Merging bucket scopes {} and {} for variable {}", high, low, variable);

                let merged = scopes[low].union(&scopes[high]);
                for &other in scopes[high].variables() {
                    buckets[other].retain(|&slot| slot != high);
                }
                scopes[low] = merged;
                scopes[high] = VariableSet::empty();
                absorbed.set(high, true);

                let high_originals = mem::take(&mut originals[high]);
                originals[low].extend(high_originals);
                let high_feeders = mem::take(&mut feeders[high]);
                feeders[low].extend(high_feeders);

                ids.retain(|&slot| slot != high);
                for &other in &ids {
                    let pair = sorted_pair(high, other);
                    if let Some(key) = key_of.remove(&pair) {
                        queue.remove(&(key, pair));
                    }
                }
                for &other in &ids {
                    if other == low {
                        continue;
                    }
                    let pair = sorted_pair(low, other);
                    if let Some(key) = key_of.remove(&pair) {
                        queue.remove(&(key, pair));
                    }
                    if let Some(key) = merge_score(&scopes, i_bound, low, other) {
                        queue.insert((key, pair));
                        key_of.insert(pair, key);
                    }
                }
            }

            // Each surviving group becomes one cluster; its working scope
            // drops the eliminated variable before re-entering later buckets
            let mut alphas: Vec<NodeIndex<usize>> = Vec::with_capacity(ids.len());
            for &slot in &ids {
                debug_assert!(!absorbed[slot]);
                let mut cluster_originals = mem::take(&mut originals[slot]);
                cluster_originals.sort_unstable();
                let alpha = graph.add_node(Cluster {
                    scope: scopes[slot].clone(),
                    variable,
                    originals: cluster_originals,
                });
                clusters_of[variable].push(alpha);
                alphas.push(alpha);

                scopes[slot] = scopes[slot].without(variable);

                for feeder in mem::take(&mut feeders[slot]) {
                    let separator = graph[feeder].scope.intersection(&graph[alpha].scope);
                    schedule.push(graph.add_edge(feeder, alpha, separator));
                }
                feeders[slot].push(alpha);

                for &later in scopes[slot].variables() {
                    if let Err(position) = buckets[later].binary_search(&slot) {
                        buckets[later].insert(position, slot);
                    }
                }
            }

            // Extra edges chain the clusters of a split bucket together,
            // keeping the join graph connected
            for window in alphas.windows(2) {
                let separator = graph[window[0]].scope.intersection(&graph[window[1]].scope);
                schedule.push(graph.add_edge(window[0], window[1], separator));
            }
        }

        // Every variable that occurs in some factor must have produced a cluster
        for variable in 0..model.num_variables() {
            if clusters_of[variable].is_empty() && !model.with_variable(variable).is_empty() {
                return Err(Error::StructuralInconsistency(format!(
                    "variable {} occurs in a factor but produced no cluster",
                    variable
                )));
            }
        }

        let roots: Vec<NodeIndex<usize>> = graph
            .node_indices()
            .filter(|node| {
                graph
                    .neighbors_directed(*node, petgraph::Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .collect();

        // Clique potentials: product of the original factors folded into each cluster
        let potentials: Vec<Factor> = graph
            .node_indices()
            .map(|node| {
                graph[node]
                    .originals
                    .iter()
                    .fold(Factor::identity(), |potential, &index| {
                        potential.product(model.factor(index))
                    })
            })
            .collect();

        debug!(
            "Created join graph with {} clusters, {} edges, {} roots",
            graph.node_count(),
            graph.edge_count(),
            roots.len()
        );

        Ok(JoinGraph::from_parts(
            graph,
            schedule,
            clusters_of,
            roots,
            potentials,
        ))
    }
}

fn validate_order(model: &GraphicalModel, order: &[usize]) -> Result<(), Error> {
    if order.len() != model.num_variables() {
        return Err(Error::StructuralInconsistency(format!(
            "elimination order covers {} of {} variables",
            order.len(),
            model.num_variables()
        )));
    }
    let mut seen = BitVec::<usize, LocalBits>::repeat(false, model.num_variables());
    for &variable in order {
        if variable >= model.num_variables() || seen[variable] {
            return Err(Error::StructuralInconsistency(format!(
                "elimination order is not a permutation (variable {})",
                variable
            )));
        }
        seen.set(variable, true);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use petgraph::Direction::{Incoming, Outgoing};

    use crate::factors::factor::Factor;
    use crate::factors::variable_set::VariableSet;
    use crate::model::graphical_model::GraphicalModel;

    use super::*;

    // X - Y - Z chain with cardinalities 2, 2, 3
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

    // A star of pairwise factors around variable 0; i-bound 1 cannot merge
    // any two of them, so bucket 0 splits into chained clusters
    fn star_model() -> GraphicalModel {
        let mut model = GraphicalModel::new(vec![2; 4]);
        for leaf in 1..4 {
            model.add_factor(Factor::new(
                VariableSet::from_pairs(vec![(0, 2), (leaf, 2)]),
                vec![0.1, 0.9, 0.8, 0.2],
            ));
        }
        model
    }

    fn structure_fingerprint(graph: &JoinGraph) -> Vec<(Vec<usize>, usize, Vec<usize>)> {
        graph
            .node_indices()
            .map(|node| {
                let cluster = graph.cluster(node);
                (
                    cluster.scope.variables().to_vec(),
                    cluster.variable,
                    cluster.originals.clone(),
                )
            })
            .collect()
    }

    #[test]
    fn exact_bound_collapses_each_bucket() {
        let model = chain_model();
        let graph = JoinGraph::build(&model, &[0, 1, 2], 2).unwrap();

        // one cluster per variable, all connected in a chain (a tree)
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.roots().len(), 1);
        for variable in 0..3 {
            assert_eq!(graph.clusters_of(variable).len(), 1);
        }

        let first = graph.clusters_of(0)[0];
        assert_eq!(graph.cluster(first).scope.variables(), &[0, 1]);
        assert_eq!(graph.cluster(first).originals, vec![0, 1]);
    }

    #[test]
    fn construction_is_deterministic() {
        let model = star_model();
        let first = JoinGraph::build(&model, &[0, 1, 2, 3], 1).unwrap();
        let second = JoinGraph::build(&model, &[0, 1, 2, 3], 1).unwrap();

        assert_eq!(structure_fingerprint(&first), structure_fingerprint(&second));
        assert_eq!(first.schedule().len(), second.schedule().len());
        for (a, b) in first.schedule().iter().zip(second.schedule()) {
            assert_eq!(first.endpoints(*a), second.endpoints(*b));
        }
    }

    #[test]
    fn scope_bound_holds_for_every_cluster() {
        let model = star_model();
        for i_bound in 1..4 {
            let graph = JoinGraph::build(&model, &[0, 1, 2, 3], i_bound).unwrap();
            for node in graph.node_indices() {
                let cluster = graph.cluster(node);
                let max_input_arity = cluster
                    .originals
                    .iter()
                    .map(|&index| model.factor(index).scope().len())
                    .max()
                    .unwrap_or(0);
                assert!(cluster.scope.len() <= (i_bound + 1).max(max_input_arity));
            }
        }
    }

    #[test]
    fn split_bucket_is_chained() {
        let model = star_model();
        let graph = JoinGraph::build(&model, &[0, 1, 2, 3], 1).unwrap();

        // bucket 0 cannot merge {0,1}, {0,2}, {0,3} under i-bound 1
        assert_eq!(graph.clusters_of(0).len(), 3);
        for node in graph.node_indices() {
            assert!(graph.cluster(node).scope.len() <= 2);
        }

        // chain edges keep consecutive same-bucket clusters connected
        let clusters = graph.clusters_of(0);
        for window in clusters.windows(2) {
            let connected = graph
                .edges_directed(window[0], Outgoing)
                .any(|edge| petgraph::visit::EdgeRef::target(&edge) == window[1]);
            assert!(connected);
        }
    }

    #[test]
    fn separators_are_scope_intersections() {
        let model = star_model();
        let graph = JoinGraph::build(&model, &[0, 1, 2, 3], 1).unwrap();
        assert!(graph.edge_count() > 0);

        for &edge in graph.schedule() {
            let (a, b) = graph.endpoints(edge);
            let expected = graph.cluster(a).scope.intersection(&graph.cluster(b).scope);
            assert_eq!(graph.separator(edge), &expected);
            // symmetric by definition
            assert_eq!(
                &graph.cluster(b).scope.intersection(&graph.cluster(a).scope),
                graph.separator(edge)
            );
        }
    }

    #[test]
    fn schedule_respects_the_elimination_order() {
        let model = chain_model();
        let graph = JoinGraph::build(&model, &[0, 1, 2], 2).unwrap();
        for &edge in graph.schedule() {
            let (from, to) = graph.endpoints(edge);
            assert!(from.index() < to.index());
        }
    }

    #[test]
    fn roots_have_no_outgoing_edges() {
        let model = star_model();
        let graph = JoinGraph::build(&model, &[0, 1, 2, 3], 1).unwrap();
        for &root in graph.roots() {
            assert!(graph.edges_directed(root, Outgoing).next().is_none());
        }
        // and every non-root has at least one outgoing edge
        for node in graph.node_indices() {
            if !graph.roots().contains(&node) {
                assert!(graph.edges_directed(node, Outgoing).next().is_some());
            }
        }
        // incoming lists are consistent with the schedule
        let incoming_total: usize = graph
            .node_indices()
            .map(|node| graph.edges_directed(node, Incoming).count())
            .sum();
        assert_eq!(incoming_total, graph.schedule().len());
    }

    #[test]
    fn unbounded_i_bound_merges_everything() {
        let model = star_model();
        let graph = JoinGraph::build(&model, &[0, 1, 2, 3], 0).unwrap();
        assert_eq!(graph.clusters_of(0).len(), 1);
        assert_eq!(graph.cluster(graph.clusters_of(0)[0]).scope.len(), 4);
    }

    #[test]
    fn potentials_multiply_the_folded_factors() {
        let model = chain_model();
        let graph = JoinGraph::build(&model, &[0, 1, 2], 2).unwrap();
        let first = graph.clusters_of(0)[0];
        let potential = graph.potential(first);
        assert_eq!(potential.scope().variables(), &[0, 1]);
        // P(X=1) * P(Y=0 | X=1)
        assert!((potential.value_at(&[1, 0]) - 0.4 * 0.2).abs() < 1e-12);
    }

    #[test]
    fn malformed_orders_abort_construction() {
        let mut model = GraphicalModel::new(vec![2, 2]);
        model.add_factor(Factor::new(VariableSet::singleton(0, 2), vec![0.5, 0.5]));

        // a factorless variable is fine, it simply produces no cluster
        assert!(JoinGraph::build(&model, &[0, 1], 1).is_ok());

        // non-permutations are structural faults
        assert!(JoinGraph::build(&model, &[0, 0], 1).is_err());
        assert!(JoinGraph::build(&model, &[0], 1).is_err());
        assert!(JoinGraph::build(&model, &[0, 2], 1).is_err());
    }
}
