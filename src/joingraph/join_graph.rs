use petgraph::graph::{DiGraph, EdgeIndex, Edges, NodeIndex};
use petgraph::Directed;
use petgraph::Direction;

use crate::factors::factor::Factor;
use crate::factors::variable_set::VariableSet;

// One mini-bucket cluster: its full scope (including the variable it was
// created for), the elimination variable it originated from, and the indices
// of the original model factors folded into it.
#[derive(Debug)]
pub struct Cluster {
    pub scope: VariableSet,
    pub variable: usize,
    pub originals: Vec<usize>,
}

// Edge weights are separators: scope(a) ∩ scope(b), computed once per edge
pub type Separator = VariableSet;
pub type JoinGraphStructure = DiGraph<Cluster, Separator, usize>;

// The immutable structural output of the mini-bucket decomposition.
// Edges are added in schedule order, so petgraph's dense edge indices double
// as message-slot indices, and `schedule` lists them in creation order; the
// backward sweep is its exact reverse.
pub struct JoinGraph {
    graph: JoinGraphStructure,
    schedule: Vec<EdgeIndex<usize>>,
    clusters_of: Vec<Vec<NodeIndex<usize>>>,
    roots: Vec<NodeIndex<usize>>,
    potentials: Vec<Factor>,
}

impl JoinGraph {
    pub(crate) fn from_parts(
        graph: JoinGraphStructure,
        schedule: Vec<EdgeIndex<usize>>,
        clusters_of: Vec<Vec<NodeIndex<usize>>>,
        roots: Vec<NodeIndex<usize>>,
        potentials: Vec<Factor>,
    ) -> Self {
        JoinGraph {
            graph,
            schedule,
            clusters_of,
            roots,
            potentials,
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex<usize>> {
        self.graph.node_indices()
    }

    pub fn cluster(&self, node: NodeIndex<usize>) -> &Cluster {
        self.graph.node_weight(node).unwrap()
    }

    pub fn separator(&self, edge: EdgeIndex<usize>) -> &Separator {
        self.graph.edge_weight(edge).unwrap()
    }

    pub fn endpoints(&self, edge: EdgeIndex<usize>) -> (NodeIndex<usize>, NodeIndex<usize>) {
        self.graph.edge_endpoints(edge).unwrap()
    }

    pub fn edges_directed(
        &self,
        node: NodeIndex<usize>,
        direction: Direction,
    ) -> Edges<'_, Separator, Directed, usize> {
        self.graph.edges_directed(node, direction)
    }

    // Message schedule in creation order; one forward and one backward
    // message slot per entry
    pub fn schedule(&self) -> &[EdgeIndex<usize>] {
        &self.schedule
    }

    // Clusters originating from the given variable, in creation order
    pub fn clusters_of(&self, variable: usize) -> &[NodeIndex<usize>] {
        &self.clusters_of[variable]
    }

    // Clusters with no outgoing schedule edge; aggregation points for the
    // global objective
    pub fn roots(&self) -> &[NodeIndex<usize>] {
        &self.roots
    }

    // The clique potential: product of the original factors folded into the cluster
    pub fn potential(&self, node: NodeIndex<usize>) -> &Factor {
        &self.potentials[node.index()]
    }
}
