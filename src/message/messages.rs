use log::debug;
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction::{Incoming, Outgoing};

use crate::factors::factor::Factor;
use crate::joingraph::join_graph::JoinGraph;

// Message slots for every schedule entry: the forward value and, in a
// parallel array, the backward value, both indexed densely by edge index.
// Slots start as scalar identities so beliefs are well defined before the
// first sweep; each sweep overwrites slots wholesale.
pub struct Messages {
    forward: Vec<Factor>,
    backward: Vec<Factor>,
}

impl Messages {
    pub fn new(graph: &JoinGraph) -> Self {
        Messages {
            forward: vec![Factor::identity(); graph.edge_count()],
            backward: vec![Factor::identity(); graph.edge_count()],
        }
    }

    pub fn forward(&self, edge: EdgeIndex<usize>) -> &Factor {
        &self.forward[edge.index()]
    }

    pub fn backward(&self, edge: EdgeIndex<usize>) -> &Factor {
        &self.backward[edge.index()]
    }

    pub fn set_forward(&mut self, edge: EdgeIndex<usize>, message: Factor) {
        self.forward[edge.index()] = message;
    }

    pub fn set_backward(&mut self, edge: EdgeIndex<usize>, message: Factor) {
        self.backward[edge.index()] = message;
    }

    // Full belief of a cluster: its potential times every incident message
    // (forward along incoming edges, backward along outgoing edges)
    pub fn belief(&self, graph: &JoinGraph, node: NodeIndex<usize>) -> Factor {
        let mut belief = graph.potential(node).clone();
        for edge in graph.edges_directed(node, Incoming) {
            belief = belief.product(&self.forward[edge.id().index()]);
        }
        for edge in graph.edges_directed(node, Outgoing) {
            belief = belief.product(&self.backward[edge.id().index()]);
        }
        belief
    }

    // Belief of a cluster excluding the messages exchanged with one neighbor,
    // used when computing the message sent towards that neighbor
    pub fn belief_excluding(
        &self,
        graph: &JoinGraph,
        node: NodeIndex<usize>,
        excluded: NodeIndex<usize>,
    ) -> Factor {
        debug!(
            "In belief_excluding() for cluster {} without neighbor {}",
            node.index(),
            excluded.index()
        );

        let mut belief = graph.potential(node).clone();
        for edge in graph.edges_directed(node, Incoming) {
            if edge.source() == excluded {
                continue;
            }
            belief = belief.product(&self.forward[edge.id().index()]);
        }
        for edge in graph.edges_directed(node, Outgoing) {
            if edge.target() == excluded {
                continue;
            }
            belief = belief.product(&self.backward[edge.id().index()]);
        }
        belief
    }

    // Belief of a cluster from forward (incoming) messages only; backward
    // contributions are excluded during MAP decoding because they carry
    // information about variables not yet decided
    pub fn incoming(&self, graph: &JoinGraph, node: NodeIndex<usize>) -> Factor {
        let mut belief = graph.potential(node).clone();
        for edge in graph.edges_directed(node, Incoming) {
            belief = belief.product(&self.forward[edge.id().index()]);
        }
        belief
    }
}
