use thiserror::Error;

// Crate-wide error type.
// Bound queries are permanently unsupported: the join graph overcounts
// evidence on cycles, so the running objective is not a valid bound.
#[derive(Debug, Error)]
pub enum Error {
    #[error("join-graph propagation does not compute an upper or lower bound due to overcounting")]
    BoundNotSupported,

    #[error("beliefs are only available for a single variable or a whole cluster, not over {0:?}")]
    UnsupportedBeliefQuery(Vec<usize>),

    #[error("inconsistent join-graph structure: {0}")]
    StructuralInconsistency(String),

    #[error("malformed UAI input: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
