use crate::ts::NodeId;
use crate::variants::{MutationState, VariantIndex};

/// Errors raised while building an ancestry graph. Input validation errors are raised before
/// the graph is touched, all other errors abort the running inference.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("variant site is empty")]
    EmptySite,

    #[error("variant site at position {position} has {found} genotypes, expected {expected}")]
    GenotypeLength {
        position: f64,
        found: usize,
        expected: usize,
    },

    #[error("site positions must be strictly increasing, but {position} follows {previous}")]
    UnsortedPosition { position: f64, previous: f64 },

    #[error("position {position} lies outside of a sequence of length {sequence_length}")]
    PositionOutOfRange { position: f64, sequence_length: f64 },

    #[error("variant site at position {position} has invalid time {time}")]
    NonFiniteTime { position: f64, time: f64 },

    #[error("user-supplied site times cannot be mixed with frequency-derived times")]
    MixedSiteTimes,

    #[error("{name} array has {found} entries, expected {expected}")]
    RateLength {
        name: &'static str,
        found: usize,
        expected: usize,
    },

    #[error("{name} probability {value} at index {index} is outside of [0, 0.5]")]
    InvalidProbability {
        name: &'static str,
        index: usize,
        value: f64,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid match query: {0}")]
    InvalidQuery(String),

    #[error("node {0} does not exist")]
    UnknownNode(NodeId),

    #[error("node {child} (time {child_time}) cannot copy from node {parent} (time {parent_time})")]
    TimeInversion {
        child: NodeId,
        child_time: f64,
        parent: NodeId,
        parent_time: f64,
    },

    #[error("path of node {child} is malformed: {reason}")]
    MalformedPath { child: NodeId, reason: String },

    #[error("graph tables are inconsistent: {0}")]
    InvalidTables(String),

    #[error("no copying state has a non-zero likelihood at site {site}")]
    ZeroLikelihood { site: VariantIndex },

    #[error("matching worker failed: {0}")]
    Worker(String),

    #[error("could not build thread pool: {0}")]
    ThreadPool(String),

    #[error("extended checks failed for node {node}: {detail}")]
    DeterminismViolation { node: NodeId, detail: String },

    #[error("graph does not match the variant data: {0}")]
    Verification(String),

    #[error("sample {sample} carries {found} at position {position}, expected {expected}")]
    GenotypeMismatch {
        sample: usize,
        position: f64,
        expected: MutationState,
        found: MutationState,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
