use std::fmt::{Display, Formatter};
use std::ops::BitOr;

mod edge_index;
mod graph;
mod matcher;
mod parsimony;
mod path;
mod rates;
mod reference;
mod scheduler;

pub use edge_index::GraphView;
pub use graph::{AncestryGraph, Edge, ExcludedSite, GraphTables, Mutation, Node, SiteMutation};
pub use matcher::{MatchEngine, ViterbiMatcher};
pub use parsimony::map_excluded_sites;
pub use path::{CopyPath, MatchQuery, PathEdge, PathMutation};
pub use rates::RateMap;
pub use reference::ReferenceMatcher;
pub use scheduler::{EngineFactory, EpochScheduler, ResultBuffer};

/// The node of the root ancestor. It has no parent and every other node descends from it.
pub const ROOT: NodeId = NodeId(0);

/// Identifies a node of the [`AncestryGraph`]. Ids are dense and assigned in insertion order,
/// so ancestor `i` of an [`crate::ancestors::AncestorArray`] is node `i`.
#[derive(
    Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn from_usize(id: usize) -> Self {
        Self(id)
    }

    /// Get the underlying index of the node.
    pub fn unwrap(&self) -> usize {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Bit set of node properties.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct NodeFlags(u32);

impl NodeFlags {
    pub const NONE: NodeFlags = NodeFlags(0);
    /// The node is an observed sample.
    pub const SAMPLE: NodeFlags = NodeFlags(1);
    /// The node was created by path compression and has no haplotype of its own.
    pub const PATH_COMPRESSED: NodeFlags = NodeFlags(1 << 1);
    /// The node is a sample that was inserted as an extra ancestor by
    /// [`EpochScheduler::augment_ancestors`].
    pub const SAMPLE_ANCESTOR: NodeFlags = NodeFlags(1 << 2);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: NodeFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for NodeFlags {
    type Output = NodeFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        NodeFlags(self.0 | rhs.0)
    }
}
