use crate::ts::NodeId;
use crate::variants::{MutationState, VariantIndex};

/// One segment of a copying path: the query copies `parent` over the sites `[left, right)`.
/// The edge is associated with the child node, hence only the parent is stored.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PathEdge {
    pub left: VariantIndex,
    pub right: VariantIndex,
    pub parent: NodeId,
}

impl PathEdge {
    pub fn new(left: VariantIndex, right: VariantIndex, parent: NodeId) -> Self {
        Self {
            left,
            right,
            parent,
        }
    }
}

/// A site where the query disagrees with the allele of the node it copies.
#[derive(Copy, Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PathMutation {
    pub site: VariantIndex,
    pub derived_state: MutationState,
}

/// The result of matching a haplotype: a tiling of the query interval with edges, ordered by
/// site, and the mutations needed to explain the haplotype given those edges.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CopyPath {
    pub edges: Vec<PathEdge>,
    pub mutations: Vec<PathMutation>,
}

impl CopyPath {
    /// An empty path. Its node copies nothing and is implicitly attached to the root.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// The first site covered by the path
    pub fn start(&self) -> Option<VariantIndex> {
        self.edges.first().map(|e| e.left)
    }

    /// The site after the last site covered by the path
    pub fn end(&self) -> Option<VariantIndex> {
        self.edges.last().map(|e| e.right)
    }
}

/// A haplotype to match against a [`super::GraphView`].
///
/// `haplotype` is indexed by site and spans every site of the view, but only `[start, end)`
/// is read. Sites listed in `masked` are hidden from the Viterbi recursion (every state explains
/// them equally well), which is how the focal sites of an ancestor are matched. Mutations are
/// still reported against the unmasked haplotype.
#[derive(Clone, Copy, Debug)]
pub struct MatchQuery<'a> {
    pub haplotype: &'a [MutationState],
    pub start: VariantIndex,
    pub end: VariantIndex,
    pub masked: &'a [VariantIndex],
}

impl<'a> MatchQuery<'a> {
    /// Query over the full length of a haplotype without masked sites.
    pub fn full(haplotype: &'a [MutationState]) -> Self {
        Self {
            haplotype,
            start: VariantIndex(0),
            end: VariantIndex(haplotype.len()),
            masked: &[],
        }
    }
}
