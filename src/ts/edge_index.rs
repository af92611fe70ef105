use crate::ts::{NodeFlags, NodeId, PathEdge, PathMutation, ROOT};
use crate::variants::{MutationState, VariantIndex, ANCESTRAL_STATE};

/// The kind of change a site brings to the marginal tree of a node.
/// Kinds are ordered so that nodes switching parents are handled before new nodes appear and
/// before ending nodes disappear at the same site.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) enum EdgeEventKind {
    ChangeParent { from: NodeId, to: NodeId },
    Start { parent: NodeId },
    End { parent: NodeId },
}

/// A change of the marginal tree at a site, caused by the edges of `child`.
/// Events are ordered by site, then kind, then child.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct EdgeEvent {
    pub(crate) site: VariantIndex,
    pub(crate) kind: EdgeEventKind,
    pub(crate) child: NodeId,
}

/// Convert the sorted, non-overlapping edges of a child into marginal tree events.
/// Adjacent edges produce a single parent change, gaps produce an end and a new start.
pub(crate) fn edge_events(child: NodeId, edges: &[PathEdge]) -> Vec<EdgeEvent> {
    let mut events = Vec::with_capacity(edges.len() + 1);
    for (i, edge) in edges.iter().enumerate() {
        let previous = i.checked_sub(1).map(|p| &edges[p]);
        match previous {
            Some(prev) if prev.right == edge.left => events.push(EdgeEvent {
                site: edge.left,
                kind: EdgeEventKind::ChangeParent {
                    from: prev.parent,
                    to: edge.parent,
                },
                child,
            }),
            _ => events.push(EdgeEvent {
                site: edge.left,
                kind: EdgeEventKind::Start {
                    parent: edge.parent,
                },
                child,
            }),
        }

        let next = edges.get(i + 1);
        if next.map_or(true, |next| next.left != edge.right) {
            events.push(EdgeEvent {
                site: edge.right,
                kind: EdgeEventKind::End {
                    parent: edge.parent,
                },
                child,
            });
        }
    }
    events
}

/// Build offsets into a list sorted by a key in `0..num_keys`, so that the entries with key `k`
/// are found at `offsets[k]..offsets[k + 1]`.
fn offsets_by_key(keys: impl Iterator<Item = usize>, num_keys: usize) -> Vec<usize> {
    let mut offsets = vec![0; num_keys + 1];
    for key in keys {
        offsets[key + 1] += 1;
    }
    for k in 0..num_keys {
        offsets[k + 1] += offsets[k];
    }
    offsets
}

/// An immutable snapshot of an [`super::AncestryGraph`], taken by [`super::AncestryGraph::freeze`].
///
/// Matching workers only ever read from a view, so commits to the graph during a round cannot be
/// observed by the round. The view owns copies of everything it exposes.
#[derive(Clone, Debug)]
pub struct GraphView {
    num_sites: usize,
    times: Vec<f64>,
    flags: Vec<NodeFlags>,

    /// marginal tree events sorted by site, kind and child
    events: Vec<EdgeEvent>,
    /// events at site `s` are `events[event_offsets[s]..event_offsets[s + 1]]`
    event_offsets: Vec<usize>,

    site_mutations: Vec<(NodeId, MutationState)>,
    site_mutation_offsets: Vec<usize>,

    child_edges: Vec<PathEdge>,
    child_edge_offsets: Vec<usize>,

    node_mutations: Vec<PathMutation>,
    node_mutation_offsets: Vec<usize>,
}

impl GraphView {
    /// Assemble a view. `events` must be sorted, `edges` and `mutations` are indexed by node and
    /// sorted by site.
    pub(crate) fn new(
        num_sites: usize,
        times: Vec<f64>,
        flags: Vec<NodeFlags>,
        edges: &[Vec<PathEdge>],
        mutations: &[Vec<PathMutation>],
        events: Vec<EdgeEvent>,
    ) -> Self {
        debug_assert!(events.windows(2).all(|pair| pair[0] <= pair[1]));
        let num_nodes = times.len();

        let event_offsets = offsets_by_key(events.iter().map(|e| e.site.0), num_sites + 1);

        let mut site_mutations: Vec<(VariantIndex, NodeId, MutationState)> = mutations
            .iter()
            .enumerate()
            .flat_map(|(node, list)| {
                list.iter()
                    .map(move |m| (m.site, NodeId(node), m.derived_state))
            })
            .collect();
        site_mutations.sort_unstable();
        let site_mutation_offsets =
            offsets_by_key(site_mutations.iter().map(|m| m.0 .0), num_sites);

        let child_edge_offsets = offsets_by_key(
            edges
                .iter()
                .enumerate()
                .flat_map(|(node, list)| std::iter::repeat(node).take(list.len())),
            num_nodes,
        );
        let node_mutation_offsets = offsets_by_key(
            mutations
                .iter()
                .enumerate()
                .flat_map(|(node, list)| std::iter::repeat(node).take(list.len())),
            num_nodes,
        );

        Self {
            num_sites,
            times,
            flags,
            events,
            event_offsets,
            site_mutations: site_mutations
                .into_iter()
                .map(|(_, node, state)| (node, state))
                .collect(),
            site_mutation_offsets,
            child_edges: edges.iter().flatten().copied().collect(),
            child_edge_offsets,
            node_mutations: mutations.iter().flatten().copied().collect(),
            node_mutation_offsets,
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.times.len()
    }

    pub fn num_sites(&self) -> usize {
        self.num_sites
    }

    pub fn num_edges(&self) -> usize {
        self.child_edges.len()
    }

    pub fn time(&self, node: NodeId) -> f64 {
        self.times[node.0]
    }

    pub fn flags(&self, node: NodeId) -> NodeFlags {
        self.flags[node.0]
    }

    /// Marginal tree events that take effect when moving onto `site`.
    pub(crate) fn events_at(&self, site: usize) -> &[EdgeEvent] {
        &self.events[self.event_offsets[site]..self.event_offsets[site + 1]]
    }

    /// All events up to and including `site`. Replaying them builds the marginal tree of `site`.
    pub(crate) fn events_through(&self, site: usize) -> &[EdgeEvent] {
        &self.events[..self.event_offsets[site + 1]]
    }

    /// Mutations at `site`, ordered by node.
    pub fn mutations_at(&self, site: usize) -> &[(NodeId, MutationState)] {
        &self.site_mutations
            [self.site_mutation_offsets[site]..self.site_mutation_offsets[site + 1]]
    }

    /// The edges of `node`, ordered by site.
    pub fn edges_of(&self, node: NodeId) -> &[PathEdge] {
        &self.child_edges[self.child_edge_offsets[node.0]..self.child_edge_offsets[node.0 + 1]]
    }

    /// The parent `node` copies at `site`, if any.
    pub fn parent_at(&self, node: NodeId, site: VariantIndex) -> Option<NodeId> {
        let edges = self.edges_of(node);
        let index = edges.partition_point(|e| e.right <= site);
        edges
            .get(index)
            .filter(|e| e.left <= site)
            .map(|e| e.parent)
    }

    /// Whether `node` can be copied at `site`: the root always can, any other node only where
    /// it has a parent itself.
    pub fn is_live(&self, node: NodeId, site: VariantIndex) -> bool {
        node == ROOT || self.parent_at(node, site).is_some()
    }

    /// The allele `node` carries at `site`: the state of the closest mutation on its lineage,
    /// or the ancestral state.
    pub fn allele(&self, node: NodeId, site: VariantIndex) -> MutationState {
        let mut current = Some(node);
        while let Some(node) = current {
            let mutations = &self.node_mutations
                [self.node_mutation_offsets[node.0]..self.node_mutation_offsets[node.0 + 1]];
            if let Ok(index) = mutations.binary_search_by(|m| m.site.cmp(&site)) {
                return mutations[index].derived_state;
            }
            current = self.parent_at(node, site);
        }
        ANCESTRAL_STATE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(left: usize, right: usize, parent: usize) -> PathEdge {
        PathEdge::new(VariantIndex(left), VariantIndex(right), NodeId(parent))
    }

    #[test]
    fn events_of_contiguous_and_gapped_edges() {
        let events = edge_events(NodeId(3), &[edge(0, 2, 1), edge(2, 4, 2), edge(5, 6, 1)]);
        let kinds: Vec<_> = events.iter().map(|e| (e.site.0, e.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (0, EdgeEventKind::Start { parent: NodeId(1) }),
                (
                    2,
                    EdgeEventKind::ChangeParent {
                        from: NodeId(1),
                        to: NodeId(2)
                    }
                ),
                (4, EdgeEventKind::End { parent: NodeId(2) }),
                (5, EdgeEventKind::Start { parent: NodeId(1) }),
                (6, EdgeEventKind::End { parent: NodeId(1) }),
            ]
        );
    }

    #[test]
    fn alleles_follow_lineage() {
        let edges = vec![vec![], vec![edge(0, 4, 0)], vec![edge(0, 2, 1), edge(2, 4, 0)]];
        let mutations = vec![
            vec![],
            vec![
                PathMutation {
                    site: VariantIndex(1),
                    derived_state: 1,
                },
                PathMutation {
                    site: VariantIndex(3),
                    derived_state: 1,
                },
            ],
            vec![],
        ];
        let mut events: Vec<_> = edges
            .iter()
            .enumerate()
            .flat_map(|(child, list)| edge_events(NodeId(child), list))
            .collect();
        events.sort();
        let view = GraphView::new(
            4,
            vec![2.0, 1.0, 0.0],
            vec![NodeFlags::NONE; 3],
            &edges,
            &mutations,
            events,
        );

        assert_eq!(view.allele(NodeId(2), VariantIndex(1)), 1);
        assert_eq!(view.allele(NodeId(2), VariantIndex(3)), 0);
        assert_eq!(view.allele(NodeId(1), VariantIndex(3)), 1);
        assert_eq!(view.allele(NodeId(0), VariantIndex(1)), 0);
        assert_eq!(view.parent_at(NodeId(2), VariantIndex(2)), Some(ROOT));
        assert!(view.is_live(ROOT, VariantIndex(0)));
        assert_eq!(view.mutations_at(1), &[(NodeId(1), 1)]);
        assert_eq!(view.events_at(0).len(), 2);
        assert_eq!(view.events_at(4).len(), 2);
    }
}
