use crate::error::{Error, Result};
use crate::ts::edge_index::{edge_events, EdgeEvent, GraphView};
use crate::ts::{CopyPath, NodeFlags, NodeId, PathEdge, PathMutation, ROOT};
use crate::variants::{MutationState, VariantIndex, ANCESTRAL_STATE};
use indexset::BTreeSet;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use tracing::{debug, trace};
use twox_hash::XxHash64;

/// Upper bound of the time offset between a path compression node and the older of the nodes
/// it was created for.
const PATH_COMPRESSION_TIME_INCREMENT: f64 = 1.0 / 65536.0;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub time: f64,
    pub flags: NodeFlags,
}

/// `child` copies `parent` over the sites `[left, right)`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub left: VariantIndex,
    pub right: VariantIndex,
    pub parent: NodeId,
    pub child: NodeId,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Mutation {
    pub site: VariantIndex,
    pub node: NodeId,
    pub derived_state: MutationState,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SiteMutation {
    pub node: NodeId,
    pub derived_state: MutationState,
}

/// A site that took no part in matching, with mutations placed by parsimony on the marginal
/// tree of the inference site `tree_site`. Without inference sites there is no tree, and every
/// node is its own root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExcludedSite {
    pub position: f64,
    pub tree_site: Option<VariantIndex>,
    /// sorted by node
    pub mutations: Vec<SiteMutation>,
}

/// The content of an ancestry graph as flat tables.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphTables {
    pub nodes: Vec<Node>,
    /// sorted by child, then left
    pub edges: Vec<Edge>,
    /// sorted by site, then node
    pub mutations: Vec<Mutation>,
    /// sorted by position
    #[serde(default)]
    pub excluded_sites: Vec<ExcludedSite>,
}

/// Maps the edge sequence of a committed path to the node that currently owns it.
type PathIndex = HashMap<Vec<PathEdge>, NodeId, BuildHasherDefault<XxHash64>>;

/// The incrementally built ancestry graph. Nodes are only ever appended, and the edges of a
/// node are written once when its path is committed. The only later modification is path
/// compression, which redirects the edges of an already committed node to a new shared node.
pub struct AncestryGraph {
    num_sites: usize,
    nodes: Vec<Node>,
    edges: Vec<Vec<PathEdge>>,
    mutations: Vec<Vec<PathMutation>>,
    excluded_sites: Vec<ExcludedSite>,

    /// Marginal tree events of all edges, kept sorted for [`GraphView`] construction.
    event_index: BTreeSet<EdgeEvent>,

    path_index: PathIndex,
}

impl AncestryGraph {
    /// Create an empty graph over `num_sites` inference sites.
    pub fn new(num_sites: usize) -> Self {
        Self {
            num_sites,
            nodes: Vec::new(),
            edges: Vec::new(),
            mutations: Vec::new(),
            excluded_sites: Vec::new(),
            event_index: BTreeSet::new(),
            path_index: PathIndex::default(),
        }
    }

    pub fn num_sites(&self) -> usize {
        self.num_sites
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.iter().map(Vec::len).sum()
    }

    pub fn num_mutations(&self) -> usize {
        self.mutations.iter().map(Vec::len).sum()
    }

    /// Number of nodes created by path compression.
    pub fn num_path_compressed_nodes(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.flags.contains(NodeFlags::PATH_COMPRESSED))
            .count()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.0).ok_or(Error::UnknownNode(id))
    }

    /// The edges of `node`, ordered by site. Empty for unknown nodes.
    pub fn edges_of(&self, node: NodeId) -> &[PathEdge] {
        self.edges.get(node.0).map_or(&[], Vec::as_slice)
    }

    /// Append a node and return its id.
    pub fn add_node(&mut self, time: f64, flags: NodeFlags) -> Result<NodeId> {
        if !time.is_finite() {
            return Err(Error::InvalidTables(format!(
                "node {} has non-finite time {time}",
                self.nodes.len()
            )));
        }
        Ok(self.push_node(time, flags))
    }

    fn push_node(&mut self, time: f64, flags: NodeFlags) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node { id, time, flags });
        self.edges.push(Vec::new());
        self.mutations.push(Vec::new());
        id
    }

    /// Take an immutable snapshot of the current graph. Matching against the snapshot is not
    /// affected by anything committed afterward.
    pub fn freeze(&self) -> GraphView {
        GraphView::new(
            self.num_sites,
            self.nodes.iter().map(|n| n.time).collect(),
            self.nodes.iter().map(|n| n.flags).collect(),
            &self.edges,
            &self.mutations,
            self.event_index.iter().copied().collect(),
        )
    }

    /// Take a snapshot for matching a haplotype of the given time. Only the root and nodes
    /// strictly older than `time` keep their edges and mutations, so no other node can be
    /// copied. Since parents are older than their children, the dropped nodes are whole
    /// subtrees of every marginal tree.
    pub fn freeze_older_than(&self, time: f64) -> GraphView {
        let copyable: Vec<bool> = self
            .nodes
            .iter()
            .map(|n| n.id == ROOT || n.time > time)
            .collect();
        let edges: Vec<Vec<PathEdge>> = self
            .edges
            .iter()
            .enumerate()
            .map(|(node, list)| {
                if copyable[node] {
                    list.clone()
                } else {
                    Vec::new()
                }
            })
            .collect();
        let mutations: Vec<Vec<PathMutation>> = self
            .mutations
            .iter()
            .enumerate()
            .map(|(node, list)| {
                if copyable[node] {
                    list.clone()
                } else {
                    Vec::new()
                }
            })
            .collect();

        GraphView::new(
            self.num_sites,
            self.nodes.iter().map(|n| n.time).collect(),
            self.nodes.iter().map(|n| n.flags).collect(),
            &edges,
            &mutations,
            self.event_index
                .iter()
                .filter(|e| copyable[e.child.0])
                .copied()
                .collect(),
        )
    }

    /// Add `delta` to the time of every node.
    pub(crate) fn shift_times(&mut self, delta: f64) {
        for node in &mut self.nodes {
            node.time += delta;
        }
    }

    /// Commit the copying path of `child`.
    ///
    /// The edges must tile an interval without gaps, every parent must be older than the child
    /// (or the root and at least as old), and the mutations must lie inside the interval.
    ///
    /// If `compress` is set and another node already owns the exact same edge sequence, both
    /// nodes are redirected to a shared path compression node, or the child copies the owner
    /// directly if the owner is such a node already.
    ///
    /// # Errors
    /// Fails without modifying the graph if the path is malformed or violates the time order.
    pub fn commit_path(&mut self, child: NodeId, path: &CopyPath, compress: bool) -> Result<()> {
        self.validate_path(child, path)?;

        let mut edges = path.edges.clone();
        let mut owns_path = !edges.is_empty();
        if compress && !edges.is_empty() {
            if let Some(redirected) = self.compress_path(child, &edges) {
                edges = redirected;
                owns_path = false;
            }
        }

        if owns_path {
            self.path_index.entry(edges.clone()).or_insert(child);
        }
        trace!(%child, edges = edges.len(), mutations = path.mutations.len(), "committing path");
        self.set_edges(child, edges);
        self.mutations[child.0] = path.mutations.clone();
        Ok(())
    }

    fn validate_path(&self, child: NodeId, path: &CopyPath) -> Result<()> {
        let node = self.node(child)?;
        let malformed = |reason: String| Error::MalformedPath { child, reason };

        if !self.edges[child.0].is_empty() {
            return Err(malformed("node already has a committed path".to_string()));
        }
        if child == ROOT && !path.is_empty() {
            return Err(malformed("the root cannot copy another node".to_string()));
        }
        if path.is_empty() && !path.mutations.is_empty() {
            return Err(malformed("mutations without edges".to_string()));
        }

        for edge in &path.edges {
            self.node(edge.parent)?;
            if edge.parent == child {
                return Err(malformed(format!("edge {edge:?} copies the node itself")));
            }
            if edge.left >= edge.right || edge.right.0 > self.num_sites {
                return Err(malformed(format!("edge {edge:?} has an invalid interval")));
            }
        }
        if let Some(pair) = path.edges.windows(2).find(|p| p[0].right != p[1].left) {
            return Err(malformed(format!(
                "edges {:?} and {:?} do not tile the interval",
                pair[0], pair[1]
            )));
        }

        if let (Some(start), Some(end)) = (path.start(), path.end()) {
            if path
                .mutations
                .iter()
                .any(|m| m.site < start || m.site >= end)
            {
                return Err(malformed("mutation outside of the copied interval".to_string()));
            }
        }
        if path.mutations.windows(2).any(|p| p[0].site >= p[1].site) {
            return Err(malformed("mutations are not sorted by site".to_string()));
        }

        self.check_times(child, node.time, &path.edges)
    }

    fn check_times(&self, child: NodeId, child_time: f64, edges: &[PathEdge]) -> Result<()> {
        for edge in edges {
            let parent_time = self.nodes[edge.parent.0].time;
            let ordered = if edge.parent == ROOT {
                parent_time >= child_time
            } else {
                parent_time > child_time
            };
            if !ordered {
                return Err(Error::TimeInversion {
                    child,
                    child_time,
                    parent: edge.parent,
                    parent_time,
                });
            }
        }
        Ok(())
    }

    /// Look for another node owning `edges`. Returns the edges `child` should use instead, if
    /// the path could be shared.
    fn compress_path(&mut self, child: NodeId, edges: &[PathEdge]) -> Option<Vec<PathEdge>> {
        let owner = *self.path_index.get(edges)?;
        if owner == child {
            return None;
        }

        let start = edges.first()?.left;
        let end = edges.last()?.right;
        let child_time = self.nodes[child.0].time;
        let owner_node = self.nodes[owner.0];

        if owner_node.flags.contains(NodeFlags::PATH_COMPRESSED) {
            return (owner_node.time > child_time).then(|| vec![PathEdge::new(start, end, owner)]);
        }

        let youngest_parent = edges
            .iter()
            .map(|e| self.nodes[e.parent.0].time)
            .fold(f64::INFINITY, f64::min);
        let older_child = child_time.max(owner_node.time);
        let gap = youngest_parent - older_child;
        let time = older_child + PATH_COMPRESSION_TIME_INCREMENT.min(gap / 2.0);
        if !(time > older_child && time < youngest_parent) {
            return None;
        }

        let shared_node = self.push_node(time, NodeFlags::PATH_COMPRESSED);
        self.set_edges(shared_node, edges.to_vec());
        self.path_index.insert(edges.to_vec(), shared_node);

        let shared = vec![PathEdge::new(start, end, shared_node)];
        self.set_edges(owner, shared.clone());
        debug!(%child, %owner, %shared_node, time, "path compressed");
        Some(shared)
    }

    /// Replace the edges of `node`, keeping the event index in sync.
    fn set_edges(&mut self, node: NodeId, edges: Vec<PathEdge>) {
        for event in edge_events(node, &self.edges[node.0]) {
            self.event_index.remove(&event);
        }
        for event in edge_events(node, &edges) {
            self.event_index.insert(event);
        }
        self.edges[node.0] = edges;
    }

    /// Rebuild a graph from tables produced by [`AncestryGraph::dump`] (or an equivalent
    /// source), validating node ids, edge intervals and the time order.
    pub fn restore(num_sites: usize, tables: GraphTables) -> Result<Self> {
        let mut graph = Self::new(num_sites);
        for (i, node) in tables.nodes.iter().enumerate() {
            if node.id.0 != i {
                return Err(Error::InvalidTables(format!(
                    "node ids must be dense, found {} at position {i}",
                    node.id
                )));
            }
            graph.add_node(node.time, node.flags)?;
        }

        let mut per_child = vec![Vec::new(); graph.num_nodes()];
        for edge in &tables.edges {
            graph.node(edge.child)?;
            graph.node(edge.parent)?;
            if edge.left >= edge.right || edge.right.0 > num_sites || edge.parent == edge.child {
                return Err(Error::InvalidTables(format!("invalid edge {edge:?}")));
            }
            per_child[edge.child.0].push(PathEdge::new(edge.left, edge.right, edge.parent));
        }

        for (child, mut edges) in per_child.into_iter().enumerate() {
            let child = NodeId(child);
            edges.sort_by_key(|e| e.left);
            if edges.windows(2).any(|p| p[0].right > p[1].left) {
                return Err(Error::InvalidTables(format!(
                    "edges of node {child} overlap"
                )));
            }
            graph.check_times(child, graph.nodes[child.0].time, &edges)?;

            let redirected = edges.len() == 1
                && graph.nodes[edges[0].parent.0]
                    .flags
                    .contains(NodeFlags::PATH_COMPRESSED);
            if !edges.is_empty() && !redirected {
                graph.path_index.entry(edges.clone()).or_insert(child);
            }
            graph.set_edges(child, edges);
        }

        for mutation in &tables.mutations {
            graph.node(mutation.node)?;
            if mutation.site.0 >= num_sites {
                return Err(Error::InvalidTables(format!(
                    "mutation {mutation:?} lies outside of the sites"
                )));
            }
            graph.mutations[mutation.node.0].push(PathMutation {
                site: mutation.site,
                derived_state: mutation.derived_state,
            });
        }
        for list in &mut graph.mutations {
            list.sort_by_key(|m| m.site);
            if list.windows(2).any(|p| p[0].site == p[1].site) {
                return Err(Error::InvalidTables(
                    "a node has two mutations at the same site".to_string(),
                ));
            }
        }

        for site in tables.excluded_sites {
            if site.tree_site.is_some_and(|s| s.0 >= num_sites) {
                return Err(Error::InvalidTables(format!(
                    "excluded site at {} uses the tree of a missing site",
                    site.position
                )));
            }
            for mutation in &site.mutations {
                graph.node(mutation.node)?;
            }
            graph.push_excluded_site(site)?;
        }

        debug!(
            nodes = graph.num_nodes(),
            edges = graph.num_edges(),
            mutations = graph.num_mutations(),
            excluded_sites = graph.excluded_sites.len(),
            "restored ancestry graph"
        );
        Ok(graph)
    }

    /// Export the graph content as tables.
    pub fn dump(&self) -> GraphTables {
        let edges = self
            .edges
            .iter()
            .enumerate()
            .flat_map(|(child, edges)| {
                edges.iter().map(move |e| Edge {
                    left: e.left,
                    right: e.right,
                    parent: e.parent,
                    child: NodeId(child),
                })
            })
            .collect();

        let mut mutations: Vec<Mutation> = self
            .mutations
            .iter()
            .enumerate()
            .flat_map(|(node, list)| {
                list.iter().map(move |m| Mutation {
                    site: m.site,
                    node: NodeId(node),
                    derived_state: m.derived_state,
                })
            })
            .collect();
        mutations.sort_by_key(|m| (m.site, m.node));

        GraphTables {
            nodes: self.nodes.clone(),
            edges,
            mutations,
            excluded_sites: self.excluded_sites.clone(),
        }
    }

    /// The copying relationships with every path compression node replaced by the edges it
    /// stands for. Adjacent edges with the same parent are merged, so the result is the same
    /// whether or not paths were compressed.
    pub fn resolved_edges(&self) -> Vec<Edge> {
        let mut resolved = Vec::new();
        let mut segments = Vec::new();
        for node in self
            .nodes
            .iter()
            .filter(|n| !n.flags.contains(NodeFlags::PATH_COMPRESSED))
        {
            segments.clear();
            for edge in &self.edges[node.id.0] {
                self.resolve_edge(*edge, &mut segments);
            }

            let mut merged: Vec<PathEdge> = Vec::with_capacity(segments.len());
            for segment in segments.iter() {
                match merged.last_mut() {
                    Some(last) if last.parent == segment.parent && last.right == segment.left => {
                        last.right = segment.right
                    }
                    _ => merged.push(*segment),
                }
            }

            resolved.extend(merged.into_iter().map(|e| Edge {
                left: e.left,
                right: e.right,
                parent: e.parent,
                child: node.id,
            }));
        }
        resolved
    }

    fn resolve_edge(&self, edge: PathEdge, out: &mut Vec<PathEdge>) {
        if !self.nodes[edge.parent.0]
            .flags
            .contains(NodeFlags::PATH_COMPRESSED)
        {
            out.push(edge);
            return;
        }

        for inner in &self.edges[edge.parent.0] {
            let left = inner.left.max(edge.left);
            let right = inner.right.min(edge.right);
            if left < right {
                self.resolve_edge(PathEdge::new(left, right, inner.parent), out);
            }
        }
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

    /// The allele `node` carries at `site`: the state of the closest mutation on its lineage,
    /// or the ancestral state.
    pub fn allele(&self, node: NodeId, site: VariantIndex) -> MutationState {
        let mut current = Some(node);
        while let Some(node) = current.filter(|n| n.0 < self.nodes.len()) {
            if let Ok(index) = self.mutations[node.0].binary_search_by(|m| m.site.cmp(&site)) {
                return self.mutations[node.0][index].derived_state;
            }
            current = self.parent_at(node, site);
        }
        ANCESTRAL_STATE
    }

    /// Sites that took no part in matching, in the order they were placed.
    pub fn excluded_sites(&self) -> &[ExcludedSite] {
        &self.excluded_sites
    }

    /// The allele `node` carries at an excluded site, following its lineage through the
    /// marginal tree the mutations of the site were placed on.
    pub fn excluded_allele(&self, node: NodeId, site: &ExcludedSite) -> MutationState {
        let mut current = Some(node);
        while let Some(node) = current.filter(|n| n.0 < self.nodes.len()) {
            if let Ok(index) = site.mutations.binary_search_by_key(&node, |m| m.node) {
                return site.mutations[index].derived_state;
            }
            current = site.tree_site.and_then(|s| self.parent_at(node, s));
        }
        ANCESTRAL_STATE
    }

    /// Append an excluded site. Positions must increase and a node can carry at most one
    /// mutation per site.
    pub(crate) fn push_excluded_site(&mut self, mut site: ExcludedSite) -> Result<()> {
        if let Some(last) = self.excluded_sites.last() {
            if last.position.partial_cmp(&site.position) != Some(Ordering::Less) {
                return Err(Error::InvalidTables(format!(
                    "excluded site at {} does not follow {}",
                    site.position, last.position
                )));
            }
        }
        site.mutations.sort_by_key(|m| m.node);
        if site.mutations.windows(2).any(|p| p[0].node == p[1].node) {
            return Err(Error::InvalidTables(format!(
                "a node has two mutations at excluded site {}",
                site.position
            )));
        }
        self.excluded_sites.push(site);
        Ok(())
    }
}
