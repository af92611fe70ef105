use crate::error::{Error, Result};
use crate::ts::edge_index::{EdgeEventKind, GraphView};
use crate::ts::{CopyPath, MatchQuery, NodeId, PathEdge, PathMutation, RateMap, ROOT};
use crate::variants::{MutationState, VariantIndex, ANCESTRAL_STATE, MISSING_STATE};

/// Significant digits kept of every likelihood, unless configured otherwise.
pub const DEFAULT_PRECISION: u32 = 13;

/// Finds the maximum likelihood copying path of a haplotype through a frozen graph.
///
/// Implementations must be deterministic: the same view, rates and query always produce the
/// same path, no matter which thread or engine instance runs the query.
pub trait MatchEngine {
    fn find_path(
        &mut self,
        view: &GraphView,
        rates: &RateMap,
        query: &MatchQuery<'_>,
    ) -> Result<CopyPath>;
}

/// Viterbi matcher over a compressed state space.
///
/// The matcher walks the marginal trees of the graph from the first to the last site of the
/// query. Only some nodes hold an explicit likelihood. Every other live node shares the
/// likelihood of its closest explicit ancestor in the marginal tree, which holds as long as
/// neither it nor a node on the way up changes parent or carries a mutation. Nodes are made
/// explicit just before that happens and are folded back into their ancestor whenever their
/// likelihoods become equal again.
///
/// The matcher keeps its buffers between queries, so a worker should reuse one instance.
#[derive(Debug)]
pub struct ViterbiMatcher {
    precision: u32,

    /// The marginal tree at the current site. `None` for the root and nodes not live.
    parents: Vec<Option<NodeId>>,
    /// Likelihood of explicit nodes. Stale for every other node.
    likelihoods: Vec<f64>,
    is_explicit: Vec<bool>,
    explicit_nodes: Vec<NodeId>,
    num_live: usize,

    /// Derived states of the mutations at the current site, indexed by node.
    allele_marks: Vec<Option<MutationState>>,

    /// Explicit nodes with their likelihood and transition of every site of the query, sorted
    /// by node. Site `start + i` is found at `trace[trace_offsets[i]..trace_offsets[i + 1]]`.
    trace: Vec<TraceEntry>,
    trace_offsets: Vec<usize>,
}

#[derive(Copy, Clone, Debug)]
struct TraceEntry {
    node: NodeId,
    likelihood: f64,
    recombined: bool,
}

impl Default for ViterbiMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_PRECISION)
    }
}

impl ViterbiMatcher {
    pub fn new(precision: u32) -> Self {
        Self {
            precision,
            parents: Vec::new(),
            likelihoods: Vec::new(),
            is_explicit: Vec::new(),
            explicit_nodes: Vec::new(),
            num_live: 0,
            allele_marks: Vec::new(),
            trace: Vec::new(),
            trace_offsets: Vec::new(),
        }
    }

    /// Build the marginal tree of `start`. All live nodes begin with likelihood one, so the
    /// root is the only explicit node.
    fn reset(&mut self, view: &GraphView, start: usize) {
        let num_nodes = view.num_nodes();
        self.parents.clear();
        self.parents.resize(num_nodes, None);
        self.likelihoods.clear();
        self.likelihoods.resize(num_nodes, 0.0);
        self.is_explicit.clear();
        self.is_explicit.resize(num_nodes, false);
        self.allele_marks.clear();
        self.allele_marks.resize(num_nodes, None);
        self.explicit_nodes.clear();
        self.trace.clear();
        self.trace_offsets.clear();
        self.trace_offsets.push(0);

        for event in view.events_through(start) {
            self.parents[event.child.0] = match event.kind {
                EdgeEventKind::ChangeParent { to, .. } => Some(to),
                EdgeEventKind::Start { parent } => Some(parent),
                EdgeEventKind::End { .. } => None,
            };
        }
        self.num_live = 1 + self.parents.iter().filter(|p| p.is_some()).count();
        self.set_explicit(ROOT, 1.0);
    }

    fn is_live(&self, node: NodeId) -> bool {
        node == ROOT || self.parents[node.0].is_some()
    }

    fn set_explicit(&mut self, node: NodeId, likelihood: f64) {
        if !self.is_explicit[node.0] {
            self.is_explicit[node.0] = true;
            self.explicit_nodes.push(node);
        }
        self.likelihoods[node.0] = likelihood;
    }

    fn effective_likelihood(&self, node: NodeId) -> f64 {
        let mut current = Some(node);
        while let Some(node) = current {
            if self.is_explicit[node.0] {
                return self.likelihoods[node.0];
            }
            current = self.parents[node.0];
        }
        0.0
    }

    fn nearest_explicit_ancestor(&self, node: NodeId) -> Option<NodeId> {
        let mut current = self.parents[node.0];
        while let Some(node) = current {
            if self.is_explicit[node.0] {
                return Some(node);
            }
            current = self.parents[node.0];
        }
        None
    }

    /// Apply the marginal tree events of `site`. Nodes changing parent keep the likelihood
    /// they had, nodes starting at this site have not been copyable before and start at zero.
    fn advance(&mut self, view: &GraphView, site: usize) {
        let mut ended = false;
        for event in view.events_at(site) {
            let child = event.child;
            match event.kind {
                EdgeEventKind::ChangeParent { to, .. } => {
                    let likelihood = self.effective_likelihood(child);
                    self.set_explicit(child, likelihood);
                    self.parents[child.0] = Some(to);
                }
                EdgeEventKind::Start { parent } => {
                    self.parents[child.0] = Some(parent);
                    self.set_explicit(child, 0.0);
                    self.num_live += 1;
                }
                EdgeEventKind::End { .. } => {
                    self.parents[child.0] = None;
                    ended |= self.is_explicit[child.0];
                    self.is_explicit[child.0] = false;
                    self.num_live -= 1;
                }
            }
        }

        if ended {
            let is_explicit = &self.is_explicit;
            self.explicit_nodes.retain(|node| is_explicit[node.0]);
        }
    }

    /// Nodes with a mutation at `site` emit differently from their ancestors.
    fn decompress_mutations(&mut self, view: &GraphView, site: usize) {
        for &(node, _) in view.mutations_at(site) {
            if self.is_live(node) && !self.is_explicit[node.0] {
                let likelihood = self.effective_likelihood(node);
                self.set_explicit(node, likelihood);
            }
        }
    }

    /// The allele `node` carries at the current site. Requires the mutations of the site to be
    /// marked.
    fn allele(&self, node: NodeId) -> MutationState {
        let mut current = Some(node);
        while let Some(node) = current {
            if let Some(state) = self.allele_marks[node.0] {
                return state;
            }
            current = self.parents[node.0];
        }
        ANCESTRAL_STATE
    }

    /// Run one step of the recursion on every explicit node and record the result.
    fn compute_site(
        &mut self,
        view: &GraphView,
        rates: &RateMap,
        query: &MatchQuery<'_>,
        site: usize,
    ) -> Result<()> {
        for &(node, state) in view.mutations_at(site) {
            self.allele_marks[node.0] = Some(state);
        }

        let observed = observed_state(query, site);
        let mismatch = rates.mismatch(site);
        let num_alleles = rates.num_alleles(site);
        let recombination = (site > query.start.0).then(|| rates.recombination_into(site));

        let first = self.trace.len();
        let mut max_likelihood = 0.0f64;
        for i in 0..self.explicit_nodes.len() {
            let node = self.explicit_nodes[i];
            let (prior, recombined) = match recombination {
                Some(r) => transition(self.likelihoods[node.0], r, self.num_live),
                None => (self.likelihoods[node.0], false),
            };
            let likelihood = match observed {
                Some(state) => {
                    prior * emission(state, self.allele(node), mismatch, num_alleles)
                }
                None => prior,
            };
            max_likelihood = max_likelihood.max(likelihood);
            self.trace.push(TraceEntry {
                node,
                likelihood,
                recombined,
            });
        }

        for &(node, _) in view.mutations_at(site) {
            self.allele_marks[node.0] = None;
        }

        if !(max_likelihood > 0.0) {
            return Err(Error::ZeroLikelihood {
                site: VariantIndex(site),
            });
        }

        let entries = &mut self.trace[first..];
        for entry in entries.iter_mut() {
            entry.likelihood =
                round_to_precision(entry.likelihood / max_likelihood, self.precision);
            self.likelihoods[entry.node.0] = entry.likelihood;
        }
        entries.sort_unstable_by_key(|e| e.node);
        self.trace_offsets.push(self.trace.len());
        Ok(())
    }

    /// Fold explicit nodes back into their closest explicit ancestor if both have the same
    /// likelihood.
    fn compress(&mut self) {
        let folded: Vec<NodeId> = self
            .explicit_nodes
            .iter()
            .copied()
            .filter(|&node| {
                self.nearest_explicit_ancestor(node)
                    .is_some_and(|a| self.likelihoods[a.0] == self.likelihoods[node.0])
            })
            .collect();
        if folded.is_empty() {
            return;
        }

        for node in folded {
            self.is_explicit[node.0] = false;
        }
        let is_explicit = &self.is_explicit;
        self.explicit_nodes.retain(|node| is_explicit[node.0]);
    }

    /// Undo the marginal tree events of `site`, turning the tree of `site` back into the tree of
    /// `site - 1`.
    fn retreat(&mut self, view: &GraphView, site: usize) {
        for event in view.events_at(site).iter().rev() {
            self.parents[event.child.0] = match event.kind {
                EdgeEventKind::ChangeParent { from, .. } => Some(from),
                EdgeEventKind::Start { .. } => None,
                EdgeEventKind::End { parent } => Some(parent),
            };
        }
    }

    fn trace_at(&self, site_index: usize) -> &[TraceEntry] {
        &self.trace[self.trace_offsets[site_index]..self.trace_offsets[site_index + 1]]
    }

    /// The recorded state of `node` at the site with the given index. The current marginal
    /// tree must be the tree of that site.
    fn recorded_state(&self, site_index: usize, node: NodeId) -> Option<&TraceEntry> {
        let entries = self.trace_at(site_index);
        let mut current = Some(node);
        while let Some(node) = current {
            if let Ok(i) = entries.binary_search_by_key(&node, |e| e.node) {
                return Some(&entries[i]);
            }
            current = self.parents[node.0];
        }
        None
    }

    /// The live node with the lowest id among those with maximal likelihood at the site with the
    /// given index. The current marginal tree must be the tree of that site.
    fn best_node(&self, site_index: usize) -> NodeId {
        let max_likelihood = self
            .trace_at(site_index)
            .iter()
            .map(|e| e.likelihood)
            .fold(0.0, f64::max);

        (0..self.parents.len())
            .map(NodeId)
            .filter(|&node| self.is_live(node))
            .find(|&node| {
                self.recorded_state(site_index, node)
                    .is_some_and(|e| e.likelihood == max_likelihood)
            })
            .unwrap_or(ROOT)
    }

    fn traceback(&mut self, view: &GraphView, query: &MatchQuery<'_>) -> CopyPath {
        let start = query.start.0;
        let end = query.end.0;

        let mut edges = Vec::new();
        let mut mutations = Vec::new();
        let mut current = self.best_node(end - 1 - start);
        let mut right = end;

        for site in (start..end).rev() {
            if let Some(mutation) = mutation_at(view, query, site, current) {
                mutations.push(mutation);
            }
            if site == start {
                break;
            }

            let recombined = self
                .recorded_state(site - start, current)
                .map_or(true, |e| e.recombined);
            self.retreat(view, site);

            if recombined || !self.is_live(current) {
                let candidate = self.best_node(site - 1 - start);
                if candidate != current {
                    edges.push(PathEdge::new(VariantIndex(site), VariantIndex(right), current));
                    right = site;
                    current = candidate;
                }
            }
        }
        edges.push(PathEdge::new(query.start, VariantIndex(right), current));

        edges.reverse();
        mutations.reverse();
        CopyPath { edges, mutations }
    }
}

impl MatchEngine for ViterbiMatcher {
    fn find_path(
        &mut self,
        view: &GraphView,
        rates: &RateMap,
        query: &MatchQuery<'_>,
    ) -> Result<CopyPath> {
        validate_query(view, rates, query)?;
        if query.start == query.end {
            return Ok(CopyPath::empty());
        }

        self.reset(view, query.start.0);
        for site in query.start.0..query.end.0 {
            if site > query.start.0 {
                self.advance(view, site);
            }
            self.decompress_mutations(view, site);
            self.compute_site(view, rates, query, site)?;
            self.compress();
        }

        Ok(self.traceback(view, query))
    }
}

/// Check that a query fits the view and the rates.
pub(crate) fn validate_query(
    view: &GraphView,
    rates: &RateMap,
    query: &MatchQuery<'_>,
) -> Result<()> {
    if view.num_nodes() == 0 {
        return Err(Error::InvalidQuery("the graph has no root node".to_string()));
    }
    if rates.num_sites() != view.num_sites() {
        return Err(Error::InvalidQuery(format!(
            "rates cover {} sites, but the graph has {}",
            rates.num_sites(),
            view.num_sites()
        )));
    }
    if query.haplotype.len() != view.num_sites() {
        return Err(Error::InvalidQuery(format!(
            "haplotype has {} sites, but the graph has {}",
            query.haplotype.len(),
            view.num_sites()
        )));
    }
    if query.start > query.end || query.end.0 > view.num_sites() {
        return Err(Error::InvalidQuery(format!(
            "interval [{}, {}) is not within the {} sites of the graph",
            query.start,
            query.end,
            view.num_sites()
        )));
    }
    if query.masked.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(Error::InvalidQuery(
            "masked sites are not strictly increasing".to_string(),
        ));
    }
    for site in query.start.0..query.end.0 {
        let state = query.haplotype[site];
        if state != MISSING_STATE && state >= rates.num_alleles(site) {
            return Err(Error::InvalidQuery(format!(
                "state {state} at site {site} exceeds the {} alleles of the site",
                rates.num_alleles(site)
            )));
        }
    }
    Ok(())
}

/// The state the recursion sees at `site`, or `None` if the site is missing or masked.
pub(crate) fn observed_state(query: &MatchQuery<'_>, site: usize) -> Option<MutationState> {
    let state = query.haplotype[site];
    if state == MISSING_STATE || query.masked.binary_search(&VariantIndex(site)).is_ok() {
        None
    } else {
        Some(state)
    }
}

/// The mutation needed at `site` if the query copies `parent` there.
pub(crate) fn mutation_at(
    view: &GraphView,
    query: &MatchQuery<'_>,
    site: usize,
    parent: NodeId,
) -> Option<PathMutation> {
    let state = query.haplotype[site];
    (state != MISSING_STATE && state != view.allele(parent, VariantIndex(site))).then_some(
        PathMutation {
            site: VariantIndex(site),
            derived_state: state,
        },
    )
}

/// Likelihood of a state after moving onto the next site, given its likelihood at the
/// previous site. Since likelihoods are normalized, the best state of the previous site has
/// likelihood one, and recombining into any of the `num_live` states is equally likely.
/// Returns whether the state was reached by recombination.
pub(crate) fn transition(likelihood: f64, recombination: f64, num_live: usize) -> (f64, bool) {
    let n = num_live as f64;
    let stay = likelihood * (1.0 - recombination + recombination / n);
    let switch = recombination / n;
    if stay > switch {
        (stay, false)
    } else {
        (switch, true)
    }
}

pub(crate) fn emission(
    observed: MutationState,
    allele: MutationState,
    mismatch: f64,
    num_alleles: u8,
) -> f64 {
    if observed == allele {
        1.0 - (num_alleles as f64 - 1.0) * mismatch
    } else {
        mismatch
    }
}

/// Round to the given number of significant digits.
pub fn round_to_precision(value: f64, digits: u32) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }

    let exponent = digits as i32 - value.abs().log10().ceil() as i32;
    if exponent.abs() < 300 {
        let scale = 10f64.powi(exponent);
        (value * scale).round() / scale
    } else {
        // 10^exponent is not representable, scale in two steps
        let half = exponent / 2;
        let first = 10f64.powi(half);
        let second = 10f64.powi(exponent - half);
        (value * first * second).round() / first / second
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ts::{AncestryGraph, NodeFlags};

    fn edge(left: usize, right: usize, parent: usize) -> PathEdge {
        PathEdge::new(VariantIndex(left), VariantIndex(right), NodeId(parent))
    }

    fn derived(sites: &[usize]) -> Vec<PathMutation> {
        sites
            .iter()
            .map(|&site| PathMutation {
                site: VariantIndex(site),
                derived_state: 1,
            })
            .collect()
    }

    /// A root and one ancestor per entry, each copying the root over all sites and carrying the
    /// derived state at the given sites.
    fn star_graph(num_sites: usize, ancestors: &[&[usize]]) -> AncestryGraph {
        let mut graph = AncestryGraph::new(num_sites);
        graph.add_node(2.0, NodeFlags::NONE).unwrap();
        for sites in ancestors {
            let node = graph.add_node(1.0, NodeFlags::NONE).unwrap();
            let path = CopyPath {
                edges: vec![edge(0, num_sites, 0)],
                mutations: derived(sites),
            };
            graph.commit_path(node, &path, false).unwrap();
        }
        graph
    }

    #[test]
    fn single_mismatch_becomes_mutation() {
        let graph = star_graph(4, &[&[1, 2, 3]]);
        let rates = RateMap::constant(4, 1e-8, 1e-3).unwrap();
        let haplotype = [0, 1, 0, 1];

        let path = ViterbiMatcher::default()
            .find_path(&graph.freeze(), &rates, &MatchQuery::full(&haplotype))
            .unwrap();

        assert_eq!(path.edges, vec![edge(0, 4, 1)]);
        assert_eq!(
            path.mutations,
            vec![PathMutation {
                site: VariantIndex(2),
                derived_state: 0
            }]
        );
    }

    #[test]
    fn recombines_between_ancestors() {
        let graph = star_graph(4, &[&[0, 1], &[2, 3]]);
        let rates = RateMap::constant(4, 1e-2, 1e-8).unwrap();
        let haplotype = [1, 1, 1, 1];

        let path = ViterbiMatcher::default()
            .find_path(&graph.freeze(), &rates, &MatchQuery::full(&haplotype))
            .unwrap();

        assert_eq!(path.edges, vec![edge(0, 2, 1), edge(2, 4, 2)]);
        assert!(path.mutations.is_empty());
    }

    #[test]
    fn masked_and_missing_sites() {
        let graph = star_graph(4, &[&[1, 2, 3]]);
        let rates = RateMap::constant(4, 1e-8, 1e-3).unwrap();
        let mut matcher = ViterbiMatcher::default();
        let view = graph.freeze();

        // a missing site never produces a mutation
        let haplotype = [0, 1, MISSING_STATE, 1];
        let path = matcher
            .find_path(&view, &rates, &MatchQuery::full(&haplotype))
            .unwrap();
        assert_eq!(path.edges, vec![edge(0, 4, 1)]);
        assert!(path.mutations.is_empty());

        // a masked site does not influence the path, but is still checked for mutations
        let haplotype = [1, 1, 1, 1];
        let masked = [VariantIndex(0)];
        let query = MatchQuery {
            haplotype: &haplotype,
            start: VariantIndex(0),
            end: VariantIndex(4),
            masked: &masked,
        };
        let path = matcher.find_path(&view, &rates, &query).unwrap();
        assert_eq!(path.edges, vec![edge(0, 4, 1)]);
        assert_eq!(path.mutations, derived(&[0]));
    }

    #[test]
    fn partial_interval() {
        let graph = star_graph(6, &[&[0, 1], &[3, 4]]);
        let rates = RateMap::constant(6, 1e-2, 1e-8).unwrap();
        let haplotype = [0, 0, 0, 1, 1, 0];
        let query = MatchQuery {
            haplotype: &haplotype,
            start: VariantIndex(2),
            end: VariantIndex(5),
            masked: &[],
        };

        let path = ViterbiMatcher::default()
            .find_path(&graph.freeze(), &rates, &query)
            .unwrap();
        assert_eq!(path.edges, vec![edge(2, 5, 2)]);
        assert!(path.mutations.is_empty());
    }

    #[test]
    fn empty_interval_gives_empty_path() {
        let graph = star_graph(3, &[&[1]]);
        let rates = RateMap::constant(3, 1e-2, 1e-8).unwrap();
        let haplotype = [0, 1, 0];
        let query = MatchQuery {
            haplotype: &haplotype,
            start: VariantIndex(1),
            end: VariantIndex(1),
            masked: &[],
        };
        let path = ViterbiMatcher::default()
            .find_path(&graph.freeze(), &rates, &query)
            .unwrap();
        assert!(path.is_empty());
        assert!(path.mutations.is_empty());
    }

    #[test]
    fn rejects_invalid_queries() {
        let graph = star_graph(3, &[&[1]]);
        let view = graph.freeze();
        let rates = RateMap::constant(3, 1e-2, 1e-8).unwrap();
        let mut matcher = ViterbiMatcher::default();

        let short = [0, 1];
        assert!(matches!(
            matcher.find_path(&view, &rates, &MatchQuery::full(&short)),
            Err(Error::InvalidQuery(_))
        ));

        let unknown_allele = [0, 2, 0];
        assert!(matches!(
            matcher.find_path(&view, &rates, &MatchQuery::full(&unknown_allele)),
            Err(Error::InvalidQuery(_))
        ));

        let other_rates = RateMap::constant(4, 1e-2, 1e-8).unwrap();
        let haplotype = [0, 1, 0];
        assert!(matches!(
            matcher.find_path(&view, &other_rates, &MatchQuery::full(&haplotype)),
            Err(Error::InvalidQuery(_))
        ));
    }

    #[test]
    fn zero_likelihood_is_reported() {
        let graph = star_graph(2, &[]);
        let rates = RateMap::constant(2, 1e-2, 0.0).unwrap();
        let haplotype = [1, 0];
        assert!(matches!(
            ViterbiMatcher::default().find_path(
                &graph.freeze(),
                &rates,
                &MatchQuery::full(&haplotype)
            ),
            Err(Error::ZeroLikelihood { site }) if site == VariantIndex(0)
        ));
    }

    #[test]
    fn rounding() {
        assert_eq!(round_to_precision(0.123456789012345, 13), 0.1234567890123);
        assert_eq!(round_to_precision(1.0, 13), 1.0);
        assert_eq!(round_to_precision(0.0, 13), 0.0);

        let tiny = round_to_precision(1.5e-305, 13);
        assert!(tiny > 0.0 && tiny.is_finite());
    }
}
