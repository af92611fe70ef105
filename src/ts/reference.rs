use crate::error::{Error, Result};
use crate::ts::edge_index::GraphView;
use crate::ts::matcher::{
    emission, mutation_at, observed_state, round_to_precision, transition, validate_query,
    DEFAULT_PRECISION,
};
use crate::ts::{CopyPath, MatchEngine, MatchQuery, NodeId, PathEdge, RateMap, ROOT};
use crate::variants::VariantIndex;

/// Viterbi matcher that keeps one likelihood per node and site.
///
/// Produces exactly the paths of [`super::ViterbiMatcher`], using the same arithmetic, but
/// needs memory proportional to nodes times sites. It serves as the ground truth for the
/// compressed matcher.
#[derive(Debug)]
pub struct ReferenceMatcher {
    precision: u32,
}

impl Default for ReferenceMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_PRECISION)
    }
}

impl ReferenceMatcher {
    pub fn new(precision: u32) -> Self {
        Self { precision }
    }
}

/// Likelihoods and transitions of all nodes at one site.
struct SiteState {
    live: Vec<bool>,
    likelihoods: Vec<f64>,
    recombined: Vec<bool>,
    max_likelihood: f64,
}

impl SiteState {
    fn best_node(&self) -> NodeId {
        (0..self.live.len())
            .find(|&u| self.live[u] && self.likelihoods[u] == self.max_likelihood)
            .map_or(ROOT, NodeId)
    }
}

impl MatchEngine for ReferenceMatcher {
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

        let start = query.start.0;
        let end = query.end.0;
        let num_nodes = view.num_nodes();
        let mut sites: Vec<SiteState> = Vec::with_capacity(end - start);

        for site in start..end {
            let live: Vec<bool> = (0..num_nodes)
                .map(|u| view.is_live(NodeId(u), VariantIndex(site)))
                .collect();
            let num_live = live.iter().filter(|&&l| l).count();
            let observed = observed_state(query, site);
            let mismatch = rates.mismatch(site);
            let num_alleles = rates.num_alleles(site);

            let mut likelihoods = vec![0.0; num_nodes];
            let mut recombined = vec![false; num_nodes];
            for u in (0..num_nodes).filter(|&u| live[u]) {
                let (prior, switched) = match sites.last() {
                    None => (1.0, false),
                    Some(previous) => {
                        let likelihood = if previous.live[u] {
                            previous.likelihoods[u]
                        } else {
                            0.0
                        };
                        transition(likelihood, rates.recombination_into(site), num_live)
                    }
                };
                likelihoods[u] = match observed {
                    Some(state) => {
                        let allele = view.allele(NodeId(u), VariantIndex(site));
                        prior * emission(state, allele, mismatch, num_alleles)
                    }
                    None => prior,
                };
                recombined[u] = switched;
            }

            let max_likelihood = (0..num_nodes)
                .filter(|&u| live[u])
                .map(|u| likelihoods[u])
                .fold(0.0, f64::max);
            if !(max_likelihood > 0.0) {
                return Err(Error::ZeroLikelihood {
                    site: VariantIndex(site),
                });
            }
            for u in (0..num_nodes).filter(|&u| live[u]) {
                likelihoods[u] =
                    round_to_precision(likelihoods[u] / max_likelihood, self.precision);
            }
            let max_likelihood = (0..num_nodes)
                .filter(|&u| live[u])
                .map(|u| likelihoods[u])
                .fold(0.0, f64::max);

            sites.push(SiteState {
                live,
                likelihoods,
                recombined,
                max_likelihood,
            });
        }

        let mut edges = Vec::new();
        let mut mutations = Vec::new();
        let mut current = sites[end - start - 1].best_node();
        let mut right = end;
        for site in (start..end).rev() {
            if let Some(mutation) = mutation_at(view, query, site, current) {
                mutations.push(mutation);
            }
            if site == start {
                break;
            }

            let state = &sites[site - start];
            let previous = &sites[site - start - 1];
            if state.recombined[current.0] || !previous.live[current.0] {
                let candidate = previous.best_node();
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
        Ok(CopyPath { edges, mutations })
    }
}
