use crate::error::{Error, Result};
use crate::ts::{AncestryGraph, ExcludedSite, NodeId, SiteMutation};
use crate::variants::{MutationState, VariantData, VariantIndex, ANCESTRAL_STATE, MISSING_STATE};
use std::collections::BTreeSet;
use tracing::debug;

/// Set of allele states, one bit per state.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
struct StateSet([u64; 4]);

impl StateSet {
    fn single(state: MutationState) -> Self {
        let mut set = Self::default();
        set.insert(state);
        set
    }

    fn insert(&mut self, state: MutationState) {
        self.0[state as usize / 64] |= 1 << (state % 64);
    }

    fn contains(&self, state: MutationState) -> bool {
        self.0[state as usize / 64] & (1 << (state % 64)) != 0
    }

    fn iter(&self) -> impl Iterator<Item = MutationState> + '_ {
        (0..=u8::MAX).filter(|&s| self.contains(s))
    }

    fn min(&self) -> Option<MutationState> {
        self.iter().next()
    }
}

/// Parent links of every node at one inference site.
struct MarginalTree {
    parents: Vec<Option<NodeId>>,
    children: Vec<Vec<NodeId>>,
}

impl MarginalTree {
    fn new(graph: &AncestryGraph, site: Option<VariantIndex>) -> Self {
        let num_nodes = graph.num_nodes();
        let mut parents = vec![None; num_nodes];
        let mut children = vec![Vec::new(); num_nodes];
        if let Some(site) = site {
            for node in (0..num_nodes).map(NodeId) {
                if let Some(parent) = graph.parent_at(node, site) {
                    parents[node.0] = Some(parent);
                    children[parent.0].push(node);
                }
            }
        }
        Self { parents, children }
    }

    fn root_of(&self, mut node: NodeId) -> NodeId {
        while let Some(parent) = self.parents[node.0] {
            node = parent;
        }
        node
    }
}

/// Place the sites that took no part in matching onto the graph. Every such site is mapped by
/// parsimony onto the marginal tree of the closest inference site to its left (or the first
/// one), and the resulting mutations are stored with the graph.
///
/// `samples` are the nodes of the samples of `variant_data`, in input order.
pub fn map_excluded_sites(
    graph: &mut AncestryGraph,
    variant_data: &VariantData,
    samples: &[NodeId],
) -> Result<()> {
    if samples.len() != variant_data.get_num_samples() {
        return Err(Error::InvalidQuery(format!(
            "{} sample nodes given for {} samples",
            samples.len(),
            variant_data.get_num_samples()
        )));
    }
    if graph.num_sites() != variant_data.len() {
        return Err(Error::InvalidQuery(format!(
            "graph has {} sites, but the variant data has {}",
            graph.num_sites(),
            variant_data.len()
        )));
    }
    for &sample in samples {
        graph.node(sample)?;
    }

    let positions = variant_data.variant_positions();
    let mut tree: Option<(Option<VariantIndex>, MarginalTree)> = None;
    let mut mapped = Vec::with_capacity(variant_data.excluded_sites().len());

    for site in variant_data.excluded_sites() {
        let tree_site = (!positions.is_empty()).then(|| {
            VariantIndex(
                positions
                    .partition_point(|&p| p <= site.position())
                    .saturating_sub(1),
            )
        });
        if tree.as_ref().map(|(s, _)| *s) != Some(tree_site) {
            tree = Some((tree_site, MarginalTree::new(graph, tree_site)));
        }
        let Some((_, marginal)) = tree.as_ref() else {
            continue;
        };

        let mutations = place_mutations(marginal, samples, &site.genotypes);
        mapped.push(ExcludedSite {
            position: site.position().unwrap(),
            tree_site,
            mutations,
        });
    }

    let num_mutations: usize = mapped.iter().map(|s| s.mutations.len()).sum();
    for site in mapped {
        graph.push_excluded_site(site)?;
    }
    debug!(
        sites = graph.excluded_sites().len(),
        mutations = num_mutations,
        "mapped excluded sites"
    );
    Ok(())
}

/// Hartigan parsimony over the subtrees holding a called sample. The root takes the ancestral
/// state if that is optimal, and a child keeps the state of its parent whenever that is optimal.
fn place_mutations(
    tree: &MarginalTree,
    samples: &[NodeId],
    genotypes: &[MutationState],
) -> Vec<SiteMutation> {
    let num_nodes = tree.parents.len();
    let mut called = vec![MISSING_STATE; num_nodes];
    let mut roots = BTreeSet::new();
    for (&node, &state) in samples.iter().zip(genotypes) {
        if state != MISSING_STATE {
            called[node.0] = state;
            roots.insert(tree.root_of(node));
        }
    }

    // bottom-up: the optimal states of every informative node
    let mut sets: Vec<Option<StateSet>> = vec![None; num_nodes];
    let mut stack = Vec::new();
    for &root in &roots {
        stack.push((root, false));
        while let Some((node, expanded)) = stack.pop() {
            if called[node.0] != MISSING_STATE {
                sets[node.0] = Some(StateSet::single(called[node.0]));
                continue;
            }
            if !expanded {
                stack.push((node, true));
                stack.extend(tree.children[node.0].iter().map(|&c| (c, false)));
                continue;
            }

            let mut counts = [0u32; 256];
            for set in tree.children[node.0].iter().filter_map(|c| sets[c.0]) {
                for state in set.iter() {
                    counts[state as usize] += 1;
                }
            }
            let max = counts.iter().copied().max().unwrap_or(0);
            if max > 0 {
                let mut set = StateSet::default();
                for (state, _) in counts.iter().enumerate().filter(|&(_, &c)| c == max) {
                    set.insert(state as MutationState);
                }
                sets[node.0] = Some(set);
            }
        }
    }

    // top-down: assign states and record every change
    let mut mutations = Vec::new();
    let mut stack = Vec::new();
    for &root in &roots {
        let Some(set) = sets[root.0] else {
            continue;
        };
        let state = if set.contains(ANCESTRAL_STATE) {
            ANCESTRAL_STATE
        } else {
            set.min().unwrap_or(ANCESTRAL_STATE)
        };
        if state != ANCESTRAL_STATE {
            mutations.push(SiteMutation {
                node: root,
                derived_state: state,
            });
        }
        stack.push((root, state));

        while let Some((node, state)) = stack.pop() {
            for &child in &tree.children[node.0] {
                let Some(set) = sets[child.0] else {
                    continue;
                };
                let child_state = if set.contains(state) {
                    state
                } else {
                    let changed = set.min().unwrap_or(state);
                    mutations.push(SiteMutation {
                        node: child,
                        derived_state: changed,
                    });
                    changed
                };
                stack.push((child, child_state));
            }
        }
    }

    mutations.sort_by_key(|m| m.node);
    mutations
}
