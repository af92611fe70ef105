use crate::ancestors::{AncestorArray, AncestorDescriptor, AncestralSequence};
use crate::config::InferenceConfig;
use crate::error::{Error, Result};
use crate::variants::{
    VariantData, VariantIndex, VariantSite, ANCESTRAL_STATE, DERIVED_STATE, MISSING_STATE,
};
use rayon::prelude::*;
use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::mem;
use thread_local::ThreadLocal;
use tracing::{debug, info};
use twox_hash::XxHash64;

/// Per-thread buffers for [`AncestorGenerator::extend_ancestor`]. Each buffer has one entry per
/// carrier of the focal site.
#[derive(Default)]
struct ExtensionScratch {
    carriers: Vec<usize>,
    active: Vec<bool>,
    disagreed: Vec<bool>,
}

impl ExtensionScratch {
    fn reset(&mut self, focal_site: &VariantSite) {
        self.carriers.clear();
        self.carriers.extend(
            focal_site
                .genotypes
                .iter()
                .enumerate()
                .filter(|&(_, &s)| s == DERIVED_STATE)
                .map(|(i, _)| i),
        );
        self.active.clear();
        self.active.resize(self.carriers.len(), true);
        self.disagreed.clear();
        self.disagreed.resize(self.carriers.len(), false);
    }
}

/// Generates ancestral sequences for a given set of variant sites. The ancestral sequences are
/// generated using heuristic methods that use a small number of variant sites as focal sites and
/// infer the ancestral state for surrounding sites. For each set of focal sites, a single ancestral
/// sequence is generated.
pub struct AncestorGenerator {
    variant_data: VariantData,
    min_carrier_fraction: f64,
    num_threads: usize,
}

impl AncestorGenerator {
    /// Create a new ancestor generator taking the extension threshold and the thread count from
    /// the given configuration.
    pub fn with_config(variant_data: VariantData, config: &InferenceConfig) -> Self {
        Self {
            variant_data,
            min_carrier_fraction: config.min_carrier_fraction,
            num_threads: config.num_threads,
        }
    }

    pub fn variant_data(&self) -> &VariantData {
        &self.variant_data
    }

    /// Enumerate the ancestors to build. Sites sharing a time and an identical genotype vector
    /// are used as focal sites of the same ancestor, unless an older site between two of them
    /// separates their carriers, in which case the group is split.
    ///
    /// # Returns
    /// The descriptors, sorted by time descending and then by focal sites. The root ancestor is
    /// not part of the result.
    pub fn ancestor_descriptors(&self) -> Vec<AncestorDescriptor> {
        let sites = &self.variant_data;
        let mut order: Vec<VariantIndex> = (0..sites.len()).map(VariantIndex).collect();
        order.sort_by(|&a, &b| sites[b].time.total_cmp(&sites[a].time).then(a.cmp(&b)));

        let mut descriptors = Vec::new();
        let mut group_start = 0;
        while group_start < order.len() {
            let time = sites[order[group_start]].time;
            let mut group_end = group_start;

            let mut focal_groups: HashMap<&[u8], Vec<VariantIndex>, BuildHasherDefault<XxHash64>> =
                Default::default();
            while group_end < order.len() && sites[order[group_end]].time == time {
                let site = order[group_end];
                focal_groups
                    .entry(sites[site].genotypes.as_slice())
                    .or_default()
                    .push(site);
                group_end += 1;
            }

            for (_, mut focal_sites) in focal_groups {
                focal_sites.sort_unstable();
                descriptors.extend(
                    self.split_focal_sites(&focal_sites)
                        .into_iter()
                        .map(|focal_sites| AncestorDescriptor { time, focal_sites }),
                );
            }
            group_start = group_end;
        }

        descriptors.sort_by(|a, b| {
            b.time
                .total_cmp(&a.time)
                .then_with(|| a.focal_sites.cmp(&b.focal_sites))
        });
        descriptors
    }

    /// Break focal sites apart if they are interrupted by disagreeing old sites
    /// (i.e. if they are from different subtrees in the ancestry)
    fn split_focal_sites(&self, focal_sites: &[VariantIndex]) -> Vec<Vec<VariantIndex>> {
        let mut parts = Vec::new();
        let mut current = Vec::new();

        for pair in focal_sites.windows(2) {
            current.push(pair[0]);
            let focal = &self.variant_data[pair[0]];

            let must_split = (pair[0].0 + 1..pair[1].0)
                .map(|i| &self.variant_data[VariantIndex(i)])
                .filter(|site| site.time > focal.time)
                .any(|site| {
                    let mut derived = 0;
                    let mut called = 0;
                    for (state, _) in site
                        .genotypes
                        .iter()
                        .zip(focal.genotypes.iter())
                        .filter(|&(_, &f)| f == DERIVED_STATE)
                    {
                        match *state {
                            MISSING_STATE => {}
                            DERIVED_STATE => {
                                derived += 1;
                                called += 1;
                            }
                            _ => called += 1,
                        }
                    }
                    derived != 0 && derived != called
                });

            if must_split {
                parts.push(mem::take(&mut current));
            }
        }

        if let Some(&last) = focal_sites.last() {
            current.push(last);
            parts.push(current);
        }
        parts
    }

    /// Synthesize the haplotype of a single ancestor.
    pub fn make_ancestor(&self, descriptor: &AncestorDescriptor) -> AncestralSequence {
        self.make_ancestor_with(descriptor, &mut ExtensionScratch::default())
    }

    fn make_ancestor_with(
        &self,
        descriptor: &AncestorDescriptor,
        scratch: &mut ExtensionScratch,
    ) -> AncestralSequence {
        let mut ancestral_sequence =
            AncestralSequence::from_ancestral_state(self.variant_data.len(), descriptor.time);

        let (first_focal_site, last_focal_site) =
            match (descriptor.focal_sites.first(), descriptor.focal_sites.last()) {
                (Some(&first), Some(&last)) => (first, last),
                _ => return ancestral_sequence,
            };

        // extend ancestor to the left of the first focal site
        let modified_left = self.extend_ancestor(
            &mut self
                .variant_data
                .iter_with_index()
                .take(first_focal_site.0)
                .rev(),
            first_focal_site,
            &mut ancestral_sequence,
            scratch,
            true,
        );

        // infer ancestor between focal sites.
        for pair in descriptor.focal_sites.windows(2) {
            self.extend_ancestor(
                &mut self
                    .variant_data
                    .iter_with_index()
                    .skip(pair[0].0 + 1)
                    .take(pair[1].0 - pair[0].0 - 1),
                pair[0],
                &mut ancestral_sequence,
                scratch,
                false,
            );
        }

        // extend ancestor to the right of the last focal site
        let modified_right = self.extend_ancestor(
            &mut self.variant_data.iter_with_index().skip(last_focal_site.0 + 1),
            last_focal_site,
            &mut ancestral_sequence,
            scratch,
            true,
        );

        for &focal_site in &descriptor.focal_sites {
            ancestral_sequence[focal_site] = DERIVED_STATE;
        }
        ancestral_sequence.focal_sites = descriptor.focal_sites.clone();
        ancestral_sequence.start = first_focal_site - modified_left;
        ancestral_sequence.end = last_focal_site + (modified_right + 1);

        ancestral_sequence
    }

    /// Extend an ancestral sequence for a given set of sites (provided through an iterator).
    /// The ancestral state for each site is computed if the site is older than the focal site,
    /// younger sites get the ancestral state.
    /// If `termination_condition` is true, a carrier is dropped once it disagrees with the
    /// consensus at two consecutive older sites, and the extension ends once the remaining
    /// carriers shrink to the configured fraction of the focal carriers.
    ///
    /// # Parameter
    /// - `site_iter`: provides the sites for which to infer the common ancestor
    /// - `focal_site`: the site index on which the ancestor is based
    /// - `ancestral_sequence` the haplotype that is being generated
    /// - `termination_condition` if true, the extension will be terminated once enough samples
    /// diverge from the common focal site.
    ///
    /// # Returns
    /// Returns the number of continuous sites modified other than the focal site.
    fn extend_ancestor(
        &self,
        site_iter: &mut dyn Iterator<Item = (VariantIndex, &VariantSite)>,
        focal_site: VariantIndex,
        ancestral_sequence: &mut AncestralSequence,
        scratch: &mut ExtensionScratch,
        termination_condition: bool,
    ) -> usize {
        let focal = &self.variant_data[focal_site];
        scratch.reset(focal);

        let focal_set_size = scratch.carriers.len();
        let min_remaining = (focal_set_size as f64 * self.min_carrier_fraction).floor() as usize;
        let mut remaining_set_size = focal_set_size;
        let mut modified_sites = 0;

        for (variant_index, site) in site_iter {
            modified_sites += 1;
            if site.time <= focal.time {
                ancestral_sequence[variant_index] = ANCESTRAL_STATE;
                continue;
            }

            let mut ones = 0;
            let mut zeros = 0;
            for (&sample, _) in scratch
                .carriers
                .iter()
                .zip(scratch.active.iter())
                .filter(|&(_, &active)| active)
            {
                match site.genotypes[sample] {
                    DERIVED_STATE => ones += 1,
                    MISSING_STATE => {}
                    _ => zeros += 1,
                }
            }

            let consensus_state = if ones + zeros == 0 {
                MISSING_STATE
            } else if ones >= zeros {
                DERIVED_STATE
            } else {
                ANCESTRAL_STATE
            };
            ancestral_sequence[variant_index] = consensus_state;

            if !termination_condition || consensus_state == MISSING_STATE {
                continue;
            }

            for i in 0..focal_set_size {
                let state = site.genotypes[scratch.carriers[i]];
                let disagrees = state != MISSING_STATE && state != consensus_state;
                if scratch.active[i] && scratch.disagreed[i] && disagrees {
                    scratch.active[i] = false;
                    remaining_set_size -= 1;
                }
                scratch.disagreed[i] = disagrees;
            }

            if remaining_set_size <= min_remaining {
                break;
            }
        }

        modified_sites
    }

    /// Generate all ancestral sequences, preceded by the root ancestor. With a non-zero thread
    /// count the haplotypes are built on a dedicated thread pool; the resulting order is the
    /// descriptor order either way.
    pub fn generate_ancestors(&self) -> Result<AncestorArray> {
        let descriptors = self.ancestor_descriptors();
        let root_time = descriptors.first().map_or(1.0, |d| d.time + 1.0);
        info!(
            ancestors = descriptors.len(),
            sites = self.variant_data.len(),
            threads = self.num_threads,
            "generating ancestors"
        );

        let built: Vec<AncestralSequence> = if self.num_threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.num_threads)
                .build()
                .map_err(|e| Error::ThreadPool(e.to_string()))?;
            let scratch: ThreadLocal<RefCell<ExtensionScratch>> = ThreadLocal::new();
            pool.install(|| {
                descriptors
                    .par_iter()
                    .map(|descriptor| {
                        let cell = scratch.get_or(|| RefCell::new(ExtensionScratch::default()));
                        self.make_ancestor_with(descriptor, &mut cell.borrow_mut())
                    })
                    .collect()
            })
        } else {
            let mut scratch = ExtensionScratch::default();
            descriptors
                .iter()
                .map(|descriptor| self.make_ancestor_with(descriptor, &mut scratch))
                .collect()
        };

        let mut ancestors = Vec::with_capacity(built.len() + 1);
        ancestors.push(AncestralSequence::from_ancestral_state(
            self.variant_data.len(),
            root_time,
        ));
        ancestors.extend(built);
        debug!(root_time, "ancestors generated");

        Ok(AncestorArray::new(
            ancestors,
            self.variant_data.variant_positions().to_vec(),
        ))
    }
}
