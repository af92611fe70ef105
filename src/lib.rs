//! Inference of ancestry graphs from phased genotype data.
//!
//! Ancestral haplotypes are synthesized from the variant sites, then matched oldest first
//! against the growing graph with a Viterbi copying model, and finally the samples are matched
//! against the ancestors. The result is an [`ts::AncestryGraph`] of nodes, copying edges and
//! mutations.

use tracing::info;

pub mod ancestors;
pub mod config;
pub mod error;
pub mod progress;
pub mod ts;
pub mod variants;
mod verify;

pub use config::InferenceConfig;
pub use error::{Error, Result};
pub use progress::{NoProgress, ProgressObserver};
pub use verify::verify;

use crate::ancestors::AncestorGenerator;
use crate::ts::{map_excluded_sites, AncestryGraph, EpochScheduler, RateMap};
use crate::variants::VariantData;

/// Run a complete inference: generate the ancestors of `variant_data`, match them epoch by
/// epoch, match the samples against them, and place the excluded sites by parsimony.
pub fn infer(
    variant_data: VariantData,
    config: &InferenceConfig,
    observer: &dyn ProgressObserver,
) -> Result<AncestryGraph> {
    config.validate()?;
    let rates = RateMap::from_config(
        config,
        variant_data.variant_positions(),
        variant_data.num_alleles(),
    )?;
    info!(
        sites = variant_data.len(),
        excluded_sites = variant_data.excluded_sites().len(),
        samples = variant_data.get_num_samples(),
        "starting inference"
    );

    let generator = AncestorGenerator::with_config(variant_data, config);
    let ancestors = generator.generate_ancestors()?;

    let scheduler = EpochScheduler::new(config, rates, observer)?;
    let mut graph = AncestryGraph::new(generator.variant_data().len());
    scheduler.match_ancestors(&mut graph, &ancestors)?;
    let samples = generator.variant_data().to_samples();
    let nodes = scheduler.match_samples(&mut graph, &samples, None)?;
    map_excluded_sites(&mut graph, generator.variant_data(), &nodes)?;

    info!(
        nodes = graph.num_nodes(),
        edges = graph.num_edges(),
        mutations = graph.num_mutations(),
        excluded_sites = graph.excluded_sites().len(),
        "inference finished"
    );
    Ok(graph)
}
