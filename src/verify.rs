use crate::error::{Error, Result};
use crate::ts::{AncestryGraph, NodeFlags, NodeId};
use crate::variants::{VariantData, VariantIndex, MISSING_STATE};
use tracing::info;

/// Check that `graph` reproduces every called genotype of `variant_data`, at the inference
/// sites as well as at the excluded ones. Sample `i` is the `i`-th node flagged as a sample.
pub fn verify(variant_data: &VariantData, graph: &AncestryGraph) -> Result<()> {
    if graph.num_sites() != variant_data.len() {
        return Err(Error::Verification(format!(
            "graph has {} sites, the variant data has {}",
            graph.num_sites(),
            variant_data.len()
        )));
    }

    let samples: Vec<NodeId> = (0..graph.num_nodes())
        .map(NodeId::from_usize)
        .filter(|&n| {
            graph
                .node(n)
                .is_ok_and(|node| node.flags.contains(NodeFlags::SAMPLE))
        })
        .collect();
    if samples.len() != variant_data.get_num_samples() {
        return Err(Error::Verification(format!(
            "graph has {} samples, the variant data has {}",
            samples.len(),
            variant_data.get_num_samples()
        )));
    }

    let excluded = variant_data.excluded_sites();
    if graph.excluded_sites().len() != excluded.len() {
        return Err(Error::Verification(format!(
            "graph has {} excluded sites, the variant data has {}",
            graph.excluded_sites().len(),
            excluded.len()
        )));
    }

    for (index, variant) in variant_data.iter().enumerate() {
        let site = VariantIndex::from_usize(index);
        for (sample, (&node, &expected)) in samples.iter().zip(&variant.genotypes).enumerate() {
            let found = graph.allele(node, site);
            if expected != MISSING_STATE && found != expected {
                return Err(Error::GenotypeMismatch {
                    sample,
                    position: variant.position().unwrap(),
                    expected,
                    found,
                });
            }
        }
    }

    for (placed, variant) in graph.excluded_sites().iter().zip(excluded) {
        let position = variant.position().unwrap();
        if placed.position != position {
            return Err(Error::Verification(format!(
                "excluded site at {} is stored at {}",
                position, placed.position
            )));
        }
        for (sample, (&node, &expected)) in samples.iter().zip(&variant.genotypes).enumerate() {
            let found = graph.excluded_allele(node, placed);
            if expected != MISSING_STATE && found != expected {
                return Err(Error::GenotypeMismatch {
                    sample,
                    position,
                    expected,
                    found,
                });
            }
        }
    }

    info!(
        samples = samples.len(),
        sites = variant_data.len(),
        excluded_sites = excluded.len(),
        "graph reproduces the variant data"
    );
    Ok(())
}
