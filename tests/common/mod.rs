use airs_graph::ancestors::{AncestorArray, AncestorGenerator};
use airs_graph::ts::{AncestryGraph, NodeFlags, NodeId, RateMap, ROOT};
use airs_graph::variants::{VariantData, VariantDataBuilder, VariantIndex, MISSING_STATE};
use airs_graph::{infer, InferenceConfig, NoProgress};

/// Genotype matrices of small regression scenarios, one row per site.
#[allow(dead_code)]
pub const SCENARIOS: &[&[&[u8]]] = &[
    &[
        &[0, 0, 1, 0, 0, 1, 0, 0],
        &[1, 1, 0, 1, 1, 0, 1, 1],
        &[1, 1, 0, 1, 1, 1, 1, 1],
        &[1, 1, 1, 1, 1, 0, 1, 1],
        &[1, 1, 1, 1, 1, 0, 1, 1],
    ],
    &[
        &[0, 1, 1, 1, 1, 0],
        &[1, 0, 0, 0, 0, 1],
        &[0, 1, 1, 1, 1, 1],
        &[1, 1, 1, 1, 1, 0],
    ],
    &[
        &[1, 1, 1, 1, 1, 0, 1, 1, 1, 1],
        &[1, 1, 1, 1, 1, 1, 1, 1, 0, 1],
        &[0, 1, 0, 1, 1, 1, 1, 0, 0, 1],
        &[0, 1, 0, 1, 1, 1, 1, 0, 1, 1],
        &[1, 0, 1, 0, 0, 0, 0, 1, 0, 0],
        &[1, 1, 0, 1, 1, 1, 1, 0, 1, 1],
    ],
    &[
        &[0, 0, 1, 1, 0, 1, 1, 0],
        &[0, 1, 0, 0, 1, 0, 0, 1],
        &[1, 1, 0, 0, 1, 0, 0, 1],
        &[0, 1, 1, 1, 1, 1, 1, 1],
        &[0, 1, 1, 1, 0, 0, 1, 1],
        &[1, 0, 1, 1, 1, 0, 1, 0],
        &[1, 0, 1, 1, 1, 0, 1, 0],
    ],
    &[&[0, 1, 1, 0, 1, 1], &[0, 1, 1, 1, 1, 1], &[1, 1, 1, 1, 0, 1]],
    &[
        &[1, 1, 0, 0, 0, 1, 0, 0, 1],
        &[1, 1, 0, 0, 1, 1, 0, 0, 0],
        &[0, 0, 1, 1, 0, 0, 1, 0, 0],
        &[MISSING_STATE, 1, 0, 1, 0, 0, 1, 0, 0],
        &[1, 1, 1, 0, 0, 1, 0, 1, 0],
        &[0, 0, 1, 1, 1, 0, 1, 1, 0],
        &[1, 0, 0, 0, 0, 1, 0, 0, 1],
        &[0, 1, 1, 1, 0, 0, 1, 0, 0],
    ],
];

/// Route log output of the library through the test harness. Set `RUST_LOG` to see it.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Variant data with one site per row, placed at positions 1, 2, 3, ...
#[allow(dead_code)]
pub fn variant_data(sites: &[&[u8]]) -> VariantData {
    VariantDataBuilder::from_iter(
        (sites.len() + 1) as f64,
        sites
            .iter()
            .enumerate()
            .map(|(i, site)| (site.to_vec(), (i + 1) as f64)),
    )
    .unwrap()
    .finalize()
}

#[allow(dead_code)]
pub fn generate_ancestors(data: &VariantData, config: &InferenceConfig) -> AncestorArray {
    AncestorGenerator::with_config(data.clone(), config)
        .generate_ancestors()
        .unwrap()
}

#[allow(dead_code)]
pub fn rates(data: &VariantData, config: &InferenceConfig) -> RateMap {
    RateMap::from_config(config, data.variant_positions(), data.num_alleles()).unwrap()
}

#[allow(dead_code)]
pub fn infer_graph(data: &VariantData, config: &InferenceConfig) -> AncestryGraph {
    init_tracing();
    infer(data.clone(), config, &NoProgress).unwrap()
}

/// Ids of the sample nodes, in input order.
#[allow(dead_code)]
pub fn sample_nodes(graph: &AncestryGraph) -> Vec<NodeId> {
    (0..graph.num_nodes())
        .map(NodeId::from_usize)
        .filter(|&n| graph.node(n).unwrap().flags.contains(NodeFlags::SAMPLE))
        .collect()
}

/// Every parent is older than its child, or the root and at least as old.
#[allow(dead_code)]
pub fn assert_time_order(graph: &AncestryGraph) {
    for child in (0..graph.num_nodes()).map(NodeId::from_usize) {
        let child_time = graph.node(child).unwrap().time;
        for edge in graph.edges_of(child) {
            let parent_time = graph.node(edge.parent).unwrap().time;
            if edge.parent == ROOT {
                assert!(parent_time >= child_time, "{child} copies the root");
            } else {
                assert!(
                    parent_time > child_time,
                    "{child} ({child_time}) copies {} ({parent_time})",
                    edge.parent
                );
            }
        }
    }
}

/// The edges of `node` tile `[start, end)` without gaps or overlaps.
#[allow(dead_code)]
pub fn assert_tiles(graph: &AncestryGraph, node: NodeId, start: usize, end: usize) {
    let edges = graph.edges_of(node);
    assert!(!edges.is_empty(), "{node} has no edges");
    assert_eq!(edges[0].left, VariantIndex::from_usize(start), "{node}");
    assert_eq!(edges[edges.len() - 1].right, VariantIndex::from_usize(end), "{node}");
    assert!(
        edges.windows(2).all(|p| p[0].right == p[1].left),
        "edges of {node} do not tile: {edges:?}"
    );
}

/// The haplotype encoded by the lineage of `node` equals `haplotype` at every called site of
/// `[start, end)`. This holds exactly if the mutations of the node are those the copied
/// alleles require.
#[allow(dead_code)]
pub fn assert_reproduces(
    graph: &AncestryGraph,
    node: NodeId,
    haplotype: &[u8],
    start: usize,
    end: usize,
) {
    for site in start..end {
        if haplotype[site] != MISSING_STATE {
            assert_eq!(
                graph.allele(node, VariantIndex::from_usize(site)),
                haplotype[site],
                "allele of {node} at site {site}"
            );
        }
    }
}
