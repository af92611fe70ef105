mod common;

use airs_graph::ts::{
    map_excluded_sites, AncestryGraph, CopyPath, EpochScheduler, NodeFlags, NodeId, PathEdge,
    PathMutation, ROOT,
};
use airs_graph::variants::{SampleData, VariantDataBuilder, VariantIndex};
use airs_graph::{infer, verify, InferenceConfig, NoProgress, ProgressObserver};
use common::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

fn config(path_compression: bool, num_threads: usize) -> InferenceConfig {
    InferenceConfig {
        path_compression,
        num_threads,
        ..InferenceConfig::default()
    }
}

#[test]
fn ancestors_and_samples_are_reproduced() {
    for (scenario, sites) in SCENARIOS.iter().enumerate() {
        let data = variant_data(sites);
        let num_sites = data.len();
        for path_compression in [false, true] {
            let config = config(path_compression, 0);
            let ancestors = generate_ancestors(&data, &config);
            let graph = infer_graph(&data, &config);
            assert_time_order(&graph);
            verify(&data, &graph).unwrap();

            for (i, ancestor) in ancestors.iter().enumerate().skip(1) {
                let node = NodeId::from_usize(i);
                let haplotype: Vec<u8> = (0..num_sites)
                    .map(|s| ancestor[VariantIndex::from_usize(s)])
                    .collect();
                let (start, end) = (ancestor.start().unwrap(), ancestor.end().unwrap());
                assert_tiles(&graph, node, start, end);
                assert_reproduces(&graph, node, &haplotype, start, end);
            }

            let nodes = sample_nodes(&graph);
            let samples = data.to_samples();
            assert_eq!(nodes.len(), samples.len(), "scenario {scenario}");
            for (&node, sample) in nodes.iter().zip(samples.iter()) {
                assert_eq!(graph.node(node).unwrap().time, 0.0);
                if num_sites > 0 {
                    assert_tiles(&graph, node, 0, num_sites);
                }
                assert_reproduces(&graph, node, sample, 0, num_sites);
            }
        }
    }
}

#[test]
fn result_does_not_depend_on_thread_count() {
    for sites in SCENARIOS {
        let data = variant_data(sites);
        let sequential = infer_graph(&data, &config(true, 0)).dump();
        for num_threads in [1, 4] {
            assert_eq!(
                infer_graph(&data, &config(true, num_threads)).dump(),
                sequential,
                "{num_threads} threads"
            );
        }
    }
}

#[test]
fn extended_checks_pass() {
    for sites in SCENARIOS {
        let data = variant_data(sites);
        let config = InferenceConfig {
            extended_checks: true,
            ..config(true, 2)
        };
        let checked = infer_graph(&data, &config);
        assert_eq!(checked.dump(), infer_graph(&data, &self::config(true, 2)).dump());
    }
}

#[test]
fn dumped_graph_can_be_restored() {
    for sites in SCENARIOS {
        let data = variant_data(sites);
        let graph = infer_graph(&data, &config(true, 0));

        let json = serde_json::to_string(&graph.dump()).unwrap();
        let tables = serde_json::from_str(&json).unwrap();
        let restored = AncestryGraph::restore(graph.num_sites(), tables).unwrap();
        assert_eq!(restored.dump(), graph.dump());
        verify(&data, &restored).unwrap();
        assert_eq!(restored.resolved_edges(), graph.resolved_edges());
        assert_eq!(
            restored.num_path_compressed_nodes(),
            graph.num_path_compressed_nodes()
        );
    }
}

/// Committing the same paths with and without compression describes the same copying
/// relationships and the same alleles.
#[test]
fn compression_preserves_the_graph() {
    for sites in SCENARIOS {
        let data = variant_data(sites);
        let plain = infer_graph(&data, &config(false, 0));
        assert_eq!(plain.num_path_compressed_nodes(), 0);

        let tables = plain.dump();
        let mut compressed = AncestryGraph::new(plain.num_sites());
        for node in &tables.nodes {
            compressed.add_node(node.time, node.flags).unwrap();
        }
        for node in &tables.nodes {
            let path = CopyPath {
                edges: plain.edges_of(node.id).to_vec(),
                mutations: tables
                    .mutations
                    .iter()
                    .filter(|m| m.node == node.id)
                    .map(|m| PathMutation {
                        site: m.site,
                        derived_state: m.derived_state,
                    })
                    .collect(),
            };
            compressed.commit_path(node.id, &path, true).unwrap();
        }

        assert_eq!(compressed.resolved_edges(), plain.resolved_edges());
        assert_time_order(&compressed);
        for node in (0..plain.num_nodes()).map(NodeId::from_usize) {
            for site in (0..plain.num_sites()).map(VariantIndex::from_usize) {
                assert_eq!(compressed.allele(node, site), plain.allele(node, site));
            }
        }
    }
}

#[derive(Default)]
struct CountingObserver {
    increments: AtomicU64,
    totals: AtomicU64,
    stages: Mutex<Vec<String>>,
}

impl ProgressObserver for CountingObserver {
    fn start(&self, _stage: &str, total: u64) {
        self.totals.fetch_add(total, Ordering::Relaxed);
    }

    fn increment(&self) {
        self.increments.fetch_add(1, Ordering::Relaxed);
    }

    fn done(&self, stage: &str) {
        self.stages.lock().unwrap().push(stage.to_string());
    }
}

#[test]
fn progress_is_reported() {
    init_tracing();
    let data = variant_data(SCENARIOS[3]);
    let config = config(true, 3);
    let num_ancestors = generate_ancestors(&data, &config).len() as u64;

    let observer = CountingObserver::default();
    infer(data.clone(), &config, &observer).unwrap();

    let expected = num_ancestors - 1 + data.get_num_samples() as u64;
    assert_eq!(observer.increments.load(Ordering::Relaxed), expected);
    assert_eq!(observer.totals.load(Ordering::Relaxed), expected);
    assert_eq!(
        *observer.stages.lock().unwrap(),
        vec!["match_ancestors".to_string(), "match_samples".to_string()]
    );
}

/// Five ancestors of the same epoch that each differ from the root only at their focal site.
const SHARED_EPOCH: &[&[u8]] = &[
    &[1, 1, 0, 0, 0, 0],
    &[0, 0, 1, 1, 0, 0],
    &[0, 0, 0, 0, 1, 1],
    &[1, 0, 1, 0, 0, 0],
    &[0, 1, 0, 1, 0, 0],
];

fn match_shared_epoch(path_compression: bool) -> AncestryGraph {
    init_tracing();
    let data = variant_data(SHARED_EPOCH);
    let config = config(path_compression, 2);
    let ancestors = generate_ancestors(&data, &config);
    assert_eq!(ancestors.len(), 6);
    assert_eq!(ancestors.epochs().len(), 2);

    let scheduler = EpochScheduler::new(&config, rates(&data, &config), &NoProgress).unwrap();
    let mut graph = AncestryGraph::new(data.len());
    scheduler.match_ancestors(&mut graph, &ancestors).unwrap();
    graph
}

#[test]
fn identical_ancestor_paths_are_compressed() {
    let graph = match_shared_epoch(true);
    assert_eq!(graph.num_nodes(), 7);
    assert_eq!(graph.num_path_compressed_nodes(), 1);

    let shared = NodeId::from_usize(6);
    let node = graph.node(shared).unwrap();
    assert!(node.flags.contains(NodeFlags::PATH_COMPRESSED));
    assert!(node.time > 1.0 / 3.0 && node.time < 4.0 / 3.0);
    let whole = |parent| {
        [PathEdge::new(
            VariantIndex::from_usize(0),
            VariantIndex::from_usize(5),
            parent,
        )]
    };
    assert_eq!(graph.edges_of(shared), &whole(ROOT));

    for child in (1..=5).map(NodeId::from_usize) {
        assert_eq!(graph.edges_of(child), &whole(shared), "{child}");
        assert_reproduces(
            &graph,
            child,
            &(0..5).map(|s| (s + 1 == child.unwrap()) as u8).collect::<Vec<_>>(),
            0,
            5,
        );
    }
}

#[test]
fn identical_ancestor_paths_stay_apart_without_compression() {
    let graph = match_shared_epoch(false);
    assert_eq!(graph.num_nodes(), 6);
    for child in (1..=5).map(NodeId::from_usize) {
        assert_eq!(
            graph.edges_of(child),
            &[PathEdge::new(VariantIndex::from_usize(0), VariantIndex::from_usize(5), ROOT)]
        );
    }
}

#[test]
fn rates_from_positions() {
    for sites in SCENARIOS {
        let data = variant_data(sites);
        let config = InferenceConfig {
            recombination_rate: Some(1e-2),
            mismatch_ratio: Some(1.0),
            ..config(true, 2)
        };
        let graph = infer_graph(&data, &config);
        assert_time_order(&graph);
        verify(&data, &graph).unwrap();
        let samples = data.to_samples();
        for (node, sample) in sample_nodes(&graph).into_iter().zip(samples.iter()) {
            assert_tiles(&graph, node, 0, data.len());
            assert_reproduces(&graph, node, sample, 0, data.len());
        }
    }
}

#[test]
fn user_supplied_times_order_the_ancestors() {
    let mut builder = VariantDataBuilder::new(10.0);
    builder
        .add_variant_site_with_time(vec![1, 1, 0, 0], 1.0, 2.0)
        .unwrap();
    builder
        .add_variant_site_with_time(vec![1, 1, 1, 0], 2.0, 1.0)
        .unwrap();
    builder
        .add_variant_site_with_time(vec![0, 1, 1, 0], 3.0, 3.0)
        .unwrap();
    let data = builder.finalize();

    let config = config(true, 0);
    let ancestors = generate_ancestors(&data, &config);
    let times: Vec<f64> = ancestors.iter().map(|a| a.time()).collect();
    assert_eq!(times, vec![4.0, 3.0, 2.0, 1.0]);

    let graph = infer_graph(&data, &config);
    assert_time_order(&graph);
    for (node, sample) in sample_nodes(&graph).into_iter().zip(data.to_samples().iter()) {
        assert_reproduces(&graph, node, sample, 0, data.len());
    }
}

#[test]
fn no_inference_sites() {
    // a singleton and a fixed site are both excluded
    let data = variant_data(&[&[1, 0, 0], &[1, 1, 1]]);
    assert_eq!(data.len(), 0);
    assert_eq!(data.excluded_sites().len(), 2);

    let graph = infer_graph(&data, &config(true, 2));
    assert_eq!(graph.num_nodes(), 4);
    assert_eq!(graph.num_edges(), 0);
    assert_eq!(graph.num_mutations(), 0);
    assert_eq!(sample_nodes(&graph).len(), 3);

    // without a tree every sample carries its own alleles
    let [singleton, fixed] = graph.excluded_sites() else {
        panic!("expected two excluded sites");
    };
    assert_eq!(singleton.tree_site, None);
    assert_eq!(singleton.mutations.len(), 1);
    assert_eq!(fixed.mutations.len(), 3);
    verify(&data, &graph).unwrap();
}

#[test]
fn excluded_sites_are_reproduced() {
    // sites 2 and 5 are singletons, site 4 is fixed and site 6 has a third allele
    let data = variant_data(&[
        &[1, 1, 0, 0, 1, 0],
        &[0, 0, 0, 1, 0, 0],
        &[1, 1, 1, 0, 0, 0],
        &[1, 1, 1, 1, 1, 1],
        &[0, 1, 0, 0, 0, 0],
        &[2, 2, 0, 1, 1, 0],
        &[0, 0, 1, 1, 1, 0],
    ]);
    assert_eq!(data.len(), 3);
    assert_eq!(data.excluded_sites().len(), 4);

    for path_compression in [false, true] {
        let graph = infer_graph(&data, &config(path_compression, 2));
        assert_eq!(graph.excluded_sites().len(), 4);
        verify(&data, &graph).unwrap();

        let positions: Vec<f64> = graph.excluded_sites().iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![2.0, 4.0, 5.0, 6.0]);
        let trees: Vec<usize> = graph
            .excluded_sites()
            .iter()
            .map(|s| s.tree_site.unwrap().unwrap())
            .collect();
        assert_eq!(trees, vec![0, 1, 1, 1]);
    }
}

/// Matches the ancestors of `sites`, augments them with the samples at `augmented`, then
/// matches all samples and places the excluded sites.
fn match_with_augmentation(sites: &[&[u8]], augmented: &[usize]) -> (AncestryGraph, SampleData) {
    init_tracing();
    let data = variant_data(sites);
    let config = config(true, 2);
    let ancestors = generate_ancestors(&data, &config);
    let scheduler = EpochScheduler::new(&config, rates(&data, &config), &NoProgress).unwrap();

    let mut graph = AncestryGraph::new(data.len());
    scheduler.match_ancestors(&mut graph, &ancestors).unwrap();
    let samples = data.to_samples();
    let extra = scheduler
        .augment_ancestors(&mut graph, &samples, augmented)
        .unwrap();
    assert_eq!(extra.len(), augmented.len());
    let nodes = scheduler.match_samples(&mut graph, &samples, None).unwrap();
    map_excluded_sites(&mut graph, &data, &nodes).unwrap();
    verify(&data, &graph).unwrap();
    (graph, samples)
}

#[test]
fn augmented_samples_serve_as_ancestors() {
    for sites in SCENARIOS {
        let num_samples = sites[0].len();
        let augmented: Vec<usize> = (0..num_samples).step_by(2).collect();
        let (graph, haplotypes) = match_with_augmentation(sites, &augmented);
        assert_time_order(&graph);

        let extra: Vec<NodeId> = (0..graph.num_nodes())
            .map(NodeId::from_usize)
            .filter(|&n| {
                graph
                    .node(n)
                    .unwrap()
                    .flags
                    .contains(NodeFlags::SAMPLE_ANCESTOR)
            })
            .collect();
        assert_eq!(extra.len(), augmented.len());
        for &node in &extra {
            assert_eq!(graph.node(node).unwrap().time, 1.0);
        }

        let samples = sample_nodes(&graph);
        assert_eq!(samples.len(), num_samples);
        assert!(samples.iter().all(|&s| graph.node(s).unwrap().time == 0.0));
        // the extra ancestors keep the haplotypes of the samples they were made from
        for (&node, &index) in extra.iter().zip(&augmented) {
            let haplotype = haplotypes.iter().nth(index).unwrap();
            assert_reproduces(&graph, node, haplotype, 0, graph.num_sites());
        }
    }
}
