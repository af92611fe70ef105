use crate::ancestors::AncestorArray;
use crate::config::InferenceConfig;
use crate::error::{Error, Result};
use crate::progress::ProgressObserver;
use crate::ts::matcher::mutation_at;
use crate::ts::{
    AncestryGraph, CopyPath, GraphView, MatchEngine, MatchQuery, NodeFlags, NodeId, RateMap,
    ReferenceMatcher, ViterbiMatcher, ROOT,
};
use crate::variants::{SampleData, VariantSequence};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace};

/// Creates the matching engine of a worker. Called once per worker and round.
pub type EngineFactory<'a> = Box<dyn Fn() -> Box<dyn MatchEngine + Send> + Send + Sync + 'a>;

/// Paths found during a round, keyed by the node they belong to. Workers insert in any order,
/// the results are handed out in ascending node order.
#[derive(Debug, Default)]
pub struct ResultBuffer {
    results: Mutex<BTreeMap<NodeId, CopyPath>>,
}

impl ResultBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, node: NodeId, path: CopyPath) {
        self.lock().insert(node, path);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Consume the buffer, returning all results ordered by node id.
    pub fn into_sorted(self) -> Vec<(NodeId, CopyPath)> {
        self.results
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_iter()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<NodeId, CopyPath>> {
        // a panicking worker never holds the lock while modifying the map
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A haplotype waiting to be matched, and the node its path is committed to.
#[derive(Clone, Copy, Debug)]
struct MatchJob<'q> {
    node: NodeId,
    query: MatchQuery<'q>,
}

/// Drives the matching of ancestors and samples into an [`AncestryGraph`].
///
/// Matching happens in rounds. At the start of each round the graph is frozen, all queries of
/// the round are matched against that snapshot, and only after every query finished are the
/// paths committed, one by one in ascending node order. The result therefore does not depend on
/// the number of workers or the order in which they finish.
pub struct EpochScheduler<'a> {
    num_threads: usize,
    path_compression: bool,
    extended_checks: bool,
    precision: u32,
    rates: RateMap,
    observer: &'a dyn ProgressObserver,
    engine_factory: EngineFactory<'a>,
}

impl<'a> EpochScheduler<'a> {
    pub fn new(
        config: &InferenceConfig,
        rates: RateMap,
        observer: &'a dyn ProgressObserver,
    ) -> Result<Self> {
        config.validate()?;
        let precision = config.precision;
        Ok(Self {
            num_threads: config.num_threads,
            path_compression: config.path_compression,
            extended_checks: config.extended_checks,
            precision,
            rates,
            observer,
            engine_factory: Box::new(move || Box::new(ViterbiMatcher::new(precision))),
        })
    }

    /// Replace the engine every worker matches with.
    pub fn with_engine_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn MatchEngine + Send> + Send + Sync + 'a,
    {
        self.engine_factory = Box::new(factory);
        self
    }

    /// Insert all ancestors into the empty `graph` and match them epoch by epoch, oldest first.
    /// Ancestor `i` becomes node `i`. The root ancestor is not matched.
    pub fn match_ancestors(
        &self,
        graph: &mut AncestryGraph,
        ancestors: &AncestorArray,
    ) -> Result<()> {
        if graph.num_nodes() != 0 {
            return Err(Error::InvalidTables(format!(
                "ancestors must be matched into an empty graph, found {} nodes",
                graph.num_nodes()
            )));
        }
        self.check_sites(graph, ancestors.num_sites())?;

        for ancestor in ancestors.iter() {
            graph.add_node(ancestor.time(), NodeFlags::NONE)?;
        }

        let epochs = ancestors.epochs();
        info!(
            ancestors = ancestors.len(),
            epochs = epochs.len(),
            threads = self.num_threads,
            "matching ancestors"
        );
        self.observer
            .start("match_ancestors", ancestors.len().saturating_sub(1) as u64);

        for (epoch, range) in epochs.into_iter().enumerate() {
            let jobs: Vec<MatchJob<'_>> = range
                .map(NodeId)
                .filter(|&node| node != ROOT)
                .map(|node| {
                    let ancestor = &ancestors[node.0];
                    MatchJob {
                        node,
                        query: MatchQuery {
                            haplotype: ancestor.full_state(),
                            start: ancestor.start(),
                            end: ancestor.end(),
                            masked: ancestor.focal_sites(),
                        },
                    }
                })
                .collect();
            if jobs.is_empty() {
                continue;
            }

            let time = ancestors[jobs[0].node.0].time();
            let view = graph.freeze_older_than(time);
            self.observer.set_detail(&[
                ("epoch", epoch.to_string()),
                ("ancestors", jobs.len().to_string()),
            ]);
            debug!(
                epoch,
                ancestors = jobs.len(),
                time,
                nodes = view.num_nodes(),
                edges = view.num_edges(),
                "matching epoch"
            );

            for (node, path) in self.run_round(&view, jobs)? {
                graph.commit_path(node, &path, self.path_compression)?;
            }
        }

        self.observer.done("match_ancestors");
        info!(
            nodes = graph.num_nodes(),
            edges = graph.num_edges(),
            mutations = graph.num_mutations(),
            path_compressed = graph.num_path_compressed_nodes(),
            "matched ancestors"
        );
        Ok(())
    }

    /// Match the samples selected by `indexes`, or all samples, in a single round over the full
    /// interval. A node is added for every matched sample only once the round succeeded.
    /// Returns the node ids in the order of the selected samples.
    pub fn match_samples(
        &self,
        graph: &mut AncestryGraph,
        samples: &SampleData,
        indexes: Option<&[usize]>,
    ) -> Result<Vec<NodeId>> {
        self.insert_samples(graph, samples, indexes, NodeFlags::SAMPLE, "match_samples")
    }

    /// Match the samples selected by `indexes` and keep them as extra ancestors. All nodes of
    /// the graph are then moved one time unit into the past, so samples matched afterward at
    /// time 0 can copy from the augmented ones.
    pub fn augment_ancestors(
        &self,
        graph: &mut AncestryGraph,
        samples: &SampleData,
        indexes: &[usize],
    ) -> Result<Vec<NodeId>> {
        let nodes = self.insert_samples(
            graph,
            samples,
            Some(indexes),
            NodeFlags::SAMPLE_ANCESTOR,
            "augment_ancestors",
        )?;
        graph.shift_times(1.0);
        Ok(nodes)
    }

    fn insert_samples(
        &self,
        graph: &mut AncestryGraph,
        samples: &SampleData,
        indexes: Option<&[usize]>,
        flags: NodeFlags,
        stage: &'static str,
    ) -> Result<Vec<NodeId>> {
        self.check_sites(graph, graph.num_sites())?;
        if let Some(sample) = samples.iter().find(|s| s.len() != graph.num_sites()) {
            return Err(Error::InvalidQuery(format!(
                "sample has {} sites, but the graph has {}",
                sample.len(),
                graph.num_sites()
            )));
        }
        let selected: Vec<usize> = match indexes {
            Some(indexes) => {
                if indexes.windows(2).any(|p| p[0] >= p[1]) {
                    return Err(Error::InvalidQuery(
                        "sample indexes must be strictly increasing".to_string(),
                    ));
                }
                if let Some(&index) = indexes.iter().find(|&&i| i >= samples.len()) {
                    return Err(Error::InvalidQuery(format!(
                        "sample index {index} is out of range for {} samples",
                        samples.len()
                    )));
                }
                indexes.to_vec()
            }
            None => (0..samples.len()).collect(),
        };

        // samples are matched at time 0, so only strictly older nodes can be copied
        let view = graph.freeze_older_than(0.0);
        let haplotypes: Vec<&VariantSequence> = samples.iter().collect();
        let base = graph.num_nodes();
        let nodes: Vec<NodeId> = (base..base + selected.len()).map(NodeId).collect();

        info!(samples = nodes.len(), threads = self.num_threads, stage, "matching samples");
        self.observer.start(stage, nodes.len() as u64);

        let jobs = nodes
            .iter()
            .zip(&selected)
            .map(|(&node, &index)| MatchJob {
                node,
                query: MatchQuery::full(haplotypes[index]),
            })
            .collect();
        let paths = self.run_round(&view, jobs)?;

        for &node in &nodes {
            let added = graph.add_node(0.0, flags)?;
            debug_assert_eq!(added, node);
        }
        for (node, path) in paths {
            graph.commit_path(node, &path, self.path_compression)?;
        }

        self.observer.done(stage);
        info!(
            nodes = graph.num_nodes(),
            edges = graph.num_edges(),
            mutations = graph.num_mutations(),
            stage,
            "matched samples"
        );
        Ok(nodes)
    }

    fn check_sites(&self, graph: &AncestryGraph, num_sites: usize) -> Result<()> {
        if num_sites != graph.num_sites() || self.rates.num_sites() != graph.num_sites() {
            return Err(Error::InvalidQuery(format!(
                "graph has {} sites, but the haplotypes have {} and the rates {}",
                graph.num_sites(),
                num_sites,
                self.rates.num_sites()
            )));
        }
        Ok(())
    }

    /// Match all jobs against `view`. Either every job succeeds and all paths are returned in
    /// node order, or the first error is returned and all paths are discarded.
    fn run_round(
        &self,
        view: &GraphView,
        jobs: Vec<MatchJob<'_>>,
    ) -> Result<Vec<(NodeId, CopyPath)>> {
        let buffer = ResultBuffer::new();

        if self.num_threads == 0 {
            let mut engine = (self.engine_factory)();
            for job in &jobs {
                let path = self.match_one(engine.as_mut(), view, job)?;
                buffer.insert(job.node, path);
                self.observer.increment();
            }
            return Ok(buffer.into_sorted());
        }

        let (sender, receiver) = flume::bounded::<MatchJob<'_>>(self.num_threads * 2);
        let abort = AtomicBool::new(false);
        let first_error: Mutex<Option<Error>> = Mutex::new(None);
        let fail = |error: Error| {
            abort.store(true, Ordering::Relaxed);
            first_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get_or_insert(error);
        };

        std::thread::scope(|scope| {
            let workers: Vec<_> = (0..self.num_threads)
                .map(|_| {
                    let receiver = receiver.clone();
                    let (buffer, abort, fail) = (&buffer, &abort, &fail);
                    scope.spawn(move || {
                        let mut engine = (self.engine_factory)();
                        for job in receiver.iter() {
                            // drain the queue without matching once the round failed
                            if abort.load(Ordering::Relaxed) {
                                continue;
                            }
                            match self.match_one(engine.as_mut(), view, &job) {
                                Ok(path) => {
                                    buffer.insert(job.node, path);
                                    self.observer.increment();
                                }
                                Err(error) => fail(error),
                            }
                        }
                    })
                })
                .collect();
            drop(receiver);

            for job in jobs {
                if abort.load(Ordering::Relaxed) || sender.send(job).is_err() {
                    break;
                }
            }
            drop(sender);

            for worker in workers {
                if let Err(payload) = worker.join() {
                    fail(Error::Worker(panic_message(payload.as_ref())));
                }
            }
        });

        match first_error.into_inner().unwrap_or_else(PoisonError::into_inner) {
            Some(error) => {
                debug!(%error, "round aborted, discarding {} results", buffer.len());
                Err(error)
            }
            None => Ok(buffer.into_sorted()),
        }
    }

    fn match_one(
        &self,
        engine: &mut dyn MatchEngine,
        view: &GraphView,
        job: &MatchJob<'_>,
    ) -> Result<CopyPath> {
        let path = engine.find_path(view, &self.rates, &job.query)?;
        trace!(
            node = %job.node,
            edges = path.edges.len(),
            mutations = path.mutations.len(),
            "matched"
        );

        if self.extended_checks {
            self.check_path(view, job, &path)?;
        }
        Ok(path)
    }

    /// Match the query again with the reference engine and check the path against the query.
    fn check_path(&self, view: &GraphView, job: &MatchJob<'_>, path: &CopyPath) -> Result<()> {
        let violation = |detail: String| Error::DeterminismViolation {
            node: job.node,
            detail,
        };

        let expected =
            ReferenceMatcher::new(self.precision).find_path(view, &self.rates, &job.query)?;
        if &expected != path {
            return Err(violation(format!(
                "found {:?}, the reference engine found {:?}",
                path, expected
            )));
        }

        let query = &job.query;
        if query.start == query.end {
            return Ok(());
        }
        if path.start() != Some(query.start)
            || path.end() != Some(query.end)
            || path.edges.windows(2).any(|p| p[0].right != p[1].left)
        {
            return Err(violation(format!(
                "edges {:?} do not tile [{}, {})",
                path.edges, query.start, query.end
            )));
        }

        let mut mutations = path.mutations.iter().peekable();
        for edge in &path.edges {
            for site in edge.left.0..edge.right.0 {
                let expected = mutation_at(view, query, site, edge.parent);
                let found = mutations.next_if(|m| m.site.0 == site).copied();
                if expected != found {
                    return Err(violation(format!(
                        "mutation at site {site} is {found:?}, expected {expected:?}"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "worker panicked".to_string())
}
