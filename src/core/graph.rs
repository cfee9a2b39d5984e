//! Graph declaration, validation and supervision.
//!
//! A host program declares stages and wires on a [`GraphBuilder`], then
//! calls `init()` to materialize the pipeline. Validation happens up
//! front: unknown ids, a second primary connection into the same consumer
//! and cyclic wiring all fail `init()` before anything is spawned. The
//! resulting [`Pipeline`] starts stage workers in registration order and
//! stops everything in reverse, force-aborting any worker that misses its
//! join deadline.

use crate::config::ConfigStore;
use crate::core::signal::StopSignal;
use crate::core::stage::Stage;
use crate::core::telemetry::StageStats;
use crate::core::wire::{DEFAULT_WIRE_CAPACITY, WireReceiver, WireSender, wire};
use crate::error::GraphError;
use crate::logger::{LogSender, Logger};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::worker::StageWorker;

/// Default minimum tick period of a registered stage (1 ms).
pub const DEFAULT_MIN_PERIOD: Duration = Duration::from_millis(1);

/// Buffer depth of the outbound logger sink channels.
const LOG_SINK_CAPACITY: usize = 1024;

/// How long `stop()` waits for each worker before aborting it.
const JOIN_DEADLINE: Duration = Duration::from_secs(2);

/// Opaque handle to a registered stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageId(usize);

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stage#{}", self.0)
    }
}

type StageFactory<P> = Box<dyn FnOnce(&ConfigStore) -> Box<dyn Stage<P>> + Send>;

/// Collects stage and wire declarations before the pipeline exists.
pub struct GraphBuilder<P>
where
    P: Clone + Send + 'static,
{
    factories: Vec<StageFactory<P>>,
    min_periods: Vec<Duration>,
    connections: Vec<(usize, usize)>,
    secondary_connections: Vec<(usize, usize)>,
    sink_senders: Vec<(usize, WireSender<P>)>,
    log_sinks: Vec<flume::Sender<String>>,
    wire_capacity: usize,
    config_path: Option<PathBuf>,
}

impl<P> Default for GraphBuilder<P>
where
    P: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P> GraphBuilder<P>
where
    P: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
            min_periods: Vec::new(),
            connections: Vec::new(),
            secondary_connections: Vec::new(),
            sink_senders: Vec::new(),
            log_sinks: Vec::new(),
            wire_capacity: DEFAULT_WIRE_CAPACITY,
            config_path: None,
        }
    }

    /// Persist the master config in `path` (loaded at init, created if
    /// missing).
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Buffer depth for every wire created from here on. Clamped to ≥ 1.
    pub fn with_wire_capacity(mut self, capacity: usize) -> Self {
        self.wire_capacity = capacity.max(1);
        self
    }

    /// Register a stage. The factory runs at init time and may register
    /// config defaults on the store before returning the stage.
    pub fn register_stage<F>(&mut self, factory: F, min_period: Duration) -> StageId
    where
        F: FnOnce(&ConfigStore) -> Box<dyn Stage<P>> + Send + 'static,
    {
        self.factories.push(Box::new(factory));
        self.min_periods.push(min_period);
        StageId(self.factories.len() - 1)
    }

    fn check_id(&self, id: StageId) -> Result<usize, GraphError> {
        if id.0 < self.factories.len() {
            Ok(id.0)
        } else {
            Err(GraphError::UnknownStage(id.0))
        }
    }

    /// Wire `producer` into `consumer`'s primary input. Each consumer may
    /// have at most one primary connection.
    pub fn register_connection(
        &mut self,
        producer: StageId,
        consumer: StageId,
    ) -> Result<(), GraphError> {
        let producer = self.check_id(producer)?;
        let consumer = self.check_id(consumer)?;

        if self.connections.iter().any(|&(_, c)| c == consumer) {
            return Err(GraphError::DuplicatePrimary(consumer));
        }

        self.connections.push((producer, consumer));
        Ok(())
    }

    /// Wire `producer` into one of `consumer`'s secondary inputs. Any
    /// number of these is allowed, including ones that loop back.
    pub fn register_secondary_connection(
        &mut self,
        producer: StageId,
        consumer: StageId,
    ) -> Result<(), GraphError> {
        let producer = self.check_id(producer)?;
        let consumer = self.check_id(consumer)?;
        self.secondary_connections.push((producer, consumer));
        Ok(())
    }

    /// Draw an output wire off `producer` for the host program to read.
    pub fn register_sink(&mut self, producer: StageId) -> Result<WireReceiver<P>, GraphError> {
        let producer = self.check_id(producer)?;
        let (tx, rx) = wire(self.wire_capacity);
        self.sink_senders.push((producer, tx));
        Ok(rx)
    }

    /// Add an outbound logger sink; the host reads formatted log lines
    /// from the returned channel.
    pub fn register_log_sink(&mut self) -> flume::Receiver<String> {
        let (tx, rx) = flume::bounded(LOG_SINK_CAPACITY);
        self.log_sinks.push(tx);
        rx
    }

    /// Reject wiring whose primary connections contain a cycle.
    ///
    /// Secondary connections are exempt: their receives never block, so a
    /// feedback loop over a secondary wire cannot deadlock.
    fn check_acyclic(&self) -> Result<(), GraphError> {
        let count = self.factories.len();
        let mut edges: Vec<Vec<usize>> = vec![Vec::new(); count];
        for &(producer, consumer) in &self.connections {
            edges[producer].push(consumer);
        }

        fn visit(
            node: usize,
            edges: &[Vec<usize>],
            visited: &mut [bool],
            in_stack: &mut [bool],
        ) -> Result<(), GraphError> {
            if in_stack[node] {
                return Err(GraphError::Cycle);
            }
            if visited[node] {
                return Ok(());
            }
            in_stack[node] = true;
            for &next in &edges[node] {
                visit(next, edges, visited, in_stack)?;
            }
            in_stack[node] = false;
            visited[node] = true;
            Ok(())
        }

        let mut visited = vec![false; count];
        let mut in_stack = vec![false; count];
        for node in 0..count {
            visit(node, &edges, &mut visited, &mut in_stack)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), GraphError> {
        let count = self.factories.len();

        for &(producer, consumer) in self
            .connections
            .iter()
            .chain(&self.secondary_connections)
        {
            if producer >= count {
                return Err(GraphError::UnknownStage(producer));
            }
            if consumer >= count {
                return Err(GraphError::UnknownStage(consumer));
            }
        }

        let mut primary_seen = vec![false; count];
        for &(_, consumer) in &self.connections {
            if primary_seen[consumer] {
                return Err(GraphError::DuplicatePrimary(consumer));
            }
            primary_seen[consumer] = true;
        }

        self.check_acyclic()
    }

    /// Validate the wiring and materialize the pipeline.
    ///
    /// Creates every wire, spawns the logger and the config store worker,
    /// then runs each stage factory with its resolved wiring. Stage
    /// workers are created but not started. Must be called from within a
    /// tokio runtime.
    pub fn init(self) -> Result<Pipeline<P>, GraphError> {
        self.validate()?;

        let stop = StopSignal::new();
        let log_stop = StopSignal::new();
        let (log_tx, log_rx) = flume::unbounded();
        let log = LogSender::new(log_tx, "host");

        let store = Arc::new(ConfigStore::new(self.config_path.clone(), log.named("CS")));

        // The logger registers its tunables before any stage snapshot is
        // taken, so every snapshot starts out complete.
        let logger = Logger::new(&store, log_rx, log_stop.clone(), self.log_sinks.clone());
        let logger_handle = tokio::spawn(logger.run());
        let store_handle = tokio::spawn(Arc::clone(&store).run(stop.clone()));

        let count = self.factories.len();

        let mut primary_in: Vec<Option<WireReceiver<P>>> = (0..count).map(|_| None).collect();
        let mut outputs: Vec<Vec<WireSender<P>>> = vec![Vec::new(); count];
        let mut secondary_in: Vec<Vec<WireReceiver<P>>> = (0..count).map(|_| Vec::new()).collect();

        for &(producer, consumer) in &self.connections {
            let (tx, rx) = wire(self.wire_capacity);
            outputs[producer].push(tx);
            primary_in[consumer] = Some(rx);
        }
        for &(producer, consumer) in &self.secondary_connections {
            let (tx, rx) = wire(self.wire_capacity);
            outputs[producer].push(tx);
            secondary_in[consumer].push(rx);
        }
        for (producer, tx) in self.sink_senders {
            outputs[producer].push(tx);
        }

        let mut workers = Vec::with_capacity(count);
        let mut stats = Vec::with_capacity(count);

        let mut outputs = outputs.into_iter();
        let mut secondary_in = secondary_in.into_iter();
        for (index, factory) in self.factories.into_iter().enumerate() {
            let stage = factory(&store);
            let snapshot = store.snapshot();
            let worker = StageWorker::new(
                stage,
                stop.clone(),
                snapshot,
                &log,
                primary_in[index].take(),
                secondary_in.next().unwrap_or_default(),
                outputs.next().unwrap_or_default(),
                self.min_periods[index],
            );
            tracing::debug!("stage worker [{}] wired", worker.name());
            stats.push((worker.name().to_string(), worker.stats()));
            workers.push(worker);
        }

        Ok(Pipeline {
            stop,
            log_stop,
            log,
            store,
            workers,
            handles: Vec::new(),
            stats,
            logger_handle,
            store_handle,
        })
    }
}

/// Names of workers that missed the join deadline and were aborted.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub forced: Vec<String>,
}

impl ShutdownReport {
    /// True when every worker exited on its own; hosts map this to their
    /// process exit status.
    pub fn clean(&self) -> bool {
        self.forced.is_empty()
    }
}

/// A materialized pipeline: the supervisor over every worker task.
pub struct Pipeline<P>
where
    P: Clone + Send + 'static,
{
    stop: StopSignal,
    log_stop: StopSignal,
    log: LogSender,
    store: Arc<ConfigStore>,
    workers: Vec<StageWorker<P>>,
    handles: Vec<(String, JoinHandle<()>)>,
    stats: Vec<(String, Arc<StageStats>)>,
    logger_handle: JoinHandle<()>,
    store_handle: JoinHandle<()>,
}

impl<P> Pipeline<P>
where
    P: Clone + Send + 'static,
{
    /// The master config store, for live `set` calls from the host.
    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// The shared stop signal; setting it begins shutdown.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// A log handle for host-side events, tagged with `sender`.
    pub fn log_sender(&self, sender: impl Into<String>) -> LogSender {
        self.log.named(sender)
    }

    /// Telemetry handle of a stage.
    pub fn stats(&self, id: StageId) -> Option<Arc<StageStats>> {
        self.stats.get(id.0).map(|(_, stats)| Arc::clone(stats))
    }

    /// Start every stage worker in registration order.
    ///
    /// Also seals the store: no snapshot can be created from here on.
    pub fn start(&mut self) {
        self.store.mark_started();

        tracing::info!("Starting {} stages:", self.workers.len());
        for worker in self.workers.drain(..) {
            tracing::info!(" | - {}", worker.name());
            let name = worker.name().to_string();
            self.handles.push((name, tokio::spawn(worker.run())));
        }
    }

    /// Set the stop signal and join everything in reverse start order.
    ///
    /// Each worker gets [`JOIN_DEADLINE`] to exit before it is aborted;
    /// the logger is stopped last so pending events still drain.
    pub async fn stop(mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        self.stop.set();

        for (name, handle) in self.handles.drain(..).rev() {
            join_with_deadline(&name, handle, &mut report).await;
        }

        join_with_deadline("CS", self.store_handle, &mut report).await;

        self.log_stop.set();
        join_with_deadline("LOG", self.logger_handle, &mut report).await;

        if report.clean() {
            tracing::info!("pipeline stopped cleanly");
        } else {
            tracing::warn!("pipeline stopped, {} worker(s) aborted", report.forced.len());
        }

        report
    }
}

async fn join_with_deadline(name: &str, mut handle: JoinHandle<()>, report: &mut ShutdownReport) {
    match tokio::time::timeout(JOIN_DEADLINE, &mut handle).await {
        Ok(_) => {}
        Err(_) => {
            tracing::warn!("worker '{name}' did not exit in time, aborting");
            handle.abort();
            report.forced.push(name.to_string());
        }
    }
}
