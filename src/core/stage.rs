//! The user-logic contract and per-stage execution context.

use crate::config::ConfigSnapshot;
use crate::core::wire::WireReceiver;
use crate::logger::{LogLevel, LogSender};
use async_trait::async_trait;

/// A unit of user business logic executed by a stage worker.
///
/// Only `run` is required. `pre_run` and `post_run` bracket the tick loop
/// for setup and teardown. Errors returned from any hook are caught at the
/// worker boundary, logged with this stage's name as the sender, and never
/// take the pipeline down.
#[async_trait]
pub trait Stage<P>: Send
where
    P: Clone + Send + 'static,
{
    /// Short name used to tag log events from this stage.
    fn name(&self) -> &str;

    /// Called once before the tick loop starts.
    async fn pre_run(&mut self, _ctx: &mut StageContext<P>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Per-tick business logic.
    ///
    /// `input` is the latest item from the primary wire; it is `None` only
    /// when the stage has no primary wire. Return `None` to suppress
    /// output this tick.
    async fn run(&mut self, input: Option<P>, ctx: &mut StageContext<P>)
    -> anyhow::Result<Option<P>>;

    /// Called once after the tick loop ends, before the worker exits.
    async fn post_run(&mut self, _ctx: &mut StageContext<P>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Runtime services handed to every stage hook: the sealed config
/// snapshot, the log channel, and the cached secondary inputs.
pub struct StageContext<P> {
    pub(crate) cfg: ConfigSnapshot,
    log: LogSender,
    secondary_in: Vec<WireReceiver<P>>,
    secondary: Vec<Option<P>>,
}

impl<P> StageContext<P>
where
    P: Clone + Send + 'static,
{
    pub(crate) fn new(
        cfg: ConfigSnapshot,
        log: LogSender,
        secondary_in: Vec<WireReceiver<P>>,
    ) -> Self {
        let secondary = vec![None; secondary_in.len()];
        Self {
            cfg,
            log,
            secondary_in,
            secondary,
        }
    }

    /// The stage's configuration snapshot.
    pub fn config(&self) -> &ConfigSnapshot {
        &self.cfg
    }

    /// Poll every secondary wire once; a received item replaces the cached
    /// value for that wire, an empty wire leaves it intact.
    pub(crate) fn poll_secondary(&mut self) {
        for (slot, rx) in self.secondary.iter_mut().zip(&self.secondary_in) {
            if let Some(item) = rx.try_recv() {
                *slot = Some(item);
            }
        }
    }

    /// Last value seen on secondary wire `index`, if any arrived yet.
    pub fn secondary(&self, index: usize) -> Option<&P> {
        self.secondary.get(index).and_then(|slot| slot.as_ref())
    }

    pub fn secondary_count(&self) -> usize {
        self.secondary_in.len()
    }

    /// Enqueue a structured log event tagged with this stage's name.
    pub fn emit(&self, level: LogLevel, message: impl Into<String>) {
        self.log.emit(level, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(LogLevel::Error, message);
    }

    pub fn log(&self, message: impl Into<String>) {
        self.emit(LogLevel::Log, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(LogLevel::Info, message);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.emit(LogLevel::Debug, message);
    }
}
