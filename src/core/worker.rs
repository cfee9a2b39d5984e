//! The generic stage worker: a time-paced, cancellable tick loop around a
//! piece of user logic.
//!
//! Every tick: refresh the config snapshot, receive at most one item from
//! the primary wire (bounded by half the minimum period), poll the
//! secondary wires, run the user logic, fan the result out to the output
//! wires, then sleep the rest of the period on the stop signal. The only
//! two suspension points are the primary receive and the end-of-tick wait,
//! so a worker reacts to shutdown within one period.

use crate::config::ConfigSnapshot;
use crate::core::signal::StopSignal;
use crate::core::stage::{Stage, StageContext};
use crate::core::telemetry::{EWMA_ALPHA, EWMA_SEED, Ewma, StageState, StageStats};
use crate::core::wire::{SendOutcome, WireReceiver, WireSender};
use crate::logger::LogSender;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct StageWorker<P>
where
    P: Clone + Send + 'static,
{
    name: String,
    stage: Box<dyn Stage<P>>,
    stop: StopSignal,
    ctx: StageContext<P>,
    data_in: Option<WireReceiver<P>>,
    data_out: Vec<WireSender<P>>,
    min_period: Duration,
    stats: Arc<StageStats>,
    get_time: Ewma,
    secondary_time: Ewma,
    run_time: Ewma,
    post_time: Ewma,
}

impl<P> StageWorker<P>
where
    P: Clone + Send + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        stage: Box<dyn Stage<P>>,
        stop: StopSignal,
        mut cfg: ConfigSnapshot,
        log: &LogSender,
        data_in: Option<WireReceiver<P>>,
        secondary_in: Vec<WireReceiver<P>>,
        data_out: Vec<WireSender<P>>,
        min_period: Duration,
    ) -> Self {
        let name = stage.name().to_string();
        cfg.seal();
        let ctx = StageContext::new(cfg, log.named(&name), secondary_in);

        Self {
            name,
            stage,
            stop,
            ctx,
            data_in,
            data_out,
            min_period,
            stats: Arc::new(StageStats::new()),
            get_time: Ewma::new(EWMA_SEED, EWMA_ALPHA),
            secondary_time: Ewma::new(EWMA_SEED, EWMA_ALPHA),
            run_time: Ewma::new(EWMA_SEED, EWMA_ALPHA),
            post_time: Ewma::new(EWMA_SEED, EWMA_ALPHA),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared handle to this worker's telemetry.
    pub fn stats(&self) -> Arc<StageStats> {
        Arc::clone(&self.stats)
    }

    pub(crate) async fn run(mut self) {
        self.stats.set_state(StageState::Running);
        self.ctx.info("Hello");
        self.ctx.cfg.refresh();

        if let Err(e) = self.stage.pre_run(&mut self.ctx).await {
            self.ctx.error(format!("pre_run failed: {e:#}"));
        }

        while !self.stop.is_set() {
            self.tick().await;
        }

        self.stats.set_state(StageState::Draining);

        // Dropping the senders closes the output wires for downstream
        // consumers; the primary input is drained so the producer side is
        // not left holding stale items.
        self.data_out.clear();
        if let Some(rx) = self.data_in.take() {
            rx.drain();
        }

        if let Err(e) = self.stage.post_run(&mut self.ctx).await {
            self.ctx.error(format!("post_run failed: {e:#}"));
        }

        self.ctx.info("Quitting");
        self.stats.set_state(StageState::Stopped);
    }

    async fn tick(&mut self) {
        self.ctx.cfg.refresh();

        let phase = Instant::now();
        let data = match &self.data_in {
            Some(rx) => rx.recv_timeout(self.min_period / 2).await,
            None => None,
        };
        let get_elapsed = phase.elapsed().as_secs_f64();
        self.stats.set_get_time(self.get_time.update(get_elapsed));

        let phase = Instant::now();
        self.ctx.poll_secondary();
        let secondary_elapsed = phase.elapsed().as_secs_f64();
        self.stats
            .set_secondary_time(self.secondary_time.update(secondary_elapsed));

        // A stage with a primary wire only runs its logic when data
        // arrived this tick; a source stage runs every tick.
        let phase = Instant::now();
        let out = if self.data_in.is_some() && data.is_none() {
            None
        } else {
            match self.stage.run(data, &mut self.ctx).await {
                Ok(out) => out,
                Err(e) => {
                    self.ctx.error(format!("{e:#}"));
                    None
                }
            }
        };
        let run_elapsed = phase.elapsed().as_secs_f64();
        self.stats.set_run_time(self.run_time.update(run_elapsed));

        let phase = Instant::now();
        if let Some(out) = out {
            for (index, tx) in self.data_out.iter().enumerate() {
                match tx.try_send(out.clone()) {
                    SendOutcome::Sent => {}
                    SendOutcome::Full => self.ctx.debug(format!(
                        "WireSendFull: output wire {index} is full, dropping newest item"
                    )),
                    SendOutcome::Closed => {
                        self.ctx.debug(format!("output wire {index} is closed"))
                    }
                }
            }
        }
        let post_elapsed = phase.elapsed().as_secs_f64();
        self.stats.set_post_time(self.post_time.update(post_elapsed));

        self.stats.bump_ticks();

        let elapsed = get_elapsed + secondary_elapsed + run_elapsed + post_elapsed;
        let budget = self.min_period.as_secs_f64();
        if elapsed < budget {
            self.stop
                .wait(Duration::from_secs_f64(budget - elapsed))
                .await;
        } else {
            // A zero-period stage has no suspension point of its own; it
            // must still yield to the scheduler once per tick.
            tokio::task::yield_now().await;
        }
    }
}
