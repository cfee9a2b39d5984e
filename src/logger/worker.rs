use crate::config::{ConfigSnapshot, ConfigStore};
use crate::core::signal::StopSignal;
use crate::logger::limiter::TokenBucket;
use crate::logger::{LogEvent, LogLevel, format_event};
use serde_json::{Value, json};
use std::time::Duration;

/// Sender name the logger uses for its own events.
const LOGGER_NAME: &str = "LOG";

/// Tokens per second granted to each sink when nothing is configured.
const DEFAULT_RATE: f64 = 1000.0;

/// Config key: tokens per second per sink.
pub const CFG_RATE_LIMITS: &str = "log_rate_limiting_list";
/// Config key: sender names each sink refuses.
pub const CFG_REJECTIONS: &str = "log_rejection_list";
/// Config key: maximum admitted level index per sink.
pub const CFG_LEVELS: &str = "log_logging_lvl";
/// Config key: whether the console sink writes at all.
pub const CFG_PRINT_TO_SCREEN: &str = "log_print_to_screen";

enum SinkTarget {
    /// Sink 0, the process console.
    Console,
    /// An outbound channel handed to the host at build time.
    Channel(flume::Sender<String>),
}

struct Sink {
    target: SinkTarget,
    bucket: TokenBucket,
}

/// The logging worker: one input channel, N rate-limited sinks.
pub struct Logger {
    cfg: ConfigSnapshot,
    input: flume::Receiver<LogEvent>,
    stop: StopSignal,
    sinks: Vec<Sink>,
}

impl Logger {
    /// Build the logger and register its tunables on the master config.
    ///
    /// `create_if_unknown` keeps persisted values; lists that are shorter
    /// than the sink count (a sink was added since the file was written)
    /// are padded with defaults.
    pub(crate) fn new(
        store: &ConfigStore,
        input: flume::Receiver<LogEvent>,
        stop: StopSignal,
        out_channels: Vec<flume::Sender<String>>,
    ) -> Self {
        let sink_count = out_channels.len() + 1;

        ensure_per_sink_list(store, CFG_RATE_LIMITS, sink_count, json!(DEFAULT_RATE));
        ensure_per_sink_list(store, CFG_REJECTIONS, sink_count, json!([]));
        ensure_per_sink_list(store, CFG_LEVELS, sink_count, json!(LogLevel::Info.index()));
        store.create_if_unknown(CFG_PRINT_TO_SCREEN, json!(true));

        // Persist the registered defaults; failures were already reported.
        let _ = store.save();

        let cfg = store.snapshot();

        let mut sinks = Vec::with_capacity(sink_count);
        sinks.push(Sink {
            target: SinkTarget::Console,
            bucket: TokenBucket::new(cfg_rate(&cfg, 0)),
        });
        for (index, tx) in out_channels.into_iter().enumerate() {
            sinks.push(Sink {
                target: SinkTarget::Channel(tx),
                bucket: TokenBucket::new(cfg_rate(&cfg, index + 1)),
            });
        }

        Self {
            cfg,
            input,
            stop,
            sinks,
        }
    }

    /// Consume events until the stop signal is set *and* the input channel
    /// is empty, so nothing queued before shutdown is lost.
    pub(crate) async fn run(mut self) {
        self.output(&LogEvent::new(LogLevel::Info, LOGGER_NAME, "Hello"));

        let mut stop_seen = false;

        while !stop_seen || !self.input.is_empty() {
            self.cfg.refresh();

            match tokio::time::timeout(Duration::from_millis(5), self.input.recv_async()).await {
                Ok(Ok(event)) => self.output(&event),
                Ok(Err(_)) | Err(_) => {
                    if self.stop.wait(Duration::from_millis(10)).await {
                        stop_seen = true;
                    }
                }
            }
        }

        self.output(&LogEvent::new(LogLevel::Info, LOGGER_NAME, "Quitting"));
    }

    /// Format once and offer the line to every sink that admits the event.
    fn output(&mut self, event: &LogEvent) {
        let line = format_event(event);
        let to_screen: bool = self.cfg.get_or(CFG_PRINT_TO_SCREEN, true);

        for index in 0..self.sinks.len() {
            let threshold = self
                .cfg
                .get_or::<Vec<u8>>(CFG_LEVELS, Vec::new())
                .get(index)
                .copied()
                .unwrap_or(LogLevel::Info.index());

            if event.level.index() > threshold {
                continue;
            }

            let rejected = self
                .cfg
                .get_or::<Vec<Vec<String>>>(CFG_REJECTIONS, Vec::new())
                .get(index)
                .is_some_and(|names| names.iter().any(|name| name == &event.sender));

            if rejected {
                continue;
            }

            self.send_to_sink(index, &line, to_screen);
        }
    }

    fn send_to_sink(&mut self, index: usize, line: &str, to_screen: bool) {
        let rate = cfg_rate(&self.cfg, index);

        // Settle the drop account for the past second before admitting
        // anything new. The report passes through the same bucket.
        if let Some(dropped) = self.sinks[index].bucket.take_drop_report() {
            let report = LogEvent::new(
                LogLevel::Info,
                LOGGER_NAME,
                format!("Rate limiter dropped {dropped} messages to output {index} in the last second"),
            );
            let report_line = format_event(&report);
            if self.sinks[index].bucket.admit(rate) {
                self.write(index, &report_line, to_screen);
            }
        }

        if self.sinks[index].bucket.admit(rate) {
            self.write(index, line, to_screen);
        }
    }

    fn write(&mut self, index: usize, line: &str, to_screen: bool) {
        match &self.sinks[index].target {
            SinkTarget::Console => {
                if to_screen {
                    println!("{line}");
                }
            }
            SinkTarget::Channel(tx) => {
                if let Err(e) = tx.try_send(line.to_string()) {
                    // A broken downstream sink must not disturb the others;
                    // report it on the console and move on.
                    let notice = LogEvent::new(
                        LogLevel::Error,
                        LOGGER_NAME,
                        format!("failed to forward log line to output {index}: {e}"),
                    );
                    println!("{}", format_event(&notice));
                }
            }
        }
    }
}

fn cfg_rate(cfg: &ConfigSnapshot, index: usize) -> f64 {
    cfg.get_or::<Vec<f64>>(CFG_RATE_LIMITS, Vec::new())
        .get(index)
        .copied()
        .unwrap_or(DEFAULT_RATE)
}

/// Make sure `key` holds a list with one entry per sink.
fn ensure_per_sink_list(store: &ConfigStore, key: &str, sink_count: usize, default: Value) {
    let fresh: Vec<Value> = (0..sink_count).map(|_| default.clone()).collect();
    if store.create_if_unknown(key, Value::Array(fresh)) {
        return;
    }

    let mut existing = store
        .get(key)
        .and_then(|value| value.as_array().cloned())
        .unwrap_or_default();

    if existing.len() < sink_count {
        while existing.len() < sink_count {
            existing.push(default.clone());
        }
        store.set(key, Value::Array(existing));
    }
}
