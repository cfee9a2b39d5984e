//! End-to-end pipeline behavior: data movement, backpressure, graph
//! validation and shutdown.

use async_trait::async_trait;
use brink::{DEFAULT_MIN_PERIOD, GraphBuilder, GraphError, Stage, StageContext};
use std::time::{Duration, Instant};

/// Emits `1..=limit`, one item per tick, then goes quiet.
struct Sequence {
    next: u64,
    limit: u64,
}

#[async_trait]
impl Stage<u64> for Sequence {
    fn name(&self) -> &str {
        "sequence"
    }

    async fn run(
        &mut self,
        _input: Option<u64>,
        _ctx: &mut StageContext<u64>,
    ) -> anyhow::Result<Option<u64>> {
        if self.next >= self.limit {
            return Ok(None);
        }
        self.next += 1;
        Ok(Some(self.next))
    }
}

struct Identity;

#[async_trait]
impl Stage<u64> for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    async fn run(
        &mut self,
        input: Option<u64>,
        _ctx: &mut StageContext<u64>,
    ) -> anyhow::Result<Option<u64>> {
        Ok(input)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_stage_passthrough_delivers_everything() {
    brink::logging::init("info");

    let mut builder: GraphBuilder<u64> = GraphBuilder::new();
    let producer = builder.register_stage(
        |_| Box::new(Sequence { next: 0, limit: 100 }),
        Duration::from_millis(10),
    );
    let consumer = builder.register_stage(|_| Box::new(Identity), Duration::from_millis(5));
    builder.register_connection(producer, consumer).unwrap();
    let sink = builder.register_sink(consumer).unwrap();

    let mut pipeline = builder.init().unwrap();
    pipeline.start();

    let mut received = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    while received.len() < 100 && Instant::now() < deadline {
        if let Some(item) = sink.recv_timeout(Duration::from_millis(200)).await {
            received.push(item);
        }
    }

    let report = pipeline.stop().await;
    assert!(report.clean());

    // A slow producer and a fast consumer lose nothing.
    assert_eq!(received, (1..=100).collect::<Vec<u64>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn backpressure_drops_newest_and_logs() {
    let dir = tempfile::tempdir().unwrap();
    let cfg_path = dir.path().join("cfg.json");
    // Admit DEBUG on the outbound log sink so the drop events are visible.
    std::fs::write(&cfg_path, r#"{"log_logging_lvl": [2, 3]}"#).unwrap();

    let mut builder: GraphBuilder<u64> = GraphBuilder::new().with_config_file(&cfg_path);
    let log_lines = builder.register_log_sink();
    let producer = builder.register_stage(
        |_| {
            Box::new(Sequence {
                next: 0,
                limit: 1000,
            })
        },
        Duration::ZERO,
    );
    let consumer = builder.register_stage(|_| Box::new(Identity), Duration::from_millis(50));
    builder.register_connection(producer, consumer).unwrap();
    let sink = builder.register_sink(consumer).unwrap();

    let mut pipeline = builder.init().unwrap();
    pipeline.start();

    let mut received = Vec::new();
    let deadline = Instant::now() + Duration::from_millis(800);
    while Instant::now() < deadline {
        if let Some(item) = sink.recv_timeout(Duration::from_millis(100)).await {
            received.push(item);
        }
    }

    let report = pipeline.stop().await;
    assert!(report.clean());

    // Whatever arrives is in order; the rest was dropped, not reordered.
    assert!(!received.is_empty());
    assert!(received.len() <= 1000);
    assert!(received.windows(2).all(|pair| pair[0] < pair[1]));

    let lines: Vec<String> = log_lines.drain().collect();
    assert!(
        lines.iter().any(|line| line.contains("WireSendFull")),
        "expected at least one drop event in {} log lines",
        lines.len()
    );
}

#[tokio::test]
async fn cyclic_wiring_fails_init() {
    let mut builder: GraphBuilder<u64> = GraphBuilder::new();
    let a = builder.register_stage(|_| Box::new(Identity), DEFAULT_MIN_PERIOD);
    let b = builder.register_stage(|_| Box::new(Identity), DEFAULT_MIN_PERIOD);
    builder.register_connection(a, b).unwrap();
    builder.register_connection(b, a).unwrap();

    assert!(matches!(builder.init(), Err(GraphError::Cycle)));
}

#[tokio::test]
async fn second_primary_into_same_consumer_is_rejected() {
    let mut builder: GraphBuilder<u64> = GraphBuilder::new();
    let a = builder.register_stage(|_| Box::new(Identity), DEFAULT_MIN_PERIOD);
    let b = builder.register_stage(|_| Box::new(Identity), DEFAULT_MIN_PERIOD);
    let c = builder.register_stage(|_| Box::new(Identity), DEFAULT_MIN_PERIOD);
    builder.register_connection(a, c).unwrap();

    assert!(matches!(
        builder.register_connection(b, c),
        Err(GraphError::DuplicatePrimary(_))
    ));
}

/// Each stage floods the log channel right before shutdown; everything
/// queued must still reach the sink.
struct Chatty {
    name: String,
}

#[async_trait]
impl Stage<u64> for Chatty {
    fn name(&self) -> &str {
        &self.name
    }

    async fn pre_run(&mut self, ctx: &mut StageContext<u64>) -> anyhow::Result<()> {
        for i in 0..50 {
            ctx.info(format!("chatty-event {i}"));
        }
        Ok(())
    }

    async fn run(
        &mut self,
        _input: Option<u64>,
        _ctx: &mut StageContext<u64>,
    ) -> anyhow::Result<Option<u64>> {
        Ok(None)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pending_logs_drain_on_shutdown() {
    let mut builder: GraphBuilder<u64> = GraphBuilder::new();
    let log_lines = builder.register_log_sink();
    for i in 0..10 {
        builder.register_stage(
            move |_| {
                Box::new(Chatty {
                    name: format!("chatty-{i}"),
                })
            },
            Duration::from_millis(10),
        );
    }

    let mut pipeline = builder.init().unwrap();
    pipeline.start();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let started = Instant::now();
    let report = pipeline.stop().await;
    assert!(report.clean());
    assert!(started.elapsed() < Duration::from_secs(22));

    let lines: Vec<String> = log_lines.drain().collect();
    let events = lines
        .iter()
        .filter(|line| line.contains("chatty-event"))
        .count();
    assert_eq!(events, 500);
}

/// A stage that never observes the stop signal gets aborted at the join
/// deadline and shows up in the shutdown report.
struct Stuck;

#[async_trait]
impl Stage<u64> for Stuck {
    fn name(&self) -> &str {
        "stuck"
    }

    async fn run(
        &mut self,
        _input: Option<u64>,
        _ctx: &mut StageContext<u64>,
    ) -> anyhow::Result<Option<u64>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(None)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stuck_stage_is_aborted_at_deadline() {
    // The abort path emits framework warnings; make them visible.
    brink::logging::init("warn");

    let mut builder: GraphBuilder<u64> = GraphBuilder::new();
    builder.register_stage(|_| Box::new(Stuck), DEFAULT_MIN_PERIOD);

    let mut pipeline = builder.init().unwrap();
    pipeline.start();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let started = Instant::now();
    let report = pipeline.stop().await;

    assert!(!report.clean());
    assert_eq!(report.forced, vec!["stuck".to_string()]);
    assert!(started.elapsed() < Duration::from_secs(6));
}

/// Secondary wires cache the last seen value and never gate the tick.
struct Mixer;

#[async_trait]
impl Stage<u64> for Mixer {
    fn name(&self) -> &str {
        "mixer"
    }

    async fn run(
        &mut self,
        input: Option<u64>,
        ctx: &mut StageContext<u64>,
    ) -> anyhow::Result<Option<u64>> {
        let offset = ctx.secondary(0).copied().unwrap_or(0);
        Ok(input.map(|v| v + offset))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn secondary_input_offsets_the_stream() {
    let mut builder: GraphBuilder<u64> = GraphBuilder::new();
    let numbers = builder.register_stage(
        |_| {
            Box::new(Sequence {
                next: 0,
                limit: 1000,
            })
        },
        Duration::from_millis(10),
    );
    let offset = builder.register_stage(
        |_| {
            Box::new(Sequence {
                next: 999,
                limit: 1000,
            })
        },
        Duration::from_millis(5),
    );
    let mixer = builder.register_stage(|_| Box::new(Mixer), Duration::from_millis(5));
    builder.register_connection(numbers, mixer).unwrap();
    builder.register_secondary_connection(offset, mixer).unwrap();
    let sink = builder.register_sink(mixer).unwrap();

    let mut pipeline = builder.init().unwrap();
    pipeline.start();

    // The offset producer emits a single 1000; once the mixer has cached
    // it, every output is input + 1000.
    let mut saw_offset_applied = false;
    let deadline = Instant::now() + Duration::from_secs(5);
    while !saw_offset_applied && Instant::now() < deadline {
        if let Some(item) = sink.recv_timeout(Duration::from_millis(100)).await {
            if item > 1000 {
                saw_offset_applied = true;
            }
        }
    }

    let report = pipeline.stop().await;
    assert!(report.clean());
    assert!(saw_offset_applied);
}
