//! brink — a runtime for building multi-stage streaming pipelines on edge
//! devices.
//!
//! A host program declares stages (units of business logic), wires them
//! into a directed graph and starts the runtime. Each stage then runs as
//! an independent worker with a paced tick loop; data moves over bounded
//! wires with drop-newest backpressure, live configuration changes fan out
//! from a master store to per-stage snapshots, and every diagnostic
//! message funnels into one rate-limited logger.
//!
//! ```no_run
//! use brink::{GraphBuilder, Stage, StageContext};
//! use async_trait::async_trait;
//! use std::time::Duration;
//!
//! struct Doubler;
//!
//! #[async_trait]
//! impl Stage<i64> for Doubler {
//!     fn name(&self) -> &str {
//!         "doubler"
//!     }
//!
//!     async fn run(
//!         &mut self,
//!         input: Option<i64>,
//!         _ctx: &mut StageContext<i64>,
//!     ) -> anyhow::Result<Option<i64>> {
//!         Ok(input.map(|v| v * 2))
//!     }
//! }
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let mut builder: GraphBuilder<i64> = GraphBuilder::new();
//! let source = builder.register_stage(|_| Box::new(Doubler), Duration::from_millis(10));
//! let doubler = builder.register_stage(|_| Box::new(Doubler), Duration::from_millis(5));
//! builder.register_connection(source, doubler)?;
//! let sink = builder.register_sink(doubler)?;
//!
//! let mut pipeline = builder.init()?;
//! pipeline.start();
//!
//! while let Some(item) = sink.recv_timeout(Duration::from_millis(100)).await {
//!     println!("got {item}");
//! }
//!
//! let report = pipeline.stop().await;
//! assert!(report.clean());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod logger;
pub mod logging;

pub use crate::config::{ConfigSnapshot, ConfigStore};
pub use crate::core::graph::{DEFAULT_MIN_PERIOD, GraphBuilder, Pipeline, ShutdownReport, StageId};
pub use crate::core::signal::StopSignal;
pub use crate::core::stage::{Stage, StageContext};
pub use crate::core::telemetry::{StageState, StageStats};
pub use crate::core::wire::{DEFAULT_WIRE_CAPACITY, SendOutcome, WireReceiver, WireSender};
pub use crate::error::{ConfigError, GraphError};
pub use crate::logger::{LogEvent, LogLevel, LogSender};
