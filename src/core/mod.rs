pub mod graph;
pub mod signal;
pub mod stage;
pub mod telemetry;
pub mod wire;
pub mod worker;

pub use graph::{GraphBuilder, Pipeline, ShutdownReport, StageId};
pub use signal::StopSignal;
pub use stage::{Stage, StageContext};
pub use telemetry::{Ewma, StageState, StageStats};
pub use wire::{SendOutcome, WireReceiver, WireSender};
pub use worker::StageWorker;
