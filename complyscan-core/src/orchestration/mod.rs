//! Scan lifecycle: the public orchestrator, the per-job pipeline, the
//! supervised worker pool running it and the lifecycle event bus.

pub mod events;
pub mod orchestrator;
pub mod pipeline;
pub mod runtime;

pub use events::{ScanEvent, ScanEventBus};
pub use orchestrator::{ScanOrchestrator, ScanOrchestratorBuilder};
pub use pipeline::ScanPipeline;
pub use runtime::{ScanExecutor, ScanRuntime};
