//! Application layer: use cases and port interfaces

pub mod catalog;
pub mod engine;
pub mod maintenance;
pub mod ports;

pub use catalog::{Catalog, CatalogError};
pub use engine::{
    EngineDeps, EngineError, EngineEvent, EventSink, RecordingEngine, StartError, StopError,
    CHECKPOINT_INTERVAL, MAX_INFLIGHT_CHUNKS, STOP_TIMEOUT,
};
pub use maintenance::{run_startup_maintenance, StartupReport};
