//! File reference and storage request lifecycle engine.
//!
//! This crate provides:
//! - Flow message handlers (add, store, delete, availability, retry)
//! - The job scheduler and per-request job execution
//! - The restoration cache manager
//! - Job crash detection and startup recovery
//! - Event publishers and Prometheus metrics

pub mod cache;
pub mod error;
pub mod events;
pub mod handlers;
pub mod ingest;
pub mod metrics;
pub mod scheduler;
pub mod state;

pub use cache::CacheManager;
pub use error::{EngineError, EngineResult};
pub use events::{BroadcastPublisher, EventPublisher, MemoryPublisher};
pub use ingest::{IngestStats, ingest_lines};
pub use state::{AppState, JobTaskRegistry};
