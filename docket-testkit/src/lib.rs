//! In-memory collaborators and scripted processors for testing docket.
//!
//! Everything here targets integration tests and examples: the broker and
//! result store are faithful in-memory stand-ins for durable backends, and
//! the scripted processor turns submission options into deterministic job
//! behavior (staged progress, failures, panics, or a loop only a
//! cancellation can stop).

pub mod broker;
pub mod processor;
pub mod store;

pub use broker::InMemoryBroker;
pub use processor::{scripted_artifacts, ProcessorCall, RecordingProcessor, ScriptedProcessor};
pub use store::InMemoryResultStore;
