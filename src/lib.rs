//! Gangway - a batching query bridge between a host build system and an
//! external Bazel-compatible workspace evaluator.
//!
//! While the host build constructs its graph, callers queue questions of the
//! form "what would building label L under architecture A produce?" through a
//! shared [`QueryBridge`]. A single flush then materializes a synthetic
//! workspace covering every queued question, runs the evaluator's query,
//! action-extraction, and build passes once each, and demultiplexes the
//! answers back to their questions. Either every question gets an answer or
//! the flush fails; there is no partial result.

pub mod actions;
pub mod context;
pub mod demux;
pub mod errors;
pub mod invoke;
pub mod label;
pub mod materialize;
pub mod request;
pub mod script;
pub mod util;

pub use actions::BuildStatement;
pub use context::{EngineConfig, QueryBridge};
pub use errors::{ConfigError, InvokeError, ProtocolError};
pub use request::{OutputFilesAndObjects, QueryKind, QueryRequest};
