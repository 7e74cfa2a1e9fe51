//! Run engine: queued, concurrent, cancellable agent conversations.
//!
//! - [`domain`]: runs, agent definitions and events.
//! - [`persistence`]: run storage and agent lookup.
//! - [`runtime`]: queue, dispatcher, executor and the [`RunManager`] facade.
//! - [`sink`]: best-effort event delivery.

pub mod domain;
pub mod error;
pub mod persistence;
pub mod runtime;
pub mod sink;

pub use error::{EngineError, SinkError, StoreError};
pub use runtime::{RunManager, RunManagerOptions};
