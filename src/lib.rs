//! Tally: ambient request context and background-operation coordination
//!
//! Process-wide resources and per-request data are bound once at the edge
//! (`context::handle_request`, `context::run_standalone`) and read anywhere
//! below through `context::ambient`. Mutating requests resolve inside one
//! transaction. Long-running background operations are tracked in a
//! persisted, crash-safe progress record that gates conflicting requests.

pub mod bootstrap;
pub mod config;
pub mod context;
pub mod cron;
pub mod db;
pub mod error;
pub mod events;
pub mod limiter;
pub mod logging;
pub mod operation;

pub use bootstrap::{Bootstrap, Services};
pub use error::{ContextError, StorageError, TallyError};
