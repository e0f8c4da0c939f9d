//! Context layer
//!
//! Process-wide state (`GlobalContext`), per-request state (`RequestContext`)
//! and the ambient medium that makes both readable anywhere below a bound
//! call, with transactional and standalone entry points on top.

pub mod ambient;
pub mod global;
pub mod request;
pub mod standalone;
pub mod transaction;

pub use ambient::{run, run_transaction};
pub use global::{initialize_global, GlobalContext};
pub use request::{HttpMethod, RequestContext, SessionInfo, UserIdentity};
pub use standalone::{run_standalone, run_standalone_with, RequestMeta};
pub use transaction::{handle_request, MutatingMethods, NeverWrap, TransactionPolicy};
