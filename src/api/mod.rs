//! Purpose: Public Rust API for the list protocol and its HTTP client.
//! Exports: Orchestrator entry point, request/response types, core re-exports, `RemoteClient`.
//! Role: Stable surface used by the server binary, integration tests, and tools.
//! Invariants: Everything a caller needs is re-exported here; `core` stays an implementation detail.

mod list;
mod remote;

pub use crate::core::clock::{Clock, ManualClock, SystemClock, Timestamp};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::table::{PurgeReport, Record, SnapshotStore, VersionedTable};
pub use crate::core::token::{Continuation, NextPageToken, SyncToken, TokenKind};
pub use list::{
    DEFAULT_MAX_RESULTS, DEFAULT_MAX_RESULTS_CAP, DEFAULT_RETENTION, ListOptions, ListQuery,
    ListResponse, list,
};
pub use remote::{RemoteClient, RemoteListPages};
