//! Synchronization against the remote authority.
//!
//! The authority is the single source of truth for per-item `version`
//! assignment. This module carries the protocol contract ([`Authority`],
//! the wire types), the reference in-process implementation backing the
//! server and the tests ([`MemoryAuthority`]), the HTTP client
//! ([`HttpAuthority`]) and the reconciler that drives sync cycles.

mod authority;
mod error;
mod http;
mod memory;
mod protocol;
mod reconciler;

pub use authority::Authority;
pub use error::SyncError;
pub use http::{check_server, HttpAuthority};
pub use memory::{AuthoritySnapshot, MemoryAuthority};
pub use protocol::{PullRequest, PullResponse, SubmitResponse};
pub use reconciler::{Reconciler, SyncReport};
