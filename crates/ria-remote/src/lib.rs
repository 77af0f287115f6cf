//! The ORA special remote.
//!
//! A content tracker hands out opaque content keys and asks a *special
//! remote* to store, retrieve, check, and remove the content behind them.
//! This crate implements that remote for RIA stores:
//!
//! - [`RemoteConfig`] -- layered configuration (local, committed, legacy)
//! - [`Session`] -- the live read or write transport
//! - [`RiaRemote`] -- the operation handlers and their lifecycle
//! - [`Host`] -- what the remote needs from the process hosting it
//!
//! # Design Rules
//!
//! 1. Version drift never blocks reads. It downgrades the remote to
//!    read-only unless `force-write` is set.
//! 2. Every handler failure surfaces as a [`BackendError`], after the store
//!    error log was written (when enabled) and the session closed.
//! 3. Nothing is created on the store except objects, staging files, and
//!    error log entries.

pub mod config;
pub mod error;
pub mod host;
pub mod remote;
pub mod session;

pub use config::{merge_layers, ConfigLayer, ConfigOrigin, ConfigValue, RemoteConfig};
pub use error::{BackendError, RemoteError, RemoteResult};
pub use host::{Host, MemoryHost};
pub use remote::{
    Access, Availability, Connector, RemoteState, RetrieveSource, RiaRemote, StoreInfo, LOCAL_COST,
    REMOTE_COST,
};
pub use session::{Session, SessionEvent, Transition};
