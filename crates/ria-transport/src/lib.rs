//! Storage access for RIA stores.
//!
//! Every way of reaching a store implements the [`Transport`] trait, so the
//! layout code and the ORA remote never see which backend they are talking
//! to:
//!
//! - [`LocalTransport`] -- direct filesystem access
//! - [`SshTransport`] -- one persistent remote shell, driven through a
//!   sentinel-framed command protocol
//! - [`HttpTransport`] -- read-only, GET/HEAD over HTTP(S)
//!
//! # Design Rules
//!
//! 1. All operations are synchronous and blocking. Nothing retries.
//! 2. `exists` reports absence as `Ok(false)`, never as an error.
//! 3. Backend failures are translated into [`TransportError`] at the
//!    backend boundary; callers never see `ureq` or process errors.
//! 4. A transport is driven by one caller at a time. The SSH shell in
//!    particular must see each command fully answered before the next one.

pub mod archive;
pub mod connect;
pub mod error;
pub mod http;
pub mod local;
pub mod ssh;
pub mod traits;

pub use connect::{open_transport, TransportOptions};
pub use error::{TransportError, TransportResult};
pub use http::HttpTransport;
pub use local::LocalTransport;
pub use ssh::{ShellLauncher, SshTransport};
pub use traits::{Progress, Transport, WriteMode};
