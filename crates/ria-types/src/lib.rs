//! Foundation types for RIA stores.
//!
//! Every other `ria-*` crate depends on this one. It owns the two pieces of
//! naming logic that must never drift between releases, because existing
//! stores depend on them bit for bit:
//!
//! - [`sanitize`] -- the escaping that turns an opaque content key into a
//!   single filesystem-safe path component.
//! - [`KeyInfo`] -- the size and chunk fields parsed out of a content key,
//!   used to know how many bytes a transfer must produce.
//!
//! It also defines [`ResolvedAddress`], the `(transport, host, base path)`
//! triple that store URLs resolve to, and the [`AddressResolver`] seam that
//! turns configured URLs into that triple.

pub mod address;
pub mod error;
pub mod key;

pub use address::{AddressResolver, ResolvedAddress, RiaUrlResolver, TransportKind};
pub use error::{TypeError, TypeResult};
pub use key::{sanitize, size_of, ContentKey, KeyInfo};
