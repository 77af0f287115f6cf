//! On-store layout of RIA stores.
//!
//! A RIA store is a directory tree with two independently versioned levels:
//!
//! - the *dataset tree* at the store root, which decides where each dataset
//!   lives (`<base>/<id[:3]>/<id[3:]>`)
//! - one *object tree* per dataset, which decides how content keys map to
//!   paths below `annex/objects`
//!
//! Both levels carry a `ria-layout-version` marker file. This crate computes
//! the paths for a given version, reads and writes the markers, and creates
//! new stores and datasets through any [`Transport`](ria_transport::Transport).
//!
//! # Design Rules
//!
//! 1. Markers are written once. A different version for an existing marker
//!    is a [`LayoutError::Conflict`], never an overwrite.
//! 2. Path computation is pure; only [`store`] functions touch the store.
//! 3. The mapping from key to path is frozen per object-tree version.

pub mod error;
pub mod keypath;
pub mod locations;
pub mod store;
pub mod version;

pub use error::{LayoutError, LayoutResult};
pub use keypath::{key_path, AnnexDirHash, HashStyle, KeyHasher};
pub use locations::{locations, DatasetLocations, StorePaths};
pub use store::{create_dataset, create_store, ensure_version, read_version, verify_version};
pub use version::{TreeKind, VersionMarker, LOGGING_FLAG, VERSION_FILE};
