//! Reading, verifying, and creating store structure through a transport.

use std::path::{Path, PathBuf};

use ria_transport::{Transport, WriteMode};
use tracing::{debug, info, warn};

use crate::error::{LayoutError, LayoutResult};
use crate::locations::{locations, split_dataset_id, DatasetLocations, StorePaths};
use crate::version::{TreeKind, VersionMarker, VERSION_FILE};

/// Read the marker in `dir`, if there is one.
pub fn read_version(io: &mut dyn Transport, dir: &Path) -> LayoutResult<Option<VersionMarker>> {
    let file = dir.join(VERSION_FILE);
    if !io.exists(&file)? {
        return Ok(None);
    }
    Ok(Some(VersionMarker::parse(&io.read_file(&file)?)))
}

/// Read the marker in `dir` and insist that its version is one this crate
/// understands for `tree`.
pub fn verify_version(
    io: &mut dyn Transport,
    dir: &Path,
    tree: TreeKind,
) -> LayoutResult<VersionMarker> {
    let marker =
        read_version(io, dir)?.ok_or_else(|| LayoutError::MissingLayoutVersion(dir.join(VERSION_FILE)))?;
    if !tree.is_known(&marker.version) {
        return Err(LayoutError::UnknownLayoutVersion {
            path: dir.join(VERSION_FILE),
            version: marker.version,
        });
    }
    debug!(dir = %dir.display(), %tree, version = %marker, "verified layout version");
    Ok(marker)
}

/// Make sure `dir` carries `marker`.
///
/// Writes the marker (creating `dir`) if none exists. An existing marker
/// with the same leading version is left untouched, flags included; a
/// different version is a [`LayoutError::Conflict`].
pub fn ensure_version(
    io: &mut dyn Transport,
    dir: &Path,
    marker: &VersionMarker,
) -> LayoutResult<()> {
    let file = dir.join(VERSION_FILE);
    if let Some(existing) = read_version(io, dir)? {
        if existing.version != marker.version {
            return Err(LayoutError::Conflict {
                path: file,
                existing: existing.version,
                requested: marker.version.clone(),
            });
        }
        debug!(path = %file.display(), "layout version already present");
        return Ok(());
    }

    io.mkdir(dir)?;
    io.write_file(&file, &marker.render(), WriteMode::Overwrite)?;
    info!(path = %io.describe(&file), version = %marker, "wrote layout version");
    Ok(())
}

/// Set up a store root: version marker and error log directory.
pub fn create_store(
    io: &mut dyn Transport,
    base: &Path,
    marker: &VersionMarker,
) -> LayoutResult<StorePaths> {
    ensure_version(io, base, marker)?;
    let store = StorePaths::new(base);
    io.mkdir(&store.error_log_dir())?;
    Ok(store)
}

/// Set up a dataset inside a store, creating the store too if needed.
///
/// The alias is a convenience only. If it cannot be created (name taken,
/// symlinks unsupported) a warning is logged and the dataset is still
/// returned.
pub fn create_dataset(
    io: &mut dyn Transport,
    base: &Path,
    dataset_id: &str,
    object_marker: &VersionMarker,
    store_marker: &VersionMarker,
    alias: Option<&str>,
) -> LayoutResult<DatasetLocations> {
    let store = create_store(io, base, store_marker)?;
    let locs = locations(&store_marker.version, base, dataset_id)?;

    ensure_version(io, &locs.git_dir, object_marker)?;
    io.mkdir(&locs.archive_dir)?;
    io.mkdir(&locs.objects_dir)?;

    if let Some(name) = alias {
        if let Err(e) = create_alias(io, &store, name, dataset_id) {
            warn!(alias = name, error = %e, "could not create dataset alias, continuing without it");
        }
    }
    Ok(locs)
}

fn create_alias(
    io: &mut dyn Transport,
    store: &StorePaths,
    name: &str,
    dataset_id: &str,
) -> LayoutResult<()> {
    if name.is_empty() || name.contains('/') || name.starts_with('.') {
        return Err(LayoutError::InvalidDatasetId {
            id: name.to_string(),
            reason: "alias must be a plain file name".into(),
        });
    }
    let link = store.alias_dir().join(name);
    if io.exists(&link)? {
        warn!(alias = name, path = %io.describe(&link), "alias already exists");
        return Ok(());
    }
    let (head, tail) = split_dataset_id(dataset_id)?;
    let target: PathBuf = ["..", head, tail].iter().collect();
    io.mkdir(&store.alias_dir())?;
    io.symlink(&target, &link)?;
    debug!(alias = name, target = %target.display(), "created alias");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ria_transport::LocalTransport;
    use std::fs;
    use tempfile::TempDir;

    const ID: &str = "8c6ed3c2-5a7f-11ea-9b5e-000c29f04bcc";

    #[test]
    fn ensure_version_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("store");
        let mut io = LocalTransport::new();
        let marker = VersionMarker::new("1", "l");

        ensure_version(&mut io, &base, &marker).unwrap();
        ensure_version(&mut io, &base, &marker).unwrap();
        assert_eq!(fs::read_to_string(base.join(VERSION_FILE)).unwrap(), "1|l\n");

        // Same version with other flags is not a conflict and changes nothing.
        ensure_version(&mut io, &base, &VersionMarker::new("1", "")).unwrap();
        assert_eq!(fs::read_to_string(base.join(VERSION_FILE)).unwrap(), "1|l\n");
    }

    #[test]
    fn ensure_version_conflict() {
        let dir = TempDir::new().unwrap();
        let mut io = LocalTransport::new();
        ensure_version(&mut io, dir.path(), &VersionMarker::new("1", "")).unwrap();
        let err = ensure_version(&mut io, dir.path(), &VersionMarker::new("2", "")).unwrap_err();
        match err {
            LayoutError::Conflict {
                existing, requested, ..
            } => assert_eq!((existing.as_str(), requested.as_str()), ("1", "2")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn verify_reports_missing_and_unknown() {
        let dir = TempDir::new().unwrap();
        let mut io = LocalTransport::new();
        let err = verify_version(&mut io, dir.path(), TreeKind::DatasetTree).unwrap_err();
        assert!(matches!(err, LayoutError::MissingLayoutVersion(_)));
        assert!(err.is_version_drift());

        fs::write(dir.path().join(VERSION_FILE), "5|l\n").unwrap();
        let err = verify_version(&mut io, dir.path(), TreeKind::DatasetTree).unwrap_err();
        assert!(matches!(err, LayoutError::UnknownLayoutVersion { ref version, .. } if version == "5"));

        fs::write(dir.path().join(VERSION_FILE), "1|l\n").unwrap();
        let marker = verify_version(&mut io, dir.path(), TreeKind::DatasetTree).unwrap();
        assert!(marker.logging_enabled());
    }

    #[test]
    fn create_dataset_builds_tree() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("store");
        let mut io = LocalTransport::new();

        let locs = create_dataset(
            &mut io,
            &base,
            ID,
            &VersionMarker::dataset_default(),
            &VersionMarker::store_default(),
            Some("my-data"),
        )
        .unwrap();

        assert_eq!(fs::read_to_string(base.join(VERSION_FILE)).unwrap(), "1|l\n");
        assert_eq!(fs::read_to_string(locs.version_file()).unwrap(), "2|l\n");
        assert!(locs.archive_dir.is_dir());
        assert!(locs.objects_dir.is_dir());
        assert!(base.join("error_logs").is_dir());

        let alias = base.join("alias/my-data");
        assert_eq!(
            fs::read_link(&alias).unwrap(),
            PathBuf::from("../8c6/ed3c2-5a7f-11ea-9b5e-000c29f04bcc")
        );
        assert_eq!(fs::canonicalize(&alias).unwrap(), fs::canonicalize(&locs.git_dir).unwrap());
    }

    #[test]
    fn alias_collision_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let base = dir.path();
        let mut io = LocalTransport::new();
        let store = VersionMarker::store_default();
        let ds = VersionMarker::dataset_default();

        create_dataset(&mut io, base, ID, &ds, &store, Some("shared")).unwrap();
        let other = "0a1b2c3d-0000-0000-0000-000000000000";
        let locs = create_dataset(&mut io, base, other, &ds, &store, Some("shared")).unwrap();
        assert!(locs.objects_dir.is_dir());
        assert_eq!(
            fs::read_link(base.join("alias/shared")).unwrap(),
            PathBuf::from("../8c6/ed3c2-5a7f-11ea-9b5e-000c29f04bcc")
        );

        // An unusable alias name is skipped the same way.
        create_dataset(&mut io, base, other, &ds, &store, Some("../escape")).unwrap();
    }

    #[test]
    fn create_dataset_respects_existing_store_version() {
        let dir = TempDir::new().unwrap();
        let mut io = LocalTransport::new();
        create_store(&mut io, dir.path(), &VersionMarker::new("1", "")).unwrap();
        let err = create_dataset(
            &mut io,
            dir.path(),
            ID,
            &VersionMarker::dataset_default(),
            &VersionMarker::new("3", ""),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, LayoutError::Conflict { .. }));
    }
}
