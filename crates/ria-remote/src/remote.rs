//! The ORA special remote: operation handlers over a RIA store.
//!
//! A [`RiaRemote`] moves through
//! `Unconfigured → ConfigLoaded → StoreVerified → Ready`. Handlers prepare
//! lazily, so the host may call any of them first. Every public handler runs
//! inside one wrapper that logs failures to the store's error log, closes
//! the session, and reports a [`BackendError`].

use std::path::{Path, PathBuf};

use chrono::Utc;
use ria_layout::{
    key_path, locations, read_version, verify_version, DatasetLocations, HashStyle, LayoutError,
    StorePaths, TreeKind, VersionMarker,
};
use ria_transport::{
    open_transport, Progress, Transport, TransportError, TransportOptions, TransportResult,
    WriteMode,
};
use ria_types::{AddressResolver, ContentKey, ResolvedAddress, RiaUrlResolver, TransportKind};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{self, ConfigOrigin, RemoteConfig};
use crate::error::{BackendError, RemoteError, RemoteResult};
use crate::host::Host;
use crate::session::{Session, SessionEvent, Transition};

/// Cost reported for stores on a local filesystem.
pub const LOCAL_COST: u32 = 100;
/// Cost reported for stores behind SSH or HTTP.
pub const REMOTE_COST: u32 = 200;

/// Dataset-tree version assumed when the store's own marker is unusable.
const FALLBACK_STORE_VERSION: &str = "1";

/// Where a remote's content can be reached from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Local,
    Global,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Access {
    ReadWrite,
    ReadOnly,
}

/// Observable lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteState {
    Unconfigured,
    ConfigLoaded,
    StoreVerified(Access),
    Ready(Access),
}

/// Which copy a retrieval was served from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrieveSource {
    Object,
    Archive,
}

/// Configuration with URLs resolved.
#[derive(Clone, Debug)]
struct Loaded {
    config: RemoteConfig,
    pull: ResolvedAddress,
    push: Option<ResolvedAddress>,
    dataset_id: String,
}

/// What preparation established about the store.
#[derive(Clone, Debug)]
pub struct StoreInfo {
    pub config: RemoteConfig,
    pub pull: ResolvedAddress,
    pub push: Option<ResolvedAddress>,
    /// The store the session currently works on: the pull store, or the
    /// push store once a write went through it.
    pub serving: ResolvedAddress,
    /// Dataset id used for locations and log names (the archive id).
    pub dataset_id: String,
    pub store: StorePaths,
    pub locations: DatasetLocations,
    pub store_version: Option<VersionMarker>,
    pub object_version: Option<VersionMarker>,
    pub style: HashStyle,
    /// Why writes are refused, if they are.
    pub read_only: Option<String>,
    pub logging: bool,
    pub options: TransportOptions,
}

impl StoreInfo {
    pub fn access(&self) -> Access {
        if self.read_only.is_some() {
            Access::ReadOnly
        } else {
            Access::ReadWrite
        }
    }
}

enum Phase {
    Unconfigured,
    ConfigLoaded(Box<Loaded>),
    StoreVerified(Access),
    Ready(Box<StoreInfo>),
}

/// Opens a transport for a resolved store address.
pub type Connector =
    Box<dyn Fn(&ResolvedAddress, &TransportOptions) -> TransportResult<Box<dyn Transport>>>;

/// A special remote bound to one host process.
pub struct RiaRemote<H: Host> {
    host: H,
    resolver: Box<dyn AddressResolver>,
    connector: Connector,
    ssh_options: Vec<String>,
    session_id: String,
    session: Session,
    phase: Phase,
}

impl<H: Host> RiaRemote<H> {
    pub fn new(host: H) -> Self {
        Self {
            host,
            resolver: Box::new(RiaUrlResolver),
            connector: Box::new(open_transport),
            ssh_options: Vec::new(),
            session_id: Uuid::new_v4().to_string(),
            session: Session::Unconnected,
            phase: Phase::Unconfigured,
        }
    }

    /// Use a different URL resolver, e.g. one that applies rewrite rules.
    #[must_use]
    pub fn with_resolver(mut self, resolver: impl AddressResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Open store sessions through `connector` instead of
    /// [`open_transport`].
    #[must_use]
    pub fn with_connector(
        mut self,
        connector: impl Fn(&ResolvedAddress, &TransportOptions) -> TransportResult<Box<dyn Transport>>
            + 'static,
    ) -> Self {
        self.connector = Box::new(connector);
        self
    }

    /// Pass an `-o` option to every SSH connection.
    #[must_use]
    pub fn with_ssh_option(mut self, option: impl Into<String>) -> Self {
        self.ssh_options.push(option.into());
        self
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> RemoteState {
        match &self.phase {
            Phase::Unconfigured => RemoteState::Unconfigured,
            Phase::ConfigLoaded(_) => RemoteState::ConfigLoaded,
            Phase::StoreVerified(access) => RemoteState::StoreVerified(*access),
            Phase::Ready(info) => RemoteState::Ready(info.access()),
        }
    }

    /// Store details, once prepared.
    pub fn store_info(&self) -> Option<&StoreInfo> {
        match &self.phase {
            Phase::Ready(info) => Some(info),
            _ => None,
        }
    }

    // ---------------------------------------------------------------
    // Handlers
    // ---------------------------------------------------------------

    /// First-time setup. Checks that store and dataset exist without
    /// creating anything, and records the archive id and URLs in committed
    /// config.
    pub fn init(&mut self) -> Result<(), BackendError> {
        self.guarded("init", Self::init_inner)
    }

    /// Load config and verify the store. Called implicitly by every handler.
    pub fn prepare(&mut self) -> Result<(), BackendError> {
        self.guarded("prepare", |r| r.ready().map(drop))
    }

    pub fn transfer_store(&mut self, key: &ContentKey, src: &Path) -> Result<(), BackendError> {
        self.guarded("transfer_store", |r| r.store_inner(key, src))
    }

    pub fn transfer_retrieve(
        &mut self,
        key: &ContentKey,
        dst: &Path,
    ) -> Result<RetrieveSource, BackendError> {
        self.guarded("transfer_retrieve", |r| r.retrieve_inner(key, dst))
    }

    pub fn checkpresent(&mut self, key: &ContentKey) -> Result<bool, BackendError> {
        self.guarded("checkpresent", |r| r.checkpresent_inner(key))
    }

    pub fn remove(&mut self, key: &ContentKey) -> Result<(), BackendError> {
        self.guarded("remove", |r| r.remove_inner(key))
    }

    /// Human-readable location of a key's object.
    pub fn whereis(&mut self, key: &ContentKey) -> Result<String, BackendError> {
        self.guarded("whereis", |r| {
            let info = r.ready()?;
            let (_, path) = r.object_path(&info, key);
            Ok(r.io()?.describe(&path))
        })
    }

    pub fn getcost(&mut self) -> Result<u32, BackendError> {
        self.guarded("getcost", |r| {
            Ok(match r.pull_address()?.kind {
                TransportKind::Local => LOCAL_COST,
                TransportKind::Ssh | TransportKind::Http => REMOTE_COST,
            })
        })
    }

    pub fn getavailability(&mut self) -> Result<Availability, BackendError> {
        self.guarded("getavailability", |r| {
            Ok(match r.pull_address()?.kind {
                TransportKind::Local => Availability::Local,
                TransportKind::Ssh | TransportKind::Http => Availability::Global,
            })
        })
    }

    /// Close any session and forget all loaded state.
    pub fn close(&mut self) {
        self.apply(SessionEvent::Close);
        self.phase = Phase::Unconfigured;
    }

    // ---------------------------------------------------------------
    // Middleware
    // ---------------------------------------------------------------

    /// Run a handler body. On failure: append to the store's error log when
    /// logging is enabled, close the session, and report a [`BackendError`].
    fn guarded<T>(
        &mut self,
        operation: &'static str,
        body: impl FnOnce(&mut Self) -> RemoteResult<T>,
    ) -> Result<T, BackendError> {
        body(self).map_err(|err| {
            warn!(operation, error = %err, "operation failed");
            self.record_error(operation, &err);
            self.close();
            BackendError::new(operation, err)
        })
    }

    fn record_error(&mut self, operation: &str, err: &RemoteError) {
        let Phase::Ready(info) = &self.phase else {
            return;
        };
        if !info.logging {
            return;
        }
        let log = info.store.error_log(&info.dataset_id, &self.session_id);
        let Some(io) = self.session.transport_mut() else {
            return;
        };
        let entry = format!("{} - {operation}: {err}\n", Utc::now().to_rfc3339());
        if let Err(e) = io.write_file(&log, &entry, WriteMode::Append) {
            debug!(log = %log.display(), error = %e, "could not write remote error log");
        }
    }

    // ---------------------------------------------------------------
    // State transitions
    // ---------------------------------------------------------------

    fn apply(&mut self, event: SessionEvent) {
        let Transition { session, displaced } = std::mem::take(&mut self.session).transition(event);
        self.session = session;
        if let Some(mut old) = displaced {
            if let Err(e) = old.close() {
                warn!(error = %e, "failed to close store session");
            }
        }
    }

    /// Unconfigured → ConfigLoaded.
    fn load(&mut self) -> RemoteResult<Loaded> {
        let config = RemoteConfig::load(&self.host)?;
        let url = config.url.as_ref().ok_or(RemoteError::MissingUrl)?;
        let pull = self.resolver.resolve(&url.value)?;
        let push = config
            .push_url
            .as_ref()
            .map(|u| self.resolver.resolve(&u.value))
            .transpose()?;
        let dataset_id = match &config.archive_id {
            Some(id) => id.value.clone(),
            None => self.host.dataset_id().ok_or(RemoteError::MissingDatasetId)?,
        };

        debug!(pull = %pull, push = ?push.as_ref().map(ResolvedAddress::to_url), %dataset_id, "configuration loaded");
        let loaded = Loaded {
            config,
            pull,
            push,
            dataset_id,
        };
        self.phase = Phase::ConfigLoaded(Box::new(loaded.clone()));
        Ok(loaded)
    }

    fn transport_options(&self, config: &RemoteConfig) -> TransportOptions {
        TransportOptions {
            buffer_size: config.buffer_size,
            read_timeout: config.read_timeout,
            ssh_options: self.ssh_options.clone(),
        }
    }

    fn connect(&mut self, loaded: &Loaded) -> RemoteResult<()> {
        if !self.session.is_connected() {
            let options = self.transport_options(&loaded.config);
            let transport = (self.connector)(&loaded.pull, &options)?;
            self.apply(SessionEvent::OpenRead(transport));
        }
        Ok(())
    }

    /// Drive the remote to `Ready` and return what it learned.
    fn ready(&mut self) -> RemoteResult<StoreInfo> {
        if let Phase::Ready(info) = &self.phase {
            if self.session.is_connected() {
                return Ok((**info).clone());
            }
        }

        let loaded = self.load()?;
        self.connect(&loaded)?;
        let pull = loaded.pull.clone();
        self.verify(loaded, pull)
    }

    /// ConfigLoaded → StoreVerified → Ready for the store at `serving`,
    /// checked through the current session.
    fn verify(&mut self, loaded: Loaded, serving: ResolvedAddress) -> RemoteResult<StoreInfo> {
        let force = loaded.config.force_write;
        let mut read_only = None;

        let base = serving.base_path.clone();
        let store_version = tolerate_drift(
            verify_version(self.io()?, &base, TreeKind::DatasetTree),
            force,
            &mut read_only,
        )?;
        self.phase = Phase::StoreVerified(if read_only.is_some() {
            Access::ReadOnly
        } else {
            Access::ReadWrite
        });

        let tree_version = store_version
            .as_ref()
            .map_or(FALLBACK_STORE_VERSION, |m| m.version.as_str());
        let locs = locations(tree_version, &base, &loaded.dataset_id)?;
        let object_version = tolerate_drift(
            verify_version(self.io()?, &locs.git_dir, TreeKind::ObjectTree),
            force,
            &mut read_only,
        )?;
        let style = match &object_version {
            Some(marker) => HashStyle::for_object_tree(&marker.version)?,
            None => HashStyle::FALLBACK,
        };

        let info = StoreInfo {
            options: self.transport_options(&loaded.config),
            logging: store_version.as_ref().is_some_and(VersionMarker::logging_enabled),
            store: StorePaths::new(&base),
            config: loaded.config,
            pull: loaded.pull,
            push: loaded.push,
            serving,
            dataset_id: loaded.dataset_id,
            locations: locs,
            store_version,
            object_version,
            style,
            read_only,
        };
        info!(
            store = %info.serving,
            dataset = %info.dataset_id,
            access = ?info.access(),
            "remote ready"
        );
        self.phase = Phase::Ready(Box::new(info.clone()));
        Ok(info)
    }

    fn pull_address(&mut self) -> RemoteResult<ResolvedAddress> {
        match &self.phase {
            Phase::ConfigLoaded(loaded) => Ok(loaded.pull.clone()),
            Phase::Ready(info) => Ok(info.pull.clone()),
            Phase::Unconfigured | Phase::StoreVerified(_) => Ok(self.load()?.pull),
        }
    }

    /// Make the session writable and return the layout writes go to.
    ///
    /// With a push URL the write session serves a store of its own, so that
    /// store is verified afresh and replaces the pull store's layout for all
    /// later operations.
    fn acquire_write(&mut self, info: StoreInfo) -> RemoteResult<StoreInfo> {
        let push = match &info.push {
            Some(push) if !self.session.is_write() => Some(push.clone()),
            _ => None,
        };
        let info = match push {
            Some(push) => {
                info!(push = %push, "opening write session");
                let transport = (self.connector)(&push, &info.options)?;
                self.apply(SessionEvent::OpenWrite(transport));
                let loaded = Loaded {
                    config: info.config,
                    pull: info.pull,
                    push: info.push,
                    dataset_id: info.dataset_id,
                };
                self.verify(loaded, push)?
            }
            None => info,
        };
        if let Some(reason) = &info.read_only {
            return Err(RemoteError::ReadOnly {
                reason: reason.clone(),
            });
        }
        if !self.session.is_write() {
            self.apply(SessionEvent::Promote);
        }
        Ok(info)
    }

    fn io(&mut self) -> RemoteResult<&mut dyn Transport> {
        self.session.transport_mut().ok_or_else(|| {
            RemoteError::Transport(TransportError::Connectivity(
                "no open session to the store".into(),
            ))
        })
    }

    /// Key path relative to the objects directory, and the absolute path.
    fn object_path(&self, info: &StoreInfo, key: &ContentKey) -> (PathBuf, PathBuf) {
        let relative = key_path(self.host.hasher(), info.style, key);
        let absolute = info.locations.objects_dir.join(&relative);
        (relative, absolute)
    }

    // ---------------------------------------------------------------
    // Handler bodies
    // ---------------------------------------------------------------

    fn init_inner(&mut self) -> RemoteResult<()> {
        let loaded = self.load()?;
        self.connect(&loaded)?;

        let io = self.io()?;
        let base = &loaded.pull.base_path;
        if !io.exists(base)? {
            return Err(RemoteError::StoreMissing(io.describe(base)));
        }
        let tree_version = read_version(io, base)?
            .map(|m| m.version)
            .filter(|v| TreeKind::DatasetTree.is_known(v))
            .unwrap_or_else(|| FALLBACK_STORE_VERSION.to_string());
        let locs = locations(&tree_version, base, &loaded.dataset_id)?;
        if !io.exists(&locs.git_dir)? {
            return Err(RemoteError::DatasetMissing(io.describe(&locs.git_dir)));
        }

        if loaded.config.archive_id.is_none() {
            self.host
                .set_committed_config(config::ARCHIVE_ID, &loaded.dataset_id)?;
        }
        let urls = [
            (config::URL, loaded.config.url.as_ref(), Some(&loaded.pull)),
            (config::PUSH_URL, loaded.config.push_url.as_ref(), loaded.push.as_ref()),
        ];
        for (key, value, address) in urls {
            if let (Some(value), Some(address)) = (value, address) {
                if value.origin == ConfigOrigin::Committed {
                    self.host.set_committed_config(key, &address.to_url())?;
                }
            }
        }

        info!(store = %loaded.pull, dataset = %loaded.dataset_id, "remote initialized");
        Ok(())
    }

    fn store_inner(&mut self, key: &ContentKey, src: &Path) -> RemoteResult<()> {
        let info = self.ready()?;
        let info = self.acquire_write(info)?;
        let (_, dst) = self.object_path(&info, key);
        let transfer_dir = info.locations.transfer_dir(&self.session_id);

        let Self { host, session, .. } = self;
        let io = session.transport_mut().ok_or_else(no_session)?;
        if io.exists(&dst)? {
            debug!(%key, "already present, not storing again");
            return Ok(());
        }

        io.mkdir(&transfer_dir)?;
        let staged = transfer_dir.join(key.sanitized());
        let stored = stage_and_commit(io, src, &staged, &dst, &mut |n: u64| host.progress(n));
        if stored.is_err() {
            if let Err(e) = io.remove(&staged) {
                debug!(path = %staged.display(), error = %e, "staged file not removed");
            }
        }
        for dir in transfer_dir.ancestors().take(2) {
            if io.remove_dir(dir).is_err() {
                break;
            }
        }
        if stored.is_ok() {
            info!(%key, "stored");
        }
        stored
    }

    fn retrieve_inner(&mut self, key: &ContentKey, dst: &Path) -> RemoteResult<RetrieveSource> {
        let info = self.ready()?;
        let (relative, path) = self.object_path(&info, key);
        let archive = info.locations.archive_path();

        let Self { host, session, .. } = self;
        let io = session.transport_mut().ok_or_else(no_session)?;
        let direct = match io.get(&path, dst, &mut |n: u64| host.progress(n)) {
            Ok(()) => return Ok(RetrieveSource::Object),
            Err(e) => e,
        };
        if io.kind() == TransportKind::Http {
            return Err(direct.into());
        }

        debug!(%key, error = %direct, "object not available, trying archive");
        match io.get_from_archive(&archive, &relative, dst, &mut |n: u64| host.progress(n)) {
            Ok(()) => {
                info!(%key, archive = %io.describe(&archive), "retrieved from archive");
                Ok(RetrieveSource::Archive)
            }
            Err(fallback) => Err(RemoteError::RetrieveFailed {
                key: key.to_string(),
                direct: direct.to_string(),
                archive: fallback.to_string(),
            }),
        }
    }

    fn checkpresent_inner(&mut self, key: &ContentKey) -> RemoteResult<bool> {
        let info = self.ready()?;
        let (relative, path) = self.object_path(&info, key);
        let io = self.io()?;
        if io.exists(&path)? {
            return Ok(true);
        }
        if io.kind() == TransportKind::Http {
            return Ok(false);
        }
        match io.in_archive(&info.locations.archive_path(), &relative) {
            Ok(found) => Ok(found),
            Err(TransportError::ArchiveMissing(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn remove_inner(&mut self, key: &ContentKey) -> RemoteResult<()> {
        let info = self.ready()?;
        let info = self.acquire_write(info)?;
        let (_, path) = self.object_path(&info, key);
        let io = self.io()?;
        if !io.exists(&path)? {
            debug!(%key, "not present, nothing to remove");
            return Ok(());
        }
        io.remove(&path)?;

        // Key directory, then the inner hash directory.
        for dir in path.ancestors().skip(1).take(2) {
            if let Err(e) = io.remove_dir(dir) {
                debug!(dir = %dir.display(), error = %e, "stopped pruning directories");
                break;
            }
        }
        info!(%key, "removed");
        Ok(())
    }
}

impl<H: Host> Drop for RiaRemote<H> {
    fn drop(&mut self) {
        self.close();
    }
}

fn no_session() -> RemoteError {
    RemoteError::Transport(TransportError::Connectivity(
        "no open session to the store".into(),
    ))
}

/// Upload into the staging area, then move into place.
fn stage_and_commit(
    io: &mut dyn Transport,
    src: &Path,
    staged: &Path,
    dst: &Path,
    progress: Progress<'_>,
) -> RemoteResult<()> {
    io.put(src, staged, progress)?;
    if let Some(parent) = dst.parent() {
        io.mkdir(parent)?;
    }
    io.rename(staged, dst)?;
    Ok(())
}

/// Turn version drift into a read-only reason (or a warning under
/// `force-write`); pass every other failure through.
fn tolerate_drift(
    verified: Result<VersionMarker, LayoutError>,
    force_write: bool,
    read_only: &mut Option<String>,
) -> RemoteResult<Option<VersionMarker>> {
    match verified {
        Ok(marker) => Ok(Some(marker)),
        Err(e) if e.is_version_drift() => {
            if force_write {
                warn!(error = %e, "layout version not recognized, writing anyway (force-write)");
            } else {
                warn!(error = %e, "layout version not recognized, remote is read-only");
                read_only.get_or_insert_with(|| e.to_string());
            }
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
