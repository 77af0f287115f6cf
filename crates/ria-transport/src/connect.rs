use std::time::Duration;

use ria_types::{ResolvedAddress, TransportKind};
use tracing::debug;

use crate::error::{TransportError, TransportResult};
use crate::http::HttpTransport;
use crate::local::LocalTransport;
use crate::ssh::{ShellLauncher, SshTransport};
use crate::traits::Transport;

/// Tunables shared by all transports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportOptions {
    /// Read chunk size for streamed downloads (default: 64 KiB).
    pub buffer_size: usize,
    /// How long a read may see no data before it is abandoned
    /// (default: 10 minutes).
    pub read_timeout: Duration,
    /// Extra `ssh -o` options.
    pub ssh_options: Vec<String>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024,
            read_timeout: Duration::from_secs(600),
            ssh_options: Vec::new(),
        }
    }
}

/// Open a session for a resolved store address.
pub fn open_transport(
    address: &ResolvedAddress,
    options: &TransportOptions,
) -> TransportResult<Box<dyn Transport>> {
    debug!(address = %address, "opening transport");
    match address.kind {
        TransportKind::Local => Ok(Box::new(LocalTransport::new())),
        TransportKind::Ssh => {
            let host = address
                .host
                .as_deref()
                .ok_or_else(|| TransportError::Connectivity("SSH address without host".into()))?;
            let launcher = options
                .ssh_options
                .iter()
                .fold(ShellLauncher::ssh(host, address.port), |l, opt| {
                    l.with_option(opt.clone())
                });
            let transport =
                SshTransport::connect(launcher, options.buffer_size, options.read_timeout)?;
            Ok(Box::new(transport))
        }
        TransportKind::Http => {
            let origin = address
                .host
                .as_deref()
                .ok_or_else(|| TransportError::Connectivity("HTTP address without origin".into()))?;
            Ok(Box::new(HttpTransport::new(origin, options.buffer_size, options.read_timeout)))
        }
    }
}
