//! Transport sessions of one remote.
//!
//! A remote talks to its store through at most one live transport. It
//! starts on the pull URL for reads; the first write switches to the push
//! URL (or promotes the read session when there is none), and the write
//! session then serves reads too.

use std::fmt;

use ria_transport::Transport;

/// The live transport, tagged by what it may be used for.
#[derive(Default)]
pub enum Session {
    #[default]
    Unconnected,
    ReadOnly(Box<dyn Transport>),
    ReadWrite(Box<dyn Transport>),
}

/// Something that changes the session.
pub enum SessionEvent {
    /// A freshly opened read transport.
    OpenRead(Box<dyn Transport>),
    /// A freshly opened write transport.
    OpenWrite(Box<dyn Transport>),
    /// Allow writes through the current read transport.
    Promote,
    Close,
}

/// Outcome of [`Session::transition`]: the new session, and a transport
/// that is no longer referenced and must be closed by the caller.
pub struct Transition {
    pub session: Session,
    pub displaced: Option<Box<dyn Transport>>,
}

impl Session {
    /// Apply `event`. Pure: no transport is opened or closed here.
    pub fn transition(self, event: SessionEvent) -> Transition {
        use SessionEvent as E;

        let (session, displaced) = match (self, event) {
            (Self::ReadWrite(current), E::OpenRead(fresh)) => (Self::ReadWrite(current), Some(fresh)),
            (old, E::OpenRead(fresh)) => (Self::ReadOnly(fresh), old.into_transport()),
            (old, E::OpenWrite(fresh)) => (Self::ReadWrite(fresh), old.into_transport()),
            (Self::ReadOnly(current), E::Promote) => (Self::ReadWrite(current), None),
            (other, E::Promote) => (other, None),
            (old, E::Close) => (Self::Unconnected, old.into_transport()),
        };
        Transition { session, displaced }
    }

    pub fn is_connected(&self) -> bool {
        !matches!(self, Self::Unconnected)
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Self::ReadWrite(_))
    }

    /// The transport serving the next operation.
    pub fn transport_mut(&mut self) -> Option<&mut dyn Transport> {
        match self {
            Self::Unconnected => None,
            Self::ReadOnly(t) | Self::ReadWrite(t) => Some(&mut **t),
        }
    }

    fn into_transport(self) -> Option<Box<dyn Transport>> {
        match self {
            Self::Unconnected => None,
            Self::ReadOnly(t) | Self::ReadWrite(t) => Some(t),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconnected => write!(f, "Unconnected"),
            Self::ReadOnly(t) => write!(f, "ReadOnly({})", t.kind()),
            Self::ReadWrite(t) => write!(f, "ReadWrite({})", t.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ria_transport::{HttpTransport, LocalTransport};
    use ria_types::TransportKind;
    use std::time::Duration;

    fn local() -> Box<dyn Transport> {
        Box::new(LocalTransport::new())
    }

    fn http() -> Box<dyn Transport> {
        Box::new(HttpTransport::new("http://127.0.0.1:9", 4096, Duration::from_secs(1)))
    }

    fn kind(session: &mut Session) -> Option<TransportKind> {
        session.transport_mut().map(|t| t.kind())
    }

    #[test]
    fn read_then_write_replaces_read_session() {
        let t = Session::Unconnected.transition(SessionEvent::OpenRead(http()));
        assert!(t.displaced.is_none());
        let mut session = t.session;
        assert!(session.is_connected() && !session.is_write());
        assert_eq!(kind(&mut session), Some(TransportKind::Http));

        let t = session.transition(SessionEvent::OpenWrite(local()));
        assert_eq!(t.displaced.map(|d| d.kind()), Some(TransportKind::Http));
        let mut session = t.session;
        assert!(session.is_write());
        assert_eq!(kind(&mut session), Some(TransportKind::Local));
    }

    #[test]
    fn write_session_serves_reads() {
        let session = Session::Unconnected
            .transition(SessionEvent::OpenWrite(local()))
            .session;
        let t = session.transition(SessionEvent::OpenRead(http()));
        assert_eq!(t.displaced.map(|d| d.kind()), Some(TransportKind::Http));
        let mut session = t.session;
        assert!(session.is_write());
        assert_eq!(kind(&mut session), Some(TransportKind::Local));
    }

    #[test]
    fn promote_and_close() {
        let session = Session::Unconnected
            .transition(SessionEvent::OpenRead(local()))
            .session
            .transition(SessionEvent::Promote)
            .session;
        assert!(session.is_write());

        let t = session.transition(SessionEvent::Close);
        assert!(t.displaced.is_some());
        assert!(!t.session.is_connected());

        let t = Session::Unconnected.transition(SessionEvent::Promote);
        assert!(!t.session.is_connected());
        assert!(Session::Unconnected
            .transition(SessionEvent::Close)
            .displaced
            .is_none());
    }
}
