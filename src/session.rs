//! The immutable result of a completed handshake.

use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use zeroize::Zeroizing;

use crate::credential::CredentialScheme;
use crate::identity::VerifiedIdentity;
use crate::message::{CipherSuite, ConnectionId, SessionId};
use crate::sni::ServerName;
use crate::Error;

/// Which side of the handshake this endpoint was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Security context of an established session.
///
/// Built once per completed handshake and never mutated afterwards. A newer
/// handshake on the same connection produces a new context with a higher epoch.
pub struct SessionContext {
    role: Role,
    peer: SocketAddr,
    connection_id: Option<ConnectionId>,
    identity: VerifiedIdentity,
    scheme: CredentialScheme,
    virtual_host: Option<ServerName>,
    epoch: u16,
    session_id: SessionId,
    cipher_suite: CipherSuite,
    master_secret: Zeroizing<Vec<u8>>,
    established_at: Instant,
}

impl SessionContext {
    pub fn builder() -> SessionContextBuilder {
        SessionContextBuilder::default()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Peer address at the time the session was established.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Connection id assigned by the server, if any.
    pub fn connection_id(&self) -> Option<&ConnectionId> {
        self.connection_id.as_ref()
    }

    /// The verified identity of the peer, including [`VerifiedIdentity::Anonymous`].
    pub fn identity(&self) -> &VerifiedIdentity {
        &self.identity
    }

    /// The verified identity of the peer, `None` when it stayed anonymous.
    pub fn peer_identity(&self) -> Option<&VerifiedIdentity> {
        if self.identity.is_anonymous() {
            None
        } else {
            Some(&self.identity)
        }
    }

    /// Scheme the handshake authenticated with.
    pub fn scheme(&self) -> CredentialScheme {
        self.scheme
    }

    /// Virtual host the session is scoped to. Only set when SNI is enabled on
    /// this side and a host name was exchanged.
    pub fn virtual_host(&self) -> Option<&ServerName> {
        self.virtual_host.as_ref()
    }

    /// Epoch application data of this session is exchanged in.
    pub fn epoch(&self) -> u16 {
        self.epoch
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn cipher_suite(&self) -> CipherSuite {
        self.cipher_suite
    }

    pub fn master_secret(&self) -> &[u8] {
        &self.master_secret
    }

    pub fn established_at(&self) -> Instant {
        self.established_at
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("role", &self.role)
            .field("peer", &self.peer)
            .field("identity", &self.identity)
            .field("virtual_host", &self.virtual_host)
            .field("epoch", &self.epoch)
            .field("cipher_suite", &self.cipher_suite)
            .finish_non_exhaustive()
    }
}

/// Assembles a [`SessionContext`] from the parts a handshake collected.
#[derive(Default)]
pub struct SessionContextBuilder {
    role: Option<Role>,
    peer: Option<SocketAddr>,
    connection_id: Option<ConnectionId>,
    identity: Option<VerifiedIdentity>,
    scheme: Option<CredentialScheme>,
    virtual_host: Option<ServerName>,
    epoch: Option<u16>,
    session_id: Option<SessionId>,
    cipher_suite: Option<CipherSuite>,
    master_secret: Option<Zeroizing<Vec<u8>>>,
    established_at: Option<Instant>,
}

impl SessionContextBuilder {
    pub fn role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn connection_id(mut self, connection_id: Option<ConnectionId>) -> Self {
        self.connection_id = connection_id;
        self
    }

    pub fn identity(mut self, identity: VerifiedIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn scheme(mut self, scheme: CredentialScheme) -> Self {
        self.scheme = Some(scheme);
        self
    }

    pub fn virtual_host(mut self, virtual_host: Option<ServerName>) -> Self {
        self.virtual_host = virtual_host;
        self
    }

    pub fn epoch(mut self, epoch: u16) -> Self {
        self.epoch = Some(epoch);
        self
    }

    pub fn session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn cipher_suite(mut self, cipher_suite: CipherSuite) -> Self {
        self.cipher_suite = Some(cipher_suite);
        self
    }

    pub fn master_secret(mut self, master_secret: Zeroizing<Vec<u8>>) -> Self {
        self.master_secret = Some(master_secret);
        self
    }

    pub fn established_at(mut self, now: Instant) -> Self {
        self.established_at = Some(now);
        self
    }

    /// Build the context. Every part except connection id and virtual host is required.
    pub fn build(self) -> Result<SessionContext, Error> {
        fn missing(what: &str) -> Error {
            Error::ProtocolViolation(format!("session context without {}", what))
        }

        Ok(SessionContext {
            role: self.role.ok_or_else(|| missing("role"))?,
            peer: self.peer.ok_or_else(|| missing("peer"))?,
            connection_id: self.connection_id,
            identity: self.identity.ok_or_else(|| missing("identity"))?,
            scheme: self.scheme.ok_or_else(|| missing("scheme"))?,
            virtual_host: self.virtual_host,
            epoch: self.epoch.ok_or_else(|| missing("epoch"))?,
            session_id: self.session_id.ok_or_else(|| missing("session id"))?,
            cipher_suite: self.cipher_suite.ok_or_else(|| missing("cipher suite"))?,
            master_secret: self.master_secret.ok_or_else(|| missing("master secret"))?,
            established_at: self.established_at.ok_or_else(|| missing("time"))?,
        })
    }
}
