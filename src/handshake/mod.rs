//! Handshake state machines of both roles.
//!
//! A [`Handshake`] is one attempt. It is fed structured messages, queues the
//! messages of its flights in its [`Engine`] and ends up either established
//! or failed. It never touches the network or the clock by itself.

mod client;
pub(crate) mod engine;
mod server;

use std::sync::Arc;
use std::time::Instant;

use zeroize::Zeroizing;

pub(crate) use client::Client;
pub(crate) use engine::Engine;
pub(crate) use server::Server;

use crate::credential::{CredentialRecord, CredentialScheme};
use crate::identity::VerifiedIdentity;
use crate::message::{CertificateBody, CipherSuite, ConnectionId, Message, Random, SessionId};
use crate::sni::ServerName;
use crate::{Config, Error};

/// Coarse progress of a handshake attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Client about to send its ClientHello.
    Start,
    /// Server sending its answer to a ClientHello.
    WaitClientHello,
    /// Client waiting for the server's hello.
    WaitServerHello,
    /// Waiting for the peer's credential and its proof.
    WaitCredentialProof,
    WaitFinished,
    Established,
    /// Terminal. Reached from any other state.
    Failed,
}

/// A peer credential received in a Certificate message, with the record it
/// was resolved to.
#[derive(Debug)]
pub(crate) struct PeerCertificate {
    pub body: CertificateBody,
    pub record: CredentialRecord,
}

/// What a completed attempt hands to the session context.
#[derive(Debug)]
pub(crate) struct Established {
    pub identity: VerifiedIdentity,
    pub scheme: CredentialScheme,
    pub virtual_host: Option<ServerName>,
    pub epoch: u16,
    pub session_id: SessionId,
    pub cipher_suite: CipherSuite,
    pub connection_id: Option<ConnectionId>,
    pub master_secret: Zeroizing<Vec<u8>>,
}

/// One handshake attempt of either role.
pub(crate) enum Handshake {
    Client(Box<Client>),
    Server(Box<Server>),
}

impl Handshake {
    pub fn client(
        config: Arc<Config>,
        epoch: u16,
        server_name: Option<ServerName>,
    ) -> Result<Handshake, Error> {
        let mut client = Client::new(config, epoch, server_name)?;
        client.make_progress()?;
        Ok(Handshake::Client(Box::new(client)))
    }

    pub fn server(
        config: Arc<Config>,
        epoch: u16,
        hello: Message,
        connection_id: Option<ConnectionId>,
    ) -> Result<Handshake, Error> {
        let server = Server::new(config, epoch, hello, connection_id)?;
        Ok(Handshake::Server(Box::new(server)))
    }

    pub fn engine(&self) -> &Engine {
        match self {
            Handshake::Client(c) => c.engine(),
            Handshake::Server(s) => s.engine(),
        }
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        match self {
            Handshake::Client(c) => c.engine_mut(),
            Handshake::Server(s) => s.engine_mut(),
        }
    }

    pub fn state(&self) -> HandshakeState {
        match self {
            Handshake::Client(c) => c.state(),
            Handshake::Server(s) => s.state(),
        }
    }

    pub fn is_established(&self) -> bool {
        self.state() == HandshakeState::Established
    }

    pub fn is_client(&self) -> bool {
        matches!(self, Handshake::Client(_))
    }

    /// Whether an inbound message in `epoch` belongs to this attempt.
    pub fn accepts_epoch(&self, epoch: u16) -> bool {
        match self {
            Handshake::Client(c) => c.accepts_epoch(epoch),
            Handshake::Server(s) => s.accepts_epoch(epoch),
        }
    }

    /// Random of the ClientHello that started a server attempt.
    pub fn client_random(&self) -> Option<&Random> {
        match self {
            Handshake::Client(_) => None,
            Handshake::Server(s) => Some(s.client_random()),
        }
    }

    /// Epoch of the ClientHello that started a server attempt.
    pub fn hello_epoch(&self) -> Option<u16> {
        match self {
            Handshake::Client(_) => None,
            Handshake::Server(s) => Some(s.hello_epoch()),
        }
    }

    pub fn handle_message(&mut self, message: Message) -> Result<(), Error> {
        match self {
            Handshake::Client(c) => c.handle_message(message),
            Handshake::Server(s) => s.handle_message(message),
        }
    }

    /// Run the server side over the ClientHello it was created from.
    pub fn make_progress(&mut self) -> Result<(), Error> {
        match self {
            Handshake::Client(c) => c.make_progress(),
            Handshake::Server(s) => s.make_progress(),
        }
    }

    pub fn established(&self) -> Option<Established> {
        match self {
            Handshake::Client(c) => c.established(),
            Handshake::Server(s) => s.established(),
        }
    }

    pub fn arm_timer(&mut self, now: Instant) -> Option<Instant> {
        self.engine_mut().arm_timer(now)
    }

    pub fn handle_timeout(&mut self, now: Instant) -> Result<Option<Instant>, Error> {
        self.engine_mut().handle_timeout(now)
    }
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let role = if self.is_client() { "Client" } else { "Server" };
        f.debug_struct("Handshake")
            .field("role", &role)
            .field("state", &self.state())
            .field("engine", self.engine())
            .finish()
    }
}
