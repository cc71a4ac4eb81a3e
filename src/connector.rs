//! The application and transport facing side of the engine.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::connection::{Connection, Step};
use crate::cookie::CookieGenerator;
use crate::establish::{self, Establishment};
use crate::handshake::HandshakeState;
use crate::message::{Body, ConnectionId, HelloVerifyRequest, Message};
use crate::session::{Role, SessionContext};
use crate::sni::ServerName;
use crate::store::{ConnectionEntry, ConnectionStore};
use crate::timer::RetransmitScheduler;
use crate::{Config, Error};

/// Deadline reported by [`Connector::poll_output`] when no flight is pending.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// Work for the transport or the application.
#[derive(Debug)]
pub enum Output {
    /// A message to send to `peer`.
    Message {
        peer: SocketAddr,
        /// Connection id the peer assigned us, to put on the record.
        connection_id: Option<ConnectionId>,
        message: Message,
    },
    /// A handshake completed. Emitted once per established epoch, for both roles.
    Established(Arc<SessionContext>),
    /// A handshake with `peer` failed.
    Failed { peer: SocketAddr, error: Error },
    /// The association with `peer` is gone.
    Closed { peer: SocketAddr },
    /// Application data received in the current session.
    ApplicationData { peer: SocketAddr, data: Vec<u8> },
    /// Nothing more to do. Call [`Connector::handle_timeout`] at this instant.
    Timeout(Instant),
}

/// Options of an outbound handshake.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    server_name: Option<ServerName>,
    rehandshake: bool,
}

impl ConnectOptions {
    pub fn new() -> Self {
        ConnectOptions::default()
    }

    /// Host name to send in the ClientHello.
    pub fn server_name(mut self, name: ServerName) -> Self {
        self.server_name = Some(name);
        self
    }

    /// Run a new handshake even if a session is established.
    ///
    /// Otherwise connecting to a peer with a session resolves with that session.
    pub fn rehandshake(mut self, rehandshake: bool) -> Self {
        self.rehandshake = rehandshake;
        self
    }
}

/// Handshake engine for any number of peers.
///
/// Sans-IO: the transport feeds inbound messages with
/// [`handle_message`](Connector::handle_message), drives retransmissions with
/// [`handle_timeout`](Connector::handle_timeout) and drains work with
/// [`poll_output`](Connector::poll_output). All methods take `&self` and may
/// be called from many threads at once. Each connection is processed by one
/// thread at a time.
pub struct Connector {
    config: Arc<Config>,
    store: ConnectionStore,
    scheduler: RetransmitScheduler,
    cookies: CookieGenerator,
    outputs: Mutex<VecDeque<Output>>,
}

impl Connector {
    pub fn new(config: Arc<Config>) -> Result<Self, Error> {
        let cookies = CookieGenerator::new(config.crypto_provider())?;
        Ok(Connector {
            store: ConnectionStore::new(config.max_connections()),
            scheduler: RetransmitScheduler::new(),
            cookies,
            outputs: Mutex::new(VecDeque::new()),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start a handshake with `peer`.
    ///
    /// Joins a handshake already in progress with the peer. Fails right away
    /// only for configuration errors and [`Error::CapacityExceeded`]; every
    /// handshake failure is delivered through the returned [`Establishment`].
    pub fn connect(
        &self,
        peer: SocketAddr,
        options: ConnectOptions,
        now: Instant,
    ) -> Result<Establishment, Error> {
        if !self.config.initiates_handshakes() {
            return Err(Error::ConfigError(
                "Connector is configured not to initiate handshakes".to_string(),
            ));
        }

        let created = self.store.get_or_create(peer, || Connection::new(peer))?;
        if created.created {
            debug!("New connection to {}", peer);
        }
        if let Some(evicted) = &created.evicted {
            self.close_entry(evicted, false, now);
        }

        let (completion, establishment) = establish::pair();
        let entry = created.entry;

        let mut connection = entry.lock();
        if entry.is_closed() {
            drop(completion);
            return Ok(establishment);
        }

        let mut step = self.step(now);
        let result = connection.connect(
            &mut step,
            options.server_name,
            options.rehandshake,
            completion,
        );
        self.finish(&entry, &connection, step);

        result.map(|_| establishment)
    }

    /// Feed a message the transport received from `peer`.
    ///
    /// `connection_id` is the id the record was addressed with, if any.
    /// Returns [`Error::CapacityExceeded`] when a new peer can not be admitted.
    /// Everything else is handled through [`poll_output`](Connector::poll_output).
    pub fn handle_message(
        &self,
        peer: SocketAddr,
        connection_id: Option<&ConnectionId>,
        message: Message,
        now: Instant,
    ) -> Result<(), Error> {
        if let Body::ClientHello(hello) = &message.body {
            if !self.config.accepts_handshakes() {
                trace!("Drop ClientHello from {}, not accepting handshakes", peer);
                return Ok(());
            }

            // Every ClientHello of an admitted attempt carries a valid cookie,
            // so this never hits an existing handshake.
            if self.config.use_hello_verify_request()
                && !self.cookies.verify(peer, &hello.random, &hello.cookie)
            {
                return self.send_hello_verify_request(peer, &message);
            }
        }

        let routed = connection_id.and_then(|id| self.store.lookup_cid(id));
        let is_hello = matches!(message.body, Body::ClientHello(_));

        let entry = match (routed, is_hello) {
            (Some((registered, entry)), _) => {
                if registered != peer {
                    return self.handle_moved(registered, peer, entry, message, now);
                }
                entry
            }
            (None, true) => {
                let created = self.store.get_or_create(peer, || Connection::new(peer))?;
                if created.created {
                    debug!("New connection from {}", peer);
                }
                if let Some(evicted) = &created.evicted {
                    self.close_entry(evicted, false, now);
                }
                created.entry
            }
            (None, false) => match self.store.lookup(peer) {
                Some(entry) => entry,
                None => {
                    trace!(
                        "Drop {:?} from unknown peer {}",
                        message.body.message_type(),
                        peer
                    );
                    return Ok(());
                }
            },
        };

        let mut connection = entry.lock();
        if entry.is_closed() {
            trace!("Drop message for closed connection {}", peer);
            return Ok(());
        }

        let mut step = self.step(now);
        connection.handle_message(&mut step, message);
        self.finish(&entry, &connection, step);

        Ok(())
    }

    /// Drive retransmissions due at `now`.
    pub fn handle_timeout(&self, now: Instant) {
        for (token, peer) in self.scheduler.expired(now) {
            let Some(entry) = self.store.peek(peer) else {
                continue;
            };

            let mut connection = entry.lock();
            if entry.is_closed() {
                continue;
            }

            let mut step = self.step(now);
            connection.handle_timeout(&mut step, token);
            self.finish(&entry, &connection, step);
        }
    }

    /// Next piece of work. Always ends in [`Output::Timeout`].
    pub fn poll_output(&self, now: Instant) -> Output {
        if let Some(output) = self.outputs.lock().pop_front() {
            return output;
        }

        self.scheduler.prune(|token, peer| {
            let Some(entry) = self.store.peek(peer) else {
                return false;
            };
            // A busy connection may be about to use its timer.
            let live = match entry.try_lock() {
                Some(connection) => connection.timer_token() == Some(token),
                None => true,
            };
            live
        });

        Output::Timeout(self.scheduler.next_deadline().unwrap_or(now + IDLE_WAIT))
    }

    /// Send application data in an established session.
    ///
    /// Fails with [`Error::NotEstablished`] if the session is gone or was
    /// replaced by a newer epoch.
    pub fn send(
        &self,
        context: &SessionContext,
        payload: Vec<u8>,
        now: Instant,
    ) -> Result<(), Error> {
        // Only ids we assigned as server are registered here.
        let routed = match (context.role(), context.connection_id()) {
            (Role::Server, Some(id)) => self.store.lookup_cid(id).map(|(_, entry)| entry),
            _ => None,
        };
        let entry = routed
            .or_else(|| self.store.lookup(context.peer()))
            .ok_or(Error::NotEstablished)?;

        let mut connection = entry.lock();
        if entry.is_closed() {
            return Err(Error::NotEstablished);
        }

        let mut step = self.step(now);
        let result = connection.send(&mut step, context, payload);
        self.finish(&entry, &connection, step);
        result
    }

    /// Close the association with `peer`. Returns whether there was one.
    pub fn close(&self, peer: SocketAddr, now: Instant) -> bool {
        match self.store.lookup(peer) {
            Some(entry) => {
                self.close_entry(&entry, true, now);
                true
            }
            None => false,
        }
    }

    /// Close every association.
    pub fn close_all(&self, now: Instant) {
        for entry in self.store.drain() {
            let mut connection = entry.lock();
            let mut step = self.step(now);
            connection.close(&mut step, true);
            entry.mark_closed();
            self.outputs.lock().extend(step.out);
        }
    }

    /// The established session with `peer`, if any.
    pub fn session(&self, peer: SocketAddr) -> Option<Arc<SessionContext>> {
        let entry = self.store.peek(peer)?;
        let connection = entry.lock();
        connection.session().cloned()
    }

    /// Progress of the latest handshake with `peer`.
    pub fn handshake_state(&self, peer: SocketAddr) -> Option<HandshakeState> {
        let entry = self.store.peek(peer)?;
        let connection = entry.lock();
        connection.state()
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.store.len()
    }

    fn step(&self, now: Instant) -> Step<'_> {
        Step {
            config: &self.config,
            store: &self.store,
            scheduler: &self.scheduler,
            now,
            out: Vec::new(),
        }
    }

    /// Publish the outputs of a step and drop the entry if nothing is left of it.
    ///
    /// Runs under the connection lock so outputs of one connection stay in order.
    fn finish(&self, entry: &Arc<ConnectionEntry>, connection: &Connection, step: Step<'_>) {
        if connection.is_defunct() {
            entry.mark_closed();
            self.store.remove(connection.peer(), entry);
        }
        self.outputs.lock().extend(step.out);
    }

    fn close_entry(&self, entry: &Arc<ConnectionEntry>, notify: bool, now: Instant) {
        let mut connection = entry.lock();
        let mut step = self.step(now);
        connection.close(&mut step, notify);
        entry.mark_closed();
        self.store.remove(connection.peer(), entry);
        self.outputs.lock().extend(step.out);
    }

    fn send_hello_verify_request(&self, peer: SocketAddr, hello: &Message) -> Result<(), Error> {
        let Body::ClientHello(ch) = &hello.body else {
            return Ok(());
        };

        let cookie = self.cookies.generate(peer, &ch.random)?;
        debug!("Send HelloVerifyRequest to {}", peer);

        // Stateless: echo the epoch and sequence number of the ClientHello.
        let message = Message::new(
            hello.epoch,
            hello.message_seq,
            Body::HelloVerifyRequest(HelloVerifyRequest { cookie }),
        );
        self.outputs.lock().push_back(Output::Message {
            peer,
            connection_id: None,
            message,
        });
        Ok(())
    }

    /// A record with a known connection id arrived from a new address.
    fn handle_moved(
        &self,
        registered: SocketAddr,
        peer: SocketAddr,
        entry: Arc<ConnectionEntry>,
        message: Message,
        now: Instant,
    ) -> Result<(), Error> {
        let displaced = {
            let mut connection = entry.lock();
            if entry.is_closed() {
                return Ok(());
            }
            if connection.session().is_none() {
                warn!(
                    "Drop message for {} from {}, address changed mid-handshake",
                    registered, peer
                );
                return Ok(());
            }

            let displaced = self.store.update_address(registered, peer, &entry);

            let mut step = self.step(now);
            connection.set_peer(&mut step, peer);
            connection.handle_message(&mut step, message);
            self.finish(&entry, &connection, step);
            displaced
        };

        if let Some(displaced) = displaced {
            self.close_entry(&displaced, false, now);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
