//! One peer association.
//!
//! A [`Connection`] holds the live handshake attempt, the last established
//! session and the retransmission timer of one peer. It is only ever touched
//! by the thread holding its entry lock in the
//! [`ConnectionStore`](crate::store::ConnectionStore), and only for the
//! duration of one [`Step`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::establish::Completion;
use crate::handshake::{Established, Handshake, HandshakeState};
use crate::message::{Alert, AlertDescription, Body, ConnectionId, Message, Random};
use crate::session::{Role, SessionContext};
use crate::sni::ServerName;
use crate::store::ConnectionStore;
use crate::timer::{RetransmitScheduler, TimerToken};
use crate::{Config, Error, Output, RehandshakePolicy};

/// Shared collaborators of one processing step.
pub(crate) struct Step<'a> {
    pub config: &'a Arc<Config>,
    pub store: &'a ConnectionStore,
    pub scheduler: &'a RetransmitScheduler,
    pub now: Instant,
    /// Outputs of the step, in order.
    pub out: Vec<Output>,
}

pub(crate) struct Connection {
    peer: SocketAddr,

    /// Id we assigned as server. Inbound records carrying it route here.
    connection_id: Option<ConnectionId>,

    /// Id the server assigned us. Put on our outbound records.
    peer_connection_id: Option<ConnectionId>,

    /// Epoch of the next handshake attempt. Bumped by every established one.
    epoch: u16,

    /// The live attempt. A completed one is kept until replaced, so
    /// retransmissions of its last flight can still be answered.
    handshake: Option<Handshake>,

    /// Whether the current attempt already became a session.
    reported: bool,

    /// The latest attempt ended in failure. Cleared by the next one.
    failed: bool,

    session: Option<Arc<SessionContext>>,

    /// Random of the ClientHello of the last established server attempt.
    established_random: Option<Random>,

    /// Pending `connect` callers.
    waiters: Vec<Completion>,

    /// Token and deadline of the scheduled retransmission.
    timer: Option<(TimerToken, Instant)>,
}

impl Connection {
    pub fn new(peer: SocketAddr) -> Self {
        Connection {
            peer,
            connection_id: None,
            peer_connection_id: None,
            epoch: 0,
            handshake: None,
            reported: false,
            failed: false,
            session: None,
            established_random: None,
            waiters: Vec::new(),
            timer: None,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn session(&self) -> Option<&Arc<SessionContext>> {
        self.session.as_ref()
    }

    pub fn state(&self) -> Option<HandshakeState> {
        match &self.handshake {
            Some(h) => Some(h.state()),
            None if self.failed => Some(HandshakeState::Failed),
            None => None,
        }
    }

    /// No handshake is in progress.
    pub fn is_idle(&self) -> bool {
        self.handshake
            .as_ref()
            .map(|h| h.is_established())
            .unwrap_or(true)
    }

    /// Neither a handshake nor a session is left. The entry can go.
    pub fn is_defunct(&self) -> bool {
        self.handshake.is_none() && self.session.is_none()
    }

    pub fn timer_token(&self) -> Option<TimerToken> {
        self.timer.map(|(token, _)| token)
    }

    /// Start or join an outbound handshake.
    ///
    /// Errors are configuration errors of the new attempt, returned to the
    /// caller directly.
    pub fn connect(
        &mut self,
        step: &mut Step<'_>,
        server_name: Option<ServerName>,
        rehandshake: bool,
        completion: Completion,
    ) -> Result<(), Error> {
        if !self.is_idle() {
            debug!("Joining handshake in progress with {}", self.peer);
            self.waiters.push(completion);
            return Ok(());
        }

        if let (Some(session), false) = (&self.session, rehandshake) {
            completion.complete(Ok(session.clone()));
            return Ok(());
        }

        let handshake = Handshake::client(step.config.clone(), self.epoch, server_name)?;
        debug!("Connecting to {} in epoch {}", self.peer, self.epoch);

        self.handshake = Some(handshake);
        self.reported = false;
        self.failed = false;
        self.waiters.push(completion);
        self.after_progress(step, Ok(()));
        Ok(())
    }

    /// Process one inbound message.
    pub fn handle_message(&mut self, step: &mut Step<'_>, message: Message) {
        match &message.body {
            Body::Alert(alert) => {
                let alert = *alert;
                self.handle_alert(step, message.epoch, alert);
            }
            Body::ApplicationData(_) => self.handle_application_data(step, message),
            Body::ClientHello(_) => self.handle_client_hello(step, message),
            _ => self.handle_handshake(step, message),
        }
    }

    /// A retransmission deadline fired.
    pub fn handle_timeout(&mut self, step: &mut Step<'_>, token: TimerToken) {
        if self.timer_token() != Some(token) {
            trace!("Stale timer for {}", self.peer);
            return;
        }
        // The scheduler already dropped this entry.
        self.timer = None;

        let Some(handshake) = &mut self.handshake else {
            return;
        };

        match handshake.handle_timeout(step.now) {
            Ok(_) => self.after_progress(step, Ok(())),
            Err(e) => self.fail(step, e),
        }
    }

    /// Send application data in the session `context` belongs to.
    pub fn send(
        &mut self,
        step: &mut Step<'_>,
        context: &SessionContext,
        payload: Vec<u8>,
    ) -> Result<(), Error> {
        let Some(session) = &self.session else {
            return Err(Error::NotEstablished);
        };
        if session.epoch() != context.epoch() {
            return Err(Error::NotEstablished);
        }

        let message = Message::new(session.epoch(), 0, Body::ApplicationData(payload));
        self.emit(step, message);
        Ok(())
    }

    /// Close the association, telling the peer if a session was established.
    ///
    /// Pending `connect` callers fail with [`Error::ConnectionClosed`].
    pub fn close(&mut self, step: &mut Step<'_>, notify: bool) {
        if notify {
            if let Some(session) = &self.session {
                let message = Message::new(session.epoch(), 0, Body::Alert(Alert::close_notify()));
                self.emit(step, message);
            }
        }
        self.terminate(step, Error::ConnectionClosed);
    }

    /// The peer now talks to us from `peer`.
    pub fn set_peer(&mut self, step: &mut Step<'_>, peer: SocketAddr) {
        self.peer = peer;
        // Reschedule under the new address.
        self.timer = None;
        self.rearm(step);
    }

    fn handle_alert(&mut self, step: &mut Step<'_>, epoch: u16, alert: Alert) {
        if alert.description == AlertDescription::CloseNotify {
            debug!("Peer {} closed the connection", self.peer);
            self.terminate(step, Error::ConnectionClosed);
            return;
        }

        if alert.is_fatal() {
            warn!("Fatal alert {:?} from {}", alert.description, self.peer);
            if !self.is_idle() {
                self.fail(step, Error::PeerAlert(alert.description));
            } else {
                self.terminate(step, Error::PeerAlert(alert.description));
            }
            return;
        }

        let in_progress = self
            .handshake
            .as_ref()
            .filter(|h| !h.is_established() && h.accepts_epoch(epoch));
        if let (Some(h), AlertDescription::NoRenegotiation) = (in_progress, alert.description) {
            if h.is_client() {
                debug!("Peer {} refused to renegotiate", self.peer);
                self.fail(step, Error::PeerAlert(alert.description));
                return;
            }
        }

        debug!("Ignoring warning alert {:?} from {}", alert.description, self.peer);
    }

    fn handle_application_data(&mut self, step: &mut Step<'_>, message: Message) {
        let Body::ApplicationData(data) = message.body else {
            return;
        };
        match &self.session {
            Some(session) if session.epoch() == message.epoch => {
                step.out.push(Output::ApplicationData {
                    peer: self.peer,
                    data,
                });
            }
            _ => trace!(
                "Drop application data in epoch {} from {}",
                message.epoch,
                self.peer
            ),
        }
    }

    fn handle_handshake(&mut self, step: &mut Step<'_>, message: Message) {
        let Some(handshake) = &mut self.handshake else {
            trace!("Drop {:?} without handshake", message.body.message_type());
            return;
        };

        if !handshake.accepts_epoch(message.epoch) {
            trace!(
                "Drop {:?} of epoch {}, handshake is in {}",
                message.body.message_type(),
                message.epoch,
                handshake.engine().epoch()
            );
            return;
        }

        let result = handshake.handle_message(message);
        self.after_progress(step, result);
    }

    fn handle_client_hello(&mut self, step: &mut Step<'_>, message: Message) {
        let Body::ClientHello(hello) = &message.body else {
            return;
        };

        if let Some(handshake) = &self.handshake {
            if handshake.client_random() == Some(&hello.random) {
                // Retransmission of the attempt we are in.
                return self.handle_handshake(step, message);
            }
        }

        if self.established_random == Some(hello.random) {
            trace!("Drop stale ClientHello from {}", self.peer);
            return;
        }

        if let Some(handshake) = self.handshake.as_ref().filter(|h| !h.is_established()) {
            match handshake.hello_epoch() {
                Some(in_flight) if message.epoch >= in_flight => {
                    debug!(
                        "Replacing handshake with {} by a new one in epoch {}",
                        self.peer, message.epoch
                    );
                }
                _ => {
                    warn!(
                        "Rejecting ClientHello of epoch {} from {} during handshake",
                        message.epoch, self.peer
                    );
                    return;
                }
            }
        } else if self.session.is_some() {
            match step.config.rehandshake_policy() {
                RehandshakePolicy::Reject => {
                    debug!("Refusing renegotiation with {}", self.peer);
                    let alert = Alert::warning(AlertDescription::NoRenegotiation);
                    self.emit(step, Message::new(message.epoch, 0, Body::Alert(alert)));
                    return;
                }
                RehandshakePolicy::ReplaceAfterVerify => {
                    debug!("Renegotiating with {}", self.peer);
                }
            }
        }

        if self.connection_id.is_none() {
            self.assign_connection_id(step);
        }

        let result = Handshake::server(
            step.config.clone(),
            self.epoch,
            message,
            self.connection_id.clone(),
        );

        match result {
            Ok(handshake) => {
                self.handshake = Some(handshake);
                self.reported = false;
                self.failed = false;
                let result = match &mut self.handshake {
                    Some(h) => h.make_progress(),
                    None => Ok(()),
                };
                self.after_progress(step, result);
            }
            Err(e) => {
                self.handshake = None;
                self.fail(step, e);
            }
        }
    }

    fn assign_connection_id(&mut self, step: &mut Step<'_>) {
        let length = step.config.connection_id_length();
        if length == 0 {
            return;
        }

        let mut id = vec![0; length];
        if let Err(e) = step.config.crypto_provider().secure_random.fill(&mut id) {
            warn!("No connection id for {}: {}", self.peer, e);
            return;
        }
        let id = ConnectionId(id);
        if step.store.has_cid(&id) {
            warn!("Connection id collision for {}", self.peer);
            return;
        }

        step.store.register_cid(id.clone(), self.peer);
        self.connection_id = Some(id);
    }

    /// Flush, report and rearm after the handshake processed something.
    fn after_progress(&mut self, step: &mut Step<'_>, result: Result<(), Error>) {
        if let Err(e) = result {
            self.fail(step, e);
            return;
        }

        self.flush(step);

        let established = match &self.handshake {
            Some(h) if !self.reported => h.established(),
            _ => None,
        };
        if let Some(established) = established {
            self.report(step, established);
        }

        self.rearm(step);
    }

    fn report(&mut self, step: &mut Step<'_>, established: Established) {
        let role = match &self.handshake {
            Some(h) if h.is_client() => Role::Client,
            _ => Role::Server,
        };
        let epoch = established.epoch.wrapping_add(1);

        let connection_id = established.connection_id.clone();
        let built = SessionContext::builder()
            .role(role)
            .peer(self.peer)
            .connection_id(connection_id.clone())
            .identity(established.identity)
            .scheme(established.scheme)
            .virtual_host(established.virtual_host)
            .epoch(epoch)
            .session_id(established.session_id)
            .cipher_suite(established.cipher_suite)
            .master_secret(established.master_secret)
            .established_at(step.now)
            .build();

        let context = match built {
            Ok(context) => Arc::new(context),
            Err(e) => return self.fail(step, e),
        };

        info!(
            "Established {:?} session with {} in epoch {}: {}",
            role,
            self.peer,
            epoch,
            context.identity()
        );

        self.reported = true;
        self.epoch = epoch;
        if role == Role::Client {
            self.peer_connection_id = connection_id;
        } else {
            self.established_random = self
                .handshake
                .as_ref()
                .and_then(|h| h.client_random())
                .copied();
        }
        self.session = Some(context.clone());

        for waiter in self.waiters.drain(..) {
            waiter.complete(Ok(context.clone()));
        }
        step.out.push(Output::Established(context));
    }

    /// Fail the current attempt. An established session survives it.
    fn fail(&mut self, step: &mut Step<'_>, error: Error) {
        let alert = self.handshake.as_ref().and_then(|h| {
            let epoch = h.engine().epoch();
            h.engine().fail_alert().map(|a| (epoch, a))
        });

        // Timeouts and alerts from the peer get no alert back.
        let quiet = matches!(error, Error::Timeout(_) | Error::PeerAlert(_));
        if let (Some((epoch, description)), false) = (alert, quiet) {
            self.emit(step, Message::new(epoch, 0, Body::Alert(Alert::fatal(description))));
        }

        warn!("Handshake with {} failed: {}", self.peer, error);

        self.handshake = None;
        self.failed = true;
        self.timer = None;

        for waiter in self.waiters.drain(..) {
            waiter.complete(Err(error.clone()));
        }
        step.out.push(Output::Failed {
            peer: self.peer,
            error,
        });
    }

    /// Drop handshake and session. Waiters fail with `error`.
    fn terminate(&mut self, step: &mut Step<'_>, error: Error) {
        let had_session = self.session.take().is_some();
        let had_handshake = self.handshake.take().is_some();
        self.timer = None;

        for waiter in self.waiters.drain(..) {
            waiter.complete(Err(error.clone()));
        }

        if had_session || had_handshake {
            step.out.push(Output::Closed { peer: self.peer });
        }
    }

    fn flush(&mut self, step: &mut Step<'_>) {
        let Some(handshake) = &mut self.handshake else {
            return;
        };
        let messages = crate::handshake::engine::drain_transmit(handshake.engine_mut());
        for message in messages {
            self.emit(step, message);
        }
    }

    fn emit(&self, step: &mut Step<'_>, message: Message) {
        step.out.push(Output::Message {
            peer: self.peer,
            connection_id: self.peer_connection_id.clone(),
            message,
        });
    }

    /// Keep the scheduler in line with the handshake's flight timer.
    fn rearm(&mut self, step: &mut Step<'_>) {
        let Some(handshake) = &mut self.handshake else {
            self.timer = None;
            return;
        };

        handshake.arm_timer(step.now);

        match handshake.engine().flight_deadline() {
            Some(deadline) => {
                if self.timer.map(|(_, d)| d) != Some(deadline) {
                    let token = step.scheduler.schedule(deadline, self.peer);
                    self.timer = Some((token, deadline));
                }
            }
            None => self.timer = None,
        }
    }

    #[cfg(test)]
    pub fn start_test_handshake(&mut self) {
        use crate::credential::{LocalCredentials, PskIdentity};

        let config = Config::builder()
            .local_credentials(
                LocalCredentials::new().with_psk(PskIdentity::new("a", b"k".to_vec())),
            )
            .build()
            .expect("config");
        self.handshake =
            Some(Handshake::client(Arc::new(config), self.epoch, None).expect("client handshake"));
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("epoch", &self.epoch)
            .field("handshake", &self.handshake)
            .field("session", &self.session.is_some())
            .field("waiters", &self.waiters.len())
            .finish_non_exhaustive()
    }
}
