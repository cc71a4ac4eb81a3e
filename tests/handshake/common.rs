//! Shared helpers for connector integration tests.
//!
//! A [`Network`] wires connectors together by address and moves their
//! messages in rounds on a simulated clock.

#![allow(unused)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dtls_connector::certificate::{
    generate_ca, generate_raw_key_pair, generate_signed, CertificateAuthority, CertificateChain,
    RawKeyPair, SubjectName,
};
use dtls_connector::message::{Body, ConnectionId, Message, MessageType};
use dtls_connector::{
    Config, ConnectOptions, Connector, CredentialStore, Error, Establishment, LocalCredentials,
    Output, PskIdentity, SessionContext,
};

pub const CLIENT: &str = "10.0.0.1:40000";
pub const SERVER: &str = "10.0.0.2:5684";

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn addr(s: &str) -> SocketAddr {
    s.parse().expect("socket address")
}

/// Everything a connector produced, in order.
#[derive(Debug, Default)]
pub struct Events {
    pub sent: Vec<(SocketAddr, Message)>,
    pub established: Vec<Arc<SessionContext>>,
    pub failed: Vec<(SocketAddr, Error)>,
    pub closed: Vec<SocketAddr>,
    pub data: Vec<(SocketAddr, Vec<u8>)>,
    /// Synchronous errors of `handle_message`.
    pub rejected: Vec<Error>,
}

impl Events {
    pub fn count_sent(&self, message_type: MessageType) -> usize {
        self.sent
            .iter()
            .filter(|(_, m)| m.body.message_type() == Some(message_type))
            .count()
    }

    pub fn alerts(&self) -> Vec<Body> {
        self.sent
            .iter()
            .filter(|(_, m)| matches!(m.body, Body::Alert(_)))
            .map(|(_, m)| m.body.clone())
            .collect()
    }
}

pub struct Node {
    pub addr: SocketAddr,
    pub connector: Connector,
    pub events: Events,
}

/// A message on its way between two nodes.
#[derive(Debug, Clone)]
pub struct Transit {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub connection_id: Option<ConnectionId>,
    pub message: Message,
}

impl Transit {
    pub fn is(&self, message_type: MessageType) -> bool {
        self.message.body.message_type() == Some(message_type)
    }
}

pub struct Network {
    pub now: Instant,
    pub nodes: Vec<Node>,
}

impl Network {
    pub fn new() -> Self {
        Network {
            now: Instant::now(),
            nodes: Vec::new(),
        }
    }

    /// Add a node and return its index.
    pub fn add(&mut self, address: &str, config: Config) -> usize {
        let connector = Connector::new(Arc::new(config)).expect("connector");
        self.nodes.push(Node {
            addr: addr(address),
            connector,
            events: Events::default(),
        });
        self.nodes.len() - 1
    }

    pub fn connector(&self, node: usize) -> &Connector {
        &self.nodes[node].connector
    }

    pub fn events(&self, node: usize) -> &Events {
        &self.nodes[node].events
    }

    pub fn connect(&mut self, from: usize, to: usize, options: ConnectOptions) -> Establishment {
        let peer = self.nodes[to].addr;
        self.nodes[from]
            .connector
            .connect(peer, options, self.now)
            .expect("connect")
    }

    /// Move messages until no node has anything left to send.
    pub fn pump(&mut self) {
        self.pump_with(|_| {});
    }

    /// Like [`pump`](Network::pump), letting `hook` drop, duplicate or
    /// reorder the messages of each round.
    pub fn pump_with(&mut self, mut hook: impl FnMut(&mut Vec<Transit>)) {
        for _ in 0..100 {
            let mut round = self.drain();
            if round.is_empty() {
                return;
            }
            hook(&mut round);
            self.deliver(round);
        }
        panic!("network did not settle");
    }

    /// Advance the clock and run every connector's timers.
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
        for node in &self.nodes {
            node.connector.handle_timeout(self.now);
        }
    }

    /// Next deadline a connector asks to be woken at.
    pub fn next_timeout(&mut self, node: usize) -> Instant {
        let now = self.now;
        let node = &mut self.nodes[node];
        loop {
            match node.connector.poll_output(now) {
                Output::Timeout(at) => return at,
                other => record(&mut node.events, other),
            }
        }
    }

    /// Collect pending outputs of all nodes. Returns the messages.
    pub fn drain(&mut self) -> Vec<Transit> {
        let now = self.now;
        let mut round = Vec::new();
        for node in &mut self.nodes {
            loop {
                match node.connector.poll_output(now) {
                    Output::Timeout(_) => break,
                    Output::Message {
                        peer,
                        connection_id,
                        message,
                    } => {
                        node.events.sent.push((peer, message.clone()));
                        round.push(Transit {
                            from: node.addr,
                            to: peer,
                            connection_id,
                            message,
                        });
                    }
                    other => record(&mut node.events, other),
                }
            }
        }
        round
    }

    /// Hand messages to their destinations. Unknown addresses swallow them.
    pub fn deliver(&mut self, round: Vec<Transit>) {
        let now = self.now;
        for transit in round {
            let Some(node) = self.nodes.iter_mut().find(|n| n.addr == transit.to) else {
                continue;
            };
            let result = node.connector.handle_message(
                transit.from,
                transit.connection_id.as_ref(),
                transit.message,
                now,
            );
            if let Err(e) = result {
                node.events.rejected.push(e);
            }
        }
    }
}

fn record(events: &mut Events, output: Output) {
    match output {
        Output::Established(ctx) => events.established.push(ctx),
        Output::Failed { peer, error } => events.failed.push((peer, error)),
        Output::Closed { peer } => events.closed.push(peer),
        Output::ApplicationData { peer, data } => events.data.push((peer, data)),
        Output::Message { peer, message, .. } => events.sent.push((peer, message)),
        Output::Timeout(_) => {}
    }
}

/// The outcome of a finished establishment.
pub fn established(establishment: &Establishment) -> Arc<SessionContext> {
    match establishment.try_result() {
        Some(Ok(ctx)) => ctx,
        Some(Err(e)) => panic!("handshake failed: {}", e),
        None => panic!("handshake still pending"),
    }
}

pub fn failed(establishment: &Establishment) -> Error {
    match establishment.try_result() {
        Some(Err(e)) => e,
        Some(Ok(ctx)) => panic!("handshake unexpectedly established: {:?}", ctx),
        None => panic!("handshake still pending"),
    }
}

pub fn psk_client(identity: &str, secret: &[u8]) -> Config {
    Config::builder()
        .local_credentials(LocalCredentials::new().with_psk(PskIdentity::new(identity, secret)))
        .build()
        .expect("client config")
}

pub fn psk_server(identities: &[(&str, &[u8])]) -> Config {
    let store = identities
        .iter()
        .fold(CredentialStore::builder(), |b, (id, secret)| b.psk(*id, *secret))
        .build();
    Config::builder()
        .credentials(store)
        .build()
        .expect("server config")
}

pub fn raw_key() -> RawKeyPair {
    generate_raw_key_pair().expect("raw key pair")
}

pub fn test_ca() -> CertificateAuthority {
    generate_ca(&SubjectName::new().organization("Acme").common_name("Acme Root"))
        .expect("ca")
}

pub fn leaf(ca: &CertificateAuthority, common_name: &str) -> CertificateChain {
    let name = SubjectName::new()
        .country("CA")
        .organization("Acme")
        .common_name(common_name);
    generate_signed(ca, &name).expect("leaf certificate")
}
