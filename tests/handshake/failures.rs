//! Configuration errors, alerts, closing and rehandshake refusal.

use dtls_connector::message::{Alert, AlertDescription, Body, Message, MessageType};
use dtls_connector::{
    Config, ConnectOptions, CredentialStore, Error, FailureKind, HandshakeState,
    RehandshakePolicy,
};

use crate::common::*;

#[test]
fn client_without_credentials_fails_synchronously() {
    init_log();
    let mut net = Network::new();
    let c = net.add(CLIENT, Config::default());

    let result = net
        .connector(c)
        .connect(addr(SERVER), ConnectOptions::new(), net.now);

    let error = result.unwrap_err();
    assert!(matches!(error, Error::ConfigError(_)));
    assert_eq!(error.kind(), FailureKind::Configuration);
    assert_eq!(net.connector(c).connection_count(), 0);
}

#[test]
fn server_only_connector_does_not_connect() {
    init_log();
    let mut net = Network::new();
    let config = Config::builder().server_only(true).build().unwrap();
    let s = net.add(SERVER, config);

    let result = net
        .connector(s)
        .connect(addr(CLIENT), ConnectOptions::new(), net.now);
    assert!(matches!(result, Err(Error::ConfigError(_))));
}

#[test]
fn client_only_connector_ignores_client_hello() {
    init_log();
    let mut net = Network::new();
    let c = net.add(CLIENT, psk_client("alice", b"secret"));
    let server = Config::builder()
        .client_only(true)
        .credentials(CredentialStore::builder().psk("alice", b"secret".to_vec()).build())
        .build()
        .unwrap();
    let s = net.add(SERVER, server);

    let establishment = net.connect(c, s, ConnectOptions::new());
    net.pump();

    assert!(establishment.try_result().is_none());
    assert!(net.events(s).sent.is_empty());
    assert_eq!(net.connector(s).connection_count(), 0);
}

#[test]
fn repeated_unexpected_messages_fail_handshake() {
    init_log();
    let mut net = Network::new();
    let c = net.add(CLIENT, psk_client("alice", b"secret"));
    let server = Config::builder()
        .use_hello_verify_request(false)
        .max_violations(2)
        .credentials(CredentialStore::builder().psk("alice", b"secret".to_vec()).build())
        .build()
        .unwrap();
    let s = net.add(SERVER, server);

    net.connect(c, s, ConnectOptions::new());
    // ClientHello reaches the server, its answer is lost.
    let round = net.drain();
    net.deliver(round);
    net.drain();

    // The server now expects the client's flight at sequence 1.
    for _ in 0..3 {
        let bogus = Message::new(0, 1, Body::ServerHelloDone);
        net.connector(s)
            .handle_message(addr(CLIENT), None, bogus, net.now)
            .unwrap();
    }
    net.drain();

    let server_events = net.events(s);
    assert!(matches!(
        server_events.failed.as_slice(),
        [(_, Error::ProtocolViolation(_))]
    ));
    assert_eq!(
        server_events.sent.last().map(|(_, m)| m.body.clone()),
        Some(Body::Alert(Alert::fatal(AlertDescription::UnexpectedMessage)))
    );
    assert_eq!(net.connector(s).connection_count(), 0);
}

#[test]
fn close_notifies_peer() {
    init_log();
    let mut net = Network::new();
    let c = net.add(CLIENT, psk_client("alice", b"secret"));
    let s = net.add(SERVER, psk_server(&[("alice", b"secret")]));

    let establishment = net.connect(c, s, ConnectOptions::new());
    net.pump();
    let ctx = established(&establishment);

    assert!(net.connector(c).close(addr(SERVER), net.now));
    net.pump();

    assert_eq!(net.events(c).closed, vec![addr(SERVER)]);
    assert_eq!(net.events(s).closed, vec![addr(CLIENT)]);
    assert!(net.connector(s).session(addr(CLIENT)).is_none());
    assert_eq!(net.connector(s).connection_count(), 0);

    let result = net.connector(c).send(&ctx, b"late".to_vec(), net.now);
    assert_eq!(result, Err(Error::NotEstablished));
    assert!(!net.connector(c).close(addr(SERVER), net.now));
}

#[test]
fn close_fails_pending_establishment() {
    init_log();
    let mut net = Network::new();
    let c = net.add(CLIENT, psk_client("alice", b"secret"));

    let establishment = net
        .connector(c)
        .connect(addr(SERVER), ConnectOptions::new(), net.now)
        .unwrap();
    assert!(net.connector(c).close(addr(SERVER), net.now));

    assert_eq!(failed(&establishment), Error::ConnectionClosed);
    assert_eq!(net.connector(c).connection_count(), 0);
}

#[test]
fn close_all_drops_every_connection() {
    init_log();
    let mut net = Network::new();
    let c = net.add(CLIENT, psk_client("alice", b"secret"));
    let s = net.add(SERVER, psk_server(&[("alice", b"secret")]));

    let establishment = net.connect(c, s, ConnectOptions::new());
    net.pump();
    established(&establishment);

    net.connector(s).close_all(net.now);
    net.pump();

    assert_eq!(net.connector(s).connection_count(), 0);
    assert_eq!(net.connector(c).connection_count(), 0);
    assert_eq!(net.events(c).closed, vec![addr(SERVER)]);
}

#[test]
fn rejected_rehandshake_keeps_session() {
    init_log();
    let mut net = Network::new();
    let c = net.add(CLIENT, psk_client("alice", b"secret"));
    let server = Config::builder()
        .rehandshake_policy(RehandshakePolicy::Reject)
        .credentials(CredentialStore::builder().psk("alice", b"secret".to_vec()).build())
        .build()
        .unwrap();
    let s = net.add(SERVER, server);

    let first = net.connect(c, s, ConnectOptions::new());
    net.pump();
    let ctx = established(&first);

    let second = net.connect(c, s, ConnectOptions::new().rehandshake(true));
    net.pump();

    assert_eq!(
        failed(&second),
        Error::PeerAlert(AlertDescription::NoRenegotiation)
    );
    assert_eq!(net.events(s).established.len(), 1);

    // The refused attempt is terminal, the old session lives on.
    assert_eq!(
        net.connector(c).handshake_state(addr(SERVER)),
        Some(HandshakeState::Failed)
    );
    assert_eq!(
        net.connector(s).handshake_state(addr(CLIENT)),
        Some(HandshakeState::Established)
    );

    net.connector(c).send(&ctx, b"still here".to_vec(), net.now).unwrap();
    net.pump();
    assert_eq!(
        net.events(s).data,
        vec![(addr(CLIENT), b"still here".to_vec())]
    );
}

#[test]
fn connection_id_follows_address_change() {
    init_log();
    let mut net = Network::new();
    let c = net.add(CLIENT, psk_client("alice", b"secret"));
    let server = Config::builder()
        .connection_id_length(8)
        .credentials(CredentialStore::builder().psk("alice", b"secret".to_vec()).build())
        .build()
        .unwrap();
    let s = net.add(SERVER, server);

    let establishment = net.connect(c, s, ConnectOptions::new());
    net.pump();
    let ctx = established(&establishment);
    assert_eq!(ctx.connection_id().map(|id| id.0.len()), Some(8));

    // The client's NAT binding changes.
    let moved = addr("10.0.0.1:41000");
    net.nodes[c].addr = moved;

    net.connector(c).send(&ctx, b"hello".to_vec(), net.now).unwrap();
    net.pump();

    assert_eq!(net.events(s).data, vec![(moved, b"hello".to_vec())]);
    let server = net.connector(s);
    assert!(server.session(moved).is_some());
    assert!(server.session(addr(CLIENT)).is_none());
    assert_eq!(server.connection_count(), 1);

    // Replies go to the new address.
    let server_ctx = server.session(moved).unwrap();
    server.send(&server_ctx, b"welcome".to_vec(), net.now).unwrap();
    net.pump();
    assert_eq!(net.events(c).data, vec![(addr(SERVER), b"welcome".to_vec())]);
}

#[test]
fn failure_kinds_classify_errors() {
    assert_eq!(
        Error::PeerAlert(AlertDescription::BadCertificate).kind(),
        FailureKind::Authentication
    );
    assert_eq!(
        Error::PeerAlert(AlertDescription::UnexpectedMessage).kind(),
        FailureKind::Protocol
    );
    assert_eq!(Error::CapacityExceeded(3).kind(), FailureKind::ResourceExhausted);
    assert_eq!(Error::ConnectionClosed.kind(), FailureKind::Closed);
}
