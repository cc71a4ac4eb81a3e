//! Flight retransmission and handshake timeout.

use std::time::Duration;

use dtls_connector::message::MessageType;
use dtls_connector::{ConnectOptions, Error, FailureKind};

use crate::common::*;

#[test]
fn lost_server_flight_is_recovered() {
    init_log();
    let mut net = Network::new();
    let c = net.add(CLIENT, psk_client("alice", b"secret"));
    let s = net.add(SERVER, psk_server(&[("alice", b"secret")]));
    let server = addr(SERVER);

    let establishment = net.connect(c, s, ConnectOptions::new());

    // Lose the first ServerHello flight.
    let mut lost = false;
    net.pump_with(|round| {
        if !lost && round.iter().any(|t| t.is(MessageType::ServerHello)) {
            round.retain(|t| t.from != server);
            lost = true;
        }
    });
    assert!(lost);
    assert!(establishment.try_result().is_none());

    net.advance(Duration::from_secs(1));
    net.pump();

    established(&establishment);
    assert!(net.events(s).count_sent(MessageType::ServerHello) >= 2);
    assert_eq!(net.events(s).established.len(), 1);
}

#[test]
fn lost_client_finished_is_recovered() {
    init_log();
    let mut net = Network::new();
    let c = net.add(CLIENT, psk_client("alice", b"secret"));
    let s = net.add(SERVER, psk_server(&[("alice", b"secret")]));

    let establishment = net.connect(c, s, ConnectOptions::new());

    let mut lost = false;
    net.pump_with(|round| {
        if !lost && round.iter().any(|t| t.is(MessageType::Finished)) {
            round.retain(|t| !t.is(MessageType::Finished));
            lost = true;
        }
    });
    assert!(lost);
    assert!(net.events(s).established.is_empty());

    net.advance(Duration::from_secs(1));
    net.pump();

    established(&establishment);
    assert_eq!(net.events(s).established.len(), 1);
    assert_eq!(net.events(c).count_sent(MessageType::Finished), 2);
}

#[test]
fn first_flight_arms_initial_timeout() {
    init_log();
    let mut net = Network::new();
    let c = net.add(CLIENT, psk_client("alice", b"secret"));
    let s = net.add(SERVER, psk_server(&[("alice", b"secret")]));

    let start = net.now;
    net.connect(c, s, ConnectOptions::new());

    assert_eq!(net.next_timeout(c), start + Duration::from_secs(1));
}

#[test]
fn silent_peer_times_out_after_backoff() {
    init_log();
    let mut net = Network::new();
    let c = net.add(CLIENT, psk_client("alice", b"secret"));

    let establishment = net
        .connector(c)
        .connect(addr(SERVER), ConnectOptions::new(), net.now)
        .unwrap();
    net.pump();

    // Resends after 1, 2, 4 and 8 seconds, then gives up after 16 more.
    for secs in [1, 2, 4, 8] {
        net.advance(Duration::from_secs(secs));
        net.pump();
        assert!(establishment.try_result().is_none());
    }
    assert_eq!(net.events(c).count_sent(MessageType::ClientHello), 5);

    net.advance(Duration::from_secs(15));
    net.pump();
    assert!(establishment.try_result().is_none());

    net.advance(Duration::from_secs(1));
    net.pump();

    let error = failed(&establishment);
    assert_eq!(error, Error::Timeout("handshake"));
    assert_eq!(error.kind(), FailureKind::Unreachable);
    assert_eq!(net.events(c).count_sent(MessageType::ClientHello), 5);
    assert!(matches!(
        net.events(c).failed.as_slice(),
        [(_, Error::Timeout(_))]
    ));
    // Timeouts send no alert.
    assert!(net.events(c).alerts().is_empty());
    assert_eq!(net.connector(c).connection_count(), 0);
}

#[test]
fn custom_backoff_settings_apply() {
    init_log();
    let mut net = Network::new();
    let config = dtls_connector::Config::builder()
        .flight_start_rto(Duration::from_millis(200))
        .flight_retries(1)
        .local_credentials(dtls_connector::LocalCredentials::new().with_psk(
            dtls_connector::PskIdentity::new("alice", b"secret".to_vec()),
        ))
        .build()
        .unwrap();
    let c = net.add(CLIENT, config);

    let establishment = net
        .connector(c)
        .connect(addr(SERVER), ConnectOptions::new(), net.now)
        .unwrap();
    net.pump();

    net.advance(Duration::from_millis(200));
    net.pump();
    assert_eq!(net.events(c).count_sent(MessageType::ClientHello), 2);

    net.advance(Duration::from_millis(400));
    net.pump();
    assert_eq!(failed(&establishment), Error::Timeout("handshake"));
}
