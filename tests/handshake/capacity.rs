//! Connection store limits and eviction.

use dtls_connector::{Config, ConnectOptions, CredentialStore, Error};

use crate::common::*;

fn limited_server(max: usize) -> Config {
    Config::builder()
        .max_connections(max)
        .use_hello_verify_request(false)
        .credentials(
            CredentialStore::builder()
                .psk("alice", b"secret".to_vec())
                .build(),
        )
        .build()
        .unwrap()
}

#[test]
fn idle_connection_is_evicted_for_new_peer() {
    init_log();
    let mut net = Network::new();
    let s = net.add(SERVER, limited_server(2));
    let clients: Vec<usize> = ["10.0.0.1:1000", "10.0.0.1:1001", "10.0.0.1:1002"]
        .iter()
        .map(|a| net.add(a, psk_client("alice", b"secret")))
        .collect();

    for &c in &clients {
        let establishment = net.connect(c, s, ConnectOptions::new());
        net.pump();
        established(&establishment);
    }

    let server = net.connector(s);
    assert_eq!(server.connection_count(), 2);
    // The least recently used peer made room.
    assert!(server.session(addr("10.0.0.1:1000")).is_none());
    assert!(server.session(addr("10.0.0.1:1001")).is_some());
    assert!(server.session(addr("10.0.0.1:1002")).is_some());
    assert_eq!(net.events(s).closed, vec![addr("10.0.0.1:1000")]);
    assert!(net.events(s).rejected.is_empty());
}

#[test]
fn full_store_of_handshakes_rejects_new_peer() {
    init_log();
    let mut net = Network::new();
    let s = net.add(SERVER, limited_server(1));
    let a = net.add("10.0.0.1:1000", psk_client("alice", b"secret"));
    let b = net.add("10.0.0.1:1001", psk_client("alice", b"secret"));
    let server = addr(SERVER);

    // Keep the server mid-handshake by never answering it.
    let only_to_server = |round: &mut Vec<Transit>| round.retain(|t| t.to == server);

    let first = net.connect(a, s, ConnectOptions::new());
    net.pump_with(only_to_server);
    assert_eq!(net.connector(s).connection_count(), 1);

    let second = net.connect(b, s, ConnectOptions::new());
    net.pump_with(only_to_server);

    assert_eq!(net.events(s).rejected, vec![Error::CapacityExceeded(1)]);
    assert_eq!(net.connector(s).connection_count(), 1);
    assert!(first.try_result().is_none());
    assert!(second.try_result().is_none());
}

#[test]
fn client_side_capacity_is_synchronous() {
    init_log();
    let mut net = Network::new();
    let config = Config::builder()
        .max_connections(1)
        .local_credentials(dtls_connector::LocalCredentials::new().with_psk(
            dtls_connector::PskIdentity::new("alice", b"secret".to_vec()),
        ))
        .build()
        .unwrap();
    let c = net.add(CLIENT, config);

    net.connector(c)
        .connect(addr("10.0.0.9:5684"), ConnectOptions::new(), net.now)
        .unwrap();
    let result = net
        .connector(c)
        .connect(addr("10.0.0.10:5684"), ConnectOptions::new(), net.now);

    assert_eq!(result.unwrap_err(), Error::CapacityExceeded(1));
}

#[test]
fn concurrent_connects_to_same_peer_share_handshake() {
    init_log();
    let mut net = Network::new();
    let c = net.add(CLIENT, psk_client("alice", b"secret"));
    let s = net.add(SERVER, psk_server(&[("alice", b"secret")]));

    let first = net.connect(c, s, ConnectOptions::new());
    let second = net.connect(c, s, ConnectOptions::new());
    net.pump();

    let a = established(&first);
    let b = established(&second);
    assert!(std::sync::Arc::ptr_eq(&a, &b));
    assert_eq!(net.events(s).established.len(), 1);
    assert_eq!(net.connector(c).connection_count(), 1);
}
