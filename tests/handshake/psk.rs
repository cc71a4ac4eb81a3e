//! Pre-shared key handshakes and SNI scoping.

use std::sync::Arc;

use dtls_connector::message::MessageType;
use dtls_connector::{
    Config, ConnectOptions, CredentialScheme, CredentialStore, Error, FailureKind,
    HandshakeState, LocalCredentials, PskIdentity, Role, ServerName, VerifiedIdentity,
};

use crate::common::*;

fn host(name: &str) -> ServerName {
    ServerName::new(name).unwrap()
}

#[test]
fn psk_handshake_establishes_both_sides() {
    init_log();
    let mut net = Network::new();
    let c = net.add(CLIENT, psk_client("alice", b"secret"));
    let s = net.add(SERVER, psk_server(&[("alice", b"secret")]));

    let establishment = net.connect(c, s, ConnectOptions::new());
    net.pump();

    let client_ctx = established(&establishment);
    assert_eq!(client_ctx.role(), Role::Client);
    assert_eq!(client_ctx.peer(), addr(SERVER));
    assert_eq!(client_ctx.scheme(), CredentialScheme::Psk);
    assert_eq!(
        client_ctx.identity(),
        &VerifiedIdentity::PskIdentity("alice".into())
    );
    assert_eq!(client_ctx.epoch(), 1);

    let server_events = net.events(s);
    assert_eq!(server_events.established.len(), 1);
    let server_ctx = &server_events.established[0];
    assert_eq!(server_ctx.role(), Role::Server);
    assert_eq!(server_ctx.peer(), addr(CLIENT));
    assert_eq!(
        server_ctx.identity(),
        &VerifiedIdentity::PskIdentity("alice".into())
    );
    assert_eq!(server_ctx.epoch(), client_ctx.epoch());
    assert_eq!(server_ctx.session_id(), client_ctx.session_id());
    assert_eq!(server_ctx.master_secret(), client_ctx.master_secret());

    // One stateless HelloVerifyRequest, then the real exchange.
    assert_eq!(net.events(s).count_sent(MessageType::HelloVerifyRequest), 1);
    assert_eq!(net.events(c).count_sent(MessageType::ClientHello), 2);

    let server = net.connector(s);
    assert_eq!(
        server.handshake_state(addr(CLIENT)),
        Some(HandshakeState::Established)
    );
    assert!(server.session(addr(CLIENT)).is_some());
    assert_eq!(server.connection_count(), 1);
}

#[test]
fn application_data_flows_in_session() {
    init_log();
    let mut net = Network::new();
    let c = net.add(CLIENT, psk_client("alice", b"secret"));
    let s = net.add(SERVER, psk_server(&[("alice", b"secret")]));

    let establishment = net.connect(c, s, ConnectOptions::new());
    net.pump();
    let ctx = established(&establishment);

    net.connector(c)
        .send(&ctx, b"ping".to_vec(), net.now)
        .unwrap();
    net.pump();

    assert_eq!(net.events(s).data, vec![(addr(CLIENT), b"ping".to_vec())]);

    let server_ctx = net.connector(s).session(addr(CLIENT)).unwrap();
    net.connector(s)
        .send(&server_ctx, b"pong".to_vec(), net.now)
        .unwrap();
    net.pump();

    assert_eq!(net.events(c).data, vec![(addr(SERVER), b"pong".to_vec())]);
}

#[test]
fn connect_on_established_connection_returns_session() {
    init_log();
    let mut net = Network::new();
    let c = net.add(CLIENT, psk_client("alice", b"secret"));
    let s = net.add(SERVER, psk_server(&[("alice", b"secret")]));

    let first = net.connect(c, s, ConnectOptions::new());
    net.pump();
    let ctx = established(&first);

    let again = net.connect(c, s, ConnectOptions::new());
    assert!(Arc::ptr_eq(&established(&again), &ctx));
    assert!(net.drain().is_empty());
}

#[test]
fn rehandshake_replaces_session() {
    init_log();
    let mut net = Network::new();
    let c = net.add(CLIENT, psk_client("alice", b"secret"));
    let s = net.add(SERVER, psk_server(&[("alice", b"secret")]));

    let first = net.connect(c, s, ConnectOptions::new());
    net.pump();
    let old = established(&first);

    let second = net.connect(c, s, ConnectOptions::new().rehandshake(true));
    net.pump();
    let new = established(&second);

    assert_eq!(new.epoch(), old.epoch() + 1);
    assert_ne!(new.session_id(), old.session_id());
    assert_eq!(net.events(s).established.len(), 2);
    assert_eq!(net.events(s).established[1].epoch(), new.epoch());

    // The old context no longer sends.
    let result = net.connector(c).send(&old, b"late".to_vec(), net.now);
    assert_eq!(result, Err(Error::NotEstablished));
    net.connector(c).send(&new, b"fresh".to_vec(), net.now).unwrap();
    net.pump();
    assert_eq!(net.events(s).data, vec![(addr(CLIENT), b"fresh".to_vec())]);
}

#[test]
fn server_name_scopes_identity() {
    init_log();
    let example = host("example");

    let mut net = Network::new();
    let client = Config::builder()
        .use_server_name_indication(true)
        .local_credentials(
            LocalCredentials::new().with_psk(PskIdentity::new("alice", b"scoped".to_vec())),
        )
        .build()
        .unwrap();
    let server = Config::builder()
        .use_server_name_indication(true)
        .credentials(
            CredentialStore::builder()
                .psk("alice", b"default".to_vec())
                .psk_for(&example, "alice", b"scoped".to_vec())
                .build(),
        )
        .build()
        .unwrap();
    let c = net.add(CLIENT, client);
    let s = net.add(SERVER, server);

    let establishment = net.connect(c, s, ConnectOptions::new().server_name(example.clone()));
    net.pump();

    let client_ctx = established(&establishment);
    assert_eq!(client_ctx.virtual_host(), Some(&example));
    assert_eq!(
        client_ctx.identity(),
        &VerifiedIdentity::PskIdentity("example:alice".into())
    );

    let server_ctx = &net.events(s).established[0];
    assert_eq!(server_ctx.virtual_host(), Some(&example));
    assert_eq!(
        server_ctx.identity(),
        &VerifiedIdentity::PskIdentity("example:alice".into())
    );
}

#[test]
fn server_without_sni_ignores_server_name() {
    init_log();
    let mut net = Network::new();
    let c = net.add(CLIENT, psk_client("alice", b"default"));
    let s = net.add(SERVER, psk_server(&[("alice", b"default")]));

    let establishment = net.connect(
        c,
        s,
        ConnectOptions::new().server_name(host("example")),
    );
    net.pump();

    let client_ctx = established(&establishment);
    assert_eq!(client_ctx.virtual_host(), None);
    assert_eq!(
        client_ctx.identity(),
        &VerifiedIdentity::PskIdentity("alice".into())
    );

    let server_ctx = &net.events(s).established[0];
    assert_eq!(server_ctx.virtual_host(), None);
    assert_eq!(
        server_ctx.identity(),
        &VerifiedIdentity::PskIdentity("alice".into())
    );
}

#[test]
fn host_without_credentials_falls_back_to_default() {
    init_log();
    let mut net = Network::new();
    let client = Config::builder()
        .use_server_name_indication(true)
        .local_credentials(
            LocalCredentials::new().with_psk(PskIdentity::new("alice", b"default".to_vec())),
        )
        .build()
        .unwrap();
    let server = Config::builder()
        .use_server_name_indication(true)
        .credentials(
            CredentialStore::builder()
                .psk("alice", b"default".to_vec())
                .build(),
        )
        .build()
        .unwrap();
    let c = net.add(CLIENT, client);
    let s = net.add(SERVER, server);

    let establishment = net.connect(c, s, ConnectOptions::new().server_name(host("other")));
    net.pump();

    established(&establishment);
    let server_ctx = &net.events(s).established[0];
    assert_eq!(server_ctx.virtual_host(), Some(&host("other")));
    assert_eq!(
        server_ctx.identity(),
        &VerifiedIdentity::PskIdentity("other:alice".into())
    );
}

#[test]
fn wrong_secret_fails_both_sides() {
    init_log();
    let mut net = Network::new();
    let c = net.add(CLIENT, psk_client("alice", b"wrong"));
    let s = net.add(SERVER, psk_server(&[("alice", b"secret")]));

    let establishment = net.connect(c, s, ConnectOptions::new());
    net.pump();

    let error = failed(&establishment);
    assert_eq!(error.kind(), FailureKind::Authentication);

    let server_events = net.events(s);
    assert!(server_events.established.is_empty());
    assert!(matches!(
        server_events.failed.as_slice(),
        [(_, Error::AuthenticationFailure(_))]
    ));
    assert_eq!(net.connector(s).connection_count(), 0);
    assert_eq!(net.connector(c).connection_count(), 0);
}

#[test]
fn unknown_identity_is_refused() {
    init_log();
    let mut net = Network::new();
    let c = net.add(CLIENT, psk_client("mallory", b"secret"));
    let s = net.add(SERVER, psk_server(&[("alice", b"secret")]));

    let establishment = net.connect(c, s, ConnectOptions::new());
    net.pump();

    assert_eq!(
        failed(&establishment),
        Error::PeerAlert(dtls_connector::message::AlertDescription::UnknownPskIdentity)
    );
    assert!(net.events(s).established.is_empty());
}

#[test]
fn without_hello_verify_the_exchange_is_shorter() {
    init_log();
    let mut net = Network::new();
    let c = net.add(CLIENT, psk_client("alice", b"secret"));
    let server = Config::builder()
        .use_hello_verify_request(false)
        .credentials(CredentialStore::builder().psk("alice", b"secret".to_vec()).build())
        .build()
        .unwrap();
    let s = net.add(SERVER, server);

    let establishment = net.connect(c, s, ConnectOptions::new());
    net.pump();

    established(&establishment);
    assert_eq!(net.events(s).count_sent(MessageType::HelloVerifyRequest), 0);
    assert_eq!(net.events(c).count_sent(MessageType::ClientHello), 1);
}

#[test]
fn server_sni_applies_without_client_sni() {
    init_log();
    let example = host("example");

    let mut net = Network::new();
    let c = net.add(CLIENT, psk_client("alice", b"scoped"));
    let server = Config::builder()
        .use_server_name_indication(true)
        .credentials(
            CredentialStore::builder()
                .psk("alice", b"default".to_vec())
                .psk_for(&example, "alice", b"scoped".to_vec())
                .build(),
        )
        .build()
        .unwrap();
    let s = net.add(SERVER, server);

    let establishment = net.connect(c, s, ConnectOptions::new().server_name(example.clone()));
    net.pump();

    // The client's own setting only governs its side.
    let client_ctx = established(&establishment);
    assert_eq!(client_ctx.virtual_host(), None);
    assert_eq!(
        client_ctx.identity(),
        &VerifiedIdentity::PskIdentity("alice".into())
    );

    let server_ctx = &net.events(s).established[0];
    assert_eq!(server_ctx.virtual_host(), Some(&example));
    assert_eq!(
        server_ctx.identity(),
        &VerifiedIdentity::PskIdentity("example:alice".into())
    );
}

#[test]
fn server_sni_without_host_name_reports_bare_identity() {
    init_log();
    let mut net = Network::new();
    let c = net.add(CLIENT, psk_client("alice", b"secret"));
    let server = Config::builder()
        .use_server_name_indication(true)
        .credentials(CredentialStore::builder().psk("alice", b"secret".to_vec()).build())
        .build()
        .unwrap();
    let s = net.add(SERVER, server);

    let establishment = net.connect(c, s, ConnectOptions::new());
    net.pump();

    established(&establishment);
    let server_ctx = &net.events(s).established[0];
    assert_eq!(server_ctx.virtual_host(), None);
    assert_eq!(
        server_ctx.identity(),
        &VerifiedIdentity::PskIdentity("alice".into())
    );
}

#[test]
fn host_name_reaches_session_as_sent() {
    init_log();
    let mut net = Network::new();
    let c = net.add(CLIENT, psk_client("alice", b"scoped"));
    let server = Config::builder()
        .use_server_name_indication(true)
        .credentials(
            CredentialStore::builder()
                .fallback_to_default(false)
                .psk_for(&host("my_host.local"), "alice", b"scoped".to_vec())
                .build(),
        )
        .build()
        .unwrap();
    let s = net.add(SERVER, server);

    let establishment = net.connect(
        c,
        s,
        ConnectOptions::new().server_name(host("My_Host.LOCAL")),
    );
    net.pump();

    established(&establishment);
    let server_ctx = &net.events(s).established[0];
    assert_eq!(
        server_ctx.virtual_host().map(|h| h.as_str()),
        Some("My_Host.LOCAL")
    );
    assert_eq!(
        server_ctx.identity(),
        &VerifiedIdentity::PskIdentity("My_Host.LOCAL:alice".into())
    );
}

#[test]
fn psk_without_client_auth_is_anonymous() {
    init_log();
    let mut net = Network::new();
    let c = net.add(CLIENT, psk_client("alice", b"secret"));
    let server = Config::builder()
        .client_auth_required(false)
        .credentials(CredentialStore::builder().psk("alice", b"secret".to_vec()).build())
        .build()
        .unwrap();
    let s = net.add(SERVER, server);

    let establishment = net.connect(c, s, ConnectOptions::new());
    net.pump();

    let client_ctx = established(&establishment);
    assert_eq!(
        client_ctx.identity(),
        &VerifiedIdentity::PskIdentity("alice".into())
    );
    let server_ctx = &net.events(s).established[0];
    assert_eq!(server_ctx.identity(), &VerifiedIdentity::Anonymous);
    assert!(server_ctx.peer_identity().is_none());
}
