//! Raw public key handshakes, mutual and one-sided.

use dtls_connector::identity::raw_key_fingerprint;
use dtls_connector::message::AlertDescription;
use dtls_connector::{
    Config, ConnectOptions, CredentialScheme, CredentialStore, Error, FailureKind,
    LocalCredentials, ServerName, VerifiedIdentity,
};

use crate::common::*;

#[test]
fn server_authenticates_with_raw_key() {
    init_log();
    let server_key = raw_key();
    let fingerprint = raw_key_fingerprint(&server_key.public_key);

    let mut net = Network::new();
    let client = Config::builder()
        .credentials(
            CredentialStore::builder()
                .raw_public_key(server_key.public_key.clone())
                .build(),
        )
        .build()
        .unwrap();
    let server = Config::builder()
        .client_auth_required(false)
        .local_credentials(LocalCredentials::new().with_key(server_key))
        .build()
        .unwrap();
    let c = net.add(CLIENT, client);
    let s = net.add(SERVER, server);

    let establishment = net.connect(c, s, ConnectOptions::new());
    net.pump();

    let ctx = established(&establishment);
    assert_eq!(ctx.scheme(), CredentialScheme::RawPublicKey);
    assert_eq!(ctx.identity(), &VerifiedIdentity::RawKeyIdentity(fingerprint));

    let server_ctx = &net.events(s).established[0];
    assert_eq!(server_ctx.identity(), &VerifiedIdentity::Anonymous);
    assert!(server_ctx.peer_identity().is_none());
}

#[test]
fn mutual_raw_keys_report_stable_fingerprint() {
    init_log();
    let server_key = raw_key();
    let client_key = raw_key();
    let client_fingerprint = raw_key_fingerprint(&client_key.public_key);

    let mut identities = Vec::new();
    for _ in 0..2 {
        let mut net = Network::new();
        let client = Config::builder()
            .credentials(
                CredentialStore::builder()
                    .raw_public_key(server_key.public_key.clone())
                    .build(),
            )
            .local_credentials(LocalCredentials::new().with_key(client_key.clone()))
            .build()
            .unwrap();
        let server = Config::builder()
            .credentials(
                CredentialStore::builder()
                    .raw_public_key(client_key.public_key.clone())
                    .build(),
            )
            .local_credentials(LocalCredentials::new().with_key(server_key.clone()))
            .build()
            .unwrap();
        let c = net.add(CLIENT, client);
        let s = net.add(SERVER, server);

        let establishment = net.connect(c, s, ConnectOptions::new());
        net.pump();
        established(&establishment);

        identities.push(net.events(s).established[0].identity().clone());
    }

    assert_eq!(
        identities[0],
        VerifiedIdentity::RawKeyIdentity(client_fingerprint)
    );
    assert_eq!(identities[0], identities[1]);
}

#[test]
fn trust_all_accepts_unknown_keys() {
    init_log();
    let server_key = raw_key();
    let fingerprint = raw_key_fingerprint(&server_key.public_key);

    let mut net = Network::new();
    let client = Config::builder()
        .credentials(
            CredentialStore::builder()
                .trust_all_raw_public_keys(true)
                .build(),
        )
        .build()
        .unwrap();
    let server = Config::builder()
        .client_auth_required(false)
        .local_credentials(LocalCredentials::new().with_key(server_key))
        .build()
        .unwrap();
    let c = net.add(CLIENT, client);
    let s = net.add(SERVER, server);

    let establishment = net.connect(c, s, ConnectOptions::new());
    net.pump();

    assert_eq!(
        established(&establishment).identity(),
        &VerifiedIdentity::RawKeyIdentity(fingerprint)
    );
}

#[test]
fn untrusted_server_key_is_refused() {
    init_log();
    let server_key = raw_key();
    let other_key = raw_key();

    let mut net = Network::new();
    let client = Config::builder()
        .credentials(
            CredentialStore::builder()
                .raw_public_key(other_key.public_key)
                .build(),
        )
        .build()
        .unwrap();
    let server = Config::builder()
        .client_auth_required(false)
        .local_credentials(LocalCredentials::new().with_key(server_key))
        .build()
        .unwrap();
    let c = net.add(CLIENT, client);
    let s = net.add(SERVER, server);

    let establishment = net.connect(c, s, ConnectOptions::new());
    net.pump();

    let error = failed(&establishment);
    assert!(matches!(error, Error::AuthenticationFailure(_)));
    assert_eq!(error.kind(), FailureKind::Authentication);
    assert!(matches!(
        net.events(s).failed.as_slice(),
        [(_, Error::PeerAlert(AlertDescription::CertificateUnknown))]
    ));
}

#[test]
fn required_client_auth_without_client_key_fails() {
    init_log();
    let server_key = raw_key();

    let mut net = Network::new();
    let client = Config::builder()
        .credentials(
            CredentialStore::builder()
                .raw_public_key(server_key.public_key.clone())
                .build(),
        )
        .build()
        .unwrap();
    let server = Config::builder()
        .credentials(
            CredentialStore::builder()
                .trust_all_raw_public_keys(true)
                .build(),
        )
        .local_credentials(LocalCredentials::new().with_key(server_key))
        .build()
        .unwrap();
    let c = net.add(CLIENT, client);
    let s = net.add(SERVER, server);

    let establishment = net.connect(c, s, ConnectOptions::new());
    net.pump();

    assert_eq!(
        failed(&establishment),
        Error::PeerAlert(AlertDescription::HandshakeFailure)
    );
    assert!(matches!(
        net.events(s).failed.as_slice(),
        [(_, Error::AuthenticationFailure(_))]
    ));
}

#[test]
fn wanted_client_auth_completes_anonymously() {
    init_log();
    let server_key = raw_key();

    let mut net = Network::new();
    let client = Config::builder()
        .credentials(
            CredentialStore::builder()
                .raw_public_key(server_key.public_key.clone())
                .build(),
        )
        .build()
        .unwrap();
    let server = Config::builder()
        .client_auth_required(false)
        .client_auth_wanted(true)
        .credentials(
            CredentialStore::builder()
                .trust_all_raw_public_keys(true)
                .build(),
        )
        .local_credentials(LocalCredentials::new().with_key(server_key))
        .build()
        .unwrap();
    let c = net.add(CLIENT, client);
    let s = net.add(SERVER, server);

    let establishment = net.connect(c, s, ConnectOptions::new());
    net.pump();

    established(&establishment);
    assert_eq!(
        net.events(s).established[0].identity(),
        &VerifiedIdentity::Anonymous
    );
}

#[test]
fn server_sni_carries_host_without_client_auth() {
    init_log();
    let server_key = raw_key();
    let example = ServerName::new("example").unwrap();

    let mut net = Network::new();
    let client = Config::builder()
        .credentials(
            CredentialStore::builder()
                .raw_public_key(server_key.public_key.clone())
                .build(),
        )
        .build()
        .unwrap();
    let server = Config::builder()
        .use_server_name_indication(true)
        .client_auth_required(false)
        .local_credentials(LocalCredentials::new().with_key(server_key))
        .build()
        .unwrap();
    let c = net.add(CLIENT, client);
    let s = net.add(SERVER, server);

    let establishment = net.connect(c, s, ConnectOptions::new().server_name(example.clone()));
    net.pump();

    established(&establishment);
    let server_ctx = &net.events(s).established[0];
    assert_eq!(server_ctx.virtual_host(), Some(&example));
    assert_eq!(server_ctx.identity(), &VerifiedIdentity::Anonymous);
}

#[test]
fn server_sni_carries_host_with_mutual_raw_keys() {
    init_log();
    let server_key = raw_key();
    let client_key = raw_key();
    let client_fingerprint = raw_key_fingerprint(&client_key.public_key);
    let example = ServerName::new("example").unwrap();

    let mut net = Network::new();
    let client = Config::builder()
        .credentials(
            CredentialStore::builder()
                .raw_public_key(server_key.public_key.clone())
                .build(),
        )
        .local_credentials(LocalCredentials::new().with_key(client_key.clone()))
        .build()
        .unwrap();
    let server = Config::builder()
        .use_server_name_indication(true)
        .credentials(
            CredentialStore::builder()
                .raw_public_key_for(&example, client_key.public_key.clone())
                .build(),
        )
        .local_credentials(LocalCredentials::new().with_key(server_key))
        .build()
        .unwrap();
    let c = net.add(CLIENT, client);
    let s = net.add(SERVER, server);

    let establishment = net.connect(c, s, ConnectOptions::new().server_name(example.clone()));
    net.pump();

    established(&establishment);
    let server_ctx = &net.events(s).established[0];
    assert_eq!(server_ctx.virtual_host(), Some(&example));
    assert_eq!(
        server_ctx.identity(),
        &VerifiedIdentity::RawKeyIdentity(client_fingerprint)
    );
}
