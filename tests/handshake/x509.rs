//! Certificate chain handshakes.

use dtls_connector::message::AlertDescription;
use dtls_connector::{
    Config, ConnectOptions, CredentialScheme, CredentialStore, Error, LocalCredentials,
    ServerName, VerifiedIdentity,
};

use crate::common::*;

fn identity(subject: &str) -> VerifiedIdentity {
    VerifiedIdentity::CertificateIdentity(subject.to_string())
}

#[test]
fn server_certificate_chains_to_anchor() {
    init_log();
    let ca = test_ca();
    let server_cert = leaf(&ca, "server");

    let mut net = Network::new();
    let client = Config::builder()
        .credentials(
            CredentialStore::builder()
                .trust_anchor(ca.certificate.clone())
                .build(),
        )
        .build()
        .unwrap();
    let server = Config::builder()
        .client_auth_required(false)
        .local_credentials(LocalCredentials::new().with_key(server_cert))
        .build()
        .unwrap();
    let c = net.add(CLIENT, client);
    let s = net.add(SERVER, server);

    let establishment = net.connect(c, s, ConnectOptions::new());
    net.pump();

    let ctx = established(&establishment);
    assert_eq!(ctx.scheme(), CredentialScheme::X509);
    assert_eq!(ctx.identity(), &identity("C=CA,O=Acme,CN=server"));
    assert_eq!(
        net.events(s).established[0].identity(),
        &VerifiedIdentity::Anonymous
    );
}

#[test]
fn mutual_certificates() {
    init_log();
    let ca = test_ca();

    let mut net = Network::new();
    let client = Config::builder()
        .credentials(
            CredentialStore::builder()
                .trust_anchor(ca.certificate.clone())
                .build(),
        )
        .local_credentials(LocalCredentials::new().with_key(leaf(&ca, "client")))
        .build()
        .unwrap();
    let server = Config::builder()
        .credentials(
            CredentialStore::builder()
                .trust_anchor(ca.certificate.clone())
                .build(),
        )
        .local_credentials(LocalCredentials::new().with_key(leaf(&ca, "server")))
        .build()
        .unwrap();
    let c = net.add(CLIENT, client);
    let s = net.add(SERVER, server);

    let establishment = net.connect(c, s, ConnectOptions::new());
    net.pump();

    assert_eq!(
        established(&establishment).identity(),
        &identity("C=CA,O=Acme,CN=server")
    );
    assert_eq!(
        net.events(s).established[0].identity(),
        &identity("C=CA,O=Acme,CN=client")
    );
}

#[test]
fn pinned_subject_mismatch_is_refused() {
    init_log();
    let ca = test_ca();

    let mut net = Network::new();
    let client = Config::builder()
        .credentials(
            CredentialStore::builder()
                .trust_anchor(ca.certificate.clone())
                .pin_subject("C=CA,O=Acme,CN=other")
                .build(),
        )
        .build()
        .unwrap();
    let server = Config::builder()
        .client_auth_required(false)
        .local_credentials(LocalCredentials::new().with_key(leaf(&ca, "server")))
        .build()
        .unwrap();
    let c = net.add(CLIENT, client);
    let s = net.add(SERVER, server);

    let establishment = net.connect(c, s, ConnectOptions::new());
    net.pump();

    assert!(matches!(
        failed(&establishment),
        Error::AuthenticationFailure(_)
    ));
    assert!(matches!(
        net.events(s).failed.as_slice(),
        [(_, Error::PeerAlert(AlertDescription::UnknownCa))]
    ));
}

#[test]
fn foreign_ca_is_refused() {
    init_log();
    let trusted = test_ca();
    let foreign = test_ca();

    let mut net = Network::new();
    let client = Config::builder()
        .credentials(
            CredentialStore::builder()
                .trust_anchor(trusted.certificate.clone())
                .build(),
        )
        .build()
        .unwrap();
    let server = Config::builder()
        .client_auth_required(false)
        .local_credentials(LocalCredentials::new().with_key(leaf(&foreign, "server")))
        .build()
        .unwrap();
    let c = net.add(CLIENT, client);
    let s = net.add(SERVER, server);

    let establishment = net.connect(c, s, ConnectOptions::new());
    net.pump();

    assert!(matches!(
        failed(&establishment),
        Error::AuthenticationFailure(_)
    ));
    assert!(matches!(
        net.events(s).failed.as_slice(),
        [(_, Error::PeerAlert(AlertDescription::BadCertificate))]
    ));
    assert!(net.events(s).established.is_empty());
}

#[test]
fn server_sni_carries_host_without_client_auth() {
    init_log();
    let ca = test_ca();
    let example = ServerName::new("example").unwrap();

    let mut net = Network::new();
    let client = Config::builder()
        .credentials(
            CredentialStore::builder()
                .trust_anchor(ca.certificate.clone())
                .build(),
        )
        .build()
        .unwrap();
    let server = Config::builder()
        .use_server_name_indication(true)
        .client_auth_required(false)
        .local_credentials(LocalCredentials::new().with_key(leaf(&ca, "server")))
        .build()
        .unwrap();
    let c = net.add(CLIENT, client);
    let s = net.add(SERVER, server);

    let establishment = net.connect(c, s, ConnectOptions::new().server_name(example.clone()));
    net.pump();

    assert_eq!(
        established(&establishment).identity(),
        &identity("C=CA,O=Acme,CN=server")
    );
    let server_ctx = &net.events(s).established[0];
    assert_eq!(server_ctx.virtual_host(), Some(&example));
    assert_eq!(server_ctx.identity(), &VerifiedIdentity::Anonymous);
}

#[test]
fn server_sni_carries_host_with_mutual_certificates() {
    init_log();
    let ca = test_ca();
    let example = ServerName::new("example").unwrap();

    let mut net = Network::new();
    let client = Config::builder()
        .credentials(
            CredentialStore::builder()
                .trust_anchor(ca.certificate.clone())
                .build(),
        )
        .local_credentials(LocalCredentials::new().with_key(leaf(&ca, "client")))
        .build()
        .unwrap();
    let server = Config::builder()
        .use_server_name_indication(true)
        .credentials(
            CredentialStore::builder()
                .trust_anchor_for(&example, ca.certificate.clone())
                .build(),
        )
        .local_credentials(LocalCredentials::new().with_key(leaf(&ca, "server")))
        .build()
        .unwrap();
    let c = net.add(CLIENT, client);
    let s = net.add(SERVER, server);

    let establishment = net.connect(c, s, ConnectOptions::new().server_name(example.clone()));
    net.pump();

    established(&establishment);
    let server_ctx = &net.events(s).established[0];
    assert_eq!(server_ctx.virtual_host(), Some(&example));
    assert_eq!(server_ctx.identity(), &identity("C=CA,O=Acme,CN=client"));
}
