// DTLS Server Handshake Flow:
//
// 1. Client sends ClientHello carrying a valid cookie (checked statelessly by
//    the connector before this attempt exists)
// 2. Server sends ServerHello, [Certificate, ServerKeyExchange,
//    CertificateRequest], ServerHelloDone
// 3. Client sends [Certificate], ClientKeyExchange, [CertificateVerify], Finished
// 4. Server verifies the client's proof and Finished, then sends Finished
// 5. Handshake complete

use std::sync::Arc;
use std::time::SystemTime;

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::engine::{psk_pre_master_secret, Engine};
use super::{Established, HandshakeState, PeerCertificate};
use crate::credential::{CredentialRecord, CredentialScheme, KeyMaterial, LocalCertificate, LocalKey};
use crate::crypto::ActiveKeyExchange;
use crate::identity::{raw_key_fingerprint, VerifiedIdentity};
use crate::message::{
    AlertDescription, Body, CertificateBody, CertificateRequest, CertificateType, CipherSuite,
    ClientHello, ClientKeyExchange, ConnectionId, Finished, KeyExchangeAlgorithm, Message,
    MessageType, NamedGroup, Random, ServerHello, ServerKeyExchange, SessionId,
};
use crate::sni::{ServerName, SniRouter};
use crate::verifier::{IdentityVerifier, Proof, VerifyScope, X509Verifier};
use crate::{Config, Error};

/// How much the server insists on client authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientAuth {
    None,
    Wanted,
    Required,
}

/// Server side of one handshake attempt.
pub(crate) struct Server {
    /// Current server state.
    state: State,

    /// Sequencing, transcript and flights.
    engine: Engine,

    /// Random unique data. Used for signature checks.
    random: Random,

    /// SessionId we provide to the client.
    session_id: SessionId,

    /// Client random. Identifies the ClientHello that started this attempt.
    client_random: Random,

    /// Epoch the client put on that ClientHello.
    hello_epoch: u16,

    client_auth: ClientAuth,

    /// Set from the ClientHello by SNI routing.
    virtual_host: Option<ServerName>,

    /// Negotiated in ClientHello processing.
    cipher_suite: Option<CipherSuite>,
    client_certificate_type: Option<CertificateType>,
    server_certificate_type: Option<CertificateType>,
    local_key: Option<LocalKey>,

    connection_id: Option<ConnectionId>,

    /// Our ephemeral ECDHE key until the ClientKeyExchange completes it.
    key_exchange: Option<Box<dyn ActiveKeyExchange>>,

    /// Client certificate and the credential it resolved to.
    client_certificate: Option<PeerCertificate>,

    /// Claimed PSK identity and its credential.
    psk: Option<(String, CredentialRecord)>,

    /// Identity proven by CertificateVerify.
    client_identity: Option<VerifiedIdentity>,

    master_secret: Option<Zeroizing<Vec<u8>>>,

    /// Identity reported for the client.
    peer_identity: Option<VerifiedIdentity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitClientHello,
    SendServerHello,
    SendCertificate,
    SendServerKeyExchange,
    SendCertificateRequest,
    SendServerHelloDone,
    AwaitCertificate,
    AwaitClientKeyExchange,
    AwaitCertificateVerify,
    AwaitFinished,
    SendFinished,
    Established,
}

impl Server {
    /// Start an attempt from a ClientHello whose cookie was checked.
    pub fn new(
        config: Arc<Config>,
        epoch: u16,
        hello: Message,
        connection_id: Option<ConnectionId>,
    ) -> Result<Server, Error> {
        let Body::ClientHello(ch) = &hello.body else {
            return Err(Error::ProtocolViolation(
                "Server handshake must start with ClientHello".to_string(),
            ));
        };
        let client_random = ch.random;
        let hello_epoch = hello.epoch;

        let provider = config.crypto_provider();
        let random = provider
            .random_array::<32>()
            .map(Random)
            .map_err(Error::CryptoError)?;
        let session_id = provider
            .random_array::<32>()
            .map(SessionId)
            .map_err(Error::CryptoError)?;

        let client_auth = if config.client_auth_required() {
            ClientAuth::Required
        } else if config.client_auth_wanted() {
            ClientAuth::Wanted
        } else {
            ClientAuth::None
        };

        let mut engine = Engine::new(config, epoch);
        engine.set_sequence(hello.message_seq);
        engine.insert_incoming(hello);

        Ok(Server {
            state: State::AwaitClientHello,
            engine,
            random,
            session_id,
            client_random,
            hello_epoch,
            client_auth,
            virtual_host: None,
            cipher_suite: None,
            client_certificate_type: None,
            server_certificate_type: None,
            local_key: None,
            connection_id,
            key_exchange: None,
            client_certificate: None,
            psk: None,
            client_identity: None,
            master_secret: None,
            peer_identity: None,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn state(&self) -> HandshakeState {
        self.state.phase()
    }

    pub fn client_random(&self) -> &Random {
        &self.client_random
    }

    pub fn hello_epoch(&self) -> u16 {
        self.hello_epoch
    }

    pub fn accepts_epoch(&self, epoch: u16) -> bool {
        epoch == self.engine.epoch()
    }

    pub fn handle_message(&mut self, message: Message) -> Result<(), Error> {
        self.engine.insert_incoming(message);
        self.make_progress()
    }

    pub fn make_progress(&mut self) -> Result<(), Error> {
        loop {
            let prev_state = self.state;

            let new_state = prev_state.make_progress(self)?;
            if prev_state != new_state {
                self.state = new_state;
                trace!("{:?} -> {:?}", prev_state, new_state);
            } else {
                break;
            }
        }
        Ok(())
    }

    pub fn established(&self) -> Option<Established> {
        if self.state != State::Established {
            return None;
        }

        let scheme = match self.cipher_suite?.key_exchange() {
            KeyExchangeAlgorithm::Psk => CredentialScheme::Psk,
            _ => match self.server_certificate_type? {
                CertificateType::RawPublicKey => CredentialScheme::RawPublicKey,
                CertificateType::X509 => CredentialScheme::X509,
            },
        };

        Some(Established {
            identity: self.peer_identity.clone()?,
            scheme,
            virtual_host: self.virtual_host.clone(),
            epoch: self.engine.epoch(),
            session_id: self.session_id,
            cipher_suite: self.cipher_suite?,
            connection_id: self.connection_id.clone(),
            master_secret: self.master_secret.clone()?,
        })
    }

    fn key_exchange_algorithm(&self) -> KeyExchangeAlgorithm {
        self.cipher_suite
            .map(|s| s.key_exchange())
            .unwrap_or(KeyExchangeAlgorithm::Unknown)
    }

    fn master_secret(&self) -> Result<&[u8], Error> {
        self.master_secret
            .as_deref()
            .map(|m| m.as_slice())
            .ok_or_else(|| Error::ProtocolViolation("No master secret".to_string()))
    }

    /// Pick the first suite of the client's list we can serve.
    fn negotiate(&mut self, hello: &ClientHello) -> Result<(), Error> {
        let config = self.engine.config();
        let resolver = config.credentials();
        let vhost = self.virtual_host.as_ref();

        for suite in &hello.cipher_suites {
            match suite.key_exchange() {
                KeyExchangeAlgorithm::Psk => {
                    if !resolver.supports(CredentialScheme::Psk) {
                        continue;
                    }
                    self.cipher_suite = Some(*suite);
                    return Ok(());
                }
                KeyExchangeAlgorithm::Ecdhe => {
                    let Some(key) = config.local_credentials().key_for(vhost) else {
                        continue;
                    };
                    if !hello.server_certificate_types.contains(&key.certificate_type()) {
                        continue;
                    }
                    if config.crypto_provider().kx_group(NamedGroup::Secp256r1).is_none() {
                        continue;
                    }

                    let client_type = if self.client_auth == ClientAuth::None {
                        None
                    } else {
                        hello
                            .client_certificate_types
                            .iter()
                            .copied()
                            .find(|t| resolver.supports(scheme_of(*t)))
                    };
                    if self.client_auth == ClientAuth::Required && client_type.is_none() {
                        trace!("Skipping {:?}: client can not authenticate", suite);
                        continue;
                    }

                    self.server_certificate_type = Some(key.certificate_type());
                    self.client_certificate_type = client_type;
                    self.local_key = Some(key.clone());
                    self.cipher_suite = Some(*suite);
                    return Ok(());
                }
                KeyExchangeAlgorithm::Unknown => {}
            }
        }

        Err(self.engine.fail(
            AlertDescription::HandshakeFailure,
            Error::AuthenticationFailure(format!(
                "No acceptable cipher suite in {:?}",
                hello.cipher_suites
            )),
        ))
    }
}

fn scheme_of(certificate_type: CertificateType) -> CredentialScheme {
    match certificate_type {
        CertificateType::RawPublicKey => CredentialScheme::RawPublicKey,
        CertificateType::X509 => CredentialScheme::X509,
    }
}

impl State {
    /// The coarse handshake phase of this state.
    fn phase(&self) -> HandshakeState {
        match self {
            State::AwaitClientHello
            | State::SendServerHello
            | State::SendCertificate
            | State::SendServerKeyExchange
            | State::SendCertificateRequest
            | State::SendServerHelloDone => HandshakeState::WaitClientHello,
            State::AwaitCertificate
            | State::AwaitClientKeyExchange
            | State::AwaitCertificateVerify => HandshakeState::WaitCredentialProof,
            State::AwaitFinished | State::SendFinished => HandshakeState::WaitFinished,
            State::Established => HandshakeState::Established,
        }
    }

    fn make_progress(self, server: &mut Server) -> Result<Self, Error> {
        match self {
            State::AwaitClientHello => self.await_client_hello(server),
            State::SendServerHello => self.send_server_hello(server),
            State::SendCertificate => self.send_certificate(server),
            State::SendServerKeyExchange => self.send_server_key_exchange(server),
            State::SendCertificateRequest => self.send_certificate_request(server),
            State::SendServerHelloDone => self.send_server_hello_done(server),
            State::AwaitCertificate => self.await_certificate(server),
            State::AwaitClientKeyExchange => self.await_client_key_exchange(server),
            State::AwaitCertificateVerify => self.await_certificate_verify(server),
            State::AwaitFinished => self.await_finished(server),
            State::SendFinished => self.send_finished(server),
            State::Established => self.established(server),
        }
    }

    fn await_client_hello(self, server: &mut Server) -> Result<Self, Error> {
        let maybe = server.engine.next_handshake(&[MessageType::ClientHello])?;

        let Some(message) = maybe else {
            return Ok(self);
        };

        let Body::ClientHello(ch) = message.body else {
            return Ok(self);
        };

        let router = SniRouter::new(server.engine.config().use_server_name_indication());
        server.virtual_host = router.route(&ch);

        server.negotiate(&ch)?;

        debug!(
            "Selected {:?} for virtual host {:?}",
            server.cipher_suite, server.virtual_host
        );

        server.engine.flight_begin(Some(MessageType::ClientHello));

        Ok(State::SendServerHello)
    }

    fn send_server_hello(self, server: &mut Server) -> Result<Self, Error> {
        let Some(cipher_suite) = server.cipher_suite else {
            return Err(Error::ProtocolViolation("No cipher suite selected".to_string()));
        };

        let hello = ServerHello {
            random: server.random,
            session_id: server.session_id,
            cipher_suite,
            client_certificate_type: server.client_certificate_type,
            server_certificate_type: server.server_certificate_type,
            connection_id: server.connection_id.clone(),
        };
        server.engine.create_handshake(Body::ServerHello(hello));

        match cipher_suite.key_exchange() {
            KeyExchangeAlgorithm::Ecdhe => Ok(State::SendCertificate),
            _ => Ok(State::SendServerHelloDone),
        }
    }

    fn send_certificate(self, server: &mut Server) -> Result<Self, Error> {
        let body = match server.local_key.as_ref().map(|k| k.certificate()) {
            Some(LocalCertificate::RawPublicKey(spki)) => CertificateBody::RawPublicKey(spki.clone()),
            Some(LocalCertificate::X509(chain)) => CertificateBody::X509(chain.clone()),
            None => return Err(Error::ConfigError("No own key".to_string())),
        };

        server.engine.create_handshake(Body::Certificate(body));

        Ok(State::SendServerKeyExchange)
    }

    fn send_server_key_exchange(self, server: &mut Server) -> Result<Self, Error> {
        let config = server.engine.config();
        let provider = config.crypto_provider();

        let group = provider
            .kx_group(NamedGroup::Secp256r1)
            .ok_or_else(|| Error::CryptoError("P-256 unavailable".to_string()))?;
        let exchange = group.start_exchange().map_err(Error::CryptoError)?;
        let public_key = exchange.pub_key().to_vec();

        let signed_data = ServerKeyExchange::signed_params(
            &server.client_random.0,
            &server.random.0,
            group.name(),
            &public_key,
        );

        let Some(key) = &server.local_key else {
            return Err(Error::ConfigError("No own key".to_string()));
        };
        let mut signer = provider
            .key_provider
            .load_private_key(key.private_key())
            .map_err(|e| Error::ConfigError(format!("Bad own private key: {}", e)))?;

        let mut signature = Vec::new();
        signer
            .sign(&signed_data, &mut signature)
            .map_err(|e| Error::CryptoError(format!("Signing failed: {}", e)))?;

        server.key_exchange = Some(exchange);
        server
            .engine
            .create_handshake(Body::ServerKeyExchange(ServerKeyExchange::Ecdhe {
                group: group.name(),
                public_key,
                signature,
            }));

        Ok(State::SendCertificateRequest)
    }

    fn send_certificate_request(self, server: &mut Server) -> Result<Self, Error> {
        if let Some(certificate_type) = server.client_certificate_type {
            server
                .engine
                .create_handshake(Body::CertificateRequest(CertificateRequest {
                    certificate_types: vec![certificate_type],
                }));
        }

        Ok(State::SendServerHelloDone)
    }

    fn send_server_hello_done(self, server: &mut Server) -> Result<Self, Error> {
        server.engine.create_handshake(Body::ServerHelloDone);

        if server.client_certificate_type.is_some() {
            Ok(State::AwaitCertificate)
        } else {
            Ok(State::AwaitClientKeyExchange)
        }
    }

    fn await_certificate(self, server: &mut Server) -> Result<Self, Error> {
        let maybe = server.engine.next_handshake(&[MessageType::Certificate])?;

        let Some(message) = maybe else {
            return Ok(self);
        };

        // The client flight has started, our flight arrived.
        server.engine.flight_stop_resend_timers();

        let Body::Certificate(body) = message.body else {
            return Ok(self);
        };

        let provider = server.engine.config().crypto_provider();
        let (scheme, hint) = match (&body, server.client_certificate_type) {
            (CertificateBody::Empty, _) => {
                if server.client_auth == ClientAuth::Required {
                    return Err(server.engine.fail(
                        AlertDescription::HandshakeFailure,
                        Error::AuthenticationFailure(
                            "Client declined required authentication".to_string(),
                        ),
                    ));
                }
                debug!("Client declined authentication");
                return Ok(State::AwaitClientKeyExchange);
            }
            (CertificateBody::RawPublicKey(spki), Some(CertificateType::RawPublicKey)) => {
                (CredentialScheme::RawPublicKey, raw_key_fingerprint(spki))
            }
            (CertificateBody::X509(chain), Some(CertificateType::X509)) if !chain.is_empty() => {
                let subject = X509Verifier::new(provider)
                    .subject_of(&chain[0])
                    .map_err(|e| server.engine.fail(AlertDescription::BadCertificate, e))?;
                (CredentialScheme::X509, subject)
            }
            _ => {
                return Err(server.engine.fail(
                    AlertDescription::UnsupportedCertificate,
                    Error::AuthenticationFailure(
                        "Client certificate of unrequested type".to_string(),
                    ),
                ));
            }
        };

        let Some(record) = server.engine.config().credentials().resolve(
            scheme,
            &hint,
            server.virtual_host.as_ref(),
        ) else {
            return Err(server.engine.fail(
                AlertDescription::BadCertificate,
                Error::AuthenticationFailure(format!("Unknown client credential {}", hint)),
            ));
        };

        trace!("Client credential {} resolved", hint);
        server.client_certificate = Some(PeerCertificate { body, record });

        Ok(State::AwaitClientKeyExchange)
    }

    fn await_client_key_exchange(self, server: &mut Server) -> Result<Self, Error> {
        let maybe = server
            .engine
            .next_handshake(&[MessageType::ClientKeyExchange])?;

        let Some(message) = maybe else {
            return Ok(self);
        };

        server.engine.flight_stop_resend_timers();

        let Body::ClientKeyExchange(cke) = message.body else {
            return Ok(self);
        };

        let pre_master_secret = match (server.key_exchange_algorithm(), cke) {
            (KeyExchangeAlgorithm::Psk, ClientKeyExchange::Psk { identity }) => {
                let Some(record) = server.engine.config().credentials().resolve(
                    CredentialScheme::Psk,
                    &identity,
                    server.virtual_host.as_ref(),
                ) else {
                    return Err(server.engine.fail(
                        AlertDescription::UnknownPskIdentity,
                        Error::AuthenticationFailure(format!("Unknown PSK identity {}", identity)),
                    ));
                };

                let KeyMaterial::PreSharedKey(secret) = record.material()
                else {
                    return Err(server.engine.fail(
                        AlertDescription::InternalError,
                        Error::AuthenticationFailure("PSK credential without secret".to_string()),
                    ));
                };

                let pre_master_secret = psk_pre_master_secret(secret);
                trace!("PSK identity {} resolved", identity);
                server.psk = Some((identity, record));
                pre_master_secret
            }
            (KeyExchangeAlgorithm::Ecdhe, ClientKeyExchange::Ecdhe { public_key }) => {
                let Some(exchange) = server.key_exchange.take() else {
                    return Err(Error::ProtocolViolation("No key exchange".to_string()));
                };
                let mut shared = Zeroizing::new(Vec::new());
                exchange.complete(&public_key, &mut shared).map_err(|e| {
                    server.engine.fail(
                        AlertDescription::IllegalParameter,
                        Error::CryptoError(format!("Key exchange failed: {}", e)),
                    )
                })?;
                shared
            }
            (_, cke) => {
                return Err(server.engine.fail(
                    AlertDescription::UnexpectedMessage,
                    Error::ProtocolViolation(format!(
                        "{:?} does not match negotiated {:?}",
                        cke, server.cipher_suite
                    )),
                ));
            }
        };

        let master_secret = server.engine.derive_master_secret(
            &pre_master_secret,
            &server.client_random,
            &server.random,
        )?;
        server.master_secret = Some(master_secret);

        if server.client_certificate.is_some() {
            Ok(State::AwaitCertificateVerify)
        } else {
            Ok(State::AwaitFinished)
        }
    }

    fn await_certificate_verify(self, server: &mut Server) -> Result<Self, Error> {
        let transcript_len_before = server.engine.transcript().len();

        let maybe = server
            .engine
            .next_handshake(&[MessageType::CertificateVerify])?;

        let Some(message) = maybe else {
            return Ok(self);
        };

        let Body::CertificateVerify(verify) = message.body else {
            return Ok(self);
        };

        let Some(PeerCertificate { body, record }) = &server.client_certificate else {
            return Err(Error::ProtocolViolation("No client certificate".to_string()));
        };

        let signed_data = &server.engine.transcript()[..transcript_len_before];
        let proof = match body {
            CertificateBody::RawPublicKey(spki) => Proof::RawPublicKey {
                public_key: spki,
                signed_data,
                signature: &verify.signature,
            },
            CertificateBody::X509(chain) => Proof::X509 {
                chain,
                signed_data,
                signature: &verify.signature,
            },
            CertificateBody::Empty => {
                return Err(Error::ProtocolViolation("No client certificate".to_string()));
            }
        };

        let scope = VerifyScope {
            virtual_host: server.virtual_host.as_ref(),
            now: SystemTime::now(),
        };
        let verified = IdentityVerifier::for_scheme(
            record.scheme(),
            server.engine.config().crypto_provider(),
        )
        .verify(&proof, record, &scope);

        match verified {
            Ok(identity) => server.client_identity = Some(identity),
            Err(e) => return Err(server.engine.fail(AlertDescription::BadCertificate, e)),
        }

        Ok(State::AwaitFinished)
    }

    fn await_finished(self, server: &mut Server) -> Result<Self, Error> {
        let transcript_len_before = server.engine.transcript().len();

        let maybe = server.engine.next_handshake(&[MessageType::Finished])?;

        let Some(message) = maybe else {
            return Ok(self);
        };

        let Body::Finished(finished) = message.body else {
            return Ok(self);
        };

        let expected = server.engine.generate_verify_data(
            server.master_secret()?,
            true,
            transcript_len_before,
        )?;

        let proven = match &server.psk {
            Some((identity, record)) => {
                let proof = Proof::Psk {
                    identity,
                    expected: &expected,
                    received: &finished.verify_data,
                };
                let scope = VerifyScope {
                    virtual_host: server.virtual_host.as_ref(),
                    now: SystemTime::now(),
                };
                let verifier = IdentityVerifier::for_scheme(
                    CredentialScheme::Psk,
                    server.engine.config().crypto_provider(),
                );
                match verifier.verify(&proof, record, &scope) {
                    Ok(identity) => Some(identity),
                    Err(e) => return Err(server.engine.fail(AlertDescription::DecryptError, e)),
                }
            }
            None => {
                if !bool::from(expected.ct_eq(&finished.verify_data)) {
                    return Err(server.engine.fail(
                        AlertDescription::DecryptError,
                        Error::AuthenticationFailure("Client Finished mismatch".to_string()),
                    ));
                }
                server.client_identity.clone()
            }
        };

        // Without client authentication the peer is anonymous for every scheme.
        let identity = match (server.client_auth, proven) {
            (ClientAuth::None, _) => VerifiedIdentity::Anonymous,
            (_, Some(identity)) => identity,
            (ClientAuth::Wanted, None) => VerifiedIdentity::Anonymous,
            (ClientAuth::Required, None) => {
                return Err(server.engine.fail(
                    AlertDescription::HandshakeFailure,
                    Error::AuthenticationFailure("Client did not authenticate".to_string()),
                ));
            }
        };

        server.peer_identity = Some(identity);

        Ok(State::SendFinished)
    }

    fn send_finished(self, server: &mut Server) -> Result<Self, Error> {
        let transcript_len = server.engine.transcript().len();
        let verify_data =
            server
                .engine
                .generate_verify_data(server.master_secret()?, false, transcript_len)?;

        // Kept for resends when the client repeats its Finished, but never
        // retransmitted on a timer.
        server.engine.flight_begin(Some(MessageType::Finished));
        server
            .engine
            .create_handshake(Body::Finished(Finished { verify_data }));
        server.engine.flight_stop_resend_timers();

        Ok(State::Established)
    }

    fn established(self, server: &mut Server) -> Result<Self, Error> {
        if server.engine.has_next_handshake() {
            server.engine.next_handshake(&[])?;
        }
        Ok(self)
    }
}
