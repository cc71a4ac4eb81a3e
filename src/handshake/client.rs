// DTLS Client Handshake Flow:
//
// 1. Client sends ClientHello
// 2. Server may answer with HelloVerifyRequest carrying a cookie
//    - Client resends ClientHello with the cookie
// 3. Server sends ServerHello, [Certificate, ServerKeyExchange,
//    CertificateRequest], ServerHelloDone
// 4. Client sends [Certificate], ClientKeyExchange, [CertificateVerify], Finished
// 5. Server verifies Finished and answers with its own Finished
// 6. Handshake complete

use std::sync::Arc;
use std::time::SystemTime;

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::engine::{psk_pre_master_secret, Engine};
use super::{Established, HandshakeState, PeerCertificate};
use crate::credential::{
    CredentialRecord, CredentialScheme, KeyMaterial, LocalCertificate, LocalKey,
};
use crate::identity::{raw_key_fingerprint, VerifiedIdentity};
use crate::message::{
    AlertDescription, Body, CertificateBody, CertificateType, CertificateVerify, CipherSuite,
    ClientHello, ClientKeyExchange, ConnectionId, Cookie, Finished, KeyExchangeAlgorithm,
    Message, MessageType, NamedGroup, Random, ServerKeyExchange, SessionId,
};
use crate::sni::ServerName;
use crate::verifier::{IdentityVerifier, Proof, VerifyScope, X509Verifier};
use crate::{Config, Error};

/// Client side of one handshake attempt.
pub(crate) struct Client {
    /// Current client state.
    state: State,

    /// Sequencing, transcript and flights.
    engine: Engine,

    /// Random unique data. Used for signature checks.
    random: Random,

    /// Host name sent in the ClientHello.
    server_name: Option<ServerName>,

    /// Scope of own and peer credentials. The server name when SNI is enabled here.
    virtual_host: Option<ServerName>,

    /// Cookie from a HelloVerifyRequest.
    cookie: Cookie,

    cipher_suites: Vec<CipherSuite>,
    client_certificate_types: Vec<CertificateType>,
    server_certificate_types: Vec<CertificateType>,

    /// Set by ServerHello.
    server_random: Option<Random>,
    session_id: Option<SessionId>,
    cipher_suite: Option<CipherSuite>,
    client_certificate_type: Option<CertificateType>,
    connection_id: Option<ConnectionId>,

    /// Server certificate and the credential it resolved to.
    server_certificate: Option<PeerCertificate>,

    /// Server ECDHE public key, once its signature verified.
    server_public_key: Option<Vec<u8>>,

    /// Verified server identity (ECDHE) before the Finished check.
    server_identity: Option<VerifiedIdentity>,

    /// Certificate types the server asked us to authenticate with.
    certificate_requested: Option<Vec<CertificateType>>,

    /// Key we presented in our Certificate.
    sent_key: Option<LocalKey>,

    /// Own PSK identity and the record used to verify the server's Finished.
    psk: Option<(String, CredentialRecord)>,

    master_secret: Option<Zeroizing<Vec<u8>>>,

    /// Verified identity of the server.
    peer_identity: Option<VerifiedIdentity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SendClientHello,
    AwaitServerHello,
    AwaitCertificate,
    AwaitServerKeyExchange,
    AwaitServerHelloDone,
    SendCertificate,
    SendClientKeyExchange,
    SendCertificateVerify,
    SendFinished,
    AwaitFinished,
    Established,
}

impl Client {
    /// Prepare a handshake towards a server.
    ///
    /// Fails with [`Error::ConfigError`] if the local credentials and the
    /// resolver leave no cipher suite to offer.
    pub fn new(
        config: Arc<Config>,
        epoch: u16,
        server_name: Option<ServerName>,
    ) -> Result<Client, Error> {
        let virtual_host = if config.use_server_name_indication() {
            server_name.clone()
        } else {
            None
        };

        let provider = config.crypto_provider();
        let resolver = config.credentials();
        let local = config.local_credentials();

        let mut server_certificate_types = Vec::new();
        if resolver.supports(CredentialScheme::RawPublicKey) {
            server_certificate_types.push(CertificateType::RawPublicKey);
        }
        if resolver.supports(CredentialScheme::X509) {
            server_certificate_types.push(CertificateType::X509);
        }

        let client_certificate_types = local
            .key_for(virtual_host.as_ref())
            .map(|k| vec![k.certificate_type()])
            .unwrap_or_default();

        let mut cipher_suites = Vec::new();
        if !server_certificate_types.is_empty()
            && provider.kx_group(NamedGroup::Secp256r1).is_some()
        {
            cipher_suites.push(CipherSuite::ECDHE_ECDSA_AES128_CCM_8);
        }
        if local.psk_for(virtual_host.as_ref()).is_some() {
            cipher_suites.push(CipherSuite::PSK_AES128_CCM_8);
        }

        if cipher_suites.is_empty() {
            return Err(Error::ConfigError(
                "No cipher suite: need an own PSK or trusted server credentials".to_string(),
            ));
        }

        let random = provider
            .random_array::<32>()
            .map(Random)
            .map_err(Error::CryptoError)?;

        Ok(Client {
            state: State::SendClientHello,
            engine: Engine::new(config, epoch),
            random,
            server_name,
            virtual_host,
            cookie: Cookie::default(),
            cipher_suites,
            client_certificate_types,
            server_certificate_types,
            server_random: None,
            session_id: None,
            cipher_suite: None,
            client_certificate_type: None,
            connection_id: None,
            server_certificate: None,
            server_public_key: None,
            server_identity: None,
            certificate_requested: None,
            sent_key: None,
            psk: None,
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

    /// Whether an inbound message with `epoch` belongs to this attempt.
    pub fn accepts_epoch(&self, epoch: u16) -> bool {
        // Until ServerHello the server may use any epoch.
        self.state == State::AwaitServerHello || epoch == self.engine.epoch()
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

    /// What the session needs, once established.
    pub fn established(&self) -> Option<Established> {
        if self.state != State::Established {
            return None;
        }

        let scheme = match self.cipher_suite?.key_exchange() {
            KeyExchangeAlgorithm::Psk => CredentialScheme::Psk,
            _ => self.server_certificate.as_ref()?.record.scheme(),
        };

        Some(Established {
            identity: self.peer_identity.clone()?,
            scheme,
            virtual_host: self.virtual_host.clone(),
            epoch: self.engine.epoch(),
            session_id: self.session_id?,
            cipher_suite: self.cipher_suite?,
            connection_id: self.connection_id.clone(),
            master_secret: self.master_secret.clone()?,
        })
    }

    fn server_random(&self) -> Result<Random, Error> {
        self.server_random
            .ok_or_else(|| Error::ProtocolViolation("No server random".to_string()))
    }

    fn master_secret(&self) -> Result<&[u8], Error> {
        self.master_secret
            .as_deref()
            .map(|m| m.as_slice())
            .ok_or_else(|| Error::ProtocolViolation("No master secret".to_string()))
    }

    fn key_exchange(&self) -> KeyExchangeAlgorithm {
        self.cipher_suite
            .map(|s| s.key_exchange())
            .unwrap_or(KeyExchangeAlgorithm::Unknown)
    }
}

impl State {
    /// The coarse handshake phase of this state.
    fn phase(&self) -> HandshakeState {
        match self {
            State::SendClientHello => HandshakeState::Start,
            State::AwaitServerHello => HandshakeState::WaitServerHello,
            State::AwaitCertificate | State::AwaitServerKeyExchange | State::AwaitServerHelloDone => {
                HandshakeState::WaitCredentialProof
            }
            State::SendCertificate
            | State::SendClientKeyExchange
            | State::SendCertificateVerify
            | State::SendFinished
            | State::AwaitFinished => HandshakeState::WaitFinished,
            State::Established => HandshakeState::Established,
        }
    }

    fn make_progress(self, client: &mut Client) -> Result<Self, Error> {
        match self {
            State::SendClientHello => self.send_client_hello(client),
            State::AwaitServerHello => self.await_server_hello(client),
            State::AwaitCertificate => self.await_certificate(client),
            State::AwaitServerKeyExchange => self.await_server_key_exchange(client),
            State::AwaitServerHelloDone => self.await_server_hello_done(client),
            State::SendCertificate => self.send_certificate(client),
            State::SendClientKeyExchange => self.send_client_key_exchange(client),
            State::SendCertificateVerify => self.send_certificate_verify(client),
            State::SendFinished => self.send_finished(client),
            State::AwaitFinished => self.await_finished(client),
            State::Established => self.established(client),
        }
    }

    fn send_client_hello(self, client: &mut Client) -> Result<Self, Error> {
        let answers = if client.cookie.is_empty() {
            None
        } else {
            Some(MessageType::HelloVerifyRequest)
        };
        client.engine.flight_begin(answers);

        debug!(
            "Sending ClientHello offering {:?} to {:?}",
            client.cipher_suites, client.server_name
        );

        let hello = ClientHello {
            random: client.random,
            cookie: client.cookie.clone(),
            cipher_suites: client.cipher_suites.clone(),
            client_certificate_types: client.client_certificate_types.clone(),
            server_certificate_types: client.server_certificate_types.clone(),
            server_name: client.server_name.as_ref().map(|n| n.as_str().to_string()),
        };
        client.engine.create_handshake(Body::ClientHello(hello));

        Ok(State::AwaitServerHello)
    }

    fn await_server_hello(self, client: &mut Client) -> Result<Self, Error> {
        let maybe = client
            .engine
            .next_handshake(&[MessageType::HelloVerifyRequest, MessageType::ServerHello])?;

        let Some(message) = maybe else {
            return Ok(self);
        };

        let server_hello = match message.body {
            Body::HelloVerifyRequest(hvr) => {
                if hvr.cookie.is_empty() {
                    client
                        .engine
                        .violation("HelloVerifyRequest without cookie".to_string())?;
                    return Ok(self);
                }
                debug!("Got HelloVerifyRequest, resending ClientHello with cookie");
                client.cookie = hvr.cookie;
                client.engine.reset_client_for_hello_verify_request();
                return Ok(State::SendClientHello);
            }
            Body::ServerHello(sh) => sh,
            _ => return Ok(self),
        };

        // The server flight has started, our ClientHello arrived.
        client.engine.flight_stop_resend_timers();

        let suite = server_hello.cipher_suite;
        if !client.cipher_suites.contains(&suite) {
            return Err(client.engine.fail(
                AlertDescription::IllegalParameter,
                Error::ProtocolViolation(format!("Server selected unoffered {:?}", suite)),
            ));
        }

        let next = match suite.key_exchange() {
            KeyExchangeAlgorithm::Ecdhe => {
                let offered = server_hello
                    .server_certificate_type
                    .map(|t| client.server_certificate_types.contains(&t))
                    .unwrap_or(false);
                let own_ok = server_hello
                    .client_certificate_type
                    .map(|t| client.client_certificate_types.contains(&t))
                    .unwrap_or(true);
                if !offered || !own_ok {
                    return Err(client.engine.fail(
                        AlertDescription::UnsupportedCertificate,
                        Error::ProtocolViolation(format!(
                            "Server selected unoffered certificate types {:?}/{:?}",
                            server_hello.server_certificate_type,
                            server_hello.client_certificate_type
                        )),
                    ));
                }
                State::AwaitCertificate
            }
            KeyExchangeAlgorithm::Psk => State::AwaitServerHelloDone,
            KeyExchangeAlgorithm::Unknown => {
                return Err(client.engine.fail(
                    AlertDescription::IllegalParameter,
                    Error::ProtocolViolation(format!("Unknown cipher suite {:?}", suite)),
                ));
            }
        };

        client.engine.set_epoch(message.epoch);
        client.server_random = Some(server_hello.random);
        client.session_id = Some(server_hello.session_id);
        client.cipher_suite = Some(suite);
        client.client_certificate_type = server_hello.client_certificate_type;
        client.connection_id = server_hello.connection_id;

        debug!("Negotiated {:?} in epoch {}", suite, message.epoch);
        Ok(next)
    }

    fn await_certificate(self, client: &mut Client) -> Result<Self, Error> {
        let maybe = client.engine.next_handshake(&[MessageType::Certificate])?;

        let Some(message) = maybe else {
            return Ok(self);
        };

        let Body::Certificate(body) = message.body else {
            return Ok(self);
        };

        let provider = client.engine.config().crypto_provider();
        let (scheme, hint) = match &body {
            CertificateBody::RawPublicKey(spki) => {
                (CredentialScheme::RawPublicKey, raw_key_fingerprint(spki))
            }
            CertificateBody::X509(chain) if !chain.is_empty() => {
                let subject = X509Verifier::new(provider)
                    .subject_of(&chain[0])
                    .map_err(|e| client.engine.fail(AlertDescription::BadCertificate, e))?;
                (CredentialScheme::X509, subject)
            }
            _ => {
                return Err(client.engine.fail(
                    AlertDescription::BadCertificate,
                    Error::AuthenticationFailure("Server sent no certificate".to_string()),
                ));
            }
        };

        let Some(record) = client.engine.config().credentials().resolve(
            scheme,
            &hint,
            client.virtual_host.as_ref(),
        ) else {
            let alert = match scheme {
                CredentialScheme::X509 => AlertDescription::UnknownCa,
                _ => AlertDescription::CertificateUnknown,
            };
            return Err(client.engine.fail(
                alert,
                Error::AuthenticationFailure(format!("Unknown server credential {}", hint)),
            ));
        };

        trace!("Server credential {} resolved", hint);
        client.server_certificate = Some(PeerCertificate { body, record });

        Ok(State::AwaitServerKeyExchange)
    }

    fn await_server_key_exchange(self, client: &mut Client) -> Result<Self, Error> {
        let maybe = client
            .engine
            .next_handshake(&[MessageType::ServerKeyExchange])?;

        let Some(message) = maybe else {
            return Ok(self);
        };

        let Body::ServerKeyExchange(ServerKeyExchange::Ecdhe {
            group,
            public_key,
            signature,
        }) = message.body
        else {
            return Err(client.engine.fail(
                AlertDescription::UnexpectedMessage,
                Error::ProtocolViolation("Expected ECDHE ServerKeyExchange".to_string()),
            ));
        };

        if group != NamedGroup::Secp256r1 {
            return Err(client.engine.fail(
                AlertDescription::IllegalParameter,
                Error::ProtocolViolation(format!("Unsupported group {:?}", group)),
            ));
        }

        let server_random = client.server_random()?;
        let signed_data = ServerKeyExchange::signed_params(
            &client.random.0,
            &server_random.0,
            group,
            &public_key,
        );

        let Some(PeerCertificate { body, record }) = &client.server_certificate else {
            return Err(Error::ProtocolViolation("No server certificate".to_string()));
        };

        let proof = match body {
            CertificateBody::RawPublicKey(spki) => Proof::RawPublicKey {
                public_key: spki,
                signed_data: &signed_data,
                signature: &signature,
            },
            CertificateBody::X509(chain) => Proof::X509 {
                chain,
                signed_data: &signed_data,
                signature: &signature,
            },
            CertificateBody::Empty => {
                return Err(Error::ProtocolViolation("No server certificate".to_string()));
            }
        };

        let config = client.engine.config();
        let scope = VerifyScope {
            virtual_host: client.virtual_host.as_ref(),
            now: SystemTime::now(),
        };
        let verified = IdentityVerifier::for_scheme(record.scheme(), config.crypto_provider())
            .verify(&proof, record, &scope);

        let identity = match verified {
            Ok(identity) => identity,
            Err(e) => return Err(client.engine.fail(AlertDescription::BadCertificate, e)),
        };

        client.server_identity = Some(identity);
        client.server_public_key = Some(public_key);

        Ok(State::AwaitServerHelloDone)
    }

    fn await_server_hello_done(self, client: &mut Client) -> Result<Self, Error> {
        loop {
            let wanted: &[MessageType] = match client.key_exchange() {
                KeyExchangeAlgorithm::Psk => {
                    &[MessageType::ServerKeyExchange, MessageType::ServerHelloDone]
                }
                _ => &[MessageType::CertificateRequest, MessageType::ServerHelloDone],
            };

            let Some(message) = client.engine.next_handshake(wanted)? else {
                return Ok(self);
            };

            match message.body {
                Body::ServerKeyExchange(ske) => {
                    // PSK identity hints carry no meaning here.
                    trace!("Ignoring {:?}", ske);
                }
                Body::CertificateRequest(request) => {
                    debug!("Server requests certificate of {:?}", request.certificate_types);
                    client.certificate_requested = Some(request.certificate_types);
                }
                Body::ServerHelloDone => break,
                _ => {}
            }
        }

        client
            .engine
            .flight_begin(Some(MessageType::ServerHelloDone));

        if client.certificate_requested.is_some() {
            Ok(State::SendCertificate)
        } else {
            Ok(State::SendClientKeyExchange)
        }
    }

    fn send_certificate(self, client: &mut Client) -> Result<Self, Error> {
        let requested = client.certificate_requested.clone().unwrap_or_default();
        let negotiated = client.client_certificate_type;

        let key = client
            .engine
            .config()
            .local_credentials()
            .key_for(client.virtual_host.as_ref())
            .filter(|k| {
                Some(k.certificate_type()) == negotiated
                    && requested.contains(&k.certificate_type())
            })
            .cloned();

        let body = match key.as_ref().map(|k| k.certificate()) {
            Some(LocalCertificate::RawPublicKey(spki)) => CertificateBody::RawPublicKey(spki.clone()),
            Some(LocalCertificate::X509(chain)) => CertificateBody::X509(chain.clone()),
            None => {
                debug!("No matching own key, declining client authentication");
                CertificateBody::Empty
            }
        };

        client.sent_key = key;
        client.engine.create_handshake(Body::Certificate(body));

        Ok(State::SendClientKeyExchange)
    }

    fn send_client_key_exchange(self, client: &mut Client) -> Result<Self, Error> {
        let server_random = client.server_random()?;
        let config = client.engine.config();

        let (body, pre_master_secret) = match client.key_exchange() {
            KeyExchangeAlgorithm::Psk => {
                let Some(psk) = config.local_credentials().psk_for(client.virtual_host.as_ref())
                else {
                    return Err(client.engine.fail(
                        AlertDescription::InternalError,
                        Error::ConfigError("No own PSK identity".to_string()),
                    ));
                };

                let record = CredentialRecord::new(
                    CredentialScheme::Psk,
                    psk.identity(),
                    KeyMaterial::PreSharedKey(Zeroizing::new(psk.secret().to_vec())),
                    client.virtual_host.clone(),
                );
                let identity = psk.identity().to_string();
                let pre_master_secret = psk_pre_master_secret(psk.secret());
                client.psk = Some((identity.clone(), record));

                (
                    ClientKeyExchange::Psk { identity },
                    pre_master_secret,
                )
            }
            _ => {
                let group = config
                    .crypto_provider()
                    .kx_group(NamedGroup::Secp256r1)
                    .ok_or_else(|| Error::CryptoError("P-256 unavailable".to_string()))?;
                let exchange = group.start_exchange().map_err(Error::CryptoError)?;
                let public_key = exchange.pub_key().to_vec();

                let server_public_key = client
                    .server_public_key
                    .as_deref()
                    .ok_or_else(|| Error::ProtocolViolation("No server key".to_string()))?;

                let mut shared = Zeroizing::new(Vec::new());
                exchange
                    .complete(server_public_key, &mut shared)
                    .map_err(|e| {
                        client.engine.fail(
                            AlertDescription::IllegalParameter,
                            Error::CryptoError(format!("Key exchange failed: {}", e)),
                        )
                    })?;

                (ClientKeyExchange::Ecdhe { public_key }, shared)
            }
        };

        client.engine.create_handshake(Body::ClientKeyExchange(body));

        let master_secret = client.engine.derive_master_secret(
            &pre_master_secret,
            &client.random,
            &server_random,
        )?;
        client.master_secret = Some(master_secret);

        if client.sent_key.is_some() {
            Ok(State::SendCertificateVerify)
        } else {
            Ok(State::SendFinished)
        }
    }

    fn send_certificate_verify(self, client: &mut Client) -> Result<Self, Error> {
        let Some(key) = &client.sent_key else {
            return Ok(State::SendFinished);
        };

        let mut signer = client
            .engine
            .config()
            .crypto_provider()
            .key_provider
            .load_private_key(key.private_key())
            .map_err(|e| Error::ConfigError(format!("Bad own private key: {}", e)))?;

        let mut signature = Vec::new();
        signer
            .sign(client.engine.transcript(), &mut signature)
            .map_err(|e| Error::CryptoError(format!("Signing failed: {}", e)))?;

        client
            .engine
            .create_handshake(Body::CertificateVerify(CertificateVerify { signature }));

        Ok(State::SendFinished)
    }

    fn send_finished(self, client: &mut Client) -> Result<Self, Error> {
        let transcript_len = client.engine.transcript().len();
        let verify_data =
            client
                .engine
                .generate_verify_data(client.master_secret()?, true, transcript_len)?;

        client
            .engine
            .create_handshake(Body::Finished(Finished { verify_data }));

        Ok(State::AwaitFinished)
    }

    fn await_finished(self, client: &mut Client) -> Result<Self, Error> {
        let transcript_len_before = client.engine.transcript().len();

        let maybe = client.engine.next_handshake(&[MessageType::Finished])?;

        let Some(message) = maybe else {
            return Ok(self);
        };

        let Body::Finished(finished) = message.body else {
            return Ok(self);
        };

        let expected = client.engine.generate_verify_data(
            client.master_secret()?,
            false,
            transcript_len_before,
        )?;

        let identity = match &client.psk {
            Some((identity, record)) => {
                let proof = Proof::Psk {
                    identity,
                    expected: &expected,
                    received: &finished.verify_data,
                };
                let scope = VerifyScope {
                    virtual_host: client.virtual_host.as_ref(),
                    now: SystemTime::now(),
                };
                let verifier = IdentityVerifier::for_scheme(
                    CredentialScheme::Psk,
                    client.engine.config().crypto_provider(),
                );
                match verifier.verify(&proof, record, &scope) {
                    Ok(identity) => identity,
                    Err(e) => return Err(client.engine.fail(AlertDescription::DecryptError, e)),
                }
            }
            None => {
                if !bool::from(expected.ct_eq(&finished.verify_data)) {
                    return Err(client.engine.fail(
                        AlertDescription::DecryptError,
                        Error::AuthenticationFailure("Server Finished mismatch".to_string()),
                    ));
                }
                client
                    .server_identity
                    .clone()
                    .ok_or_else(|| Error::ProtocolViolation("Server not verified".to_string()))?
            }
        };

        client.engine.flight_stop_resend_timers();
        client.peer_identity = Some(identity);

        Ok(State::Established)
    }

    fn established(self, client: &mut Client) -> Result<Self, Error> {
        // Nothing follows the server Finished in this attempt.
        if client.engine.has_next_handshake() {
            client.engine.next_handshake(&[])?;
        }
        Ok(self)
    }
}
