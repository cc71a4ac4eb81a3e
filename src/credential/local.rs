use std::collections::HashMap;
use std::fmt;

use zeroize::Zeroizing;

use crate::certificate::{CertificateChain, DtlsCertificate, RawKeyPair};
use crate::message::CertificateType;
use crate::sni::ServerName;

/// An own PSK identity with its secret.
#[derive(Clone)]
pub struct PskIdentity {
    identity: String,
    secret: Zeroizing<Vec<u8>>,
}

impl PskIdentity {
    pub fn new(identity: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        PskIdentity {
            identity: identity.into(),
            secret: Zeroizing::new(secret.into()),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub(crate) fn secret(&self) -> &[u8] {
        &self.secret
    }
}

impl fmt::Debug for PskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PskIdentity")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// What an own key is presented as.
#[derive(Debug, Clone)]
pub enum LocalCertificate {
    /// DER SubjectPublicKeyInfo.
    RawPublicKey(Vec<u8>),
    /// DER certificates, leaf first.
    X509(Vec<Vec<u8>>),
}

/// An own private key and its public form.
#[derive(Clone)]
pub struct LocalKey {
    private_key: Zeroizing<Vec<u8>>,
    certificate: LocalCertificate,
}

impl LocalKey {
    /// Key presented as a raw public key. `private_key` is PKCS#8/SEC1 DER or PEM.
    pub fn raw_public_key(private_key: impl Into<Vec<u8>>, public_key: Vec<u8>) -> Self {
        LocalKey {
            private_key: Zeroizing::new(private_key.into()),
            certificate: LocalCertificate::RawPublicKey(public_key),
        }
    }

    /// Key presented with a certificate chain, leaf first.
    pub fn x509(private_key: impl Into<Vec<u8>>, chain: Vec<Vec<u8>>) -> Self {
        LocalKey {
            private_key: Zeroizing::new(private_key.into()),
            certificate: LocalCertificate::X509(chain),
        }
    }

    pub fn certificate(&self) -> &LocalCertificate {
        &self.certificate
    }

    pub fn certificate_type(&self) -> CertificateType {
        match self.certificate {
            LocalCertificate::RawPublicKey(_) => CertificateType::RawPublicKey,
            LocalCertificate::X509(_) => CertificateType::X509,
        }
    }

    pub(crate) fn private_key(&self) -> &[u8] {
        &self.private_key
    }
}

impl fmt::Debug for LocalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalKey")
            .field("certificate_type", &self.certificate_type())
            .finish_non_exhaustive()
    }
}

impl From<RawKeyPair> for LocalKey {
    fn from(pair: RawKeyPair) -> Self {
        LocalKey::raw_public_key(pair.private_key, pair.public_key)
    }
}

impl From<DtlsCertificate> for LocalKey {
    fn from(cert: DtlsCertificate) -> Self {
        LocalKey::x509(cert.private_key, vec![cert.certificate])
    }
}

impl From<CertificateChain> for LocalKey {
    fn from(chain: CertificateChain) -> Self {
        LocalKey::x509(chain.private_key, chain.chain)
    }
}

/// Credentials an endpoint presents about itself.
///
/// Entries for a virtual host take precedence over the default entries when a
/// handshake is scoped to that host.
#[derive(Debug, Clone, Default)]
pub struct LocalCredentials {
    psk: Option<PskIdentity>,
    psk_by_host: HashMap<ServerName, PskIdentity>,
    key: Option<LocalKey>,
    key_by_host: HashMap<ServerName, LocalKey>,
}

impl LocalCredentials {
    pub fn new() -> Self {
        LocalCredentials::default()
    }

    /// Set the default PSK identity.
    pub fn with_psk(mut self, psk: PskIdentity) -> Self {
        self.psk = Some(psk);
        self
    }

    /// Set the PSK identity used towards `host`.
    pub fn with_psk_for(mut self, host: ServerName, psk: PskIdentity) -> Self {
        self.psk_by_host.insert(host, psk);
        self
    }

    /// Set the default key.
    pub fn with_key(mut self, key: impl Into<LocalKey>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the key presented in handshakes scoped to `host`.
    pub fn with_key_for(mut self, host: ServerName, key: impl Into<LocalKey>) -> Self {
        self.key_by_host.insert(host, key.into());
        self
    }

    pub fn psk_for(&self, host: Option<&ServerName>) -> Option<&PskIdentity> {
        host.and_then(|h| self.psk_by_host.get(h))
            .or(self.psk.as_ref())
    }

    pub fn key_for(&self, host: Option<&ServerName>) -> Option<&LocalKey> {
        host.and_then(|h| self.key_by_host.get(h))
            .or(self.key.as_ref())
    }
}
