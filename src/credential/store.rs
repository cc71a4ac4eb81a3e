use std::collections::{HashMap, HashSet};

use zeroize::Zeroizing;

use super::{CredentialRecord, CredentialResolver, CredentialScheme, KeyMaterial};
use crate::identity::raw_key_fingerprint;
use crate::sni::ServerName;

/// Peer credentials of one scope.
#[derive(Clone, Default)]
pub struct CredentialSet {
    psk: HashMap<String, Zeroizing<Vec<u8>>>,
    // fingerprint -> SubjectPublicKeyInfo
    raw_public_keys: HashMap<String, Vec<u8>>,
    trust_all_raw_public_keys: bool,
    trust_anchors: Vec<Vec<u8>>,
    pinned_subjects: HashSet<String>,
}

impl CredentialSet {
    fn resolve(
        &self,
        scheme: CredentialScheme,
        hint: &str,
        scope: Option<&ServerName>,
    ) -> Option<CredentialRecord> {
        let material = match scheme {
            CredentialScheme::Psk => {
                KeyMaterial::PreSharedKey(self.psk.get(hint)?.clone())
            }
            CredentialScheme::RawPublicKey => match self.raw_public_keys.get(hint) {
                Some(key) => KeyMaterial::PublicKey(key.clone()),
                None if self.trust_all_raw_public_keys => KeyMaterial::AnyPublicKey,
                None => return None,
            },
            CredentialScheme::X509 => {
                if self.trust_anchors.is_empty() {
                    return None;
                }
                if !self.pinned_subjects.is_empty() && !self.pinned_subjects.contains(hint) {
                    return None;
                }
                KeyMaterial::TrustAnchors(self.trust_anchors.clone())
            }
        };

        Some(CredentialRecord::new(scheme, hint, material, scope.cloned()))
    }

    fn supports(&self, scheme: CredentialScheme) -> bool {
        match scheme {
            CredentialScheme::Psk => !self.psk.is_empty(),
            CredentialScheme::RawPublicKey => {
                self.trust_all_raw_public_keys || !self.raw_public_keys.is_empty()
            }
            CredentialScheme::X509 => !self.trust_anchors.is_empty(),
        }
    }
}

/// In-memory [`CredentialResolver`] with optional per virtual host scopes.
///
/// A lookup scoped to a virtual host first consults that host's set. Whether
/// it then falls back to the default set is explicit configuration, see
/// [`CredentialStoreBuilder::fallback_to_default`].
#[derive(Clone)]
pub struct CredentialStore {
    default: CredentialSet,
    hosts: HashMap<ServerName, CredentialSet>,
    fallback: bool,
}

impl CredentialStore {
    pub fn builder() -> CredentialStoreBuilder {
        CredentialStoreBuilder {
            default: CredentialSet::default(),
            hosts: HashMap::new(),
            fallback: true,
        }
    }
}

impl CredentialResolver for CredentialStore {
    fn resolve(
        &self,
        scheme: CredentialScheme,
        identity_hint: &str,
        virtual_host: Option<&ServerName>,
    ) -> Option<CredentialRecord> {
        let Some(host) = virtual_host else {
            return self.default.resolve(scheme, identity_hint, None);
        };

        let scoped = self
            .hosts
            .get(host)
            .and_then(|set| set.resolve(scheme, identity_hint, Some(host)));

        if scoped.is_some() || !self.fallback {
            return scoped;
        }

        trace!("No {:?} credential for {} in {}, trying default", scheme, identity_hint, host);
        self.default.resolve(scheme, identity_hint, None)
    }

    fn supports(&self, scheme: CredentialScheme) -> bool {
        self.default.supports(scheme) || self.hosts.values().any(|s| s.supports(scheme))
    }
}

/// Builder for a [`CredentialStore`].
pub struct CredentialStoreBuilder {
    default: CredentialSet,
    hosts: HashMap<ServerName, CredentialSet>,
    fallback: bool,
}

impl CredentialStoreBuilder {
    /// Add a PSK identity to the default set.
    pub fn psk(mut self, identity: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        let secret = Zeroizing::new(secret.into());
        self.default.psk.insert(identity.into(), secret);
        self
    }

    /// Add a PSK identity valid only for handshakes scoped to `host`.
    pub fn psk_for(
        mut self,
        host: &ServerName,
        identity: impl Into<String>,
        secret: impl Into<Vec<u8>>,
    ) -> Self {
        let secret = Zeroizing::new(secret.into());
        self.host(host).psk.insert(identity.into(), secret);
        self
    }

    /// Trust a raw public key (DER SubjectPublicKeyInfo).
    pub fn raw_public_key(mut self, spki: Vec<u8>) -> Self {
        self.default
            .raw_public_keys
            .insert(raw_key_fingerprint(&spki), spki);
        self
    }

    /// Trust a raw public key for handshakes scoped to `host`.
    pub fn raw_public_key_for(mut self, host: &ServerName, spki: Vec<u8>) -> Self {
        self.host(host)
            .raw_public_keys
            .insert(raw_key_fingerprint(&spki), spki);
        self
    }

    /// Accept any raw public key whose signature verifies.
    ///
    /// Defaults to false.
    pub fn trust_all_raw_public_keys(mut self, trust: bool) -> Self {
        self.default.trust_all_raw_public_keys = trust;
        self
    }

    /// Add a DER trust anchor for certificate chains.
    pub fn trust_anchor(mut self, certificate: Vec<u8>) -> Self {
        self.default.trust_anchors.push(certificate);
        self
    }

    /// Add a DER trust anchor for handshakes scoped to `host`.
    pub fn trust_anchor_for(mut self, host: &ServerName, certificate: Vec<u8>) -> Self {
        self.host(host).trust_anchors.push(certificate);
        self
    }

    /// Only accept certificates with this formatted subject, e.g. `"C=CA,O=Acme,CN=node"`.
    ///
    /// Without pinned subjects any certificate chaining to a trust anchor is accepted.
    pub fn pin_subject(mut self, subject: impl Into<String>) -> Self {
        self.default.pinned_subjects.insert(subject.into());
        self
    }

    /// Whether a lookup scoped to a virtual host falls back to the default set
    /// when the host's own set has no match.
    ///
    /// Defaults to true.
    pub fn fallback_to_default(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn build(self) -> CredentialStore {
        CredentialStore {
            default: self.default,
            hosts: self.hosts,
            fallback: self.fallback,
        }
    }

    fn host(&mut self, host: &ServerName) -> &mut CredentialSet {
        self.hosts.entry(host.clone()).or_default()
    }
}
