//! Credential resolution.
//!
//! A [`CredentialResolver`] answers "what key material belongs to this claimed
//! identity, in this virtual host?" for the three schemes. It never verifies
//! anything itself; that is the job of the [`IdentityVerifier`](crate::IdentityVerifier).

mod local;
mod store;

use std::fmt;

use zeroize::Zeroizing;

use crate::sni::ServerName;

pub use local::{LocalCertificate, LocalCredentials, LocalKey, PskIdentity};
pub use store::{CredentialSet, CredentialStore, CredentialStoreBuilder};

/// The three authentication schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialScheme {
    Psk,
    RawPublicKey,
    X509,
}

/// Key material a resolver returns for a claimed identity.
#[derive(Clone)]
pub enum KeyMaterial {
    /// Shared secret of a PSK identity.
    PreSharedKey(Zeroizing<Vec<u8>>),
    /// A pinned raw public key (DER SubjectPublicKeyInfo).
    PublicKey(Vec<u8>),
    /// Any raw public key is trusted once its signature verifies.
    AnyPublicKey,
    /// Certificates must chain to one of these DER trust anchors.
    TrustAnchors(Vec<Vec<u8>>),
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMaterial::PreSharedKey(_) => write!(f, "PreSharedKey(..)"),
            KeyMaterial::PublicKey(k) => write!(f, "PublicKey({} bytes)", k.len()),
            KeyMaterial::AnyPublicKey => write!(f, "AnyPublicKey"),
            KeyMaterial::TrustAnchors(a) => write!(f, "TrustAnchors({})", a.len()),
        }
    }
}

/// Resolved credential. Immutable once returned.
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    scheme: CredentialScheme,
    identity_hint: String,
    material: KeyMaterial,
    scope: Option<ServerName>,
}

impl CredentialRecord {
    pub fn new(
        scheme: CredentialScheme,
        identity_hint: impl Into<String>,
        material: KeyMaterial,
        scope: Option<ServerName>,
    ) -> Self {
        CredentialRecord {
            scheme,
            identity_hint: identity_hint.into(),
            material,
            scope,
        }
    }

    pub fn scheme(&self) -> CredentialScheme {
        self.scheme
    }

    /// PSK identity, key fingerprint or certificate subject this record was found for.
    pub fn identity_hint(&self) -> &str {
        &self.identity_hint
    }

    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }

    /// Virtual host whose credential set the record came from. `None` for the
    /// unscoped default set.
    pub fn scope(&self) -> Option<&ServerName> {
        self.scope.as_ref()
    }
}

/// Lookup of peer credentials.
///
/// Must be deterministic for identical inputs. For
/// [`CredentialScheme::RawPublicKey`] the hint is the key's fingerprint
/// ([`raw_key_fingerprint`](crate::identity::raw_key_fingerprint)), for
/// [`CredentialScheme::X509`] the formatted leaf subject.
pub trait CredentialResolver: Send + Sync {
    /// Resolve `identity_hint` under `virtual_host`, or `None` if unknown.
    fn resolve(
        &self,
        scheme: CredentialScheme,
        identity_hint: &str,
        virtual_host: Option<&ServerName>,
    ) -> Option<CredentialRecord>;

    /// Whether any credential of `scheme` can ever resolve.
    fn supports(&self, scheme: CredentialScheme) -> bool;
}
