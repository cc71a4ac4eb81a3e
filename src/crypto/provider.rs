//! Cryptographic provider traits for pluggable crypto backends.
//!
//! The handshake engine never computes a hash, MAC or signature itself. All of
//! that is delegated to a [`CryptoProvider`], a struct of static references to
//! trait objects, each representing one capability:
//!
//! - **Key Exchange Groups** ([`SupportedKxGroup`]): Factory for ECDHE key exchanges
//! - **Signature Verification** ([`SignatureVerifier`]): Verify signatures made by a public key
//! - **Certificate Verification** ([`CertificateVerifier`]): Validate X.509 chains and read leaves
//! - **Key Provider** ([`KeyProvider`]): Parse and load private keys
//! - **Secure Random** ([`SecureRandom`]): Cryptographically secure RNG
//! - **Hash Provider** ([`HashProvider`]): SHA-256 digests
//! - **PRF Provider** ([`PrfProvider`]): TLS 1.2 PRF for key derivation
//! - **HMAC Provider** ([`HmacProvider`]): Compute HMAC signatures
//!
//! # Implementing a Custom Provider
//!
//! 1. Implement the required traits for your crypto backend
//! 2. Create static instances of your implementations
//! 3. Build a [`CryptoProvider`] struct with references to those statics
//!
//! ```
//! use dtls_connector::crypto::{rust_crypto, CryptoProvider, SecureRandom};
//!
//! #[derive(Debug)]
//! struct ZeroRandom;
//!
//! impl SecureRandom for ZeroRandom {
//!     fn fill(&self, buf: &mut [u8]) -> Result<(), String> {
//!         buf.fill(0);
//!         Ok(())
//!     }
//! }
//!
//! static ZERO_RANDOM: ZeroRandom = ZeroRandom;
//!
//! let provider = CryptoProvider {
//!     secure_random: &ZERO_RANDOM,
//!     ..rust_crypto::default_provider()
//! };
//! assert!(provider.validate().is_ok());
//! ```
//!
//! # Thread Safety
//!
//! All provider traits require `Send + Sync + UnwindSafe + RefUnwindSafe` since a
//! connector is driven from several threads at once.

use std::fmt::Debug;
use std::panic::{RefUnwindSafe, UnwindSafe};
use std::sync::OnceLock;
use std::time::SystemTime;

use crate::message::NamedGroup;

/// Marker trait for types that are safe to use in crypto provider components.
///
/// Automatically implemented for all types that satisfy the bounds.
pub trait CryptoSafe: Send + Sync + Debug + UnwindSafe + RefUnwindSafe {}

impl<T: Send + Sync + Debug + UnwindSafe + RefUnwindSafe> CryptoSafe for T {}

// ============================================================================
// Instance Traits (created by factories)
// ============================================================================

/// Signing key for generating digital signatures.
pub trait SigningKey: CryptoSafe {
    /// Sign data and write the DER encoded signature to `out`.
    fn sign(&mut self, data: &[u8], out: &mut Vec<u8>) -> Result<(), String>;

    /// DER encoded SubjectPublicKeyInfo of the matching public key.
    fn public_key_der(&self) -> Result<Vec<u8>, String>;
}

/// Active key exchange instance (ephemeral keypair for one handshake).
pub trait ActiveKeyExchange: CryptoSafe {
    /// Get the public key for this exchange.
    fn pub_key(&self) -> &[u8];

    /// Complete exchange with peer's public key, returning shared secret.
    fn complete(self: Box<Self>, peer_pub: &[u8], out: &mut Vec<u8>) -> Result<(), String>;

    /// Get the named group for this exchange.
    fn group(&self) -> NamedGroup;
}

// ============================================================================
// Factory Traits (used by CryptoProvider)
// ============================================================================

/// Key exchange group support (factory for ActiveKeyExchange).
pub trait SupportedKxGroup: CryptoSafe {
    /// Named group for this key exchange group.
    fn name(&self) -> NamedGroup;

    /// Start a new key exchange, generating ephemeral keypair.
    fn start_exchange(&self) -> Result<Box<dyn ActiveKeyExchange>, String>;
}

/// Signature verification against a bare public key.
pub trait SignatureVerifier: CryptoSafe {
    /// Verify a DER encoded signature on `data` using a DER encoded
    /// SubjectPublicKeyInfo.
    fn verify_signature(&self, spki_der: &[u8], data: &[u8], signature: &[u8])
        -> Result<(), String>;
}

/// One attribute of a certificate subject, in encoding order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectAttribute {
    /// Dotted attribute type OID, e.g. `2.5.4.3`.
    pub oid: String,
    pub value: String,
}

/// X.509 certificate chain validation.
pub trait CertificateVerifier: CryptoSafe {
    /// Validate `chain` (leaf first) against `trust_anchors` at time `now`.
    ///
    /// Every certificate must be inside its validity window and signed by the
    /// next one. The last certificate must be a trust anchor or signed by one.
    fn verify_chain(
        &self,
        chain: &[Vec<u8>],
        trust_anchors: &[Vec<u8>],
        now: SystemTime,
    ) -> Result<(), String>;

    /// DER encoded SubjectPublicKeyInfo of a certificate.
    fn public_key(&self, cert_der: &[u8]) -> Result<Vec<u8>, String>;

    /// Subject attributes of a certificate.
    fn subject(&self, cert_der: &[u8]) -> Result<Vec<SubjectAttribute>, String>;
}

/// Private key parser (factory for SigningKey).
pub trait KeyProvider: CryptoSafe {
    /// Parse and load a private key from DER/PEM bytes.
    fn load_private_key(&self, key_der: &[u8]) -> Result<Box<dyn SigningKey>, String>;
}

/// Secure random number generator.
pub trait SecureRandom: CryptoSafe {
    /// Fill buffer with cryptographically secure random bytes.
    fn fill(&self, buf: &mut [u8]) -> Result<(), String>;
}

/// Hash provider.
pub trait HashProvider: CryptoSafe {
    /// SHA-256 digest of `data`.
    fn sha256(&self, data: &[u8]) -> [u8; 32];
}

/// PRF (Pseudo-Random Function) for TLS 1.2 key derivation.
pub trait PrfProvider: CryptoSafe {
    /// TLS 1.2 PRF with SHA-256: PRF(secret, label, seed) writing `output_len`
    /// bytes to `out`.
    fn prf_tls12(
        &self,
        secret: &[u8],
        label: &str,
        seed: &[u8],
        out: &mut Vec<u8>,
        output_len: usize,
    ) -> Result<(), String>;
}

/// HMAC provider for computing HMAC signatures.
pub trait HmacProvider: CryptoSafe {
    /// Compute HMAC-SHA256(key, data) and return the result.
    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> Result<[u8; 32], String>;
}

// ============================================================================
// Core Provider Struct
// ============================================================================

/// Cryptographic provider for the handshake engine.
///
/// Uses static trait object references (`&'static dyn Trait`) so a provider is
/// cheap to clone into every [`Config`](crate::Config).
#[derive(Debug, Clone)]
pub struct CryptoProvider {
    /// Supported key exchange groups. P-256 is required.
    pub kx_groups: &'static [&'static dyn SupportedKxGroup],

    /// Signature verification for raw public keys and certificate leaves.
    pub signature_verification: &'static dyn SignatureVerifier,

    /// Chain validation and certificate inspection.
    pub certificate_verification: &'static dyn CertificateVerifier,

    /// Key provider for parsing private keys.
    pub key_provider: &'static dyn KeyProvider,

    /// Secure random number generator.
    pub secure_random: &'static dyn SecureRandom,

    /// Hash provider for transcript hashing and fingerprints.
    pub hash_provider: &'static dyn HashProvider,

    /// HMAC provider for cookies.
    pub hmac_provider: &'static dyn HmacProvider,

    /// PRF for master secret and Finished derivation.
    pub prf_provider: &'static dyn PrfProvider,
}

static DEFAULT: OnceLock<CryptoProvider> = OnceLock::new();

impl CryptoProvider {
    /// Install a default crypto provider for the process.
    ///
    /// Used by [`Config::builder()`](crate::Config::builder) when no explicit
    /// provider is specified. Returns the rejected provider if a default was
    /// already installed.
    pub fn install_default(provider: CryptoProvider) -> Result<(), CryptoProvider> {
        DEFAULT.set(provider)
    }

    /// Get the default crypto provider, if one has been installed.
    pub fn get_default() -> Option<&'static CryptoProvider> {
        DEFAULT.get()
    }

    /// Find a key exchange group by name.
    pub fn kx_group(&self, group: NamedGroup) -> Option<&'static dyn SupportedKxGroup> {
        self.kx_groups.iter().copied().find(|g| g.name() == group)
    }

    /// Fill a fixed size array with random bytes.
    pub(crate) fn random_array<const N: usize>(&self) -> Result<[u8; N], String> {
        let mut out = [0u8; N];
        self.secure_random.fill(&mut out)?;
        Ok(out)
    }
}
