//! RustCrypto cryptographic provider implementation.
//!
//! A pure Rust backend built on crates from the
//! [RustCrypto](https://github.com/RustCrypto) organization. This is the provider
//! [`Config::builder()`](crate::Config::builder) falls back to when none was set
//! explicitly or installed as process default.
//!
//! ```
//! use dtls_connector::Config;
//! use dtls_connector::crypto::rust_crypto;
//!
//! let config = Config::builder()
//!     .with_crypto_provider(rust_crypto::default_provider())
//!     .build()
//!     .unwrap();
//! # let _ = config;
//! ```

mod hash;
mod hmac;
mod kx_group;
mod random;
mod sign;
mod x509;

use crate::crypto::provider::CryptoProvider;

/// Get the default RustCrypto-based crypto provider.
///
/// # Supported Key Exchange Groups
///
/// - `secp256r1` (P-256, NIST Curve)
///
/// # Supported Signature Algorithms
///
/// - ECDSA with P-256 and SHA-256, for raw public keys and certificates
///
/// # Key Formats
///
/// The key provider supports loading private keys in:
/// - PKCS#8 DER format (most common)
/// - SEC1 DER format (OpenSSL EC private key format)
/// - PEM encoded PKCS#8
///
/// # Random Number Generation
///
/// Uses `OsRng` from the `rand` crate.
pub fn default_provider() -> CryptoProvider {
    CryptoProvider {
        kx_groups: kx_group::ALL_KX_GROUPS,
        signature_verification: &sign::SIGNATURE_VERIFIER,
        certificate_verification: &x509::CERTIFICATE_VERIFIER,
        key_provider: &sign::KEY_PROVIDER,
        secure_random: &random::SECURE_RANDOM,
        hash_provider: &hash::HASH_PROVIDER,
        hmac_provider: &hmac::HMAC_PROVIDER,
        prf_provider: &hmac::PRF_PROVIDER,
    }
}
