//! Cryptographic collaborators used by the handshake engine.

pub mod provider;
pub mod rust_crypto;
mod validation;

// Re-export all provider traits and types.
// This allows users to do: use dtls_connector::crypto::{CryptoProvider, SigningKey, ...};
pub use provider::{ActiveKeyExchange, CertificateVerifier, CryptoProvider, CryptoSafe};
pub use provider::{HashProvider, HmacProvider, KeyProvider, PrfProvider};
pub use provider::{SecureRandom, SignatureVerifier, SigningKey, SubjectAttribute};
pub use provider::SupportedKxGroup;

pub use crate::message::NamedGroup;
