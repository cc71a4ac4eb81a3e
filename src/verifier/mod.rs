//! Verification of peer proofs against resolved credentials.
//!
//! One variant per authentication scheme. Each checks a [`Proof`] taken from
//! the handshake against a [`CredentialRecord`] and yields the
//! [`VerifiedIdentity`] the session will report.

mod psk;
mod rpk;
mod x509;

use std::time::SystemTime;

pub use psk::PskVerifier;
pub use rpk::RawPublicKeyVerifier;
pub use x509::X509Verifier;

use crate::credential::{CredentialRecord, CredentialScheme};
use crate::crypto::CryptoProvider;
use crate::identity::VerifiedIdentity;
use crate::sni::ServerName;
use crate::Error;

/// What the peer presented in the handshake.
#[derive(Debug, Clone, Copy)]
pub enum Proof<'a> {
    /// The peer's Finished MAC, next to the one derived from the resolved secret.
    Psk {
        identity: &'a str,
        expected: &'a [u8],
        received: &'a [u8],
    },
    /// A signature over `signed_data` made with the presented raw key.
    RawPublicKey {
        public_key: &'a [u8],
        signed_data: &'a [u8],
        signature: &'a [u8],
    },
    /// A signature over `signed_data` made with the leaf key of `chain`.
    X509 {
        chain: &'a [Vec<u8>],
        signed_data: &'a [u8],
        signature: &'a [u8],
    },
}

impl Proof<'_> {
    pub fn scheme(&self) -> CredentialScheme {
        match self {
            Proof::Psk { .. } => CredentialScheme::Psk,
            Proof::RawPublicKey { .. } => CredentialScheme::RawPublicKey,
            Proof::X509 { .. } => CredentialScheme::X509,
        }
    }
}

/// Context a proof is verified in.
#[derive(Debug, Clone, Copy)]
pub struct VerifyScope<'a> {
    /// Virtual host of the handshake, if SNI routing selected one.
    pub virtual_host: Option<&'a ServerName>,
    /// Wall clock time for certificate validity.
    pub now: SystemTime,
}

/// Scheme specific verification.
#[derive(Debug, Clone)]
pub enum IdentityVerifier {
    Psk(PskVerifier),
    RawPublicKey(RawPublicKeyVerifier),
    X509(X509Verifier),
}

impl IdentityVerifier {
    pub fn for_scheme(scheme: CredentialScheme, provider: &CryptoProvider) -> Self {
        match scheme {
            CredentialScheme::Psk => IdentityVerifier::Psk(PskVerifier),
            CredentialScheme::RawPublicKey => {
                IdentityVerifier::RawPublicKey(RawPublicKeyVerifier::new(provider))
            }
            CredentialScheme::X509 => IdentityVerifier::X509(X509Verifier::new(provider)),
        }
    }

    pub fn scheme(&self) -> CredentialScheme {
        match self {
            IdentityVerifier::Psk(_) => CredentialScheme::Psk,
            IdentityVerifier::RawPublicKey(_) => CredentialScheme::RawPublicKey,
            IdentityVerifier::X509(_) => CredentialScheme::X509,
        }
    }

    /// Check `proof` against `credential`.
    ///
    /// Fails with [`Error::AuthenticationFailure`] on any mismatch, including a
    /// proof or credential of another scheme.
    pub fn verify(
        &self,
        proof: &Proof<'_>,
        credential: &CredentialRecord,
        scope: &VerifyScope<'_>,
    ) -> Result<VerifiedIdentity, Error> {
        if proof.scheme() != self.scheme() || credential.scheme() != self.scheme() {
            return Err(Error::AuthenticationFailure(format!(
                "{:?} verifier given {:?} proof for {:?} credential",
                self.scheme(),
                proof.scheme(),
                credential.scheme()
            )));
        }

        let identity = match self {
            IdentityVerifier::Psk(v) => v.verify(proof, credential, scope)?,
            IdentityVerifier::RawPublicKey(v) => v.verify(proof, credential)?,
            IdentityVerifier::X509(v) => v.verify(proof, credential, scope)?,
        };

        debug!("Verified peer identity {}", identity);
        Ok(identity)
    }
}
