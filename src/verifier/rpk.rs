use super::Proof;
use crate::credential::{CredentialRecord, KeyMaterial};
use crate::crypto::{CryptoProvider, SignatureVerifier};
use crate::identity::{raw_key_fingerprint, VerifiedIdentity};
use crate::Error;

/// Verifies a signature made with a raw public key (RFC 7250).
#[derive(Debug, Clone, Copy)]
pub struct RawPublicKeyVerifier {
    signatures: &'static dyn SignatureVerifier,
}

impl RawPublicKeyVerifier {
    pub fn new(provider: &CryptoProvider) -> Self {
        RawPublicKeyVerifier {
            signatures: provider.signature_verification,
        }
    }

    pub(super) fn verify(
        &self,
        proof: &Proof<'_>,
        credential: &CredentialRecord,
    ) -> Result<VerifiedIdentity, Error> {
        let Proof::RawPublicKey {
            public_key,
            signed_data,
            signature,
        } = *proof
        else {
            return Err(Error::AuthenticationFailure(
                "expected raw public key proof".into(),
            ));
        };

        match credential.material() {
            KeyMaterial::PublicKey(pinned) if pinned.as_slice() == public_key => {}
            KeyMaterial::PublicKey(_) => {
                return Err(Error::AuthenticationFailure(
                    "raw public key does not match trusted key".into(),
                ));
            }
            KeyMaterial::AnyPublicKey => {}
            other => {
                return Err(Error::AuthenticationFailure(format!(
                    "raw public key checked against {:?}",
                    other
                )));
            }
        }

        self.signatures
            .verify_signature(public_key, signed_data, signature)
            .map_err(|e| Error::AuthenticationFailure(format!("Bad signature: {}", e)))?;

        Ok(VerifiedIdentity::RawKeyIdentity(raw_key_fingerprint(
            public_key,
        )))
    }
}
