use super::{Proof, VerifyScope};
use crate::credential::{CredentialRecord, KeyMaterial};
use crate::crypto::{CertificateVerifier, CryptoProvider, SignatureVerifier};
use crate::identity::{format_subject, VerifiedIdentity};
use crate::Error;

/// Verifies a certificate chain and a signature made with its leaf key.
#[derive(Debug, Clone, Copy)]
pub struct X509Verifier {
    certificates: &'static dyn CertificateVerifier,
    signatures: &'static dyn SignatureVerifier,
}

impl X509Verifier {
    pub fn new(provider: &CryptoProvider) -> Self {
        X509Verifier {
            certificates: provider.certificate_verification,
            signatures: provider.signature_verification,
        }
    }

    /// Formatted subject of a leaf certificate, the hint credentials are resolved by.
    pub fn subject_of(&self, cert_der: &[u8]) -> Result<String, Error> {
        let attributes = self
            .certificates
            .subject(cert_der)
            .map_err(|e| Error::AuthenticationFailure(format!("Bad certificate: {}", e)))?;
        Ok(format_subject(&attributes))
    }

    pub(super) fn verify(
        &self,
        proof: &Proof<'_>,
        credential: &CredentialRecord,
        scope: &VerifyScope<'_>,
    ) -> Result<VerifiedIdentity, Error> {
        let Proof::X509 {
            chain,
            signed_data,
            signature,
        } = *proof
        else {
            return Err(Error::AuthenticationFailure("expected certificate proof".into()));
        };

        let KeyMaterial::TrustAnchors(anchors) = credential.material() else {
            return Err(Error::AuthenticationFailure(format!(
                "certificate checked against {:?}",
                credential.material()
            )));
        };

        let leaf = chain
            .first()
            .ok_or_else(|| Error::AuthenticationFailure("empty certificate chain".into()))?;

        self.certificates
            .verify_chain(chain, anchors, scope.now)
            .map_err(|e| Error::AuthenticationFailure(format!("Chain rejected: {}", e)))?;

        let subject = self.subject_of(leaf)?;
        if subject != credential.identity_hint() {
            return Err(Error::AuthenticationFailure(format!(
                "certificate subject {} does not match credential {}",
                subject,
                credential.identity_hint()
            )));
        }

        let spki = self
            .certificates
            .public_key(leaf)
            .map_err(|e| Error::AuthenticationFailure(format!("Bad certificate: {}", e)))?;

        self.signatures
            .verify_signature(&spki, signed_data, signature)
            .map_err(|e| Error::AuthenticationFailure(format!("Bad signature: {}", e)))?;

        Ok(VerifiedIdentity::CertificateIdentity(subject))
    }
}
