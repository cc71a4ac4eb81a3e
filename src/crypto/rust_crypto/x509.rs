//! X.509 chain validation using `x509-cert`.

use std::time::SystemTime;

use der::{Decode, Encode};
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;
use sha2::{Digest, Sha256};
use spki::ObjectIdentifier;
use x509_cert::Certificate as X509Certificate;

use crate::crypto::provider::{CertificateVerifier, SubjectAttribute};

const OID_ECDSA_WITH_SHA256: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");

fn parse(cert_der: &[u8]) -> Result<X509Certificate, String> {
    X509Certificate::from_der(cert_der).map_err(|e| format!("Failed to parse certificate: {e}"))
}

fn spki_der(cert: &X509Certificate) -> Result<Vec<u8>, String> {
    cert.tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| format!("Failed to encode public key: {e}"))
}

fn check_validity(cert: &X509Certificate, now: SystemTime) -> Result<(), String> {
    let validity = &cert.tbs_certificate.validity;
    if now < validity.not_before.to_system_time() {
        return Err("Certificate is not yet valid".to_string());
    }
    if now > validity.not_after.to_system_time() {
        return Err("Certificate has expired".to_string());
    }
    Ok(())
}

/// Check that `cert` was signed by the holder of `issuer`.
fn check_signed_by(cert: &X509Certificate, issuer: &X509Certificate) -> Result<(), String> {
    if cert.tbs_certificate.issuer != issuer.tbs_certificate.subject {
        return Err("Issuer name does not match".to_string());
    }
    if cert.signature_algorithm.oid != OID_ECDSA_WITH_SHA256 {
        return Err(format!(
            "Unsupported certificate signature algorithm: {}",
            cert.signature_algorithm.oid
        ));
    }

    let tbs = cert
        .tbs_certificate
        .to_der()
        .map_err(|e| format!("Failed to encode tbsCertificate: {e}"))?;
    let signature = cert
        .signature
        .as_bytes()
        .ok_or_else(|| "Invalid certificate signature bitstring".to_string())?;

    let verifying_key = VerifyingKey::from_public_key_der(&spki_der(issuer)?)
        .map_err(|_| "Issuer key is not a P-256 key".to_string())?;
    let sig =
        Signature::from_der(signature).map_err(|_| "Invalid signature format".to_string())?;

    verifying_key
        .verify_prehash(&Sha256::digest(&tbs), &sig)
        .map_err(|_| "Certificate signature verification failed".to_string())
}

/// Certificate verifier implementation.
#[derive(Debug)]
pub(super) struct RustCryptoCertificateVerifier;

impl CertificateVerifier for RustCryptoCertificateVerifier {
    fn verify_chain(
        &self,
        chain: &[Vec<u8>],
        trust_anchors: &[Vec<u8>],
        now: SystemTime,
    ) -> Result<(), String> {
        if chain.is_empty() {
            return Err("Empty certificate chain".to_string());
        }

        let chain = chain
            .iter()
            .map(|der| parse(der))
            .collect::<Result<Vec<_>, _>>()?;
        let anchors = trust_anchors
            .iter()
            .map(|der| parse(der))
            .collect::<Result<Vec<_>, _>>()?;

        for cert in &chain {
            check_validity(cert, now)?;
        }
        for pair in chain.windows(2) {
            check_signed_by(&pair[0], &pair[1])?;
        }

        // The chain may end in the anchor itself or in a cert the anchor issued.
        let last = &chain[chain.len() - 1];
        let anchored = anchors.iter().any(|anchor| {
            anchor == last
                || (check_validity(anchor, now).is_ok() && check_signed_by(last, anchor).is_ok())
        });

        if !anchored {
            return Err("Certificate chain does not lead to a trust anchor".to_string());
        }
        Ok(())
    }

    fn public_key(&self, cert_der: &[u8]) -> Result<Vec<u8>, String> {
        spki_der(&parse(cert_der)?)
    }

    fn subject(&self, cert_der: &[u8]) -> Result<Vec<SubjectAttribute>, String> {
        let cert = parse(cert_der)?;
        let mut out = Vec::new();
        for rdn in cert.tbs_certificate.subject.0.iter() {
            for atv in rdn.0.iter() {
                out.push(SubjectAttribute {
                    oid: atv.oid.to_string(),
                    value: String::from_utf8_lossy(atv.value.value()).into_owned(),
                });
            }
        }
        Ok(out)
    }
}

/// Static instance of the certificate verifier.
pub(super) static CERTIFICATE_VERIFIER: RustCryptoCertificateVerifier =
    RustCryptoCertificateVerifier;
