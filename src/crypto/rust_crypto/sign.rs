//! Signing and key loading implementations using RustCrypto.

use std::str;

use der::{Decode, Encode};
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey};
use sha2::{Digest, Sha256};
use spki::ObjectIdentifier;

use crate::crypto::provider::{KeyProvider, SignatureVerifier, SigningKey as SigningKeyTrait};

pub(super) const OID_EC_PUBLIC_KEY: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
pub(super) const OID_P256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");

/// ECDSA P-256 signing key.
struct EcdsaSigningKey(SigningKey);

impl std::fmt::Debug for EcdsaSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EcdsaSigningKey::P256").finish()
    }
}

impl SigningKeyTrait for EcdsaSigningKey {
    fn sign(&mut self, data: &[u8], out: &mut Vec<u8>) -> Result<(), String> {
        // PrehashSigner expects a hash digest
        let hash = Sha256::digest(data);
        let signature: Signature = self
            .0
            .sign_prehash(&hash)
            .map_err(|_| "Signing failed".to_string())?;
        out.clear();
        out.extend_from_slice(signature.to_der().as_bytes());
        Ok(())
    }

    fn public_key_der(&self) -> Result<Vec<u8>, String> {
        self.0
            .verifying_key()
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| format!("Failed to encode public key: {e}"))
    }
}

/// Key provider implementation.
#[derive(Debug)]
pub(super) struct RustCryptoKeyProvider;

impl KeyProvider for RustCryptoKeyProvider {
    fn load_private_key(&self, key_der: &[u8]) -> Result<Box<dyn SigningKeyTrait>, String> {
        // Try PKCS#8 DER format first (most common)
        if let Ok(key) = SigningKey::from_pkcs8_der(key_der) {
            return Ok(Box::new(EcdsaSigningKey(key)));
        }

        // SEC1 DER format (OpenSSL EC private key format)
        if let Ok(ec_key) = sec1::EcPrivateKey::try_from(key_der) {
            let curve_oid = match &ec_key.parameters {
                Some(sec1::EcParameters::NamedCurve(oid)) => *oid,
                None if ec_key.private_key.len() == 32 => OID_P256,
                None => return Err("SEC1 key without curve parameters".to_string()),
            };
            if curve_oid != OID_P256 {
                return Err(format!("Unsupported EC curve: {}", curve_oid));
            }

            let curve_params_der = curve_oid
                .to_der()
                .map_err(|_| "Failed to encode curve OID".to_string())?;
            let curve_params_any = der::asn1::AnyRef::try_from(curve_params_der.as_slice())
                .map_err(|_| "Failed to create AnyRef".to_string())?;

            let pkcs8 = pkcs8::PrivateKeyInfo {
                algorithm: spki::AlgorithmIdentifierRef {
                    oid: OID_EC_PUBLIC_KEY,
                    parameters: Some(curve_params_any),
                },
                private_key: key_der,
                public_key: None,
            };
            let pkcs8_der = pkcs8
                .to_der()
                .map_err(|_| "Failed to encode PKCS#8".to_string())?;

            if let Ok(key) = SigningKey::from_pkcs8_der(&pkcs8_der) {
                return Ok(Box::new(EcdsaSigningKey(key)));
            }
        }

        // Check if it's a PEM encoded key
        if let Ok(pem_str) = str::from_utf8(key_der) {
            if pem_str.contains("-----BEGIN") {
                if let Ok((_label, doc)) = pkcs8::Document::from_pem(pem_str) {
                    return self.load_private_key(doc.as_bytes());
                }
            }
        }

        Err("Failed to parse private key in any supported format".to_string())
    }
}

/// Signature verifier implementation.
#[derive(Debug)]
pub(super) struct RustCryptoSignatureVerifier;

impl SignatureVerifier for RustCryptoSignatureVerifier {
    fn verify_signature(
        &self,
        spki_der: &[u8],
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), String> {
        let spki = spki::SubjectPublicKeyInfoRef::from_der(spki_der)
            .map_err(|e| format!("Failed to parse public key: {e}"))?;

        if spki.algorithm.oid != OID_EC_PUBLIC_KEY {
            return Err(format!(
                "Unsupported public key algorithm: {}",
                spki.algorithm.oid
            ));
        }

        let verifying_key = VerifyingKey::from_public_key_der(spki_der)
            .map_err(|_| "Invalid P-256 public key".to_string())?;
        let sig =
            Signature::from_der(signature).map_err(|_| "Invalid signature format".to_string())?;

        // PrehashVerifier expects a hash digest
        let hash = Sha256::digest(data);
        verifying_key
            .verify_prehash(&hash, &sig)
            .map_err(|_| "ECDSA signature verification failed".to_string())
    }
}

/// Static instance of the key provider.
pub(super) static KEY_PROVIDER: RustCryptoKeyProvider = RustCryptoKeyProvider;

/// Static instance of the signature verifier.
pub(super) static SIGNATURE_VERIFIER: RustCryptoSignatureVerifier = RustCryptoSignatureVerifier;
