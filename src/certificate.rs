//! Certificate and key generation utilities exposed via the public `certificate` module.
//!
//! Helpers to generate self-signed certificates, small CA hierarchies and raw
//! public key pairs suitable for the three authentication schemes, plus the
//! fingerprint formatting used for display.

use std::fmt;

use p256::ecdsa::SigningKey;
use p256::pkcs8::{DecodePrivateKey, EncodePublicKey};
use rcgen::{
    BasicConstraints, Certificate as RcgenCertificate, CertificateParams, DistinguishedName,
    DnType, IsCa, KeyPair, PKCS_ECDSA_P256_SHA256,
};
use sha2::{Digest, Sha256};

/// Certificate utility error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateError {
    /// Invalid certificate or key format
    InvalidFormat,
    /// Certificate generation failed
    GenerationFailed,
}

impl fmt::Display for CertificateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateError::InvalidFormat => write!(f, "Invalid certificate format"),
            CertificateError::GenerationFailed => write!(f, "Certificate generation failed"),
        }
    }
}

impl std::error::Error for CertificateError {}

/// Subject distinguished name, kept in the order attributes are added.
#[derive(Debug, Clone, Default)]
pub struct SubjectName {
    attributes: Vec<(DnType, String)>,
}

impl SubjectName {
    pub fn new() -> Self {
        SubjectName::default()
    }

    pub fn country(self, value: &str) -> Self {
        self.with(DnType::CountryName, value)
    }

    pub fn state(self, value: &str) -> Self {
        self.with(DnType::StateOrProvinceName, value)
    }

    pub fn locality(self, value: &str) -> Self {
        self.with(DnType::LocalityName, value)
    }

    pub fn organization(self, value: &str) -> Self {
        self.with(DnType::OrganizationName, value)
    }

    pub fn organizational_unit(self, value: &str) -> Self {
        self.with(DnType::OrganizationalUnitName, value)
    }

    pub fn common_name(self, value: &str) -> Self {
        self.with(DnType::CommonName, value)
    }

    fn with(mut self, ty: DnType, value: &str) -> Self {
        self.attributes.push((ty, value.to_string()));
        self
    }

    fn to_distinguished_name(&self) -> DistinguishedName {
        let mut dn = DistinguishedName::new();
        for (ty, value) in &self.attributes {
            dn.push(ty.clone(), value.clone());
        }
        dn
    }
}

/// Certificate and private key pair
#[derive(Clone)]
pub struct DtlsCertificate {
    /// Certificate in DER format
    pub certificate: Vec<u8>,
    /// Private key in PKCS#8 DER format
    pub private_key: Vec<u8>,
}

/// A certificate chain (leaf first) with the leaf's private key.
#[derive(Clone)]
pub struct CertificateChain {
    /// DER certificates, leaf first. Does not include the issuing CA.
    pub chain: Vec<Vec<u8>>,
    /// Private key of the leaf in PKCS#8 DER format
    pub private_key: Vec<u8>,
}

/// A bare key pair for raw public key authentication.
#[derive(Clone)]
pub struct RawKeyPair {
    /// Private key in PKCS#8 DER format
    pub private_key: Vec<u8>,
    /// DER encoded SubjectPublicKeyInfo
    pub public_key: Vec<u8>,
}

/// A CA that can issue leaf certificates.
pub struct CertificateAuthority {
    /// CA certificate in DER format, used as trust anchor.
    pub certificate: Vec<u8>,
    signer: RcgenCertificate,
}

fn params_for(name: &SubjectName, is_ca: IsCa) -> Result<CertificateParams, CertificateError> {
    let key_pair = KeyPair::generate(&PKCS_ECDSA_P256_SHA256)
        .map_err(|_| CertificateError::GenerationFailed)?;

    let mut params = CertificateParams::new(Vec::new());
    params.alg = &PKCS_ECDSA_P256_SHA256;
    params.distinguished_name = name.to_distinguished_name();
    params.is_ca = is_ca;
    params.key_pair = Some(key_pair);

    // Set validity period (1 year)
    let not_before = time::OffsetDateTime::now_utc() - time::Duration::days(1);
    params.not_before = not_before;
    params.not_after = not_before + time::Duration::days(365);

    Ok(params)
}

/// Generate a self-signed end entity certificate with the given subject.
pub fn generate_self_signed(name: &SubjectName) -> Result<DtlsCertificate, CertificateError> {
    let cert = RcgenCertificate::from_params(params_for(name, IsCa::NoCa)?)
        .map_err(|_| CertificateError::GenerationFailed)?;

    let cert_der = cert
        .serialize_der()
        .map_err(|_| CertificateError::GenerationFailed)?;

    Ok(DtlsCertificate {
        certificate: cert_der,
        private_key: cert.serialize_private_key_der(),
    })
}

/// Generate a self-signed certificate for a generic peer.
pub fn generate_self_signed_certificate() -> Result<DtlsCertificate, CertificateError> {
    generate_self_signed(
        &SubjectName::new()
            .organization("DTLS")
            .common_name("DTLS Peer"),
    )
}

/// Generate a CA certificate able to sign leaves.
pub fn generate_ca(name: &SubjectName) -> Result<CertificateAuthority, CertificateError> {
    let params = params_for(name, IsCa::Ca(BasicConstraints::Unconstrained))?;
    let signer =
        RcgenCertificate::from_params(params).map_err(|_| CertificateError::GenerationFailed)?;
    let certificate = signer
        .serialize_der()
        .map_err(|_| CertificateError::GenerationFailed)?;

    Ok(CertificateAuthority {
        certificate,
        signer,
    })
}

/// Generate a leaf certificate issued by `ca`.
pub fn generate_signed(
    ca: &CertificateAuthority,
    name: &SubjectName,
) -> Result<CertificateChain, CertificateError> {
    let cert = RcgenCertificate::from_params(params_for(name, IsCa::NoCa)?)
        .map_err(|_| CertificateError::GenerationFailed)?;

    let leaf = cert
        .serialize_der_with_signer(&ca.signer)
        .map_err(|_| CertificateError::GenerationFailed)?;

    Ok(CertificateChain {
        chain: vec![leaf],
        private_key: cert.serialize_private_key_der(),
    })
}

/// Generate a P-256 key pair for raw public key authentication.
pub fn generate_raw_key_pair() -> Result<RawKeyPair, CertificateError> {
    let key_pair = KeyPair::generate(&PKCS_ECDSA_P256_SHA256)
        .map_err(|_| CertificateError::GenerationFailed)?;
    let private_key = key_pair.serialize_der();
    let public_key = public_key_of(&private_key)?;

    Ok(RawKeyPair {
        private_key,
        public_key,
    })
}

/// DER encoded SubjectPublicKeyInfo for a PKCS#8 P-256 private key.
pub fn public_key_of(private_key: &[u8]) -> Result<Vec<u8>, CertificateError> {
    let key = SigningKey::from_pkcs8_der(private_key).map_err(|_| CertificateError::InvalidFormat)?;
    key.verifying_key()
        .to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|_| CertificateError::InvalidFormat)
}

/// Calculate a certificate fingerprint using SHA-256
pub fn calculate_fingerprint(cert_der: &[u8]) -> Vec<u8> {
    Sha256::digest(cert_der).to_vec()
}

/// Format a fingerprint as a colon-separated hex string
/// Example: "AF:12:F6:..."
pub fn format_fingerprint(fingerprint: &[u8]) -> String {
    fingerprint
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<String>>()
        .join(":")
}

impl DtlsCertificate {
    /// Returns the certificate fingerprint as raw bytes.
    pub fn fingerprint(&self) -> Vec<u8> {
        calculate_fingerprint(&self.certificate)
    }

    /// Returns the certificate fingerprint as a human-readable string.
    pub fn fingerprint_str(&self) -> String {
        format_fingerprint(&self.fingerprint())
    }
}

impl fmt::Debug for DtlsCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DtlsCertificate")
            .field("certificate", &self.certificate.len())
            .field("private_key", &self.private_key.len())
            .finish()
    }
}

impl fmt::Debug for CertificateChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateChain")
            .field("chain", &self.chain.len())
            .field("private_key", &self.private_key.len())
            .finish()
    }
}

impl fmt::Debug for RawKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawKeyPair")
            .field("public_key", &format_fingerprint(&calculate_fingerprint(&self.public_key)))
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("certificate", &self.certificate.len())
            .finish_non_exhaustive()
    }
}
