//! Verified peer identities and their canonical string forms.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::crypto::SubjectAttribute;
use crate::sni::ServerName;

/// Prefix of RFC 6920 named information URIs for SHA-256.
const FINGERPRINT_PREFIX: &str = "ni:///sha-256;";

/// Outcome of a successful authentication.
///
/// Equality is exact string comparison of the normalized name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VerifiedIdentity {
    /// PSK identity, host-prefixed when resolved under a virtual host.
    PskIdentity(String),
    /// Fingerprint of a raw public key.
    RawKeyIdentity(String),
    /// Subject distinguished name of the leaf certificate.
    CertificateIdentity(String),
    /// The peer completed without proving an identity.
    Anonymous,
}

impl VerifiedIdentity {
    /// The identity string, `None` for [`VerifiedIdentity::Anonymous`].
    pub fn name(&self) -> Option<&str> {
        match self {
            VerifiedIdentity::PskIdentity(s)
            | VerifiedIdentity::RawKeyIdentity(s)
            | VerifiedIdentity::CertificateIdentity(s) => Some(s),
            VerifiedIdentity::Anonymous => None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, VerifiedIdentity::Anonymous)
    }
}

impl fmt::Display for VerifiedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifiedIdentity::PskIdentity(s) => write!(f, "psk:{}", s),
            VerifiedIdentity::RawKeyIdentity(s) => write!(f, "rpk:{}", s),
            VerifiedIdentity::CertificateIdentity(s) => write!(f, "x509:{}", s),
            VerifiedIdentity::Anonymous => write!(f, "anonymous"),
        }
    }
}

/// Fingerprint of a DER SubjectPublicKeyInfo as an RFC 6920 `ni` URI,
/// e.g. `ni:///sha-256;L6Vx...`.
pub fn raw_key_fingerprint(spki_der: &[u8]) -> String {
    let digest = Sha256::digest(spki_der);
    format!("{}{}", FINGERPRINT_PREFIX, URL_SAFE_NO_PAD.encode(digest))
}

/// PSK identity as reported for a handshake scoped to `virtual_host`.
pub fn scoped_psk_identity(hint: &str, virtual_host: Option<&ServerName>) -> String {
    match virtual_host {
        Some(host) => format!("{}:{}", host, hint),
        None => hint.to_string(),
    }
}

/// Format subject attributes as `C=..,L=..,O=..,OU=..,CN=..` in encoding order.
pub fn format_subject(attributes: &[SubjectAttribute]) -> String {
    attributes
        .iter()
        .map(|a| format!("{}={}", short_name(&a.oid), escape(&a.value)))
        .collect::<Vec<_>>()
        .join(",")
}

fn short_name(oid: &str) -> &str {
    match oid {
        "2.5.4.3" => "CN",
        "2.5.4.6" => "C",
        "2.5.4.7" => "L",
        "2.5.4.8" => "ST",
        "2.5.4.9" => "STREET",
        "2.5.4.10" => "O",
        "2.5.4.11" => "OU",
        "0.9.2342.19200300.100.1.1" => "UID",
        "0.9.2342.19200300.100.1.25" => "DC",
        other => other,
    }
}

// RFC 4514 escaping of attribute values.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        let special = matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';')
            || (i == 0 && (c == '#' || c == ' '))
            || (i == value.chars().count() - 1 && c == ' ');
        if special {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
