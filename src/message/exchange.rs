use super::{put_cert_types, put_u16_vec, put_u8_vec};
use super::{CertificateType, NamedGroup};

/// Credential presented in a Certificate message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateBody {
    /// DER certificates, leaf first.
    X509(Vec<Vec<u8>>),
    /// DER SubjectPublicKeyInfo (RFC 7250).
    RawPublicKey(Vec<u8>),
    /// A client declining a certificate request.
    Empty,
}

impl CertificateBody {
    pub fn is_empty(&self) -> bool {
        match self {
            CertificateBody::X509(chain) => chain.is_empty(),
            CertificateBody::RawPublicKey(key) => key.is_empty(),
            CertificateBody::Empty => true,
        }
    }

    pub(crate) fn serialize(&self, out: &mut Vec<u8>) {
        match self {
            CertificateBody::X509(chain) => {
                out.push(0);
                out.extend_from_slice(&(chain.len() as u16).to_be_bytes());
                for cert in chain {
                    put_u16_vec(out, cert);
                }
            }
            CertificateBody::RawPublicKey(spki) => {
                out.push(2);
                put_u16_vec(out, spki);
            }
            CertificateBody::Empty => out.push(0xff),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerKeyExchange {
    /// PSK identity hint (RFC 4279).
    Psk { hint: Vec<u8> },
    /// Signed ephemeral ECDH parameters.
    Ecdhe {
        group: NamedGroup,
        public_key: Vec<u8>,
        /// DER ECDSA signature over `client_random || server_random || params`.
        signature: Vec<u8>,
    },
}

impl ServerKeyExchange {
    /// The bytes covered by the server's signature.
    pub(crate) fn signed_params(
        client_random: &[u8; 32],
        server_random: &[u8; 32],
        group: NamedGroup,
        public_key: &[u8],
    ) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + 4 + public_key.len());
        out.extend_from_slice(client_random);
        out.extend_from_slice(server_random);
        out.push(3); // named_curve
        out.extend_from_slice(&group.as_u16().to_be_bytes());
        put_u8_vec(&mut out, public_key);
        out
    }

    pub(crate) fn serialize(&self, out: &mut Vec<u8>) {
        match self {
            ServerKeyExchange::Psk { hint } => put_u16_vec(out, hint),
            ServerKeyExchange::Ecdhe {
                group,
                public_key,
                signature,
            } => {
                out.push(3);
                out.extend_from_slice(&group.as_u16().to_be_bytes());
                put_u8_vec(out, public_key);
                put_u16_vec(out, signature);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    /// Types the server accepts for the client's credential.
    pub certificate_types: Vec<CertificateType>,
}

impl CertificateRequest {
    pub(crate) fn serialize(&self, out: &mut Vec<u8>) {
        put_cert_types(out, &self.certificate_types);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientKeyExchange {
    Psk { identity: String },
    Ecdhe { public_key: Vec<u8> },
}

impl ClientKeyExchange {
    pub(crate) fn serialize(&self, out: &mut Vec<u8>) {
        match self {
            ClientKeyExchange::Psk { identity } => put_u16_vec(out, identity.as_bytes()),
            ClientKeyExchange::Ecdhe { public_key } => put_u8_vec(out, public_key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateVerify {
    /// DER ECDSA signature over the transcript so far.
    pub signature: Vec<u8>,
}

impl CertificateVerify {
    pub(crate) fn serialize(&self, out: &mut Vec<u8>) {
        put_u16_vec(out, &self.signature);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub verify_data: Vec<u8>,
}

impl Finished {
    pub(crate) fn serialize(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.verify_data);
    }
}
