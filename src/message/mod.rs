//! Structured handshake messages.
//!
//! The transport collaborator turns datagrams into [`Message`] values and back.
//! The engine never sees raw record bytes, but each handshake body has a
//! canonical encoding ([`Body::serialize`]) that feeds the transcript hash so
//! both peers agree on what was exchanged.

mod alert;
mod exchange;
mod hello;

use std::fmt;

pub use alert::{Alert, AlertDescription, AlertLevel};
pub use exchange::{CertificateBody, CertificateRequest, CertificateVerify};
pub use exchange::{ClientKeyExchange, Finished, ServerKeyExchange};
pub use hello::{ClientHello, HelloVerifyRequest, ServerHello};

/// One handshake, alert or application data message, tagged with the epoch and
/// handshake sequence number it was sent under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub epoch: u16,
    /// Handshake sequence number. Zero for alerts and application data.
    pub message_seq: u16,
    pub body: Body,
}

impl Message {
    pub fn new(epoch: u16, message_seq: u16, body: Body) -> Self {
        Message {
            epoch,
            message_seq,
            body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    ClientHello(ClientHello),
    HelloVerifyRequest(HelloVerifyRequest),
    ServerHello(ServerHello),
    Certificate(CertificateBody),
    ServerKeyExchange(ServerKeyExchange),
    CertificateRequest(CertificateRequest),
    ServerHelloDone,
    ClientKeyExchange(ClientKeyExchange),
    CertificateVerify(CertificateVerify),
    Finished(Finished),
    Alert(Alert),
    ApplicationData(Vec<u8>),
}

/// Handshake message types (RFC 5246 / 6347).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    ClientHello,
    ServerHello,
    HelloVerifyRequest,
    Certificate,
    ServerKeyExchange,
    CertificateRequest,
    ServerHelloDone,
    CertificateVerify,
    ClientKeyExchange,
    Finished,
}

impl MessageType {
    pub fn as_u8(&self) -> u8 {
        match self {
            MessageType::ClientHello => 1,
            MessageType::ServerHello => 2,
            MessageType::HelloVerifyRequest => 3,
            MessageType::Certificate => 11,
            MessageType::ServerKeyExchange => 12,
            MessageType::CertificateRequest => 13,
            MessageType::ServerHelloDone => 14,
            MessageType::CertificateVerify => 15,
            MessageType::ClientKeyExchange => 16,
            MessageType::Finished => 20,
        }
    }
}

impl Body {
    /// The handshake message type, or `None` for alerts and application data.
    pub fn message_type(&self) -> Option<MessageType> {
        let t = match self {
            Body::ClientHello(_) => MessageType::ClientHello,
            Body::HelloVerifyRequest(_) => MessageType::HelloVerifyRequest,
            Body::ServerHello(_) => MessageType::ServerHello,
            Body::Certificate(_) => MessageType::Certificate,
            Body::ServerKeyExchange(_) => MessageType::ServerKeyExchange,
            Body::CertificateRequest(_) => MessageType::CertificateRequest,
            Body::ServerHelloDone => MessageType::ServerHelloDone,
            Body::ClientKeyExchange(_) => MessageType::ClientKeyExchange,
            Body::CertificateVerify(_) => MessageType::CertificateVerify,
            Body::Finished(_) => MessageType::Finished,
            Body::Alert(_) | Body::ApplicationData(_) => return None,
        };
        Some(t)
    }

    pub fn is_handshake(&self) -> bool {
        self.message_type().is_some()
    }

    /// Canonical encoding of a handshake body for the transcript.
    ///
    /// Alerts and application data never enter the transcript and encode to nothing.
    pub fn serialize(&self, message_seq: u16, out: &mut Vec<u8>) {
        let Some(message_type) = self.message_type() else {
            return;
        };

        out.push(message_type.as_u8());
        out.extend_from_slice(&message_seq.to_be_bytes());

        match self {
            Body::ClientHello(m) => m.serialize(out),
            Body::HelloVerifyRequest(m) => m.serialize(out),
            Body::ServerHello(m) => m.serialize(out),
            Body::Certificate(m) => m.serialize(out),
            Body::ServerKeyExchange(m) => m.serialize(out),
            Body::CertificateRequest(m) => m.serialize(out),
            Body::ServerHelloDone => {}
            Body::ClientKeyExchange(m) => m.serialize(out),
            Body::CertificateVerify(m) => m.serialize(out),
            Body::Finished(m) => m.serialize(out),
            Body::Alert(_) | Body::ApplicationData(_) => {}
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Random(pub [u8; 32]);

impl fmt::Debug for Random {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Random({})", hex(&self.0[..4]))
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Cookie(pub Vec<u8>);

impl Cookie {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cookie({} bytes)", self.0.len())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SessionId(pub [u8; 32]);

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", hex(&self.0[..4]))
    }
}

/// Connection identifier (RFC 9146) assigned by the server.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Vec<u8>);

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", hex(&self.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
/// Supported cipher suites.
pub enum CipherSuite {
    /// Pre-shared key, AES-128-CCM-8 (0xC0A8)
    PSK_AES128_CCM_8,
    /// ECDHE with ECDSA authentication, AES-128-CCM-8 (0xC0AE)
    ECDHE_ECDSA_AES128_CCM_8,
    /// Unknown or unsupported cipher suite by its IANA value
    Unknown(u16),
}

/// Key exchange family of a cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExchangeAlgorithm {
    Psk,
    Ecdhe,
    Unknown,
}

impl CipherSuite {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0xC0A8 => CipherSuite::PSK_AES128_CCM_8,
            0xC0AE => CipherSuite::ECDHE_ECDSA_AES128_CCM_8,
            _ => CipherSuite::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CipherSuite::PSK_AES128_CCM_8 => 0xC0A8,
            CipherSuite::ECDHE_ECDSA_AES128_CCM_8 => 0xC0AE,
            CipherSuite::Unknown(value) => *value,
        }
    }

    pub fn key_exchange(&self) -> KeyExchangeAlgorithm {
        match self {
            CipherSuite::PSK_AES128_CCM_8 => KeyExchangeAlgorithm::Psk,
            CipherSuite::ECDHE_ECDSA_AES128_CCM_8 => KeyExchangeAlgorithm::Ecdhe,
            CipherSuite::Unknown(_) => KeyExchangeAlgorithm::Unknown,
        }
    }
}

/// Certificate types of RFC 7250.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertificateType {
    X509,
    RawPublicKey,
}

impl CertificateType {
    pub fn as_u8(&self) -> u8 {
        match self {
            CertificateType::X509 => 0,
            CertificateType::RawPublicKey => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedGroup {
    Secp256r1,
    Unknown(u16),
}

impl NamedGroup {
    pub fn as_u16(&self) -> u16 {
        match self {
            NamedGroup::Secp256r1 => 23,
            NamedGroup::Unknown(value) => *value,
        }
    }
}

/// Length prefixed bytes. A length that does not fit below `u8::MAX`
/// is written as the escape `0xff` followed by the full `u64` length.
pub(crate) fn put_u8_vec(out: &mut Vec<u8>, data: &[u8]) {
    if data.len() < u8::MAX as usize {
        out.push(data.len() as u8);
    } else {
        out.push(u8::MAX);
        out.extend_from_slice(&(data.len() as u64).to_be_bytes());
    }
    out.extend_from_slice(data);
}

/// Like [`put_u8_vec`] with a two byte prefix and `0xffff` as escape.
pub(crate) fn put_u16_vec(out: &mut Vec<u8>, data: &[u8]) {
    if data.len() < u16::MAX as usize {
        out.extend_from_slice(&(data.len() as u16).to_be_bytes());
    } else {
        out.extend_from_slice(&u16::MAX.to_be_bytes());
        out.extend_from_slice(&(data.len() as u64).to_be_bytes());
    }
    out.extend_from_slice(data);
}

/// Absent fields encode as `0`, present ones as `1` and the value.
pub(crate) fn put_opt_u16_vec(out: &mut Vec<u8>, data: Option<&[u8]>) {
    match data {
        None => out.push(0),
        Some(data) => {
            out.push(1);
            put_u16_vec(out, data);
        }
    }
}

pub(crate) fn put_cert_types(out: &mut Vec<u8>, types: &[CertificateType]) {
    let bytes: Vec<u8> = types.iter().map(|t| t.as_u8()).collect();
    put_u8_vec(out, &bytes);
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
