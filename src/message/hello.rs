use super::{put_cert_types, put_opt_u16_vec, put_u16_vec, put_u8_vec};
use super::{CertificateType, CipherSuite, ConnectionId, Cookie, Random, SessionId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub random: Random,
    pub cookie: Cookie,
    /// Offered suites in client preference order.
    pub cipher_suites: Vec<CipherSuite>,
    /// Types the client can present for itself.
    pub client_certificate_types: Vec<CertificateType>,
    /// Types the client can verify for the server.
    pub server_certificate_types: Vec<CertificateType>,
    /// Host name of the server_name extension, as sent.
    pub server_name: Option<String>,
}

impl ClientHello {
    pub(crate) fn serialize(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.random.0);
        put_u8_vec(out, &self.cookie.0);
        let suites: Vec<u8> = self
            .cipher_suites
            .iter()
            .flat_map(|s| s.as_u16().to_be_bytes())
            .collect();
        put_u16_vec(out, &suites);
        put_cert_types(out, &self.client_certificate_types);
        put_cert_types(out, &self.server_certificate_types);
        put_opt_u16_vec(out, self.server_name.as_deref().map(str::as_bytes));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloVerifyRequest {
    pub cookie: Cookie,
}

impl HelloVerifyRequest {
    pub(crate) fn serialize(&self, out: &mut Vec<u8>) {
        put_u8_vec(out, &self.cookie.0);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub random: Random,
    pub session_id: SessionId,
    pub cipher_suite: CipherSuite,
    /// Negotiated type of the client's credential. `None` for PSK.
    pub client_certificate_type: Option<CertificateType>,
    /// Negotiated type of the server's credential. `None` for PSK.
    pub server_certificate_type: Option<CertificateType>,
    /// Id the client must address this connection with, if any.
    pub connection_id: Option<ConnectionId>,
}

impl ServerHello {
    pub(crate) fn serialize(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.random.0);
        out.extend_from_slice(&self.session_id.0);
        out.extend_from_slice(&self.cipher_suite.as_u16().to_be_bytes());
        for cert_type in [self.client_certificate_type, self.server_certificate_type] {
            out.push(cert_type.map(|t| t.as_u8()).unwrap_or(0xff));
        }
        put_u8_vec(
            out,
            self.connection_id.as_ref().map(|c| c.0.as_slice()).unwrap_or(&[]),
        );
    }
}
