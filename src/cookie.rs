use std::net::SocketAddr;

use subtle::ConstantTimeEq;

use crate::crypto::{CryptoProvider, HmacProvider};
use crate::message::{Cookie, Random};
use crate::Error;

/// Stateless HelloVerifyRequest cookies.
///
/// A cookie is `HMAC-SHA256(secret, peer ip || peer port || client random)`.
/// The secret is random per connector, so cookies never outlive it.
pub(crate) struct CookieGenerator {
    secret: [u8; 32],
    hmac: &'static dyn HmacProvider,
}

impl CookieGenerator {
    pub fn new(provider: &CryptoProvider) -> Result<Self, Error> {
        let secret = provider
            .random_array::<32>()
            .map_err(Error::CryptoError)?;
        Ok(CookieGenerator {
            secret,
            hmac: provider.hmac_provider,
        })
    }

    pub fn generate(&self, peer: SocketAddr, client_random: &Random) -> Result<Cookie, Error> {
        let mut data = Vec::with_capacity(16 + 2 + 32);
        match peer.ip() {
            std::net::IpAddr::V4(ip) => data.extend_from_slice(&ip.octets()),
            std::net::IpAddr::V6(ip) => data.extend_from_slice(&ip.octets()),
        }
        data.extend_from_slice(&peer.port().to_be_bytes());
        data.extend_from_slice(&client_random.0);

        let mac = self
            .hmac
            .hmac_sha256(&self.secret, &data)
            .map_err(|e| Error::CryptoError(format!("Cookie HMAC failed: {}", e)))?;

        Ok(Cookie(mac.to_vec()))
    }

    /// Whether `cookie` is the one we handed `peer` for `client_random`.
    pub fn verify(&self, peer: SocketAddr, client_random: &Random, cookie: &Cookie) -> bool {
        if cookie.is_empty() {
            return false;
        }
        match self.generate(peer, client_random) {
            Ok(expected) => expected.0.ct_eq(&cookie.0).into(),
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }
}

impl std::fmt::Debug for CookieGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieGenerator").finish_non_exhaustive()
    }
}
