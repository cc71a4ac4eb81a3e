//! HMAC and TLS 1.2 PRF using RustCrypto.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::crypto::provider::{HmacProvider, PrfProvider};

type HmacSha256 = Hmac<Sha256>;

/// Compute the TLS 1.2 P_SHA256 expansion.
pub(super) fn p_hash(
    secret: &[u8],
    full_seed: &[u8],
    out: &mut Vec<u8>,
    output_len: usize,
) -> Result<(), String> {
    out.clear();

    // A(1) = HMAC_hash(secret, A(0)) where A(0) = seed
    let mut a_hmac =
        HmacSha256::new_from_slice(secret).map_err(|_| "Invalid HMAC key length".to_string())?;
    a_hmac.update(full_seed);
    let mut a = a_hmac.finalize().into_bytes();

    while out.len() < output_len {
        // HMAC_hash(secret, A(i) + seed)
        let mut ctx = HmacSha256::new_from_slice(secret)
            .map_err(|_| "Invalid HMAC key length".to_string())?;
        ctx.update(&a);
        ctx.update(full_seed);
        let output = ctx.finalize().into_bytes();

        let remaining = output_len - out.len();
        let to_copy = std::cmp::min(remaining, output.len());
        out.extend_from_slice(&output[..to_copy]);

        if out.len() < output_len {
            // A(i+1) = HMAC_hash(secret, A(i))
            let mut next_a = HmacSha256::new_from_slice(secret)
                .map_err(|_| "Invalid HMAC key length".to_string())?;
            next_a.update(&a);
            a = next_a.finalize().into_bytes();
        }
    }

    Ok(())
}

/// PRF provider implementation for TLS 1.2.
#[derive(Debug)]
pub(super) struct RustCryptoPrfProvider;

impl PrfProvider for RustCryptoPrfProvider {
    fn prf_tls12(
        &self,
        secret: &[u8],
        label: &str,
        seed: &[u8],
        out: &mut Vec<u8>,
        output_len: usize,
    ) -> Result<(), String> {
        if !label.is_ascii() {
            return Err("Label must be ASCII".to_string());
        }

        let mut full_seed = Vec::with_capacity(label.len() + seed.len());
        full_seed.extend_from_slice(label.as_bytes());
        full_seed.extend_from_slice(seed);

        p_hash(secret, &full_seed, out, output_len)
    }
}

/// HMAC provider implementation.
#[derive(Debug)]
pub(super) struct RustCryptoHmacProvider;

impl HmacProvider for RustCryptoHmacProvider {
    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> Result<[u8; 32], String> {
        let mut mac =
            HmacSha256::new_from_slice(key).map_err(|_| "Invalid HMAC key".to_string())?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().into())
    }
}

/// Static instance of the PRF provider.
pub(super) static PRF_PROVIDER: RustCryptoPrfProvider = RustCryptoPrfProvider;

/// Static instance of the HMAC provider.
pub(super) static HMAC_PROVIDER: RustCryptoHmacProvider = RustCryptoHmacProvider;
