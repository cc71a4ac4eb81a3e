//! Self-check of crypto providers.
//!
//! A provider is exercised against known answers before a [`Config`](crate::Config)
//! accepts it, so a broken backend fails at configuration time instead of in
//! the middle of a handshake.

use crate::crypto::provider::CryptoProvider;
use crate::message::NamedGroup;
use crate::Error;

impl CryptoProvider {
    /// Validate the provider against known answer tests.
    ///
    /// Returns `Error::ConfigError` naming the first component that misbehaves.
    pub fn validate(&self) -> Result<(), Error> {
        self.validate_kx_groups()?;
        self.validate_hash_provider()?;
        self.validate_hmac_provider()?;
        self.validate_prf_provider()?;
        self.validate_secure_random()?;
        Ok(())
    }

    /// P-256 is the only group the handshake negotiates.
    fn validate_kx_groups(&self) -> Result<(), Error> {
        if self.kx_group(NamedGroup::Secp256r1).is_none() {
            return Err(Error::ConfigError(
                "CryptoProvider has no secp256r1 key exchange group".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_hash_provider(&self) -> Result<(), Error> {
        let result = self.hash_provider.sha256(&[]);
        if result != SHA256_EMPTY {
            return Err(Error::ConfigError(
                "Hash provider produced incorrect SHA-256 result".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_hmac_provider(&self) -> Result<(), Error> {
        // RFC 4231, test case 2
        let result = self
            .hmac_provider
            .hmac_sha256(b"Jefe", b"what do ya want for nothing?")
            .map_err(|e| Error::ConfigError(format!("HMAC provider failed: {}", e)))?;
        if result != HMAC_SHA256_RFC4231_2 {
            return Err(Error::ConfigError(
                "HMAC provider produced incorrect result".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_prf_provider(&self) -> Result<(), Error> {
        let output_len = 32;
        let mut result = Vec::new();
        self.prf_provider
            .prf_tls12(b"test_secret", "test label", b"test_seed", &mut result, output_len)
            .map_err(|e| Error::ConfigError(format!("PRF provider failed: {}", e)))?;

        if result.len() != output_len {
            return Err(Error::ConfigError(format!(
                "PRF provider returned wrong length: expected {}, got {}",
                output_len,
                result.len()
            )));
        }

        if result != PRF_SHA256_VECTOR {
            return Err(Error::ConfigError(
                "PRF provider produced incorrect result".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_secure_random(&self) -> Result<(), Error> {
        let mut buf = [0u8; 16];
        self.secure_random
            .fill(&mut buf)
            .map_err(|e| Error::ConfigError(format!("Secure random failed: {}", e)))
    }
}

const SHA256_EMPTY: [u8; 32] = [
    0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f, 0xb9, 0x24,
    0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b, 0x78, 0x52, 0xb8, 0x55,
];

const HMAC_SHA256_RFC4231_2: [u8; 32] = [
    0x5b, 0xdc, 0xc1, 0x46, 0xbf, 0x60, 0x75, 0x4e, 0x6a, 0x04, 0x24, 0x26, 0x08, 0x95, 0x75, 0xc7,
    0x5a, 0x00, 0x3f, 0x08, 0x9d, 0x27, 0x39, 0x83, 0x9d, 0xec, 0x58, 0xb9, 0x64, 0xec, 0x38, 0x43,
];

// PRF("test_secret", "test label", "test_seed"), 32 bytes.
const PRF_SHA256_VECTOR: [u8; 32] = [
    0xc7, 0x49, 0xce, 0xdf, 0xad, 0xaf, 0x3d, 0xf1, 0x18, 0x2c, 0xa2, 0x25, 0xab, 0xe9, 0x4e, 0x0c,
    0x19, 0xc3, 0x81, 0x49, 0x57, 0xbd, 0xdc, 0x28, 0x55, 0x78, 0x73, 0xdb, 0xb7, 0x9f, 0xce, 0x29,
];
