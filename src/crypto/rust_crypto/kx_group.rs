//! Key exchange group implementation using RustCrypto.

use p256::ecdh::EphemeralSecret;
use p256::PublicKey as P256PublicKey;
use rand::rngs::OsRng;

use crate::crypto::provider::{ActiveKeyExchange, SupportedKxGroup};
use crate::message::NamedGroup;

/// ECDHE key exchange on P-256.
struct EcdhKeyExchange {
    secret: EphemeralSecret,
    public_key: Vec<u8>,
}

impl std::fmt::Debug for EcdhKeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcdhKeyExchange::P256")
            .field("public_key_len", &self.public_key.len())
            .finish_non_exhaustive()
    }
}

impl EcdhKeyExchange {
    fn new() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public_key = P256PublicKey::from(&secret).to_sec1_bytes().to_vec();
        EcdhKeyExchange { secret, public_key }
    }
}

impl ActiveKeyExchange for EcdhKeyExchange {
    fn pub_key(&self) -> &[u8] {
        &self.public_key
    }

    fn complete(self: Box<Self>, peer_pub: &[u8], out: &mut Vec<u8>) -> Result<(), String> {
        let peer_key = P256PublicKey::from_sec1_bytes(peer_pub)
            .map_err(|_| "Invalid P-256 public key".to_string())?;
        let shared_secret = self.secret.diffie_hellman(&peer_key);
        out.clear();
        out.extend_from_slice(shared_secret.raw_secret_bytes().as_slice());
        Ok(())
    }

    fn group(&self) -> NamedGroup {
        NamedGroup::Secp256r1
    }
}

/// P-256 (secp256r1) key exchange group.
#[derive(Debug)]
struct P256;

impl SupportedKxGroup for P256 {
    fn name(&self) -> NamedGroup {
        NamedGroup::Secp256r1
    }

    fn start_exchange(&self) -> Result<Box<dyn ActiveKeyExchange>, String> {
        Ok(Box::new(EcdhKeyExchange::new()))
    }
}

static KX_GROUP_P256: P256 = P256;

/// All supported key exchange groups.
pub(super) static ALL_KX_GROUPS: &[&dyn SupportedKxGroup] = &[&KX_GROUP_P256];
