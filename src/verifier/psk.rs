use subtle::ConstantTimeEq;

use super::{Proof, VerifyScope};
use crate::credential::{CredentialRecord, KeyMaterial};
use crate::identity::{scoped_psk_identity, VerifiedIdentity};
use crate::Error;

/// Verifies possession of a pre-shared key.
///
/// The claimed identity was looked up directly; possession is proven by the
/// Finished MAC derived from the resolved secret matching the received one.
#[derive(Debug, Clone, Copy, Default)]
pub struct PskVerifier;

impl PskVerifier {
    pub(super) fn verify(
        &self,
        proof: &Proof<'_>,
        credential: &CredentialRecord,
        scope: &VerifyScope<'_>,
    ) -> Result<VerifiedIdentity, Error> {
        let Proof::Psk {
            identity,
            expected,
            received,
        } = *proof
        else {
            return Err(Error::AuthenticationFailure("expected PSK proof".into()));
        };

        if !matches!(credential.material(), KeyMaterial::PreSharedKey(_)) {
            return Err(Error::AuthenticationFailure(
                "PSK credential without secret".into(),
            ));
        }

        if expected.is_empty() || !bool::from(expected.ct_eq(received)) {
            return Err(Error::AuthenticationFailure(format!(
                "Finished MAC mismatch for PSK identity {}",
                identity
            )));
        }

        Ok(VerifiedIdentity::PskIdentity(scoped_psk_identity(
            identity,
            scope.virtual_host,
        )))
    }
}
