//! Identity key material
//!
//! Account provisioning lives outside this crate; channels only receive a
//! ready-made local identity. Key generation is provided here for
//! provisioning collaborators and tests.

use rsa::{BigUint, RsaPrivateKey};

/// Default identity key modulus length in bits
pub const IDENTITY_KEY_BITS: usize = 4096;

/// Fixed public exponent for identity keys
const IDENTITY_KEY_EXPONENT: u64 = 17;

/// The local side of a channel: who we are and how we sign
#[derive(Clone)]
pub struct LocalIdentity {
    /// Our identity id as known to the trust service
    pub identity_id: String,
    /// Our private identity key, used to sign outgoing handshakes
    pub signing_key: RsaPrivateKey,
}

impl LocalIdentity {
    pub fn new(identity_id: &str, signing_key: RsaPrivateKey) -> Self {
        Self {
            identity_id: identity_id.to_string(),
            signing_key,
        }
    }
}

impl std::fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIdentity")
            .field("identity_id", &self.identity_id)
            .field("signing_key", &"[REDACTED]")
            .finish()
    }
}

/// Generate a fresh RSA identity keypair
pub fn generate_identity_key(bits: usize) -> Result<RsaPrivateKey, rsa::Error> {
    RsaPrivateKey::new_with_exp(
        &mut rand::thread_rng(),
        bits,
        &BigUint::from(IDENTITY_KEY_EXPONENT),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::traits::PublicKeyParts;

    #[test]
    fn test_generate_identity_key() {
        let key = generate_identity_key(1024).unwrap();
        assert_eq!(key.size() * 8, 1024);
        assert_eq!(key.e(), &BigUint::from(IDENTITY_KEY_EXPONENT));
    }

    #[test]
    fn test_debug_redacts_signing_key() {
        let key = generate_identity_key(1024).unwrap();
        let identity = LocalIdentity::new("alice", key);
        let output = format!("{:?}", identity);

        assert!(output.contains("alice"));
        assert!(output.contains("[REDACTED]"));
    }
}
