//! Identity/trust resolution collaborator
//!
//! Maps an identity id to that identity's published contact record: the
//! public key to encrypt handshakes to, the handshake inbox anyone may
//! publish an RTS to, and the reference other peers use to look the
//! identity up. Resolution can fail transiently when the trust service is
//! unavailable or the record is missing key material.

use async_trait::async_trait;
use rsa::RsaPublicKey;

/// A peer's published contact record
#[derive(Debug, Clone)]
pub struct ContactRecord {
    /// RSA public key handshakes to this identity are encrypted with
    pub encryption_public_key: RsaPublicKey,
    /// Base key of the identity's handshake inbox
    pub handshake_inbox_key: String,
    /// The published reference to this record, sent in the RTS `mailsite`
    /// field so the recipient can resolve the sender
    pub contact_reference: String,
}

/// Resolution failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The trust service or the record itself is currently unreachable
    Unavailable,
    /// The record was fetched but lacks usable key material
    MissingKeyMaterial,
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::Unavailable => write!(f, "contact record unavailable"),
            ResolveError::MissingKeyMaterial => {
                write!(f, "contact record is missing key material")
            }
        }
    }
}

impl std::error::Error for ResolveError {}

/// The identity/trust resolution service
#[async_trait]
pub trait ContactResolver: Send + Sync {
    /// Resolve `remote_id`'s contact record as seen by `local_id`
    ///
    /// The initiator also resolves its own record
    /// (`resolve_contact_record(local, local)`) to obtain the contact
    /// reference it advertises in the RTS.
    async fn resolve_contact_record(
        &self,
        local_id: &str,
        remote_id: &str,
    ) -> Result<ContactRecord, ResolveError>;
}
