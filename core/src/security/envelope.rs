//! Handshake envelope: sign, then hybrid-encrypt
//!
//! The transport is a public append-only store, so anyone who can compute
//! an address can read the raw bytes. Confidentiality and authenticity are
//! therefore end-to-end:
//!
//! 1. SHA-256 digest of the plaintext, signed with the sender's private
//!    identity key; the signature is appended to the plaintext
//! 2. The signed block is encrypted with a fresh random AES-256 key and IV
//!    (CBC mode, PKCS#7 padding)
//! 3. The key and IV are encrypted with the recipient's public identity
//!    key
//!
//! Wire payload = encrypted-key-block ‖ encrypted-body. Bulk data is never
//! asymmetrically encrypted.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-256 key length
const SYM_KEY_SIZE: usize = 32;
/// AES block / IV length
const SYM_IV_SIZE: usize = 16;

/// Envelope failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// A cryptographic primitive failed
    Crypto(String),
    /// The payload structure is not a valid envelope
    Malformed(String),
    /// The appended signature does not verify against the sender's key
    BadSignature,
}

impl std::fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeError::Crypto(e) => write!(f, "crypto failure: {}", e),
            EnvelopeError::Malformed(e) => write!(f, "malformed envelope: {}", e),
            EnvelopeError::BadSignature => write!(f, "signature verification failed"),
        }
    }
}

impl std::error::Error for EnvelopeError {}

/// Sign `plaintext` and encrypt it to `recipient_key`
pub fn seal(
    plaintext: &[u8],
    signing_key: &RsaPrivateKey,
    recipient_key: &RsaPublicKey,
) -> Result<Vec<u8>, EnvelopeError> {
    // Sign: digest of the plaintext, encrypted with our private key,
    // appended to the plaintext
    let digest = Sha256::digest(plaintext);
    let signature = signing_key
        .sign(Pkcs1v15Sign::new_unprefixed(), &digest)
        .map_err(|e| EnvelopeError::Crypto(e.to_string()))?;

    let mut signed = Vec::with_capacity(plaintext.len() + signature.len());
    signed.extend_from_slice(plaintext);
    signed.extend_from_slice(&signature);

    // Encrypt: fresh symmetric key + IV for the body, asymmetrically
    // wrapped for the recipient
    let mut key_iv = Zeroizing::new([0u8; SYM_KEY_SIZE + SYM_IV_SIZE]);
    rand::thread_rng().fill_bytes(key_iv.as_mut());

    let cipher = Aes256CbcEnc::new_from_slices(&key_iv[..SYM_KEY_SIZE], &key_iv[SYM_KEY_SIZE..])
        .map_err(|e| EnvelopeError::Crypto(e.to_string()))?;
    let body = cipher.encrypt_padded_vec_mut::<Pkcs7>(&signed);

    let key_block = recipient_key
        .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, key_iv.as_ref())
        .map_err(|e| EnvelopeError::Crypto(e.to_string()))?;

    let mut payload = Vec::with_capacity(key_block.len() + body.len());
    payload.extend_from_slice(&key_block);
    payload.extend_from_slice(&body);
    Ok(payload)
}

/// Decrypt an envelope, returning the signed block (plaintext ‖ signature)
pub fn open(payload: &[u8], recipient_key: &RsaPrivateKey) -> Result<Vec<u8>, EnvelopeError> {
    let key_block_len = recipient_key.size();
    if payload.len() <= key_block_len {
        return Err(EnvelopeError::Malformed(format!(
            "payload of {} bytes is too short for a {}-byte key block",
            payload.len(),
            key_block_len
        )));
    }

    let key_iv = Zeroizing::new(
        recipient_key
            .decrypt(Pkcs1v15Encrypt, &payload[..key_block_len])
            .map_err(|e| EnvelopeError::Crypto(e.to_string()))?,
    );
    if key_iv.len() != SYM_KEY_SIZE + SYM_IV_SIZE {
        return Err(EnvelopeError::Malformed(format!(
            "key block decrypted to {} bytes",
            key_iv.len()
        )));
    }

    let cipher = Aes256CbcDec::new_from_slices(&key_iv[..SYM_KEY_SIZE], &key_iv[SYM_KEY_SIZE..])
        .map_err(|e| EnvelopeError::Crypto(e.to_string()))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&payload[key_block_len..])
        .map_err(|e| EnvelopeError::Crypto(e.to_string()))
}

/// Verify the appended signature, returning the plaintext on success
pub fn verify<'a>(
    signed: &'a [u8],
    sender_key: &RsaPublicKey,
) -> Result<&'a [u8], EnvelopeError> {
    let signature_len = sender_key.size();
    if signed.len() < signature_len {
        return Err(EnvelopeError::Malformed(format!(
            "signed block of {} bytes is shorter than a {}-byte signature",
            signed.len(),
            signature_len
        )));
    }

    let (plaintext, signature) = signed.split_at(signed.len() - signature_len);
    let digest = Sha256::digest(plaintext);
    sender_key
        .verify(Pkcs1v15Sign::new_unprefixed(), &digest, signature)
        .map_err(|_| EnvelopeError::BadSignature)?;
    Ok(plaintext)
}
