//! Cryptography
//!
//! - `slots`: one-way hash chain of slot identifiers and the polling
//!   sequencer built on it
//! - `envelope`: sign-then-hybrid-encrypt construction for the handshake
//! - `identity`: RSA identity keys

pub mod envelope;
pub mod identity;
pub mod slots;
