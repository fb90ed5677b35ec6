//! Content-addressed store collaborator
//!
//! The only transport this crate knows: insert content under a key, fetch
//! content under a key, and generate an asymmetric address keypair. Both
//! operations may fail transiently and the store keeps no per-client state.
//!
//! The store is injected per channel rather than read from ambient state so
//! tests can run against an in-memory fake (see `testing::MemoryStore`).

use async_trait::async_trait;

/// An asymmetric address keypair generated by the store
///
/// Content published under the private key is fetchable under the public
/// key. Both halves are opaque key strings; slot addresses are formed by
/// appending `<code>-<slot>` to one of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keypair {
    pub private_key: String,
    pub public_key: String,
}

/// Outcome of a fetch
#[derive(Debug, Clone)]
pub enum FetchResult {
    /// Content found under the key
    Found(Vec<u8>),
    /// Nothing published under the key yet; may appear later
    NotFound,
    /// Unrecoverable failure for this key (e.g. malformed address);
    /// retrying the same key cannot succeed
    Fatal(String),
    /// The connection to the store was lost
    ConnectionLost,
}

/// Outcome of a publish
#[derive(Debug, Clone)]
pub enum PublishResult {
    /// Content committed under the key
    Ok,
    /// Different content already exists under the key
    Collision,
    /// Some other failure, identified by a store-specific code
    Failure(i32),
    /// The connection to the store was lost
    ConnectionLost,
}

/// Error from keypair operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The connection to the store was lost
    ConnectionLost,
    /// The given key string is not a valid key for this store
    InvalidKey(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::ConnectionLost => write!(f, "store connection lost"),
            StoreError::InvalidKey(key) => write!(f, "invalid key: {}", key),
        }
    }
}

impl std::error::Error for StoreError {}

/// The content-addressed publish/fetch network
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch the content published under `key`
    async fn fetch(&self, key: &str) -> FetchResult;

    /// Publish `data` under `key`
    ///
    /// Once the store acknowledges a publish it cannot be undone.
    /// Republishing identical content under the same key succeeds;
    /// different content collides.
    async fn publish(&self, key: &str, data: &[u8]) -> PublishResult;

    /// Generate a fresh asymmetric address keypair
    async fn generate_keypair(&self) -> Result<Keypair, StoreError>;

    /// Recover the full keypair from its private half
    ///
    /// Used by the handshake responder, which receives only the channel
    /// private key and must derive the public half to poll with.
    fn keypair_from_private(&self, private_key: &str) -> Result<Keypair, StoreError>;
}
