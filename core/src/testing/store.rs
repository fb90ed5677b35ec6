//! In-memory content-addressed store
//!
//! Behaves like the real store seen from one process: content published
//! under a private key is fetchable under the matching public key,
//! republishing identical content succeeds, differing content collides.
//! Publish outcomes and fetch results can be scripted per test.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::network::store::{FetchResult, Keypair, PublishResult, Store, StoreError};

const PRIVATE_PREFIX: &str = "sk-";
const PUBLIC_PREFIX: &str = "pk-";

#[derive(Default)]
struct StoreState {
    /// Canonical (public-key) address -> content
    entries: HashMap<String, Vec<u8>>,
    /// Every publish call, in order, by canonical address
    publish_log: Vec<String>,
    /// Scripted outcomes consumed before normal publish behavior
    scripted_publishes: VecDeque<PublishResult>,
    /// Scripted fetch results per canonical address
    scripted_fetches: HashMap<String, FetchResult>,
}

/// An in-memory fake of the content-addressed store
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    next_keypair: AtomicU64,
}

/// Map an address to its fetchable (public) form
fn canonical(key: &str) -> String {
    match key.strip_prefix(PRIVATE_PREFIX) {
        Some(rest) => format!("{}{}", PUBLIC_PREFIX, rest),
        None => key.to_string(),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place content directly under a fetchable address
    pub fn insert_direct(&self, key: &str, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.entries.insert(canonical(key), data.to_vec());
    }

    /// Content currently stored under an address, if any
    pub fn content_at(&self, key: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state.entries.get(&canonical(key)).cloned()
    }

    /// All stored addresses starting with the given prefix
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut keys: Vec<String> = state
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Number of publish calls made so far
    pub fn publish_count(&self) -> usize {
        self.state.lock().unwrap().publish_log.len()
    }

    /// Canonical addresses of all publish calls, in order
    pub fn published_keys(&self) -> Vec<String> {
        self.state.lock().unwrap().publish_log.clone()
    }

    /// Queue an outcome returned by the next publish call instead of the
    /// normal behavior (the call is still logged)
    pub fn script_publish(&self, outcome: PublishResult) {
        self.state
            .lock()
            .unwrap()
            .scripted_publishes
            .push_back(outcome);
    }

    /// Force a fetch result for one address
    pub fn script_fetch(&self, key: &str, result: FetchResult) {
        self.state
            .lock()
            .unwrap()
            .scripted_fetches
            .insert(canonical(key), result);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn fetch(&self, key: &str) -> FetchResult {
        let canonical_key = canonical(key);
        let state = self.state.lock().unwrap();
        if let Some(result) = state.scripted_fetches.get(&canonical_key) {
            return result.clone();
        }
        match state.entries.get(&canonical_key) {
            Some(content) => FetchResult::Found(content.clone()),
            None => FetchResult::NotFound,
        }
    }

    async fn publish(&self, key: &str, data: &[u8]) -> PublishResult {
        let canonical_key = canonical(key);
        let mut state = self.state.lock().unwrap();
        state.publish_log.push(canonical_key.clone());

        if let Some(outcome) = state.scripted_publishes.pop_front() {
            return outcome;
        }

        match state.entries.get(&canonical_key) {
            // Identical content republished under the same address
            // succeeds; differing content collides
            Some(existing) if existing == data => PublishResult::Ok,
            Some(_) => PublishResult::Collision,
            None => {
                state.entries.insert(canonical_key, data.to_vec());
                PublishResult::Ok
            }
        }
    }

    async fn generate_keypair(&self) -> Result<Keypair, StoreError> {
        let n = self.next_keypair.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Keypair {
            private_key: format!("{}{}:", PRIVATE_PREFIX, n),
            public_key: format!("{}{}:", PUBLIC_PREFIX, n),
        })
    }

    fn keypair_from_private(&self, private_key: &str) -> Result<Keypair, StoreError> {
        match private_key.strip_prefix(PRIVATE_PREFIX) {
            Some(rest) => Ok(Keypair {
                private_key: private_key.to_string(),
                public_key: format!("{}{}", PUBLIC_PREFIX, rest),
            }),
            None => Err(StoreError::InvalidKey(private_key.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_then_fetch_via_public_key() {
        let store = MemoryStore::new();
        let keypair = store.generate_keypair().await.unwrap();

        let address = format!("{}i-slot1", keypair.private_key);
        assert!(matches!(
            store.publish(&address, b"hello").await,
            PublishResult::Ok
        ));

        let fetch_address = format!("{}i-slot1", keypair.public_key);
        match store.fetch(&fetch_address).await {
            FetchResult::Found(content) => assert_eq!(content, b"hello"),
            other => panic!("unexpected fetch result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_identical_republish_succeeds_differing_collides() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.publish("sk-1:i-a", b"content").await,
            PublishResult::Ok
        ));
        assert!(matches!(
            store.publish("sk-1:i-a", b"content").await,
            PublishResult::Ok
        ));
        assert!(matches!(
            store.publish("sk-1:i-a", b"different").await,
            PublishResult::Collision
        ));
    }

    #[tokio::test]
    async fn test_scripted_publish_outcome() {
        let store = MemoryStore::new();
        store.script_publish(PublishResult::Collision);

        assert!(matches!(
            store.publish("sk-1:i-a", b"x").await,
            PublishResult::Collision
        ));
        assert!(matches!(
            store.publish("sk-1:i-a", b"x").await,
            PublishResult::Ok
        ));
        assert_eq!(store.publish_count(), 2);
    }

    #[tokio::test]
    async fn test_keypair_from_private() {
        let store = MemoryStore::new();
        let keypair = store.keypair_from_private("sk-9:").unwrap();
        assert_eq!(keypair.public_key, "pk-9:");

        assert!(store.keypair_from_private("garbage").is_err());
    }
}
