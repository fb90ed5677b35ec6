//! Deaddrop Core
//!
//! Asynchronous store-and-forward messaging channels between two identities
//! over a public, content-addressed publish/fetch network.
//!
//! The underlying network offers only "insert content under key K" and
//! "fetch content under key K", both of which may fail transiently. On top
//! of that primitive this crate provides:
//! - A two-phase RTS/CTS handshake that establishes a per-channel keypair
//!   and initial slot cursors
//! - Slot-based deterministic addressing: each message lands at a fresh
//!   address derived from a one-way hash chain
//! - A hybrid-encryption envelope for the handshake payload
//! - At-least-once delivery with durable, jitter-delayed acknowledgements
//!
//! # Module Structure
//!
//! - `protocol/`: Public interface (Channel, config, errors, callbacks)
//! - `tasks/`: Background automation (handshake sender, CTS inserter,
//!   fetch loop, ack inserter)
//! - `network/`: External collaborator seams (content-addressed store,
//!   wire framing, contact resolution)
//! - `data/`: SQLite persistence (channel records, ack ledger)
//! - `security/`: Cryptography (slot hash chain, envelope, identity keys)
//! - `testing/`: Test utilities (in-memory store)
//!
//! # Quick Start
//!
//! ```ignore
//! use deaddrop_core::{Channel, ChannelConfig};
//!
//! let channel = Channel::new(db, store, resolver, identity, "channel-id",
//!     ChannelConfig::default())?;
//! channel.set_remote_identity("remote-identity-id")?;
//! channel.set_callback(callback);
//! channel.start_tasks();
//!
//! // Queue a message; delivery and acknowledgement happen in the background
//! channel.send_message(b"...", 1).await?;
//! ```

// Public interface
pub mod protocol;

// Internal modules
pub(crate) mod tasks;

// Infrastructure modules (pub for flexibility)
pub mod data;
pub mod network;
pub mod security;
pub mod testing;

// Re-export main API types for convenience
pub use protocol::{
    Channel,
    ChannelConfig,
    ChannelError,
    ChannelEventCallback,
};
pub use network::contact::{ContactRecord, ContactResolver, ResolveError};
pub use network::store::{FetchResult, Keypair, PublishResult, Store, StoreError};
pub use security::identity::LocalIdentity;
