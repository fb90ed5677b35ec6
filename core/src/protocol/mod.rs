//! Public interface
//!
//! `Channel` is the engine for one conversation between two identities.
//! Everything else here configures it (`ChannelConfig`), reports its
//! failures (`ChannelError`) or receives its events
//! (`ChannelEventCallback`).

pub mod channel;
pub mod config;
pub mod error;
pub mod events;

pub use channel::Channel;
pub use config::ChannelConfig;
pub use error::ChannelError;
pub use events::ChannelEventCallback;
