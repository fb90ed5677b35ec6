//! SQLite persistence
//!
//! All durable channel state lives in one SQLite database:
//! - `channels`: one row per channel
//! - `channel_props`: flat key-value record per channel (a missing key
//!   means "not yet set", never corruption)
//! - `ack_log`: received message ids awaiting acknowledgement

use std::time::{SystemTime, UNIX_EPOCH};

pub mod ack_log;
pub mod channel;
pub mod schema;

pub use ack_log::AckLog;
pub use channel::{props_keys, ChannelProps};
pub use schema::create_all_tables;

/// Current time as milliseconds since the Unix epoch
pub fn current_time_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
