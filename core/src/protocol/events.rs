//! Delivery and reliability callbacks
//!
//! The channel produces two events for its owner: an arriving data message
//! to deliver, and confirmation that a previously sent message was
//! acknowledged by the peer.

use crate::protocol::Channel;

/// Callback wired to a channel exactly once, post-construction
pub trait ChannelEventCallback: Send + Sync {
    /// Deliver a received data message
    ///
    /// Returning `false` rejects the delivery: the slot is not consumed
    /// and the message will be handed over again on a later poll.
    fn handle_message(&self, channel: &Channel, body: &[u8], message_id: u64) -> bool;

    /// A peer acknowledged the message previously sent with this id
    fn on_ack_received(&self, message_id: u64);
}
