//! Delayed acknowledgement inserter
//!
//! One task per pending ack: waits until the jittered not-before time,
//! publishes the ack through the generic slot-publish routine, and only
//! then removes the durable ledger entry. Failures retry with fixed
//! backoff; at startup every surviving entry is rescheduled, with an
//! elapsed not-before meaning due now.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::data::current_time_millis;
use crate::network::wire;
use crate::protocol::channel::{ChannelInner, InsertOutcome};

impl ChannelInner {
    pub(crate) fn spawn_ack_inserter(&self, ack_id: u64, insert_after: i64) {
        let inner = self.arc();
        self.spawn(async move { inner.run_ack_inserter(ack_id, insert_after).await });
    }

    async fn run_ack_inserter(self: Arc<Self>, ack_id: u64, insert_after: i64) {
        debug!(channel = %self.channel_id, id = ack_id, "ack inserter running");

        loop {
            if !self.is_running() {
                return;
            }

            let now = current_time_millis();
            if now < insert_after {
                let remaining = Duration::from_millis((insert_after - now) as u64);
                debug!(
                    id = ack_id,
                    delay_ms = remaining.as_millis() as u64,
                    "rescheduling ack until inserting is allowed"
                );
                tokio::time::sleep(remaining).await;
                continue;
            }

            let message =
                wire::encode_headers(&[("messagetype", "ack"), ("id", &ack_id.to_string())]);
            match self.insert_message(&message, &format!("ack{}", ack_id)).await {
                InsertOutcome::Inserted => {
                    let removed = {
                        let ack_log = self.ack_log.lock().unwrap();
                        ack_log.remove(ack_id)
                    };
                    if let Err(e) = removed {
                        // The entry lingers and the ack is republished at
                        // the next startup, which the peer handles fine
                        error!(error = %e, "failed to remove ack log entry");
                    }
                    return;
                }
                InsertOutcome::Retry => {
                    debug!(id = ack_id, "ack insert failed, retrying later");
                    tokio::time::sleep(self.config.task_retry_delay).await;
                }
                InsertOutcome::Corrupt => return,
            }
        }
    }
}
