//! Handshake-accepted (CTS) inserter
//!
//! Publishes the minimal reply to an accepted handshake and retries with
//! fixed backoff until the publish is confirmed, at which point the
//! recipient state advances to cts-sent. Idempotent: once the state shows
//! the reply was committed, re-invocation is a no-op.

use std::sync::Arc;

use tracing::{debug, error};

use crate::data::props_keys;
use crate::network::wire;
use crate::protocol::channel::{states, ChannelInner, InsertOutcome};

impl ChannelInner {
    pub(crate) fn spawn_cts_inserter(&self) {
        debug!(channel = %self.channel_id, "scheduling CTS inserter");
        let inner = self.arc();
        self.spawn(async move { inner.run_cts_inserter().await });
    }

    async fn run_cts_inserter(self: Arc<Self>) {
        loop {
            if !self.is_running() {
                return;
            }

            let recipient_state = {
                let props = self.props.lock().unwrap();
                match props.get(props_keys::RECIPIENT_STATE) {
                    Ok(state) => state,
                    Err(e) => {
                        error!(error = %e, "failed to read recipient state");
                        return;
                    }
                }
            };
            if recipient_state.as_deref() == Some(states::CTS_SENT) {
                return;
            }

            let message = wire::encode_headers(&[("messagetype", "cts")]);
            match self.insert_message(&message, "cts").await {
                InsertOutcome::Inserted => {
                    let result = {
                        let props = self.props.lock().unwrap();
                        props.put(props_keys::RECIPIENT_STATE, states::CTS_SENT)
                    };
                    if let Err(e) = result {
                        error!(error = %e, "failed to record CTS send");
                    }
                    return;
                }
                InsertOutcome::Retry => {
                    debug!(channel = %self.channel_id, "CTS insert failed, retrying later");
                    tokio::time::sleep(self.config.task_retry_delay).await;
                }
                InsertOutcome::Corrupt => return,
            }
        }
    }
}
