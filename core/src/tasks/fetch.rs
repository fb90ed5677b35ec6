//! Inbound poll loop
//!
//! Walks the receive slot sequence with a bounded look-ahead, classifies
//! whatever arrives and advances the committed cursor over consumed
//! slots. Runs while the channel has not fully timed out (the poll window
//! is twice the channel lifetime, so in-flight traffic can drain after
//! sends stop). At most one loop instance is active per channel.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, error, info, trace};

use crate::data::{current_time_millis, props_keys};
use crate::network::store::FetchResult;
use crate::network::wire::{self, Payload};
use crate::protocol::channel::{states, ChannelInner};
use crate::security::slots::SlotSequencer;

/// Outcome of one pass over the look-ahead window
pub(crate) enum FetchPass {
    /// Reschedule the loop after the fixed backoff
    Continue,
    /// The channel is past its poll window or its record is unusable
    Stop,
}

impl ChannelInner {
    /// Start the poll loop if the channel record is ready for fetching
    ///
    /// Idles (without spawning) until a fetch cursor, fetch code and
    /// channel public key exist. Re-entrant invocation while a loop is
    /// active is a no-op.
    pub(crate) fn start_fetcher(&self) {
        let ready = {
            let props = self.props.lock().unwrap();
            let read = (|| {
                Ok::<_, rusqlite::Error>(
                    props.get(props_keys::FETCH_SLOT)?.is_some()
                        && props.get(props_keys::FETCH_CODE)?.is_some()
                        && props.get(props_keys::PUBLIC_KEY)?.is_some(),
                )
            })();
            match read {
                Ok(ready) => ready,
                Err(e) => {
                    error!(error = %e, "failed to read fetch state");
                    false
                }
            }
        };
        if !ready {
            debug!(channel = %self.channel_id, "fetcher idle, channel not negotiated yet");
            return;
        }

        if self
            .fetcher_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        debug!(channel = %self.channel_id, "scheduling fetcher");
        let inner = self.arc();
        self.spawn(async move {
            inner.clone().run_fetcher().await;
            inner.fetcher_active.store(false, Ordering::SeqCst);
        });
    }

    async fn run_fetcher(self: Arc<Self>) {
        loop {
            if !self.is_running() {
                break;
            }
            match self.fetch_pass().await {
                FetchPass::Continue => {
                    tokio::time::sleep(self.config.task_retry_delay).await;
                }
                FetchPass::Stop => break,
            }
        }
        debug!(channel = %self.channel_id, "fetcher stopped");
    }

    /// One pass over the look-ahead window
    pub(crate) async fn fetch_pass(&self) -> FetchPass {
        // The extra lifetime lets us keep fetching after sends stop
        let timeout = {
            let props = self.props.lock().unwrap();
            match props.get_i64(props_keys::TIMEOUT) {
                // Unset or unparseable: assume we haven't timed out
                Ok(value) => value.unwrap_or(i64::MAX),
                Err(e) => {
                    error!(error = %e, "failed to read timeout");
                    return FetchPass::Continue;
                }
            }
        };
        if timeout < current_time_millis() - self.config.lifetime_millis() {
            debug!(channel = %self.channel_id, "channel has timed out, won't fetch");
            return FetchPass::Stop;
        }

        let (fetch_slot, fetch_code, public_key) = {
            let props = self.props.lock().unwrap();
            let read = (|| {
                Ok::<_, rusqlite::Error>((
                    props.get(props_keys::FETCH_SLOT)?,
                    props.get(props_keys::FETCH_CODE)?,
                    props.get(props_keys::PUBLIC_KEY)?,
                ))
            })();
            match read {
                Ok(fields) => fields,
                Err(e) => {
                    error!(error = %e, "failed to read fetch state");
                    return FetchPass::Continue;
                }
            }
        };
        let Some(fetch_slot) = fetch_slot else {
            error!(
                channel = %self.channel_id,
                "channel record has no '{}' entry",
                props_keys::FETCH_SLOT
            );
            return FetchPass::Stop;
        };
        let Some(fetch_code) = fetch_code else {
            error!(
                channel = %self.channel_id,
                "channel record has no '{}' entry",
                props_keys::FETCH_CODE
            );
            return FetchPass::Stop;
        };
        let Some(public_key) = public_key else {
            error!(
                channel = %self.channel_id,
                "channel record has no '{}' entry",
                props_keys::PUBLIC_KEY
            );
            return FetchPass::Stop;
        };

        let mut sequencer = match SlotSequencer::new(&fetch_slot, self.config.poll_ahead) {
            Ok(sequencer) => sequencer,
            Err(e) => {
                error!(channel = %self.channel_id, error = %e, "fetch cursor is corrupt");
                return FetchPass::Stop;
            }
        };
        let base_key = format!("{}{}-", public_key, fetch_code);

        while let Some(slot) = sequencer.next() {
            let key = format!("{}{}", base_key, slot);
            trace!(key = %key, "attempting to fetch");

            match self.store.fetch(&key).await {
                FetchResult::NotFound => {
                    trace!(slot = %slot, "slot unused yet");
                    continue;
                }
                FetchResult::Fatal(reason) => {
                    // Nothing recoverable under this key
                    info!(
                        slot = %slot,
                        reason = %reason,
                        "fatal fetch failure, marking slot consumed"
                    );
                    sequencer.commit(&slot);
                    if !self.save_fetch_cursor(&sequencer) {
                        return FetchPass::Continue;
                    }
                }
                FetchResult::ConnectionLost => {
                    debug!(channel = %self.channel_id, "store connection lost while fetching");
                    return FetchPass::Continue;
                }
                FetchResult::Found(bytes) => {
                    debug!(slot = %slot, size = bytes.len(), "fetch successful");
                    if self.dispatch_payload(&bytes) {
                        sequencer.commit(&slot);
                        if !self.save_fetch_cursor(&sequencer) {
                            return FetchPass::Continue;
                        }
                    }
                }
            }
        }

        FetchPass::Continue
    }

    /// Persist the committed cursor; returns false on database failure
    fn save_fetch_cursor(&self, sequencer: &SlotSequencer) -> bool {
        let props = self.props.lock().unwrap();
        match props.put(props_keys::FETCH_SLOT, &sequencer.committed()) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "failed to persist fetch cursor");
                false
            }
        }
    }

    /// Classify and handle one arriving payload
    ///
    /// Returns whether the slot should be marked consumed.
    fn dispatch_payload(&self, bytes: &[u8]) -> bool {
        let Some(parsed) = wire::parse_message(bytes) else {
            error!(channel = %self.channel_id, "got payload without header block, discarding");
            return true;
        };

        match wire::classify(parsed) {
            Payload::Cts => {
                debug!(channel = %self.channel_id, "successfully received CTS");
                let result = {
                    let props = self.props.lock().unwrap();
                    props.put(props_keys::SENDER_STATE, states::CTS_RECEIVED)
                };
                match result {
                    Ok(()) => true,
                    Err(e) => {
                        error!(error = %e, "failed to record received CTS");
                        false
                    }
                }
            }
            Payload::Message { id, body } => self.handle_data_message(id, &body),
            Payload::Ack { ids } => {
                let Some(callback) = self.callback.get() else {
                    error!(channel = %self.channel_id, "no callback set, can't dispatch ack");
                    return false;
                };
                for id in ids {
                    debug!(id = id, "got ack");
                    callback.on_ack_received(id);
                }
                true
            }
            Payload::Unknown(reason) => {
                error!(channel = %self.channel_id, reason = %reason, "discarding payload");
                true
            }
        }
    }

    /// Handle an arriving data message
    ///
    /// The ack obligation is persisted with a randomized delay before
    /// anything else, so it survives a crash even if delivery fails; the
    /// delay keeps ack timing from correlating with receipt. The slot is
    /// consumed only if the delivery collaborator accepted the message.
    fn handle_data_message(&self, message_id: u64, body: &[u8]) -> bool {
        let max_delay = self.config.max_ack_delay.as_millis() as i64;
        let jitter = rand::thread_rng().gen_range(0..=max_delay.max(0));
        let insert_after = current_time_millis() + jitter;

        {
            let ack_log = self.ack_log.lock().unwrap();
            if let Err(e) = ack_log.add(message_id, insert_after) {
                error!(error = %e, "failed to write ack log");
                return false;
            }
        }

        let Some(callback) = self.callback.get() else {
            error!(channel = %self.channel_id, "no callback set, can't deliver message");
            return false;
        };
        if !callback.handle_message(&self.channel(), body, message_id) {
            debug!(id = message_id, "delivery collaborator rejected message");
            return false;
        }

        self.spawn_ack_inserter(message_id, insert_after);
        true
    }
}
