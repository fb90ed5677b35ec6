//! The channel engine
//!
//! One `Channel` is the persistent session between the local identity and
//! one remote identity. It owns the per-channel record, the generic
//! slot-publish routine used for data messages, handshake replies and
//! acks, and the entry points the external collaborators call:
//! `send_message` from the outgoing mail queue and `process_rts` from the
//! handshake inbox fetcher.
//!
//! Background automation (handshake sender, CTS inserter, fetch loop, ack
//! inserter) lives in `tasks/` as impls on the shared inner state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use rusqlite::Connection;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::data::{self, current_time_millis, props_keys, AckLog, ChannelProps};
use crate::network::contact::ContactResolver;
use crate::network::store::{PublishResult, Store};
use crate::network::wire::{self, rts_keys, WireMessage};
use crate::protocol::{ChannelConfig, ChannelError, ChannelEventCallback};
use crate::security::identity::LocalIdentity;
use crate::security::slots;

/// Values of the two handshake state fields
pub(crate) mod states {
    pub const RTS_SENT: &str = "rts-sent";
    pub const CTS_RECEIVED: &str = "cts-received";
    pub const RTS_RECEIVED: &str = "rts-received";
    pub const CTS_SENT: &str = "cts-sent";
}

/// Outcome of the generic slot-publish routine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InsertOutcome {
    /// Published and the slot reservation was cleared
    Inserted,
    /// Transient failure; retrying later is safe and will reuse the
    /// reserved slot if one was persisted
    Retry,
    /// Required persisted state is absent or unreadable; retrying blindly
    /// would loop forever
    Corrupt,
}

/// A store-and-forward messaging channel between two identities
#[derive(Clone)]
pub struct Channel {
    pub(crate) inner: Arc<ChannelInner>,
}

pub(crate) struct ChannelInner {
    pub(crate) channel_id: String,
    pub(crate) identity: LocalIdentity,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) resolver: Arc<dyn ContactResolver>,
    pub(crate) config: ChannelConfig,
    /// The one lock guarding this channel's persistent record; every
    /// read-modify-write sequence holds it for the entire sequence and it
    /// is never held across an await
    pub(crate) props: Mutex<ChannelProps>,
    pub(crate) ack_log: Mutex<AckLog>,
    pub(crate) callback: OnceLock<Arc<dyn ChannelEventCallback>>,
    pub(crate) running: AtomicBool,
    /// At most one fetch loop instance per channel
    pub(crate) fetcher_active: AtomicBool,
    /// At most one handshake sender instance per channel
    pub(crate) rts_sender_active: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Back-reference for handing owned clones to spawned tasks
    self_ref: Weak<ChannelInner>,
}

impl Channel {
    /// Open (or create) the channel record for `channel_id`
    ///
    /// Fails with `TimedOut` when the stored timeout shows the channel is
    /// past its fetch grace window; an unparseable timeout is treated the
    /// same way. A channel with no timeout yet gets the sentinel maximum
    /// until the handshake assigns a real one.
    pub fn new(
        db: Arc<Mutex<Connection>>,
        store: Arc<dyn Store>,
        resolver: Arc<dyn ContactResolver>,
        identity: LocalIdentity,
        channel_id: &str,
        config: ChannelConfig,
    ) -> Result<Channel, ChannelError> {
        let props = ChannelProps::new(db.clone(), channel_id);
        props.ensure_channel()?;

        match props.get(props_keys::TIMEOUT)? {
            Some(raw) => match raw.parse::<i64>() {
                Ok(timeout) => {
                    if timeout < current_time_millis() - config.lifetime_millis() {
                        debug!(channel = %channel_id, "channel has timed out");
                        return Err(ChannelError::TimedOut);
                    }
                }
                Err(_) => {
                    error!(
                        channel = %channel_id,
                        value = %raw,
                        "illegal value in timeout field, assuming timed out"
                    );
                    return Err(ChannelError::TimedOut);
                }
            },
            None => {
                // Probably because we haven't sent the RTS yet
                debug!(channel = %channel_id, "setting sentinel timeout on channel record");
                props.put_i64(props_keys::TIMEOUT, i64::MAX)?;
            }
        }

        let ack_log = AckLog::new(db, channel_id);

        Ok(Channel {
            inner: Arc::new_cyclic(|self_ref| ChannelInner {
                channel_id: channel_id.to_string(),
                identity,
                store,
                resolver,
                config,
                props: Mutex::new(props),
                ack_log: Mutex::new(ack_log),
                callback: OnceLock::new(),
                running: AtomicBool::new(true),
                fetcher_active: AtomicBool::new(false),
                rts_sender_active: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
                self_ref: self_ref.clone(),
            }),
        })
    }

    /// Delete a channel and its entire persisted record
    pub fn delete_channel(
        db: &Arc<Mutex<Connection>>,
        channel_id: &str,
    ) -> Result<(), ChannelError> {
        let conn = db.lock().unwrap();
        data::channel::delete_channel(&conn, channel_id)?;
        Ok(())
    }

    /// Set the event callback
    ///
    /// The callback is a one-time-settable back-reference; setting it a
    /// second time is a programming error and panics.
    pub fn set_callback(&self, callback: Arc<dyn ChannelEventCallback>) {
        if self.inner.callback.set(callback).is_err() {
            panic!("channel callback has already been set");
        }
    }

    /// Record which remote identity this channel talks to
    pub fn set_remote_identity(&self, remote_id: &str) -> Result<(), ChannelError> {
        let props = self.inner.props.lock().unwrap();
        props.put(props_keys::REMOTE_ID, remote_id)?;
        Ok(())
    }

    /// The remote identity, if known yet
    pub fn remote_identity(&self) -> Result<Option<String>, ChannelError> {
        let props = self.inner.props.lock().unwrap();
        Ok(props.get(props_keys::REMOTE_ID)?)
    }

    /// The channel private key, if allocated yet
    pub fn private_key(&self) -> Result<Option<String>, ChannelError> {
        let props = self.inner.props.lock().unwrap();
        Ok(props.get(props_keys::PRIVATE_KEY)?)
    }

    /// Whether the channel is still inside its sending lifetime
    pub fn can_send_messages(&self) -> bool {
        let props = self.inner.props.lock().unwrap();
        match props.get_i64(props_keys::TIMEOUT) {
            Ok(Some(timeout)) => timeout >= current_time_millis(),
            Ok(None) => {
                debug!(channel = %self.inner.channel_id, "timeout field unreadable");
                false
            }
            Err(e) => {
                error!(channel = %self.inner.channel_id, error = %e, "failed to read timeout");
                false
            }
        }
    }

    /// Send a data message over the channel
    ///
    /// Returns `Ok(true)` once the message is committed to the store,
    /// `Ok(false)` on failure (the caller owns retry scheduling), and
    /// `Err(TimedOut)` once the channel is past its timeout. Retrying with
    /// the same id reuses any reserved slot, so a crash mid-publish never
    /// consumes a second slot.
    pub async fn send_message(
        &self,
        payload: &[u8],
        message_id: u64,
    ) -> Result<bool, ChannelError> {
        {
            let props = self.inner.props.lock().unwrap();
            if let Some(raw) = props.get(props_keys::TIMEOUT)? {
                let timeout = raw.parse::<i64>().unwrap_or(0);
                if timeout < current_time_millis() {
                    return Err(ChannelError::TimedOut);
                }
            }
        }

        let message = wire::encode_message(
            &[("messagetype", "message"), ("id", &message_id.to_string())],
            payload,
        );

        let outcome = self
            .inner
            .insert_message(&message, &format!("msg{}", message_id))
            .await;
        Ok(outcome == InsertOutcome::Inserted)
    }

    /// Process an accepted incoming handshake
    ///
    /// Called by the handshake inbox collaborator with the decrypted,
    /// verified RTS payload. Adopts the channel keypair and slot cursors
    /// it carries, flips the recipient state, and starts the reply and
    /// fetch tasks. Malformed handshakes are logged and dropped; repeated
    /// handshakes for an established recipient state are skipped.
    pub async fn process_rts(&self, rts: &WireMessage) -> Result<(), ChannelError> {
        debug!(channel = %self.inner.channel_id, "processing RTS");

        let Some(channel_key) = rts.get(rts_keys::CHANNEL) else {
            debug!("RTS is missing the channel key, dropping");
            return Ok(());
        };
        let keypair = match self.inner.store.keypair_from_private(channel_key) {
            Ok(keypair) => keypair,
            Err(e) => {
                debug!(error = %e, "RTS contained malformed channel key, dropping");
                return Ok(());
            }
        };

        let (Some(initiator_slot), Some(responder_slot)) = (
            rts.get(rts_keys::INITIATOR_SLOT),
            rts.get(rts_keys::RESPONDER_SLOT),
        ) else {
            debug!("RTS is missing a slot field, dropping");
            return Ok(());
        };
        if slots::next_slot(initiator_slot).is_err() || slots::next_slot(responder_slot).is_err() {
            debug!("RTS contained a malformed slot, dropping");
            return Ok(());
        }
        let Some(timeout) = rts.get(rts_keys::TIMEOUT).and_then(|v| v.parse::<i64>().ok())
        else {
            debug!("RTS is missing a valid timeout, dropping");
            return Ok(());
        };

        {
            let props = self.inner.props.lock().unwrap();

            if props.get(props_keys::RECIPIENT_STATE)?.is_some() {
                debug!("skipping RTS processing, recipient state already set");
                return Ok(());
            }

            if props.get(props_keys::PRIVATE_KEY)?.is_none() {
                props.put(props_keys::PRIVATE_KEY, &keypair.private_key)?;
                props.put(props_keys::PUBLIC_KEY, &keypair.public_key)?;
            }

            props.put(props_keys::FETCH_SLOT, initiator_slot)?;
            props.put(props_keys::FETCH_CODE, "i")?;
            if props.get(props_keys::SEND_CODE)?.is_none() {
                props.put(props_keys::SEND_CODE, "r")?;
            }
            if props.get(props_keys::SEND_SLOT)?.is_none() {
                props.put(props_keys::SEND_SLOT, responder_slot)?;
            }
            props.put_timeout_monotonic(timeout)?;
            props.put(props_keys::RECIPIENT_STATE, states::RTS_RECEIVED)?;
        }

        self.inner.spawn_cts_inserter();
        self.inner.start_fetcher();
        Ok(())
    }

    /// Start the channel's background tasks
    ///
    /// Safe to call once per process start: resumes the fetch loop and the
    /// handshake sender where the record left off, replays every surviving
    /// ack-ledger entry, and re-triggers the handshake reply if it was
    /// never confirmed.
    pub fn start_tasks(&self) {
        self.inner.start_fetcher();

        let sender_state = {
            let props = self.inner.props.lock().unwrap();
            props.get(props_keys::SENDER_STATE).unwrap_or_else(|e| {
                error!(error = %e, "failed to read sender state");
                None
            })
        };
        if sender_state.as_deref() != Some(states::CTS_RECEIVED) {
            self.inner.start_rts_sender();
        }

        // Resume acks that were logged but never confirmed inserted
        let entries = {
            let ack_log = self.inner.ack_log.lock().unwrap();
            ack_log.entries()
        };
        match entries {
            Ok(entries) => {
                for entry in entries {
                    self.inner
                        .spawn_ack_inserter(entry.message_id, entry.insert_after);
                }
            }
            Err(e) => error!(error = %e, "failed to read ack log"),
        }

        // Resume the handshake reply if it never committed
        let recipient_state = {
            let props = self.inner.props.lock().unwrap();
            props.get(props_keys::RECIPIENT_STATE).unwrap_or_else(|e| {
                error!(error = %e, "failed to read recipient state");
                None
            })
        };
        if recipient_state.as_deref() == Some(states::RTS_RECEIVED) {
            self.inner.spawn_cts_inserter();
        }
    }

    /// Stop all background tasks, aborting in-flight network calls
    ///
    /// Used at process shutdown only. Nothing is rolled back: a publish
    /// already acknowledged by the store stays published, and retries
    /// after restart are idempotent because the slot reservation survives.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let mut tasks = self.inner.tasks.lock().unwrap();
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Channel [{}]", self.inner.channel_id)
    }
}

impl ChannelInner {
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// An owned reference to this inner state, for spawned tasks
    ///
    /// Always succeeds while any `Channel` handle or task is alive, which
    /// is the only time methods on `self` can run.
    pub(crate) fn arc(&self) -> Arc<ChannelInner> {
        self.self_ref
            .upgrade()
            .expect("channel state dropped while in use")
    }

    /// A public handle to this channel, for callback invocations
    pub(crate) fn channel(&self) -> Channel {
        Channel { inner: self.arc() }
    }

    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.retain(|task| !task.is_finished());
        tasks.push(tokio::spawn(future));
    }

    /// Reserve the slot for `prefix`, reusing an outstanding reservation
    ///
    /// Claims the send cursor and advances it, persisting the binding
    /// before any network publish so a crash mid-publish retries against
    /// the same slot instead of silently consuming another one. Returns
    /// `None` when required state is missing.
    fn claim_slot(
        &self,
        props: &ChannelProps,
        binding_key: &str,
        prefix: &str,
    ) -> rusqlite::Result<Option<String>> {
        if let Some(slot) = props.get(binding_key)? {
            return Ok(Some(slot));
        }
        self.claim_fresh_slot(props, binding_key, prefix)
    }

    /// Claim the current send cursor for `prefix`, ignoring any reservation
    fn claim_fresh_slot(
        &self,
        props: &ChannelProps,
        binding_key: &str,
        prefix: &str,
    ) -> rusqlite::Result<Option<String>> {
        let Some(cursor) = props.get(props_keys::SEND_SLOT)? else {
            error!(
                channel = %self.channel_id,
                "channel record has no '{}' entry",
                props_keys::SEND_SLOT
            );
            return Ok(None);
        };
        let next = match slots::next_slot(&cursor) {
            Ok(next) => next,
            Err(e) => {
                error!(channel = %self.channel_id, error = %e, "send cursor is corrupt");
                return Ok(None);
            }
        };
        props.put(props_keys::SEND_SLOT, &next)?;
        props.put(binding_key, &cursor)?;
        debug!(slot = %cursor, message = %prefix, "assigned slot to message");
        Ok(Some(cursor))
    }

    /// Publish `message` to the next available slot
    ///
    /// The generic routine behind data messages, handshake replies and
    /// acks. On success the reservation is deleted; if that delete fails
    /// the whole operation reports `Retry` even though the network write
    /// succeeded, because a lingering reservation would leak which slot
    /// the message used.
    pub(crate) async fn insert_message(&self, message: &[u8], prefix: &str) -> InsertOutcome {
        let binding_key = format!("{}{}", prefix, props_keys::MSG_SLOT);

        let (private_key, send_code) = {
            let props = self.props.lock().unwrap();
            let private_key = match props.get(props_keys::PRIVATE_KEY) {
                Ok(Some(key)) => key,
                Ok(None) => {
                    debug!(channel = %self.channel_id, "can't insert, missing private key");
                    return InsertOutcome::Corrupt;
                }
                Err(e) => {
                    error!(error = %e, "failed to read private key");
                    return InsertOutcome::Retry;
                }
            };
            let send_code = match props.get(props_keys::SEND_CODE) {
                Ok(Some(code)) => code,
                Ok(None) => {
                    debug!(channel = %self.channel_id, "can't insert, missing send code");
                    return InsertOutcome::Corrupt;
                }
                Err(e) => {
                    error!(error = %e, "failed to read send code");
                    return InsertOutcome::Retry;
                }
            };
            (private_key, send_code)
        };

        loop {
            let slot = {
                let props = self.props.lock().unwrap();
                match self.claim_slot(&props, &binding_key, prefix) {
                    Ok(Some(slot)) => slot,
                    Ok(None) => return InsertOutcome::Corrupt,
                    Err(e) => {
                        error!(error = %e, "failed to reserve slot");
                        return InsertOutcome::Retry;
                    }
                }
            };

            let key = format!("{}{}-{}", private_key, send_code, slot);
            debug!(key = %key, "inserting data");

            match self.store.publish(&key, message).await {
                PublishResult::Ok => {
                    let removed = {
                        let props = self.props.lock().unwrap();
                        props.remove(&binding_key)
                    };
                    return match removed {
                        Ok(true) => {
                            debug!(message = %prefix, "insert successful");
                            InsertOutcome::Inserted
                        }
                        Ok(false) => {
                            error!(
                                message = %prefix,
                                "slot reservation was already gone, will try again later"
                            );
                            InsertOutcome::Retry
                        }
                        Err(e) => {
                            // The insert succeeded but the reservation
                            // couldn't be removed; leaving it would leak
                            // the consumed slot
                            error!(
                                error = %e,
                                "couldn't remove slot reservation, will try again later"
                            );
                            InsertOutcome::Retry
                        }
                    };
                }
                PublishResult::Collision => {
                    let reclaimed = {
                        let props = self.props.lock().unwrap();
                        self.claim_fresh_slot(&props, &binding_key, prefix)
                    };
                    match reclaimed {
                        Ok(Some(slot)) => {
                            debug!(slot = %slot, message = %prefix, "insert collided, re-slotted");
                        }
                        Ok(None) => return InsertOutcome::Corrupt,
                        Err(e) => {
                            error!(error = %e, "failed to re-slot after collision");
                            return InsertOutcome::Retry;
                        }
                    }
                }
                PublishResult::Failure(code) => {
                    debug!(code = code, "insert failed");
                    return InsertOutcome::Retry;
                }
                PublishResult::ConnectionLost => {
                    debug!("store connection lost during insert");
                    return InsertOutcome::Retry;
                }
            }
        }
    }
}
