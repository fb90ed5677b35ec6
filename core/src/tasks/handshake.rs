//! Handshake (RTS) sender
//!
//! Per-channel task that builds, signs, encrypts and publishes the
//! channel-opening message to the peer's handshake inbox, then
//! republishes on a fixed cadence until a response is observed. Stands
//! down as soon as either side's state shows the handshake has already
//! progressed, which breaks the tie when both peers originate
//! independently.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::data::{current_time_millis, props_keys};
use crate::network::contact::ResolveError;
use crate::network::store::PublishResult;
use crate::network::wire;
use crate::protocol::channel::{states, ChannelInner};
use crate::security::{envelope, slots};

/// Why an RTS attempt did not complete
enum RtsFailure {
    /// Transient; retry after the given delay
    RetryAfter(Duration),
    /// Local or permanent; give up without rescheduling
    Abort,
}

/// UTC date bucket appended to handshake inbox keys
fn date_bucket(now_millis: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(now_millis)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "1970-01-01".to_string())
}

impl ChannelInner {
    /// Start the handshake sender unless one is already active
    pub(crate) fn start_rts_sender(&self) {
        if self
            .rts_sender_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        debug!(channel = %self.channel_id, "scheduling RTS sender");
        let inner = self.arc();
        self.spawn(async move {
            inner.clone().run_rts_sender().await;
            inner.rts_sender_active.store(false, Ordering::SeqCst);
        });
    }

    async fn run_rts_sender(self: Arc<Self>) {
        loop {
            if !self.is_running() {
                return;
            }

            let delay = match self.send_rts_in() {
                Some(delay) => delay,
                None => {
                    debug!(channel = %self.channel_id, "RTS sender standing down");
                    return;
                }
            };
            if !delay.is_zero() {
                debug!(
                    channel = %self.channel_id,
                    delay_ms = delay.as_millis() as u64,
                    "rescheduling RTS sender for when the insert is due"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            match self.send_rts_once().await {
                Ok(()) => {
                    // Loop around; send_rts_in now yields the resend delay
                }
                Err(RtsFailure::RetryAfter(delay)) => {
                    debug!(
                        channel = %self.channel_id,
                        delay_ms = delay.as_millis() as u64,
                        "RTS attempt failed, retrying later"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(RtsFailure::Abort) => return,
            }
        }
    }

    /// Time until the RTS should be (re)sent, or `None` to stand down
    ///
    /// Standing down when the peer-derived recipient state already shows
    /// progress prevents both sides from redundantly completing the
    /// handshake independently.
    pub(crate) fn send_rts_in(&self) -> Option<Duration> {
        let read = {
            let props = self.props.lock().unwrap();
            (|| {
                Ok::<_, rusqlite::Error>((
                    props.get(props_keys::SENDER_STATE)?,
                    props.get(props_keys::RECIPIENT_STATE)?,
                    props.get(props_keys::RTS_SENT_AT)?,
                ))
            })()
        };
        let (sender_state, recipient_state, rts_sent_at) = match read {
            Ok(fields) => fields,
            Err(e) => {
                error!(error = %e, "failed to read handshake state");
                return None;
            }
        };

        if sender_state.as_deref() == Some(states::CTS_RECEIVED) {
            debug!(channel = %self.channel_id, "CTS has been received");
            return None;
        }
        if matches!(
            recipient_state.as_deref(),
            Some(states::RTS_RECEIVED) | Some(states::CTS_SENT)
        ) {
            debug!(channel = %self.channel_id, "RTS received from other side");
            return None;
        }

        if let Some(raw) = rts_sent_at {
            let sent_at = raw.parse::<i64>().unwrap_or_else(|_| {
                debug!(channel = %self.channel_id, "illegal rts-sent-at value, assuming 0");
                0
            });
            let resend_interval = self.config.rts_resend_interval.as_millis() as i64;
            let remaining = resend_interval - (current_time_millis() - sent_at);
            if remaining > 0 {
                return Some(Duration::from_millis(remaining as u64));
            }
        }

        Some(Duration::ZERO)
    }

    /// One full RTS build-and-publish attempt
    async fn send_rts_once(&self) -> Result<(), RtsFailure> {
        // Lazily allocate the channel keypair; generation happens off the
        // channel lock, and a racing allocation wins via set-once
        let have_keypair = {
            let props = self.props.lock().unwrap();
            props
                .get(props_keys::PRIVATE_KEY)
                .map_err(|e| {
                    error!(error = %e, "failed to read channel keypair");
                    RtsFailure::Abort
                })?
                .is_some()
        };
        if !have_keypair {
            debug!(channel = %self.channel_id, "making new channel keypair");
            let keypair = self.store.generate_keypair().await.map_err(|e| {
                debug!(error = %e, "keypair generation failed");
                RtsFailure::Abort
            })?;
            let props = self.props.lock().unwrap();
            let result = props
                .put_if_absent(props_keys::PRIVATE_KEY, &keypair.private_key)
                .and_then(|_| props.put_if_absent(props_keys::PUBLIC_KEY, &keypair.public_key));
            if let Err(e) = result {
                error!(error = %e, "failed to store channel keypair");
                return Err(RtsFailure::Abort);
            }
        }

        // Allocate slot cursors and direction codes, then read the values
        // the RTS will carry; one lock hold for the whole sequence
        let (channel_private_key, initiator_slot, responder_slot, timeout) = {
            let props = self.props.lock().unwrap();
            let sequence = (|| {
                props.put_if_absent(props_keys::SEND_SLOT, &slots::random_slot())?;
                props.put_if_absent(props_keys::FETCH_SLOT, &slots::random_slot())?;
                props.put(props_keys::SEND_CODE, "i")?;
                props.put(props_keys::FETCH_CODE, "r")?;

                let timeout = current_time_millis() + self.config.lifetime_millis();
                props.put_timeout_monotonic(timeout)?;

                let private_key = props.get(props_keys::PRIVATE_KEY)?;
                let initiator_slot = props.get(props_keys::SEND_SLOT)?;
                let responder_slot = props.get(props_keys::FETCH_SLOT)?;
                Ok::<_, rusqlite::Error>((private_key, initiator_slot, responder_slot, timeout))
            })();
            match sequence {
                Ok((Some(key), Some(initiator), Some(responder), timeout)) => {
                    (key, initiator, responder, timeout)
                }
                Ok(_) => {
                    error!(channel = %self.channel_id, "channel record lost handshake fields");
                    return Err(RtsFailure::Abort);
                }
                Err(e) => {
                    error!(error = %e, "failed to prepare handshake fields");
                    return Err(RtsFailure::Abort);
                }
            }
        };

        let remote_id = {
            let props = self.props.lock().unwrap();
            match props.get(props_keys::REMOTE_ID) {
                Ok(Some(id)) => id,
                Ok(None) => {
                    debug!(channel = %self.channel_id, "missing remote identity");
                    return Err(RtsFailure::Abort);
                }
                Err(e) => {
                    error!(error = %e, "failed to read remote identity");
                    return Err(RtsFailure::Abort);
                }
            }
        };

        // Resolve the peer's published record and our own reference
        let local_id = self.identity.identity_id.as_str();
        let recipient = self
            .resolver
            .resolve_contact_record(local_id, &remote_id)
            .await
            .map_err(|e| self.resolve_failure(&remote_id, e))?;
        let own_record = self
            .resolver
            .resolve_contact_record(local_id, local_id)
            .await
            .map_err(|e| self.resolve_failure(local_id, e))?;

        // Build, sign and encrypt
        let plaintext = wire::build_rts(
            &own_record.contact_reference,
            &remote_id,
            &channel_private_key,
            &initiator_slot,
            &responder_slot,
            timeout,
        );
        let sealed = envelope::seal(
            &plaintext,
            &self.identity.signing_key,
            &recipient.encryption_public_key,
        )
        .map_err(|e| {
            error!(error = %e, "failed to build handshake envelope");
            RtsFailure::Abort
        })?;

        // Publish to the peer's handshake inbox under a time-bucketed
        // suffix, walking past occupied sub-positions
        let bucket = date_bucket(current_time_millis());
        let mut published = false;
        for position in 1..=self.config.handshake_collision_limit {
            let key = format!("{}-{}-{}", recipient.handshake_inbox_key, bucket, position);
            debug!(key = %key, "inserting RTS");
            match self.store.publish(&key, &sealed).await {
                PublishResult::Ok => {
                    published = true;
                    break;
                }
                PublishResult::Collision => continue,
                PublishResult::Failure(code) => {
                    debug!(code = code, "RTS insert failed");
                    return Err(RtsFailure::RetryAfter(self.config.task_retry_delay));
                }
                PublishResult::ConnectionLost => {
                    debug!("store connection lost while inserting RTS");
                    return Err(RtsFailure::Abort);
                }
            }
        }
        if !published {
            debug!(channel = %self.channel_id, "handshake inbox bucket exhausted");
            return Err(RtsFailure::RetryAfter(self.config.task_retry_delay));
        }

        // Record the send, unless the CTS raced us while we were inserting
        {
            let props = self.props.lock().unwrap();
            let sequence = (|| {
                if props.get(props_keys::SENDER_STATE)?.as_deref() != Some(states::CTS_RECEIVED) {
                    props.put(props_keys::SENDER_STATE, states::RTS_SENT)?;
                }
                props.put_i64(props_keys::RTS_SENT_AT, current_time_millis())
            })();
            if let Err(e) = sequence {
                error!(error = %e, "failed to record RTS send");
                return Err(RtsFailure::Abort);
            }
        }

        // Start watching the negotiated fetch slot immediately
        self.start_fetcher();
        Ok(())
    }

    fn resolve_failure(&self, identity: &str, error: ResolveError) -> RtsFailure {
        match error {
            ResolveError::Unavailable => {
                debug!(identity = %identity, "contact record unavailable, trying again later");
                RtsFailure::RetryAfter(self.config.task_retry_delay)
            }
            ResolveError::MissingKeyMaterial => {
                error!(identity = %identity, "contact record is missing key material");
                RtsFailure::RetryAfter(self.config.missing_key_retry_delay)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_bucket_formats_utc_date() {
        // 2009-02-13T23:31:30Z
        assert_eq!(date_bucket(1_234_567_890_000), "2009-02-13");
    }

    #[test]
    fn test_date_bucket_epoch() {
        assert_eq!(date_bucket(0), "1970-01-01");
    }

    #[test]
    fn test_date_bucket_is_stable_within_a_day() {
        let morning = 1_234_540_800_000; // 2009-02-13T16:00:00Z
        let evening = 1_234_567_890_000; // 2009-02-13T23:31:30Z
        assert_eq!(date_bucket(morning), date_bucket(evening));
    }
}
