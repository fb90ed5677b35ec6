//! Per-channel flat key-value record
//!
//! The persistent state of a channel is a flat key-value record. A missing
//! key always means "not yet set". The record holds the channel keypair,
//! the two slot cursors, direction codes, handshake state flags, the
//! absolute timeout and the transient per-message slot reservations.

use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};

/// Keys used in the per-channel record
pub mod props_keys {
    pub const PRIVATE_KEY: &str = "privateKey";
    pub const PUBLIC_KEY: &str = "publicKey";
    pub const FETCH_SLOT: &str = "fetchSlot";
    pub const SEND_SLOT: &str = "sendSlot";
    pub const SENDER_STATE: &str = "sender-state";
    pub const RECIPIENT_STATE: &str = "recipient-state";
    pub const RTS_SENT_AT: &str = "rts-sent-at";
    pub const SEND_CODE: &str = "sendCode";
    pub const FETCH_CODE: &str = "fetchCode";
    pub const REMOTE_ID: &str = "remoteID";
    pub const TIMEOUT: &str = "timeout";
    /// Suffix for transient per-message slot reservations
    pub const MSG_SLOT: &str = ".slot";
}

/// Handle to one channel's key-value record
///
/// Exclusion across read-modify-write sequences is provided by the owning
/// `Mutex<ChannelProps>`; the shared connection lock inside is only held
/// per statement.
pub struct ChannelProps {
    conn: Arc<Mutex<Connection>>,
    channel_id: String,
}

impl ChannelProps {
    pub fn new(conn: Arc<Mutex<Connection>>, channel_id: &str) -> Self {
        Self {
            conn,
            channel_id: channel_id.to_string(),
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Create the channel row if it does not exist yet
    pub fn ensure_channel(&self) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO channels (channel_id) VALUES (?1)",
            [self.channel_id.as_str()],
        )?;
        Ok(())
    }

    /// Get a field, `None` when not yet set
    pub fn get(&self, key: &str) -> rusqlite::Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT value FROM channel_props WHERE channel_id = ?1 AND key = ?2",
            params![self.channel_id, key],
            |row| row.get(0),
        )
        .optional()
    }

    /// Set a field, replacing any previous value
    pub fn put(&self, key: &str, value: &str) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO channel_props (channel_id, key, value) VALUES (?1, ?2, ?3)",
            params![self.channel_id, key, value],
        )?;
        Ok(())
    }

    /// Set a field only if it is not yet set, returning whether it was written
    ///
    /// Used for set-once fields such as the channel keypair.
    pub fn put_if_absent(&self, key: &str, value: &str) -> rusqlite::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO channel_props (channel_id, key, value) VALUES (?1, ?2, ?3)",
            params![self.channel_id, key, value],
        )?;
        Ok(inserted > 0)
    }

    /// Remove a field, returning whether it existed
    pub fn remove(&self, key: &str) -> rusqlite::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM channel_props WHERE channel_id = ?1 AND key = ?2",
            params![self.channel_id, key],
        )?;
        Ok(deleted > 0)
    }

    /// Get a field parsed as i64, `None` when unset or unparseable
    pub fn get_i64(&self, key: &str) -> rusqlite::Result<Option<i64>> {
        Ok(self.get(key)?.and_then(|v| v.parse().ok()))
    }

    pub fn put_i64(&self, key: &str, value: i64) -> rusqlite::Result<()> {
        self.put(key, &value.to_string())
    }

    /// Raise the channel timeout to `value`
    ///
    /// The timeout is monotonic non-decreasing; a lower value is ignored.
    pub fn put_timeout_monotonic(&self, value: i64) -> rusqlite::Result<()> {
        let current = self.get_i64(props_keys::TIMEOUT)?;
        match current {
            Some(existing) if existing >= value => Ok(()),
            _ => self.put_i64(props_keys::TIMEOUT, value),
        }
    }
}

/// Delete a channel and its entire record (props and ack log included)
pub fn delete_channel(conn: &Connection, channel_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM channel_props WHERE channel_id = ?1",
        [channel_id],
    )?;
    conn.execute("DELETE FROM ack_log WHERE channel_id = ?1", [channel_id])?;
    conn.execute("DELETE FROM channels WHERE channel_id = ?1", [channel_id])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::create_all_tables;

    fn setup_props() -> ChannelProps {
        let conn = Connection::open_in_memory().unwrap();
        create_all_tables(&conn).unwrap();
        let props = ChannelProps::new(Arc::new(Mutex::new(conn)), "chan");
        props.ensure_channel().unwrap();
        props
    }

    #[test]
    fn test_missing_key_is_unset() {
        let props = setup_props();
        assert_eq!(props.get(props_keys::SEND_SLOT).unwrap(), None);
    }

    #[test]
    fn test_put_get_remove() {
        let props = setup_props();
        props.put(props_keys::SEND_SLOT, "abcd").unwrap();
        assert_eq!(
            props.get(props_keys::SEND_SLOT).unwrap().as_deref(),
            Some("abcd")
        );

        assert!(props.remove(props_keys::SEND_SLOT).unwrap());
        assert_eq!(props.get(props_keys::SEND_SLOT).unwrap(), None);
        assert!(!props.remove(props_keys::SEND_SLOT).unwrap());
    }

    #[test]
    fn test_put_if_absent_is_set_once() {
        let props = setup_props();
        assert!(props.put_if_absent(props_keys::PRIVATE_KEY, "first").unwrap());
        assert!(!props.put_if_absent(props_keys::PRIVATE_KEY, "second").unwrap());
        assert_eq!(
            props.get(props_keys::PRIVATE_KEY).unwrap().as_deref(),
            Some("first")
        );
    }

    #[test]
    fn test_timeout_is_monotonic() {
        let props = setup_props();
        props.put_timeout_monotonic(1000).unwrap();
        assert_eq!(props.get_i64(props_keys::TIMEOUT).unwrap(), Some(1000));

        // Lower value is ignored
        props.put_timeout_monotonic(500).unwrap();
        assert_eq!(props.get_i64(props_keys::TIMEOUT).unwrap(), Some(1000));

        // Higher value is taken
        props.put_timeout_monotonic(2000).unwrap();
        assert_eq!(props.get_i64(props_keys::TIMEOUT).unwrap(), Some(2000));
    }

    #[test]
    fn test_get_i64_unparseable_is_none() {
        let props = setup_props();
        props.put(props_keys::TIMEOUT, "not-a-number").unwrap();
        assert_eq!(props.get_i64(props_keys::TIMEOUT).unwrap(), None);
    }

    #[test]
    fn test_records_are_isolated_per_channel() {
        let conn = Connection::open_in_memory().unwrap();
        create_all_tables(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));

        let a = ChannelProps::new(conn.clone(), "chan-a");
        let b = ChannelProps::new(conn.clone(), "chan-b");
        a.ensure_channel().unwrap();
        b.ensure_channel().unwrap();

        a.put(props_keys::SEND_CODE, "i").unwrap();
        b.put(props_keys::SEND_CODE, "r").unwrap();

        assert_eq!(a.get(props_keys::SEND_CODE).unwrap().as_deref(), Some("i"));
        assert_eq!(b.get(props_keys::SEND_CODE).unwrap().as_deref(), Some("r"));
    }

    #[test]
    fn test_delete_channel_removes_record() {
        let conn = Connection::open_in_memory().unwrap();
        create_all_tables(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));

        let props = ChannelProps::new(conn.clone(), "chan");
        props.ensure_channel().unwrap();
        props.put(props_keys::SEND_SLOT, "abcd").unwrap();

        {
            let conn = conn.lock().unwrap();
            delete_channel(&conn, "chan").unwrap();
        }

        assert_eq!(props.get(props_keys::SEND_SLOT).unwrap(), None);
    }
}
