//! Durable acknowledgement ledger
//!
//! Every received data message creates an entry here before anything else
//! happens, so the obligation to acknowledge survives a crash. An entry is
//! removed only once the ack publish is confirmed.

use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection};

/// A pending acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingAck {
    /// Id of the received message
    pub message_id: u64,
    /// Earliest publish time (epoch milliseconds, jittered)
    pub insert_after: i64,
}

/// Handle to one channel's ack ledger
pub struct AckLog {
    conn: Arc<Mutex<Connection>>,
    channel_id: String,
}

impl AckLog {
    pub fn new(conn: Arc<Mutex<Connection>>, channel_id: &str) -> Self {
        Self {
            conn,
            channel_id: channel_id.to_string(),
        }
    }

    /// Record a pending ack; replaces the entry if the id is already logged
    pub fn add(&self, message_id: u64, insert_after: i64) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO ack_log (channel_id, message_id, insert_after)
             VALUES (?1, ?2, ?3)",
            params![self.channel_id, message_id as i64, insert_after],
        )?;
        Ok(())
    }

    /// Remove an entry once its ack publish is confirmed
    pub fn remove(&self, message_id: u64) -> rusqlite::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM ack_log WHERE channel_id = ?1 AND message_id = ?2",
            params![self.channel_id, message_id as i64],
        )?;
        Ok(deleted > 0)
    }

    /// List all pending entries, used for replay at startup
    pub fn entries(&self) -> rusqlite::Result<Vec<PendingAck>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT message_id, insert_after FROM ack_log WHERE channel_id = ?1
             ORDER BY message_id",
        )?;
        let entries = stmt
            .query_map([self.channel_id.as_str()], |row| {
                let message_id: i64 = row.get(0)?;
                Ok(PendingAck {
                    message_id: message_id as u64,
                    insert_after: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::create_all_tables;

    fn setup_log() -> AckLog {
        let conn = Connection::open_in_memory().unwrap();
        create_all_tables(&conn).unwrap();
        conn.execute("INSERT INTO channels (channel_id) VALUES ('chan')", [])
            .unwrap();
        AckLog::new(Arc::new(Mutex::new(conn)), "chan")
    }

    #[test]
    fn test_add_and_list() {
        let log = setup_log();
        log.add(7, 1000).unwrap();
        log.add(9, 500).unwrap();

        let entries = log.entries().unwrap();
        assert_eq!(
            entries,
            vec![
                PendingAck { message_id: 7, insert_after: 1000 },
                PendingAck { message_id: 9, insert_after: 500 },
            ]
        );
    }

    #[test]
    fn test_remove_confirmed() {
        let log = setup_log();
        log.add(7, 1000).unwrap();

        assert!(log.remove(7).unwrap());
        assert!(log.entries().unwrap().is_empty());
        assert!(!log.remove(7).unwrap());
    }

    #[test]
    fn test_add_same_id_replaces() {
        let log = setup_log();
        log.add(7, 1000).unwrap();
        log.add(7, 2000).unwrap();

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].insert_after, 2000);
    }

    #[test]
    fn test_entries_survive_new_handle() {
        // A fresh handle over the same database sees the entries, which is
        // what start_tasks relies on after a restart
        let conn = Connection::open_in_memory().unwrap();
        create_all_tables(&conn).unwrap();
        conn.execute("INSERT INTO channels (channel_id) VALUES ('chan')", [])
            .unwrap();
        let conn = Arc::new(Mutex::new(conn));

        let log = AckLog::new(conn.clone(), "chan");
        log.add(42, 123).unwrap();
        drop(log);

        let reopened = AckLog::new(conn, "chan");
        let entries = reopened.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message_id, 42);
        assert_eq!(entries[0].insert_after, 123);
    }
}
