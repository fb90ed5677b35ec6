//! Database schema definitions for the channel database

use rusqlite::Connection;

/// Creates all required database tables
pub fn create_all_tables(conn: &Connection) -> rusqlite::Result<()> {
    create_channel_tables(conn)?;
    create_ack_log_table(conn)?;
    Ok(())
}

/// Channel tables: one row per channel plus its flat key-value record
///
/// The props table is the persistent `ChannelState`: keypair, slot cursors,
/// direction codes, handshake states and transient per-message slot
/// reservations. A missing key means the field is not yet set.
pub fn create_channel_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS channels (
            channel_id TEXT PRIMARY KEY NOT NULL CHECK (length(channel_id) > 0),
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS channel_props (
            channel_id TEXT NOT NULL,
            key TEXT NOT NULL CHECK (length(key) > 0),
            value TEXT NOT NULL,
            PRIMARY KEY (channel_id, key),
            FOREIGN KEY (channel_id) REFERENCES channels(channel_id) ON DELETE CASCADE
        )",
        [],
    )?;

    Ok(())
}

/// Ack log table: received message ids awaiting acknowledgement
///
/// `insert_after` is the earliest publish time (epoch milliseconds) chosen
/// with bounded random jitter. Entries are removed only once the ack
/// publish is confirmed, so the obligation survives a restart.
pub fn create_ack_log_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS ack_log (
            channel_id TEXT NOT NULL,
            message_id INTEGER NOT NULL,
            insert_after INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (channel_id, message_id),
            FOREIGN KEY (channel_id) REFERENCES channels(channel_id) ON DELETE CASCADE
        )",
        [],
    )?;

    // Index for replaying pending acks at startup
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ack_log_channel ON ack_log(channel_id)",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_memory_db() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_create_all_tables() {
        let conn = in_memory_db();
        create_all_tables(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"channels".to_string()));
        assert!(tables.contains(&"channel_props".to_string()));
        assert!(tables.contains(&"ack_log".to_string()));
    }

    #[test]
    fn test_props_primary_key() {
        let conn = in_memory_db();
        create_all_tables(&conn).unwrap();

        conn.execute(
            "INSERT INTO channels (channel_id) VALUES ('chan')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO channel_props (channel_id, key, value) VALUES ('chan', 'sendSlot', 'a')",
            [],
        )
        .unwrap();

        // Same (channel, key) pair must conflict
        let result = conn.execute(
            "INSERT INTO channel_props (channel_id, key, value) VALUES ('chan', 'sendSlot', 'b')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_cascade_delete() {
        let conn = in_memory_db();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        create_all_tables(&conn).unwrap();

        conn.execute("INSERT INTO channels (channel_id) VALUES ('chan')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO channel_props (channel_id, key, value) VALUES ('chan', 'k', 'v')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO ack_log (channel_id, message_id, insert_after) VALUES ('chan', 7, 0)",
            [],
        )
        .unwrap();

        conn.execute("DELETE FROM channels WHERE channel_id = 'chan'", [])
            .unwrap();

        let props: i64 = conn
            .query_row("SELECT COUNT(*) FROM channel_props", [], |row| row.get(0))
            .unwrap();
        let acks: i64 = conn
            .query_row("SELECT COUNT(*) FROM ack_log", [], |row| row.get(0))
            .unwrap();
        assert_eq!(props, 0);
        assert_eq!(acks, 0);
    }

    #[test]
    fn test_empty_channel_id_rejected() {
        let conn = in_memory_db();
        create_all_tables(&conn).unwrap();

        let result = conn.execute("INSERT INTO channels (channel_id) VALUES ('')", []);
        assert!(result.is_err(), "should reject empty channel id");
    }
}
