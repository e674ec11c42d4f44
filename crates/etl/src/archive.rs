//! Append-only archive of raw provider responses.
//!
//! Every page fetched from the chain provider is written here, byte for
//! byte, before any normalization happens. Extraction can then be replayed
//! or audited without re-querying the provider. Records are immutable after
//! write and duplicates are permitted — `put` never fails on "already
//! exists".

use common::error::ArchiveError;
use common::types::PayloadKind;
use rusqlite::Connection;

#[derive(Debug, Clone, PartialEq)]
pub struct RawFetchRecord {
    pub id: i64,
    pub address: String,
    pub payload_kind: String,
    pub fetched_at: String,
    pub raw_json: String,
}

/// Archive one raw payload. SQLite commits before `execute` returns, so the
/// record is durable by the time the caller proceeds to normalization.
pub fn put(
    conn: &Connection,
    address: &str,
    kind: PayloadKind,
    raw_json: &[u8],
) -> Result<RawFetchRecord, ArchiveError> {
    let body = String::from_utf8_lossy(raw_json);
    let record = conn.query_row(
        "INSERT INTO raw_fetches (address, payload_kind, raw_json)
         VALUES (?1, ?2, ?3)
         RETURNING id, address, payload_kind, fetched_at, raw_json",
        rusqlite::params![address, kind.as_str(), body.as_ref()],
        |row| {
            Ok(RawFetchRecord {
                id: row.get(0)?,
                address: row.get(1)?,
                payload_kind: row.get(2)?,
                fetched_at: row.get(3)?,
                raw_json: row.get(4)?,
            })
        },
    )?;
    Ok(record)
}

/// Archived records for an address/kind, oldest first, optionally bounded by
/// a `fetched_at` range.
pub fn list(
    conn: &Connection,
    address: &str,
    kind: PayloadKind,
    since: Option<&str>,
    until: Option<&str>,
) -> Result<Vec<RawFetchRecord>, ArchiveError> {
    let mut stmt = conn.prepare(
        "SELECT id, address, payload_kind, fetched_at, raw_json
         FROM raw_fetches
         WHERE address = ?1 AND payload_kind = ?2
           AND (?3 IS NULL OR fetched_at >= ?3)
           AND (?4 IS NULL OR fetched_at <= ?4)
         ORDER BY fetched_at, id",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![address, kind.as_str(), since, until], |row| {
            Ok(RawFetchRecord {
                id: row.get(0)?,
                address: row.get(1)?,
                payload_kind: row.get(2)?,
                fetched_at: row.get(3)?,
                raw_json: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::db::Database;

    fn test_db() -> Database {
        let db = Database::open(":memory:").unwrap();
        db.run_migrations().unwrap();
        db
    }

    #[test]
    fn test_put_returns_durable_record() {
        let db = test_db();
        let record = put(
            &db.conn,
            "0xabc",
            PayloadKind::Transactions,
            br#"{"transfers": []}"#,
        )
        .unwrap();
        assert_eq!(record.address, "0xabc");
        assert_eq!(record.payload_kind, "transactions");
        assert!(!record.fetched_at.is_empty());
    }

    #[test]
    fn test_duplicates_are_permitted() {
        let db = test_db();
        let body = br#"{"transfers": []}"#;
        put(&db.conn, "0xabc", PayloadKind::Transactions, body).unwrap();
        put(&db.conn, "0xabc", PayloadKind::Transactions, body).unwrap();

        let records = list(&db.conn, "0xabc", PayloadKind::Transactions, None, None).unwrap();
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].id, records[1].id);
    }

    #[test]
    fn test_list_filters_by_kind() {
        let db = test_db();
        put(&db.conn, "0xabc", PayloadKind::Transactions, b"[]").unwrap();
        put(&db.conn, "0xabc", PayloadKind::Positions, b"{}").unwrap();
        put(&db.conn, "0xother", PayloadKind::Transactions, b"[]").unwrap();

        let records = list(&db.conn, "0xabc", PayloadKind::Positions, None, None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].raw_json, "{}");
    }

    #[test]
    fn test_list_time_range() {
        let db = test_db();
        put(&db.conn, "0xabc", PayloadKind::Transactions, b"[]").unwrap();

        let all = list(
            &db.conn,
            "0xabc",
            PayloadKind::Transactions,
            Some("2000-01-01"),
            None,
        )
        .unwrap();
        assert_eq!(all.len(), 1);

        let none = list(
            &db.conn,
            "0xabc",
            PayloadKind::Transactions,
            None,
            Some("2000-01-01"),
        )
        .unwrap();
        assert!(none.is_empty());
    }
}
