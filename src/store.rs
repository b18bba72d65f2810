use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::debug;

use crate::batch::BatchOp;
use crate::error::LevelError;
use crate::range::ScanSpec;

/// Name of the single table holding every record.
pub const TABLE: &str = "kv";

/// Keys are BLOBs so SQLite compares them with memcmp, which is exactly
/// byte-lexicographic order. WITHOUT ROWID clusters the B-tree on the key.
const CREATE_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS kv (key BLOB PRIMARY KEY NOT NULL, value BLOB NOT NULL) WITHOUT ROWID";

const SELECT_VALUE: &str = "SELECT value FROM kv WHERE key = ?1";
const INSERT: &str = "INSERT INTO kv (key, value) VALUES (?1, ?2)";
const UPSERT: &str = "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)";
const DELETE: &str = "DELETE FROM kv WHERE key = ?1";
const DELETE_ALL: &str = "DELETE FROM kv";
const DELETE_PREFIX: &str = "DELETE FROM kv WHERE substr(key, 1, ?2) = ?1";
const COUNT: &str = "SELECT COUNT(*) FROM kv";

/// One row of a scan page. The value is `None` for key-only scans.
pub(crate) type ScanRow = (Vec<u8>, Option<Vec<u8>>);

/// RecordStore runs point operations, batches and page scans against a
/// borrowed connection. Only the facade builds one, while it holds the
/// connection lock, so every call here already sees an open store.
pub struct RecordStore<'c> {
    conn: &'c Connection,
}

impl<'c> RecordStore<'c> {
    pub(crate) fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Create the table if it does not exist yet.
    pub fn ensure_schema(&self) -> Result<(), LevelError> {
        self.conn.execute_batch(CREATE_TABLE)?;
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, LevelError> {
        let mut stmt = self.conn.prepare_cached(SELECT_VALUE)?;
        stmt.query_row(params![key], |row| row.get::<_, Vec<u8>>(0))
            .optional()?
            .ok_or_else(|| LevelError::not_found(key))
    }

    /// Look up several keys, preserving order. Absent keys map to `None`.
    pub fn get_many<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<Vec<Option<Vec<u8>>>, LevelError> {
        let mut stmt = self.conn.prepare_cached(SELECT_VALUE)?;
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let value = stmt
                .query_row(params![key.as_ref()], |row| row.get::<_, Vec<u8>>(0))
                .optional()?;
            values.push(value);
        }
        Ok(values)
    }

    /// Strict insert. A key that already exists violates the primary key
    /// constraint and the engine error is returned unchanged.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<(), LevelError> {
        let mut stmt = self.conn.prepare_cached(INSERT)?;
        stmt.execute(params![key, value])?;
        Ok(())
    }

    /// Remove a record. Absent keys are not an error. Returns the number
    /// of records removed.
    pub fn delete(&self, key: &[u8]) -> Result<usize, LevelError> {
        let mut stmt = self.conn.prepare_cached(DELETE)?;
        Ok(stmt.execute(params![key])?)
    }

    /// Apply every operation inside one transaction, in order.
    ///
    /// Puts replace existing values. If any statement fails the transaction
    /// is dropped uncommitted, which rolls it back before the error returns.
    /// Returns the number of rows changed.
    pub fn apply_batch(&self, ops: &[BatchOp]) -> Result<usize, LevelError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut changed = 0;
        {
            let mut put = tx.prepare_cached(UPSERT)?;
            let mut del = tx.prepare_cached(DELETE)?;
            for op in ops {
                match op {
                    BatchOp::Put { key, value } => {
                        changed += put.execute(params![key, value])?;
                    }
                    BatchOp::Del { key } => {
                        changed += del.execute(params![key])?;
                    }
                }
            }
        }
        tx.commit()?;
        debug!("RecordStore: applied batch of {} ops", ops.len());
        Ok(changed)
    }

    /// Delete every key starting with `prefix`, or every key when `prefix`
    /// is `None`. Returns the number of records removed.
    ///
    /// The prefix is compared byte for byte, so `%`, `_` and letter case have
    /// no special meaning.
    pub fn clear_prefix(&self, prefix: Option<&[u8]>) -> Result<usize, LevelError> {
        let removed = match prefix {
            Some(prefix) => {
                let len = i64::try_from(prefix.len()).unwrap_or(i64::MAX);
                let mut stmt = self.conn.prepare_cached(DELETE_PREFIX)?;
                stmt.execute(params![prefix, len])?
            }
            None => self.conn.execute(DELETE_ALL, [])?,
        };
        Ok(removed)
    }

    /// Prepare the first page statement without stepping it.
    pub(crate) fn prepare_scan(&self, spec: &ScanSpec, page: usize) -> Result<(), LevelError> {
        let query = spec.to_query(None, page);
        self.conn.prepare_cached(&query.sql)?;
        Ok(())
    }

    /// Read one page of a scan, resuming strictly after `after`.
    pub(crate) fn scan_page(
        &self,
        spec: &ScanSpec,
        after: Option<&[u8]>,
        page: usize,
    ) -> Result<Vec<ScanRow>, LevelError> {
        let query = spec.to_query(after, page);
        let mut stmt = self.conn.prepare_cached(&query.sql)?;
        let rows = stmt.query_map(params_from_iter(query.params.iter()), |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Option<Vec<u8>>>(1)?))
        })?;

        let mut result = Vec::with_capacity(page);
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Connection {
        self.conn
    }

    pub fn count(&self) -> Result<u64, LevelError> {
        let n: i64 = self.conn.query_row(COUNT, [], |row| row.get(0))?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::IteratorOptions;
    use crate::range::Fields;

    fn make_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        RecordStore::new(&conn).ensure_schema().unwrap();
        conn
    }

    fn put(key: &str, value: &str) -> BatchOp {
        BatchOp::put(key, value)
    }

    fn del(key: &str) -> BatchOp {
        BatchOp::del(key)
    }

    /// Abort any write of the key `boom` from inside the engine.
    fn install_failure_trigger(conn: &Connection) {
        conn.execute_batch(
            "CREATE TRIGGER fail_on_boom BEFORE INSERT ON kv
             WHEN NEW.key = CAST('boom' AS BLOB)
             BEGIN SELECT RAISE(ABORT, 'injected failure'); END;",
        )
        .unwrap();
    }

    #[test]
    fn ensure_schema_is_idempotent() {
        let conn = make_conn();
        let store = RecordStore::new(&conn);
        store.ensure_schema().unwrap();
        store.ensure_schema().unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn insert_get_delete() {
        let conn = make_conn();
        let store = RecordStore::new(&conn);

        store.insert(b"key", b"value").unwrap();
        assert_eq!(store.get(b"key").unwrap(), b"value");

        assert_eq!(store.delete(b"key").unwrap(), 1);
        assert!(store.get(b"key").unwrap_err().is_not_found());

        // Deleting again is fine.
        assert_eq!(store.delete(b"key").unwrap(), 0);
    }

    #[test]
    fn strict_insert_rejects_existing_key() {
        let conn = make_conn();
        let store = RecordStore::new(&conn);

        store.insert(b"key", b"first").unwrap();
        let err = store.insert(b"key", b"second").unwrap_err();
        assert!(err.is_constraint_violation());
        assert_eq!(store.get(b"key").unwrap(), b"first");
    }

    #[test]
    fn batch_upserts_and_applies_in_order() {
        let conn = make_conn();
        let store = RecordStore::new(&conn);
        store.insert(b"key1", b"value").unwrap();

        let changed = store
            .apply_batch(&[
                del("key1"),
                put("key2", "value2"),
                put("key3", "value3"),
                put("key3", "value3b"),
                put("key4", "x"),
                del("key4"),
            ])
            .unwrap();
        assert_eq!(changed, 6);
        assert_eq!(store.apply_batch(&[del("absent")]).unwrap(), 0);

        assert!(store.get(b"key1").unwrap_err().is_not_found());
        assert_eq!(store.get(b"key2").unwrap(), b"value2");
        assert_eq!(store.get(b"key3").unwrap(), b"value3b");
        assert!(store.get(b"key4").unwrap_err().is_not_found());
    }

    #[test]
    fn batch_put_replaces_existing_key() {
        let conn = make_conn();
        let store = RecordStore::new(&conn);
        store.insert(b"key", b"old").unwrap();
        store.apply_batch(&[put("key", "new")]).unwrap();
        assert_eq!(store.get(b"key").unwrap(), b"new");
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn failed_batch_leaves_no_trace() {
        let conn = make_conn();
        install_failure_trigger(&conn);
        let store = RecordStore::new(&conn);
        store.insert(b"key1", b"value").unwrap();

        let err = store
            .apply_batch(&[del("key1"), put("key2", "value2"), put("boom", "x"), put("key3", "value3")])
            .unwrap_err();
        assert!(matches!(err, LevelError::Storage(_)));

        assert_eq!(store.get(b"key1").unwrap(), b"value");
        assert!(store.get(b"key2").unwrap_err().is_not_found());
        assert!(store.get(b"key3").unwrap_err().is_not_found());
        assert_eq!(store.count().unwrap(), 1);

        // The connection is usable again after the rollback.
        store.apply_batch(&[put("key2", "value2")]).unwrap();
        assert_eq!(store.get(b"key2").unwrap(), b"value2");
    }

    #[test]
    fn get_many_preserves_order() {
        let conn = make_conn();
        let store = RecordStore::new(&conn);
        store.apply_batch(&[put("a", "1"), put("c", "3")]).unwrap();

        let values = store.get_many(&["c", "b", "a"]).unwrap();
        assert_eq!(values, vec![Some(b"3".to_vec()), None, Some(b"1".to_vec())]);
    }

    #[test]
    fn clear_prefix_matches_bytes_exactly() {
        let conn = make_conn();
        let store = RecordStore::new(&conn);
        store
            .apply_batch(&[
                put("user:1", "a"),
                put("user:2", "b"),
                put("USER:3", "c"),
                put("userx", "d"),
                put("user%", "e"),
                put("use", "f"),
            ])
            .unwrap();

        assert_eq!(store.clear_prefix(Some(b"user:")).unwrap(), 2);
        assert!(store.get(b"user:1").unwrap_err().is_not_found());
        assert!(store.get(b"user:2").unwrap_err().is_not_found());
        assert_eq!(store.get(b"USER:3").unwrap(), b"c");
        assert_eq!(store.get(b"userx").unwrap(), b"d");

        assert_eq!(store.clear_prefix(Some(b"user%")).unwrap(), 1);
        assert_eq!(store.get(b"userx").unwrap(), b"d");
        assert_eq!(store.get(b"use").unwrap(), b"f");

        assert_eq!(store.clear_prefix(None).unwrap(), 3);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn keys_order_by_bytes() {
        let conn = make_conn();
        let store = RecordStore::new(&conn);
        store
            .apply_batch(&[
                BatchOp::put([0xffu8], "high"),
                BatchOp::put([0x00u8], "low"),
                BatchOp::put("b", "b"),
                BatchOp::put("B", "B"),
                BatchOp::put("a", "a"),
            ])
            .unwrap();

        let spec = ScanSpec::all();
        let keys: Vec<Vec<u8>> = store
            .scan_page(&spec, None, 10)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(
            keys,
            vec![vec![0x00], b"B".to_vec(), b"a".to_vec(), b"b".to_vec(), vec![0xff]]
        );
    }

    #[test]
    fn scan_page_resumes_after_key() {
        let conn = make_conn();
        let store = RecordStore::new(&conn);
        store
            .apply_batch(&[put("a", "1"), put("b", "2"), put("c", "3"), put("d", "4")])
            .unwrap();

        let spec = ScanSpec::from_options(&IteratorOptions::new(), Fields::Keys);
        let page = store.scan_page(&spec, Some(b"b"), 10).unwrap();
        assert_eq!(page, vec![(b"c".to_vec(), None), (b"d".to_vec(), None)]);

        let page = store.scan_page(&spec, None, 1).unwrap();
        assert_eq!(page, vec![(b"a".to_vec(), None)]);
    }
}
