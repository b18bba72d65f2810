use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::batch::{BatchOp, ChainedBatch};
use crate::cursor::{Cursor, EntryIterator, KeyIterator, Projection, ValueIterator};
use crate::error::LevelError;
use crate::options::{ClearOptions, IteratorOptions, LevelOptions};
use crate::range::ScanSpec;
use crate::store::RecordStore;

const STATEMENT_CACHE_CAPACITY: usize = 64;

/// Key and value encodings the store accepts. Everything is stored as raw
/// bytes; utf8 strings are accepted through `AsRef<[u8]>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Buffer,
    View,
}

/// Static description of what this store supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub type_name: &'static str,
    pub encodings: &'static [Encoding],
    /// False for `:memory:` stores, whose data dies with the handle.
    pub permanence: bool,
    pub clear: bool,
    pub get_many: bool,
    pub chained_batch: bool,
}

/// Lifecycle of a store handle. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Created,
    Opened,
    Closed,
}

enum State {
    Created,
    Opened(Connection),
    Closed,
}

/// SqliteLevel is an ordered key-value store backed by a single SQLite
/// table.
///
/// - Keys and values are opaque bytes, ordered byte-lexicographically.
/// - `put` is a strict insert; `batch` puts replace existing values.
/// - Every mutation is rejected with [`LevelError::ReadOnly`] when the
///   handle was built read-only, before any engine work starts.
///
/// The connection lives behind a mutex, so at most one statement or
/// transaction runs at a time. No lock is held across an await point.
/// Statements only run through this handle; the record store behind it is
/// not exported:
///
/// ```compile_fail
/// use openerp_level::store::RecordStore;
/// ```
pub struct SqliteLevel {
    options: LevelOptions,
    state: Mutex<State>,
    /// Bumped under the connection lock by every write that changed rows.
    /// Cursors compare it between pages.
    writes: AtomicU64,
}

impl SqliteLevel {
    /// Create a handle in the `Created` state. Nothing is opened yet.
    pub fn new(options: LevelOptions) -> Self {
        Self {
            options,
            state: Mutex::new(State::Created),
            writes: AtomicU64::new(0),
        }
    }

    /// Create a handle and open it.
    pub async fn open_with(options: LevelOptions) -> Result<Self, LevelError> {
        let level = Self::new(options);
        level.open().await?;
        Ok(level)
    }

    pub fn type_name(&self) -> &'static str {
        "sqlite3"
    }

    pub fn manifest(&self) -> Manifest {
        Manifest {
            type_name: self.type_name(),
            encodings: &[Encoding::Utf8, Encoding::Buffer, Encoding::View],
            permanence: !self.options.is_memory(),
            clear: true,
            get_many: true,
            chained_batch: true,
        }
    }

    pub fn options(&self) -> &LevelOptions {
        &self.options
    }

    /// Backing filename, or `:memory:`.
    pub fn location(&self) -> &str {
        &self.options.filename
    }

    pub fn is_read_only(&self) -> bool {
        self.options.read_only
    }

    pub fn status(&self) -> Result<Status, LevelError> {
        let state = self.lock()?;
        Ok(match &*state {
            State::Created => Status::Created,
            State::Opened(_) => Status::Opened,
            State::Closed => Status::Closed,
        })
    }

    /// Open the backing database and make sure the table exists.
    ///
    /// Opening an already open store is a no-op. A closed store cannot be
    /// reopened; build a new handle instead.
    pub async fn open(&self) -> Result<(), LevelError> {
        let mut state = self.lock()?;
        match &*state {
            State::Opened(_) => return Ok(()),
            State::Closed => return Err(LevelError::Closed),
            State::Created => {}
        }

        let conn = match self.options.path() {
            None => Connection::open_in_memory()?,
            Some(path) => {
                let conn = Connection::open(&path)?;
                // WAL lets readers proceed while a batch commits.
                conn.execute_batch("PRAGMA journal_mode=WAL;")?;
                conn
            }
        };
        conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);
        RecordStore::new(&conn).ensure_schema()?;

        *state = State::Opened(conn);
        info!(
            "SqliteLevel: opened {} (read_only={})",
            self.options.filename, self.options.read_only
        );
        Ok(())
    }

    /// Close the store and release the connection. Closing twice is fine.
    ///
    /// Takes `&mut self`, so no cursor borrowed from this store can still be
    /// alive.
    pub async fn close(&mut self) -> Result<(), LevelError> {
        let state = self
            .state
            .get_mut()
            .map_err(|e| LevelError::LockPoisoned(e.to_string()))?;
        match std::mem::replace(state, State::Closed) {
            State::Opened(conn) => {
                conn.close().map_err(|(_, e)| LevelError::Storage(e))?;
                info!("SqliteLevel: closed {}", self.options.filename);
            }
            State::Created => debug!("SqliteLevel: closed {} before open", self.options.filename),
            State::Closed => {}
        }
        Ok(())
    }

    /// Fetch the value stored under `key`, or [`LevelError::NotFound`].
    pub async fn get(&self, key: impl AsRef<[u8]>) -> Result<Vec<u8>, LevelError> {
        self.with_store(|store| store.get(key.as_ref()))
    }

    /// Like [`get`](Self::get), decoding the value as utf8. Invalid
    /// sequences are replaced with U+FFFD.
    pub async fn get_string(&self, key: impl AsRef<[u8]>) -> Result<String, LevelError> {
        let value = self.get(key).await?;
        Ok(String::from_utf8(value)
            .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()))
    }

    /// Fetch several keys at once. Missing keys come back as `None`.
    pub async fn get_many<K: AsRef<[u8]>>(
        &self,
        keys: &[K],
    ) -> Result<Vec<Option<Vec<u8>>>, LevelError> {
        self.with_store(|store| store.get_many(keys))
    }

    /// Insert a new record. Fails if the key already exists; use
    /// [`batch`](Self::batch) to overwrite.
    pub async fn put(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<(), LevelError> {
        self.with_writable_store("put", |store| {
            store.insert(key.as_ref(), value.as_ref()).map(|()| 1)
        })?;
        Ok(())
    }

    /// Delete a record. Missing keys are not an error.
    pub async fn del(&self, key: impl AsRef<[u8]>) -> Result<(), LevelError> {
        self.with_writable_store("del", |store| store.delete(key.as_ref()))?;
        Ok(())
    }

    /// Apply `ops` atomically and in order.
    pub async fn batch(&self, ops: Vec<BatchOp>) -> Result<(), LevelError> {
        self.with_writable_store("batch", |store| store.apply_batch(&ops))?;
        Ok(())
    }

    pub fn chained_batch(&self) -> ChainedBatch<'_> {
        ChainedBatch::new(self)
    }

    /// Delete every key sharing the `gte` prefix, or every key when no
    /// prefix is given.
    pub async fn clear(&self, options: ClearOptions) -> Result<(), LevelError> {
        let removed =
            self.with_writable_store("clear", |store| store.clear_prefix(options.gte.as_deref()))?;
        debug!("SqliteLevel: clear removed {} records", removed);
        Ok(())
    }

    /// Number of records in the store.
    pub async fn count(&self) -> Result<u64, LevelError> {
        self.with_store(|store| store.count())
    }

    /// Cursor over `(key, value)` pairs.
    pub fn iterator(&self, options: IteratorOptions) -> Result<EntryIterator<'_>, LevelError> {
        self.cursor(&options)
    }

    /// Cursor over keys.
    pub fn keys(&self, options: IteratorOptions) -> Result<KeyIterator<'_>, LevelError> {
        self.cursor(&options)
    }

    /// Cursor over values.
    pub fn values(&self, options: IteratorOptions) -> Result<ValueIterator<'_>, LevelError> {
        self.cursor(&options)
    }

    fn cursor<P: Projection>(&self, options: &IteratorOptions) -> Result<Cursor<'_, P>, LevelError> {
        Cursor::new(self, ScanSpec::from_options(options, P::FIELDS))
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, LevelError> {
        self.state
            .lock()
            .map_err(|e| LevelError::LockPoisoned(e.to_string()))
    }

    /// Run `f` against the open store, or fail with the lifecycle error.
    pub(crate) fn with_store<T>(
        &self,
        f: impl FnOnce(&RecordStore<'_>) -> Result<T, LevelError>,
    ) -> Result<T, LevelError> {
        let state = self.lock()?;
        match &*state {
            State::Opened(conn) => f(&RecordStore::new(conn)),
            State::Created => Err(LevelError::NotOpen),
            State::Closed => Err(LevelError::Closed),
        }
    }

    /// Current write generation. Only meaningful while the connection lock
    /// is held, i.e. from inside a [`with_store`](Self::with_store) closure.
    pub(crate) fn write_generation(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Run a mutation. `f` returns the number of rows it changed; any
    /// change moves the write generation on before the lock is released.
    fn with_writable_store(
        &self,
        op: &str,
        f: impl FnOnce(&RecordStore<'_>) -> Result<usize, LevelError>,
    ) -> Result<usize, LevelError> {
        self.with_store(|store| {
            if self.options.read_only {
                warn!("SqliteLevel: rejected {} on read-only {}", op, self.options.filename);
                return Err(LevelError::ReadOnly(op.to_string()));
            }
            let changed = f(store)?;
            if changed > 0 {
                self.writes.fetch_add(1, Ordering::Relaxed);
            }
            Ok(changed)
        })
    }
}
