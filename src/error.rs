use thiserror::Error;

// ── Error codes ─────────────────────────────────────────────────────
//
// Stable, machine-readable identifiers. Callers match on these,
// never on the human-readable message string.

/// Stable error code constants.
pub mod error_code {
    pub const NOT_FOUND: &str = "LEVEL_NOT_FOUND";
    pub const READ_ONLY: &str = "LEVEL_READ_ONLY";
    pub const DATABASE_NOT_OPEN: &str = "LEVEL_DATABASE_NOT_OPEN";
    pub const INVALID_OPTIONS: &str = "LEVEL_INVALID_OPTIONS";
    pub const STORAGE_ERROR: &str = "LEVEL_STORAGE_ERROR";
    pub const LOCK_POISONED: &str = "LEVEL_LOCK_POISONED";
    pub const ITERATOR_INVALIDATED: &str = "LEVEL_ITERATOR_INVALIDATED";
}

#[derive(Error, Debug)]
pub enum LevelError {
    /// `get` on a key with no record.
    #[error("Key {0} was not found")]
    NotFound(String),

    /// Mutation attempted on a read-only handle. Raised before any
    /// transaction begins.
    #[error("not authorized to write to branch: {0}")]
    ReadOnly(String),

    /// Operation attempted before `open`.
    #[error("database is not open")]
    NotOpen,

    /// Operation attempted after `close`.
    #[error("database is closed")]
    Closed,

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// Any error raised by SQLite, passed through untouched.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("connection lock poisoned: {0}")]
    LockPoisoned(String),

    /// The store was written while a cursor was part way through its
    /// scan. The cursor is exhausted after this.
    #[error("iterator invalidated by a concurrent write")]
    IteratorInvalidated,
}

impl LevelError {
    /// Stable, machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            LevelError::NotFound(_) => error_code::NOT_FOUND,
            LevelError::ReadOnly(_) => error_code::READ_ONLY,
            LevelError::NotOpen | LevelError::Closed => error_code::DATABASE_NOT_OPEN,
            LevelError::InvalidOptions(_) => error_code::INVALID_OPTIONS,
            LevelError::Storage(_) => error_code::STORAGE_ERROR,
            LevelError::LockPoisoned(_) => error_code::LOCK_POISONED,
            LevelError::IteratorInvalidated => error_code::ITERATOR_INVALIDATED,
        }
    }

    pub(crate) fn not_found(key: &[u8]) -> Self {
        LevelError::NotFound(String::from_utf8_lossy(key).into_owned())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LevelError::NotFound(_))
    }

    /// True when SQLite rejected the statement because of a constraint,
    /// e.g. a strict `put` on a key that already exists.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            LevelError::Storage(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}
