use std::path::PathBuf;

use serde::Deserialize;

use crate::error::LevelError;

/// Filename that selects a non-persistent, process-local database.
pub const MEMORY: &str = ":memory:";

/// Construction options for a [`SqliteLevel`](crate::SqliteLevel).
///
/// Deserializes from the same shape callers pass in config files:
///
/// ```json
/// {"filename": "/var/lib/openerp/branch.sqlite", "readOnly": true}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelOptions {
    /// Path to the SQLite file, or `":memory:"`.
    pub filename: String,

    /// Reject every mutating operation. Fixed for the lifetime of the handle.
    #[serde(default)]
    pub read_only: bool,
}

impl Default for LevelOptions {
    fn default() -> Self {
        Self {
            filename: MEMORY.to_string(),
            read_only: false,
        }
    }
}

impl LevelOptions {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Default::default()
        }
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Parse options from command-line style arguments.
    ///
    /// Supported flags:
    /// - `--filename=PATH`
    /// - `--read-only`
    pub fn from_args(args: &[String]) -> Self {
        let mut options = LevelOptions::default();

        for arg in args {
            if let Some(val) = arg.strip_prefix("--filename=") {
                options.filename = val.to_string();
            } else if arg == "--read-only" {
                options.read_only = true;
            }
        }

        options
    }

    pub fn is_memory(&self) -> bool {
        self.filename == MEMORY
    }

    /// Backing file path, or `None` for an in-memory database.
    pub fn path(&self) -> Option<PathBuf> {
        if self.is_memory() {
            None
        } else {
            Some(PathBuf::from(&self.filename))
        }
    }
}

/// Range and shape of an iteration.
///
/// Built through the setters so that conflicting bounds (`gt` with `gte`,
/// `lt` with `lte`) are rejected when the options are assembled, not when the
/// scan runs. Fields are read-only from outside the crate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IteratorOptions {
    pub(crate) gt: Option<Vec<u8>>,
    pub(crate) gte: Option<Vec<u8>>,
    pub(crate) lt: Option<Vec<u8>>,
    pub(crate) lte: Option<Vec<u8>>,
    pub(crate) reverse: bool,
    pub(crate) limit: Option<usize>,
}

impl IteratorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gt(mut self, key: impl AsRef<[u8]>) -> Result<Self, LevelError> {
        if self.gte.is_some() {
            return Err(LevelError::InvalidOptions("gt conflicts with gte".into()));
        }
        self.gt = Some(key.as_ref().to_vec());
        Ok(self)
    }

    pub fn gte(mut self, key: impl AsRef<[u8]>) -> Result<Self, LevelError> {
        if self.gt.is_some() {
            return Err(LevelError::InvalidOptions("gte conflicts with gt".into()));
        }
        self.gte = Some(key.as_ref().to_vec());
        Ok(self)
    }

    pub fn lt(mut self, key: impl AsRef<[u8]>) -> Result<Self, LevelError> {
        if self.lte.is_some() {
            return Err(LevelError::InvalidOptions("lt conflicts with lte".into()));
        }
        self.lt = Some(key.as_ref().to_vec());
        Ok(self)
    }

    pub fn lte(mut self, key: impl AsRef<[u8]>) -> Result<Self, LevelError> {
        if self.lt.is_some() {
            return Err(LevelError::InvalidOptions("lte conflicts with lt".into()));
        }
        self.lte = Some(key.as_ref().to_vec());
        Ok(self)
    }

    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    pub fn get_limit(&self) -> Option<usize> {
        self.limit
    }
}

/// Options for [`SqliteLevel::clear`](crate::SqliteLevel::clear).
///
/// `gte` is matched as a byte prefix, not as a lower range bound: every key
/// that starts with it is removed. Without `gte` every key is removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearOptions {
    pub gte: Option<Vec<u8>>,
}

impl ClearOptions {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn prefix(prefix: impl AsRef<[u8]>) -> Self {
        Self {
            gte: Some(prefix.as_ref().to_vec()),
        }
    }
}
