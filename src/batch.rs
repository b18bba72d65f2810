use tracing::debug;

use crate::error::LevelError;
use crate::level::SqliteLevel;

/// A single operation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or replace `key`.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Remove `key` if present.
    Del { key: Vec<u8> },
}

impl BatchOp {
    pub fn put(key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Self {
        BatchOp::Put {
            key: key.as_ref().to_vec(),
            value: value.as_ref().to_vec(),
        }
    }

    pub fn del(key: impl AsRef<[u8]>) -> Self {
        BatchOp::Del {
            key: key.as_ref().to_vec(),
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Del { key } => key,
        }
    }
}

/// Builder that collects operations and submits them as one batch.
///
/// ```no_run
/// # async fn demo(level: &openerp_level::SqliteLevel) -> Result<(), openerp_level::LevelError> {
/// level
///     .chained_batch()
///     .del("old-name")
///     .put("new-name", "payload")
///     .write()
///     .await?;
/// # Ok(())
/// # }
/// ```
///
/// Nothing touches the store until [`write`](ChainedBatch::write). Dropping
/// the builder discards the operations.
#[must_use = "a chained batch does nothing until `write` is awaited"]
pub struct ChainedBatch<'a> {
    level: &'a SqliteLevel,
    ops: Vec<BatchOp>,
}

impl<'a> ChainedBatch<'a> {
    pub(crate) fn new(level: &'a SqliteLevel) -> Self {
        Self {
            level,
            ops: Vec::new(),
        }
    }

    pub fn put(mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Self {
        self.ops.push(BatchOp::put(key, value));
        self
    }

    pub fn del(mut self, key: impl AsRef<[u8]>) -> Self {
        self.ops.push(BatchOp::del(key));
        self
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Drop every queued operation and keep building.
    pub fn clear(mut self) -> Self {
        debug!("ChainedBatch: discarding {} queued ops", self.ops.len());
        self.ops.clear();
        self
    }

    /// Submit the queued operations atomically.
    pub async fn write(self) -> Result<(), LevelError> {
        self.level.batch(self.ops).await
    }
}
