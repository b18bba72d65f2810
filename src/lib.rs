//! Ordered key-value store over an embedded SQLite table.
//!
//! ```no_run
//! use openerp_level::{BatchOp, IteratorOptions, LevelOptions, SqliteLevel};
//!
//! # async fn demo() -> Result<(), openerp_level::LevelError> {
//! let level = SqliteLevel::open_with(LevelOptions::new(":memory:")).await?;
//! level
//!     .batch(vec![BatchOp::put("key1", "value1"), BatchOp::put("key2", "value2")])
//!     .await?;
//!
//! let mut it = level.iterator(IteratorOptions::new().gte("key1")?)?;
//! while let Some((key, value)) = it.next().await? {
//!     println!("{:?} = {:?}", key, value);
//! }
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod cursor;
pub mod error;
pub mod level;
pub mod options;
pub mod range;
mod store;

pub use batch::{BatchOp, ChainedBatch};
pub use cursor::{Cursor, EntryIterator, KeyIterator, Keys, Pairs, Projection, ValueIterator, Values};
pub use error::LevelError;
pub use level::{Encoding, Manifest, SqliteLevel, Status};
pub use options::{ClearOptions, IteratorOptions, LevelOptions};
pub use range::{Fields, Order, ScanSpec};
