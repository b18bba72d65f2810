//! Lazy, pull-based cursors over a range scan.
//!
//! One [`Cursor`] type serves all three iteration flavors; the
//! [`Projection`] parameter decides what each step yields.

use std::collections::VecDeque;
use std::marker::PhantomData;

use crate::error::LevelError;
use crate::level::SqliteLevel;
use crate::range::{Fields, ScanSpec};
use crate::store::ScanRow;

/// Rows fetched from the engine per round trip.
pub const PAGE_SIZE: usize = 64;

/// Shapes a scanned row into the element a cursor yields.
pub trait Projection {
    type Item;

    /// Columns the scan must read.
    const FIELDS: Fields;

    fn project(key: Vec<u8>, value: Option<Vec<u8>>) -> Self::Item;
}

/// Yields `(key, value)` pairs.
#[derive(Debug)]
pub struct Pairs;

/// Yields keys only. Values are never read from the engine.
#[derive(Debug)]
pub struct Keys;

/// Yields values only.
#[derive(Debug)]
pub struct Values;

impl Projection for Pairs {
    type Item = (Vec<u8>, Vec<u8>);
    const FIELDS: Fields = Fields::Both;

    fn project(key: Vec<u8>, value: Option<Vec<u8>>) -> Self::Item {
        (key, value.unwrap_or_default())
    }
}

impl Projection for Keys {
    type Item = Vec<u8>;
    const FIELDS: Fields = Fields::Keys;

    fn project(key: Vec<u8>, _value: Option<Vec<u8>>) -> Self::Item {
        key
    }
}

impl Projection for Values {
    type Item = Vec<u8>;
    const FIELDS: Fields = Fields::Values;

    fn project(_key: Vec<u8>, value: Option<Vec<u8>>) -> Self::Item {
        value.unwrap_or_default()
    }
}

pub type EntryIterator<'a> = Cursor<'a, Pairs>;
pub type KeyIterator<'a> = Cursor<'a, Keys>;
pub type ValueIterator<'a> = Cursor<'a, Values>;

/// Forward-only pointer into the ordered result of a [`ScanSpec`].
///
/// Rows are pulled from the engine one page at a time, resuming after the
/// last key seen, so memory stays bounded by [`PAGE_SIZE`] however large the
/// range is. The cursor borrows the store it was created from and cannot
/// outlive it or coexist with [`SqliteLevel::close`].
///
/// A cursor only ever shows the store as it was when the cursor was built.
/// If any write changes the store before the scan is complete, the rows
/// already buffered are still returned, and then the next page fails with
/// [`LevelError::IteratorInvalidated`]. A page never mixes states from
/// before and after a batch.
///
/// `next` takes `&mut self`; concurrent pulls on one cursor are impossible.
pub struct Cursor<'a, P: Projection> {
    level: &'a SqliteLevel,
    spec: ScanSpec,
    buffer: VecDeque<ScanRow>,
    /// Last key fetched from the engine; the next page starts after it.
    last_key: Option<Vec<u8>>,
    /// Rows still allowed by the limit, if any.
    remaining: Option<usize>,
    /// The engine returned a short page; nothing is left to fetch.
    drained: bool,
    /// Write generation the scan started at.
    generation: u64,
    done: bool,
    yielded: usize,
    _projection: PhantomData<P>,
}

impl<'a, P: Projection> Cursor<'a, P> {
    /// Build a cursor and prepare its first statement. No rows are read.
    pub(crate) fn new(level: &'a SqliteLevel, spec: ScanSpec) -> Result<Self, LevelError> {
        let empty = spec.is_trivially_empty();
        let first_page = Self::page_size(spec.limit);
        let generation = level.with_store(|store| {
            if !empty {
                store.prepare_scan(&spec, first_page)?;
            }
            Ok(level.write_generation())
        })?;

        Ok(Self {
            level,
            remaining: spec.limit,
            spec,
            buffer: VecDeque::new(),
            last_key: None,
            drained: false,
            generation,
            done: empty,
            yielded: 0,
            _projection: PhantomData,
        })
    }

    fn page_size(remaining: Option<usize>) -> usize {
        remaining.map_or(PAGE_SIZE, |r| r.min(PAGE_SIZE))
    }

    /// The scan this cursor runs.
    pub fn spec(&self) -> &ScanSpec {
        &self.spec
    }

    /// Number of elements returned so far.
    pub fn yielded(&self) -> usize {
        self.yielded
    }

    pub fn is_exhausted(&self) -> bool {
        self.done
    }

    /// Pull the next element. `Ok(None)` means the scan is exhausted, and
    /// every later call returns `Ok(None)` again without touching the store.
    ///
    /// An engine error or [`LevelError::IteratorInvalidated`] ends the scan:
    /// it is returned once and the cursor is exhausted afterwards.
    pub async fn next(&mut self) -> Result<Option<P::Item>, LevelError> {
        if self.done {
            return Ok(None);
        }
        if self.remaining == Some(0) {
            self.done = true;
            return Ok(None);
        }

        if self.buffer.is_empty() {
            if self.drained {
                self.done = true;
                return Ok(None);
            }
            if let Err(e) = self.fill() {
                self.done = true;
                self.buffer.clear();
                return Err(e);
            }
        }

        let Some((key, value)) = self.buffer.pop_front() else {
            self.done = true;
            return Ok(None);
        };

        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        self.yielded += 1;
        Ok(Some(P::project(key, value)))
    }

    /// Pull up to `n` elements. An empty result means the scan is exhausted.
    pub async fn next_batch(&mut self, n: usize) -> Result<Vec<P::Item>, LevelError> {
        let mut items = Vec::with_capacity(n.min(PAGE_SIZE));
        while items.len() < n {
            match self.next().await? {
                Some(item) => items.push(item),
                None => break,
            }
        }
        Ok(items)
    }

    /// Drain every remaining element.
    pub async fn all(mut self) -> Result<Vec<P::Item>, LevelError> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }

    fn fill(&mut self) -> Result<(), LevelError> {
        let page = Self::page_size(self.remaining);
        let rows = self.level.with_store(|store| {
            if self.level.write_generation() != self.generation {
                return Err(LevelError::IteratorInvalidated);
            }
            store.scan_page(&self.spec, self.last_key.as_deref(), page)
        })?;

        if rows.len() < page {
            self.drained = true;
        }
        if let Some((key, _)) = rows.last() {
            self.last_key = Some(key.clone());
        }
        self.buffer.extend(rows);
        Ok(())
    }
}
