//! Document cursors over an object store or one of its indexes

use std::collections::VecDeque;

use crate::engine::contract::{Direction, KeyRange};
use crate::engine::record::{Key, Record};

use super::database::DocDatabase;
use super::error::{DocError, Result};

/// Cursor direction, matching the four native cursor kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorDirection {
    #[default]
    Next,
    /// Ascending, first entry of every distinct key only
    NextUnique,
    Prev,
    /// Descending, first entry of every distinct key only
    PrevUnique,
}

impl CursorDirection {
    pub fn from_options(order: Direction, unique: bool) -> Self {
        match (order, unique) {
            (Direction::Asc, false) => CursorDirection::Next,
            (Direction::Asc, true) => CursorDirection::NextUnique,
            (Direction::Desc, false) => CursorDirection::Prev,
            (Direction::Desc, true) => CursorDirection::PrevUnique,
        }
    }

    fn descending(self) -> bool {
        matches!(self, CursorDirection::Prev | CursorDirection::PrevUnique)
    }

    fn unique(self) -> bool {
        matches!(self, CursorDirection::NextUnique | CursorDirection::PrevUnique)
    }
}

/// The entry a cursor is positioned on
#[derive(Debug, Clone, PartialEq)]
pub struct CursorEntry {
    /// Index key for index cursors, primary key otherwise
    pub key: Key,
    pub primary_key: Key,
    pub value: Record,
}

/// A cursor snapshot: positions are fixed when it is opened, values are read
/// as the cursor advances so earlier updates are visible.
pub struct DocCursor {
    db: DocDatabase,
    store: String,
    writable: bool,
    pending: VecDeque<(Key, Key)>,
    current: Option<Key>,
}

impl DocCursor {
    /// `entries` must be sorted ascending by `(key, primary key)`
    pub(crate) fn new(
        db: DocDatabase,
        store: &str,
        writable: bool,
        entries: Vec<(Key, Key)>,
        range: Option<&KeyRange>,
        direction: CursorDirection,
    ) -> Self {
        let mut entries: Vec<(Key, Key)> = entries
            .into_iter()
            .filter(|(key, _)| range.map(|r| r.contains(key)).unwrap_or(true))
            .collect();

        if direction.unique() {
            // Sorted input: the first entry of each run has the lowest primary key.
            entries.dedup_by(|later, first| later.0 == first.0);
        }

        let pending: VecDeque<(Key, Key)> = if direction.descending() {
            if direction.unique() {
                entries.into_iter().rev().collect()
            } else {
                let mut entries = entries;
                entries.sort_by(|a, b| b.cmp(a));
                entries.into_iter().collect()
            }
        } else {
            entries.into_iter().collect()
        };

        Self {
            db,
            store: store.to_string(),
            writable,
            pending,
            current: None,
        }
    }

    /// Move to the next entry; `None` once the cursor is exhausted.
    /// Entries removed since the cursor was opened are skipped.
    pub fn advance(&mut self) -> Result<Option<CursorEntry>> {
        while let Some((key, primary_key)) = self.pending.pop_front() {
            if let Some(value) = self.db.read_record(&self.store, &primary_key)? {
                self.current = Some(primary_key.clone());
                return Ok(Some(CursorEntry {
                    key,
                    primary_key,
                    value,
                }));
            }
        }
        self.current = None;
        Ok(None)
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    fn position(&self) -> Result<&Key> {
        if !self.writable {
            return Err(DocError::ReadOnly);
        }
        self.current
            .as_ref()
            .ok_or_else(|| DocError::Unsupported("cursor is not positioned on an entry"))
    }

    /// Replace the record under the cursor, keeping its primary key
    pub fn update(&self, mut record: Record) -> Result<Key> {
        let key = self.position()?.clone();
        let key_path = self.db_key_path()?;
        record.set(&key_path, key);
        self.db.put_record(&self.store, record)
    }

    pub fn delete(&self) -> Result<()> {
        let key = self.position()?;
        self.db.delete_record(&self.store, key)
    }

    fn db_key_path(&self) -> Result<String> {
        self.db.key_path(&self.store)
    }
}
