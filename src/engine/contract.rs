//! Storage contract
//!
//! The CRUD + iteration surface implemented by both backends. Every operation
//! is asynchronous and resolves to a `Result`; failures are logged by the
//! engine before they are returned.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

use super::config::StoreConfig;
use super::error::{Result, StoreError};
use super::record::{Key, Record};

/// Cursor walk order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Asc => write!(f, "ASC"),
            Direction::Desc => write!(f, "DESC"),
        }
    }
}

/// Bound on the keys a cursor visits
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeyRange {
    pub lower: Option<Key>,
    pub upper: Option<Key>,
    pub lower_open: bool,
    pub upper_open: bool,
}

impl KeyRange {
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        Self {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }

    pub fn lower_bound(key: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: Some(key.into()),
            lower_open: open,
            ..Self::default()
        }
    }

    pub fn upper_bound(key: impl Into<Key>, open: bool) -> Self {
        Self {
            upper: Some(key.into()),
            upper_open: open,
            ..Self::default()
        }
    }

    pub fn bound(lower: impl Into<Key>, upper: impl Into<Key>, lower_open: bool, upper_open: bool) -> Self {
        Self {
            lower: Some(lower.into()),
            upper: Some(upper.into()),
            lower_open,
            upper_open,
        }
    }

    pub fn contains(&self, key: &Key) -> bool {
        let above = match &self.lower {
            Some(lower) if self.lower_open => key > lower,
            Some(lower) => key >= lower,
            None => true,
        };
        let below = match &self.upper {
            Some(upper) if self.upper_open => key < upper,
            Some(upper) => key <= upper,
            None => true,
        };
        above && below
    }
}

/// What the visitor wants done with the entry under the cursor.
/// `Update` and `Delete` need a cursor opened with write access.
#[derive(Debug, Clone, PartialEq)]
pub enum CursorAction {
    Continue,
    Update(Record),
    Delete,
}

impl From<()> for CursorAction {
    fn from(_: ()) -> Self {
        CursorAction::Continue
    }
}

pub type EndCallback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub struct IterationOptions {
    /// Walk a secondary index instead of the primary key
    pub index: Option<String>,
    pub order: Direction,
    /// Skip entries whose index key equals the previous one
    pub filter_duplicates: bool,
    pub key_range: Option<KeyRange>,
    pub write_access: bool,
    /// Called once the cursor is exhausted; without it the visitor gets `None`
    pub on_end: Option<EndCallback>,
}

impl IterationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(mut self, name: &str) -> Self {
        self.index = Some(name.to_string());
        self
    }

    pub fn order(mut self, order: Direction) -> Self {
        self.order = order;
        self
    }

    pub fn filter_duplicates(mut self, filter: bool) -> Self {
        self.filter_duplicates = filter;
        self
    }

    pub fn key_range(mut self, range: KeyRange) -> Self {
        self.key_range = Some(range);
        self
    }

    pub fn write_access(mut self, write: bool) -> Self {
        self.write_access = write;
        self
    }

    pub fn on_end(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_end = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for IterationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterationOptions")
            .field("index", &self.index)
            .field("order", &self.order)
            .field("filter_duplicates", &self.filter_duplicates)
            .field("key_range", &self.key_range)
            .field("write_access", &self.write_access)
            .field("on_end", &self.on_end.is_some())
            .finish()
    }
}

/// Boxed visitor as handed to a backend's blocking cursor walk
pub(crate) type Visitor = Box<dyn FnMut(Option<&Record>) -> CursorAction + Send>;

pub(crate) fn boxed_visitor<F, R>(mut visit: F) -> Visitor
where
    F: FnMut(Option<&Record>) -> R + Send + 'static,
    R: Into<CursorAction>,
{
    Box::new(move |record| visit(record).into())
}

/// Signal the end of a walk: `on_end` when given, `visit(None)` otherwise
pub(crate) fn finish_walk(visit: &mut Visitor, on_end: Option<EndCallback>) {
    match on_end {
        Some(end) => end(),
        None => {
            visit(None);
        }
    }
}

/// Core storage contract, implemented by both backends
pub trait StoreContract {
    /// Bring the store to `config.version`, creating the container if needed.
    /// Resolves once the store is ready for use.
    fn open_db(&self, config: StoreConfig) -> impl Future<Output = Result<()>> + Send;

    /// Insert or replace a record and return its key
    fn put(&self, record: Record) -> impl Future<Output = Result<Key>> + Send;

    /// Fetch one record; `None` when the key is absent
    fn get(&self, key: Key) -> impl Future<Output = Result<Option<Record>>> + Send;

    fn remove(&self, key: Key) -> impl Future<Output = Result<()>> + Send;

    fn get_all(&self) -> impl Future<Output = Result<Vec<Record>>> + Send;

    fn clear(&self) -> impl Future<Output = Result<()>> + Send;

    /// Walk every entry once, in cursor order
    fn iterate<F, R>(&self, visit: F, options: IterationOptions) -> impl Future<Output = Result<()>> + Send
    where
        F: FnMut(Option<&Record>) -> R + Send + 'static,
        R: Into<CursorAction>;

    /// Release the store handle
    fn close(&self);
}

/// Run blocking storage work off the async executor
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_range_bounds() {
        let range = KeyRange::bound(2, 5, false, true);
        assert!(!range.contains(&Key::Integer(1)));
        assert!(range.contains(&Key::Integer(2)));
        assert!(range.contains(&Key::Integer(4)));
        assert!(!range.contains(&Key::Integer(5)));

        let only = KeyRange::only("render");
        assert!(only.contains(&Key::from("render")));
        assert!(!only.contains(&Key::from("renders")));

        assert!(KeyRange::lower_bound(3, true).contains(&Key::Integer(100)));
        assert!(!KeyRange::upper_bound(3, true).contains(&Key::Integer(3)));
    }

    #[test]
    fn test_unit_visitor_continues() {
        let mut count = 0usize;
        let mut visit = |_: Option<&Record>| count += 1;
        let action: CursorAction = visit(None).into();
        assert_eq!(action, CursorAction::Continue);
        assert_eq!(count, 1);
    }
}
