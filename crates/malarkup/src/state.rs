//! Path-addressed state store.
//!
//! The store is an owned nested mapping. Leaves hold plain values or signal
//! cells. Reads unwrap signals (and subscribe the running effect), writes to a
//! signal leaf go through `Signal::set` so subscriber wiring survives.
//!
//! Paths are dot-separated identifiers: `player.stats.hp`.

use crate::reactive::Signal;
use crate::value::{Map, Value};
use indexmap::IndexMap;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

pub type Segments<'path> = SmallVec<[&'path str; 4]>;

#[derive(Debug, Clone, PartialEq)]
pub enum PathError {
    Empty,
    InvalidSegment { path: String, segment: String },
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty variable path"),
            Self::InvalidSegment { path, segment } => {
                write!(f, "invalid variable path '{path}': '{segment}' is not an identifier")
            }
        }
    }
}

impl std::error::Error for PathError {}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    InvalidPath(PathError),
    /// An intermediate segment already holds a non-mapping value.
    NotAMapping { path: String, prefix: String },
    /// Signal cells can't be installed inside another signal's value.
    InsideSignal { path: String, prefix: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPath(error) => write!(f, "{error}"),
            Self::NotAMapping { path, prefix } => {
                write!(f, "failed to set {path}: {prefix} is not a mapping")
            }
            Self::InsideSignal { path, prefix } => {
                write!(f, "failed to declare {path}: {prefix} is a signal")
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<PathError> for StoreError {
    fn from(error: PathError) -> Self {
        Self::InvalidPath(error)
    }
}

pub fn is_valid_segment(segment: &str) -> bool {
    let mut characters = segment.chars();
    match characters.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {
            characters.all(|character| character.is_alphanumeric() || character == '_')
        }
        _ => false,
    }
}

pub fn parse_path(path: &str) -> Result<Segments<'_>, PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    path.split('.')
        .map(|segment| {
            if is_valid_segment(segment) {
                Ok(segment)
            } else {
                Err(PathError::InvalidSegment {
                    path: path.to_owned(),
                    segment: segment.to_owned(),
                })
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
enum Node {
    Value(Value),
    Signal(Signal<Value>),
    Table(IndexMap<String, Node>),
}

impl Node {
    fn from_map(map: Map) -> Self {
        Self::Table(
            map.into_iter()
                .map(|(key, value)| (key, Self::Value(value)))
                .collect(),
        )
    }

    /// Snapshot with signals unwrapped; nested signal reads are tracked.
    fn to_value(&self) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::Signal(signal) => signal.get(),
            Self::Table(table) => Value::Map(table_to_map(table)),
        }
    }
}

fn table_to_map(table: &IndexMap<String, Node>) -> Map {
    table
        .iter()
        .map(|(key, node)| (key.clone(), node.to_value()))
        .collect()
}

enum Resolved {
    Value(Value),
    /// Signal found at `segments[..rest]`; the remaining segments index into its value.
    Signal(Signal<Value>, usize),
    Missing,
}

fn resolve(root: &IndexMap<String, Node>, segments: &[&str]) -> Resolved {
    let mut table = root;
    for (position, segment) in segments.iter().enumerate() {
        let Some(node) = table.get(*segment) else {
            return Resolved::Missing;
        };
        let rest = position + 1;
        match node {
            Node::Table(inner) if rest < segments.len() => table = inner,
            Node::Table(_) => return Resolved::Value(node.to_value()),
            Node::Signal(signal) => return Resolved::Signal(signal.clone(), rest),
            Node::Value(value) => return Resolved::Value(value.lookup(&segments[rest..])),
        }
    }
    Resolved::Missing
}

enum Cell {
    Value(Value),
    Signal(Signal<Value>),
}

/// A write that has to go through a signal once the store borrow is released.
struct PendingWrite {
    signal: Signal<Value>,
    rest: usize,
    value: Value,
}

fn write(
    root: &mut IndexMap<String, Node>,
    path: &str,
    segments: &[&str],
    cell: Cell,
) -> Result<Option<PendingWrite>, StoreError> {
    let Some((last, parents)) = segments.split_last() else {
        return Err(PathError::Empty.into());
    };
    let mut table = root;
    for (position, segment) in parents.iter().enumerate() {
        let node = table
            .entry((*segment).to_owned())
            .or_insert_with(|| Node::Table(IndexMap::new()));
        if let Node::Value(Value::Map(map)) = node {
            let map = std::mem::take(map);
            *node = Node::from_map(map);
        }
        let prefix = || segments[..=position].join(".");
        match node {
            Node::Table(inner) => table = inner,
            Node::Signal(signal) => {
                return match cell {
                    Cell::Value(value) => Ok(Some(PendingWrite {
                        signal: signal.clone(),
                        rest: position + 1,
                        value,
                    })),
                    Cell::Signal(_) => Err(StoreError::InsideSignal {
                        path: path.to_owned(),
                        prefix: prefix(),
                    }),
                };
            }
            Node::Value(_) => {
                return Err(StoreError::NotAMapping {
                    path: path.to_owned(),
                    prefix: prefix(),
                });
            }
        }
    }
    match cell {
        Cell::Value(value) => {
            if let Some(Node::Signal(signal)) = table.get(*last) {
                return Ok(Some(PendingWrite {
                    signal: signal.clone(),
                    rest: segments.len(),
                    value,
                }));
            }
            table.insert((*last).to_owned(), Node::Value(value));
        }
        Cell::Signal(signal) => {
            table.insert((*last).to_owned(), Node::Signal(signal));
        }
    }
    Ok(None)
}

/// Shared handle to the process-wide store.
#[derive(Clone, Default)]
pub struct Store(Rc<RefCell<IndexMap<String, Node>>>);

/// Non-owning handle held by long-lived effect closures.
#[derive(Clone, Default)]
pub struct WeakStore(Weak<RefCell<IndexMap<String, Node>>>);

impl WeakStore {
    pub fn upgrade(&self) -> Option<Store> {
        self.0.upgrade().map(Store)
    }
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose top-level entries are the members of `map`.
    pub fn from_map(map: Map) -> Self {
        let table = map
            .into_iter()
            .map(|(key, value)| (key, Node::Value(value)))
            .collect();
        Self(Rc::new(RefCell::new(table)))
    }

    pub fn downgrade(&self) -> WeakStore {
        WeakStore(Rc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &Store) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Value at `path`, `Undefined` when any segment is missing.
    pub fn try_get(&self, path: &str) -> Result<Value, PathError> {
        let segments = parse_path(path)?;
        let resolved = resolve(&self.0.borrow(), &segments);
        Ok(match resolved {
            Resolved::Value(value) => value,
            Resolved::Signal(signal, rest) => signal.with(|value| value.lookup(&segments[rest..])),
            Resolved::Missing => Value::Undefined,
        })
    }

    pub fn get_path(&self, path: &str) -> Value {
        self.try_get(path).unwrap_or_else(|error| {
            log::warn!("{error}");
            Value::Undefined
        })
    }

    /// Writes `value` at `path`, creating missing intermediate mappings.
    ///
    /// A signal leaf is written through, never replaced.
    pub fn try_set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let segments = parse_path(path)?;
        let pending = write(&mut self.0.borrow_mut(), path, &segments, Cell::Value(value))?;
        let Some(PendingWrite { signal, rest, value }) = pending else {
            return Ok(());
        };
        let offset = rest;
        let rest = &segments[offset..];
        if rest.is_empty() {
            signal.set(value);
            return Ok(());
        }
        let mut updated = signal.peek();
        let failed_at = if matches!(updated, Value::Map(_)) {
            match updated.set_in(rest, value) {
                Ok(()) => {
                    signal.set(updated);
                    return Ok(());
                }
                Err(position) => offset + position + 1,
            }
        } else {
            offset
        };
        Err(StoreError::NotAMapping {
            path: path.to_owned(),
            prefix: segments[..failed_at].join("."),
        })
    }

    pub fn set_path(&self, path: &str, value: impl Into<Value>) {
        if let Err(error) = self.try_set(path, value.into()) {
            log::warn!("{error}");
        }
    }

    /// Installs `signal` as the cell at `path`, replacing whatever was there.
    pub fn set_signal(&self, path: &str, signal: Signal<Value>) -> Result<(), StoreError> {
        let segments = parse_path(path)?;
        write(&mut self.0.borrow_mut(), path, &segments, Cell::Signal(signal))?;
        Ok(())
    }

    /// The signal cell stored exactly at `path`, if there is one.
    pub fn signal(&self, path: &str) -> Option<Signal<Value>> {
        let segments = parse_path(path).ok()?;
        match resolve(&self.0.borrow(), &segments) {
            Resolved::Signal(signal, rest) if rest == segments.len() => Some(signal),
            _ => None,
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        crate::reactive::untracked(|| self.try_get(path))
            .map(|value| !value.is_undefined())
            .unwrap_or(false)
    }

    /// Deletes the entry at `path`. Entries inside signal values are left alone.
    pub fn remove(&self, path: &str) -> Result<bool, PathError> {
        let segments = parse_path(path)?;
        let Some((last, parents)) = segments.split_last() else {
            return Err(PathError::Empty);
        };
        let mut root = self.0.borrow_mut();
        let mut table = &mut *root;
        for segment in parents {
            match table.get_mut(*segment) {
                Some(Node::Table(inner)) => table = inner,
                Some(Node::Value(Value::Map(map))) => return Ok(map.shift_remove(*last).is_some()),
                _ => return Ok(false),
            }
        }
        Ok(table.shift_remove(*last).is_some())
    }

    /// The whole store as a map, signals unwrapped.
    pub fn snapshot(&self) -> Value {
        Value::Map(table_to_map(&self.0.borrow()))
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Store").field(&self.0.borrow()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect;
    use std::cell::Cell as StdCell;

    #[test]
    fn missing_paths_read_undefined_without_vivifying() {
        let store = Store::new();
        assert_eq!(store.get_path("a.b.c"), Value::Undefined);
        assert_eq!(store.snapshot(), Value::Map(Map::new()));
    }

    #[test]
    fn set_auto_vivifies_intermediate_levels() {
        let store = Store::new();
        store.set_path("player.stats.hp", 10);
        assert_eq!(store.get_path("player.stats.hp"), Value::from(10));
        assert_eq!(store.snapshot().to_json_string(), r#"{"player":{"stats":{"hp":10}}}"#);
    }

    #[test]
    fn set_through_a_plain_value_fails_and_keeps_it() {
        let store = Store::new();
        store.set_path("gold", 3);
        let error = store.try_set("gold.coins.copper", Value::from(1)).unwrap_err();
        assert_eq!(
            error,
            StoreError::NotAMapping {
                path: "gold.coins.copper".into(),
                prefix: "gold".into(),
            }
        );
        assert_eq!(store.get_path("gold"), Value::from(3));
    }

    #[test]
    fn writes_into_assigned_maps() {
        let store = Store::new();
        let mut inventory = Map::new();
        inventory.insert("sword".into(), Value::from(true));
        store.set_path("inventory", inventory);
        store.set_path("inventory.shield", false);
        assert_eq!(
            store.get_path("inventory").to_json_string(),
            r#"{"sword":true,"shield":false}"#
        );
    }

    #[test]
    fn invalid_paths_are_rejected() {
        let store = Store::new();
        for path in ["", "1up", "a..b", "a-b", "a.", "a b"] {
            assert!(store.try_get(path).is_err(), "{path}");
            assert!(store.try_set(path, Value::Null).is_err(), "{path}");
        }
        assert_eq!(store.get_path("1up"), Value::Undefined);
        assert!(parse_path("_private.x2").is_ok());
    }

    #[test]
    fn signal_leaves_are_written_through() {
        let store = Store::new();
        let hp = Signal::new(Value::from(10));
        store.set_signal("hp", hp.clone()).unwrap();
        let seen = Rc::new(StdCell::new(0.0));
        effect({
            let (store, seen) = (store.clone(), seen.clone());
            move || seen.set(store.get_path("hp").to_number())
        });
        store.set_path("hp", 4);
        assert_eq!(seen.get(), 4.0);
        assert!(store.signal("hp").is_some_and(|cell| cell.ptr_eq(&hp)));
        assert_eq!(hp.peek(), Value::from(4));
    }

    #[test]
    fn plain_values_are_never_promoted() {
        let store = Store::new();
        store.set_path("x", 1);
        store.set_path("x", 2);
        assert!(store.signal("x").is_none());
    }

    #[test]
    fn nested_writes_below_a_signal_notify_it() {
        let store = Store::new();
        let mut player = Map::new();
        player.insert("hp".into(), Value::from(1));
        store.set_signal("player", Signal::new(Value::Map(player))).unwrap();
        let runs = Rc::new(StdCell::new(0));
        effect({
            let (store, runs) = (store.clone(), runs.clone());
            move || {
                store.get_path("player.hp");
                runs.set(runs.get() + 1);
            }
        });
        store.set_path("player.hp", 3);
        assert_eq!(store.get_path("player.hp"), Value::from(3));
        assert_eq!(runs.get(), 2);
        assert!(matches!(
            store.set_signal("player.mp", Signal::new(Value::Null)),
            Err(StoreError::InsideSignal { .. })
        ));
    }

    #[test]
    fn remove_deletes_entries() {
        let store = Store::new();
        store.set_path("a.b", 1);
        assert_eq!(store.remove("a.b"), Ok(true));
        assert_eq!(store.remove("a.b"), Ok(false));
        assert!(store.contains("a"));
        assert!(!store.contains("a.b"));
    }
}
