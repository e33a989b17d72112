//! Lazy cursors over an index snapshot.
//!
//! A cursor owns an `Arc` of the snapshot it was opened on and remembers
//! only its last position; every step re-seeks from that position. Cursors
//! are finite, hold no locks, and see nothing committed after they were
//! opened.

use crate::index::traits::Bucket;
use crate::index::{CompositeKey, EngineSnapshot};
use crate::record::RecordId;
use std::collections::BTreeMap;
use std::ops::Bound::{self, Excluded, Included, Unbounded};
use std::sync::Arc;

/// Scan direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Smallest key first.
    #[default]
    Ascending,
    /// Largest key first.
    Descending,
}

/// Cursor over `(key, rid)` entries of an ordered index.
///
/// Bounds shorter than the index keys act as prefixes: `Included(p)` as an
/// upper bound admits every key extending `p`, `Excluded(p)` as a lower
/// bound skips them.
#[derive(Debug, Clone)]
pub struct EntryCursor {
    snapshot: Arc<EngineSnapshot>,
    lower: Bound<CompositeKey>,
    upper: Bound<CompositeKey>,
    direction: Direction,
    position: Option<(CompositeKey, RecordId)>,
    done: bool,
}

impl EntryCursor {
    pub(crate) fn new(
        snapshot: Arc<EngineSnapshot>,
        lower: Bound<CompositeKey>,
        upper: Bound<CompositeKey>,
        direction: Direction,
    ) -> Self {
        Self {
            snapshot,
            lower,
            upper,
            direction,
            position: None,
            done: false,
        }
    }

    fn in_bounds(&self, key: &CompositeKey) -> bool {
        key.satisfies_lower(&self.lower) && key.satisfies_upper(&self.upper)
    }

    fn first_of(&self, key: &CompositeKey, bucket: &Bucket) -> Option<(CompositeKey, RecordId)> {
        if !self.in_bounds(key) {
            return None;
        }
        bucket.rids().iter().next().map(|r| (key.clone(), *r))
    }

    fn last_of(&self, key: &CompositeKey, bucket: &Bucket) -> Option<(CompositeKey, RecordId)> {
        if !self.in_bounds(key) {
            return None;
        }
        bucket.rids().iter().next_back().map(|r| (key.clone(), *r))
    }

    fn step_forward(
        &self,
        map: &BTreeMap<CompositeKey, Bucket>,
    ) -> Option<(CompositeKey, RecordId)> {
        if let Some((key, rid)) = &self.position {
            let same_key = map
                .get(key)
                .and_then(|b| b.rids().range((Excluded(*rid), Unbounded)).next());
            if let Some(next) = same_key {
                return Some((key.clone(), *next));
            }
            let (k, b) = map.range((Excluded(key), Unbounded)).next()?;
            return self.first_of(k, b);
        }
        let (k, b) = map
            .range((self.lower.as_ref(), Unbounded))
            .find(|(k, _)| k.satisfies_lower(&self.lower))?;
        self.first_of(k, b)
    }

    fn step_backward(
        &self,
        map: &BTreeMap<CompositeKey, Bucket>,
    ) -> Option<(CompositeKey, RecordId)> {
        if let Some((key, rid)) = &self.position {
            let same_key = map
                .get(key)
                .and_then(|b| b.rids().range(..*rid).next_back());
            if let Some(prev) = same_key {
                return Some((key.clone(), *prev));
            }
            let (k, b) = map.range((Unbounded, Excluded(key))).next_back()?;
            return self.last_of(k, b);
        }
        let start = descending_start(map, &self.upper);
        let (k, b) = map
            .range((Unbounded, start.as_ref()))
            .rev()
            .find(|(k, _)| k.satisfies_upper(&self.upper))?;
        self.last_of(k, b)
    }
}

/// Extensions of an inclusive prefix bound sort after the prefix itself, so
/// a descending scan must start at the last of them.
fn descending_start(
    map: &BTreeMap<CompositeKey, Bucket>,
    upper: &Bound<CompositeKey>,
) -> Bound<CompositeKey> {
    match upper {
        Included(p) => {
            let last_extension = map
                .range((Excluded(p), Unbounded))
                .take_while(|(k, _)| k.starts_with(p))
                .last()
                .map(|(k, _)| k.clone());
            Included(last_extension.unwrap_or_else(|| p.clone()))
        }
        other => other.clone(),
    }
}

impl Iterator for EntryCursor {
    type Item = (CompositeKey, RecordId);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = match self.snapshot.ordered() {
            Some(store) => match self.direction {
                Direction::Ascending => self.step_forward(store.map()),
                Direction::Descending => self.step_backward(store.map()),
            },
            None => None,
        };
        match &next {
            Some(entry) => self.position = Some(entry.clone()),
            None => self.done = true,
        }
        next
    }
}

/// Cursor over the distinct keys of an ordered index, ascending.
#[derive(Debug, Clone)]
pub struct KeyCursor {
    snapshot: Arc<EngineSnapshot>,
    position: Option<CompositeKey>,
    done: bool,
}

impl KeyCursor {
    pub(crate) fn new(snapshot: Arc<EngineSnapshot>) -> Self {
        Self {
            snapshot,
            position: None,
            done: false,
        }
    }
}

impl Iterator for KeyCursor {
    type Item = CompositeKey;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = self.snapshot.ordered().and_then(|store| {
            let lower = match &self.position {
                Some(k) => Excluded(k),
                None => Unbounded,
            };
            store.map().range((lower, Unbounded)).next().map(|(k, _)| k.clone())
        });
        match &next {
            Some(k) => self.position = Some(k.clone()),
            None => self.done = true,
        }
        next
    }
}

/// The records stored under one key, in id order.
#[derive(Debug, Clone)]
pub struct RecordIds {
    snapshot: Arc<EngineSnapshot>,
    key: CompositeKey,
    last: Option<RecordId>,
    done: bool,
}

impl RecordIds {
    pub(crate) fn new(snapshot: Arc<EngineSnapshot>, key: CompositeKey) -> Self {
        Self {
            snapshot,
            key,
            last: None,
            done: false,
        }
    }

    /// Returns the key being looked up.
    #[must_use]
    pub fn key(&self) -> &CompositeKey {
        &self.key
    }
}

impl Iterator for RecordIds {
    type Item = RecordId;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let lower = match self.last {
            Some(r) => Excluded(r),
            None => Unbounded,
        };
        let next = self
            .snapshot
            .bucket(&self.key)
            .and_then(|b| b.rids().range((lower, Unbounded)).next().copied());
        match next {
            Some(r) => self.last = Some(r),
            None => self.done = true,
        }
        next
    }
}
