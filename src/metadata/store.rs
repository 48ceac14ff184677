//! The flat result map produced by a walk.
//!
//! Entries are append-only. Inserting an identity that already exists adds a
//! new candidate; the winner is the candidate with the highest priority, and
//! among equal priorities the most recent insert. Because the walker inserts
//! in document order, the outcome is deterministic for a given input.

use std::collections::HashMap;

use log::trace;

use super::types::models::{ExtractedEntry, QualifiedIdentity};
use super::types::value::Value;

/// What happened to a candidate on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// First entry with this identity.
    New,
    /// The candidate replaced the previous winner.
    Replaced,
    /// The previous winner had a higher priority and stays.
    Shadowed,
}

#[derive(Debug, Clone, Default)]
pub struct TagStore {
    candidates: Vec<ExtractedEntry>,
    winners: HashMap<QualifiedIdentity, usize>,
    /// Identities in order of first appearance.
    order: Vec<QualifiedIdentity>,
    /// Identities per tag name, in order of first appearance.
    by_name: HashMap<String, Vec<QualifiedIdentity>>,
}

impl TagStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: ExtractedEntry) -> InsertOutcome {
        let index = self.candidates.len();
        let identity = entry.identity.clone();
        let priority = entry.priority;
        self.candidates.push(entry);

        match self.winners.get(&identity).copied() {
            None => {
                self.by_name
                    .entry(identity.name.clone())
                    .or_default()
                    .push(identity.clone());
                self.order.push(identity.clone());
                self.winners.insert(identity, index);
                InsertOutcome::New
            }
            Some(current) if priority >= self.candidates[current].priority => {
                trace!("{} replaced (priority {} >= {})", identity, priority, self.candidates[current].priority);
                self.winners.insert(identity, index);
                InsertOutcome::Replaced
            }
            Some(_) => InsertOutcome::Shadowed,
        }
    }

    /// The winning entry for an exact identity.
    pub fn get(&self, identity: &QualifiedIdentity) -> Option<&ExtractedEntry> {
        self.winners.get(identity).map(|&i| &self.candidates[i])
    }

    /// Winning decoded value for an exact identity.
    pub fn value(&self, identity: &QualifiedIdentity) -> Option<&Value> {
        self.get(identity).and_then(|entry| entry.value.decoded())
    }

    /// Best entry named `name`, optionally restricted to one group.
    ///
    /// Across groups the highest priority wins, then the most recent insert.
    pub fn lookup(&self, name: &str, group: Option<&str>) -> Option<&ExtractedEntry> {
        self.by_name
            .get(name)?
            .iter()
            .filter(|identity| group.map_or(true, |g| identity.group == g))
            .filter_map(|identity| self.winners.get(identity).copied())
            .max_by_key(|&i| (self.candidates[i].priority, i))
            .map(|i| &self.candidates[i])
    }

    /// Winning entries, ordered by the first appearance of their identity.
    pub fn iter(&self) -> impl Iterator<Item = &ExtractedEntry> {
        self.order.iter().map(|identity| &self.candidates[self.winners[identity]])
    }

    /// Every inserted candidate, including shadowed ones, in insert order.
    pub fn candidates(&self) -> &[ExtractedEntry] {
        &self.candidates
    }

    /// Number of distinct identities.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Extend<ExtractedEntry> for TagStore {
    fn extend<I: IntoIterator<Item = ExtractedEntry>>(&mut self, iter: I) {
        for entry in iter {
            self.insert(entry);
        }
    }
}

impl FromIterator<ExtractedEntry> for TagStore {
    fn from_iter<I: IntoIterator<Item = ExtractedEntry>>(iter: I) -> Self {
        let mut store = TagStore::new();
        store.extend(iter);
        store
    }
}
