//! The in-memory contact collection and its change notifications.

use std::collections::HashMap;

use crate::contact::ContactSummary;

/// A single mutation of the aggregate, delivered to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionChange {
    Added(ContactSummary),
    Updated {
        previous: ContactSummary,
        current: ContactSummary,
    },
    Removed(ContactSummary),
    Cleared,
}

/// Derived state kept in step with the aggregate.
pub trait CollectionObserver {
    fn on_change(&mut self, change: &CollectionChange);
}

/// Ordered collection holding at most one summary per contact id.
#[derive(Debug, Default)]
pub struct ContactAggregate {
    entries: Vec<ContactSummary>,
    index: HashMap<String, usize>,
}

impl ContactAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ContactSummary> {
        self.index.get(id).map(|&pos| &self.entries[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContactSummary> {
        self.entries.iter()
    }

    /// Insert a summary, overwriting in place if its id is already present.
    pub fn upsert(&mut self, summary: ContactSummary) -> CollectionChange {
        match self.index.get(&summary.id) {
            Some(&pos) => {
                let previous = std::mem::replace(&mut self.entries[pos], summary.clone());
                CollectionChange::Updated {
                    previous,
                    current: summary,
                }
            }
            None => {
                self.index.insert(summary.id.clone(), self.entries.len());
                self.entries.push(summary.clone());
                CollectionChange::Added(summary)
            }
        }
    }

    /// Remove the summary with `id`; `None` if it was not present.
    pub fn remove(&mut self, id: &str) -> Option<CollectionChange> {
        let pos = self.index.remove(id)?;
        let removed = self.entries.remove(pos);
        for entry in &self.entries[pos..] {
            if let Some(slot) = self.index.get_mut(&entry.id) {
                *slot -= 1;
            }
        }
        Some(CollectionChange::Removed(removed))
    }

    pub fn clear(&mut self) -> CollectionChange {
        self.entries.clear();
        self.index.clear();
        CollectionChange::Cleared
    }
}
