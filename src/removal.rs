//! The user's pending selection of contacts to delete.

use crate::aggregate::{CollectionChange, CollectionObserver};
use crate::contact::ContactSummary;

/// Contacts selected for removal, unique by id, in selection order.
#[derive(Debug, Default, Clone)]
pub struct RemovalSet {
    selected: Vec<ContactSummary>,
}

impl RemovalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.selected.iter().any(|c| c.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContactSummary> {
        self.selected.iter()
    }

    /// Add the contact if absent; returns `true` if it was added.
    pub fn select(&mut self, contact: ContactSummary) -> bool {
        if self.contains(&contact.id) {
            return false;
        }
        self.selected.push(contact);
        true
    }

    /// Remove by id; returns `true` if it was selected.
    pub fn deselect(&mut self, id: &str) -> bool {
        let before = self.selected.len();
        self.selected.retain(|c| c.id != id);
        self.selected.len() != before
    }

    /// Flip membership; returns `true` if the contact is now selected.
    pub fn toggle(&mut self, contact: &ContactSummary) -> bool {
        if self.deselect(&contact.id) {
            false
        } else {
            self.selected.push(contact.clone());
            true
        }
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    /// Copy of the current selection, decoupled from later toggles.
    pub fn snapshot(&self) -> Vec<ContactSummary> {
        self.selected.clone()
    }
}

impl CollectionObserver for RemovalSet {
    fn on_change(&mut self, change: &CollectionChange) {
        match change {
            CollectionChange::Added(_) => {}
            CollectionChange::Updated { current, .. } => {
                if let Some(slot) = self.selected.iter_mut().find(|c| c.id == current.id) {
                    *slot = current.clone();
                }
            }
            CollectionChange::Removed(contact) => {
                self.deselect(&contact.id);
            }
            CollectionChange::Cleared => self.clear(),
        }
    }
}
