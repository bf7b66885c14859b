//! Partition of the aggregate into probable-duplicate groups.

use std::collections::{BTreeMap, HashMap};

use crate::aggregate::{CollectionChange, CollectionObserver};
use crate::contact::ContactSummary;

/// How a contact is mapped to its group key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupingStrategy {
    /// Display name with surrounding whitespace stripped, case preserved.
    /// Contacts without a display name share the empty key.
    #[default]
    DisplayName,
    /// First whitespace-separated token of the given name. Contacts without
    /// a given name are left out. Coarse: "Jo Smith" and "Jo Adams" collide.
    FirstGivenName,
}

impl GroupingStrategy {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "display-name" | "display_name" => Some(Self::DisplayName),
            "first-given-name" | "first_given_name" => Some(Self::FirstGivenName),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::DisplayName => "display-name",
            Self::FirstGivenName => "first-given-name",
        }
    }

    pub fn key_for(self, contact: &ContactSummary) -> Option<String> {
        match self {
            Self::DisplayName => Some(contact.display_name.trim().to_string()),
            Self::FirstGivenName => contact
                .given_name
                .as_deref()
                .and_then(|given| given.split_whitespace().next())
                .map(str::to_string),
        }
    }
}

/// Contacts sharing a group key, in the order they entered the aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    key: String,
    members: Vec<ContactSummary>,
}

impl Group {
    fn new(key: String) -> Self {
        Self {
            key,
            members: Vec::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn members(&self) -> &[ContactSummary] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_duplicate(&self) -> bool {
        self.members.len() > 1
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.iter().any(|m| m.id == id)
    }
}

/// Live grouping of the aggregate, keyed and sorted by ordinal string order.
#[derive(Debug, Default)]
pub struct GroupIndex {
    strategy: GroupingStrategy,
    groups: BTreeMap<String, Group>,
    member_keys: HashMap<String, String>,
}

impl GroupIndex {
    pub fn new(strategy: GroupingStrategy) -> Self {
        Self {
            strategy,
            groups: BTreeMap::new(),
            member_keys: HashMap::new(),
        }
    }

    /// Build an index over an existing collection.
    pub fn from_contacts<'a>(
        strategy: GroupingStrategy,
        contacts: impl IntoIterator<Item = &'a ContactSummary>,
    ) -> Self {
        let mut index = Self::new(strategy);
        for contact in contacts {
            index.insert(contact.clone());
        }
        index
    }

    pub fn strategy(&self) -> GroupingStrategy {
        self.strategy
    }

    /// Switch strategy and regroup `contacts` from scratch.
    pub fn rebuild<'a>(
        &mut self,
        strategy: GroupingStrategy,
        contacts: impl IntoIterator<Item = &'a ContactSummary>,
    ) {
        *self = Self::from_contacts(strategy, contacts);
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// All groups in ascending key order.
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Groups with more than one member, in ascending key order.
    pub fn duplicate_groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values().filter(|g| g.is_duplicate())
    }

    pub fn get(&self, key: &str) -> Option<&Group> {
        self.groups.get(key)
    }

    pub fn key_of(&self, id: &str) -> Option<&str> {
        self.member_keys.get(id).map(String::as_str)
    }

    fn insert(&mut self, contact: ContactSummary) {
        let Some(key) = self.strategy.key_for(&contact) else {
            return;
        };
        self.member_keys.insert(contact.id.clone(), key.clone());
        self.groups
            .entry(key.clone())
            .or_insert_with(|| Group::new(key))
            .members
            .push(contact);
    }

    fn remove(&mut self, id: &str) {
        let Some(key) = self.member_keys.remove(id) else {
            return;
        };
        if let Some(group) = self.groups.get_mut(&key) {
            group.members.retain(|m| m.id != id);
            if group.members.is_empty() {
                self.groups.remove(&key);
            }
        }
    }

    fn update(&mut self, current: &ContactSummary) {
        let new_key = self.strategy.key_for(current);
        let old_key = self.member_keys.get(&current.id).cloned();

        if new_key.is_some() && new_key == old_key {
            if let Some(member) = old_key
                .and_then(|key| self.groups.get_mut(&key))
                .and_then(|group| group.members.iter_mut().find(|m| m.id == current.id))
            {
                *member = current.clone();
            }
            return;
        }

        self.remove(&current.id);
        self.insert(current.clone());
    }
}

impl CollectionObserver for GroupIndex {
    fn on_change(&mut self, change: &CollectionChange) {
        match change {
            CollectionChange::Added(contact) => {
                // A re-added id must not end up in two groups.
                self.remove(&contact.id);
                self.insert(contact.clone());
            }
            CollectionChange::Updated { current, .. } => self.update(current),
            CollectionChange::Removed(contact) => self.remove(&contact.id),
            CollectionChange::Cleared => {
                self.groups.clear();
                self.member_keys.clear();
            }
        }
    }
}
