//! Refresh and confirm-removal actions over the aggregate, its grouping and
//! the removal selection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::aggregate::{CollectionChange, CollectionObserver, ContactAggregate};
use crate::cancel::CancelToken;
use crate::contact::ContactSummary;
use crate::error::{DedupeError, DeleteError};
use crate::grouping::{GroupIndex, GroupingStrategy};
use crate::removal::RemovalSet;
use crate::remote::Connector;
use crate::session::{DeleteReport, Session};

/// Single-slot gate serializing refresh and removal.
#[derive(Debug, Clone, Default)]
pub struct BusyGate {
    busy: Arc<AtomicBool>,
}

impl BusyGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Take the gate, or `None` if an operation already holds it.
    pub fn try_acquire(&self) -> Option<BusyGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard {
                busy: Arc::clone(&self.busy),
            })
    }
}

/// Releases the gate when dropped.
#[derive(Debug)]
pub struct BusyGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshReport {
    pub contacts: usize,
    pub groups: usize,
}

pub struct Deduplicator<C: Connector> {
    session: Session<C>,
    contacts: ContactAggregate,
    groups: GroupIndex,
    removal: RemovalSet,
    gate: BusyGate,
}

impl<C: Connector> Deduplicator<C> {
    pub fn new(connector: C, strategy: GroupingStrategy) -> Self {
        Self {
            session: Session::new(connector),
            contacts: ContactAggregate::new(),
            groups: GroupIndex::new(strategy),
            removal: RemovalSet::new(),
            gate: BusyGate::new(),
        }
    }

    pub fn contacts(&self) -> &ContactAggregate {
        &self.contacts
    }

    pub fn groups(&self) -> &GroupIndex {
        &self.groups
    }

    pub fn removal(&self) -> &RemovalSet {
        &self.removal
    }

    pub fn session(&self) -> &Session<C> {
        &self.session
    }

    pub fn busy_gate(&self) -> &BusyGate {
        &self.gate
    }

    pub fn can_refresh(&self) -> bool {
        !self.gate.is_busy()
    }

    pub fn can_confirm(&self) -> bool {
        !self.gate.is_busy() && !self.removal.is_empty()
    }

    /// Flip the removal mark of a contact in the aggregate.
    ///
    /// Returns the new state, or `None` for an unknown id.
    pub fn toggle_removal(&mut self, id: &str) -> Option<bool> {
        let contact = self.contacts.get(id)?;
        Some(self.removal.toggle(contact))
    }

    /// Mark every member of a group except the first one.
    pub fn mark_all_but_first(&mut self, key: &str) -> usize {
        let Some(group) = self.groups.get(key) else {
            return 0;
        };
        let mut marked = 0;
        for member in group.members().iter().skip(1) {
            if self.removal.select(member.clone()) {
                marked += 1;
            }
        }
        marked
    }

    pub fn clear_removal(&mut self) {
        self.removal.clear();
    }

    /// Regroup the current aggregate with another strategy.
    pub fn set_strategy(&mut self, strategy: GroupingStrategy) {
        if self.groups.strategy() != strategy {
            self.groups.rebuild(strategy, self.contacts.iter());
        }
    }

    /// Load contacts without a remote fetch (offline input).
    pub fn load<I: IntoIterator<Item = ContactSummary>>(&mut self, contacts: I) {
        for contact in contacts {
            let change = self.contacts.upsert(contact);
            self.publish(&change);
        }
    }

    /// Rebuild the aggregate from the remote store.
    ///
    /// `progress` receives the number of distinct contacts loaded so far. On a
    /// fetch failure or cancellation the contacts inserted so far remain.
    pub async fn refresh(
        &mut self,
        cancel: &CancelToken,
        mut progress: impl FnMut(usize),
    ) -> Result<RefreshReport, DedupeError> {
        if cancel.is_cancelled() {
            return Err(DedupeError::Cancelled);
        }
        let _guard = self.gate.try_acquire().ok_or(DedupeError::Busy)?;

        let change = self.contacts.clear();
        self.groups.on_change(&change);
        self.removal.on_change(&change);

        let mut cursor = self.session.list_contacts(cancel).await?;
        let drained = loop {
            match cursor.next().await {
                Ok(Some(contact)) => {
                    let change = self.contacts.upsert(contact);
                    self.groups.on_change(&change);
                    self.removal.on_change(&change);
                    progress(self.contacts.len());
                }
                Ok(None) => break Ok(cursor.pages_fetched()),
                Err(err) => break Err(err),
            }
        };
        drop(cursor);

        let pages = match drained {
            Ok(pages) => pages,
            Err(err) => {
                if err.is_unauthorized() {
                    warn!("access token rejected; signing in again on the next refresh");
                    self.session.disconnect();
                }
                return Err(err.into());
            }
        };

        let report = RefreshReport {
            contacts: self.contacts.len(),
            groups: self.groups.len(),
        };
        info!(
            contacts = report.contacts,
            groups = report.groups,
            pages,
            "refresh complete"
        );
        Ok(report)
    }

    /// Delete the current removal selection remotely.
    ///
    /// Only contacts the store confirmed deleted leave the aggregate; after a
    /// mid-batch failure the rest stay selected and the error carries the
    /// partial report.
    pub async fn confirm_removal(
        &mut self,
        cancel: &CancelToken,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<DeleteReport, DedupeError> {
        if self.removal.is_empty() {
            return Err(DedupeError::NothingSelected);
        }
        let _guard = self.gate.try_acquire().ok_or(DedupeError::Busy)?;
        if cancel.is_cancelled() {
            return Err(DedupeError::Cancelled);
        }

        let snapshot = self.removal.snapshot();
        let outcome = self
            .session
            .delete_contacts(&snapshot, cancel, &mut progress)
            .await?;

        for id in &outcome.report.deleted {
            if let Some(change) = self.contacts.remove(id) {
                self.publish(&change);
            }
        }

        match outcome.error {
            None => {
                info!(deleted = outcome.report.deleted.len(), "removal complete");
                Ok(outcome.report)
            }
            Some(DeleteError::Cancelled) if outcome.report.deleted.is_empty() => {
                Err(DedupeError::Cancelled)
            }
            Some(source) => {
                warn!(
                    deleted = outcome.report.deleted.len(),
                    pending = outcome.report.pending.len(),
                    error = %source,
                    "removal stopped early"
                );
                Err(DedupeError::Delete {
                    source,
                    report: outcome.report,
                })
            }
        }
    }

    fn publish(&mut self, change: &CollectionChange) {
        self.groups.on_change(change);
        self.removal.on_change(change);
    }
}
