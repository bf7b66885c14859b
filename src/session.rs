//! Lazily connected session over a contact store.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::contact::{ContactSummary, FolderScope};
use crate::error::{AuthError, DeleteError, FetchError};
use crate::remote::{ContactPage, ContactStore, Connector};

/// Authenticated handle to the remote contact store, created on first use
/// and reused afterwards.
pub struct Session<C: Connector> {
    connector: C,
    store: Option<C::Store>,
}

impl<C: Connector> Session<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            store: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.store.is_some()
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Drop the live store; the next operation reconnects.
    pub fn disconnect(&mut self) {
        self.store = None;
    }

    /// Return the live store, authenticating first if there is none.
    pub async fn connect(&mut self, cancel: &CancelToken) -> Result<&C::Store, AuthError> {
        let store = match self.store.take() {
            Some(store) => store,
            None => {
                debug!("connecting to contact store");
                let store = cancel
                    .run(self.connector.connect(cancel), || AuthError::Cancelled)
                    .await?;
                info!("connected to contact store");
                store
            }
        };
        Ok(self.store.insert(store))
    }

    /// Enumerate every contact of the root folder and all sub-folders.
    pub async fn list_contacts(
        &mut self,
        cancel: &CancelToken,
    ) -> Result<ContactCursor<'_, C::Store>, AuthError> {
        let store = self.connect(cancel).await?;
        Ok(ContactCursor::new(store, cancel.clone()))
    }

    /// Delete `items` one after another, stopping at the first failure.
    ///
    /// Deletion is not transactional: contacts deleted before a failure stay
    /// deleted, and the outcome says exactly which ones those are.
    pub async fn delete_contacts(
        &mut self,
        items: &[ContactSummary],
        cancel: &CancelToken,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<DeleteOutcome, AuthError> {
        let store = self.connect(cancel).await?;
        Ok(delete_sequentially(store, items, cancel, progress).await)
    }
}

async fn delete_sequentially<S: ContactStore>(
    store: &S,
    items: &[ContactSummary],
    cancel: &CancelToken,
    progress: &mut dyn FnMut(usize, usize),
) -> DeleteOutcome {
    let mut report = DeleteReport::default();
    let total = items.len();

    let folders = match cancel
        .run(store.list_folders(), || FetchError::Cancelled)
        .await
    {
        Ok(folders) => folders,
        Err(FetchError::Cancelled) => return DeleteOutcome::aborted(items, DeleteError::Cancelled),
        Err(err) => return DeleteOutcome::aborted(items, DeleteError::Folders(err)),
    };

    for (pos, item) in items.iter().enumerate() {
        if cancel.is_cancelled() {
            report.pending = ids(&items[pos..]);
            return DeleteOutcome {
                report,
                error: Some(DeleteError::Cancelled),
            };
        }
        let scope = FolderScope::for_contact(item, &folders);
        let result = cancel
            .run(store.delete_contact(&scope, &item.id), || DeleteError::Cancelled)
            .await;

        match result {
            Ok(()) => {
                debug!(id = %item.id, folder = scope.name(), "deleted contact");
                report.deleted.push(item.id.clone());
                progress(report.deleted.len(), total);
            }
            Err(err) => {
                warn!(id = %item.id, error = %err, "delete failed; aborting batch");
                report.failed = Some(item.id.clone());
                report.pending = ids(&items[pos + 1..]);
                return DeleteOutcome {
                    report,
                    error: Some(err),
                };
            }
        }
    }

    DeleteOutcome {
        report,
        error: None,
    }
}

/// Which contacts of a delete batch were confirmed deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// Ids deleted remotely, in request order.
    pub deleted: Vec<String>,
    /// Id whose delete was attempted and failed or was cut short.
    pub failed: Option<String>,
    /// Ids never attempted because the batch stopped early.
    pub pending: Vec<String>,
}

impl DeleteReport {
    pub fn requested(&self) -> usize {
        self.deleted.len() + usize::from(self.failed.is_some()) + self.pending.len()
    }
}

/// A delete report plus the error that stopped the batch, if any.
#[derive(Debug)]
pub struct DeleteOutcome {
    pub report: DeleteReport,
    pub error: Option<DeleteError>,
}

impl DeleteOutcome {
    /// The batch stopped before any delete was attempted.
    fn aborted(items: &[ContactSummary], error: DeleteError) -> Self {
        Self {
            report: DeleteReport {
                pending: ids(items),
                ..DeleteReport::default()
            },
            error: Some(error),
        }
    }
}

fn ids(items: &[ContactSummary]) -> Vec<String> {
    items.iter().map(|c| c.id.clone()).collect()
}

/// Lazy sequence of contact summaries.
///
/// Folders are enumerated root first, then sub-folders in listing order;
/// the next page is only requested once the buffered one is drained.
pub struct ContactCursor<'a, S> {
    store: &'a S,
    cancel: CancelToken,
    scopes: Option<VecDeque<FolderScope>>,
    continuation: Option<(FolderScope, String)>,
    buffer: VecDeque<ContactSummary>,
    pages: usize,
}

impl<'a, S: ContactStore> ContactCursor<'a, S> {
    pub fn new(store: &'a S, cancel: CancelToken) -> Self {
        Self {
            store,
            cancel,
            scopes: None,
            continuation: None,
            buffer: VecDeque::new(),
            pages: 0,
        }
    }

    /// Number of pages fetched so far.
    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    /// Yield the next contact, fetching another page when needed.
    pub async fn next(&mut self) -> Result<Option<ContactSummary>, FetchError> {
        loop {
            if let Some(contact) = self.buffer.pop_front() {
                return Ok(Some(contact));
            }
            if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            if let Some((scope, link)) = self.continuation.take() {
                let page = self.fetch(&scope, Some(&link)).await?;
                self.absorb(scope, page);
                continue;
            }

            if self.scopes.is_none() {
                let folders = self
                    .cancel
                    .run(self.store.list_folders(), || FetchError::Cancelled)
                    .await?;
                debug!(folders = folders.len(), "listed contact folders");
                let mut scopes: VecDeque<FolderScope> =
                    folders.iter().map(FolderScope::from).collect();
                scopes.push_front(FolderScope::Root);
                self.scopes = Some(scopes);
                continue;
            }

            let Some(scope) = self.scopes.as_mut().and_then(VecDeque::pop_front) else {
                return Ok(None);
            };
            let page = self.fetch(&scope, None).await?;
            self.absorb(scope, page);
        }
    }

    /// Drain the cursor into a vector.
    pub async fn collect(mut self) -> Result<Vec<ContactSummary>, FetchError> {
        let mut contacts = Vec::new();
        while let Some(contact) = self.next().await? {
            contacts.push(contact);
        }
        Ok(contacts)
    }

    async fn fetch(&mut self, scope: &FolderScope, link: Option<&str>) -> Result<ContactPage, FetchError> {
        let page = self
            .cancel
            .run(self.store.list_contacts_page(scope, link), || FetchError::Cancelled)
            .await?;
        self.pages += 1;
        debug!(
            folder = scope.name(),
            contacts = page.contacts.len(),
            more = page.next_link.is_some(),
            "fetched contact page"
        );
        Ok(page)
    }

    fn absorb(&mut self, scope: FolderScope, page: ContactPage) {
        self.buffer.extend(dedupe_page(page.contacts));
        if let Some(link) = page.next_link {
            self.continuation = Some((scope, link));
        }
    }
}

/// Collapse repeated ids within one page; the later occurrence's fields win
/// and keep the position of the first.
fn dedupe_page(contacts: Vec<ContactSummary>) -> Vec<ContactSummary> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<ContactSummary> = Vec::with_capacity(contacts.len());
    for contact in contacts {
        match positions.get(&contact.id) {
            Some(&pos) => unique[pos] = contact,
            None => {
                positions.insert(contact.id.clone(), unique.len());
                unique.push(contact);
            }
        }
    }
    unique
}
