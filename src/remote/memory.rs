//! In-memory contact store used by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::cancel::CancelToken;
use crate::contact::{ContactFolder, ContactSummary, FolderScope};
use crate::error::{AuthError, DeleteError, FetchError};

use super::{ContactPage, ContactStore, Connector};

#[derive(Debug, Default)]
struct State {
    folders: Vec<ContactFolder>,
    /// Pages per scope key ("" for the root folder).
    pages: HashMap<String, Vec<Vec<ContactSummary>>>,
    deleted: Vec<(FolderScope, String)>,
    fail_delete: Option<String>,
    fail_folders: bool,
    fail_page: Option<(String, usize, u16)>,
    page_requests: usize,
}

/// Shared, cloneable fake. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

fn scope_key(scope: &FolderScope) -> String {
    match scope {
        FolderScope::Root => String::new(),
        FolderScope::Folder { id, .. } => id.clone(),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_folder(self, id: &str, name: &str) -> Self {
        self.lock().folders.push(ContactFolder {
            id: id.to_string(),
            display_name: name.to_string(),
        });
        self
    }

    /// Append a page to the root folder (`folder = None`) or a sub-folder.
    pub fn with_page(self, folder: Option<&str>, contacts: Vec<ContactSummary>) -> Self {
        let key = folder.unwrap_or_default().to_string();
        self.lock().pages.entry(key).or_default().push(contacts);
        self
    }

    pub fn fail_delete_of(self, id: &str) -> Self {
        self.lock().fail_delete = Some(id.to_string());
        self
    }

    pub fn fail_folders(self) -> Self {
        self.lock().fail_folders = true;
        self
    }

    /// Make the page at `index` of `folder` fail with a 503.
    pub fn fail_page(self, folder: Option<&str>, index: usize) -> Self {
        self.lock().fail_page = Some((folder.unwrap_or_default().to_string(), index, 503));
        self
    }

    /// Reject the bearer token once, when the page at `index` is requested.
    pub fn expire_token_at(self, folder: Option<&str>, index: usize) -> Self {
        self.lock().fail_page = Some((folder.unwrap_or_default().to_string(), index, 401));
        self
    }

    pub fn deleted(&self) -> Vec<(FolderScope, String)> {
        self.lock().deleted.clone()
    }

    pub fn page_requests(&self) -> usize {
        self.lock().page_requests
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

impl ContactStore for MemoryStore {
    async fn list_folders(&self) -> Result<Vec<ContactFolder>, FetchError> {
        let state = self.lock();
        if state.fail_folders {
            return Err(FetchError::Api {
                status: 503,
                code: "ServiceUnavailable".into(),
                message: "try later".into(),
            });
        }
        Ok(state.folders.clone())
    }

    async fn list_contacts_page(
        &self,
        scope: &FolderScope,
        continuation: Option<&str>,
    ) -> Result<ContactPage, FetchError> {
        let mut state = self.lock();
        state.page_requests += 1;

        let (key, index) = match continuation {
            Some(link) => {
                let (key, index) = link.rsplit_once('#').unwrap();
                (key.to_string(), index.parse::<usize>().unwrap())
            }
            None => (scope_key(scope), 0),
        };

        if let Some((_, _, status)) = state
            .fail_page
            .clone()
            .filter(|(k, i, _)| *k == key && *i == index)
        {
            if status == 401 {
                state.fail_page = None;
                return Err(FetchError::Api {
                    status,
                    code: "InvalidAuthenticationToken".into(),
                    message: "Access token has expired.".into(),
                });
            }
            return Err(FetchError::Api {
                status,
                code: "ServiceUnavailable".into(),
                message: "try later".into(),
            });
        }

        let pages = state.pages.get(&key).cloned().unwrap_or_default();
        let contacts = pages
            .get(index)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|mut c| {
                c.folder_name = scope.name().to_string();
                c
            })
            .collect();
        let next_link = (index + 1 < pages.len()).then(|| format!("{}#{}", key, index + 1));
        Ok(ContactPage { contacts, next_link })
    }

    async fn delete_contact(&self, scope: &FolderScope, id: &str) -> Result<(), DeleteError> {
        let mut state = self.lock();
        if state.fail_delete.as_deref() == Some(id) {
            return Err(DeleteError::Api {
                status: 500,
                code: "ErrorInternalServerError".into(),
                message: "boom".into(),
            });
        }
        state.deleted.push((scope.clone(), id.to_string()));
        Ok(())
    }
}

/// Connector handing out clones of one `MemoryStore`.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    pub store: MemoryStore,
    connects: Arc<AtomicUsize>,
    reject: bool,
}

impl MemoryConnector {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            connects: Arc::new(AtomicUsize::new(0)),
            reject: false,
        }
    }

    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    type Store = MemoryStore;

    async fn connect(&self, _cancel: &CancelToken) -> Result<MemoryStore, AuthError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err(AuthError::Denied("access_denied".into()));
        }
        Ok(self.store.clone())
    }
}
