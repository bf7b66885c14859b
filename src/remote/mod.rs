//! Remote contact store abstraction and the Microsoft Graph implementation.
//!
//! This module provides:
//! - `ContactStore` trait for listing folders, paging through contacts and
//!   deleting a contact
//! - `Connector` trait for turning configuration plus a credential into a
//!   live store
//! - `GraphConnector` / `GraphClient` talking to Microsoft Graph over reqwest

pub mod graph;

#[cfg(test)]
pub mod memory;

use crate::cancel::CancelToken;
use crate::contact::{ContactFolder, ContactSummary, FolderScope};
use crate::error::{AuthError, DeleteError, FetchError};

/// One page of contacts from a single folder scope.
#[derive(Debug, Clone, Default)]
pub struct ContactPage {
    pub contacts: Vec<ContactSummary>,
    /// Opaque continuation link for the next page, if any.
    pub next_link: Option<String>,
}

/// Trait for remote contact store implementations
#[allow(async_fn_in_trait)]
pub trait ContactStore {
    /// List every contact sub-folder of the signed-in user
    async fn list_folders(&self) -> Result<Vec<ContactFolder>, FetchError>;

    /// Fetch one page of contacts. With `continuation` set, the scope only
    /// labels the returned summaries and the link decides what is fetched.
    async fn list_contacts_page(
        &self,
        scope: &FolderScope,
        continuation: Option<&str>,
    ) -> Result<ContactPage, FetchError>;

    /// Delete a contact from the given folder scope
    async fn delete_contact(&self, scope: &FolderScope, id: &str) -> Result<(), DeleteError>;
}

/// Produces a live, authenticated store.
#[allow(async_fn_in_trait)]
pub trait Connector {
    type Store: ContactStore;

    async fn connect(&self, cancel: &CancelToken) -> Result<Self::Store, AuthError>;
}
