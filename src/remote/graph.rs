//! Microsoft Graph contact store over reqwest.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use crate::auth::{AccessToken, IdentityProvider};
use crate::cancel::CancelToken;
use crate::config::GraphConfig;
use crate::contact::{ContactFolder, FolderScope, GraphContact, GraphContactFolder};
use crate::error::{AuthError, DeleteError, FetchError};

use super::{ContactPage, ContactStore, Connector};

/// Fields requested for each contact.
const CONTACT_FIELDS: &str = "id,parentFolderId,displayName,emailAddresses,businessPhones,\
homePhones,mobilePhone,surname,givenName,categories,createdDateTime,lastModifiedDateTime";

/// A page of an OData collection.
#[derive(Debug, Deserialize)]
struct ODataPage<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Decode Graph's `{"error": {"code", "message"}}` body into (status, code, message).
fn decode_error(status: StatusCode, body: &str) -> (u16, String, String) {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => (status.as_u16(), envelope.error.code, envelope.error.message),
        Err(_) => (
            status.as_u16(),
            status
                .canonical_reason()
                .unwrap_or("UnknownError")
                .replace(' ', ""),
            body.chars().take(200).collect(),
        ),
    }
}

/// Authenticated Graph client bound to one bearer token.
#[derive(Debug, Clone)]
pub struct GraphClient {
    http: reqwest::Client,
    endpoint: Url,
    page_size: u32,
    token: AccessToken,
}

impl GraphClient {
    pub fn new(http: reqwest::Client, config: &GraphConfig, token: AccessToken) -> Self {
        Self {
            http,
            endpoint: config.endpoint.clone(),
            page_size: config.page_size,
            token,
        }
    }

    pub fn account(&self) -> Option<&str> {
        self.token.account()
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Ok(mut value) = HeaderValue::from_str(&self.token.authorization_header()) {
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        headers
    }

    /// `{endpoint}/seg/seg/...`
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn folders_url(&self) -> Url {
        self.url(&["me", "contactFolders"])
    }

    fn contacts_url(&self, scope: &FolderScope) -> Url {
        let mut url = match scope {
            FolderScope::Root => self.url(&["me", "contacts"]),
            FolderScope::Folder { id, .. } => self.url(&["me", "contactFolders", id, "contacts"]),
        };
        url.query_pairs_mut()
            .append_pair("$top", &self.page_size.to_string())
            .append_pair("$select", CONTACT_FIELDS);
        url
    }

    fn contact_url(&self, scope: &FolderScope, id: &str) -> Url {
        match scope {
            FolderScope::Root => self.url(&["me", "contacts", id]),
            FolderScope::Folder { id: folder, .. } => {
                self.url(&["me", "contactFolders", folder, "contacts", id])
            }
        }
    }

    async fn get_page<T: DeserializeOwned>(&self, url: &str) -> Result<ODataPage<T>, FetchError> {
        let response = self.http.get(url).headers(self.headers()).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let (status, code, message) = decode_error(status, &body);
            return Err(FetchError::Api {
                status,
                code,
                message,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

impl ContactStore for GraphClient {
    async fn list_folders(&self) -> Result<Vec<ContactFolder>, FetchError> {
        let mut folders = Vec::new();
        let mut next = Some(self.folders_url().to_string());
        while let Some(url) = next {
            let page: ODataPage<GraphContactFolder> = self.get_page(&url).await?;
            folders.extend(page.value.into_iter().map(ContactFolder::from));
            next = page.next_link;
        }
        Ok(folders)
    }

    async fn list_contacts_page(
        &self,
        scope: &FolderScope,
        continuation: Option<&str>,
    ) -> Result<ContactPage, FetchError> {
        let url = match continuation {
            Some(link) => link.to_string(),
            None => self.contacts_url(scope).to_string(),
        };
        debug!(folder = scope.name(), %url, "requesting contact page");
        let page: ODataPage<GraphContact> = self.get_page(&url).await?;
        Ok(ContactPage {
            contacts: page
                .value
                .into_iter()
                .map(|c| c.into_summary(scope.name()))
                .collect(),
            next_link: page.next_link,
        })
    }

    async fn delete_contact(&self, scope: &FolderScope, id: &str) -> Result<(), DeleteError> {
        let url = self.contact_url(scope, id);
        let response = self.http.delete(url).headers(self.headers()).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND {
            debug!(id, "contact already gone");
            return Ok(());
        }
        let body = response.text().await?;
        let (status, code, message) = decode_error(status, &body);
        Err(DeleteError::Api {
            status,
            code,
            message,
        })
    }
}

/// Signs in through the identity provider and hands out `GraphClient`s.
#[derive(Debug, Clone)]
pub struct GraphConnector {
    identity: IdentityProvider,
    config: GraphConfig,
    http: reqwest::Client,
}

impl GraphConnector {
    pub fn new(identity: IdentityProvider, config: GraphConfig, http: reqwest::Client) -> Self {
        Self {
            identity,
            config,
            http,
        }
    }

    pub fn identity(&self) -> &IdentityProvider {
        &self.identity
    }
}

impl Connector for GraphConnector {
    type Store = GraphClient;

    async fn connect(&self, cancel: &CancelToken) -> Result<GraphClient, AuthError> {
        let token = self.identity.acquire_token(cancel).await?;
        info!(
            account = token.account().unwrap_or("unknown"),
            endpoint = %self.config.endpoint,
            "connected to Microsoft Graph"
        );
        Ok(GraphClient::new(self.http.clone(), &self.config, token))
    }
}
