//! Contact summaries and folder descriptors.

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Folder name reported for contacts living in the default folder.
pub const ROOT_FOLDER_NAME: &str = "Contacts";

/// Flattened, comparison-friendly projection of a remote contact.
///
/// Two summaries describe the same contact iff their `id`s match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactSummary {
    pub id: String,
    #[serde(default)]
    pub parent_folder_id: Option<String>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email_addresses: Vec<String>,
    #[serde(default)]
    pub phone_numbers: Vec<String>,
    #[serde(default)]
    pub surname: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub folder_name: String,
}

impl ContactSummary {
    /// Minimal summary, mostly useful for tests and fixtures.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_folder_id: None,
            display_name: display_name.into(),
            email_addresses: Vec::new(),
            phone_numbers: Vec::new(),
            surname: None,
            given_name: None,
            categories: Vec::new(),
            created_at: None,
            updated_at: None,
            folder_name: ROOT_FOLDER_NAME.to_string(),
        }
    }

    /// One-line description used by the CLI and the member pane.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if !self.email_addresses.is_empty() {
            parts.push(self.email_addresses.join(", "));
        }
        if !self.phone_numbers.is_empty() {
            parts.push(self.phone_numbers.join(", "));
        }
        parts.push(format!("[{}]", self.folder_name));
        if let Some(updated) = self.updated_date() {
            parts.push(format!("updated {}", updated));
        }
        parts.join("  ")
    }

    /// Last modification date as `YYYY-MM-DD`.
    pub fn updated_date(&self) -> Option<String> {
        self.updated_at.and_then(format_date)
    }
}

fn format_date(ts: OffsetDateTime) -> Option<String> {
    let format = time::macros::format_description!("[year]-[month]-[day]");
    ts.format(&format).ok()
}

/// A contact sub-folder of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactFolder {
    pub id: String,
    pub display_name: String,
}

/// Which collection an operation targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderScope {
    /// The default contacts folder (`/me/contacts`).
    Root,
    /// A named sub-folder (`/me/contactFolders/{id}/contacts`).
    Folder { id: String, name: String },
}

impl FolderScope {
    pub fn name(&self) -> &str {
        match self {
            FolderScope::Root => ROOT_FOLDER_NAME,
            FolderScope::Folder { name, .. } => name,
        }
    }

    /// Resolve the scope owning a contact by matching its parent folder id
    /// against the known sub-folders. Anything unmatched lives in the root.
    pub fn for_contact(contact: &ContactSummary, folders: &[ContactFolder]) -> Self {
        contact
            .parent_folder_id
            .as_deref()
            .and_then(|parent| folders.iter().find(|f| f.id == parent))
            .map(|folder| FolderScope::Folder {
                id: folder.id.clone(),
                name: folder.display_name.clone(),
            })
            .unwrap_or(FolderScope::Root)
    }
}

impl From<&ContactFolder> for FolderScope {
    fn from(folder: &ContactFolder) -> Self {
        FolderScope::Folder {
            id: folder.id.clone(),
            name: folder.display_name.clone(),
        }
    }
}

// =============================================================================
// Graph wire model
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphContact {
    pub id: String,
    #[serde(default)]
    pub parent_folder_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
    #[serde(default)]
    pub email_addresses: Vec<GraphEmailAddress>,
    #[serde(default)]
    pub business_phones: Vec<String>,
    #[serde(default)]
    pub home_phones: Vec<String>,
    #[serde(default)]
    pub mobile_phone: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub created_date_time: Option<String>,
    #[serde(default)]
    pub last_modified_date_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphEmailAddress {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphContactFolder {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl From<GraphContactFolder> for ContactFolder {
    fn from(folder: GraphContactFolder) -> Self {
        let display_name = folder
            .display_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| folder.id.clone());
        Self {
            id: folder.id,
            display_name,
        }
    }
}

impl GraphContact {
    /// Flatten a Graph contact into a summary attributed to `folder_name`.
    pub fn into_summary(self, folder_name: &str) -> ContactSummary {
        let email_addresses = self
            .email_addresses
            .into_iter()
            .filter_map(|email| email.address)
            .map(|address| address.trim().to_string())
            .filter(|address| !address.is_empty())
            .collect();

        let phone_numbers = self
            .business_phones
            .into_iter()
            .chain(self.home_phones)
            .chain(self.mobile_phone)
            .map(|phone| phone.trim().to_string())
            .filter(|phone| !phone.is_empty())
            .collect();

        ContactSummary {
            id: self.id,
            parent_folder_id: self.parent_folder_id,
            display_name: self.display_name.unwrap_or_default(),
            email_addresses,
            phone_numbers,
            surname: non_empty(self.surname),
            given_name: non_empty(self.given_name),
            categories: self.categories,
            created_at: parse_timestamp(self.created_date_time.as_deref()),
            updated_at: parse_timestamp(self.last_modified_date_time.as_deref()),
            folder_name: folder_name.to_string(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_timestamp(value: Option<&str>) -> Option<OffsetDateTime> {
    value.and_then(|raw| OffsetDateTime::parse(raw, &Rfc3339).ok())
}
