//! Persistent credential cache.
//!
//! One JSON file holding the last token set. The parent directory is created
//! with mode 0700 and the file with mode 0600 on unix; writes go through a
//! temporary file and a rename.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AuthError;

/// Access tokens expiring sooner than this are not reused.
pub const EXPIRY_MARGIN_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds) at which the access token expires.
    pub expires_at: i64,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub account: Option<String>,
    pub client_id: String,
    pub tenant: String,
}

impl CachedToken {
    /// Whether the access token stays valid for at least the expiry margin.
    pub fn is_fresh(&self, now: i64) -> bool {
        self.expires_at - now > EXPIRY_MARGIN_SECS
    }

    /// Whether the token was issued to the given app registration and tenant.
    pub fn issued_for(&self, client_id: &str, tenant: &str) -> bool {
        self.client_id == client_id && self.tenant.eq_ignore_ascii_case(tenant)
    }
}

#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached token. A missing or unreadable cache is `None`.
    pub fn load(&self) -> Result<Option<CachedToken>, AuthError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        match serde_json::from_str(&content) {
            Ok(token) => Ok(Some(token)),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "ignoring corrupt token cache");
                Ok(None)
            }
        }
    }

    pub fn save(&self, token: &CachedToken) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    fs::set_permissions(parent, fs::Permissions::from_mode(0o700))?;
                }
            }
        }

        let content = serde_json::to_string_pretty(token)?;
        let tmp = self.temp_path();
        {
            let mut file = create_private(&tmp)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        debug!(path = %self.path.display(), "saved token cache");
        Ok(())
    }

    /// Remove the cache file; returns `true` if there was one.
    pub fn delete(&self) -> Result<bool, AuthError> {
        if !self.path.exists() {
            return Ok(false);
        }
        fs::remove_file(&self.path)?;
        Ok(true)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(unix)]
fn create_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> std::io::Result<fs::File> {
    fs::File::create(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn token(expires_at: i64) -> CachedToken {
        CachedToken {
            access_token: "access".into(),
            refresh_token: Some("refresh".into()),
            expires_at,
            scopes: vec!["Contacts.ReadWrite".into()],
            account: Some("jo@example.com".into()),
            client_id: "client".into(),
            tenant: "consumers".into(),
        }
    }

    #[test]
    fn test_save_load_delete() {
        let temp = TempDir::new().unwrap();
        let cache = TokenCache::new(temp.path().join("nested/dir/token.json"));

        assert_eq!(cache.load().unwrap(), None);
        cache.save(&token(1_000)).unwrap();
        assert_eq!(cache.load().unwrap(), Some(token(1_000)));
        assert!(!temp.path().join("nested/dir/token.json.tmp").exists());

        assert!(cache.delete().unwrap());
        assert!(!cache.delete().unwrap());
        assert_eq!(cache.load().unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("cache");
        let cache = TokenCache::new(dir.join("token.json"));
        cache.save(&token(1_000)).unwrap();

        let file_mode = fs::metadata(cache.path()).unwrap().permissions().mode() & 0o777;
        let dir_mode = fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn test_corrupt_cache_is_ignored() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("token.json");
        fs::write(&path, "{not json").unwrap();

        assert_eq!(TokenCache::new(path).load().unwrap(), None);
    }

    #[test]
    fn test_freshness_margin() {
        let t = token(10_000);
        assert!(t.is_fresh(10_000 - EXPIRY_MARGIN_SECS - 1));
        assert!(!t.is_fresh(10_000 - EXPIRY_MARGIN_SECS));
        assert!(!t.is_fresh(10_001));
    }

    #[test]
    fn test_issued_for() {
        let t = token(0);
        assert!(t.issued_for("client", "Consumers"));
        assert!(!t.issued_for("other", "consumers"));
        assert!(!t.issued_for("client", "organizations"));
    }
}
