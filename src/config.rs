use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use directories::BaseDirs;
use reqwest::Url;
use serde::de::Deserializer;
use serde::Deserialize;

use crate::grouping::GroupingStrategy;

const CONFIG_FILE_NAME: &str = "config.toml";
const TOKEN_FILE_NAME: &str = "token.json";
const LOG_FILE_NAME: &str = "graph-dedup.log";
pub const APP_NAME: &str = "graph-dedup";

const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com/";
const DEFAULT_TENANT: &str = "consumers";
const DEFAULT_GRAPH_ENDPOINT: &str = "https://graph.microsoft.com/v1.0";
const DEFAULT_PAGE_SIZE: u32 = 100;
const MAX_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Clone)]
pub struct Config {
    /// Path the configuration was read from (may not exist when defaults are used)
    pub config_path: PathBuf,
    pub auth: AuthConfig,
    pub graph: GraphConfig,
    pub grouping: GroupingConfig,
    pub keys: Keys,
    pub ui: UiConfig,
}

// =============================================================================
// Sign-in Configuration
// =============================================================================

/// Identity provider settings
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Application (client) id of the app registration
    pub client_id: Option<String>,
    /// Tenant segment: "consumers", "organizations", "common" or a tenant id
    pub tenant: String,
    /// Authority base URL, always ending with '/'
    pub authority: Url,
    /// Scopes requested for the contact store
    pub scopes: Vec<String>,
    /// Loopback port for the sign-in redirect (0 = pick a free port)
    pub redirect_port: u16,
    /// Whether an interactive browser sign-in may be started
    pub interactive: bool,
    /// Location of the persistent credential cache
    pub token_cache: PathBuf,
}

impl AuthConfig {
    /// The client id, or an error explaining how to configure it.
    pub fn require_client_id(&self) -> Result<&str> {
        self.client_id
            .as_deref()
            .ok_or_else(|| anyhow!("auth.client_id must be set in the configuration file to sign in"))
    }

    pub fn authorize_endpoint(&self) -> Result<Url> {
        self.oauth_endpoint("authorize")
    }

    pub fn token_endpoint(&self) -> Result<Url> {
        self.oauth_endpoint("token")
    }

    fn oauth_endpoint(&self, leaf: &str) -> Result<Url> {
        self.authority
            .join(&format!("{}/oauth2/v2.0/{}", self.tenant, leaf))
            .with_context(|| format!("invalid authority {}", self.authority))
    }
}

fn default_scopes() -> Vec<String> {
    vec!["User.Read".to_string(), "Contacts.ReadWrite".to_string()]
}

// =============================================================================
// Graph Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Service root, e.g. https://graph.microsoft.com/v1.0
    pub endpoint: Url,
    /// Contacts requested per page ($top)
    pub page_size: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct GroupingConfig {
    pub strategy: GroupingStrategy,
    /// Hide groups with a single member
    pub duplicates_only: bool,
}

// =============================================================================
// UI Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub colors: UiColors,
}

#[derive(Debug, Clone)]
pub struct UiColors {
    pub border: RgbColor,
    pub selection_bg: RgbColor,
    pub selection_fg: RgbColor,
    pub separator: RgbColor,
    pub status_fg: RgbColor,
    pub status_bg: RgbColor,
    /// Contacts marked for removal
    pub marked: RgbColor,
    /// Disabled action buttons
    pub disabled: RgbColor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

// =============================================================================
// Key Bindings - Context-aware with multiple bindings per action
// =============================================================================

/// All key bindings organized by context
#[derive(Debug, Clone, Default)]
pub struct Keys {
    /// Global keys (work whenever no modal is open)
    pub global: GlobalKeys,
    /// Keys for moving through groups and members
    pub navigation: NavigationKeys,
    /// Keys for modal dialogs
    pub modal: ModalKeys,
}

#[derive(Debug, Clone)]
pub struct GlobalKeys {
    pub quit: Vec<String>,
    pub help: Vec<String>,
    pub refresh: Vec<String>,
    pub confirm_removal: Vec<String>,
    pub cancel: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NavigationKeys {
    pub next: Vec<String>,
    pub prev: Vec<String>,
    pub page_down: Vec<String>,
    pub page_up: Vec<String>,
    pub focus_next: Vec<String>,
    pub focus_prev: Vec<String>,
    pub toggle_mark: Vec<String>,
    pub mark_all_but_first: Vec<String>,
    pub clear_marks: Vec<String>,
    pub toggle_filter: Vec<String>,
    pub cycle_strategy: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ModalKeys {
    pub cancel: Vec<String>,
    pub confirm: Vec<String>,
    pub next: Vec<String>,
    pub prev: Vec<String>,
}

impl Default for GlobalKeys {
    fn default() -> Self {
        Self {
            quit: vec!["q".into()],
            help: vec!["F1".into(), "?".into()],
            refresh: vec!["F5".into(), "r".into()],
            confirm_removal: vec!["F8".into(), "d".into()],
            cancel: vec!["Escape".into()],
        }
    }
}

impl Default for NavigationKeys {
    fn default() -> Self {
        Self {
            next: vec!["j".into(), "Down".into()],
            prev: vec!["k".into(), "Up".into()],
            page_down: vec!["PageDown".into()],
            page_up: vec!["PageUp".into()],
            focus_next: vec!["Tab".into(), "l".into(), "Right".into()],
            focus_prev: vec!["Backtab".into(), "h".into(), "Left".into()],
            toggle_mark: vec!["Space".into()],
            mark_all_but_first: vec!["a".into()],
            clear_marks: vec!["c".into()],
            toggle_filter: vec!["f".into()],
            cycle_strategy: vec!["s".into()],
        }
    }
}

impl Default for ModalKeys {
    fn default() -> Self {
        Self {
            cancel: vec!["Escape".into(), "q".into()],
            confirm: vec!["Enter".into(), "y".into()],
            next: vec!["j".into(), "Down".into()],
            prev: vec!["k".into(), "Up".into()],
        }
    }
}

// =============================================================================
// Paths
// =============================================================================

fn config_root() -> Result<PathBuf> {
    let base = BaseDirs::new().context("unable to determine base directories")?;
    Ok(base.config_dir().join(APP_NAME))
}

fn data_root() -> Result<PathBuf> {
    let base = BaseDirs::new().context("unable to determine base directories")?;
    Ok(base.data_local_dir().join(APP_NAME))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_root()?.join(CONFIG_FILE_NAME))
}

pub fn default_token_cache_path() -> Result<PathBuf> {
    Ok(data_root()?.join(TOKEN_FILE_NAME))
}

pub fn log_file_path() -> Result<PathBuf> {
    Ok(data_root()?.join(LOG_FILE_NAME))
}

/// Expand ~ to home directory in paths
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = home::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

// =============================================================================
// Loading
// =============================================================================

/// Load configuration from `explicit` or the default location.
///
/// An explicitly given file must exist; a missing default file means
/// built-in defaults.
pub fn load(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(path) => expand_tilde(path),
        None => config_path()?,
    };

    if !path.exists() {
        if explicit.is_some() {
            bail!("configuration file not found at {}", path.display());
        }
        return Config::from_file(ConfigFile::default(), path);
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read configuration file at {}", path.display()))?;
    parse(&raw, path)
}

/// Parse configuration text; `path` is recorded for messages.
pub fn parse(raw: &str, path: PathBuf) -> Result<Config> {
    let value: toml::Value = toml::from_str(raw)
        .with_context(|| format!("failed to parse {} as TOML", path.display()))?;

    warn_unknown_keys(&value);

    let cfg_file: ConfigFile = value
        .try_into()
        .with_context(|| format!("failed to deserialize config from {}", path.display()))?;

    Config::from_file(cfg_file, path)
}

impl Config {
    fn from_file(file: ConfigFile, config_path: PathBuf) -> Result<Self> {
        let auth = file
            .auth
            .into_config()
            .context("failed to parse auth configuration")?;
        let graph = file
            .graph
            .into_config()
            .context("failed to parse graph configuration")?;
        let grouping = file.grouping.into_config()?;

        let keys: Keys = file.keys.into();
        validate_key_bindings(&keys)?;

        Ok(Config {
            config_path,
            auth,
            graph,
            grouping,
            keys,
            ui: file.ui.into(),
        })
    }
}

// =============================================================================
// Unknown key warnings
// =============================================================================

fn warn_unknown_keys(value: &toml::Value) {
    let Some(table) = value.as_table() else {
        return;
    };

    let known = HashSet::from(["auth", "graph", "grouping", "keys", "ui"]);

    for key in table.keys() {
        if !known.contains(key.as_str()) {
            eprintln!("warning: unknown configuration key `{}`", key);
        }
    }

    if let Some(v) = table.get("auth") {
        warn_unknown_in_section(
            v,
            "auth",
            &[
                "client_id",
                "tenant",
                "authority",
                "scopes",
                "redirect_port",
                "interactive",
                "token_cache",
            ],
        );
    }
    if let Some(v) = table.get("graph") {
        warn_unknown_in_section(v, "graph", &["endpoint", "page_size"]);
    }
    if let Some(v) = table.get("grouping") {
        warn_unknown_in_section(v, "grouping", &["strategy", "duplicates_only"]);
    }
    if let Some(v) = table.get("ui") {
        warn_unknown_in_section(v, "ui", &["colors"]);
        if let Some(colors) = v.get("colors") {
            warn_unknown_in_section(
                colors,
                "ui.colors",
                &[
                    "border",
                    "selection_bg",
                    "selection_fg",
                    "separator",
                    "status_fg",
                    "status_bg",
                    "marked",
                    "disabled",
                ],
            );
        }
    }
    if let Some(v) = table.get("keys") {
        warn_unknown_keys_section(v);
    }
}

fn warn_unknown_keys_section(value: &toml::Value) {
    let Some(table) = value.as_table() else {
        return;
    };

    let known_contexts = HashSet::from(["global", "navigation", "modal"]);
    for key in table.keys() {
        if !known_contexts.contains(key.as_str()) {
            eprintln!("warning: unknown keys.* context `{}`", key);
        }
    }

    if let Some(v) = table.get("global") {
        warn_unknown_in_section(
            v,
            "keys.global",
            &["quit", "help", "refresh", "confirm_removal", "cancel"],
        );
    }
    if let Some(v) = table.get("navigation") {
        warn_unknown_in_section(
            v,
            "keys.navigation",
            &[
                "next",
                "prev",
                "page_down",
                "page_up",
                "focus_next",
                "focus_prev",
                "toggle_mark",
                "mark_all_but_first",
                "clear_marks",
                "toggle_filter",
                "cycle_strategy",
            ],
        );
    }
    if let Some(v) = table.get("modal") {
        warn_unknown_in_section(v, "keys.modal", &["cancel", "confirm", "next", "prev"]);
    }
}

fn warn_unknown_in_section(value: &toml::Value, context: &str, known: &[&str]) {
    let Some(table) = value.as_table() else {
        return;
    };
    let known_set: HashSet<&str> = known.iter().copied().collect();
    for key in table.keys() {
        if !known_set.contains(key.as_str()) {
            eprintln!("warning: unknown {}.* entry `{}`", context, key);
        }
    }
}

// =============================================================================
// Config file structure
// =============================================================================

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    auth: AuthFile,
    graph: GraphFile,
    grouping: GroupingFile,
    keys: KeysFile,
    ui: UiFile,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct AuthFile {
    client_id: Option<String>,
    tenant: Option<String>,
    authority: Option<String>,
    scopes: Option<Vec<String>>,
    redirect_port: Option<u16>,
    interactive: Option<bool>,
    token_cache: Option<PathBuf>,
}

impl AuthFile {
    fn into_config(self) -> Result<AuthConfig> {
        let client_id = self
            .client_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        let tenant = self
            .tenant
            .map(|t| t.trim().trim_matches('/').to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TENANT.to_string());

        let mut authority_raw = self
            .authority
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| DEFAULT_AUTHORITY.to_string());
        if !authority_raw.ends_with('/') {
            authority_raw.push('/');
        }
        let authority = parse_http_url(&authority_raw, "auth.authority")?;

        let scopes: Vec<String> = self
            .scopes
            .unwrap_or_else(default_scopes)
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if scopes.is_empty() {
            bail!("auth.scopes must contain at least one scope");
        }

        let token_cache = match self.token_cache {
            Some(path) => expand_tilde(&path),
            None => default_token_cache_path()?,
        };

        Ok(AuthConfig {
            client_id,
            tenant,
            authority,
            scopes,
            redirect_port: self.redirect_port.unwrap_or(0),
            interactive: self.interactive.unwrap_or(true),
            token_cache,
        })
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct GraphFile {
    endpoint: Option<String>,
    page_size: Option<u32>,
}

impl GraphFile {
    fn into_config(self) -> Result<GraphConfig> {
        let raw = self
            .endpoint
            .map(|e| e.trim().trim_end_matches('/').to_string())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| DEFAULT_GRAPH_ENDPOINT.to_string());
        let endpoint = parse_http_url(&raw, "graph.endpoint")?;

        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            bail!(
                "graph.page_size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE,
                page_size
            );
        }

        Ok(GraphConfig {
            endpoint,
            page_size,
        })
    }
}

fn parse_http_url(raw: &str, key: &str) -> Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("{} is not a valid URL: {}", key, raw))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        bail!("{} must be an http(s) URL, got {}", key, raw);
    }
    Ok(url)
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct GroupingFile {
    strategy: Option<String>,
    duplicates_only: bool,
}

impl GroupingFile {
    fn into_config(self) -> Result<GroupingConfig> {
        let strategy = match self.strategy.as_deref() {
            None => GroupingStrategy::default(),
            Some(raw) => GroupingStrategy::from_str(raw).ok_or_else(|| {
                anyhow!(
                    "invalid grouping.strategy '{}', expected one of: display-name, first-given-name",
                    raw
                )
            })?,
        };
        Ok(GroupingConfig {
            strategy,
            duplicates_only: self.duplicates_only,
        })
    }
}

// =============================================================================
// Serde deserialization types (support both single string and array)
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum KeyBinding {
    Single(String),
    Multiple(Vec<String>),
}

impl KeyBinding {
    fn into_vec(self) -> Vec<String> {
        match self {
            KeyBinding::Single(s) => vec![s],
            KeyBinding::Multiple(v) => v,
        }
    }
}

impl Default for KeyBinding {
    fn default() -> Self {
        KeyBinding::Multiple(vec![])
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct KeysFile {
    global: GlobalKeysFile,
    navigation: NavigationKeysFile,
    modal: ModalKeysFile,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GlobalKeysFile {
    quit: KeyBinding,
    help: KeyBinding,
    refresh: KeyBinding,
    confirm_removal: KeyBinding,
    cancel: KeyBinding,
}

impl Default for GlobalKeysFile {
    fn default() -> Self {
        let defaults = GlobalKeys::default();
        Self {
            quit: KeyBinding::Multiple(defaults.quit),
            help: KeyBinding::Multiple(defaults.help),
            refresh: KeyBinding::Multiple(defaults.refresh),
            confirm_removal: KeyBinding::Multiple(defaults.confirm_removal),
            cancel: KeyBinding::Multiple(defaults.cancel),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct NavigationKeysFile {
    next: KeyBinding,
    prev: KeyBinding,
    page_down: KeyBinding,
    page_up: KeyBinding,
    focus_next: KeyBinding,
    focus_prev: KeyBinding,
    toggle_mark: KeyBinding,
    mark_all_but_first: KeyBinding,
    clear_marks: KeyBinding,
    toggle_filter: KeyBinding,
    cycle_strategy: KeyBinding,
}

impl Default for NavigationKeysFile {
    fn default() -> Self {
        let defaults = NavigationKeys::default();
        Self {
            next: KeyBinding::Multiple(defaults.next),
            prev: KeyBinding::Multiple(defaults.prev),
            page_down: KeyBinding::Multiple(defaults.page_down),
            page_up: KeyBinding::Multiple(defaults.page_up),
            focus_next: KeyBinding::Multiple(defaults.focus_next),
            focus_prev: KeyBinding::Multiple(defaults.focus_prev),
            toggle_mark: KeyBinding::Multiple(defaults.toggle_mark),
            mark_all_but_first: KeyBinding::Multiple(defaults.mark_all_but_first),
            clear_marks: KeyBinding::Multiple(defaults.clear_marks),
            toggle_filter: KeyBinding::Multiple(defaults.toggle_filter),
            cycle_strategy: KeyBinding::Multiple(defaults.cycle_strategy),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ModalKeysFile {
    cancel: KeyBinding,
    confirm: KeyBinding,
    next: KeyBinding,
    prev: KeyBinding,
}

impl Default for ModalKeysFile {
    fn default() -> Self {
        let defaults = ModalKeys::default();
        Self {
            cancel: KeyBinding::Multiple(defaults.cancel),
            confirm: KeyBinding::Multiple(defaults.confirm),
            next: KeyBinding::Multiple(defaults.next),
            prev: KeyBinding::Multiple(defaults.prev),
        }
    }
}

impl From<KeysFile> for Keys {
    fn from(file: KeysFile) -> Self {
        Self {
            global: GlobalKeys {
                quit: file.global.quit.into_vec(),
                help: file.global.help.into_vec(),
                refresh: file.global.refresh.into_vec(),
                confirm_removal: file.global.confirm_removal.into_vec(),
                cancel: file.global.cancel.into_vec(),
            },
            navigation: NavigationKeys {
                next: file.navigation.next.into_vec(),
                prev: file.navigation.prev.into_vec(),
                page_down: file.navigation.page_down.into_vec(),
                page_up: file.navigation.page_up.into_vec(),
                focus_next: file.navigation.focus_next.into_vec(),
                focus_prev: file.navigation.focus_prev.into_vec(),
                toggle_mark: file.navigation.toggle_mark.into_vec(),
                mark_all_but_first: file.navigation.mark_all_but_first.into_vec(),
                clear_marks: file.navigation.clear_marks.into_vec(),
                toggle_filter: file.navigation.toggle_filter.into_vec(),
                cycle_strategy: file.navigation.cycle_strategy.into_vec(),
            },
            modal: ModalKeys {
                cancel: file.modal.cancel.into_vec(),
                confirm: file.modal.confirm.into_vec(),
                next: file.modal.next.into_vec(),
                prev: file.modal.prev.into_vec(),
            },
        }
    }
}

// =============================================================================
// Key binding validation
// =============================================================================

/// Normalize a key binding string to a canonical form for collision detection.
/// Single characters preserve case (since 'M' means Shift+m, different from 'm').
/// Multi-character key names are case-insensitive (Enter, ENTER, enter are the same).
fn normalize_binding(binding: &str) -> String {
    let trimmed = binding.trim();
    if trimmed.chars().count() == 1 {
        trimmed.to_string()
    } else {
        match trimmed.to_ascii_lowercase().as_str() {
            "esc" => "escape".to_string(),
            "shift+tab" => "backtab".to_string(),
            "page_up" => "pageup".to_string(),
            "page_down" => "pagedown".to_string(),
            other => other.to_string(),
        }
    }
}

/// Check for collisions within a single context
fn check_context_collisions(bindings: &[(&str, &[String])], context_name: &str) -> Result<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();

    for (action_name, keys) in bindings {
        for key in *keys {
            let normalized = normalize_binding(key);
            if normalized.is_empty() {
                continue;
            }
            if let Some(existing_action) = seen.get(&normalized) {
                bail!(
                    "key binding collision in [keys.{}]: '{}' is bound to both '{}' and '{}'",
                    context_name,
                    key,
                    existing_action,
                    action_name
                );
            }
            seen.insert(normalized, action_name);
        }
    }

    Ok(())
}

/// Validate key bindings for collisions. Global and navigation keys are
/// live at the same time, so they are checked as one context.
fn validate_key_bindings(keys: &Keys) -> Result<()> {
    check_context_collisions(
        &[
            ("quit", &keys.global.quit),
            ("help", &keys.global.help),
            ("refresh", &keys.global.refresh),
            ("confirm_removal", &keys.global.confirm_removal),
            ("cancel", &keys.global.cancel),
            ("next", &keys.navigation.next),
            ("prev", &keys.navigation.prev),
            ("page_down", &keys.navigation.page_down),
            ("page_up", &keys.navigation.page_up),
            ("focus_next", &keys.navigation.focus_next),
            ("focus_prev", &keys.navigation.focus_prev),
            ("toggle_mark", &keys.navigation.toggle_mark),
            ("mark_all_but_first", &keys.navigation.mark_all_but_first),
            ("clear_marks", &keys.navigation.clear_marks),
            ("toggle_filter", &keys.navigation.toggle_filter),
            ("cycle_strategy", &keys.navigation.cycle_strategy),
        ],
        "global/navigation",
    )?;

    check_context_collisions(
        &[
            ("cancel", &keys.modal.cancel),
            ("confirm", &keys.modal.confirm),
            ("next", &keys.modal.next),
            ("prev", &keys.modal.prev),
        ],
        "modal",
    )?;

    Ok(())
}

// =============================================================================
// UI file structure
// =============================================================================

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct UiFile {
    colors: UiColorsFile,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct UiColorsFile {
    border: RgbColor,
    selection_bg: RgbColor,
    selection_fg: RgbColor,
    separator: RgbColor,
    status_fg: RgbColor,
    status_bg: RgbColor,
    marked: RgbColor,
    disabled: RgbColor,
}

impl Default for UiColorsFile {
    fn default() -> Self {
        Self {
            border: RgbColor::new(255, 165, 0),
            selection_bg: RgbColor::new(255, 165, 0),
            selection_fg: RgbColor::new(0, 0, 0),
            separator: RgbColor::new(255, 165, 0),
            status_fg: RgbColor::new(255, 165, 0),
            status_bg: RgbColor::new(0, 0, 0),
            marked: RgbColor::new(220, 50, 47),
            disabled: RgbColor::new(110, 110, 110),
        }
    }
}

impl From<UiFile> for UiConfig {
    fn from(file: UiFile) -> Self {
        let c = file.colors;
        Self {
            colors: UiColors {
                border: c.border,
                selection_bg: c.selection_bg,
                selection_fg: c.selection_fg,
                separator: c.separator,
                status_fg: c.status_fg,
                status_bg: c.status_bg,
                marked: c.marked,
                disabled: c.disabled,
            },
        }
    }
}

impl RgbColor {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl<'de> serde::Deserialize<'de> for RgbColor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Helper {
            Array([u8; 3]),
            Map { r: u8, g: u8, b: u8 },
            Hex(String),
        }

        let helper = Helper::deserialize(deserializer)?;
        let (r, g, b) = match helper {
            Helper::Array(values) => (values[0], values[1], values[2]),
            Helper::Map { r, g, b } => (r, g, b),
            Helper::Hex(hex) => parse_hex_color(&hex)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid color `{}`", hex)))?,
        };
        Ok(RgbColor { r, g, b })
    }
}

fn parse_hex_color(raw: &str) -> Option<(u8, u8, u8)> {
    let hex = raw.trim().strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(raw: &str) -> Result<Config> {
        parse(raw, PathBuf::from("test.toml"))
    }

    #[test]
    fn test_defaults_from_empty_file() {
        let config = parse_str("").unwrap();

        assert!(config.auth.client_id.is_none());
        assert_eq!(config.auth.tenant, "consumers");
        assert_eq!(config.auth.scopes, vec!["User.Read", "Contacts.ReadWrite"]);
        assert!(config.auth.interactive);
        assert_eq!(config.graph.endpoint.as_str(), "https://graph.microsoft.com/v1.0");
        assert_eq!(config.graph.page_size, 100);
        assert_eq!(config.grouping.strategy, GroupingStrategy::DisplayName);
        assert!(!config.grouping.duplicates_only);
        assert_eq!(config.keys.global.quit, vec!["q"]);
    }

    #[test]
    fn test_full_file() {
        let config = parse_str(
            r##"
            [auth]
            client_id = " 00000000-1111-2222-3333-444444444444 "
            tenant = "organizations"
            authority = "https://login.example.com"
            scopes = ["Contacts.ReadWrite"]
            redirect_port = 8400
            interactive = false
            token_cache = "/tmp/graph-dedup-token.json"

            [graph]
            endpoint = "https://graph.example.com/beta/"
            page_size = 250

            [grouping]
            strategy = "first-given-name"
            duplicates_only = true

            [keys.global]
            quit = "Q"
            refresh = ["F5", "R"]

            [ui.colors]
            marked = "#ff0000"
            border = [1, 2, 3]
            "##,
        )
        .unwrap();

        assert_eq!(
            config.auth.client_id.as_deref(),
            Some("00000000-1111-2222-3333-444444444444")
        );
        assert_eq!(
            config.auth.token_endpoint().unwrap().as_str(),
            "https://login.example.com/organizations/oauth2/v2.0/token"
        );
        assert_eq!(
            config.auth.authorize_endpoint().unwrap().as_str(),
            "https://login.example.com/organizations/oauth2/v2.0/authorize"
        );
        assert_eq!(config.auth.redirect_port, 8400);
        assert!(!config.auth.interactive);
        assert_eq!(config.auth.token_cache, PathBuf::from("/tmp/graph-dedup-token.json"));
        assert_eq!(config.graph.endpoint.as_str(), "https://graph.example.com/beta");
        assert_eq!(config.graph.page_size, 250);
        assert_eq!(config.grouping.strategy, GroupingStrategy::FirstGivenName);
        assert!(config.grouping.duplicates_only);
        assert_eq!(config.keys.global.quit, vec!["Q"]);
        assert_eq!(config.keys.global.refresh, vec!["F5", "R"]);
        assert_eq!(config.ui.colors.marked, RgbColor::new(255, 0, 0));
        assert_eq!(config.ui.colors.border, RgbColor::new(1, 2, 3));
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(parse_str("[graph]\npage_size = 0").is_err());
        assert!(parse_str("[graph]\npage_size = 5000").is_err());
        assert!(parse_str("[graph]\nendpoint = \"ftp://example.com\"").is_err());
        assert!(parse_str("[grouping]\nstrategy = \"fuzzy\"").is_err());
        assert!(parse_str("[auth]\nscopes = []").is_err());
        assert!(parse_str("[ui.colors]\nborder = \"orange\"").is_err());
    }

    #[test]
    fn test_require_client_id() {
        let config = parse_str("").unwrap();
        assert!(config.auth.require_client_id().is_err());
        let config = parse_str("[auth]\nclient_id = \"abc\"").unwrap();
        assert_eq!(config.auth.require_client_id().unwrap(), "abc");
    }

    #[test]
    fn test_key_binding_collision() {
        let err = parse_str("[keys.global]\nrefresh = \"j\"").unwrap_err();
        assert!(format!("{:#}", err).contains("collision"));

        // Same key in different contexts is fine
        assert!(parse_str("[keys.modal]\nconfirm = \"d\"").is_ok());
    }

    #[test]
    fn test_normalize_binding() {
        assert_eq!(normalize_binding("M"), "M");
        assert_eq!(normalize_binding("m"), "m");
        assert_eq!(normalize_binding("ENTER"), "enter");
        assert_eq!(normalize_binding("Esc"), "escape");
        assert_eq!(normalize_binding("page_down"), "pagedown");
    }

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#0a0B0c"), Some((10, 11, 12)));
        assert_eq!(parse_hex_color("0a0b0c"), None);
        assert_eq!(parse_hex_color("#12345"), None);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let err = load(Some(Path::new("/nonexistent/graph-dedup.toml"))).unwrap_err();
        assert!(err.to_string().contains("configuration file not found"));
    }
}
