use std::io::stdout;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::Terminal;
use tokio::runtime::Runtime;
use tracing::{error, info};

use crate::cancel::CancelToken;
use crate::config::{Config, UiColors};
use crate::contact::ContactSummary;
use crate::dedupe::{Deduplicator, RefreshReport};
use crate::error::{DedupeError, DeleteError};
use crate::grouping::{Group, GroupingStrategy};
use crate::remote::Connector;
use crate::session::DeleteReport;

use super::draw;

const PAGE_STEP: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneFocus {
    Groups,
    Members,
}

pub struct ConfirmModal {
    pub title: String,
    pub message: String,
    pub action: ConfirmAction,
}

/// Action to perform when confirm modal is accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmAction {
    /// Delete every contact marked for removal
    RemoveMarked,
}

/// Help modal state with scroll support
#[derive(Debug, Clone)]
pub struct HelpModal {
    /// Current scroll offset (line index at top of viewport)
    pub scroll: usize,
    /// Total number of content lines
    pub total_lines: usize,
    /// Viewport height (set during rendering)
    pub viewport_height: usize,
}

impl HelpModal {
    pub fn new(total_lines: usize) -> Self {
        Self {
            scroll: 0,
            total_lines,
            viewport_height: 10,
        }
    }

    pub fn scroll_down(&mut self, lines: usize) {
        let max_scroll = self.total_lines.saturating_sub(self.viewport_height);
        self.scroll = (self.scroll + lines).min(max_scroll);
    }

    pub fn scroll_up(&mut self, lines: usize) {
        self.scroll = self.scroll.saturating_sub(lines);
    }
}

/// A section in the help modal (e.g., "Global", "Navigation")
pub struct HelpSection {
    pub title: &'static str,
    pub entries: Vec<HelpEntry>,
}

/// A single help entry (action name + key bindings)
pub struct HelpEntry {
    pub action: &'static str,
    pub keys: String,
}

/// Blocking modal shown while a fetch or delete runs
#[derive(Debug, Clone)]
pub struct ProgressModal {
    pub title: String,
    pub message: String,
}

/// Long-running action queued by a key press, run after the next draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingAction {
    Refresh,
    RemoveMarked,
}

pub struct App<'a, C: Connector> {
    config: &'a Config,
    runtime: &'a Runtime,
    dedup: Deduplicator<C>,
    pub account: Option<String>,
    pub focused_pane: PaneFocus,
    pub duplicates_only: bool,
    pub selected_group: usize,
    pub selected_member: usize,
    pub status: Option<String>,
    pub confirm_modal: Option<ConfirmModal>,
    pub help_modal: Option<HelpModal>,
    pub progress_modal: Option<ProgressModal>,
    pending: Option<PendingAction>,
}

impl<'a, C: Connector> App<'a, C> {
    pub fn new(config: &'a Config, runtime: &'a Runtime, dedup: Deduplicator<C>) -> Self {
        Self {
            config,
            runtime,
            dedup,
            account: None,
            focused_pane: PaneFocus::Groups,
            duplicates_only: config.grouping.duplicates_only,
            selected_group: 0,
            selected_member: 0,
            status: None,
            confirm_modal: None,
            help_modal: None,
            progress_modal: None,
            pending: None,
        }
    }

    /// Label shown in the header for the signed-in account.
    pub fn with_account(mut self, account: Option<String>) -> Self {
        self.account = account;
        self
    }

    /// Queue a fetch to run as soon as the interface is up.
    pub fn refresh_on_start(mut self) -> Self {
        self.pending = Some(PendingAction::Refresh);
        self
    }

    pub fn run(&mut self) -> Result<()> {
        enable_raw_mode()?;
        let mut stdout = stdout();
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop<B>(&mut self, terminal: &mut Terminal<B>) -> Result<()>
    where
        B: Backend,
    {
        loop {
            draw::render(terminal, self)?;

            if let Some(action) = self.pending.take() {
                self.perform(terminal, action)?;
                continue;
            }

            if event::poll(Duration::from_millis(250))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press && self.handle_key(key) {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Run a fetch or delete with a progress modal; Esc cancels it.
    fn perform<B: Backend>(&mut self, terminal: &mut Terminal<B>, action: PendingAction) -> Result<()> {
        let selected_key = self.current_group().map(|g| g.key().to_string());
        let (title, message) = match action {
            PendingAction::Refresh => ("FETCHING", "Signing in...".to_string()),
            PendingAction::RemoveMarked => (
                "DELETING",
                format!("0 of {} deleted", self.dedup.removal().len()),
            ),
        };
        self.progress_modal = Some(ProgressModal {
            title: title.to_string(),
            message,
        });
        let backdrop = draw::render_snapshot(terminal, self)?;

        let cancel = CancelToken::new();
        let watcher = CancelWatcher::spawn(cancel.clone(), self.config.keys.global.cancel.clone());
        let colors = self.config.ui.colors.clone();
        let mut show = |message: String| {
            if let Err(err) = draw::render_progress(terminal, &backdrop, &colors, title, &message) {
                error!(error = %err, "failed to draw progress");
            }
        };

        match action {
            PendingAction::Refresh => {
                let result = self.runtime.block_on(
                    self.dedup
                        .refresh(&cancel, |n| show(format!("{} contacts loaded", n))),
                );
                drop(watcher);
                self.finish_refresh(result);
            }
            PendingAction::RemoveMarked => {
                let result = self.runtime.block_on(self.dedup.confirm_removal(
                    &cancel,
                    |done, total| show(format!("{} of {} deleted", done, total)),
                ));
                drop(watcher);
                self.finish_removal(result);
            }
        }

        self.progress_modal = None;
        self.restore_selection(selected_key.as_deref());
        Ok(())
    }

    fn finish_refresh(&mut self, result: Result<RefreshReport, DedupeError>) {
        match result {
            Ok(report) => {
                let duplicates = self.dedup.groups().duplicate_groups().count();
                self.set_status(format!(
                    "Fetched {} contacts in {} groups ({} with duplicates)",
                    report.contacts, report.groups, duplicates
                ));
            }
            Err(err) if err.is_cancelled() => {
                self.set_status(format!(
                    "Fetch cancelled; {} contacts loaded",
                    self.dedup.contacts().len()
                ));
            }
            Err(err) => {
                error!(error = %err, "fetch failed");
                self.set_status(format!("Fetch failed: {}", err));
            }
        }
    }

    fn finish_removal(&mut self, result: Result<DeleteReport, DedupeError>) {
        match result {
            Ok(report) => {
                info!(deleted = report.deleted.len(), "contacts deleted");
                self.set_status(format!("Deleted {} contact(s)", report.deleted.len()));
            }
            Err(DedupeError::Delete {
                source: DeleteError::Cancelled,
                report,
            }) if !report.deleted.is_empty() => {
                info!(deleted = report.deleted.len(), "deletion cancelled part way");
                self.set_status(format!(
                    "Cancelled after deleting {} of {} contact(s)",
                    report.deleted.len(),
                    report.requested()
                ));
            }
            Err(err) if err.is_cancelled() => {
                self.set_status("Deletion cancelled");
            }
            Err(err) => {
                error!(error = %err, "delete failed");
                self.set_status(format!("Delete failed: {}", err));
            }
        }
    }

    /// Handle a key press; returns `true` to quit.
    fn handle_key(&mut self, key: KeyEvent) -> bool {
        // Ctrl+C always quits (hardcoded for safety)
        if is_ctrl_c(&key) {
            return true;
        }

        if self.help_modal.is_some() {
            self.handle_help_modal_key(key);
            return false;
        }

        if self.confirm_modal.is_some() {
            self.handle_confirm_modal_key(key);
            return false;
        }

        self.handle_navigation_key(key)
    }

    fn handle_navigation_key(&mut self, key: KeyEvent) -> bool {
        let nav = &self.config.keys.navigation;
        let global = &self.config.keys.global;

        if key_matches_any(&key, &global.quit) {
            return true;
        }

        if key_matches_any(&key, &global.help) {
            self.help_modal = Some(HelpModal::new(self.help_line_count()));
            return false;
        }

        if key_matches_any(&key, &global.refresh) {
            if self.dedup.can_refresh() {
                self.pending = Some(PendingAction::Refresh);
            } else {
                self.set_status("An operation is already running");
            }
            return false;
        }

        if key_matches_any(&key, &global.confirm_removal) {
            self.open_confirm_removal();
            return false;
        }

        if key_matches_any(&key, &nav.next) {
            self.move_selection(1);
        } else if key_matches_any(&key, &nav.prev) {
            self.move_selection(-1);
        } else if key_matches_any(&key, &nav.page_down) {
            self.move_selection(PAGE_STEP as isize);
        } else if key_matches_any(&key, &nav.page_up) {
            self.move_selection(-(PAGE_STEP as isize));
        } else if key_matches_any(&key, &nav.focus_next) || key_matches_any(&key, &nav.focus_prev) {
            self.focused_pane = match self.focused_pane {
                PaneFocus::Groups => PaneFocus::Members,
                PaneFocus::Members => PaneFocus::Groups,
            };
        } else if key_matches_any(&key, &nav.toggle_mark) {
            self.toggle_mark_current();
        } else if key_matches_any(&key, &nav.mark_all_but_first) {
            self.mark_all_but_first_current();
        } else if key_matches_any(&key, &nav.clear_marks) {
            self.dedup.clear_removal();
            self.set_status("Cleared all marks");
        } else if key_matches_any(&key, &nav.toggle_filter) {
            let selected_key = self.current_group().map(|g| g.key().to_string());
            self.duplicates_only = !self.duplicates_only;
            self.restore_selection(selected_key.as_deref());
            self.set_status(if self.duplicates_only {
                "Showing duplicate groups only"
            } else {
                "Showing all groups"
            });
        } else if key_matches_any(&key, &nav.cycle_strategy) {
            self.cycle_strategy();
        }

        false
    }

    fn handle_help_modal_key(&mut self, key: KeyEvent) {
        let modal_keys = &self.config.keys.modal;
        let Some(modal) = self.help_modal.as_mut() else {
            return;
        };

        if key_matches_any(&key, &modal_keys.cancel) || key_matches_any(&key, &self.config.keys.global.help) {
            self.help_modal = None;
        } else if key_matches_any(&key, &modal_keys.next) {
            modal.scroll_down(1);
        } else if key_matches_any(&key, &modal_keys.prev) {
            modal.scroll_up(1);
        }
    }

    fn handle_confirm_modal_key(&mut self, key: KeyEvent) {
        let Some(modal) = self.confirm_modal.take() else {
            return;
        };

        let modal_keys = &self.config.keys.modal;

        // Cancel: close modal without action
        if key_matches_any(&key, &modal_keys.cancel) {
            return;
        }

        // Also accept 'n' as cancel (common convention)
        if matches!(key.code, KeyCode::Char(c) if c.eq_ignore_ascii_case(&'n')) {
            return;
        }

        if key_matches_any(&key, &modal_keys.confirm) {
            match modal.action {
                ConfirmAction::RemoveMarked => self.pending = Some(PendingAction::RemoveMarked),
            }
            return;
        }

        // Put the modal back if key wasn't handled
        self.confirm_modal = Some(modal);
    }

    fn open_confirm_removal(&mut self) {
        if self.dedup.removal().is_empty() {
            self.set_status("No contacts marked for removal");
            return;
        }
        if !self.dedup.can_confirm() {
            self.set_status("An operation is already running");
            return;
        }
        let count = self.dedup.removal().len();
        self.confirm_modal = Some(ConfirmModal {
            title: "Delete contacts".to_string(),
            message: format!(
                "Permanently delete {} marked contact(s) from the account?",
                count
            ),
            action: ConfirmAction::RemoveMarked,
        });
    }

    fn toggle_mark_current(&mut self) {
        let Some(id) = self.current_member().map(|c| c.id.clone()) else {
            return;
        };
        if self.dedup.toggle_removal(&id).is_some() {
            let marked = self.dedup.removal().len();
            self.set_status(format!("{} contact(s) marked for removal", marked));
        }
    }

    fn cycle_strategy(&mut self) {
        let next = match self.dedup.groups().strategy() {
            GroupingStrategy::DisplayName => GroupingStrategy::FirstGivenName,
            GroupingStrategy::FirstGivenName => GroupingStrategy::DisplayName,
        };
        self.dedup.set_strategy(next);
        self.restore_selection(None);
        self.set_status(format!("Grouping by {}", next.name()));
    }

    fn mark_all_but_first_current(&mut self) {
        let Some(key) = self.current_group().map(|g| g.key().to_string()) else {
            return;
        };
        let marked = self.dedup.mark_all_but_first(&key);
        self.set_status(format!(
            "Marked {} more; {} marked in total",
            marked,
            self.dedup.removal().len()
        ));
    }

    fn move_selection(&mut self, delta: isize) {
        match self.focused_pane {
            PaneFocus::Groups => {
                let len = self.visible_groups().len();
                let next = step(self.selected_group, delta, len);
                if next != self.selected_group {
                    self.selected_group = next;
                    self.selected_member = 0;
                }
            }
            PaneFocus::Members => {
                let len = self.current_group().map(Group::len).unwrap_or(0);
                self.selected_member = step(self.selected_member, delta, len);
            }
        }
    }

    /// Keep the highlighted group across regrouping, or clamp into range.
    fn restore_selection(&mut self, key: Option<&str>) {
        let groups = self.visible_groups();
        let position = key.and_then(|key| groups.iter().position(|g| g.key() == key));
        let len = groups.len();
        match position {
            Some(index) => self.selected_group = index,
            None => {
                self.selected_group = self.selected_group.min(len.saturating_sub(1));
                self.selected_member = 0;
            }
        }
        let members = self.current_group().map(Group::len).unwrap_or(0);
        self.selected_member = self.selected_member.min(members.saturating_sub(1));
    }

    /// Groups shown in the left pane, honouring the duplicates-only filter.
    pub fn visible_groups(&self) -> Vec<&Group> {
        if self.duplicates_only {
            self.dedup.groups().duplicate_groups().collect()
        } else {
            self.dedup.groups().groups().collect()
        }
    }

    pub fn current_group(&self) -> Option<&Group> {
        self.visible_groups().get(self.selected_group).copied()
    }

    pub fn current_member(&self) -> Option<&ContactSummary> {
        self.current_group()?.members().get(self.selected_member)
    }

    pub fn is_marked(&self, id: &str) -> bool {
        self.dedup.removal().contains(id)
    }

    pub fn dedup(&self) -> &Deduplicator<C> {
        &self.dedup
    }

    /// False while a fetch or delete is on screen.
    pub fn can_refresh(&self) -> bool {
        self.progress_modal.is_none() && self.dedup.can_refresh()
    }

    pub fn can_confirm(&self) -> bool {
        self.progress_modal.is_none() && self.dedup.can_confirm()
    }

    fn set_status<S: Into<String>>(&mut self, message: S) {
        self.status = Some(message.into());
    }

    pub fn ui_colors(&self) -> &UiColors {
        &self.config.ui.colors
    }

    pub fn config(&self) -> &Config {
        self.config
    }

    pub fn help_sections(&self) -> Vec<HelpSection> {
        let keys = &self.config.keys;
        let join = |b: &[String]| b.join(", ");
        vec![
            HelpSection {
                title: "Global",
                entries: vec![
                    HelpEntry { action: "Fetch contacts", keys: join(&keys.global.refresh) },
                    HelpEntry { action: "Delete marked", keys: join(&keys.global.confirm_removal) },
                    HelpEntry { action: "Cancel fetch/delete", keys: join(&keys.global.cancel) },
                    HelpEntry { action: "Help", keys: join(&keys.global.help) },
                    HelpEntry { action: "Quit", keys: join(&keys.global.quit) },
                ],
            },
            HelpSection {
                title: "Navigation",
                entries: vec![
                    HelpEntry { action: "Next", keys: join(&keys.navigation.next) },
                    HelpEntry { action: "Previous", keys: join(&keys.navigation.prev) },
                    HelpEntry { action: "Page down", keys: join(&keys.navigation.page_down) },
                    HelpEntry { action: "Page up", keys: join(&keys.navigation.page_up) },
                    HelpEntry { action: "Next pane", keys: join(&keys.navigation.focus_next) },
                    HelpEntry { action: "Previous pane", keys: join(&keys.navigation.focus_prev) },
                    HelpEntry { action: "Mark / unmark", keys: join(&keys.navigation.toggle_mark) },
                    HelpEntry { action: "Mark all but first", keys: join(&keys.navigation.mark_all_but_first) },
                    HelpEntry { action: "Clear marks", keys: join(&keys.navigation.clear_marks) },
                    HelpEntry { action: "Duplicates only", keys: join(&keys.navigation.toggle_filter) },
                    HelpEntry { action: "Grouping key", keys: join(&keys.navigation.cycle_strategy) },
                ],
            },
            HelpSection {
                title: "Dialogs",
                entries: vec![
                    HelpEntry { action: "Confirm", keys: join(&keys.modal.confirm) },
                    HelpEntry { action: "Cancel", keys: join(&keys.modal.cancel) },
                ],
            },
        ]
    }

    fn help_line_count(&self) -> usize {
        // Title plus entries plus a blank line per section
        self.help_sections()
            .iter()
            .map(|s| s.entries.len() + 2)
            .sum()
    }
}

fn step(current: usize, delta: isize, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let max = len - 1;
    if delta >= 0 {
        current.saturating_add(delta as usize).min(max)
    } else {
        current.saturating_sub(delta.unsigned_abs()).min(max)
    }
}

fn is_ctrl_c(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('C'))
}

/// Background key reader that cancels a running operation.
struct CancelWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CancelWatcher {
    fn spawn(cancel: CancelToken, keys: Vec<String>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            while !flag.load(Ordering::Acquire) {
                match event::poll(Duration::from_millis(50)) {
                    Ok(true) => {
                        if let Ok(Event::Key(key)) = event::read() {
                            if key.kind == KeyEventKind::Press
                                && (is_ctrl_c(&key) || key_matches_any(&key, &keys))
                            {
                                info!("cancellation requested");
                                cancel.cancel();
                            }
                        }
                    }
                    Ok(false) => {}
                    Err(_) => break,
                }
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for CancelWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Check if the key event matches any of the given bindings
pub fn key_matches_any(event: &KeyEvent, bindings: &[String]) -> bool {
    bindings.iter().any(|b| key_matches_single(event, b))
}

/// Check if the key event matches a single binding string
pub fn key_matches_single(event: &KeyEvent, binding: &str) -> bool {
    let trimmed = binding.trim();
    if trimmed.is_empty() {
        return false;
    }

    // Ctrl/Alt/Super combinations are not bindable
    let disallowed = KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER;
    if event.modifiers.intersects(disallowed) {
        return false;
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "enter" => matches!(event.code, KeyCode::Enter),
        "tab" => matches!(event.code, KeyCode::Tab),
        "backtab" | "shift+tab" => matches!(event.code, KeyCode::BackTab),
        "backspace" => matches!(event.code, KeyCode::Backspace),
        "delete" | "del" => matches!(event.code, KeyCode::Delete),
        "esc" | "escape" => matches!(event.code, KeyCode::Esc),
        "space" => matches!(event.code, KeyCode::Char(' ')),
        "up" => matches!(event.code, KeyCode::Up),
        "down" => matches!(event.code, KeyCode::Down),
        "left" => matches!(event.code, KeyCode::Left),
        "right" => matches!(event.code, KeyCode::Right),
        "pageup" | "page_up" => matches!(event.code, KeyCode::PageUp),
        "pagedown" | "page_down" => matches!(event.code, KeyCode::PageDown),
        "home" => matches!(event.code, KeyCode::Home),
        "end" => matches!(event.code, KeyCode::End),
        lower if lower.len() > 1 && lower.starts_with('f') => lower[1..]
            .parse::<u8>()
            .map(|n| (1..=12).contains(&n) && event.code == KeyCode::F(n))
            .unwrap_or(false),
        // Single character - case-sensitive (m != M, since M requires Shift)
        _ => {
            let mut chars = trimmed.chars();
            if let (Some(first), None) = (chars.next(), chars.next()) {
                matches!(event.code, KeyCode::Char(c) if c == first)
            } else {
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::config;
    use crate::remote::memory::{MemoryConnector, MemoryStore};

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn char_key(c: char) -> KeyEvent {
        press(KeyCode::Char(c))
    }

    fn test_config() -> Config {
        config::parse("", PathBuf::from("test.toml")).unwrap()
    }

    fn loaded_app<'a>(config: &'a Config, runtime: &'a Runtime) -> App<'a, MemoryConnector> {
        let mut dedup = Deduplicator::new(
            MemoryConnector::new(MemoryStore::new()),
            GroupingStrategy::DisplayName,
        );
        dedup.load(vec![
            ContactSummary::new("1", "Jo Smith"),
            ContactSummary::new("2", "Jo Smith"),
            ContactSummary::new("3", "Ann Lee"),
        ]);
        App::new(config, runtime, dedup)
    }

    #[test]
    fn test_key_matches_single() {
        assert!(key_matches_single(&press(KeyCode::F(5)), "F5"));
        assert!(key_matches_single(&press(KeyCode::F(12)), "f12"));
        assert!(!key_matches_single(&press(KeyCode::F(5)), "F13"));
        assert!(key_matches_single(&press(KeyCode::Esc), "Escape"));
        assert!(key_matches_single(&char_key(' '), "Space"));
        assert!(key_matches_single(&char_key('f'), "f"));
        assert!(!key_matches_single(&char_key('F'), "f"));
        assert!(!key_matches_single(
            &KeyEvent::new(KeyCode::Char('q'), KeyModifiers::CONTROL),
            "q"
        ));
        assert!(!key_matches_single(&char_key('q'), ""));
    }

    #[test]
    fn test_step_clamps() {
        assert_eq!(step(0, -1, 3), 0);
        assert_eq!(step(1, 1, 3), 2);
        assert_eq!(step(2, 10, 3), 2);
        assert_eq!(step(5, 0, 0), 0);
    }

    #[test]
    fn test_navigation_and_marking() {
        let config = test_config();
        let runtime = Runtime::new().unwrap();
        let mut app = loaded_app(&config, &runtime);

        // Ordinal order: "Ann Lee" then "Jo Smith"
        assert_eq!(app.current_group().unwrap().key(), "Ann Lee");
        app.handle_key(char_key('j'));
        assert_eq!(app.current_group().unwrap().key(), "Jo Smith");

        app.handle_key(press(KeyCode::Tab));
        assert_eq!(app.focused_pane, PaneFocus::Members);
        app.handle_key(char_key('j'));
        assert_eq!(app.current_member().unwrap().id, "2");

        app.handle_key(char_key(' '));
        assert!(app.is_marked("2"));
        assert!(app.can_confirm());
        app.handle_key(char_key(' '));
        assert!(!app.is_marked("2"));

        app.handle_key(char_key('a'));
        assert!(app.is_marked("2"));
        assert!(!app.is_marked("1"));

        app.handle_key(char_key('c'));
        assert!(app.dedup().removal().is_empty());
    }

    #[test]
    fn test_duplicates_filter_keeps_selection() {
        let config = test_config();
        let runtime = Runtime::new().unwrap();
        let mut app = loaded_app(&config, &runtime);
        app.handle_key(char_key('j'));

        app.handle_key(char_key('f'));
        assert!(app.duplicates_only);
        assert_eq!(app.visible_groups().len(), 1);
        assert_eq!(app.current_group().unwrap().key(), "Jo Smith");

        app.handle_key(char_key('f'));
        assert_eq!(app.visible_groups().len(), 2);
        assert_eq!(app.current_group().unwrap().key(), "Jo Smith");
    }

    #[test]
    fn test_confirm_modal_flow() {
        let config = test_config();
        let runtime = Runtime::new().unwrap();
        let mut app = loaded_app(&config, &runtime);

        app.handle_key(char_key('d'));
        assert!(app.confirm_modal.is_none());
        assert_eq!(app.status.as_deref(), Some("No contacts marked for removal"));

        app.handle_key(press(KeyCode::Tab));
        app.handle_key(char_key(' '));
        app.handle_key(char_key('d'));
        assert!(app.confirm_modal.is_some());

        app.handle_key(char_key('n'));
        assert!(app.confirm_modal.is_none());
        assert_eq!(app.pending, None);

        app.handle_key(char_key('d'));
        app.handle_key(press(KeyCode::Enter));
        assert!(app.confirm_modal.is_none());
        assert_eq!(app.pending, Some(PendingAction::RemoveMarked));
    }

    #[test]
    fn test_cycle_strategy_regroups() {
        let config = test_config();
        let runtime = Runtime::new().unwrap();
        let mut app = loaded_app(&config, &runtime);
        assert_eq!(app.visible_groups().len(), 2);

        // Fixture contacts carry no given name
        app.handle_key(char_key('s'));
        assert_eq!(app.dedup().groups().strategy(), GroupingStrategy::FirstGivenName);
        assert!(app.visible_groups().is_empty());
        assert!(app.current_group().is_none());
        assert_eq!(app.status.as_deref(), Some("Grouping by first-given-name"));

        app.handle_key(char_key('s'));
        assert_eq!(app.dedup().groups().strategy(), GroupingStrategy::DisplayName);
        assert_eq!(app.visible_groups().len(), 2);
        assert_eq!(app.dedup().contacts().len(), 3);
    }

    #[test]
    fn test_cancelled_removal_reports_deletions_made() {
        let config = test_config();
        let runtime = Runtime::new().unwrap();
        let mut app = loaded_app(&config, &runtime);

        app.finish_removal(Err(DedupeError::Delete {
            source: DeleteError::Cancelled,
            report: DeleteReport {
                deleted: vec!["1".into()],
                failed: None,
                pending: vec!["2".into(), "3".into()],
            },
        }));
        assert_eq!(
            app.status.as_deref(),
            Some("Cancelled after deleting 1 of 3 contact(s)")
        );

        app.finish_removal(Err(DedupeError::Cancelled));
        assert_eq!(app.status.as_deref(), Some("Deletion cancelled"));
    }

    #[test]
    fn test_actions_disabled_while_operation_shown() {
        let config = test_config();
        let runtime = Runtime::new().unwrap();
        let mut app = loaded_app(&config, &runtime);
        app.dedup.toggle_removal("1");
        assert!(app.can_refresh());
        assert!(app.can_confirm());

        app.progress_modal = Some(ProgressModal {
            title: "DELETING".to_string(),
            message: "0 of 1 deleted".to_string(),
        });
        assert!(!app.can_refresh());
        assert!(!app.can_confirm());

        app.progress_modal = None;
        assert!(app.can_confirm());
    }

    #[test]
    fn test_quit_and_refresh_keys() {
        let config = test_config();
        let runtime = Runtime::new().unwrap();
        let mut app = loaded_app(&config, &runtime);

        assert!(!app.handle_key(press(KeyCode::F(5))));
        assert_eq!(app.pending, Some(PendingAction::Refresh));
        assert!(app.handle_key(char_key('q')));
        assert!(app.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)));
    }
}
