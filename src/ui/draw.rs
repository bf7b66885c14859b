use anyhow::Result;
use ratatui::backend::Backend;
use ratatui::buffer::Buffer;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Block, Borders, Cell, Clear, List, ListItem, ListState, Paragraph, Row, Table, TableState,
};
use ratatui::{Frame, Terminal};

use crate::config::{RgbColor, UiColors};
use crate::remote::Connector;

use super::app::{App, PaneFocus};

const CONFIRM_HELP: &str = "Y/Enter: confirm  N/Esc: cancel";
const HELP_MODAL_FOOTER: &str = "j/k: scroll  Esc/q: close";
const PROGRESS_HELP: &str = "Esc: cancel";
const NO_NAME: &str = "(no name)";
const GROUPS_PANE_WIDTH: u16 = 36;

pub fn render<B: Backend, C: Connector>(terminal: &mut Terminal<B>, app: &mut App<C>) -> Result<()> {
    terminal.draw(|frame| draw_frame(frame, app))?;
    Ok(())
}

/// Draw the full frame and keep a copy to paint progress updates over.
pub fn render_snapshot<B: Backend, C: Connector>(
    terminal: &mut Terminal<B>,
    app: &mut App<C>,
) -> Result<Buffer> {
    let completed = terminal.draw(|frame| draw_frame(frame, app))?;
    Ok(completed.buffer.clone())
}

/// Repaint `backdrop` with a progress box on top.
pub fn render_progress<B: Backend>(
    terminal: &mut Terminal<B>,
    backdrop: &Buffer,
    colors: &UiColors,
    title: &str,
    message: &str,
) -> Result<()> {
    terminal.draw(|frame| {
        let area = frame.area();
        frame.buffer_mut().merge(backdrop);
        draw_progress_box(frame, area, colors, title, message);
    })?;
    Ok(())
}

fn draw_frame<C: Connector>(frame: &mut Frame<'_>, app: &mut App<C>) {
    let size = frame.area();
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(size);

    draw_header(frame, layout[0], app);
    draw_body(frame, layout[1], app);
    draw_footer(frame, layout[2], app);
    draw_confirm_modal(frame, size, app);
    draw_help_modal(frame, size, app);
    if let Some(modal) = &app.progress_modal {
        draw_progress_box(frame, size, app.ui_colors(), &modal.title, &modal.message);
    }
}

// =============================================================================
// Header
// =============================================================================

struct Button {
    key: String,
    title: String,
    enabled: bool,
}

fn header_buttons<C: Connector>(app: &App<C>) -> Vec<Button> {
    let keys = &app.config().keys.global;
    let first = |bindings: &[String]| bindings.first().cloned().unwrap_or_default();
    let marked = app.dedup().removal().len();
    vec![
        Button {
            key: first(&keys.refresh),
            title: "FETCH".to_string(),
            enabled: app.can_refresh(),
        },
        Button {
            key: first(&keys.confirm_removal),
            title: format!("DELETE {}", marked),
            enabled: app.can_confirm(),
        },
        Button {
            key: first(&keys.help),
            title: "HELP".to_string(),
            enabled: true,
        },
    ]
}

fn button_text(button: &Button) -> String {
    format!(" {}: {} ", button.key, button.title)
}

fn draw_header<C: Connector>(frame: &mut Frame<'_>, area: Rect, app: &App<C>) {
    let buttons = header_buttons(app);
    let buttons_width: u16 = buttons
        .iter()
        .map(|b| button_text(b).chars().count() as u16)
        .sum::<u16>()
        + buttons.len().saturating_sub(1) as u16;

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(0), Constraint::Length(buttons_width)])
        .split(area);

    draw_header_left(frame, chunks[0], app);
    draw_header_buttons(frame, chunks[1], app, &buttons);
}

fn draw_header_left<C: Connector>(frame: &mut Frame<'_>, area: Rect, app: &App<C>) {
    let header_style = header_text_style(app.ui_colors());
    let dedup = app.dedup();
    let account = app.account.as_deref().unwrap_or("not signed in");
    let duplicates = dedup.groups().duplicate_groups().count();

    let spans = vec![
        Span::styled(account.to_string(), header_style.add_modifier(Modifier::BOLD)),
        Span::raw("   "),
        Span::styled(
            format!(
                "{} contacts  {} groups  {} with duplicates",
                dedup.contacts().len(),
                dedup.groups().len(),
                duplicates
            ),
            header_style,
        ),
    ];
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_header_buttons<C: Connector>(
    frame: &mut Frame<'_>,
    area: Rect,
    app: &App<C>,
    buttons: &[Button],
) {
    if buttons.is_empty() || area.width == 0 {
        return;
    }

    let colors = app.ui_colors();
    let enabled_style = Style::default()
        .fg(color(colors.selection_fg))
        .bg(color(colors.selection_bg))
        .add_modifier(Modifier::BOLD);
    let disabled_style = Style::default()
        .fg(color(colors.disabled))
        .add_modifier(Modifier::DIM);

    let mut x = area.x;
    for (idx, button) in buttons.iter().enumerate() {
        let text = button_text(button);
        let width = text.chars().count() as u16;
        if x + width > area.x + area.width {
            break;
        }

        let style = if button.enabled {
            enabled_style
        } else {
            disabled_style
        };
        frame.render_widget(
            Paragraph::new(text).style(style).alignment(Alignment::Center),
            Rect::new(x, area.y, width, 1),
        );
        x += width;

        if idx < buttons.len() - 1 && x < area.x + area.width {
            frame.render_widget(Paragraph::new(" "), Rect::new(x, area.y, 1, 1));
            x += 1;
        }
    }
}

// =============================================================================
// Body
// =============================================================================

fn draw_body<C: Connector>(frame: &mut Frame<'_>, area: Rect, app: &App<C>) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(GROUPS_PANE_WIDTH), Constraint::Min(0)])
        .split(area);
    draw_groups(frame, chunks[0], app);
    draw_members(frame, chunks[1], app);
}

fn draw_groups<C: Connector>(frame: &mut Frame<'_>, area: Rect, app: &App<C>) {
    let active = app.focused_pane == PaneFocus::Groups;
    let title = if app.duplicates_only {
        " DUPLICATES "
    } else {
        " GROUPS "
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(title, header_text_style(app.ui_colors())))
        .border_style(border_style(app.ui_colors(), active));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    if inner.width == 0 || inner.height == 0 {
        return;
    }

    let groups = app.visible_groups();
    if groups.is_empty() {
        let message = if app.dedup().contacts().is_empty() {
            "No contacts loaded"
        } else {
            "No duplicates found"
        };
        frame.render_widget(
            Paragraph::new(message)
                .alignment(Alignment::Center)
                .style(header_text_style(app.ui_colors())),
            inner,
        );
        return;
    }

    let name_width = (inner.width as usize).saturating_sub(7);
    let items: Vec<ListItem> = groups
        .iter()
        .map(|group| {
            let name = if group.key().is_empty() {
                NO_NAME
            } else {
                group.key()
            };
            let has_marked = group.members().iter().any(|m| app.is_marked(&m.id));
            let text = format!(
                "{}{:<width$} {:>4}",
                if has_marked { "*" } else { " " },
                truncate(name, name_width),
                group.len(),
                width = name_width
            );
            let mut item = ListItem::new(Line::from(text));
            if has_marked {
                item = item.style(Style::default().fg(color(app.ui_colors().marked)));
            }
            item
        })
        .collect();

    let mut state = ListState::default();
    state.select(Some(app.selected_group.min(groups.len() - 1)));

    let list = List::new(items)
        .highlight_style(pane_highlight_style(app.ui_colors(), active))
        .repeat_highlight_symbol(false);
    frame.render_stateful_widget(list, inner, &mut state);
}

fn draw_members<C: Connector>(frame: &mut Frame<'_>, area: Rect, app: &App<C>) {
    let active = app.focused_pane == PaneFocus::Members;
    let colors = app.ui_colors();
    let group = app.current_group();

    let title = match group {
        Some(group) if group.key().is_empty() => format!(" {} ({}) ", NO_NAME, group.len()),
        Some(group) => format!(" {} ({}) ", group.key(), group.len()),
        None => " MEMBERS ".to_string(),
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(title, header_text_style(colors)))
        .border_style(border_style(colors, active));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let Some(group) = group else {
        return;
    };
    if inner.width == 0 || inner.height == 0 {
        return;
    }

    let header = Row::new(["", "NAME", "EMAIL", "PHONE", "FOLDER", "UPDATED"])
        .style(header_text_style(colors).add_modifier(Modifier::BOLD));

    let rows: Vec<Row> = group
        .members()
        .iter()
        .map(|member| {
            let marked = app.is_marked(&member.id);
            let row = Row::new(vec![
                Cell::from(if marked { "[x]" } else { "[ ]" }),
                Cell::from(member.display_name.clone()),
                Cell::from(member.email_addresses.join(", ")),
                Cell::from(member.phone_numbers.join(", ")),
                Cell::from(member.folder_name.clone()),
                Cell::from(member.updated_date().unwrap_or_default()),
            ]);
            if marked {
                row.style(Style::default().fg(color(colors.marked)))
            } else {
                row
            }
        })
        .collect();

    let widths = [
        Constraint::Length(3),
        Constraint::Percentage(24),
        Constraint::Percentage(32),
        Constraint::Percentage(18),
        Constraint::Length(12),
        Constraint::Length(10),
    ];

    let mut state = TableState::default();
    state.select(Some(app.selected_member.min(group.len().saturating_sub(1))));

    let table = Table::new(rows, widths)
        .header(header)
        .column_spacing(1)
        .highlight_style(pane_highlight_style(colors, active));
    frame.render_stateful_widget(table, inner, &mut state);
}

fn draw_footer<C: Connector>(frame: &mut Frame<'_>, area: Rect, app: &App<C>) {
    let message: String = if app.progress_modal.is_some() {
        PROGRESS_HELP.to_string()
    } else if app.confirm_modal.is_some() {
        CONFIRM_HELP.to_string()
    } else if app.help_modal.is_some() {
        HELP_MODAL_FOOTER.to_string()
    } else {
        app.status.clone().unwrap_or_else(|| default_hint(app))
    };
    let colors = app.ui_colors();
    let style = Style::default()
        .fg(color(colors.status_fg))
        .bg(color(colors.status_bg));

    let background = Block::default().style(Style::default().bg(color(colors.status_bg)));
    frame.render_widget(background, area);

    frame.render_widget(Paragraph::new(message).style(style), area);
}

fn default_hint<C: Connector>(app: &App<C>) -> String {
    let nav = &app.config().keys.navigation;
    let label = |bindings: &[String]| bindings.first().cloned().unwrap_or_default();
    format!(
        "{}: mark  {}: mark all but first  {}: duplicates only  {}: help",
        label(&nav.toggle_mark),
        label(&nav.mark_all_but_first),
        label(&nav.toggle_filter),
        label(&app.config().keys.global.help)
    )
}

// =============================================================================
// Modals
// =============================================================================

fn draw_confirm_modal<C: Connector>(frame: &mut Frame<'_>, area: Rect, app: &App<C>) {
    let Some(modal) = app.confirm_modal.as_ref() else {
        return;
    };

    let width = (modal.message.chars().count() as u16 + 4)
        .max(CONFIRM_HELP.len() as u16 + 4)
        .min(area.width);
    let modal_area = centered(area, width, 6);
    frame.render_widget(Clear, modal_area);

    let colors = app.ui_colors();
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(modal.title.clone(), header_text_style(colors)))
        .border_style(border_style(colors, true));
    let inner = block.inner(modal_area);
    frame.render_widget(block, modal_area);

    let lines = vec![
        Line::from(modal.message.clone()),
        Line::from(""),
        Line::from(Span::styled(CONFIRM_HELP, header_text_style(colors))),
    ];
    frame.render_widget(Paragraph::new(lines).alignment(Alignment::Center), inner);
}

fn draw_help_modal<C: Connector>(frame: &mut Frame<'_>, area: Rect, app: &mut App<C>) {
    if app.help_modal.is_none() {
        return;
    }

    let colors = app.ui_colors().clone();
    let mut lines: Vec<Line<'static>> = Vec::new();
    for section in app.help_sections() {
        lines.push(Line::from(Span::styled(
            section.title.to_uppercase(),
            header_text_style(&colors).add_modifier(Modifier::BOLD),
        )));
        for entry in section.entries {
            lines.push(Line::from(vec![
                Span::raw(format!("  {:<22}", entry.action)),
                Span::styled(entry.keys, header_text_style(&colors)),
            ]));
        }
        lines.push(Line::from(""));
    }

    let width = 56u16.min(area.width);
    let height = (lines.len() as u16 + 2).min(area.height.saturating_sub(2)).max(3);
    let modal_area = centered(area, width, height);
    frame.render_widget(Clear, modal_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(" HELP ", header_text_style(&colors)))
        .border_style(border_style(&colors, true));
    let inner = block.inner(modal_area);
    frame.render_widget(block, modal_area);

    let Some(modal) = app.help_modal.as_mut() else {
        return;
    };
    modal.viewport_height = inner.height as usize;
    modal.total_lines = lines.len();
    let scroll = modal.scroll.min(lines.len().saturating_sub(1));

    let visible: Vec<Line> = lines.into_iter().skip(scroll).collect();
    frame.render_widget(Paragraph::new(visible), inner);
}

fn draw_progress_box(frame: &mut Frame<'_>, area: Rect, colors: &UiColors, title: &str, message: &str) {
    let width = 40u16.min(area.width);
    let modal_area = centered(area, width, 5);
    frame.render_widget(Clear, modal_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(format!(" {} ", title), header_text_style(colors)))
        .border_style(border_style(colors, true));
    let inner = block.inner(modal_area);
    frame.render_widget(block, modal_area);

    let lines = vec![
        Line::from(message.to_string()),
        Line::from(""),
        Line::from(Span::styled(PROGRESS_HELP, header_text_style(colors))),
    ];
    frame.render_widget(Paragraph::new(lines).alignment(Alignment::Center), inner);
}

// =============================================================================
// Helpers
// =============================================================================

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut out: String = text.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn selection_style(colors: &UiColors) -> Style {
    Style::default()
        .fg(color(colors.selection_fg))
        .bg(color(colors.selection_bg))
}

fn pane_highlight_style(colors: &UiColors, active: bool) -> Style {
    if active {
        selection_style(colors)
    } else {
        Style::default().add_modifier(Modifier::REVERSED)
    }
}

fn border_style(colors: &UiColors, active: bool) -> Style {
    let style = Style::default().fg(color(colors.border));
    if active {
        style.add_modifier(Modifier::BOLD)
    } else {
        style
    }
}

fn header_text_style(colors: &UiColors) -> Style {
    Style::default().fg(color(colors.separator))
}

fn color(rgb: RgbColor) -> Color {
    Color::Rgb(rgb.r, rgb.g, rgb.b)
}
