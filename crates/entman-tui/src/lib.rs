// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::{execute, terminal};
use entman_app::{
    ConfirmPrompt, DeviceId, EntityId, EntityRecord, Extras, Gateway, NoticeLevel, Notification,
    Panel, PanelCommand, PanelError, PanelState, PanelView,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;
use time::macros::format_description;
use tracing::{debug, warn};

const STATUS_CLEAR_AFTER: Duration = Duration::from_secs(4);
const EXPANDED_MARK: &str = "▾";
const COLLAPSED_MARK: &str = "▸";
const FAVORITE_MARK: &str = "★";

/// Side effects the TUI needs beyond the panel itself.
pub trait AppRuntime {
    fn save_extras(&mut self, extras: &Extras) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InternalEvent {
    ClearStatus { token: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RowTarget {
    Integration(String),
    Device {
        integration: String,
        device_id: DeviceId,
    },
    Entity(EntityId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TreeRow {
    target: RowTarget,
    depth: usize,
    text: String,
    disabled: bool,
    selected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputKind {
    Search,
    Tag,
    Alias,
    Rename,
    DisplayName,
    PresetName,
    RenameFind,
    RenameReplace,
}

impl InputKind {
    const fn title(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Tag => "tag (prefix with - to remove)",
            Self::Alias => "alias (empty clears)",
            Self::Rename => "new entity id",
            Self::DisplayName => "display name (empty clears)",
            Self::PresetName => "preset name",
            Self::RenameFind => "bulk rename: find in entity ids",
            Self::RenameReplace => "bulk rename: replace with",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct InputState {
    kind: InputKind,
    buffer: String,
    original: String,
    target: Option<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct ViewData {
    cursor: usize,
    input: Option<InputState>,
    confirm: Option<ConfirmPrompt>,
    help_visible: bool,
    activity_visible: bool,
    status: Option<Notification>,
    status_token: u64,
    saved_revision: u64,
    preset_index: usize,
    loading: bool,
}

pub fn run_app<G: Gateway, R: AppRuntime>(panel: &mut Panel<G>, runtime: &mut R) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, terminal::EnterAlternateScreen).context("enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let mut view_data = ViewData {
        loading: true,
        saved_revision: panel.extras().revision(),
        ..ViewData::default()
    };
    let (internal_tx, internal_rx) = mpsc::channel();

    let mut result = terminal
        .draw(|frame| render(frame, panel, &view_data))
        .map(|_| ())
        .context("draw frame");
    if result.is_ok() {
        if let Err(error) = panel.refresh() {
            debug!(%error, "initial refresh failed");
        }
        view_data.loading = false;
        drain_notifications(panel, &mut view_data, &internal_tx);
    }

    while result.is_ok() {
        process_internal_events(&mut view_data, &internal_rx);

        if let Err(error) = terminal.draw(|frame| render(frame, panel, &view_data)) {
            result = Err(error).context("draw frame");
            break;
        }

        let has_event = match event::poll(Duration::from_millis(120)).context("poll event") {
            Ok(has_event) => has_event,
            Err(error) => {
                result = Err(error);
                break;
            }
        };
        if has_event {
            match event::read().context("read event") {
                Ok(Event::Key(key)) => {
                    if handle_key_event(panel, runtime, &mut view_data, &internal_tx, key) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(error) => result = Err(error),
            }
        }
    }

    disable_raw_mode().context("disable raw mode")?;
    execute!(io::stdout(), terminal::LeaveAlternateScreen).context("leave alternate screen")?;
    result
}

fn process_internal_events(view_data: &mut ViewData, rx: &Receiver<InternalEvent>) {
    while let Ok(event) = rx.try_recv() {
        match event {
            InternalEvent::ClearStatus { token } if token == view_data.status_token => {
                view_data.status = None;
            }
            InternalEvent::ClearStatus { .. } => {}
        }
    }
}

fn schedule_status_clear(internal_tx: &Sender<InternalEvent>, token: u64) {
    let sender = internal_tx.clone();
    thread::spawn(move || {
        thread::sleep(STATUS_CLEAR_AFTER);
        let _ = sender.send(InternalEvent::ClearStatus { token });
    });
}

fn emit_status(
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    notification: Notification,
) {
    view_data.status = Some(notification);
    view_data.status_token = view_data.status_token.saturating_add(1);
    schedule_status_clear(internal_tx, view_data.status_token);
}

fn drain_notifications<G: Gateway>(
    panel: &mut Panel<G>,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    let notifications = panel.take_notifications();
    // Warnings and errors outrank a success raised in the same step.
    let chosen = notifications
        .iter()
        .max_by_key(|notification| severity(notification.level))
        .cloned();
    if let Some(notification) = chosen {
        emit_status(view_data, internal_tx, notification);
    }
}

const fn severity(level: NoticeLevel) -> u8 {
    match level {
        NoticeLevel::Info => 0,
        NoticeLevel::Success => 1,
        NoticeLevel::Warning => 2,
        NoticeLevel::Error => 3,
    }
}

fn persist_extras<G: Gateway, R: AppRuntime>(
    panel: &Panel<G>,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    let revision = panel.extras().revision();
    if revision == view_data.saved_revision {
        return;
    }
    match runtime.save_extras(panel.extras()) {
        Ok(()) => view_data.saved_revision = revision,
        Err(error) => {
            warn!(%error, "saving extras failed");
            emit_status(
                view_data,
                internal_tx,
                Notification::new(
                    NoticeLevel::Error,
                    format!("save failed: {error}; check storage.db_path"),
                ),
            );
        }
    }
}

fn report<T>(result: Result<T, PanelError>) {
    if let Err(error) = result {
        debug!(%error, "panel operation failed");
    }
}

fn handle_key_event<G: Gateway, R: AppRuntime>(
    panel: &mut Panel<G>,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) -> bool {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return true;
    }

    let quit = if view_data.help_visible {
        if matches!(key.code, KeyCode::Esc | KeyCode::Char('?') | KeyCode::Char('q')) {
            view_data.help_visible = false;
        }
        false
    } else if view_data.activity_visible {
        if matches!(key.code, KeyCode::Esc | KeyCode::Char('L') | KeyCode::Char('q')) {
            view_data.activity_visible = false;
        }
        false
    } else if view_data.confirm.is_some() {
        handle_confirm_key(panel, view_data, key);
        false
    } else if view_data.input.is_some() {
        handle_input_key(panel, view_data, key);
        false
    } else if panel.state().menu_open {
        if matches!(key.code, KeyCode::Esc | KeyCode::Char('m') | KeyCode::Char('q')) {
            panel.request_menu_toggle();
        }
        false
    } else {
        handle_nav_key(panel, view_data, internal_tx, key)
    };

    drain_notifications(panel, view_data, internal_tx);
    persist_extras(panel, runtime, view_data, internal_tx);
    let rows = tree_rows(&panel.view(), panel.state(), panel.extras());
    view_data.cursor = view_data.cursor.min(rows.len().saturating_sub(1));
    quit
}

fn handle_nav_key<G: Gateway>(
    panel: &mut Panel<G>,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) -> bool {
    let rows = tree_rows(&panel.view(), panel.state(), panel.extras());
    let current = rows.get(view_data.cursor).map(|row| row.target.clone());

    match key.code {
        KeyCode::Char('q') => return true,
        KeyCode::Char('j') | KeyCode::Down => {
            if view_data.cursor + 1 < rows.len() {
                view_data.cursor += 1;
            }
        }
        KeyCode::Char('k') | KeyCode::Up => {
            view_data.cursor = view_data.cursor.saturating_sub(1);
        }
        KeyCode::Char('g') | KeyCode::Home => view_data.cursor = 0,
        KeyCode::Char('G') | KeyCode::End => view_data.cursor = rows.len().saturating_sub(1),
        KeyCode::Enter | KeyCode::Char(' ') => match current {
            Some(RowTarget::Integration(integration)) => {
                panel.toggle_integration_expanded(&integration);
            }
            Some(RowTarget::Device { device_id, .. }) => {
                panel.toggle_device_expanded(&device_id);
            }
            Some(RowTarget::Entity(entity_id)) => {
                panel.toggle_entity_selected(&entity_id);
            }
            None => {}
        },
        KeyCode::Char('e') => match current {
            Some(RowTarget::Integration(integration)) => {
                report(panel.enable_integration(&integration));
            }
            Some(RowTarget::Device {
                integration,
                device_id,
            }) => report(panel.enable_device(&integration, &device_id)),
            Some(RowTarget::Entity(entity_id)) => report(panel.enable_entity(&entity_id)),
            None => {}
        },
        KeyCode::Char('d') => match current {
            Some(RowTarget::Integration(integration)) => {
                if let Ok(prompt) = panel.prompt_disable_integration(&integration) {
                    view_data.confirm = Some(prompt);
                }
            }
            Some(RowTarget::Device {
                integration,
                device_id,
            }) => {
                if let Ok(prompt) = panel.prompt_disable_device(&integration, &device_id) {
                    view_data.confirm = Some(prompt);
                }
            }
            Some(RowTarget::Entity(entity_id)) => report(panel.disable_entity(&entity_id)),
            None => {}
        },
        KeyCode::Char('E') => report(panel.bulk_enable_selected()),
        KeyCode::Char('D') => {
            if let Ok(prompt) = panel.prompt_disable_selected() {
                view_data.confirm = Some(prompt);
            }
        }
        KeyCode::Char('/') => {
            let term = panel.state().filters.search_term.clone();
            view_data.input = Some(InputState {
                kind: InputKind::Search,
                buffer: term.clone(),
                original: term,
                target: None,
            });
        }
        KeyCode::Char('v') => {
            panel.dispatch(PanelCommand::CycleViewState);
        }
        KeyCode::Char('o') => {
            panel.dispatch(PanelCommand::CycleDomainFilter);
        }
        KeyCode::Char('F') => {
            panel.dispatch(PanelCommand::ToggleFavoritesOnly);
        }
        KeyCode::Char('T') => cycle_tag_filter(panel),
        KeyCode::Char('f') => {
            if let Some(RowTarget::Entity(entity_id)) = current {
                panel.toggle_favorite(&entity_id);
            }
        }
        KeyCode::Char('t') => open_entity_input(view_data, current, InputKind::Tag, String::new()),
        KeyCode::Char('a') => {
            let alias = entity_of(current.as_ref())
                .and_then(|entity_id| panel.extras().alias(entity_id))
                .unwrap_or_default()
                .to_owned();
            open_entity_input(view_data, current, InputKind::Alias, alias);
        }
        KeyCode::Char('R') => {
            let prefill = entity_of(current.as_ref())
                .map(ToString::to_string)
                .unwrap_or_default();
            open_entity_input(view_data, current, InputKind::Rename, prefill);
        }
        KeyCode::Char('B') => {
            view_data.input = Some(InputState {
                kind: InputKind::RenameFind,
                buffer: String::new(),
                original: String::new(),
                target: None,
            });
        }
        KeyCode::Char('X') => {
            if let Some(RowTarget::Entity(entity_id)) = current
                && let Ok(prompt) = panel.prompt_remove_entity(&entity_id)
            {
                view_data.confirm = Some(prompt);
            }
        }
        KeyCode::Char('n') => {
            let prefill = entity_of(current.as_ref())
                .and_then(|entity_id| panel.dataset().find(entity_id))
                .and_then(|entity| entity.original_name.clone())
                .unwrap_or_default();
            open_entity_input(view_data, current, InputKind::DisplayName, prefill);
        }
        KeyCode::Char('p') => {
            view_data.input = Some(InputState {
                kind: InputKind::PresetName,
                buffer: String::new(),
                original: String::new(),
                target: None,
            });
        }
        KeyCode::Char('P') => cycle_preset(panel, view_data, internal_tx),
        KeyCode::Char('u') => report(panel.undo()),
        KeyCode::Char('U') => report(panel.redo()),
        KeyCode::Char('A') => {
            panel.select_all_visible();
        }
        KeyCode::Char('x') => {
            panel.clear_selection();
        }
        KeyCode::Char('c') => {
            panel.dispatch(PanelCommand::CollapseAll);
        }
        KeyCode::Char('r') => report(panel.refresh()),
        KeyCode::Char('m') => {
            panel.request_menu_toggle();
        }
        KeyCode::Char('L') => view_data.activity_visible = true,
        KeyCode::Char('?') => view_data.help_visible = true,
        KeyCode::Esc => {
            panel.clear_selection();
        }
        _ => {}
    }
    false
}

fn entity_of(target: Option<&RowTarget>) -> Option<&EntityId> {
    match target {
        Some(RowTarget::Entity(entity_id)) => Some(entity_id),
        _ => None,
    }
}

fn open_entity_input(
    view_data: &mut ViewData,
    current: Option<RowTarget>,
    kind: InputKind,
    prefill: String,
) {
    if let Some(RowTarget::Entity(entity_id)) = current {
        view_data.input = Some(InputState {
            kind,
            buffer: prefill.clone(),
            original: prefill,
            target: Some(entity_id),
        });
    }
}

fn cycle_tag_filter<G: Gateway>(panel: &mut Panel<G>) {
    let tags = panel.extras().all_tags();
    let next = match &panel.state().filters.tag {
        None => tags.first().cloned(),
        Some(current) => tags
            .iter()
            .position(|tag| tag == current)
            .and_then(|index| tags.get(index + 1))
            .cloned(),
    };
    panel.dispatch(PanelCommand::SetTagFilter(next));
}

fn cycle_preset<G: Gateway>(
    panel: &mut Panel<G>,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    let names: Vec<String> = panel
        .extras()
        .presets
        .iter()
        .map(|preset| preset.name.clone())
        .collect();
    if names.is_empty() {
        emit_status(
            view_data,
            internal_tx,
            Notification::new(NoticeLevel::Info, "No saved presets; press p to save one"),
        );
        return;
    }
    let index = view_data.preset_index % names.len();
    view_data.preset_index = index + 1;
    report(panel.apply_preset(&names[index]));
}

fn handle_confirm_key<G: Gateway>(panel: &mut Panel<G>, view_data: &mut ViewData, key: KeyEvent) {
    match key.code {
        KeyCode::Char('y') | KeyCode::Enter => {
            if let Some(prompt) = view_data.confirm.take() {
                report(panel.run_confirmed(prompt.confirm()));
            }
        }
        KeyCode::Char('n') | KeyCode::Esc => view_data.confirm = None,
        _ => {}
    }
}

fn handle_input_key<G: Gateway>(panel: &mut Panel<G>, view_data: &mut ViewData, key: KeyEvent) {
    let Some(input) = view_data.input.as_mut() else {
        return;
    };
    match key.code {
        KeyCode::Esc => {
            if input.kind == InputKind::Search {
                panel.set_search_term(input.original.clone());
            }
            view_data.input = None;
        }
        KeyCode::Enter => {
            if let Some(input) = view_data.input.take() {
                submit_input(panel, view_data, input);
            }
        }
        KeyCode::Backspace => {
            input.buffer.pop();
            if input.kind == InputKind::Search {
                panel.set_search_term(input.buffer.clone());
            }
        }
        KeyCode::Char(ch) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
            input.buffer.push(ch);
            if input.kind == InputKind::Search {
                panel.set_search_term(input.buffer.clone());
            }
        }
        _ => {}
    }
}

fn submit_input<G: Gateway>(panel: &mut Panel<G>, view_data: &mut ViewData, input: InputState) {
    let value = input.buffer.trim();
    match (input.kind, input.target.as_ref()) {
        (InputKind::RenameFind, _) => {
            if !value.is_empty() {
                view_data.input = Some(InputState {
                    kind: InputKind::RenameReplace,
                    buffer: String::new(),
                    original: value.to_owned(),
                    target: None,
                });
            }
        }
        (InputKind::RenameReplace, _) => {
            if let Ok(prompt) = panel.prompt_bulk_rename(&input.original, value, false) {
                view_data.confirm = Some(prompt);
            }
        }
        (InputKind::Search, _) => {
            panel.set_search_term(value);
        }
        (InputKind::PresetName, _) => report(panel.save_preset(value)),
        (InputKind::Tag, Some(entity_id)) => match value.strip_prefix('-') {
            Some(tag) => {
                panel.remove_tag(entity_id, tag.trim());
            }
            None => {
                panel.add_tag(entity_id, value);
            }
        },
        (InputKind::Alias, Some(entity_id)) => panel.set_alias(entity_id, value),
        (InputKind::Rename, Some(entity_id)) => {
            let new = EntityId::new(value);
            if &new != entity_id {
                report(panel.rename_entity(entity_id, &new));
            }
        }
        (InputKind::DisplayName, Some(entity_id)) => {
            report(panel.set_display_name(entity_id, Some(value)));
        }
        (_, None) => {}
    }
}

fn tree_rows(view: &PanelView, state: &PanelState, extras: &Extras) -> Vec<TreeRow> {
    let mut rows = Vec::new();
    for integration in &view.integrations {
        let expanded = state
            .expanded_integrations
            .contains(&integration.integration);
        let entities: Vec<&EntityRecord> = integration
            .devices
            .iter()
            .flat_map(|device| device.entities.iter())
            .collect();
        let disabled = entities.iter().filter(|entity| entity.is_disabled).count();
        rows.push(TreeRow {
            target: RowTarget::Integration(integration.integration.clone()),
            depth: 0,
            text: format!(
                "{} {} ({} entities, {disabled} disabled)",
                if expanded {
                    EXPANDED_MARK
                } else {
                    COLLAPSED_MARK
                },
                integration.integration,
                entities.len()
            ),
            disabled: disabled == entities.len(),
            selected: false,
        });
        if !expanded {
            continue;
        }

        for device in &integration.devices {
            let device_expanded = state.expanded_devices.contains(&device.device_id);
            let disabled = device
                .entities
                .iter()
                .filter(|entity| entity.is_disabled)
                .count();
            rows.push(TreeRow {
                target: RowTarget::Device {
                    integration: integration.integration.clone(),
                    device_id: device.device_id.clone(),
                },
                depth: 1,
                text: format!(
                    "{} {} ({} entities, {disabled} disabled)",
                    if device_expanded {
                        EXPANDED_MARK
                    } else {
                        COLLAPSED_MARK
                    },
                    device.name,
                    device.entities.len()
                ),
                disabled: disabled == device.entities.len(),
                selected: false,
            });
            if !device_expanded {
                continue;
            }

            for entity in &device.entities {
                let selected = state.is_selected(&entity.entity_id);
                rows.push(TreeRow {
                    target: RowTarget::Entity(entity.entity_id.clone()),
                    depth: 2,
                    text: entity_text(entity, extras, selected),
                    disabled: entity.is_disabled,
                    selected,
                });
            }
        }
    }
    rows
}

fn entity_text(entity: &EntityRecord, extras: &Extras, selected: bool) -> String {
    let mut text = format!(
        "[{}] {}{}",
        if selected { "x" } else { " " },
        if extras.is_favorite(&entity.entity_id) {
            format!("{FAVORITE_MARK} ")
        } else {
            String::new()
        },
        entity.entity_id
    );
    if let Some(alias) = extras.alias(&entity.entity_id) {
        text.push_str(&format!(" \"{alias}\""));
    }
    if let Some(name) = entity.original_name.as_deref().filter(|name| !name.is_empty()) {
        text.push_str(&format!("  {name}"));
    }
    if entity.is_disabled {
        match entity.disabled_by.as_deref() {
            Some(source) => text.push_str(&format!("  [disabled by {source}]")),
            None => text.push_str("  [disabled]"),
        }
    }
    for tag in extras.tags_for(&entity.entity_id) {
        text.push_str(&format!(" #{tag}"));
    }
    text
}

fn header_text(view: &PanelView, state: &PanelState) -> String {
    let filters = &state.filters;
    let mut parts = vec![
        format!("view: {}", filters.view_state.as_str()),
        format!("domain: {}", filters.domain_label()),
    ];
    if !filters.search_term.is_empty() {
        parts.push(format!("search: {:?}", filters.search_term));
    }
    if filters.favorites_only {
        parts.push(format!("{FAVORITE_MARK} only"));
    }
    if let Some(tag) = &filters.tag {
        parts.push(format!("tag: #{tag}"));
    }
    let counts = view.counts;
    parts.push(format!(
        "{} integrations, {} devices, {} entities ({} enabled, {} disabled)",
        counts.integrations, counts.devices, counts.entities, counts.enabled, counts.disabled
    ));
    if !state.selected.is_empty() {
        parts.push(format!("{} selected", state.selected.len()));
    }
    parts.join(" | ")
}

fn status_text(view_data: &ViewData) -> String {
    if view_data.loading {
        return "loading entities...".to_owned();
    }
    if let Some(input) = &view_data.input {
        return format!("{}: {}_", input.kind.title(), input.buffer);
    }
    let hints = "j/k move | enter expand/select | e/d enable/disable | E/D bulk | / search | v view | o domain | u/U undo/redo | ? help | q quit";
    match &view_data.status {
        Some(notification) => {
            let action = notification
                .action
                .as_ref()
                .map(|action| format!(" (u: {})", action.text.to_lowercase()))
                .unwrap_or_default();
            format!("{}{action} | {hints}", notification.message)
        }
        None => hints.to_owned(),
    }
}

fn status_style(view_data: &ViewData) -> Style {
    let color = match view_data.status.as_ref().map(|status| status.level) {
        Some(NoticeLevel::Error) => Color::Red,
        Some(NoticeLevel::Warning) => Color::Yellow,
        Some(NoticeLevel::Success) => Color::Green,
        Some(NoticeLevel::Info) | None => Color::Gray,
    };
    Style::default().fg(color)
}

fn render<G: Gateway>(frame: &mut ratatui::Frame<'_>, panel: &Panel<G>, view_data: &ViewData) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(1),
            Constraint::Length(3),
        ])
        .split(frame.area());

    let view = panel.view();
    let header = Paragraph::new(header_text(&view, panel.state()))
        .block(Block::default().title("entman").borders(Borders::ALL));
    frame.render_widget(header, layout[0]);

    let rows = tree_rows(&view, panel.state(), panel.extras());
    if rows.is_empty() {
        let message = if view_data.loading {
            "loading..."
        } else {
            "no entities match the current filters"
        };
        let empty = Paragraph::new(message)
            .block(Block::default().borders(Borders::ALL).title("entities"));
        frame.render_widget(empty, layout[1]);
    } else {
        let items: Vec<ListItem<'_>> = rows
            .iter()
            .map(|row| {
                let mut style = Style::default();
                if row.disabled {
                    style = style.fg(Color::DarkGray);
                }
                if row.selected {
                    style = style.fg(Color::Cyan);
                }
                if row.depth == 0 {
                    style = style.add_modifier(Modifier::BOLD);
                }
                ListItem::new(Line::from(vec![
                    Span::raw("  ".repeat(row.depth)),
                    Span::styled(row.text.clone(), style),
                ]))
            })
            .collect();
        let list = List::new(items)
            .block(Block::default().borders(Borders::ALL).title("entities"))
            .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
        let mut list_state = ListState::default().with_selected(Some(view_data.cursor));
        frame.render_stateful_widget(list, layout[1], &mut list_state);
    }

    let status = Paragraph::new(status_text(view_data))
        .style(status_style(view_data))
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(status, layout[2]);

    if panel.state().menu_open {
        render_overlay(frame, "menu", &menu_text(panel), 50, 50);
    }
    if let Some(prompt) = &view_data.confirm {
        let text = format!("{}\n\ny: confirm | n: cancel", prompt.message());
        render_overlay(frame, "confirm", &text, 50, 25);
    }
    if view_data.activity_visible {
        render_overlay(frame, "activity", &activity_text(panel.extras()), 70, 60);
    }
    if view_data.help_visible {
        render_overlay(frame, "help", help_overlay_text(), 80, 72);
    }
}

fn render_overlay(
    frame: &mut ratatui::Frame<'_>,
    title: &str,
    text: &str,
    percent_x: u16,
    percent_y: u16,
) {
    let area = centered_rect(percent_x, percent_y, frame.area());
    frame.render_widget(Clear, area);
    let body = Paragraph::new(text.to_owned())
        .wrap(Wrap { trim: false })
        .block(Block::default().title(title.to_owned()).borders(Borders::ALL));
    frame.render_widget(body, area);
}

fn menu_text<G: Gateway>(panel: &Panel<G>) -> String {
    let history = panel.history();
    let mut lines = vec![
        format!(
            "undo: {} step(s) | redo: {} step(s)",
            history.undo_len(),
            history.redo_len()
        ),
        format!("selected: {}", panel.state().selected.len()),
        String::new(),
        "presets:".to_owned(),
    ];
    if panel.extras().presets.is_empty() {
        lines.push("  (none; press p to save the current filters)".to_owned());
    }
    for preset in &panel.extras().presets {
        lines.push(format!(
            "  {} -- view {}, domain {}, search {:?}{}",
            preset.name,
            preset.view_state.as_str(),
            preset.domain.as_deref().unwrap_or("all"),
            preset.search_term,
            if preset.favorites_only {
                ", favorites only"
            } else {
                ""
            }
        ));
    }
    let tags = panel.extras().all_tags();
    if !tags.is_empty() {
        lines.push(String::new());
        lines.push(format!("tags: {}", tags.join(", ")));
    }
    lines.join("\n")
}

fn activity_text(extras: &Extras) -> String {
    if extras.activity.is_empty() {
        return "no activity yet".to_owned();
    }
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    extras
        .activity
        .iter()
        .rev()
        .map(|entry| {
            let at = entry
                .at
                .format(format)
                .unwrap_or_else(|_| "????-??-?? ??:??:??".to_owned());
            format!("{at}  {:<12} {}", entry.kind.as_str(), entry.detail)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn help_overlay_text() -> &'static str {
    "global: q quit | ctrl+c quit | ? help | esc close/clear selection\n\
nav: j/k up/down | g/G top/bottom | enter/space expand or select | c collapse all\n\
state: e enable row | d disable row (groups confirm) | E/D bulk enable/disable selection\n\
select: A all visible | x clear\n\
filters: / search | v view state | o domain | F favorites only | T cycle tag\n\
marks: f favorite | t tag (-tag removes) | a alias\n\
entity: R rename id | B bulk rename ids | n display name | X remove from registry\n\
presets: p save | P cycle | m menu\n\
history: u undo | U redo | L activity log | r refresh"
}

/// Plain-text rendering of a computed view, one line per row.
pub fn render_list(view: &PanelView, extras: &Extras) -> String {
    let mut lines = Vec::new();
    for integration in &view.integrations {
        lines.push(integration.integration.clone());
        for device in &integration.devices {
            lines.push(format!("  {}", device.name));
            for entity in &device.entities {
                lines.push(format!("    {}", entity_text(entity, extras, false)));
            }
        }
    }
    let counts = view.counts;
    lines.push(format!(
        "{} entities ({} enabled, {} disabled)",
        counts.entities, counts.enabled, counts.disabled
    ));
    lines.join("\n")
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::{
        AppRuntime, InputKind, InternalEvent, RowTarget, ViewData, handle_key_event,
        help_overlay_text, process_internal_events, render_list, status_text, tree_rows,
    };
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use entman_app::{
        DeviceId, EntityId, Extras, GatewayError, NoticeLevel, Panel, StateFilter,
    };
    use entman_testkit::{GatewayCall, MemoryGateway, hue_fixture, mixed_fixture};
    use std::sync::mpsc;

    #[derive(Debug, Default)]
    struct TestRuntime {
        saved: Vec<Extras>,
        fail: bool,
    }

    impl AppRuntime for TestRuntime {
        fn save_extras(&mut self, extras: &Extras) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("disk full");
            }
            self.saved.push(extras.clone());
            Ok(())
        }
    }

    fn loaded_panel(gateway: MemoryGateway) -> Panel<MemoryGateway> {
        let mut panel = Panel::new(gateway);
        panel.refresh().expect("initial refresh");
        panel.gateway_mut().clear_calls();
        panel.take_notifications();
        panel
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn internal_tx() -> mpsc::Sender<InternalEvent> {
        let (tx, _rx) = mpsc::channel();
        tx
    }

    fn run_keys(
        panel: &mut Panel<MemoryGateway>,
        runtime: &mut TestRuntime,
        view_data: &mut ViewData,
        keys: &[KeyCode],
    ) -> bool {
        let tx = internal_tx();
        let mut quit = false;
        for code in keys {
            quit = handle_key_event(panel, runtime, view_data, &tx, key(*code));
        }
        quit
    }

    fn expand_hue(panel: &mut Panel<MemoryGateway>) {
        panel.toggle_integration_expanded("hue");
        panel.toggle_device_expanded(&DeviceId::new("device_1"));
    }

    #[test]
    fn tree_starts_collapsed() {
        let panel = loaded_panel(MemoryGateway::new(mixed_fixture()));
        let rows = tree_rows(&panel.view(), panel.state(), panel.extras());
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row.depth == 0));
        assert!(rows[0].text.contains("hue (2 entities, 1 disabled)"));
    }

    #[test]
    fn enter_expands_integration_then_device() {
        let mut panel = loaded_panel(MemoryGateway::new(hue_fixture()));
        let mut runtime = TestRuntime::default();
        let mut view_data = ViewData::default();

        run_keys(
            &mut panel,
            &mut runtime,
            &mut view_data,
            &[KeyCode::Enter, KeyCode::Char('j'), KeyCode::Enter],
        );

        let rows = tree_rows(&panel.view(), panel.state(), panel.extras());
        assert_eq!(rows.len(), 4);
        assert_eq!(
            rows[2].target,
            RowTarget::Entity(EntityId::new("light.living_room"))
        );
        assert_eq!(rows[3].depth, 2);
    }

    #[test]
    fn space_toggles_entity_selection() {
        let mut panel = loaded_panel(MemoryGateway::new(hue_fixture()));
        expand_hue(&mut panel);
        let mut runtime = TestRuntime::default();
        let mut view_data = ViewData {
            cursor: 3,
            ..ViewData::default()
        };

        run_keys(&mut panel, &mut runtime, &mut view_data, &[KeyCode::Char(' ')]);
        assert!(panel.state().is_selected(&EntityId::new("light.bedroom")));

        run_keys(&mut panel, &mut runtime, &mut view_data, &[KeyCode::Char(' ')]);
        assert!(panel.state().selected.is_empty());
    }

    #[test]
    fn disable_on_integration_waits_for_confirmation() {
        let mut panel = loaded_panel(MemoryGateway::new(hue_fixture()));
        let mut runtime = TestRuntime::default();
        let mut view_data = ViewData::default();

        run_keys(&mut panel, &mut runtime, &mut view_data, &[KeyCode::Char('d')]);
        assert!(view_data.confirm.is_some());
        assert_eq!(panel.gateway().mutation_count(), 0);

        run_keys(&mut panel, &mut runtime, &mut view_data, &[KeyCode::Char('n')]);
        assert!(view_data.confirm.is_none());
        assert_eq!(panel.gateway().mutation_count(), 0);

        run_keys(
            &mut panel,
            &mut runtime,
            &mut view_data,
            &[KeyCode::Char('d'), KeyCode::Char('y')],
        );
        assert_eq!(
            panel.gateway().calls()[0],
            GatewayCall::BulkDisable(vec![
                EntityId::new("light.living_room"),
                EntityId::new("light.bedroom"),
            ])
        );
        assert_eq!(
            view_data.status.as_ref().map(|status| status.level),
            Some(NoticeLevel::Success)
        );
    }

    #[test]
    fn bulk_enable_without_selection_reports_error() {
        let mut panel = loaded_panel(MemoryGateway::new(hue_fixture()));
        let mut runtime = TestRuntime::default();
        let mut view_data = ViewData::default();

        run_keys(&mut panel, &mut runtime, &mut view_data, &[KeyCode::Char('E')]);

        assert!(panel.gateway().calls().is_empty());
        let status = view_data.status.as_ref().expect("status shown");
        assert_eq!(status.level, NoticeLevel::Error);
        assert_eq!(status.message, "No entities selected");
    }

    #[test]
    fn search_input_filters_live_and_escape_restores() {
        let mut panel = loaded_panel(MemoryGateway::new(mixed_fixture()));
        let mut runtime = TestRuntime::default();
        let mut view_data = ViewData::default();

        run_keys(
            &mut panel,
            &mut runtime,
            &mut view_data,
            &[
                KeyCode::Char('/'),
                KeyCode::Char('g'),
                KeyCode::Char('a'),
                KeyCode::Char('r'),
            ],
        );
        assert_eq!(
            view_data.input.as_ref().map(|input| input.kind),
            Some(InputKind::Search)
        );
        assert_eq!(panel.view().integrations.len(), 1);

        run_keys(&mut panel, &mut runtime, &mut view_data, &[KeyCode::Esc]);
        assert!(view_data.input.is_none());
        assert_eq!(panel.state().filters.search_term, "");
        assert_eq!(panel.view().integrations.len(), 3);
    }

    #[test]
    fn view_state_key_cycles() {
        let mut panel = loaded_panel(MemoryGateway::new(hue_fixture()));
        let mut runtime = TestRuntime::default();
        let mut view_data = ViewData::default();

        run_keys(&mut panel, &mut runtime, &mut view_data, &[KeyCode::Char('v')]);
        assert_eq!(panel.state().filters.view_state, StateFilter::Enabled);
        run_keys(&mut panel, &mut runtime, &mut view_data, &[KeyCode::Char('v')]);
        assert_eq!(panel.state().filters.view_state, StateFilter::Disabled);
    }

    #[test]
    fn favorite_key_persists_extras() {
        let mut panel = loaded_panel(MemoryGateway::new(hue_fixture()));
        expand_hue(&mut panel);
        let mut runtime = TestRuntime::default();
        let mut view_data = ViewData {
            cursor: 2,
            saved_revision: panel.extras().revision(),
            ..ViewData::default()
        };

        run_keys(&mut panel, &mut runtime, &mut view_data, &[KeyCode::Char('f')]);

        assert_eq!(runtime.saved.len(), 1);
        assert!(runtime.saved[0].is_favorite(&EntityId::new("light.living_room")));
        assert_eq!(view_data.saved_revision, panel.extras().revision());
    }

    #[test]
    fn failed_save_shows_error_status() {
        let mut panel = loaded_panel(MemoryGateway::new(hue_fixture()));
        expand_hue(&mut panel);
        let mut runtime = TestRuntime {
            fail: true,
            ..TestRuntime::default()
        };
        let mut view_data = ViewData {
            cursor: 2,
            ..ViewData::default()
        };

        run_keys(&mut panel, &mut runtime, &mut view_data, &[KeyCode::Char('f')]);

        let status = view_data.status.as_ref().expect("status shown");
        assert_eq!(status.level, NoticeLevel::Error);
        assert!(status.message.contains("disk full"));
    }

    #[test]
    fn rename_prompt_is_prefilled_and_submits() {
        let mut panel = loaded_panel(MemoryGateway::new(hue_fixture()));
        expand_hue(&mut panel);
        let mut runtime = TestRuntime::default();
        let mut view_data = ViewData {
            cursor: 3,
            ..ViewData::default()
        };

        run_keys(&mut panel, &mut runtime, &mut view_data, &[KeyCode::Char('R')]);
        assert_eq!(
            view_data.input.as_ref().map(|input| input.buffer.as_str()),
            Some("light.bedroom")
        );

        let mut keys = vec![KeyCode::Backspace; "bedroom".len()];
        keys.extend("guest".chars().map(KeyCode::Char));
        keys.push(KeyCode::Enter);
        run_keys(&mut panel, &mut runtime, &mut view_data, &keys);

        assert!(panel.dataset().find(&EntityId::new("light.guest")).is_some());
    }

    #[test]
    fn remove_key_confirms_before_calling_the_host() {
        let mut panel = loaded_panel(MemoryGateway::new(hue_fixture()));
        expand_hue(&mut panel);
        let mut runtime = TestRuntime::default();
        let mut view_data = ViewData {
            cursor: 3,
            ..ViewData::default()
        };

        run_keys(&mut panel, &mut runtime, &mut view_data, &[KeyCode::Char('X')]);
        assert!(
            view_data
                .confirm
                .as_ref()
                .is_some_and(|prompt| prompt.message().starts_with("Remove light.bedroom"))
        );
        assert_eq!(panel.gateway().mutation_count(), 0);

        run_keys(&mut panel, &mut runtime, &mut view_data, &[KeyCode::Char('y')]);
        assert_eq!(
            panel.gateway().calls()[0],
            GatewayCall::Remove(EntityId::new("light.bedroom"))
        );
        assert!(panel.dataset().find(&EntityId::new("light.bedroom")).is_none());
        assert_eq!(runtime.saved.len(), 1);
    }

    #[test]
    fn bulk_rename_asks_find_then_replace_then_confirms() {
        let mut panel = loaded_panel(MemoryGateway::new(hue_fixture()));
        let mut runtime = TestRuntime::default();
        let mut view_data = ViewData::default();

        let mut keys = vec![KeyCode::Char('B')];
        keys.extend("ROOM".chars().map(KeyCode::Char));
        keys.push(KeyCode::Enter);
        run_keys(&mut panel, &mut runtime, &mut view_data, &keys);
        assert_eq!(
            view_data.input.as_ref().map(|input| input.kind),
            Some(InputKind::RenameReplace)
        );

        let mut keys: Vec<KeyCode> = "space".chars().map(KeyCode::Char).collect();
        keys.push(KeyCode::Enter);
        run_keys(&mut panel, &mut runtime, &mut view_data, &keys);
        assert!(
            view_data
                .confirm
                .as_ref()
                .is_some_and(|prompt| prompt.renames().len() == 2)
        );
        assert_eq!(panel.gateway().mutation_count(), 0);

        run_keys(&mut panel, &mut runtime, &mut view_data, &[KeyCode::Char('y')]);
        assert!(panel.dataset().find(&EntityId::new("light.living_space")).is_some());
        assert!(panel.dataset().find(&EntityId::new("light.bedspace")).is_some());
        assert_eq!(
            view_data.status.as_ref().map(|status| status.message.as_str()),
            Some("Renamed 2 entities")
        );
    }

    #[test]
    fn undo_key_reverts_last_change() {
        let mut panel = loaded_panel(MemoryGateway::new(hue_fixture()));
        expand_hue(&mut panel);
        let mut runtime = TestRuntime::default();
        let mut view_data = ViewData {
            cursor: 3,
            ..ViewData::default()
        };

        run_keys(
            &mut panel,
            &mut runtime,
            &mut view_data,
            &[KeyCode::Char('e'), KeyCode::Char('u')],
        );

        let bedroom = panel
            .dataset()
            .find(&EntityId::new("light.bedroom"))
            .expect("entity");
        assert!(bedroom.is_disabled);
        assert!(panel.history().can_redo());
    }

    #[test]
    fn transport_errors_surface_in_status() {
        let mut panel = loaded_panel(MemoryGateway::new(hue_fixture()));
        panel
            .gateway_mut()
            .fail_next(GatewayError::Transport("socket closed".to_owned()));
        let mut runtime = TestRuntime::default();
        let mut view_data = ViewData::default();

        run_keys(&mut panel, &mut runtime, &mut view_data, &[KeyCode::Char('r')]);

        let status = view_data.status.as_ref().expect("status shown");
        assert_eq!(status.level, NoticeLevel::Error);
        assert!(status.message.contains("socket closed"));
    }

    #[test]
    fn q_quits_but_not_inside_prompts() {
        let mut panel = loaded_panel(MemoryGateway::new(hue_fixture()));
        let mut runtime = TestRuntime::default();
        let mut view_data = ViewData::default();

        assert!(!run_keys(
            &mut panel,
            &mut runtime,
            &mut view_data,
            &[KeyCode::Char('/'), KeyCode::Char('q')]
        ));
        assert_eq!(panel.state().filters.search_term, "q");
        assert!(run_keys(
            &mut panel,
            &mut runtime,
            &mut view_data,
            &[KeyCode::Esc, KeyCode::Char('q')]
        ));
    }

    #[test]
    fn stale_status_clear_is_ignored() {
        let mut view_data = ViewData {
            status_token: 2,
            status: Some(entman_app::Notification::new(NoticeLevel::Info, "hello")),
            ..ViewData::default()
        };
        let (tx, rx) = mpsc::channel();
        tx.send(InternalEvent::ClearStatus { token: 1 })
            .expect("send");
        process_internal_events(&mut view_data, &rx);
        assert!(view_data.status.is_some());

        tx.send(InternalEvent::ClearStatus { token: 2 })
            .expect("send");
        process_internal_events(&mut view_data, &rx);
        assert!(view_data.status.is_none());
    }

    #[test]
    fn status_text_shows_prompt_and_undo_hint() {
        let mut panel = loaded_panel(MemoryGateway::new(hue_fixture()));
        panel
            .enable_entity(&EntityId::new("light.bedroom"))
            .expect("enable");
        let mut view_data = ViewData::default();
        view_data.status = panel.take_notifications().pop();

        let text = status_text(&view_data);
        assert!(text.starts_with("Enabled light.bedroom (u: undo)"));

        view_data.loading = true;
        assert_eq!(status_text(&view_data), "loading entities...");
    }

    #[test]
    fn render_list_prints_tree_and_counts() {
        let panel = loaded_panel(MemoryGateway::new(hue_fixture()));
        let text = render_list(&panel.view(), panel.extras());
        assert_eq!(
            text,
            "hue\n  device_1\n    [ ] light.living_room  Living Room\n    [ ] light.bedroom  Bedroom  [disabled]\n2 entities (1 enabled, 1 disabled)"
        );
    }

    #[test]
    fn help_lists_every_binding_group() {
        let help = help_overlay_text();
        for needle in ["undo", "rename", "presets", "favorite", "bulk"] {
            assert!(help.contains(needle), "missing {needle}");
        }
    }
}
