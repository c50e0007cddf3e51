//! User-facing actions on top of the engine.

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;

use crate::engine::{BulkStep, Engine};
use crate::filter::FilterState;
use crate::ident::{self, ItemId};
use crate::opener::OpenedVia;
use crate::presets::Preset;
use crate::scheduler::TimerKey;
use crate::state::LastOpened;
use crate::view::{ControlKind, NodeId, PageRequest};

const CURSOR_CLASS: &str = "ezam-row-selected";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Primary,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Down,
    Up,
    Enter { shift: bool },
    /// Alt+Left.
    PrevPage,
    /// Alt+Right.
    NextPage,
}

/// State of the floating toolbar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolbar {
    pub minimized: bool,
    pub toggle_label: String,
    pub selected_label: String,
}

/// What activating a control or row led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    Opened(OpenedVia),
    Starred(bool),
    Selected(bool),
    Copied(String),
    Expanded(bool),
    Ignored,
}

impl Engine {
    /// Opens one row's item. `background` overrides the setting.
    pub fn open_row(&mut self, node: NodeId, background: Option<bool>) -> Option<OpenedVia> {
        let item = self.sync.item(node)?.clone();
        let background = background.unwrap_or(self.settings.open_in_background);
        self.save_scroll_state();
        match self.opener.open(&item.url, background, false) {
            Ok(via) => {
                debug!(id = %item.id, ?via, "opened");
                self.record_open(&item.id, &item.title, &item.url);
                Some(via)
            }
            Err(reason) => {
                warn!(id = %item.id, %reason, "open refused");
                let message = self.labels.t("openFailed", "Could not open the offer");
                self.toast(message);
                None
            }
        }
    }

    fn record_open(&mut self, id: &ItemId, title: &str, url: &Url) {
        self.state.mark_visited(id);
        self.state.set_last_opened(LastOpened {
            id: id.clone(),
            title: title.to_string(),
            url: url.to_string(),
            opened_at: Utc::now(),
        });
        if let Some(node) = self.sync.node_for(id) {
            self.refresh_rows(&[node]);
        }
    }

    /// Row-level click handling, gated by the click settings.
    pub fn click_row(&mut self, node: NodeId, button: MouseButton) -> Activation {
        let opened = match button {
            MouseButton::Primary if self.settings.row_click_open => self.open_row(node, None),
            MouseButton::Middle if self.settings.enable_middle_click => self.open_row(node, Some(true)),
            _ => return Activation::Ignored,
        };
        opened.map(Activation::Opened).unwrap_or(Activation::Ignored)
    }

    pub fn activate(&mut self, node: NodeId, kind: ControlKind) -> Activation {
        let Some(id) = self.sync.item(node).map(|item| item.id.clone()) else {
            return Activation::Ignored;
        };
        match kind {
            ControlKind::OpenLink => self
                .open_row(node, None)
                .map(Activation::Opened)
                .unwrap_or(Activation::Ignored),
            ControlKind::Star => Activation::Starred(self.toggle_star(&id)),
            ControlKind::Select => Activation::Selected(self.toggle_select(&id)),
            ControlKind::CopyId | ControlKind::CopyLink => self
                .copy(node, kind)
                .map(Activation::Copied)
                .unwrap_or(Activation::Ignored),
            ControlKind::ExpandToggle => {
                match self.with_sync(|sync, cx| sync.toggle_details(node, cx)) {
                    Some(open) => Activation::Expanded(open),
                    None => Activation::Ignored,
                }
            }
            ControlKind::Note | ControlKind::ClosingSoonBadge | ControlKind::NewBadge => {
                Activation::Ignored
            }
        }
    }

    /// Flips the star and re-renders the row if it is on screen.
    pub fn toggle_star(&mut self, id: &ItemId) -> bool {
        let starred = self.state.toggle_starred(id);
        if let Some(node) = self.sync.node_for(id) {
            self.refresh_rows(&[node]);
        }
        starred
    }

    pub fn toggle_select(&mut self, id: &ItemId) -> bool {
        let selected = self.state.toggle_selected(id);
        if let Some(node) = self.sync.node_for(id) {
            self.refresh_rows(&[node]);
        }
        selected
    }

    pub fn select(&mut self, id: &ItemId) -> bool {
        let added = self.state.select(id);
        if let Some(node) = self.sync.node_for(id) {
            self.refresh_rows(&[node]);
        }
        added
    }

    /// Selects every visible row, in listing order.
    pub fn select_all(&mut self) -> usize {
        let visible: Vec<(NodeId, ItemId)> = self
            .items()
            .into_iter()
            .filter(|(node, _)| self.view.row(*node).is_some_and(|row| !row.is_hidden()))
            .map(|(node, item)| (node, item.id.clone()))
            .collect();
        for (_, id) in &visible {
            self.state.select(id);
        }
        let nodes: Vec<NodeId> = visible.iter().map(|(node, _)| *node).collect();
        self.refresh_rows(&nodes);
        self.state.selected().len()
    }

    pub fn clear_selection(&mut self) {
        let nodes: Vec<NodeId> = self
            .state
            .selected()
            .iter()
            .filter_map(|id| self.sync.node_for(id))
            .collect();
        self.state.clear_selection();
        self.refresh_rows(&nodes);
    }

    pub fn selection_label(&self) -> String {
        self.labels.translate(
            "selectedCount",
            "Selected: {count}",
            &[("count", self.state.selected().len().to_string())],
        )
    }

    /// Opens every selected item in pick order, one per bulk delay. All but
    /// the last open in the background; the last one becomes the active tab
    /// unless background opening is on. A new batch replaces a running one.
    pub fn open_selected(&mut self) -> usize {
        let base = self.sync.options().base.clone();
        let mut steps: Vec<BulkStep> = Vec::new();
        for id in self.state.selected() {
            let Some(url) = ident::offer_url(&base, id) else {
                continue;
            };
            if !self.opener.gate().is_trusted_url(url.as_str()) {
                warn!(%id, "skipping untrusted destination");
                continue;
            }
            let title = self
                .sync
                .node_for(id)
                .and_then(|node| self.sync.item(node))
                .map(|item| item.title.clone())
                .unwrap_or_default();
            steps.push(BulkStep {
                id: id.clone(),
                url,
                title,
                active: false,
            });
        }
        if let Some(last) = steps.last_mut() {
            last.active = !self.settings.open_in_background;
        }

        let count = steps.len();
        self.save_scroll_state();
        self.timers.cancel(&TimerKey::BulkOpen);
        self.bulk = steps.into();
        if count > 0 {
            info!(count, delay = ?self.bulk_delay, "bulk open started");
            self.bulk_step();
        }
        count
    }

    pub(crate) fn bulk_step(&mut self) {
        let Some(step) = self.bulk.pop_front() else {
            return;
        };
        match self.opener.open(&step.url, true, step.active) {
            Ok(via) => {
                debug!(id = %step.id, ?via, active = step.active, "bulk open");
                self.record_open(&step.id, &step.title, &step.url);
            }
            Err(reason) => warn!(id = %step.id, %reason, "bulk open refused"),
        }
        if self.bulk.is_empty() {
            info!("bulk open finished");
        } else {
            self.timers
                .schedule(TimerKey::BulkOpen, self.now + self.bulk_delay);
        }
    }

    pub fn is_bulk_open_running(&self) -> bool {
        !self.bulk.is_empty()
    }

    /// Keystroke in a row's note field; persisted after a quiet period.
    pub fn note_input(&mut self, node: NodeId, text: &str) -> bool {
        let Some(id) = self.sync.item(node).map(|item| item.id.clone()) else {
            return false;
        };
        self.drafts.input(&id, text);
        if let Some(due) = self.drafts.schedule(&id, self.now) {
            self.timers.schedule(TimerKey::NoteFlush(id), due);
        }
        true
    }

    /// Focus left the note field: persist right away.
    pub fn note_blur(&mut self, node: NodeId) {
        let Some(id) = self.sync.item(node).map(|item| item.id.clone()) else {
            return;
        };
        self.timers.cancel(&TimerKey::NoteFlush(id.clone()));
        if let Some(text) = self.drafts.flush(&id) {
            self.commit_note(&id, &text);
        }
    }

    pub(crate) fn flush_due_note(&mut self, id: &ItemId) {
        if let Some(text) = self.drafts.take_due(id, self.now) {
            self.commit_note(id, &text);
        }
    }

    /// Writes a note directly, bypassing the draft buffer.
    pub fn set_note(&mut self, id: &ItemId, text: &str) -> String {
        self.commit_note(id, text)
    }

    fn commit_note(&mut self, id: &ItemId, text: &str) -> String {
        let kept = self.state.set_note(id, text);
        if kept.chars().count() < text.chars().count() {
            debug!(%id, max = self.state.note_max_len(), "note truncated");
        }
        if let Some(node) = self.sync.node_for(id) {
            self.refresh_rows(&[node]);
        }
        kept
    }

    /// Moves the keyboard cursor or opens the row under it.
    pub fn key(&mut self, key: Key) -> Option<NodeId> {
        if !self.settings.keyboard_nav {
            return None;
        }
        match key {
            Key::Down => self.move_cursor(1),
            Key::Up => self.move_cursor(-1),
            Key::Enter { shift } => {
                let node = self.cursor?;
                self.open_row(node, shift.then_some(true));
                Some(node)
            }
            Key::PrevPage => {
                self.turn_page(false);
                None
            }
            Key::NextPage => {
                self.turn_page(true);
                None
            }
        }
    }

    /// Clicks the pager's previous or next link unless it is disabled.
    pub fn turn_page(&mut self, forward: bool) -> bool {
        let Some(pager) = self.view.pagination() else {
            return false;
        };
        let disabled = if forward {
            pager.next_disabled
        } else {
            pager.prev_disabled
        };
        if disabled {
            return false;
        }
        let request = if forward {
            PageRequest::Next
        } else {
            PageRequest::Prev
        };
        debug!(?request, "page change");
        self.view.request_page(request);
        true
    }

    pub fn toolbar(&self) -> Option<Toolbar> {
        if !self.settings.show_mini_toolbar {
            return None;
        }
        let minimized = self.settings.toolbar_minimized;
        let toggle_label = if minimized {
            self.labels.t("toolbarExpand", "Show toolbar")
        } else {
            self.labels.t("toolbarMinimize", "Hide toolbar")
        };
        Some(Toolbar {
            minimized,
            toggle_label,
            selected_label: self.selection_label(),
        })
    }

    /// Minimizes or expands the toolbar and persists the choice.
    pub fn toggle_toolbar(&mut self) -> Option<bool> {
        if !self.settings.show_mini_toolbar {
            return None;
        }
        let minimized = !self.settings.toolbar_minimized;
        self.update_settings(&json!({ "toolbarMinimized": minimized }));
        Some(minimized)
    }

    fn visible_nodes(&self) -> Vec<NodeId> {
        self.items()
            .into_iter()
            .map(|(node, _)| node)
            .filter(|node| self.view.row(*node).is_some_and(|row| !row.is_hidden()))
            .collect()
    }

    fn move_cursor(&mut self, delta: isize) -> Option<NodeId> {
        let nodes = self.visible_nodes();
        if nodes.is_empty() {
            return None;
        }
        let next = match self.cursor.and_then(|node| nodes.iter().position(|n| *n == node)) {
            Some(at) => (at as isize + delta).clamp(0, nodes.len() as isize - 1) as usize,
            None if delta < 0 => nodes.len() - 1,
            None => 0,
        };
        self.place_cursor(nodes[next]);
        Some(nodes[next])
    }

    fn place_cursor(&mut self, node: NodeId) {
        let previous = self.cursor.replace(node);
        self.with_sync(|sync, cx| sync.move_marker(CURSOR_CLASS, previous, node, cx));
    }

    /// Moves the cursor to the first row whose id or title contains `query`.
    pub fn quick_jump(&mut self, query: &str) -> Option<NodeId> {
        if !self.settings.quick_jump {
            return None;
        }
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        let found = self.items().into_iter().find_map(|(node, item)| {
            let hit = item.id.as_str().to_lowercase().contains(&needle)
                || item.title.to_lowercase().contains(&needle);
            hit.then_some(node)
        });
        match found {
            Some(node) => {
                self.place_cursor(node);
                Some(node)
            }
            None => {
                let message = self.labels.t("rowNotFound", "Row not found");
                self.toast(message);
                None
            }
        }
    }

    pub fn jump_to_last_opened(&mut self) -> Option<NodeId> {
        let node = self
            .state
            .last_opened()
            .and_then(|record| self.sync.node_for(&record.id));
        match node {
            Some(node) => {
                self.place_cursor(node);
                Some(node)
            }
            None => {
                let message = self.labels.t("rowNotFound", "Row not found");
                self.toast(message);
                None
            }
        }
    }

    /// Text a copy control would put on the clipboard.
    pub fn copy(&mut self, node: NodeId, kind: ControlKind) -> Option<String> {
        let item = self.sync.item(node)?;
        let (text, message) = match kind {
            ControlKind::CopyId => (item.id.to_string(), self.labels.t("idCopied", "ID copied")),
            ControlKind::CopyLink => (item.url.to_string(), self.labels.t("linkCopied", "Link copied")),
            _ => return None,
        };
        if self.settings.show_copy_toast {
            self.toast(message);
        }
        Some(text)
    }

    pub fn set_filter(&mut self, filter: FilterState) {
        if self.settings.remember_filters {
            self.presets.remember_fields(&filter.to_fields());
        }
        self.filter.set_state(filter);
        self.with_sync(|sync, cx| sync.apply_filter(cx));
    }

    pub fn clear_filters(&mut self) {
        self.set_filter(FilterState::default());
    }

    pub fn save_preset(&mut self, name: &str) {
        let fields = self.filter.state().to_fields();
        self.presets.save(name, fields);
        info!(name, "filter preset saved");
    }

    pub fn presets(&self) -> &[Preset] {
        self.presets.list()
    }

    pub fn apply_preset(&mut self, name: &str) -> bool {
        let Some(preset) = self.presets.get(name) else {
            return false;
        };
        let filter = FilterState::from_fields(&preset.values);
        self.set_filter(filter);
        true
    }
}
