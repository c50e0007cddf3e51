//! In-memory model of the host listing: rows the host renders and replaces at
//! will, plus whatever the engine attaches to them.
//!
//! Every change is appended to a mutation log that plays the role of the
//! host's change observer. Records carry their origin: while the engine holds
//! a [`WriteToken`] open, everything it touches is stamped with that token so
//! the observer side can drop its own echoes.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WriteToken(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Host,
    Engine(WriteToken),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    Added,
    Removed,
    Children,
    Attribute(String),
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub kind: MutationKind,
    pub origin: Origin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ControlKind {
    OpenLink,
    Select,
    Star,
    Note,
    CopyId,
    CopyLink,
    ExpandToggle,
    ClosingSoonBadge,
    NewBadge,
}

/// Where a control sits: inside the row's last cell or in the expandable
/// details strip under the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Cell,
    Details,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlValue {
    None,
    Checked(bool),
    Text(String),
    Href(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub kind: ControlKind,
    pub slot: Slot,
    pub label: String,
    pub value: ControlValue,
    /// Event handlers wired to this control instance.
    pub handlers: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listener {
    Click,
    AuxClick,
}

/// The host's pager under the listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pagination {
    /// Page link labels in display order.
    pub pages: Vec<String>,
    pub active: Option<usize>,
    pub prev_disabled: bool,
    pub next_disabled: bool,
}

impl Pagination {
    pub fn active_label(&self) -> Option<&str> {
        self.active
            .and_then(|index| self.pages.get(index))
            .map(|label| label.trim())
    }
}

/// A pager link the engine clicked; the host performs the navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    Prev,
    Next,
    Page(String),
}

#[derive(Debug, Clone)]
pub struct Row {
    id: NodeId,
    classes: BTreeSet<String>,
    cells: Vec<String>,
    data: BTreeMap<String, String>,
    controls: Vec<Control>,
    listeners: Vec<Listener>,
    hidden: bool,
    details_open: bool,
}

impl Row {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn cells(&self) -> &[String] {
        &self.cells
    }

    pub fn text(&self) -> String {
        self.cells.join(" ")
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.contains(class)
    }

    pub fn data(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    pub fn control(&self, kind: ControlKind) -> Option<&Control> {
        self.controls.iter().find(|control| control.kind == kind)
    }

    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn details_open(&self) -> bool {
        self.details_open
    }
}

#[derive(Debug, Default)]
pub struct ListingView {
    rows: Vec<Row>,
    next_id: u64,
    records: Vec<MutationRecord>,
    writer: Option<WriteToken>,
    root_classes: BTreeSet<String>,
    viewport_width: u32,
    scroll_y: f64,
    pagination: Option<Pagination>,
    page_requests: Vec<PageRequest>,
}

impl ListingView {
    pub fn new() -> Self {
        Self::default()
    }

    fn origin(&self) -> Origin {
        match self.writer {
            Some(token) => Origin::Engine(token),
            None => Origin::Host,
        }
    }

    fn record(&mut self, target: NodeId, kind: MutationKind) {
        let origin = self.origin();
        self.records.push(MutationRecord {
            target,
            kind,
            origin,
        });
    }

    fn row_mut(&mut self, node: NodeId) -> Option<&mut Row> {
        self.rows.iter_mut().find(|row| row.id == node)
    }

    pub(crate) fn begin_writes(&mut self, token: WriteToken) {
        self.writer = Some(token);
    }

    pub(crate) fn end_writes(&mut self) {
        self.writer = None;
    }

    /// Hands over every record produced since the last call.
    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.records)
    }

    pub fn has_pending_records(&self) -> bool {
        !self.records.is_empty()
    }

    // Host side.

    pub fn insert_row(&mut self, classes: &[&str], cells: Vec<String>) -> NodeId {
        let index = self.rows.len();
        self.insert_row_at(index, classes, cells)
    }

    pub fn insert_row_at(&mut self, index: usize, classes: &[&str], cells: Vec<String>) -> NodeId {
        self.next_id += 1;
        let id = NodeId(self.next_id);
        let row = Row {
            id,
            classes: classes.iter().map(|class| class.to_string()).collect(),
            cells,
            data: BTreeMap::new(),
            controls: Vec::new(),
            listeners: Vec::new(),
            hidden: false,
            details_open: false,
        };
        let index = index.min(self.rows.len());
        self.rows.insert(index, row);
        self.record(id, MutationKind::Added);
        id
    }

    pub fn remove_row(&mut self, node: NodeId) -> bool {
        let Some(index) = self.index_of(node) else {
            return false;
        };
        self.rows.remove(index);
        self.record(node, MutationKind::Removed);
        true
    }

    /// Swaps a row for a freshly rendered element with the given content, the
    /// way the host re-renders a list section. Identity may survive, the
    /// element does not.
    pub fn replace_row(&mut self, node: NodeId, classes: &[&str], cells: Vec<String>) -> Option<NodeId> {
        let index = self.index_of(node)?;
        self.remove_row(node);
        Some(self.insert_row_at(index, classes, cells))
    }

    pub fn set_cell(&mut self, node: NodeId, index: usize, text: &str) -> bool {
        let Some(row) = self.row_mut(node) else {
            return false;
        };
        if row.cells.len() <= index {
            row.cells.resize(index + 1, String::new());
        }
        row.cells[index] = text.to_string();
        self.record(node, MutationKind::Text);
        true
    }

    pub fn clear(&mut self) {
        let ids: Vec<NodeId> = self.rows.iter().map(|row| row.id).collect();
        for id in ids {
            self.remove_row(id);
        }
    }

    pub fn set_viewport_width(&mut self, width: u32) {
        self.viewport_width = width;
    }

    pub fn viewport_width(&self) -> u32 {
        self.viewport_width
    }

    pub fn set_scroll_y(&mut self, y: f64) {
        self.scroll_y = y.max(0.0);
    }

    pub fn scroll_y(&self) -> f64 {
        self.scroll_y
    }

    pub fn set_pagination(&mut self, pagination: Option<Pagination>) {
        self.pagination = pagination;
    }

    pub fn pagination(&self) -> Option<&Pagination> {
        self.pagination.as_ref()
    }

    pub fn active_page(&self) -> Option<&str> {
        self.pagination.as_ref().and_then(Pagination::active_label)
    }

    /// Pager clicks made since the last call.
    pub fn take_page_requests(&mut self) -> Vec<PageRequest> {
        std::mem::take(&mut self.page_requests)
    }

    pub fn toggle_details(&mut self, node: NodeId) -> Option<bool> {
        let row = self.row_mut(node)?;
        row.details_open = !row.details_open;
        let open = row.details_open;
        self.record(node, MutationKind::Attribute("class".into()));
        Some(open)
    }

    // Queries.

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, node: NodeId) -> Option<&Row> {
        self.rows.iter().find(|row| row.id == node)
    }

    pub fn index_of(&self, node: NodeId) -> Option<usize> {
        self.rows.iter().position(|row| row.id == node)
    }

    pub fn matching(&self, class: &str) -> Vec<NodeId> {
        self.rows
            .iter()
            .filter(|row| row.has_class(class))
            .map(|row| row.id)
            .collect()
    }

    pub fn has_root_class(&self, class: &str) -> bool {
        self.root_classes.contains(class)
    }

    // Engine side. Writes that change nothing leave no record.

    pub(crate) fn set_class(&mut self, node: NodeId, class: &str, on: bool) {
        let Some(row) = self.row_mut(node) else {
            return;
        };
        let changed = if on {
            row.classes.insert(class.to_string())
        } else {
            row.classes.remove(class)
        };
        if changed {
            self.record(node, MutationKind::Attribute("class".into()));
        }
    }

    pub(crate) fn set_data(&mut self, node: NodeId, key: &str, value: Option<&str>) {
        let Some(row) = self.row_mut(node) else {
            return;
        };
        let changed = match value {
            Some(value) => row.data.insert(key.to_string(), value.to_string()).as_deref() != Some(value),
            None => row.data.remove(key).is_some(),
        };
        if changed {
            self.record(node, MutationKind::Attribute(format!("data-{key}")));
        }
    }

    pub(crate) fn set_hidden(&mut self, node: NodeId, hidden: bool) {
        let Some(row) = self.row_mut(node) else {
            return;
        };
        if row.hidden != hidden {
            row.hidden = hidden;
            self.record(node, MutationKind::Attribute("hidden".into()));
        }
    }

    pub(crate) fn add_listener(&mut self, node: NodeId, listener: Listener) {
        if let Some(row) = self.row_mut(node) {
            row.listeners.push(listener);
        }
    }

    /// Adds the control, or updates label and value of the existing one of
    /// the same kind in place. A control sitting in the wrong slot is moved.
    pub(crate) fn upsert_control(
        &mut self,
        node: NodeId,
        kind: ControlKind,
        slot: Slot,
        label: String,
        value: ControlValue,
    ) {
        let Some(row) = self.row_mut(node) else {
            return;
        };
        let changed = match row.controls.iter_mut().find(|control| control.kind == kind) {
            Some(existing) if existing.slot == slot => {
                let changed = existing.label != label || existing.value != value;
                existing.label = label;
                existing.value = value;
                changed
            }
            Some(existing) => {
                existing.slot = slot;
                existing.label = label;
                existing.value = value;
                true
            }
            None => {
                row.controls.push(Control {
                    kind,
                    slot,
                    label,
                    value,
                    handlers: 1,
                });
                true
            }
        };
        if changed {
            self.record(node, MutationKind::Children);
        }
    }

    pub(crate) fn remove_controls(&mut self, node: NodeId, keep: impl Fn(&Control) -> bool) {
        let Some(row) = self.row_mut(node) else {
            return;
        };
        let before = row.controls.len();
        row.controls.retain(|control| keep(control));
        if row.controls.len() != before {
            self.record(node, MutationKind::Children);
        }
    }

    pub(crate) fn request_page(&mut self, request: PageRequest) {
        self.page_requests.push(request);
    }

    pub(crate) fn set_root_class(&mut self, class: &str, on: bool) {
        if on {
            self.root_classes.insert(class.to_string());
        } else {
            self.root_classes.remove(class);
        }
    }
}
