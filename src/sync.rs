//! Keeps engine-owned row decorations in step with a listing the host
//! re-renders at will.
//!
//! Rows go `unseen -> augmented`, and a rendering-affecting settings change
//! pushes every tracked row through `stale -> augmented` again. Every pass
//! writes under its own [`WriteToken`]; records carrying an engine token are
//! dropped when the mutation log is drained, so a pass never schedules the
//! next one.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{ColumnLayout, Config};
use crate::filter::FilterEngine;
use crate::i18n::Translator;
use crate::ident::ItemId;
use crate::item::Item;
use crate::note_draft::NoteDrafts;
use crate::scheduler::{TimerKey, Timers};
use crate::settings::{LinkPlacement, Settings};
use crate::state::ItemStateStore;
use crate::view::{
    ControlKind, ControlValue, Listener, ListingView, MutationKind, MutationRecord, NodeId,
    Origin, Slot, WriteToken,
};

pub const BOUND_KEY: &str = "ezamBound";
pub const LINK_ROW_CLASS: &str = "ezam-link-row";
pub const OPENED_CLASS: &str = "ezam-opened";
pub const STARRED_CLASS: &str = "ezam-starred";
pub const SELECTED_CLASS: &str = "ezam-selected";
pub const HIGHLIGHT_ROOT_CLASS: &str = "ezam-highlight";
pub const COMPACT_ROOT_CLASS: &str = "ezam-compact-columns";
pub const STICKY_ROOT_CLASS: &str = "ezam-sticky";
const FREEZE_ROOT_CLASSES: [&str; 2] = ["ezam-freeze-1", "ezam-freeze-2"];

const TOOLTIP_MIN_CHARS: usize = 60;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub base: Url,
    pub row_class: String,
    pub min_cells: usize,
    pub debounce: Duration,
    pub facet_retry_delay: Duration,
    pub facet_retry_cap: u32,
    pub compact_max_width: u32,
    pub resize_debounce: Duration,
    pub columns: ColumnLayout,
}

impl SyncOptions {
    pub fn from_config(cfg: &Config, base: Url) -> Self {
        Self {
            base,
            row_class: cfg.sync.row_class.clone(),
            min_cells: cfg.sync.min_cells,
            debounce: cfg.sync.debounce,
            facet_retry_delay: cfg.sync.facet_retry_delay,
            facet_retry_cap: cfg.sync.facet_retry_cap,
            compact_max_width: cfg.sync.compact_max_width,
            resize_debounce: cfg.sync.resize_debounce,
            columns: cfg.columns,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Augmented,
    Stale,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Full passes over every row.
    pub refreshes: u64,
    pub rebuilds: u64,
    /// Elements that received their one-time listeners.
    pub bound: u64,
    /// Records dropped because the engine wrote them.
    pub echoes: u64,
}

/// Everything a pass reads or writes besides the synchronizer itself.
pub struct Surface<'a> {
    pub view: &'a mut ListingView,
    pub state: &'a ItemStateStore,
    pub settings: &'a Settings,
    pub labels: &'a Translator,
    pub drafts: &'a NoteDrafts,
    pub timers: &'a mut Timers,
    pub filter: &'a mut FilterEngine,
    /// Engine clock.
    pub now: Duration,
    /// Local wall time for date-derived flags.
    pub wall: NaiveDateTime,
}

pub struct LiveViewSynchronizer {
    opts: SyncOptions,
    tracked: BTreeMap<NodeId, Item>,
    stale: BTreeSet<NodeId>,
    next_token: u64,
    retries: u32,
    gave_up: bool,
    compact: bool,
    stats: SyncStats,
}

impl LiveViewSynchronizer {
    pub fn new(opts: SyncOptions) -> Self {
        Self {
            opts,
            tracked: BTreeMap::new(),
            stale: BTreeSet::new(),
            next_token: 0,
            retries: 0,
            gave_up: false,
            compact: false,
            stats: SyncStats::default(),
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.opts
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn is_compact(&self) -> bool {
        self.compact
    }

    pub fn items(&self) -> &BTreeMap<NodeId, Item> {
        &self.tracked
    }

    pub fn item(&self, node: NodeId) -> Option<&Item> {
        self.tracked.get(&node)
    }

    pub fn node_for(&self, id: &ItemId) -> Option<NodeId> {
        self.tracked
            .iter()
            .find(|(_, item)| &item.id == id)
            .map(|(node, _)| *node)
    }

    pub fn phase(&self, node: NodeId) -> Option<Phase> {
        if self.stale.contains(&node) {
            Some(Phase::Stale)
        } else if self.tracked.contains_key(&node) {
            Some(Phase::Augmented)
        } else {
            None
        }
    }

    fn open_writes(&mut self, view: &mut ListingView) -> WriteToken {
        self.next_token += 1;
        let token = WriteToken(self.next_token);
        view.begin_writes(token);
        token
    }

    fn compact_for(&self, width: u32) -> bool {
        width > 0 && width <= self.opts.compact_max_width
    }

    /// First pass after startup.
    pub fn start(&mut self, cx: &mut Surface<'_>) {
        self.compact = self.compact_for(cx.view.viewport_width());
        self.refresh(cx);
    }

    /// Full pass: decorate every row, drop vanished ones, recompute facets
    /// and visibility, then arm a facet retry if data is still missing.
    pub fn refresh(&mut self, cx: &mut Surface<'_>) {
        let token = self.open_writes(cx.view);
        cx.view.set_root_class(HIGHLIGHT_ROOT_CLASS, cx.settings.highlight_rows);
        cx.view.set_root_class(COMPACT_ROOT_CLASS, self.compact);
        cx.view.set_root_class(STICKY_ROOT_CLASS, cx.settings.sticky_header);
        let frozen = cx.settings.freeze_class();
        for class in FREEZE_ROOT_CLASSES {
            cx.view.set_root_class(class, frozen == Some(class));
        }

        let nodes = cx.view.matching(&self.opts.row_class);
        let present: BTreeSet<NodeId> = nodes.iter().copied().collect();
        self.tracked.retain(|node, _| present.contains(node));
        self.stale.retain(|node| present.contains(node));
        for node in nodes {
            self.augment(node, cx);
        }
        cx.filter.apply(cx.view, &self.tracked);
        cx.view.end_writes();

        self.stats.refreshes += 1;
        debug!(
            token = token.0,
            tracked = self.tracked.len(),
            visible = cx.filter.visible(),
            "refresh done"
        );
        self.check_completeness(cx);
    }

    /// Re-decorates the given rows only, for state flipped by a user action.
    pub fn refresh_rows(&mut self, nodes: &[NodeId], cx: &mut Surface<'_>) {
        self.open_writes(cx.view);
        for node in nodes {
            self.augment(*node, cx);
        }
        cx.filter.apply(cx.view, &self.tracked);
        cx.view.end_writes();
    }

    /// Visibility and facets only.
    pub fn apply_filter(&mut self, cx: &mut Surface<'_>) {
        self.open_writes(cx.view);
        cx.filter.apply(cx.view, &self.tracked);
        cx.view.end_writes();
    }

    /// Moves a marker class from one row to another.
    pub fn move_marker(&mut self, class: &str, from: Option<NodeId>, to: NodeId, cx: &mut Surface<'_>) {
        self.open_writes(cx.view);
        if let Some(from) = from {
            cx.view.set_class(from, class, false);
        }
        cx.view.set_class(to, class, true);
        cx.view.end_writes();
    }

    /// Opens or closes the details strip and relabels the toggle.
    pub fn toggle_details(&mut self, node: NodeId, cx: &mut Surface<'_>) -> Option<bool> {
        self.open_writes(cx.view);
        let open = cx.view.toggle_details(node);
        if open.is_some() {
            self.augment(node, cx);
        }
        cx.view.end_writes();
        open
    }

    /// Tears down every attached control and decorates all rows again.
    pub fn rebuild(&mut self, cx: &mut Surface<'_>) {
        self.open_writes(cx.view);
        self.stale.extend(self.tracked.keys().copied());
        for node in cx.view.matching(&self.opts.row_class) {
            cx.view.remove_controls(node, |_| false);
        }
        cx.view.end_writes();

        self.retries = 0;
        self.gave_up = false;
        self.stats.rebuilds += 1;
        info!(rows = self.stale.len(), "rebuilding row controls");
        self.refresh(cx);
    }

    /// Consumes one batch from the mutation log. Engine echoes are dropped;
    /// new rows are decorated right away and a debounced refresh is armed
    /// for anything else that touched the listing.
    pub fn on_mutations(&mut self, records: Vec<MutationRecord>, cx: &mut Surface<'_>) -> bool {
        let mut fresh: Vec<NodeId> = Vec::new();
        let mut relevant = false;
        for record in records {
            if let Origin::Engine(_) = record.origin {
                self.stats.echoes += 1;
                continue;
            }
            let target = record.target;
            match record.kind {
                MutationKind::Added => {
                    let is_row = cx
                        .view
                        .row(target)
                        .is_some_and(|row| row.has_class(&self.opts.row_class));
                    if is_row && !self.tracked.contains_key(&target) && !fresh.contains(&target) {
                        fresh.push(target);
                    }
                }
                MutationKind::Removed => {
                    if self.tracked.remove(&target).is_some() {
                        self.stale.remove(&target);
                        relevant = true;
                    }
                }
                MutationKind::Text | MutationKind::Children | MutationKind::Attribute(_) => {
                    relevant |= self.tracked.contains_key(&target)
                        || cx
                            .view
                            .row(target)
                            .is_some_and(|row| row.has_class(&self.opts.row_class));
                }
            }
        }

        if !fresh.is_empty() {
            self.open_writes(cx.view);
            for node in &fresh {
                self.augment(*node, cx);
            }
            cx.view.end_writes();
            // New rows restart the wait for their derived fields.
            self.retries = 0;
            self.gave_up = false;
            relevant = true;
        }
        if relevant {
            cx.timers.schedule(TimerKey::Refresh, cx.now + self.opts.debounce);
        }
        relevant
    }

    pub fn on_timer(&mut self, key: &TimerKey, cx: &mut Surface<'_>) {
        match key {
            TimerKey::Refresh | TimerKey::FacetRetry => self.refresh(cx),
            TimerKey::Resize => {
                let compact = self.compact_for(cx.view.viewport_width());
                if compact != self.compact {
                    self.compact = compact;
                    info!(compact, "compact layout changed");
                    self.rebuild(cx);
                }
            }
            TimerKey::BulkOpen | TimerKey::NoteFlush(_) => {}
        }
    }

    pub fn on_resize(&mut self, cx: &mut Surface<'_>) {
        cx.timers.schedule(TimerKey::Resize, cx.now + self.opts.resize_debounce);
    }

    /// The host reports its derived fields are loaded; polling stops.
    pub fn on_data_ready(&mut self, cx: &mut Surface<'_>) {
        cx.timers.cancel(&TimerKey::FacetRetry);
        cx.timers.cancel(&TimerKey::Refresh);
        self.refresh(cx);
    }

    fn check_completeness(&mut self, cx: &mut Surface<'_>) {
        let missing = self
            .tracked
            .values()
            .filter(|item| !item.is_complete())
            .count();
        if missing == 0 {
            self.retries = 0;
            self.gave_up = false;
            cx.timers.cancel(&TimerKey::FacetRetry);
            return;
        }
        if self.retries >= self.opts.facet_retry_cap {
            if !self.gave_up {
                self.gave_up = true;
                warn!(missing, attempts = self.retries, "facet data still incomplete; giving up");
            }
            return;
        }
        self.retries += 1;
        cx.timers
            .schedule(TimerKey::FacetRetry, cx.now + self.opts.facet_retry_delay);
        debug!(missing, attempt = self.retries, "facet retry armed");
    }

    fn augment(&mut self, node: NodeId, cx: &mut Surface<'_>) {
        let Some(row) = cx.view.row(node) else {
            self.tracked.remove(&node);
            return;
        };
        if row.cells().len() < self.opts.min_cells {
            self.tracked.remove(&node);
            return;
        }
        let item = Item::read(
            row,
            &self.opts.base,
            &self.opts.columns,
            cx.state,
            cx.settings.closing_soon_days,
            cx.wall,
        );
        let Some(item) = item else {
            self.tracked.remove(&node);
            return;
        };
        let first_bind = row.data(BOUND_KEY).is_none();

        let settings = cx.settings;
        let view = &mut *cx.view;
        view.set_class(node, LINK_ROW_CLASS, true);
        view.set_data(node, "ezamOfferId", Some(item.id.as_str()));
        view.set_data(node, "ezamOfferUrl", Some(item.url.as_str()));
        view.set_class(node, OPENED_CLASS, settings.show_visited && item.flags.visited);
        view.set_class(node, STARRED_CLASS, item.flags.starred);
        view.set_class(node, SELECTED_CLASS, item.flags.selected);
        let tooltip = settings.show_tooltips && item.title.chars().count() > TOOLTIP_MIN_CHARS;
        view.set_data(node, "title", tooltip.then_some(item.title.as_str()));

        self.attach_controls(node, &item, cx);

        if first_bind {
            cx.view.set_data(node, BOUND_KEY, Some("1"));
            cx.view.add_listener(node, Listener::Click);
            cx.view.add_listener(node, Listener::AuxClick);
            self.stats.bound += 1;
        }
        self.stale.remove(&node);
        self.tracked.insert(node, item);
    }

    fn attach_controls(&self, node: NodeId, item: &Item, cx: &mut Surface<'_>) {
        let settings = cx.settings;
        let labels = cx.labels;
        let details_open = cx.view.row(node).is_some_and(|row| row.details_open());
        let inline =
            settings.inline_expand || self.compact || settings.link_placement == LinkPlacement::Details;
        let actions = match settings.link_placement {
            LinkPlacement::Details => Slot::Details,
            LinkPlacement::Cell => Slot::Cell,
        };

        let mut wanted: Vec<(ControlKind, Slot, String, ControlValue)> = Vec::new();
        wanted.push((
            ControlKind::OpenLink,
            actions,
            labels.t("openLink", "Open"),
            ControlValue::Href(item.url.to_string()),
        ));
        if settings.multi_select {
            wanted.push((
                ControlKind::Select,
                actions,
                labels.t("select", "Select"),
                ControlValue::Checked(item.flags.selected),
            ));
        }
        let star_label = if item.flags.starred {
            labels.t("unstar", "Unstar")
        } else {
            labels.t("star", "Star")
        };
        wanted.push((
            ControlKind::Star,
            actions,
            star_label,
            ControlValue::Checked(item.flags.starred),
        ));
        if settings.show_copy_buttons {
            wanted.push((
                ControlKind::CopyId,
                actions,
                labels.t("copyId", "Copy ID"),
                ControlValue::Text(item.id.to_string()),
            ));
            wanted.push((
                ControlKind::CopyLink,
                actions,
                labels.t("copyLink", "Copy link"),
                ControlValue::Href(item.url.to_string()),
            ));
        }

        let note = cx
            .drafts
            .pending_text(&item.id)
            .unwrap_or_else(|| cx.state.get_note(&item.id))
            .to_string();
        let note_label = labels.translate(
            "notePlaceholder",
            "Add a note (max {max} characters)",
            &[("max", cx.state.note_max_len().to_string())],
        );
        if inline {
            let toggle_label = if details_open {
                labels.t("less", "Less")
            } else {
                labels.t("more", "More")
            };
            wanted.push((
                ControlKind::ExpandToggle,
                Slot::Cell,
                toggle_label,
                ControlValue::Checked(details_open),
            ));
            wanted.push((ControlKind::Note, Slot::Details, note_label, ControlValue::Text(note)));
        } else {
            wanted.push((ControlKind::Note, Slot::Cell, note_label, ControlValue::Text(note)));
        }

        if settings.show_badges {
            if item.flags.closing_soon {
                wanted.push((
                    ControlKind::ClosingSoonBadge,
                    Slot::Cell,
                    labels.t("closingSoon", "Closing soon"),
                    ControlValue::None,
                ));
            }
            if item.flags.newly_initiated {
                wanted.push((
                    ControlKind::NewBadge,
                    Slot::Cell,
                    labels.t("newBadge", "New"),
                    ControlValue::None,
                ));
            }
        }

        let kinds: BTreeSet<ControlKind> = wanted.iter().map(|(kind, ..)| *kind).collect();
        cx.view.remove_controls(node, |control| kinds.contains(&control.kind));
        for (kind, slot, label, value) in wanted {
            cx.view.upsert_control(node, kind, slot, label, value);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;

    use crate::settings::Language;

    pub(crate) const BASE: &str = "https://trusted.example/base/";

    pub(crate) fn options() -> SyncOptions {
        SyncOptions::from_config(&Config::default(), Url::parse(BASE).unwrap())
    }

    pub(crate) fn listing_row(id: &str, city: &str) -> Vec<String> {
        let mut cells = vec![
            format!("Tender {id}"),
            if city.is_empty() { String::new() } else { "Gmina".into() },
            city.to_string(),
            id.to_string(),
        ];
        cells.resize(9, String::new());
        cells
    }

    struct Harness {
        view: ListingView,
        state: ItemStateStore,
        settings: Settings,
        labels: Translator,
        drafts: NoteDrafts,
        timers: Timers,
        filter: FilterEngine,
        now: Duration,
        sync: LiveViewSynchronizer,
    }

    impl Harness {
        fn new() -> Self {
            let settings = Settings {
                language: Language::En,
                ..Settings::default()
            };
            Self {
                view: ListingView::new(),
                state: ItemStateStore::detached(256),
                labels: Translator::empty(settings.language),
                settings,
                drafts: NoteDrafts::new(Duration::from_millis(200)),
                timers: Timers::new(),
                filter: FilterEngine::new(6),
                now: Duration::ZERO,
                sync: LiveViewSynchronizer::new(options()),
            }
        }

        fn run<R>(&mut self, f: impl FnOnce(&mut LiveViewSynchronizer, &mut Surface<'_>) -> R) -> R {
            let wall = NaiveDate::from_ymd_opt(2025, 3, 10)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap();
            let mut cx = Surface {
                view: &mut self.view,
                state: &self.state,
                settings: &self.settings,
                labels: &self.labels,
                drafts: &self.drafts,
                timers: &mut self.timers,
                filter: &mut self.filter,
                now: self.now,
                wall,
            };
            f(&mut self.sync, &mut cx)
        }

        /// Drains the log and fires due timers, like one loop turn.
        fn pump(&mut self) {
            let records = self.view.take_records();
            if !records.is_empty() {
                self.run(|sync, cx| sync.on_mutations(records, cx));
            }
            while let Some(key) = self.timers.pop_due(self.now) {
                self.run(|sync, cx| sync.on_timer(&key, cx));
            }
        }

        fn advance(&mut self, by: Duration) {
            self.now += by;
            self.pump();
        }
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn second_pass_adds_no_controls_or_bindings() {
        let mut h = Harness::new();
        let node = h.view.insert_row(&["tr-link"], listing_row("ocds-1", "Kraków"));
        h.run(|sync, cx| sync.start(cx));
        let first = h.view.row(node).unwrap().clone();
        assert_eq!(first.listeners().len(), 2);
        assert!(first.controls().iter().all(|control| control.handlers == 1));

        h.view.take_records();
        h.run(|sync, cx| sync.refresh(cx));
        let second = h.view.row(node).unwrap();
        assert_eq!(second.controls(), first.controls());
        assert_eq!(second.listeners().len(), 2);
        assert_eq!(h.sync.stats().bound, 1);
        assert!(h.view.take_records().is_empty());
    }

    #[test]
    fn own_writes_never_schedule_another_refresh() {
        let mut h = Harness::new();
        h.view.insert_row(&["tr-link"], listing_row("ocds-1", "Kraków"));
        h.run(|sync, cx| sync.start(cx));
        h.view.take_records();

        // A host burst: one refresh after the debounce.
        let node = h.view.insert_row(&["tr-link"], listing_row("ocds-2", "Gdańsk"));
        h.view.set_cell(node, 4, "x");
        h.pump();
        assert!(h.timers.is_pending(&TimerKey::Refresh));
        let before = h.sync.stats().refreshes;

        // The refresh writes plenty (new star labels, classes, hidden flags)
        // and then the loop keeps turning.
        h.state = {
            let mut state = ItemStateStore::detached(256);
            state.toggle_starred(&ItemId::parse("ocds-1").unwrap());
            state.toggle_starred(&ItemId::parse("ocds-2").unwrap());
            state
        };
        h.advance(ms(150));
        for _ in 0..5 {
            h.advance(ms(500));
        }
        assert_eq!(h.sync.stats().refreshes, before + 1);
        assert!(h.sync.stats().echoes > 0);
        assert!(h.timers.is_empty());
    }

    #[test]
    fn replaced_row_is_bound_again() {
        let mut h = Harness::new();
        let node = h.view.insert_row(&["tr-link"], listing_row("ocds-1", "Kraków"));
        h.run(|sync, cx| sync.start(cx));
        h.view.take_records();

        let fresh = h
            .view
            .replace_row(node, &["tr-link"], listing_row("ocds-1", "Kraków"))
            .unwrap();
        h.pump();
        assert_eq!(h.sync.node_for(&ItemId::parse("ocds-1").unwrap()), Some(fresh));
        assert_eq!(h.view.row(fresh).unwrap().data(BOUND_KEY), Some("1"));
        assert_eq!(h.sync.stats().bound, 2);
        assert!(h.sync.item(node).is_none());
    }

    #[test]
    fn incomplete_rows_retry_until_the_cap() {
        let mut h = Harness::new();
        h.sync.opts.facet_retry_cap = 3;
        h.view.insert_row(&["tr-link"], listing_row("ocds-1", ""));
        h.run(|sync, cx| sync.start(cx));
        assert_eq!(h.sync.retries(), 1);

        for _ in 0..10 {
            h.advance(ms(500));
        }
        assert_eq!(h.sync.retries(), 3);
        assert_eq!(h.sync.stats().refreshes, 4);
        assert!(!h.timers.is_pending(&TimerKey::FacetRetry));
    }

    #[test]
    fn data_ready_stops_polling() {
        let mut h = Harness::new();
        let node = h.view.insert_row(&["tr-link"], listing_row("ocds-1", ""));
        h.run(|sync, cx| sync.start(cx));
        assert!(h.timers.is_pending(&TimerKey::FacetRetry));

        h.view.set_cell(node, 1, "Gmina");
        h.view.set_cell(node, 2, "Kraków");
        h.view.take_records();
        h.run(|sync, cx| sync.on_data_ready(cx));
        assert!(h.timers.is_empty());
        assert_eq!(h.sync.retries(), 0);
    }

    #[test]
    fn rows_without_id_are_not_tracked() {
        let mut h = Harness::new();
        h.view.insert_row(&["tr-link"], vec!["header".into(), "no id".into()]);
        h.view.insert_row(&["tr-link"], vec!["ocds-1".into()]);
        let oversized = format!("ocds-{}", "a".repeat(300));
        h.view.insert_row(&["tr-link"], vec![oversized, "x".into()]);
        h.run(|sync, cx| sync.start(cx));
        assert!(h.sync.items().is_empty());
    }

    #[test]
    fn placement_switch_moves_actions_to_details() {
        let mut h = Harness::new();
        h.settings.inline_expand = false;
        let node = h.view.insert_row(&["tr-link"], listing_row("ocds-1", "Kraków"));
        h.run(|sync, cx| sync.start(cx));
        let row = h.view.row(node).unwrap();
        assert_eq!(row.control(ControlKind::OpenLink).unwrap().slot, Slot::Cell);
        assert!(row.control(ControlKind::ExpandToggle).is_none());

        h.settings.link_placement = LinkPlacement::Details;
        h.run(|sync, cx| sync.rebuild(cx));
        let row = h.view.row(node).unwrap();
        assert_eq!(row.control(ControlKind::OpenLink).unwrap().slot, Slot::Details);
        assert_eq!(row.control(ControlKind::Note).unwrap().slot, Slot::Details);
        assert!(row.control(ControlKind::ExpandToggle).is_some());
        assert_eq!(h.sync.stats().rebuilds, 1);
        assert_eq!(h.sync.phase(node), Some(Phase::Augmented));
    }

    #[test]
    fn crossing_compact_width_rebuilds() {
        let mut h = Harness::new();
        h.settings.inline_expand = false;
        h.view.set_viewport_width(2560);
        let node = h.view.insert_row(&["tr-link"], listing_row("ocds-1", "Kraków"));
        h.run(|sync, cx| sync.start(cx));
        assert!(!h.view.has_root_class(COMPACT_ROOT_CLASS));

        h.view.set_viewport_width(1280);
        h.run(|sync, cx| sync.on_resize(cx));
        h.advance(ms(150));
        assert!(h.sync.is_compact());
        assert!(h.view.has_root_class(COMPACT_ROOT_CLASS));
        assert!(h.view.row(node).unwrap().control(ControlKind::ExpandToggle).is_some());
        assert_eq!(h.sync.stats().rebuilds, 1);
    }

    #[test]
    fn badges_follow_setting() {
        let mut h = Harness::new();
        let mut cells = listing_row("ocds-1", "Kraków");
        cells[7] = "11 marca 2025".into();
        cells[8] = "10 marca 2025, godz. 09:00".into();
        let node = h.view.insert_row(&["tr-link"], cells);
        h.run(|sync, cx| sync.start(cx));
        let row = h.view.row(node).unwrap();
        assert!(row.control(ControlKind::ClosingSoonBadge).is_some());
        assert!(row.control(ControlKind::NewBadge).is_some());

        h.settings.show_badges = false;
        h.run(|sync, cx| sync.rebuild(cx));
        let row = h.view.row(node).unwrap();
        assert!(row.control(ControlKind::ClosingSoonBadge).is_none());
        assert!(h.sync.item(node).unwrap().flags.closing_soon);
    }

    #[test]
    fn labels_come_from_the_shipped_catalog_keys() {
        let dir = tempfile::tempdir().unwrap();
        let pl = dir.path().join("pl");
        std::fs::create_dir_all(&pl).unwrap();
        std::fs::write(
            pl.join("messages.json"),
            r#"{
                "closingSoon": {"message": "Wkrótce koniec"},
                "newBadge": {"message": "Nowe"},
                "more": {"message": "Więcej"},
                "less": {"message": "Mniej"}
            }"#,
        )
        .unwrap();

        let mut h = Harness::new();
        h.labels = Translator::load(Some(dir.path()), Language::Pl);
        let mut cells = listing_row("ocds-1", "Kraków");
        cells[7] = "11 marca 2025".into();
        cells[8] = "10 marca 2025, godz. 09:00".into();
        let node = h.view.insert_row(&["tr-link"], cells);
        h.run(|sync, cx| sync.start(cx));

        let row = h.view.row(node).unwrap();
        assert_eq!(row.control(ControlKind::ClosingSoonBadge).unwrap().label, "Wkrótce koniec");
        assert_eq!(row.control(ControlKind::NewBadge).unwrap().label, "Nowe");
        assert_eq!(row.control(ControlKind::ExpandToggle).unwrap().label, "Więcej");

        h.run(|sync, cx| sync.toggle_details(node, cx));
        let row = h.view.row(node).unwrap();
        assert_eq!(row.control(ControlKind::ExpandToggle).unwrap().label, "Mniej");
    }

    #[test]
    fn table_classes_follow_layout_settings() {
        let mut h = Harness::new();
        h.view.insert_row(&["tr-link"], listing_row("ocds-1", "Kraków"));
        h.run(|sync, cx| sync.start(cx));
        assert!(h.view.has_root_class(STICKY_ROOT_CLASS));
        assert!(h.view.has_root_class("ezam-freeze-1"));

        h.settings.sticky_header = false;
        h.settings.freeze_columns = 2;
        h.run(|sync, cx| sync.refresh(cx));
        assert!(!h.view.has_root_class(STICKY_ROOT_CLASS));
        assert!(!h.view.has_root_class("ezam-freeze-1"));
        assert!(h.view.has_root_class("ezam-freeze-2"));

        h.settings.freeze_columns = 0;
        h.run(|sync, cx| sync.refresh(cx));
        assert!(!h.view.has_root_class("ezam-freeze-2"));
    }
}
