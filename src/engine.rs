use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use chrono::{Local, NaiveDateTime};
use crossbeam_channel::{Receiver, TryRecvError};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::filter::{Facets, FilterEngine, FilterState};
use crate::i18n::Translator;
use crate::ident::ItemId;
use crate::item::Item;
use crate::note_draft::NoteDrafts;
use crate::opener::PrivilegedOpener;
use crate::presets::PresetStore;
use crate::scheduler::{TimerKey, Timers};
use crate::scroll::{ScrollMemory, ScrollRestore, ScrollState};
use crate::settings::{Settings, SETTINGS_KEY};
use crate::state::ItemStateStore;
use crate::storage::{Change, Mirror, Scope, Stores};
use crate::sync::{LiveViewSynchronizer, Surface, SyncOptions, SyncStats};
use crate::view::{ListingView, NodeId, PageRequest};

/// What the engine is built from.
pub struct EngineParts {
    pub config: Config,
    pub stores: Stores,
    pub opener: PrivilegedOpener,
    pub view: ListingView,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BulkStep {
    pub(crate) id: ItemId,
    pub(crate) url: Url,
    pub(crate) title: String,
    pub(crate) active: bool,
}

/// Composition root. Owns every store and the listing, and routes host
/// events to the synchronizer and the user actions.
pub struct Engine {
    pub(crate) view: ListingView,
    pub(crate) state: ItemStateStore,
    pub(crate) presets: PresetStore,
    scroll: ScrollMemory,
    pub(crate) settings: Settings,
    pub(crate) labels: Translator,
    locales_dir: Option<PathBuf>,
    pub(crate) timers: Timers,
    pub(crate) sync: LiveViewSynchronizer,
    pub(crate) filter: FilterEngine,
    pub(crate) drafts: NoteDrafts,
    pub(crate) opener: PrivilegedOpener,
    synced: Mirror,
    settings_rx: Receiver<Change>,
    pub(crate) bulk: VecDeque<BulkStep>,
    pub(crate) bulk_delay: Duration,
    pub(crate) cursor: Option<NodeId>,
    pub(crate) toasts: Vec<String>,
    wall_override: Option<NaiveDateTime>,
    pub(crate) now: Duration,
}

impl Engine {
    /// Loads settings, labels and item state in that order, runs the first
    /// pass over whatever the listing already holds, then restores the saved
    /// scroll position.
    pub fn start(parts: EngineParts) -> Result<Self> {
        let EngineParts {
            config,
            stores,
            opener,
            view,
        } = parts;
        let base = config.trust.base()?;

        let mut synced = Mirror::new(stores.synced.clone(), Scope::Synced);
        let settings = Settings::from_stored(synced.read(SETTINGS_KEY));
        info!(
            language = settings.language.code(),
            placement = ?settings.link_placement,
            "settings loaded"
        );
        let labels = Translator::load(config.locales_dir.as_deref(), settings.language);
        let state = ItemStateStore::load(&stores, config.notes.max_len);

        let mut presets = PresetStore::load(&stores);
        let mut filter = FilterEngine::new(config.filter.top_k);
        if settings.remember_filters {
            if let Some(fields) = presets.remembered_fields() {
                filter.set_state(FilterState::from_fields(&fields));
            }
        }

        let mut engine = Self {
            view,
            state,
            presets,
            scroll: ScrollMemory::load(&stores),
            settings,
            labels,
            locales_dir: config.locales_dir.clone(),
            timers: Timers::new(),
            sync: LiveViewSynchronizer::new(SyncOptions::from_config(&config, base)),
            filter,
            drafts: NoteDrafts::new(config.notes.debounce),
            opener,
            synced,
            settings_rx: stores.synced.watch(),
            bulk: VecDeque::new(),
            bulk_delay: config.open.bulk_delay,
            cursor: None,
            toasts: Vec::new(),
            wall_override: None,
            now: Duration::ZERO,
        };
        engine.with_sync(|sync, cx| sync.start(cx));
        engine.restore_scroll_state();
        Ok(engine)
    }

    pub(crate) fn with_sync<R>(
        &mut self,
        f: impl FnOnce(&mut LiveViewSynchronizer, &mut Surface<'_>) -> R,
    ) -> R {
        let wall = self.wall_now();
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

    pub(crate) fn refresh_rows(&mut self, nodes: &[NodeId]) {
        self.with_sync(|sync, cx| sync.refresh_rows(nodes, cx));
    }

    /// Fixes the wall clock used for date badges. `None` follows local time.
    pub fn set_wall_clock(&mut self, wall: Option<NaiveDateTime>) {
        self.wall_override = wall;
    }

    fn wall_now(&self) -> NaiveDateTime {
        self.wall_override
            .unwrap_or_else(|| Local::now().naive_local())
    }

    /// One loop turn at engine time `now`: settings changes first, then the
    /// mutation log, then every timer that is due.
    pub fn tick(&mut self, now: Duration) {
        self.now = self.now.max(now);
        self.pump_settings();
        self.pump_mutations();
        while let Some(key) = self.timers.pop_due(self.now) {
            self.fire(key);
        }
        self.pump_mutations();
    }

    fn pump_mutations(&mut self) {
        let records = self.view.take_records();
        if records.is_empty() {
            return;
        }
        self.with_sync(|sync, cx| sync.on_mutations(records, cx));
    }

    fn fire(&mut self, key: TimerKey) {
        match key {
            TimerKey::BulkOpen => self.bulk_step(),
            TimerKey::NoteFlush(id) => self.flush_due_note(&id),
            other => self.with_sync(|sync, cx| sync.on_timer(&other, cx)),
        }
    }

    fn pump_settings(&mut self) {
        let mut latest: Option<Value> = None;
        loop {
            match self.settings_rx.try_recv() {
                Ok(change) if change.key == SETTINGS_KEY => latest = Some(change.value),
                Ok(_) => {}
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("settings watch closed");
                    break;
                }
            }
        }
        if let Some(value) = latest {
            let next = self.settings.merged(&value);
            self.apply_settings(next);
        }
    }

    /// Applies a new settings snapshot. Rendering-affecting changes tear
    /// down and rebuild every row; anything else only re-runs the pass.
    pub(crate) fn apply_settings(&mut self, next: Settings) {
        if next == self.settings {
            return;
        }
        let prev = std::mem::replace(&mut self.settings, next);
        if prev.language != self.settings.language {
            self.labels = Translator::load(self.locales_dir.as_deref(), self.settings.language);
            info!(language = self.settings.language.code(), "labels reloaded");
        }
        if prev.rendering_changed(&self.settings) {
            self.with_sync(|sync, cx| sync.rebuild(cx));
        } else {
            self.with_sync(|sync, cx| sync.refresh(cx));
        }
    }

    /// Merges `patch` into the current settings, persists the result to the
    /// synced scope and applies it.
    pub fn update_settings(&mut self, patch: &Value) {
        let next = self.settings.merged(patch);
        if next == self.settings {
            return;
        }
        self.synced.write(SETTINGS_KEY, &next.to_value());
        self.apply_settings(next);
    }

    /// Viewport width changed; the compact check runs after a short quiet
    /// period.
    pub fn resize(&mut self, width: u32) {
        self.view.set_viewport_width(width);
        self.with_sync(|sync, cx| sync.on_resize(cx));
    }

    /// The host finished loading derived fields.
    pub fn data_ready(&mut self) {
        self.pump_mutations();
        self.with_sync(|sync, cx| sync.on_data_ready(cx));
    }

    /// Records the scroll offset and active page for this session.
    pub fn save_scroll_state(&mut self) {
        if !self.settings.remember_scroll {
            return;
        }
        let state = ScrollState {
            scroll_y: self.view.scroll_y(),
            page: self.view.active_page().unwrap_or_default().to_string(),
        };
        self.scroll.save(&state);
    }

    /// Returns to the saved page, or to the saved offset when already on it.
    pub fn restore_scroll_state(&mut self) -> Option<ScrollRestore> {
        if !self.settings.remember_scroll {
            return None;
        }
        let plan = self.scroll.saved()?.restore_plan(self.view.pagination());
        match &plan {
            ScrollRestore::Page(page) => {
                debug!(%page, "returning to saved page");
                self.view.request_page(PageRequest::Page(page.clone()));
            }
            ScrollRestore::Scroll(y) => self.view.set_scroll_y(*y),
        }
        Some(plan)
    }

    /// Flushes every unsaved note and saves the scroll position. Call before
    /// dropping the engine.
    pub fn shutdown(&mut self) {
        self.save_scroll_state();
        let pending = self.drafts.drain_pending();
        if !pending.is_empty() {
            info!(count = pending.len(), "flushing unsaved notes");
        }
        for (id, text) in pending {
            self.timers.cancel(&TimerKey::NoteFlush(id.clone()));
            self.state.set_note(&id, &text);
        }
        if !self.bulk.is_empty() {
            warn!(remaining = self.bulk.len(), "bulk open interrupted");
            self.bulk.clear();
        }
    }

    pub fn view(&self) -> &ListingView {
        &self.view
    }

    /// Host-side access to the listing. Changes show up on the next tick.
    pub fn view_mut(&mut self) -> &mut ListingView {
        &mut self.view
    }

    pub fn state(&self) -> &ItemStateStore {
        &self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn labels(&self) -> &Translator {
        &self.labels
    }

    pub fn filter(&self) -> &FilterState {
        self.filter.state()
    }

    pub fn facets(&self) -> &Facets {
        self.filter.facets()
    }

    pub fn visible_count(&self) -> usize {
        self.filter.visible()
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.sync.stats()
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.next_deadline()
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn item(&self, node: NodeId) -> Option<&Item> {
        self.sync.item(node)
    }

    pub fn node_for(&self, id: &ItemId) -> Option<NodeId> {
        self.sync.node_for(id)
    }

    /// Tracked items in listing order.
    pub fn items(&self) -> Vec<(NodeId, &Item)> {
        self.view
            .rows()
            .iter()
            .filter_map(|row| self.sync.item(row.id()).map(|item| (row.id(), item)))
            .collect()
    }

    pub fn cursor(&self) -> Option<NodeId> {
        self.cursor
    }

    pub fn take_toasts(&mut self) -> Vec<String> {
        std::mem::take(&mut self.toasts)
    }

    pub(crate) fn toast(&mut self, message: String) {
        debug!(%message, "toast");
        self.toasts.push(message);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::NaiveDate;
    use serde_json::json;

    use crate::config::TrustConfig;
    use crate::opener::tests::{gate, identity, RecordingLauncher};
    use crate::opener::Broker;
    use crate::storage::KeyValueStore;
    use crate::sync::tests::{listing_row, BASE};
    use crate::view::{ControlKind, Pagination};

    pub(crate) struct Fixture {
        pub(crate) engine: Engine,
        pub(crate) stores: Stores,
        pub(crate) privileged: Arc<RecordingLauncher>,
        pub(crate) fallback: Arc<RecordingLauncher>,
        _broker: Broker,
    }

    pub(crate) fn config() -> Config {
        Config {
            trust: TrustConfig {
                base_url: BASE.into(),
                extension_id: "ext".into(),
                extension_origin: "chrome-extension://ext/".into(),
            },
            ..Config::default()
        }
    }

    pub(crate) fn fixture_with(stores: Stores, rows: &[(&str, &str)]) -> Fixture {
        let privileged = Arc::new(RecordingLauncher::default());
        let fallback = Arc::new(RecordingLauncher::default());
        let broker = Broker::spawn(gate(), privileged.clone());
        let opener = PrivilegedOpener::new(gate(), identity(), Some(broker.channel()), fallback.clone());
        let mut view = ListingView::new();
        for (id, city) in rows {
            view.insert_row(&["tr-link"], listing_row(id, city));
        }
        let mut engine = Engine::start(EngineParts {
            config: config(),
            stores: stores.clone(),
            opener,
            view,
        })
        .unwrap();
        engine.set_wall_clock(NaiveDate::from_ymd_opt(2025, 3, 10).and_then(|d| d.and_hms_opt(12, 0, 0)));
        engine.settings.language = crate::settings::Language::En;
        Fixture {
            engine,
            stores,
            privileged,
            fallback,
            _broker: broker,
        }
    }

    pub(crate) fn fixture(rows: &[(&str, &str)]) -> Fixture {
        fixture_with(Stores::in_memory(), rows)
    }

    pub(crate) fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    pub(crate) fn id(raw: &str) -> ItemId {
        ItemId::parse(raw).unwrap()
    }

    #[test]
    fn startup_sees_persisted_state_on_first_pass() {
        let stores = Stores::in_memory();
        stores.local.set("ezamStarredIds", json!(["ocds-2"])).unwrap();
        stores.session.set("ezamOpenedIds", json!(["ocds-1"])).unwrap();
        let f = fixture_with(stores, &[("ocds-1", "Kraków"), ("ocds-2", "Gdańsk")]);

        let items = f.engine.items();
        assert_eq!(items.len(), 2);
        assert!(items[0].1.flags.visited);
        assert!(items[1].1.flags.starred);
        assert!(f.engine.view().row(items[0].0).unwrap().has_class("ezam-opened"));
        assert!(f.engine.view().row(items[1].0).unwrap().has_class("ezam-starred"));
        assert_eq!(f.engine.sync_stats().refreshes, 1);
    }

    #[test]
    fn host_burst_is_coalesced_into_one_refresh() {
        let mut f = fixture(&[("ocds-1", "Kraków")]);
        f.engine.tick(ms(0));
        let before = f.engine.sync_stats().refreshes;

        for n in 2..7 {
            f.engine
                .view_mut()
                .insert_row(&["tr-link"], listing_row(&format!("ocds-{n}"), "Gdańsk"));
            f.engine.tick(ms(n * 20));
        }
        f.engine.tick(ms(1_000));
        f.engine.tick(ms(2_000));
        assert_eq!(f.engine.sync_stats().refreshes, before + 1);
        assert_eq!(f.engine.items().len(), 6);
        assert!(f.engine.timers().is_empty());
    }

    #[test]
    fn external_settings_change_triggers_rebuild() {
        let mut f = fixture(&[("ocds-1", "Kraków")]);
        let node = f.engine.items()[0].0;
        assert!(f.engine.view().row(node).unwrap().control(ControlKind::CopyId).is_some());

        // Another surface writes the synced scope.
        f.stores
            .synced
            .set(SETTINGS_KEY, json!({"showCopyButtons": false}))
            .unwrap();
        f.engine.tick(ms(10));
        assert_eq!(f.engine.sync_stats().rebuilds, 1);
        assert!(f.engine.view().row(node).unwrap().control(ControlKind::CopyId).is_none());
        assert!(!f.engine.settings().show_copy_buttons);
    }

    #[test]
    fn non_rendering_change_does_not_rebuild() {
        let mut f = fixture(&[("ocds-1", "Kraków")]);
        f.engine.update_settings(&json!({"openInBackground": true}));
        f.engine.tick(ms(10));
        assert_eq!(f.engine.sync_stats().rebuilds, 0);
        assert!(f.engine.settings().open_in_background);
        assert_eq!(
            f.stores.synced.get(SETTINGS_KEY).unwrap().unwrap()["openInBackground"],
            json!(true)
        );
    }

    #[test]
    fn options_written_elsewhere_survive_local_updates() {
        let mut f = fixture(&[("ocds-1", "Kraków")]);
        f.stores
            .synced
            .set(SETTINGS_KEY, json!({"showBadges": false, "panelTheme": "dark"}))
            .unwrap();
        f.engine.tick(ms(10));
        f.engine.update_settings(&json!({"openInBackground": true}));

        let stored = f.stores.synced.get(SETTINGS_KEY).unwrap().unwrap();
        assert_eq!(stored["panelTheme"], json!("dark"));
        assert_eq!(stored["showBadges"], json!(false));
        assert_eq!(stored["openInBackground"], json!(true));
    }

    #[test]
    fn scroll_position_is_saved_and_restored_per_session() {
        let stores = Stores::in_memory();
        let mut f = fixture_with(stores.clone(), &[("ocds-1", "Kraków")]);
        f.engine.view_mut().set_pagination(Some(Pagination {
            pages: vec!["1".into(), "2".into()],
            active: Some(1),
            ..Pagination::default()
        }));
        f.engine.view_mut().set_scroll_y(640.0);
        f.engine.shutdown();
        assert_eq!(
            stores.session.get("ezamScrollState").unwrap(),
            Some(json!({"scrollY": 640.0, "page": "2"}))
        );

        // Same page: the offset comes back.
        let mut again = fixture_with(stores.clone(), &[("ocds-1", "Kraków")]);
        again.engine.view_mut().set_pagination(Some(Pagination {
            pages: vec!["1".into(), "2".into()],
            active: Some(1),
            ..Pagination::default()
        }));
        assert_eq!(again.engine.restore_scroll_state(), Some(ScrollRestore::Scroll(640.0)));
        assert_eq!(again.engine.view().scroll_y(), 640.0);

        // Landed on page 1: the pager is clicked instead.
        again.engine.view_mut().set_pagination(Some(Pagination {
            pages: vec!["1".into(), "2".into()],
            active: Some(0),
            ..Pagination::default()
        }));
        again.engine.view_mut().take_page_requests();
        assert_eq!(
            again.engine.restore_scroll_state(),
            Some(ScrollRestore::Page("2".into()))
        );
        assert_eq!(
            again.engine.view_mut().take_page_requests(),
            vec![PageRequest::Page("2".into())]
        );
    }

    #[test]
    fn scroll_memory_off_neither_saves_nor_restores() {
        let stores = Stores::in_memory();
        let mut f = fixture_with(stores.clone(), &[("ocds-1", "Kraków")]);
        f.engine.update_settings(&json!({"rememberScroll": false}));
        f.engine.view_mut().set_scroll_y(300.0);
        f.engine.shutdown();
        assert!(stores.session.get("ezamScrollState").unwrap().is_none());

        stores
            .session
            .set("ezamScrollState", json!({"scrollY": 90, "page": ""}))
            .unwrap();
        assert_eq!(f.engine.restore_scroll_state(), None);
        assert_eq!(f.engine.view().scroll_y(), 300.0);
    }

    #[test]
    fn remembered_filters_are_restored() {
        let stores = Stores::in_memory();
        stores
            .local
            .set("ezamFilters", json!({"city": "Gdańsk", "status": "all"}))
            .unwrap();
        let f = fixture_with(stores, &[("ocds-1", "Kraków"), ("ocds-2", "Gdańsk")]);
        assert_eq!(f.engine.filter().city.as_deref(), Some("Gdańsk"));
        assert_eq!(f.engine.visible_count(), 1);
        let hidden: Vec<bool> = f
            .engine
            .items()
            .iter()
            .map(|(node, _)| f.engine.view().row(*node).unwrap().is_hidden())
            .collect();
        assert_eq!(hidden, vec![true, false]);
    }

    #[test]
    fn language_switch_reloads_labels() {
        let dir = tempfile::tempdir().unwrap();
        let pl = dir.path().join("pl");
        std::fs::create_dir_all(&pl).unwrap();
        std::fs::write(pl.join("messages.json"), r#"{"openLink": {"message": "Otwórz"}}"#).unwrap();

        let mut f = fixture(&[("ocds-1", "Kraków")]);
        f.engine.locales_dir = Some(dir.path().to_path_buf());
        f.engine.update_settings(&json!({"language": "pl"}));
        let node = f.engine.items()[0].0;
        let link = f.engine.view().row(node).unwrap().control(ControlKind::OpenLink).unwrap();
        assert_eq!(link.label, "Otwórz");
        assert_eq!(f.engine.sync_stats().rebuilds, 1);
    }
}
