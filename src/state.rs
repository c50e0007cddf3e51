use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ident::ItemId;
use crate::storage::{Mirror, Scope, Stores};

pub const OPENED_KEY: &str = "ezamOpenedIds";
pub const STARRED_KEY: &str = "ezamStarredIds";
pub const NOTES_KEY: &str = "ezamOfferNotes";
pub const LAST_OPENED_KEY: &str = "ezamLastOpened";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastOpened {
    pub id: ItemId,
    pub title: String,
    pub url: String,
    pub opened_at: DateTime<Utc>,
}

/// Per-item user state. Every mutator updates memory first and then mirrors
/// the whole collection to its scope; readers never wait on storage.
pub struct ItemStateStore {
    visited: BTreeSet<ItemId>,
    starred: BTreeSet<ItemId>,
    selected: Vec<ItemId>,
    notes: BTreeMap<ItemId, String>,
    last_opened: Option<LastOpened>,
    session: Mirror,
    local: Mirror,
    note_max_len: usize,
}

impl ItemStateStore {
    pub fn detached(note_max_len: usize) -> Self {
        Self {
            visited: BTreeSet::new(),
            starred: BTreeSet::new(),
            selected: Vec::new(),
            notes: BTreeMap::new(),
            last_opened: None,
            session: Mirror::detached(Scope::Session),
            local: Mirror::detached(Scope::Local),
            note_max_len,
        }
    }

    /// Reads notes, then starred ids, then the last-opened record, then the
    /// session's visited ids. Each collection is read exactly once.
    pub fn load(stores: &Stores, note_max_len: usize) -> Self {
        let mut state = Self::detached(note_max_len);
        state.local = Mirror::new(stores.local.clone(), Scope::Local);
        state.session = Mirror::new(stores.session.clone(), Scope::Session);

        // Notes are stored as a plain object; drop keys that are not ids.
        let raw_notes: BTreeMap<String, String> = state.local.read(NOTES_KEY).unwrap_or_default();
        state.notes = raw_notes
            .into_iter()
            .filter_map(|(key, text)| {
                let id = ItemId::try_from(key).ok()?;
                let text = truncate_chars(&text, note_max_len);
                (!text.trim().is_empty()).then_some((id, text))
            })
            .collect();
        debug!(count = state.notes.len(), "notes loaded");

        state.starred = read_ids(&mut state.local, STARRED_KEY);
        debug!(count = state.starred.len(), "starred ids loaded");

        state.last_opened = state.local.read(LAST_OPENED_KEY);
        debug!(present = state.last_opened.is_some(), "last opened loaded");

        state.visited = read_ids(&mut state.session, OPENED_KEY);
        info!(
            notes = state.notes.len(),
            starred = state.starred.len(),
            visited = state.visited.len(),
            "item state ready"
        );
        state
    }

    pub fn is_degraded(&self, scope: Scope) -> bool {
        match scope {
            Scope::Session => self.session.is_degraded(),
            Scope::Local => self.local.is_degraded(),
            Scope::Synced => false,
        }
    }

    pub fn is_visited(&self, id: &ItemId) -> bool {
        self.visited.contains(id)
    }

    /// Returns false when `id` was already visited; nothing is written then.
    pub fn mark_visited(&mut self, id: &ItemId) -> bool {
        if !self.visited.insert(id.clone()) {
            return false;
        }
        self.session.write(OPENED_KEY, &self.visited);
        true
    }

    pub fn is_starred(&self, id: &ItemId) -> bool {
        self.starred.contains(id)
    }

    /// Flips the current in-memory flag and returns the new one.
    pub fn toggle_starred(&mut self, id: &ItemId) -> bool {
        let starred = if self.starred.remove(id) {
            false
        } else {
            self.starred.insert(id.clone());
            true
        };
        self.local.write(STARRED_KEY, &self.starred);
        starred
    }

    pub fn starred_count(&self) -> usize {
        self.starred.len()
    }

    pub fn get_note(&self, id: &ItemId) -> &str {
        self.notes.get(id).map(String::as_str).unwrap_or("")
    }

    /// Stores the note cut to the length bound; blank text deletes it.
    /// Returns what was kept.
    pub fn set_note(&mut self, id: &ItemId, text: &str) -> String {
        let next = truncate_chars(text, self.note_max_len);
        if next.trim().is_empty() {
            self.notes.remove(id);
        } else {
            self.notes.insert(id.clone(), next.clone());
        }
        self.local.write(NOTES_KEY, &self.notes);
        next
    }

    pub fn note_max_len(&self) -> usize {
        self.note_max_len
    }

    pub fn last_opened(&self) -> Option<&LastOpened> {
        self.last_opened.as_ref()
    }

    pub fn set_last_opened(&mut self, record: LastOpened) {
        self.local.write(LAST_OPENED_KEY, &record);
        self.last_opened = Some(record);
    }

    pub fn is_selected(&self, id: &ItemId) -> bool {
        self.selected.contains(id)
    }

    pub fn select(&mut self, id: &ItemId) -> bool {
        if self.is_selected(id) {
            return false;
        }
        self.selected.push(id.clone());
        true
    }

    pub fn deselect(&mut self, id: &ItemId) -> bool {
        let before = self.selected.len();
        self.selected.retain(|selected| selected != id);
        self.selected.len() != before
    }

    pub fn toggle_selected(&mut self, id: &ItemId) -> bool {
        if self.deselect(id) {
            false
        } else {
            self.select(id)
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
    }

    /// Selected ids in the order they were picked.
    pub fn selected(&self) -> &[ItemId] {
        &self.selected
    }
}

fn read_ids(mirror: &mut Mirror, key: &str) -> BTreeSet<ItemId> {
    let raw: Vec<String> = mirror.read(key).unwrap_or_default();
    raw.into_iter()
        .filter_map(|value| ItemId::try_from(value).ok())
        .collect()
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}
