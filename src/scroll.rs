use serde::{Deserialize, Serialize};

use crate::storage::{Mirror, Scope, Stores};
use crate::view::Pagination;

pub const SCROLL_KEY: &str = "ezamScrollState";

/// Where the user was on the listing when they last left it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScrollState {
    pub scroll_y: f64,
    /// Label of the active pager link; empty when the listing has no pager.
    pub page: String,
}

impl Default for ScrollState {
    fn default() -> Self {
        Self {
            scroll_y: 0.0,
            page: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScrollRestore {
    /// The saved page is a different one; go there first.
    Page(String),
    Scroll(f64),
}

impl ScrollState {
    /// Navigates when the saved page differs from the active one and the
    /// pager still offers it, otherwise scrolls.
    pub fn restore_plan(&self, pager: Option<&Pagination>) -> ScrollRestore {
        let saved = self.page.trim();
        let active = pager.and_then(Pagination::active_label).unwrap_or("");
        if !saved.is_empty() && !active.is_empty() && saved != active {
            let offered = pager.is_some_and(|pager| pager.pages.iter().any(|page| page.trim() == saved));
            if offered {
                return ScrollRestore::Page(saved.to_string());
            }
        }
        ScrollRestore::Scroll(self.scroll_y.max(0.0))
    }
}

/// Per-tab scroll memory in the session scope.
pub struct ScrollMemory {
    session: Mirror,
}

impl ScrollMemory {
    pub fn load(stores: &Stores) -> Self {
        Self {
            session: Mirror::new(stores.session.clone(), Scope::Session),
        }
    }

    pub fn save(&mut self, state: &ScrollState) {
        self.session.write(SCROLL_KEY, state);
    }

    pub fn saved(&mut self) -> Option<ScrollState> {
        self.session.read(SCROLL_KEY)
    }
}
