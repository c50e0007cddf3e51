use chrono::NaiveDateTime;
use url::Url;

use crate::config::ColumnLayout;
use crate::dates;
use crate::ident::{self, ItemId};
use crate::state::ItemStateStore;
use crate::view::Row;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemFlags {
    pub visited: bool,
    pub starred: bool,
    pub selected: bool,
    pub closing_soon: bool,
    pub newly_initiated: bool,
}

/// What the engine knows about one row after the latest pass. Content
/// fields are re-read from the row every pass; only `id` is stable.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: ItemId,
    pub url: Url,
    pub title: String,
    pub organization: Option<String>,
    pub city: Option<String>,
    pub submission: Option<NaiveDateTime>,
    pub initiation: Option<NaiveDateTime>,
    pub flags: ItemFlags,
}

impl Item {
    /// Builds the snapshot for `row`, or `None` when the row carries no
    /// usable identifier.
    pub fn read(
        row: &Row,
        base: &Url,
        columns: &ColumnLayout,
        state: &ItemStateStore,
        closing_soon_days: i64,
        now: NaiveDateTime,
    ) -> Option<Self> {
        let id = ident::extract_id(row.cells(), &row.text())?;
        let url = ident::offer_url(base, &id)?;
        let cell = |index: usize| {
            row.cells()
                .get(index)
                .map(|text| text.trim())
                .filter(|text| !text.is_empty())
                .map(str::to_string)
        };
        let submission = cell(columns.submission).and_then(|text| dates::parse_listing_date(&text));
        let initiation = cell(columns.initiation).and_then(|text| dates::parse_listing_date(&text));
        let flags = ItemFlags {
            visited: state.is_visited(&id),
            starred: state.is_starred(&id),
            selected: state.is_selected(&id),
            closing_soon: submission
                .map(|deadline| dates::is_closing_soon(deadline, now, closing_soon_days))
                .unwrap_or(false),
            newly_initiated: initiation
                .map(|initiated| dates::is_newly_initiated(initiated, now))
                .unwrap_or(false),
        };
        Some(Self {
            title: cell(columns.title).unwrap_or_default(),
            organization: cell(columns.organization),
            city: cell(columns.city),
            id,
            url,
            submission,
            initiation,
            flags,
        })
    }

    /// Organization and city load after the row itself appears.
    pub fn is_complete(&self) -> bool {
        self.organization.is_some() && self.city.is_some()
    }
}
