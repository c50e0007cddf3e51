use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::item::Item;
use crate::view::{ListingView, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusFilter {
    #[default]
    All,
    New,
    ClosingSoon,
}

impl StatusFilter {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "new" => StatusFilter::New,
            "closingSoon" | "closing-soon" | "soon" => StatusFilter::ClosingSoon,
            _ => StatusFilter::All,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusFilter::All => "all",
            StatusFilter::New => "new",
            StatusFilter::ClosingSoon => "closingSoon",
        }
    }
}

/// All set predicates must hold for an item to stay visible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterState {
    pub status: StatusFilter,
    pub city: Option<String>,
    pub organization: Option<String>,
    pub starred_only: bool,
}

impl FilterState {
    pub fn matches(&self, item: &Item) -> bool {
        if self.starred_only && !item.flags.starred {
            return false;
        }
        let status_ok = match self.status {
            StatusFilter::All => true,
            StatusFilter::New => item.flags.newly_initiated,
            StatusFilter::ClosingSoon => item.flags.closing_soon,
        };
        if !status_ok {
            return false;
        }
        if let Some(city) = &self.city {
            if item.city.as_deref() != Some(city.as_str()) {
                return false;
            }
        }
        if let Some(organization) = &self.organization {
            if item.organization.as_deref() != Some(organization.as_str()) {
                return false;
            }
        }
        true
    }

    pub fn is_active(&self) -> bool {
        *self != FilterState::default()
    }

    /// Flat field map, the shape presets and remembered filters are stored in.
    pub fn to_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("status".into(), self.status.as_str().into());
        fields.insert("city".into(), self.city.clone().unwrap_or_default());
        fields.insert(
            "organization".into(),
            self.organization.clone().unwrap_or_default(),
        );
        fields.insert("starredOnly".into(), self.starred_only.to_string());
        fields
    }

    pub fn from_fields(fields: &BTreeMap<String, String>) -> Self {
        let text = |key: &str| {
            fields
                .get(key)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        Self {
            status: fields
                .get("status")
                .map(|raw| StatusFilter::parse(raw))
                .unwrap_or_default(),
            city: text("city"),
            organization: text("organization"),
            starred_only: fields.get("starredOnly").map(String::as_str) == Some("true"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacetValue {
    pub value: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Facets {
    pub cities: Vec<FacetValue>,
    pub organizations: Vec<FacetValue>,
}

/// Most frequent values first, ties by value. The active value is appended
/// when it did not make the cut.
pub fn top_values<'a>(
    values: impl Iterator<Item = &'a str>,
    k: usize,
    active: Option<&str>,
) -> Vec<FacetValue> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in values {
        *counts.entry(value).or_default() += 1;
    }
    let mut ranked: Vec<FacetValue> = counts
        .into_iter()
        .map(|(value, count)| FacetValue {
            value: value.to_string(),
            count,
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    let mut top: Vec<FacetValue> = ranked.iter().take(k).cloned().collect();
    if let Some(active) = active {
        if !top.iter().any(|facet| facet.value == active) {
            let count = ranked
                .iter()
                .find(|facet| facet.value == active)
                .map(|facet| facet.count)
                .unwrap_or(0);
            top.push(FacetValue {
                value: active.to_string(),
                count,
            });
        }
    }
    top
}

#[derive(Debug)]
pub struct FilterEngine {
    state: FilterState,
    top_k: usize,
    facets: Facets,
    visible: usize,
}

impl FilterEngine {
    pub fn new(top_k: usize) -> Self {
        Self {
            state: FilterState::default(),
            top_k,
            facets: Facets::default(),
            visible: 0,
        }
    }

    pub fn state(&self) -> &FilterState {
        &self.state
    }

    pub fn set_state(&mut self, state: FilterState) {
        self.state = state;
    }

    pub fn clear(&mut self) {
        self.state = FilterState::default();
    }

    pub fn facets(&self) -> &Facets {
        &self.facets
    }

    pub fn visible(&self) -> usize {
        self.visible
    }

    /// Recomputes facets and row visibility. Only touches the hidden flag.
    pub fn apply(&mut self, view: &mut ListingView, items: &BTreeMap<NodeId, Item>) {
        self.facets = Facets {
            cities: top_values(
                items.values().filter_map(|item| item.city.as_deref()),
                self.top_k,
                self.state.city.as_deref(),
            ),
            organizations: top_values(
                items.values().filter_map(|item| item.organization.as_deref()),
                self.top_k,
                self.state.organization.as_deref(),
            ),
        };

        let mut visible = 0;
        for (node, item) in items {
            let show = self.state.matches(item);
            if show {
                visible += 1;
            }
            view.set_hidden(*node, !show);
        }
        self.visible = visible;
    }
}
