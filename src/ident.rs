use std::fmt;

use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

pub const OFFER_ID_MAX_LENGTH: usize = 200;

// ASCII-only case folding: Unicode mode would let U+212A and U+017F stand in
// for `k` and `s`.
static OFFER_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i-u)ocds-[a-z0-9-]+").expect("offer id pattern"));

/// Characters `encodeURIComponent` leaves alone.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Canonical listing item identifier.
///
/// Only [`ItemId::parse`] and [`extract_id`] construct one, so every value in
/// circulation already matched the offer pattern and fits the length bound.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemId(String);

impl ItemId {
    /// Returns the first offer id found in `raw`, or `None` when there is no
    /// match or the match is longer than [`OFFER_ID_MAX_LENGTH`].
    pub fn parse(raw: &str) -> Option<Self> {
        let found = OFFER_ID_RE.find(raw)?;
        let id = found.as_str();
        if id.len() > OFFER_ID_MAX_LENGTH {
            return None;
        }
        Some(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ItemId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match Self::parse(&value) {
            Some(id) if id.0 == value => Ok(id),
            _ => Err(format!("invalid offer id: {value:?}")),
        }
    }
}

impl From<ItemId> for String {
    fn from(id: ItemId) -> Self {
        id.0
    }
}

/// Scans cells in order and falls back to the whole row text.
pub fn extract_id<S: AsRef<str>>(cells: &[S], full_text: &str) -> Option<ItemId> {
    cells
        .iter()
        .find_map(|cell| ItemId::parse(cell.as_ref().trim()))
        .or_else(|| ItemId::parse(full_text))
}

/// Destination for an item: the trusted base followed by the encoded id.
pub fn offer_url(base: &Url, id: &ItemId) -> Option<Url> {
    let encoded = utf8_percent_encode(id.as_str(), COMPONENT).to_string();
    base.join(&encoded).ok()
}
