use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

pub const SETTINGS_KEY: &str = "ezamSettings";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LinkPlacement {
    #[default]
    Cell,
    Details,
}

impl From<String> for LinkPlacement {
    fn from(value: String) -> Self {
        match value.as_str() {
            // "column" is what older builds stored for the details layout.
            "details" | "column" => LinkPlacement::Details,
            _ => LinkPlacement::Cell,
        }
    }
}

impl From<LinkPlacement> for String {
    fn from(value: LinkPlacement) -> Self {
        match value {
            LinkPlacement::Cell => "cell".into(),
            LinkPlacement::Details => "details".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Language {
    En,
    Pl,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Pl => "pl",
        }
    }

    pub fn detect() -> Self {
        let raw = std::env::var("LC_ALL")
            .or_else(|_| std::env::var("LANG"))
            .unwrap_or_default();
        Language::from(raw)
    }
}

impl From<String> for Language {
    fn from(value: String) -> Self {
        if value.to_ascii_lowercase().starts_with("pl") {
            Language::Pl
        } else {
            Language::En
        }
    }
}

impl From<Language> for String {
    fn from(value: Language) -> Self {
        value.code().to_string()
    }
}

/// Snapshot of the user's options, as written by the options surface.
///
/// Keys this build does not know are carried in `extra` and written back
/// untouched, so a round trip through [`Settings::merged`] never drops what
/// another surface stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub link_placement: LinkPlacement,
    pub highlight_rows: bool,
    pub show_tooltips: bool,
    pub show_copy_buttons: bool,
    pub enable_middle_click: bool,
    pub row_click_open: bool,
    pub open_in_background: bool,
    pub show_copy_toast: bool,
    pub remember_filters: bool,
    pub sticky_header: bool,
    pub show_visited: bool,
    pub quick_jump: bool,
    pub keyboard_nav: bool,
    pub inline_expand: bool,
    pub show_badges: bool,
    pub remember_scroll: bool,
    pub show_mini_toolbar: bool,
    pub multi_select: bool,
    /// Leading columns pinned while scrolling sideways: 0, 1 or 2.
    pub freeze_columns: i64,
    pub closing_soon_days: i64,
    pub language: Language,
    pub toolbar_minimized: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            link_placement: LinkPlacement::Cell,
            highlight_rows: true,
            show_tooltips: true,
            show_copy_buttons: true,
            enable_middle_click: true,
            row_click_open: true,
            open_in_background: false,
            show_copy_toast: true,
            remember_filters: true,
            sticky_header: true,
            show_visited: true,
            quick_jump: true,
            keyboard_nav: true,
            inline_expand: true,
            show_badges: true,
            remember_scroll: true,
            show_mini_toolbar: true,
            multi_select: true,
            freeze_columns: 1,
            closing_soon_days: 3,
            language: Language::detect(),
            toolbar_minimized: true,
            extra: Map::new(),
        }
    }
}

impl Settings {
    /// Stored value layered over the defaults. Anything unreadable yields
    /// the defaults.
    pub fn from_stored(stored: Option<Value>) -> Self {
        let Some(value) = stored else {
            return Self::default();
        };
        Self::default().merged(&value)
    }

    /// Applies the keys present in `patch` on top of `self`.
    pub fn merged(&self, patch: &Value) -> Self {
        let Value::Object(patch) = patch else {
            warn!("ignoring settings patch that is not an object");
            return self.clone();
        };
        let mut base = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for (key, value) in patch {
            base.insert(key.clone(), value.clone());
        }
        match serde_json::from_value(Value::Object(base)) {
            Ok(next) => next,
            Err(err) => {
                warn!(error = %err, "ignoring malformed settings patch");
                self.clone()
            }
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Root class pinning the leading columns, if any.
    pub fn freeze_class(&self) -> Option<&'static str> {
        match self.freeze_columns {
            n if n <= 0 => None,
            2 => Some("ezam-freeze-2"),
            _ => Some("ezam-freeze-1"),
        }
    }

    /// True when switching from `self` to `next` changes what gets attached
    /// to rows, which forces a full rebuild.
    pub fn rendering_changed(&self, next: &Settings) -> bool {
        self.link_placement != next.link_placement
            || self.show_badges != next.show_badges
            || self.language != next.language
            || self.show_visited != next.show_visited
            || self.show_copy_buttons != next.show_copy_buttons
            || self.multi_select != next.multi_select
            || self.inline_expand != next.inline_expand
            || self.show_tooltips != next.show_tooltips
    }
}

/// Turns `set <key> <value>` input into a settings patch.
pub fn patch_from_text(key: &str, raw: &str) -> Value {
    let value = match raw {
        "true" | "on" => Value::Bool(true),
        "false" | "off" => Value::Bool(false),
        _ => match raw.parse::<i64>() {
            Ok(number) => Value::from(number),
            Err(_) => Value::String(raw.to_string()),
        },
    };
    let mut patch = Map::new();
    patch.insert(key.to_string(), value);
    Value::Object(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn partial_stored_value_keeps_defaults() {
        let settings = Settings::from_stored(Some(json!({"showBadges": false, "language": "pl-PL"})));
        assert!(!settings.show_badges);
        assert!(settings.multi_select);
        assert_eq!(settings.language, Language::Pl);
        assert_eq!(settings.closing_soon_days, 3);
    }

    #[test]
    fn legacy_column_placement_means_details() {
        let settings = Settings::from_stored(Some(json!({"linkPlacement": "column"})));
        assert_eq!(settings.link_placement, LinkPlacement::Details);
        let unknown = Settings::from_stored(Some(json!({"linkPlacement": "sideways"})));
        assert_eq!(unknown.link_placement, LinkPlacement::Cell);
    }

    #[test]
    fn malformed_patch_is_ignored() {
        let base = Settings::default();
        let next = base.merged(&json!({"showBadges": "nope"}));
        assert_eq!(next, base);
        assert_eq!(base.merged(&json!(42)), base);
    }

    #[test]
    fn rendering_diff_tracks_layout_keys_only() {
        let base = Settings::default();
        assert!(!base.rendering_changed(&base.merged(&json!({"openInBackground": true}))));
        assert!(base.rendering_changed(&base.merged(&json!({"linkPlacement": "details"}))));
        assert!(base.rendering_changed(&base.merged(&json!({"showBadges": false}))));
    }

    #[test]
    fn unknown_keys_survive_merge_and_write_back() {
        let stored = json!({"showBadges": false, "futureOption": {"a": 1}, "panelWidth": 320});
        let settings = Settings::from_stored(Some(stored));
        let next = settings.merged(&json!({"openInBackground": true}));
        let written = next.to_value();
        assert_eq!(written["futureOption"], json!({"a": 1}));
        assert_eq!(written["panelWidth"], json!(320));
        assert_eq!(written["showBadges"], json!(false));
        assert_eq!(written["openInBackground"], json!(true));
        assert!(next.extra.get("openInBackground").is_none());
    }

    #[test]
    fn layout_options_have_defaults() {
        let settings = Settings::from_stored(Some(json!({})));
        assert!(settings.sticky_header);
        assert!(settings.remember_scroll);
        assert!(settings.show_mini_toolbar);
        assert!(settings.toolbar_minimized);
        assert_eq!(settings.freeze_columns, 1);
        assert_eq!(settings.freeze_class(), Some("ezam-freeze-1"));
        assert_eq!(settings.merged(&json!({"freezeColumns": 2})).freeze_class(), Some("ezam-freeze-2"));
        assert_eq!(settings.merged(&json!({"freezeColumns": 0})).freeze_class(), None);
        assert!(!settings.rendering_changed(&settings.merged(&json!({"stickyHeader": false}))));
    }

    #[test]
    fn text_patches_are_typed() {
        assert_eq!(patch_from_text("showBadges", "off"), json!({"showBadges": false}));
        assert_eq!(patch_from_text("closingSoonDays", "5"), json!({"closingSoonDays": 5}));
        assert_eq!(patch_from_text("language", "pl"), json!({"language": "pl"}));
    }
}
