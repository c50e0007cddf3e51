use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;
use tracing::debug;

use crate::settings::Language;

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern"));

#[derive(Debug, Deserialize)]
struct Entry {
    message: String,
}

/// Localized labels. Missing keys fall back to the caller's default text.
#[derive(Debug, Clone)]
pub struct Translator {
    language: Language,
    messages: HashMap<String, String>,
}

impl Translator {
    pub fn empty(language: Language) -> Self {
        Self {
            language,
            messages: HashMap::new(),
        }
    }

    /// Reads `<dir>/<lang>/messages.json`. An absent or unreadable catalog
    /// leaves every label on its fallback.
    pub fn load(dir: Option<&Path>, language: Language) -> Self {
        let Some(dir) = dir else {
            return Self::empty(language);
        };
        match read_catalog(&dir.join(language.code()).join("messages.json")) {
            Ok(messages) => Self { language, messages },
            Err(err) => {
                debug!(error = %err, lang = language.code(), "using fallback labels");
                Self::empty(language)
            }
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn t(&self, key: &str, fallback: &str) -> String {
        self.translate(key, fallback, &[])
    }

    pub fn translate(&self, key: &str, fallback: &str, vars: &[(&str, String)]) -> String {
        let template = self
            .messages
            .get(key)
            .map(String::as_str)
            .unwrap_or(fallback);
        format_message(template, vars)
    }
}

fn read_catalog(path: &Path) -> Result<HashMap<String, String>> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("i18n: read catalog {}", path.display()))?;
    let entries: HashMap<String, Entry> = serde_json::from_str(&data)
        .with_context(|| format!("i18n: parse catalog {}", path.display()))?;
    Ok(entries
        .into_iter()
        .map(|(key, entry)| (key, entry.message))
        .collect())
}

/// Replaces `{name}` with the matching var; unknown names stay as written.
pub fn format_message(template: &str, vars: &[(&str, String)]) -> String {
    if vars.is_empty() {
        return template.to_string();
    }
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures<'_>| {
            let name = &caps[1];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.clone())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
