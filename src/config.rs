use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

const DEFAULT_ENV_PREFIX: &str = "EZAM_LENS";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub trust: TrustConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub open: OpenConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub notes: NotesConfig,
    #[serde(default)]
    pub columns: ColumnLayout,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub locales_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrustConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_extension_id")]
    pub extension_id: String,
    #[serde(default = "default_extension_origin")]
    pub extension_origin: String,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            extension_id: default_extension_id(),
            extension_origin: default_extension_origin(),
        }
    }
}

impl TrustConfig {
    pub fn base(&self) -> Result<Url> {
        let url = Url::parse(&self.base_url)
            .with_context(|| format!("config: trust.base_url {:?} is not a URL", self.base_url))?;
        anyhow::ensure!(
            url.scheme() == "https",
            "config: trust.base_url must use https"
        );
        Ok(url)
    }
}

fn default_base_url() -> String {
    "https://ezamowienia.gov.pl/mp-client/tenders/".into()
}

fn default_extension_id() -> String {
    "ezam-lens".into()
}

fn default_extension_origin() -> String {
    "chrome-extension://ezam-lens/".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    #[serde(default = "default_row_class")]
    pub row_class: String,
    #[serde(default = "default_min_cells")]
    pub min_cells: usize,
    #[serde(default = "default_debounce", with = "humantime_serde")]
    pub debounce: Duration,
    #[serde(default = "default_facet_retry_delay", with = "humantime_serde")]
    pub facet_retry_delay: Duration,
    #[serde(default = "default_facet_retry_cap")]
    pub facet_retry_cap: u32,
    #[serde(default = "default_compact_max_width")]
    pub compact_max_width: u32,
    #[serde(default = "default_resize_debounce", with = "humantime_serde")]
    pub resize_debounce: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            row_class: default_row_class(),
            min_cells: default_min_cells(),
            debounce: default_debounce(),
            facet_retry_delay: default_facet_retry_delay(),
            facet_retry_cap: default_facet_retry_cap(),
            compact_max_width: default_compact_max_width(),
            resize_debounce: default_resize_debounce(),
        }
    }
}

fn default_row_class() -> String {
    "tr-link".into()
}

fn default_min_cells() -> usize {
    2
}

fn default_debounce() -> Duration {
    Duration::from_millis(150)
}

fn default_facet_retry_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_facet_retry_cap() -> u32 {
    20
}

fn default_compact_max_width() -> u32 {
    1920
}

fn default_resize_debounce() -> Duration {
    Duration::from_millis(150)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenConfig {
    #[serde(default = "default_bulk_delay", with = "humantime_serde")]
    pub bulk_delay: Duration,
}

impl Default for OpenConfig {
    fn default() -> Self {
        Self {
            bulk_delay: default_bulk_delay(),
        }
    }
}

fn default_bulk_delay() -> Duration {
    Duration::from_millis(300)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    6
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotesConfig {
    #[serde(default = "default_note_max_len")]
    pub max_len: usize,
    #[serde(default = "default_note_debounce", with = "humantime_serde")]
    pub debounce: Duration,
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            max_len: default_note_max_len(),
            debounce: default_note_debounce(),
        }
    }
}

fn default_note_max_len() -> usize {
    256
}

fn default_note_debounce() -> Duration {
    Duration::from_millis(200)
}

/// Which cell holds which field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnLayout {
    #[serde(default)]
    pub title: usize,
    #[serde(default = "default_organization_column")]
    pub organization: usize,
    #[serde(default = "default_city_column")]
    pub city: usize,
    #[serde(default = "default_submission_column")]
    pub submission: usize,
    #[serde(default = "default_initiation_column")]
    pub initiation: usize,
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self {
            title: 0,
            organization: default_organization_column(),
            city: default_city_column(),
            submission: default_submission_column(),
            initiation: default_initiation_column(),
        }
    }
}

fn default_organization_column() -> usize {
    1
}

fn default_city_column() -> usize {
    2
}

fn default_submission_column() -> usize {
    7
}

fn default_initiation_column() -> usize {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            cfg = read_config_file(path)?;
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            cfg = read_config_file(&default_path)?;
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    fn duration(target: &mut Duration, value: &str) {
        if let Ok(parsed) = humantime::parse_duration(value) {
            *target = parsed;
        }
    }
    fn number<T: std::str::FromStr>(target: &mut T, value: &str) {
        if let Ok(parsed) = value.parse::<T>() {
            *target = parsed;
        }
    }

    match key {
        "trust.base_url" => cfg.trust.base_url = value,
        "trust.extension_id" => cfg.trust.extension_id = value,
        "trust.extension_origin" => cfg.trust.extension_origin = value,
        "sync.row_class" => cfg.sync.row_class = value,
        "sync.min_cells" => number(&mut cfg.sync.min_cells, &value),
        "sync.debounce" => duration(&mut cfg.sync.debounce, &value),
        "sync.facet_retry_delay" => duration(&mut cfg.sync.facet_retry_delay, &value),
        "sync.facet_retry_cap" => number(&mut cfg.sync.facet_retry_cap, &value),
        "sync.compact_max_width" => number(&mut cfg.sync.compact_max_width, &value),
        "sync.resize_debounce" => duration(&mut cfg.sync.resize_debounce, &value),
        "open.bulk_delay" => duration(&mut cfg.open.bulk_delay, &value),
        "filter.top_k" => number(&mut cfg.filter.top_k, &value),
        "notes.max_len" => number(&mut cfg.notes.max_len, &value),
        "notes.debounce" => duration(&mut cfg.notes.debounce, &value),
        "storage.path" => cfg.storage.path = Some(PathBuf::from(value)),
        "locales_dir" => cfg.locales_dir = Some(PathBuf::from(value)),
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ezam-lens").join("config.yaml"))
}
