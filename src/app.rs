use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::{self, Config};
use crate::engine::{Engine, EngineParts};
use crate::filter::{FilterState, StatusFilter};
use crate::ident::ItemId;
use crate::item::Item;
use crate::opener::{Broker, PrivilegedOpener, SystemBrowser, TabLauncher};
use crate::settings::patch_from_text;
use crate::storage::{self, Database, Stores};
use crate::trust::{SenderInfo, TrustGate};
use crate::view::ListingView;

pub const USAGE: &str = "\
ezam-lens: tender listing companion for ezamowienia.gov.pl

Usage:
  ezam-lens show <listing.json> [--city C] [--organization O] [--status new|closingSoon] [--starred]
  ezam-lens open <id>...
  ezam-lens star <id>
  ezam-lens note <id> <text>...
  ezam-lens set <setting> <value>
  ezam-lens settings

  --version, -V        Show version and exit
  --help,    -h        Show this help message

Logging is controlled by EZAM_LENS_LOG (default: info).";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Show { listing: PathBuf, filter: FilterState },
    Open { ids: Vec<ItemId> },
    Star { id: ItemId },
    Note { id: ItemId, text: String },
    Set { key: String, value: String },
    Settings,
}

pub fn parse_command(args: &[String]) -> Result<Command> {
    let Some((name, rest)) = args.split_first() else {
        bail!("missing command\n\n{USAGE}");
    };
    let command = match name.as_str() {
        "show" => {
            let mut listing = None;
            let mut filter = FilterState::default();
            let mut iter = rest.iter();
            while let Some(arg) = iter.next() {
                let mut value = |flag: &str| {
                    iter.next()
                        .cloned()
                        .with_context(|| format!("{flag} needs a value"))
                };
                match arg.as_str() {
                    "--city" => filter.city = Some(value("--city")?),
                    "--organization" => filter.organization = Some(value("--organization")?),
                    "--status" => filter.status = StatusFilter::parse(&value("--status")?),
                    "--starred" => filter.starred_only = true,
                    path if listing.is_none() => listing = Some(PathBuf::from(path)),
                    other => bail!("unexpected argument {other:?}"),
                }
            }
            let listing = listing.context("show needs a listing file")?;
            Command::Show { listing, filter }
        }
        "open" => {
            if rest.is_empty() {
                bail!("open needs at least one id");
            }
            let ids = rest.iter().map(|raw| parse_id(raw)).collect::<Result<_>>()?;
            Command::Open { ids }
        }
        "star" => match rest {
            [raw] => Command::Star { id: parse_id(raw)? },
            _ => bail!("star takes exactly one id"),
        },
        "note" => match rest {
            [raw, text @ ..] => Command::Note {
                id: parse_id(raw)?,
                text: text.join(" "),
            },
            _ => bail!("note needs an id"),
        },
        "set" => match rest {
            [key, value] => Command::Set {
                key: key.clone(),
                value: value.clone(),
            },
            _ => bail!("set takes a setting name and a value"),
        },
        "settings" => Command::Settings,
        other => bail!("unknown command {other:?}\n\n{USAGE}"),
    };
    Ok(command)
}

fn parse_id(raw: &str) -> Result<ItemId> {
    match ItemId::try_from(raw.trim().to_string()) {
        Ok(id) => Ok(id),
        Err(_) => bail!("{raw:?} is not an offer id"),
    }
}

/// One listing row in a snapshot file: either bare cell texts or an
/// object with explicit classes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RowSpec {
    Cells(Vec<String>),
    Row {
        #[serde(default)]
        classes: Option<Vec<String>>,
        cells: Vec<String>,
    },
}

fn read_listing(path: &Path, cfg: &Config) -> Result<ListingView> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("read listing {}", path.display()))?;
    let rows: Vec<RowSpec> = serde_json::from_str(&data)
        .with_context(|| format!("parse listing {}", path.display()))?;
    let mut view = ListingView::new();
    let default_classes = vec![cfg.sync.row_class.clone()];
    for row in rows {
        let (classes, cells) = match row {
            RowSpec::Cells(cells) => (default_classes.clone(), cells),
            RowSpec::Row { classes, cells } => {
                (classes.unwrap_or_else(|| default_classes.clone()), cells)
            }
        };
        let classes: Vec<&str> = classes.iter().map(String::as_str).collect();
        view.insert_row(&classes, cells);
    }
    // Snapshots carry no notion of width; treat them as wide.
    view.set_viewport_width(cfg.sync.compact_max_width.saturating_add(1));
    Ok(view)
}

/// Durable scopes when the database opens, memory-only scopes otherwise.
fn open_stores(path: Option<PathBuf>) -> Stores {
    match Database::open(storage::Options { path }) {
        Ok(db) => Stores::with_database(&db),
        Err(err) => {
            let reason = format!("{err:#}");
            warn!(error = %reason, "storage unavailable; continuing in memory");
            Stores::in_memory()
        }
    }
}

pub fn run(args: Vec<String>) -> Result<()> {
    let command = parse_command(&args)?;
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    let base = cfg.trust.base()?;

    let stores = open_stores(cfg.storage.path.clone());

    let gate = TrustGate::new(&base, &cfg.trust.extension_id, &cfg.trust.extension_origin);
    let browser: Arc<dyn TabLauncher> = Arc::new(SystemBrowser);
    let broker = Broker::spawn(gate.clone(), browser.clone());
    let identity = SenderInfo {
        id: Some(cfg.trust.extension_id.clone()),
        url: Some(cfg.trust.extension_origin.clone()),
    };
    let opener = PrivilegedOpener::new(gate, identity, Some(broker.channel()), browser);

    let view = match &command {
        Command::Show { listing, .. } => read_listing(listing, &cfg)?,
        _ => ListingView::new(),
    };
    let mut engine = Engine::start(EngineParts {
        config: cfg,
        stores,
        opener,
        view,
    })?;
    info!(
        config = %friendly_path(config::default_path().as_ref()),
        "engine ready"
    );

    let outcome = execute(&mut engine, command);
    engine.shutdown();
    drop(engine);
    drop(broker);
    outcome
}

fn execute(engine: &mut Engine, command: Command) -> Result<()> {
    match command {
        Command::Show { filter, .. } => {
            engine.data_ready();
            engine.set_filter(filter);
            print_listing(engine);
        }
        Command::Open { ids } => {
            for id in &ids {
                engine.select(id);
            }
            let started = Instant::now();
            let count = engine.open_selected();
            drive_until_idle(engine, started);
            println!("opened {count}");
        }
        Command::Star { id } => {
            let starred = engine.toggle_star(&id);
            println!("{id} {}", if starred { "starred" } else { "unstarred" });
        }
        Command::Note { id, text } => {
            let kept = engine.set_note(&id, &text);
            if kept.trim().is_empty() {
                println!("{id} note cleared");
            } else {
                println!("{id} note: {kept}");
            }
        }
        Command::Set { key, value } => {
            engine.update_settings(&patch_from_text(&key, &value));
            print_settings(engine)?;
        }
        Command::Settings => print_settings(engine)?,
    }
    for toast in engine.take_toasts() {
        eprintln!("{toast}");
    }
    Ok(())
}

/// Runs the engine on real time until no bulk open is left.
fn drive_until_idle(engine: &mut Engine, started: Instant) {
    while engine.is_bulk_open_running() {
        let Some(deadline) = engine.next_deadline() else {
            break;
        };
        let elapsed = started.elapsed();
        if deadline > elapsed {
            thread::sleep(deadline - elapsed);
        }
        engine.tick(started.elapsed().max(deadline));
    }
    engine.tick(started.elapsed() + Duration::from_millis(1));
}

fn print_listing(engine: &Engine) {
    let items = engine.items();
    for (node, item) in &items {
        let hidden = engine
            .view()
            .row(*node)
            .map(|row| row.is_hidden())
            .unwrap_or(false);
        if hidden {
            continue;
        }
        let note = engine.state().get_note(&item.id);
        let mut line = format!("{}  {}  {}", flag_column(item), item.id, item.title);
        if !note.is_empty() {
            line.push_str(&format!("  [{note}]"));
        }
        println!("{line}");
    }
    println!("visible: {}/{}", engine.visible_count(), items.len());
    let facets = engine.facets();
    let join = |values: &[crate::filter::FacetValue]| {
        values
            .iter()
            .map(|facet| format!("{} ({})", facet.value, facet.count))
            .collect::<Vec<_>>()
            .join(", ")
    };
    println!("cities: {}", join(&facets.cities));
    println!("organizations: {}", join(&facets.organizations));
}

fn flag_column(item: &Item) -> String {
    let flags = item.flags;
    [
        (flags.starred, '*'),
        (flags.visited, 'v'),
        (flags.closing_soon, '!'),
        (flags.newly_initiated, 'N'),
    ]
    .iter()
    .map(|(on, mark)| if *on { *mark } else { '.' })
    .collect()
}

fn print_settings(engine: &Engine) -> Result<()> {
    let rendered = serde_json::to_string_pretty(&engine.settings().to_value())
        .context("render settings")?;
    println!("{rendered}");
    Ok(())
}

pub fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/ezam-lens/config.yaml".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::KeyValueStore;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn parses_show_with_filters() {
        let command = parse_command(&args(&["show", "list.json", "--city", "Kraków", "--starred"])).unwrap();
        assert_eq!(
            command,
            Command::Show {
                listing: PathBuf::from("list.json"),
                filter: FilterState {
                    city: Some("Kraków".into()),
                    starred_only: true,
                    ..FilterState::default()
                },
            }
        );
    }

    #[test]
    fn rejects_non_ids() {
        let err = parse_command(&args(&["open", "ocds-1", "https://evil.example/"])).unwrap_err();
        assert!(err.to_string().contains("not an offer id"));
        assert!(parse_command(&args(&["star", "ocds-1", "ocds-2"])).is_err());
        assert!(parse_command(&args(&[])).is_err());
    }

    #[test]
    fn note_text_is_joined() {
        let command = parse_command(&args(&["note", "ocds-1", "call", "Monday"])).unwrap();
        assert_eq!(
            command,
            Command::Note {
                id: ItemId::parse("ocds-1").unwrap(),
                text: "call Monday".into(),
            }
        );
    }

    #[test]
    fn unusable_storage_path_falls_back_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "not a directory").unwrap();
        let stores = open_stores(Some(blocker.join("nested").join("state.db")));
        stores
            .synced
            .set("ezamSettings", serde_json::json!({"showBadges": false}))
            .unwrap();
        assert_eq!(
            stores.synced.get("ezamSettings").unwrap(),
            Some(serde_json::json!({"showBadges": false}))
        );
    }

    #[test]
    fn flags_render_in_fixed_order() {
        let mut item = Item {
            id: ItemId::parse("ocds-1").unwrap(),
            url: url::Url::parse("https://trusted.example/base/ocds-1").unwrap(),
            title: String::new(),
            organization: None,
            city: None,
            submission: None,
            initiation: None,
            flags: Default::default(),
        };
        assert_eq!(flag_column(&item), "....");
        item.flags.starred = true;
        item.flags.newly_initiated = true;
        assert_eq!(flag_column(&item), "*..N");
    }
}
