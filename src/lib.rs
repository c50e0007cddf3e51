#![allow(clippy::uninlined_format_args)]

pub mod actions;
pub mod app;
pub mod config;
pub mod dates;
pub mod engine;
pub mod filter;
pub mod i18n;
pub mod ident;
pub mod item;
pub mod note_draft;
pub mod opener;
pub mod presets;
pub mod scheduler;
pub mod scroll;
pub mod settings;
pub mod state;
pub mod storage;
pub mod sync;
pub mod trust;
pub mod view;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
pub use engine::{Engine, EngineParts};
