//! Cache-and-sync layer for the elective-selection portal.
//!
//! - [`cache`]: TTL cache over a pluggable storage medium, with one-shot
//!   force-refresh flags
//! - [`store`]: the Record Store contract plus in-memory and PostgREST backends
//! - [`query`] and [`sync`]: per-view load state, confirm-then-apply mutations,
//!   and full refetch on change notifications
//! - [`portal`]: typed records, cache keys and the cached client
//!
//! The `app`, `event` and `ui` modules are the terminal front end.

pub mod app;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod portal;
pub mod query;
pub mod store;
pub mod sync;
pub mod ui;
