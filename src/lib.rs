//! Loading, caching, and applying compiler configurations for
//! editor-resident script files.
//!
//! The engine (see [`engine::ScriptConfigurationEngine`]) tracks one state
//! machine per script around a deduplicating single-worker queue and a
//! two-tier cache: the applied configuration visible to analysis, and a
//! per-script pending slot awaiting user acceptance. Everything the engine
//! touches in the outside world goes through the traits in [`host`].

pub mod attr;
pub mod cache;
pub mod config;
pub mod diagnostic;
pub mod engine;
pub mod executor;
pub mod host;
pub mod loader;
pub mod notify;
pub mod output;
pub mod resolve;
pub mod script;
pub mod stamp;
