//! Targeted crawler that discovers publicly listed contact emails for
//! lead generation: per-organization frontier, scope-limited link
//! discovery, email extraction with noise filtering, and deduplicated
//! SQLite persistence.

pub mod config;
pub mod crawler;
pub mod database;
pub mod models;
pub mod seeds;

pub use config::{load_config, Config};
pub use crawler::{HttpBackend, Orchestrator, RenderBackend};
pub use models::{CrawlError, CrawlSummary, EmailRecord, OrgStatus, Seed};
