pub mod extractor;
pub mod fetcher;
pub mod frontier;
pub mod orchestrator;
pub mod scope;

// Re-export the main types for easy importing
pub use extractor::EmailExtractor;
pub use fetcher::{BrowserSession, Fetcher, HttpBackend, RenderBackend, RenderedPage};
pub use frontier::Frontier;
pub use orchestrator::Orchestrator;
pub use scope::{is_contact_related, normalize_url, registrable_domain, ScopePolicy};
