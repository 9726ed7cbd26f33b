// src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// One organization to crawl. Immutable for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seed {
    pub organization_id: String,
    pub root_url: String,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// Optional wall-clock budget for this organization's crawl.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

fn default_max_depth() -> u32 {
    2
}

fn default_max_pages() -> u32 {
    25
}

impl Seed {
    pub fn validate(&self) -> std::result::Result<Url, CrawlError> {
        let invalid = |reason: String| CrawlError::InvalidSeed {
            organization_id: self.organization_id.clone(),
            reason,
        };

        if self.organization_id.trim().is_empty() {
            return Err(invalid("empty organization_id".to_string()));
        }
        if self.max_pages == 0 {
            return Err(invalid("zero page budget".to_string()));
        }

        let url = Url::parse(&self.root_url)
            .map_err(|e| invalid(format!("unparsable root URL {}: {}", self.root_url, e)))?;

        match url.scheme() {
            "http" | "https" => {}
            other => return Err(invalid(format!("unsupported scheme: {}", other))),
        }
        if url.host_str().is_none() {
            return Err(invalid(format!("root URL has no host: {}", self.root_url)));
        }

        Ok(url)
    }
}

/// A single URL to visit, consumed exactly once by a worker.
#[derive(Debug, Clone)]
pub struct CrawlTask {
    pub organization_id: String,
    pub url: Url,
    pub depth: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    Ok,
    Timeout,
    Error,
}

/// Transient fetch output, consumed by the extractor and scope policy.
#[derive(Debug, Clone)]
pub struct PageResult {
    pub url: String,
    pub final_url: String,
    pub status: PageStatus,
    pub raw_text: String,
    pub outbound_links: Vec<String>,
}

impl PageResult {
    pub fn failed(url: &str, status: PageStatus) -> Self {
        Self {
            url: url.to_string(),
            final_url: url.to_string(),
            status,
            raw_text: String::new(),
            outbound_links: Vec::new(),
        }
    }
}

/// Extractor output before organization/source context is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEmail {
    pub address: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailCandidate {
    pub organization_id: String,
    pub address: String,
    pub source_url: String,
    pub confidence: f32,
}

/// Persisted record. Unique per (organization_id, address), first-seen-wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRecord {
    pub organization_id: String,
    pub address: String,
    pub first_source_url: String,
    pub first_seen_at: DateTime<Utc>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrgStatus {
    Pending,
    Running,
    Completed,
    Exhausted,
    Aborted,
}

impl OrgStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgStatus::Pending => "pending",
            OrgStatus::Running => "running",
            OrgStatus::Completed => "completed",
            OrgStatus::Exhausted => "exhausted",
            OrgStatus::Aborted => "aborted",
        }
    }
}

/// Per-organization completion report.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlSummary {
    pub run_id: String,
    pub organization_id: String,
    pub status: OrgStatus,
    pub pages_crawled: u32,
    pub emails_found: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("navigation timed out for {url}")]
    NavigationTimeout { url: String },

    #[error("browser session failed: {0}")]
    SessionFailure(String),

    #[error("invalid seed for {organization_id}: {reason}")]
    InvalidSeed {
        organization_id: String,
        reason: String,
    },

    /// Normal completion signal from the frontier, not an operator-facing error.
    #[error("frontier is empty")]
    FrontierEmpty,
}
