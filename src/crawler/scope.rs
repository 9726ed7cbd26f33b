// src/crawler/scope.rs
use url::Url;

use crate::models::{CrawlError, Seed};

/// Extensions that mark a link as a non-page resource.
const SKIP_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "zip", "tar", "gz", "rar", "7z", "exe",
    "dmg", "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "bmp", "avif", "mp3", "mp4", "webm",
    "avi", "mov", "wav", "css", "js", "json", "xml", "rss", "woff", "woff2", "ttf", "otf", "eot",
];

/// Paths worth visiting first when hunting for contact surfaces.
const CONTACT_PATH_HINTS: &[&str] = &[
    "contact",
    "about",
    "team",
    "people",
    "staff",
    "leadership",
    "founders",
    "management",
    "impressum",
    "support",
];

/// Second-level suffixes that take a third label for the registrable
/// domain under a two-letter ccTLD (co.uk, com.au, ...).
const SECOND_LEVEL_SUFFIXES: &[&str] = &["co", "com", "org", "net", "ac", "gov", "edu"];

/// Normalizes a URL for visited-set identity: lowercase scheme/host,
/// default ports stripped, fragment dropped, query parameters sorted,
/// trailing slash removed except at the root.
pub fn normalize_url(raw: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(raw)?;

    // The url crate already lowercases scheme and host and drops
    // default ports during parsing.
    url.set_fragment(None);

    if url.query().is_some() {
        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        params.sort();

        if params.is_empty() {
            url.set_query(None);
        } else {
            // query_pairs() percent-decodes, so rebuild through the
            // serializer or a decoded '&'/'=' would split a value.
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            serializer.extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            let query = serializer.finish();
            url.set_query(Some(&query));
        }
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Ok(url)
}

/// Registrable domain: the last two host labels, or three when the
/// second-to-last is a common second-level suffix under a two-letter
/// ccTLD. A heuristic, not a full public-suffix lookup.
pub fn registrable_domain(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() < 2 {
        return Some(host);
    }

    let tld = labels[labels.len() - 1];
    let second = labels[labels.len() - 2];
    let take = if labels.len() >= 3 && tld.len() == 2 && SECOND_LEVEL_SUFFIXES.contains(&second) {
        3
    } else {
        2
    };

    Some(labels[labels.len() - take..].join("."))
}

pub struct ScopePolicy {
    seed_domain: String,
    max_depth: u32,
}

impl ScopePolicy {
    pub fn new(seed: &Seed) -> Result<Self, CrawlError> {
        let root = seed.validate()?;
        let seed_domain = registrable_domain(&root).ok_or_else(|| CrawlError::InvalidSeed {
            organization_id: seed.organization_id.clone(),
            reason: format!("no registrable domain in {}", seed.root_url),
        })?;

        Ok(Self {
            seed_domain,
            max_depth: seed.max_depth,
        })
    }

    /// Decides whether a discovered link is in crawl scope when found at
    /// `current_depth`. Visited-set deduplication is the frontier's job.
    pub fn in_scope(&self, link: &Url, current_depth: u32) -> bool {
        if current_depth + 1 > self.max_depth {
            return false;
        }
        if link.scheme() != "http" && link.scheme() != "https" {
            return false;
        }
        if is_non_page_resource(link) {
            return false;
        }
        match registrable_domain(link) {
            Some(domain) => domain == self.seed_domain,
            None => false,
        }
    }

    pub fn seed_domain(&self) -> &str {
        &self.seed_domain
    }
}

fn is_non_page_resource(url: &Url) -> bool {
    let path = url.path().to_lowercase();
    match path.rsplit_once('.') {
        Some((_, ext)) => SKIP_EXTENSIONS.contains(&ext),
        None => false,
    }
}

/// Contact/about/team pages get dequeued ahead of siblings at the same depth.
pub fn is_contact_related(url: &Url) -> bool {
    let path = url.path().to_lowercase();
    CONTACT_PATH_HINTS.iter().any(|hint| path.contains(hint))
}
