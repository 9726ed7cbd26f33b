// src/crawler/extractor.rs
use regex::Regex;
use std::collections::HashSet;
use std::ops::Range;
use tracing::debug;

use crate::config::ExtractionConfig;
use crate::models::ExtractedEmail;

/// Keywords whose proximity to a match raises extraction confidence.
const CONTACT_KEYWORDS: &[&str] = &[
    "contact",
    "email",
    "e-mail",
    "mailto",
    "support",
    "reach",
    "get in touch",
];

/// Domains that only ever appear as documentation placeholders.
const PLACEHOLDER_DOMAINS: &[&str] = &[
    "example.com",
    "example.org",
    "example.net",
    "domain.com",
    "domain.tld",
    "yourdomain.com",
    "yourcompany.com",
    "mysite.com",
    "email.com",
    "test.com",
];

const PLACEHOLDER_LOCAL_PARTS: &[&str] = &[
    "example",
    "name",
    "your",
    "user",
    "username",
    "youremail",
    "firstname.lastname",
    "email",
];

/// File extensions that the address pattern misreads as TLDs, e.g.
/// `logo@2x.png` in a srcset attribute.
const ASSET_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "css", "js", "woff", "woff2", "ttf", "otf",
    "mp4", "webm", "avif", "bmp",
];

pub struct EmailExtractor {
    email_regex: Regex,
    script_block_regex: Regex,
    config: ExtractionConfig,
}

impl EmailExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self {
            email_regex: Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
                .unwrap(),
            script_block_regex: Regex::new(r"(?is)<script\b.*?</script>|<style\b.*?</style>")
                .unwrap(),
            config,
        }
    }

    /// Scans page text for candidate addresses.
    ///
    /// Deterministic: first-occurrence order, deduplicated within the
    /// page by lowercased address (first occurrence's confidence wins).
    pub fn extract(&self, text: &str) -> Vec<ExtractedEmail> {
        let script_ranges = self.script_ranges(text);
        let mut seen = HashSet::new();
        let mut emails = Vec::new();

        for m in self.email_regex.find_iter(text) {
            let address = m.as_str().to_lowercase();

            if !is_valid_address(&address) || is_noise(&address) {
                continue;
            }
            if !seen.insert(address.clone()) {
                continue;
            }

            let confidence = self.score(text, m.start(), m.end(), &script_ranges);
            emails.push(ExtractedEmail {
                address,
                confidence,
            });
        }

        debug!("Extracted {} candidate emails", emails.len());
        emails
    }

    fn score(&self, text: &str, start: usize, end: usize, script_ranges: &[Range<usize>]) -> f32 {
        let mut confidence = self.config.base_confidence;

        let window = context_window(text, start, end, self.config.keyword_window).to_lowercase();
        if CONTACT_KEYWORDS.iter().any(|kw| window.contains(kw)) {
            confidence += self.config.keyword_boost;
        }

        if script_ranges.iter().any(|r| r.contains(&start)) {
            confidence -= self.config.script_penalty;
        }

        confidence.clamp(0.05, 1.0)
    }

    fn script_ranges(&self, text: &str) -> Vec<Range<usize>> {
        self.script_block_regex
            .find_iter(text)
            .map(|m| m.range())
            .collect()
    }
}

/// Domain label structure check on top of the regex match: at least one
/// dot, labels alphanumeric/hyphen with no leading/trailing hyphen.
fn is_valid_address(address: &str) -> bool {
    let Some((local, domain)) = address.rsplit_once('@') else {
        return false;
    };
    if local.is_empty() || !domain.contains('.') {
        return false;
    }

    domain.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

fn is_noise(address: &str) -> bool {
    let Some((local, domain)) = address.rsplit_once('@') else {
        return true;
    };

    if PLACEHOLDER_DOMAINS.contains(&domain) || PLACEHOLDER_LOCAL_PARTS.contains(&local) {
        return true;
    }

    let tld = domain.rsplit('.').next().unwrap_or_default();
    if ASSET_EXTENSIONS.contains(&tld) {
        return true;
    }

    // Version strings and retina suffixes: "2", "2x", "3x". Domains
    // merely starting with a digit (37signals.com) are legitimate.
    domain.split('.').any(is_version_label)
}

fn is_version_label(label: &str) -> bool {
    let digits = label.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return false;
    }
    let rest = &label[digits..];
    rest.is_empty() || (rest.len() == 1 && rest.chars().all(|c| c.is_ascii_alphabetic()))
}

/// Slice of up to `pad` characters on either side of a match. The
/// match offsets come from the regex, so they sit on char boundaries.
fn context_window(text: &str, start: usize, end: usize, pad: usize) -> &str {
    let lo = text[..start]
        .char_indices()
        .rev()
        .take(pad)
        .last()
        .map(|(i, _)| i)
        .unwrap_or(start);
    let hi = text[end..]
        .char_indices()
        .nth(pad)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());
    &text[lo..hi]
}
