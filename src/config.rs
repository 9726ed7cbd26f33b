use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub extraction: ExtractionConfig,
    pub logging: LoggingConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlerConfig {
    /// Workers (and therefore browser sessions) per organization.
    pub workers_per_org: usize,
    /// Hard cap on concurrent browser sessions across all organizations.
    pub max_concurrent_sessions: usize,
    pub fetch_timeout_seconds: u64,
    /// Polite delay between fetches on the same worker; jittered.
    pub delay_ms: u64,
}

/// Confidence weighting is tuning, not correctness, so it lives in config.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractionConfig {
    pub base_confidence: f32,
    pub keyword_boost: f32,
    pub script_penalty: f32,
    /// Window (in characters) around a match scanned for contact keywords.
    pub keyword_window: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    pub database_path: String,
    pub export_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crawler: CrawlerConfig {
                workers_per_org: 2,
                max_concurrent_sessions: 8,
                fetch_timeout_seconds: 30,
                delay_ms: 500,
            },
            extraction: ExtractionConfig {
                base_confidence: 0.5,
                keyword_boost: 0.3,
                script_penalty: 0.3,
                keyword_window: 120,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
            output: OutputConfig {
                database_path: "data/contacts.db".to_string(),
                export_path: "out/emails.json".to_string(),
            },
        }
    }
}

pub async fn load_config(path: &str) -> crate::models::Result<Config> {
    let content = tokio::fs::read_to_string(path).await?;
    let config: Config = serde_yaml::from_str(&content)?;
    Ok(config)
}
