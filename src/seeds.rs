// src/seeds.rs
use serde::Deserialize;
use tracing::{info, warn};

use crate::models::{Result, Seed};

#[derive(Debug, Deserialize)]
struct SeedsFile {
    seeds: Vec<Seed>,
}

/// Loads seeds from a YAML file and drops the invalid ones.
///
/// A bad seed is fatal only for its own organization: it gets reported
/// here and the rest of the batch goes ahead.
pub async fn load_seeds(path: &str) -> Result<Vec<Seed>> {
    let content = tokio::fs::read_to_string(path).await?;
    let parsed: SeedsFile = serde_yaml::from_str(&content)?;

    let mut valid = Vec::new();
    for seed in parsed.seeds {
        match seed.validate() {
            Ok(_) => valid.push(seed),
            Err(e) => warn!("Skipping seed: {}", e),
        }
    }

    info!("Loaded {} seeds from {}", valid.len(), path);
    Ok(valid)
}
