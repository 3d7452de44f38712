use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// A configured command-line tool. The catalog is immutable once the service
/// has started; workers and queues are derived from it at boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub description: String,
    /// Worker pool size; zero means "use the service default".
    #[serde(default)]
    pub workers: usize,
    #[serde(default)]
    pub default_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCatalog {
    pub tools: Vec<Tool>,
}

impl ToolCatalog {
    /// Load the catalog from `path`. A missing file is not an error: the
    /// default catalog is written there (best effort) and returned.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            let catalog = Self::default_catalog();
            catalog.write_default(path);
            return Ok(catalog);
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read tool config {}", path.display()))?;
        let catalog: ToolCatalog = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse tool config {}", path.display()))?;
        info!("loaded {} tools from {}", catalog.tools.len(), path.display());
        Ok(catalog)
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    fn write_default(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("failed to create config directory: {e}");
                return;
            }
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    warn!("failed to save default config: {e}");
                } else {
                    info!("wrote default tool config to {}", path.display());
                }
            }
            Err(e) => warn!("failed to encode default config: {e}"),
        }
    }

    fn default_catalog() -> Self {
        let tool = |name: &str, description: &str, workers: usize| Tool {
            name: name.to_string(),
            command: name.to_string(),
            description: description.to_string(),
            workers,
            default_args: Vec::new(),
        };
        ToolCatalog {
            tools: vec![
                tool("yt-dlp", "YouTube downloader", 2),
                tool("gallery-dl", "Gallery downloader", 2),
                tool("wget", "Web downloader", 4),
                tool("ffmpeg", "Media converter", 2),
                tool("curl", "HTTP client", 4),
            ],
        }
    }
}
