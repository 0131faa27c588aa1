//! Output directory for probe results

use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::info;

/// Make a value safe for use in a file name
pub fn slug(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Writes result files into one directory
#[derive(Debug, Clone)]
pub struct Report {
    dir: PathBuf,
}

impl Report {
    /// Clear `dir` and recreate it empty
    pub async fn prepare(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to clear {}", dir.display()))?;
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `{"timestamp": ..., "data": ...}` as pretty JSON
    pub async fn write_json(&self, name: &str, data: &Value) -> Result<PathBuf> {
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .context("Failed to format timestamp")?;
        let document = json!({
            "timestamp": timestamp,
            "data": data,
        });
        let mut text = serde_json::to_string_pretty(&document)?;
        text.push('\n');
        self.write(name, text.as_bytes()).await
    }

    pub async fn write_bytes(&self, name: &str, data: &[u8]) -> Result<PathBuf> {
        self.write(name, data).await
    }

    async fn write(&self, name: &str, data: &[u8]) -> Result<PathBuf> {
        let target = self.dir.join(name);
        tokio::fs::write(&target, data)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;
        info!("Wrote {}", target.display());
        Ok(target)
    }
}
