//! 🗃️ Audit artifacts: every stage leaves its output on disk before the next one starts.
//!
//! If the import dies at batch 412, the transform artifact is still sitting there, and so
//! is the export. Nobody has to re-read the source store to find out what was sent.
//!
//! Names are deterministic: `<collection>_<stage>_<YYYY-MM-DDTHH-MM-SS-mmmZ>.json`, and
//! `migration-report_<ts>.json` for the run report.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::common::iso_safe_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Export,
    Transform,
    Import,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Export => "export",
            ArtifactKind::Transform => "transform",
            ArtifactKind::Import => "import",
        }
    }
}

pub fn stage_artifact_name(collection: &str, kind: ArtifactKind, at: &DateTime<Utc>) -> String {
    format!("{collection}_{}_{}.json", kind.as_str(), iso_safe_timestamp(at))
}

pub fn report_artifact_name(at: &DateTime<Utc>) -> String {
    format!("migration-report_{}.json", iso_safe_timestamp(at))
}

/// 💾 Writes pretty-printed JSON artifacts into one directory, creating it on first use.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn write<T: Serialize>(&self, file_name: &str, payload: &T) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await.with_context(|| {
            format!(
                "💀 Could not create the artifact directory '{}'. No audit trail, no migration.",
                self.dir.display()
            )
        })?;
        let path = self.dir.join(file_name);
        let rendered = serde_json::to_vec_pretty(payload)
            .with_context(|| format!("💀 Could not render artifact '{file_name}' as JSON"))?;
        tokio::fs::write(&path, &rendered).await.with_context(|| {
            format!(
                "💀 Could not write artifact '{}'. Disk full, permissions, or a cosmic ray. Pick one.",
                path.display()
            )
        })?;
        debug!(bytes = rendered.len(), "🗃️ wrote artifact {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn the_one_where_artifact_names_are_filesystem_safe() {
        let at = Utc
            .timestamp_opt(1_609_459_200, 123_000_000)
            .single()
            .expect("valid instant");
        assert_eq!(
            stage_artifact_name("users", ArtifactKind::Export, &at),
            "users_export_2021-01-01T00-00-00-123Z.json"
        );
        assert_eq!(
            report_artifact_name(&at),
            "migration-report_2021-01-01T00-00-00-123Z.json"
        );
    }

    #[tokio::test]
    async fn the_one_where_the_directory_appears_when_needed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let writer = ArtifactWriter::new(dir.path().join("nested/artifacts"));
        let path = writer
            .write("hello.json", &serde_json::json!({"ok": true}))
            .await?;
        let back: serde_json::Value = serde_json::from_slice(&std::fs::read(path)?)?;
        assert_eq!(back["ok"], true);
        Ok(())
    }
}
