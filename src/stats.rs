//! Accuracy tables persisted as one JSON blob keyed by project.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::scoring::AccuracyTable;

/// project -> field -> backend -> ratio
pub type StatsReport = BTreeMap<String, BTreeMap<String, BTreeMap<String, f64>>>;

#[derive(Debug, Clone)]
pub struct StatsStore {
    path: PathBuf,
}

impl StatsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// All stored tables; a missing file is an empty store.
    pub async fn load(&self) -> Result<BTreeMap<String, AccuracyTable>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e).with_context(|| format!("reading {}", self.path.display())),
        }
    }

    /// Overwrite the table stored under `project`.
    pub async fn save(&self, project: &str, table: &AccuracyTable) -> Result<()> {
        let mut all = self.load().await?;
        all.insert(project.to_string(), table.clone());
        let bytes = serde_json::to_vec_pretty(&all)?;
        // readers only ever see a complete file
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        debug!(project, path = %self.path.display(), "saved stats");
        Ok(())
    }

    /// Add `table` onto whatever is stored under `project`.
    pub async fn merge(&self, project: &str, table: &AccuracyTable) -> Result<AccuracyTable> {
        let mut merged = self.load().await?.remove(project).unwrap_or_default();
        merged.merge(table);
        self.save(project, &merged).await?;
        Ok(merged)
    }

    pub async fn report(&self) -> Result<StatsReport> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .map(|(project, table)| (project, table.report()))
            .collect())
    }
}
