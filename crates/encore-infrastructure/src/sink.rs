// SPDX-License-Identifier: GPL-3.0-or-later

use crate::repositories::ImportListSink;
use anyhow::{Context, Result};
use encore_domain::ImportListItem;
use std::path::{Path, PathBuf};
use tracing::info;

/// Writes the import list as a pretty-printed JSON array.
///
/// The file is replaced atomically (write to a sibling temp file, then rename)
/// so readers never see a half-written list.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl ImportListSink for JsonFileSink {
    async fn publish(&self, items: &[ImportListItem]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }

        let body = serde_json::to_vec_pretty(items)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;

        info!(target: "import-list", path = %self.path.display(), items = items.len(), "import list written");
        Ok(())
    }
}
