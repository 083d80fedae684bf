//! LspManager facade — process-wide holder for one warm client.
//!
//! All tool calls in a session share a single language server keyed to one
//! project root. `get` is the only initialisation path and serialises
//! concurrent starts behind an async mutex; rebinding to a different root
//! requires an explicit `reset` first.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use crate::client::LspClient;
use crate::error::Error;
use crate::types::{ClangdConfig, IndexingStatus, StatusReport};

struct ManagerInner {
    client: Option<Arc<LspClient>>,
    project_root: Option<PathBuf>,
    /// Most recent start failure, surfaced through `status`.
    last_error: Option<String>,
}

pub struct LspManager {
    inner: tokio::sync::Mutex<ManagerInner>,
}

impl Default for LspManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LspManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: tokio::sync::Mutex::new(ManagerInner {
                client: None,
                project_root: None,
                last_error: None,
            }),
        }
    }

    /// The process-wide manager shared by every tool call.
    pub fn global() -> &'static LspManager {
        static GLOBAL: OnceLock<LspManager> = OnceLock::new();
        GLOBAL.get_or_init(LspManager::new)
    }

    /// Return the shared client for `project_root`, starting one if none
    /// is live. Holding the inner mutex across the start guarantees
    /// at-most-one concurrent initialisation; callers that arrive during a
    /// start block and then observe the same client (or the same failure
    /// having cleared the slot).
    pub async fn get(
        &self,
        config: &ClangdConfig,
        project_root: &Path,
    ) -> Result<Arc<LspClient>, Error> {
        let mut inner = self.inner.lock().await;

        if let Some(client) = &inner.client {
            let active = inner
                .project_root
                .clone()
                .unwrap_or_default();
            if active != project_root {
                return Err(Error::ProjectMismatch {
                    active,
                    requested: project_root.to_path_buf(),
                });
            }
            if client.is_ready() {
                return Ok(Arc::clone(client));
            }
            // The server died underneath us; clear it out and start fresh.
            tracing::warn!(state = %client.state(), "discarding dead language server client");
            let dead = inner.client.take();
            if let Some(dead) = dead {
                let _ = dead.shutdown().await;
            }
        }

        match LspClient::start(config, project_root).await {
            Ok(client) => {
                let client = Arc::new(client);
                inner.client = Some(Arc::clone(&client));
                inner.project_root = Some(project_root.to_path_buf());
                inner.last_error = None;
                Ok(client)
            }
            Err(e) => {
                inner.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Shut down the live client, if any, and clear the binding. Safe to
    /// call repeatedly and with no client present.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(client) = inner.client.take() {
            tracing::info!("shutting down language server");
            if let Err(e) = client.shutdown().await {
                tracing::warn!("shutdown failed: {e}");
            }
        }
        inner.project_root = None;
        inner.last_error = None;
    }

    pub async fn is_running(&self) -> bool {
        self.inner
            .lock()
            .await
            .client
            .as_ref()
            .is_some_and(|c| c.is_ready())
    }

    pub async fn project_root(&self) -> Option<PathBuf> {
        self.inner.lock().await.project_root.clone()
    }

    pub async fn open_files_count(&self) -> usize {
        self.inner
            .lock()
            .await
            .client
            .as_ref()
            .map_or(0, |c| c.open_files_count())
    }

    pub async fn indexing_status(&self) -> IndexingStatus {
        self.inner
            .lock()
            .await
            .client
            .as_ref()
            .map_or_else(IndexingStatus::default, |c| c.indexing_status())
    }

    pub async fn is_indexing(&self) -> bool {
        self.inner
            .lock()
            .await
            .client
            .as_ref()
            .is_some_and(|c| c.is_indexing())
    }

    pub async fn status(&self) -> StatusReport {
        let inner = self.inner.lock().await;
        let client = inner.client.as_ref();
        StatusReport {
            running: client.is_some_and(|c| c.is_ready()),
            project_root: inner.project_root.clone(),
            open_files: client.map_or(0, |c| c.open_files_count()),
            indexing: client.map_or_else(
                || IndexingStatus::default().label(),
                |c| c.indexing_status().label(),
            ),
            last_error: inner.last_error.clone(),
        }
    }
}
