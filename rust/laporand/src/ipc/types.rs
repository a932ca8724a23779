use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{BackendKind, Config};
use crate::error::StoreError;
use crate::store::Store;
use crate::workflow::auth::{LoginGuard, Session};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: Config,
    pub workspace: Option<PathBuf>,
    pub store: Option<Store>,
    /// Why the store is closed, when opening it failed.
    pub store_error: Option<String>,
    pub session: Option<Session>,
    pub login_guard: LoginGuard,
    /// Unsolicited event lines, written by the same task as responses.
    pub outbox: mpsc::UnboundedSender<serde_json::Value>,
    pub subscriptions: HashMap<String, JoinHandle<()>>,
}

impl AppState {
    pub fn new(config: Config, outbox: mpsc::UnboundedSender<serde_json::Value>) -> Self {
        Self {
            login_guard: LoginGuard::new(&config.security),
            workspace: config.workspace.clone(),
            config,
            store: None,
            store_error: None,
            session: None,
            outbox,
            subscriptions: HashMap::new(),
        }
    }

    /// Opens the configured backend at startup. A failure is logged once and
    /// kept for `health`; requests that need storage then fail with
    /// `storage_unavailable`.
    pub fn open_configured_store(&mut self) {
        if self.config.backend == BackendKind::Local && self.workspace.is_none() {
            debug!("no workspace configured; waiting for workspace.select");
            return;
        }
        let ws = self.workspace.clone();
        // Already logged and kept in `store_error`.
        let _ = self.open_store(ws);
    }

    /// Replaces the open store. On failure nothing stays open: the old store,
    /// its subscriptions and the session are dropped and the error is kept
    /// for `health`.
    pub fn open_store(&mut self, workspace: Option<PathBuf>) -> Result<(), StoreError> {
        match Store::open(&self.config, workspace.as_deref()) {
            Ok(store) => {
                info!(backend = store.kind().as_str(), "store ready");
                self.cancel_subscriptions();
                self.store = Some(store);
                self.store_error = None;
                self.workspace = workspace;
                Ok(())
            }
            Err(e) => {
                error!(backend = self.config.backend.as_str(), error = %e, "storage unavailable");
                if self.store.take().is_some() {
                    warn!("previous store closed");
                }
                self.cancel_subscriptions();
                self.store_error = Some(e.to_string());
                self.workspace = None;
                self.session = None;
                Err(e)
            }
        }
    }

    pub fn cancel_subscriptions(&mut self) {
        for (id, handle) in self.subscriptions.drain() {
            handle.abort();
            debug!(subscription = %id, "subscription cancelled");
        }
    }
}
