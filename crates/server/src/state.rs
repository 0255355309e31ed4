//! Application State (§6): the handful of process-wide handles every
//! HTTP handler and every spawned call needs — the hot-reloadable config,
//! the shared telephony/transport/session infrastructure bundled in
//! [`crate::call::CallDeps`], and the registry of calls currently in
//! progress.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::RwLock;

use voxrelay_config::{load_settings, Settings};

use crate::call::{CallDeps, CallRegistry};
use crate::error::{Result, ServerError};

#[derive(Clone)]
pub struct AppState {
    pub deps: Arc<CallDeps>,
    pub calls: Arc<CallRegistry>,
    pub metrics_handle: PrometheusHandle,
    env: Option<String>,
}

impl AppState {
    pub fn new(deps: Arc<CallDeps>, metrics_handle: PrometheusHandle, env: Option<String>) -> Self {
        Self {
            deps,
            calls: Arc::new(CallRegistry::new()),
            metrics_handle,
            env,
        }
    }

    pub fn config(&self) -> Arc<RwLock<Settings>> {
        self.deps.settings.clone()
    }

    /// `POST /reload` (§6): reload configuration from files and env vars,
    /// validating before swapping it into the live `RwLock`. Calls already
    /// in progress keep the snapshot they negotiated with; only new calls
    /// see the reloaded settings.
    pub fn reload_config(&self) -> Result<()> {
        let new_settings = load_settings(self.env.as_deref()).map_err(ServerError::from)?;
        new_settings.validate().map_err(ServerError::from)?;

        *self.deps.settings.write() = new_settings;
        tracing::info!("configuration reloaded");
        Ok(())
    }

    pub fn active_call_count(&self) -> usize {
        self.calls.len()
    }
}
