//! Admin server

use crate::common::{AdminConfig, Result};
use crate::orchestrator::http::{create_router, AdminState};
use crate::orchestrator::reparent::Reparenter;
use crate::topo::{RocksTopoStore, TopoStore};
use std::sync::Arc;
use std::time::Duration;

pub struct AdminServer {
    config: AdminConfig,
}

impl AdminServer {
    pub fn new(config: AdminConfig) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting admin server");
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  Topology DB: {}", self.config.db_path.display());
        tracing::info!(
            "  Default reparent timeout: {}s",
            self.config.default_wait_timeout_secs
        );

        let store: Arc<dyn TopoStore> = Arc::new(RocksTopoStore::open(&self.config.db_path)?);
        let reparenter = Arc::new(Reparenter::new(store.clone()));

        let state = AdminState {
            store,
            reparenter,
            default_wait_timeout: Duration::from_secs(self.config.default_wait_timeout_secs),
        };
        let router = create_router(state);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("✓ Admin server ready");

        axum::serve(listener, router)
            .await
            .map_err(|e| crate::Error::Internal(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}
