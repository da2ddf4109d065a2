use std::sync::Arc;

use axum::{http::StatusCode, response::Response};
use tracing::{error, info};

use feeledger_infra::directory::{CohortDirectory, InMemoryCohortDirectory};
use feeledger_infra::{BillingConfig, BillingResult, InMemoryBillingEngine};

use crate::app::errors;

/// Engine plus the dev directory it reads rosters from.
#[derive(Debug, Clone)]
pub struct AppServices {
    engine: Arc<InMemoryBillingEngine>,
    directory: Arc<InMemoryCohortDirectory>,
}

pub fn build_services(config: BillingConfig) -> AppServices {
    info!(
        invoice_prefix = %config.invoice_prefix,
        generation_workers = config.generation_workers,
        retry_limit = config.retry_limit,
        "building in-memory billing services"
    );
    let directory = Arc::new(InMemoryCohortDirectory::new());
    let engine = InMemoryBillingEngine::in_memory(
        directory.clone() as Arc<dyn CohortDirectory>,
        config,
    );
    AppServices {
        engine: Arc::new(engine),
        directory,
    }
}

impl AppServices {
    pub fn directory(&self) -> &InMemoryCohortDirectory {
        &self.directory
    }

    /// Run an engine call off the async executor.
    ///
    /// Engine operations take blocking locks and generation fans out onto
    /// worker threads.
    pub async fn run<T, F>(&self, f: F) -> Result<T, Response>
    where
        F: FnOnce(&InMemoryBillingEngine) -> BillingResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let engine = self.engine.clone();
        match tokio::task::spawn_blocking(move || f(&engine)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(errors::billing_error_to_response(e)),
            Err(e) => {
                error!(error = %e, "engine task failed");
                Err(errors::json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal error",
                ))
            }
        }
    }
}
