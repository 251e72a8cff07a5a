use std::sync::Arc;

use sh_domain::config::Config;

use crate::orchestrator::SharedOrchestrator;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: SharedOrchestrator,
}
