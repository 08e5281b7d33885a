//! Server state management

use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::orchestrator::Orchestrator;

/// Shared server state
#[derive(Clone)]
pub struct ServerState {
    /// The inference orchestrator and the stores it owns
    pub orchestrator: Arc<Orchestrator>,

    /// Service configuration
    pub config: Arc<ServiceConfig>,
}

impl ServerState {
    pub fn new(orchestrator: Arc<Orchestrator>, config: Arc<ServiceConfig>) -> Self {
        Self {
            orchestrator,
            config,
        }
    }
}
