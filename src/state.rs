//! Application state management
//!
//! Contains the handlers shared across all routes. Every handler reaches the
//! outside world through a port (`Store`, `PlmClient`, `DependencyAgent`,
//! `DateRecalculator`), so tests build the same state over fakes.

use crate::config::Settings;
use crate::dependency::{DependencyAgent, DependencyPopulator, DependencyRequester, HttpDependencyAgent};
use crate::error::UpstreamError;
use crate::plm::{HttpPlmClient, PlmClient};
use crate::recalc::{DateRecalculator, PgDateRecalculator};
use crate::store::{PgStore, Store};
use crate::sync::{HeaderSync, MasterdataSync, TrackingSync};
use deadpool_postgres::Pool;
use std::sync::Arc;
use tracing::info;

/// External collaborators the handlers are built over
pub struct Ports {
    pub store: Arc<dyn Store>,
    pub plm: Arc<dyn PlmClient>,
    pub agent: Option<Arc<dyn DependencyAgent>>,
    pub recalculator: Arc<dyn DateRecalculator>,
}

impl Ports {
    /// Production ports: PostgreSQL, the PLM REST API and the HTTP agent
    pub fn connect(pool: Pool, settings: &Settings) -> Result<Self, UpstreamError> {
        let agent: Option<Arc<dyn DependencyAgent>> = match &settings.agent.url {
            Some(url) => Some(Arc::new(HttpDependencyAgent::new(url.clone())?)),
            None => None,
        };
        Ok(Self {
            store: Arc::new(PgStore::new(pool.clone())),
            plm: Arc::new(HttpPlmClient::new(&settings.plm)?),
            agent,
            recalculator: Arc::new(PgDateRecalculator::new(pool)),
        })
    }
}

/// Application state shared across all handlers
pub struct AppState {
    pub header: HeaderSync,
    pub tracking: TrackingSync,
    pub dependencies: DependencyPopulator,
    pub masterdata: MasterdataSync,
}

impl AppState {
    pub fn new(ports: Ports, settings: &Settings) -> Self {
        let requester = DependencyRequester::new(ports.agent.clone(), &settings.plm, &settings.agent);
        if ports.agent.is_none() {
            info!("DEPENDENCY_AGENT_URL not set, dependency requests are disabled");
        }

        Self {
            header: HeaderSync::new(ports.store.clone()),
            tracking: TrackingSync::new(
                ports.store.clone(),
                ports.plm.clone(),
                requester,
                ports.recalculator.clone(),
                settings.plm.retry_backoff(),
            ),
            dependencies: DependencyPopulator::new(ports.store.clone(), ports.recalculator.clone()),
            masterdata: MasterdataSync::new(ports.store, ports.plm, settings.plm.masterdata_fields.clone()),
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
