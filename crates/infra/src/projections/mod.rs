//! Projection maintenance: read models, watermarks, and the worker that
//! tails the subscription hub.

pub mod cursor_store;
pub mod manager;
pub mod read_models;

use std::sync::Arc;

pub use cursor_store::{CursorStore, InMemoryCursorStore, PostgresCursorStore};
pub use manager::{ProjectionManager, ProjectionWorkerHandle};
pub use read_models::{
    AgreementsByPartyProjection, AgreementsByPartyReadModel, ApiKeysProjection, ApiKeysReadModel,
    RealmSummary, RealmsProjection, RealmsReadModel,
};

/// The shared handles query paths read from. Projection workers hold the
/// same `Arc`s and write into them as the log advances.
#[derive(Clone)]
pub struct ReadModels {
    pub realms: Arc<RealmsReadModel>,
    pub api_keys: Arc<ApiKeysReadModel>,
    pub agreements_by_party: Arc<AgreementsByPartyReadModel>,
}

impl ReadModels {
    pub fn new() -> Self {
        Self {
            realms: Arc::new(RealmsReadModel::new()),
            api_keys: Arc::new(ApiKeysReadModel::new()),
            agreements_by_party: Arc::new(AgreementsByPartyReadModel::new()),
        }
    }

    /// The built-in projections, wired to these read models.
    pub fn projections(&self) -> Vec<Box<dyn covenant_events::Projection>> {
        vec![
            Box::new(RealmsProjection::new(self.realms.clone())),
            Box::new(ApiKeysProjection::new(self.api_keys.clone())),
            Box::new(AgreementsByPartyProjection::new(
                self.agreements_by_party.clone(),
            )),
        ]
    }
}

impl Default for ReadModels {
    fn default() -> Self {
        Self::new()
    }
}
