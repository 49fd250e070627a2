//! Ledger wiring: one place that assembles the store, hub, engines,
//! projections and dispatcher into a working pipeline.

use std::sync::Arc;

use covenant_agreements::AgreementTypeRegistry;
use covenant_auth::{AuthenticationEngine, AuthorizationEngine};
use covenant_core::{Actor, MonotonicClock};

use crate::bootstrap::{bootstrap, BootstrapConfig};
use crate::event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use crate::intents::{IntentDispatcher, IntentError, IntentRegistry, IntentRequest, IntentResult};
use crate::projections::{
    CursorStore, InMemoryCursorStore, PostgresCursorStore, ProjectionManager,
    ProjectionWorkerHandle, ReadModels,
};
use crate::sources::LedgerSources;
use crate::subscriptions::{SubscriptionHub, SubscriptionStream};

use crate::event_store::EventStoreError;

/// A fully wired ledger.
pub struct Ledger {
    pub store: Arc<dyn EventStore>,
    pub hub: Arc<SubscriptionHub>,
    pub read_models: Arc<ReadModels>,
    pub sources: Arc<LedgerSources>,
    pub dispatcher: Arc<IntentDispatcher>,
    pub authn: Arc<AuthenticationEngine>,
    pub projections: Arc<ProjectionManager>,
    pub clock: Arc<MonotonicClock>,
    pub bootstrap_config: BootstrapConfig,
}

impl Ledger {
    /// In-memory backend (tests, development).
    pub fn in_memory() -> Self {
        Self::in_memory_with(BootstrapConfig::default())
    }

    pub fn in_memory_with(bootstrap_config: BootstrapConfig) -> Self {
        let store = Arc::new(InMemoryEventStore::new());
        let hub = SubscriptionHub::new();
        store.set_observer(hub.clone());
        let store: Arc<dyn EventStore> = store;
        hub.attach_store(store.clone());
        Self::wire(
            store,
            hub,
            Arc::new(InMemoryCursorStore::new()),
            bootstrap_config,
        )
    }

    /// Relational backend. Creates the schema when missing.
    pub async fn relational(
        pool: sqlx::PgPool,
        bootstrap_config: BootstrapConfig,
    ) -> Result<Self, EventStoreError> {
        let store = Arc::new(PostgresEventStore::new(pool.clone()));
        store.ensure_schema().await?;

        let cursors = Arc::new(PostgresCursorStore::new(pool));
        cursors.ensure_schema().await?;

        let hub = SubscriptionHub::new();
        store.set_observer(hub.clone());
        let store: Arc<dyn EventStore> = store;
        hub.attach_store(store.clone());

        Ok(Self::wire(store, hub, cursors, bootstrap_config))
    }

    fn wire(
        store: Arc<dyn EventStore>,
        hub: Arc<SubscriptionHub>,
        cursors: Arc<dyn CursorStore>,
        bootstrap_config: BootstrapConfig,
    ) -> Self {
        let read_models = Arc::new(ReadModels::new());
        let sources = Arc::new(LedgerSources::new(store.clone(), read_models.clone()));
        let agreement_types = Arc::new(AgreementTypeRegistry::builtin());
        let workflow = Arc::new(crate::workflow::WorkflowEngine::builtin());
        let authz = Arc::new(AuthorizationEngine::new(
            agreement_types.clone(),
            sources.clone(),
        ));
        let authn = Arc::new(AuthenticationEngine::new(sources.clone(), sources.clone()));
        let clock = Arc::new(MonotonicClock::new());
        let system_actor = Actor::system(bootstrap_config.primordial_system_id);

        let dispatcher = IntentDispatcher::new(
            Arc::new(IntentRegistry::builtin()),
            store.clone(),
            agreement_types,
            workflow,
            authz,
            read_models.clone(),
            clock.clone(),
            system_actor,
        );

        let projections = Arc::new(ProjectionManager::new(store.clone(), cursors));

        Self {
            store,
            hub,
            read_models,
            sources,
            dispatcher,
            authn,
            projections,
            clock,
            bootstrap_config,
        }
    }

    /// Start the projection worker (tails the hub until shut down).
    pub fn start_projections(&self) -> ProjectionWorkerHandle {
        self.projections
            .clone()
            .spawn(self.hub.clone(), self.read_models.projections())
    }

    /// First-run bootstrap (no-op on a non-empty log).
    pub async fn bootstrap(&self) -> Result<bool, IntentError> {
        bootstrap(&self.dispatcher, self.store.as_ref(), &self.bootstrap_config).await
    }

    pub async fn dispatch(&self, request: IntentRequest) -> IntentResult {
        self.dispatcher.dispatch(request).await
    }

    pub async fn subscribe(&self, from_sequence: u64) -> Result<SubscriptionStream, EventStoreError> {
        self.hub.subscribe(from_sequence).await
    }
}
