use std::sync::Arc;

use tracing::instrument;

use crate::{
    Result,
    api::{
        CONFIG_MAP, KUBERNETES_CLUSTER, KUBERNETES_PROVIDER, MACHINE, MACHINE_CLASS,
        MACHINE_PROVIDER,
    },
    cluster::AggregateApi,
    events::{EventBus, ResourceEvent},
    locks::LockRegistry,
    site::SiteService,
};

pub mod aggregate;
mod clusters;
mod config_map;
pub(crate) mod entries;
mod machine_classes;
mod machines;
mod providers;

pub use aggregate::{Aggregate, Section};
pub use providers::ProviderList;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Unchanged,
    Updated,
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub aggregate_name: String,
    /// Namespace of the operator config map
    pub namespace: String,
    pub config_map_name: String,
}

/// Event bus subscribers merging watched resources into the aggregate.
pub struct Writers<A> {
    aggregate: Aggregate<A>,
    api: Arc<A>,
    site: Arc<SiteService<A>>,
    config: WriterConfig,
}

impl<A: AggregateApi> Writers<A> {
    pub fn new(api: Arc<A>, site: Arc<SiteService<A>>, config: WriterConfig) -> Self {
        let aggregate = Aggregate::new(
            Arc::clone(&api),
            Arc::clone(&site),
            Arc::new(LockRegistry::new()),
            &config.aggregate_name,
        );
        Self {
            aggregate,
            api,
            site,
            config,
        }
    }

    /// Subscribe one handler per watched kind.
    pub fn register(self: &Arc<Self>, bus: &EventBus) {
        for kind in [
            KUBERNETES_PROVIDER,
            MACHINE_PROVIDER,
            MACHINE_CLASS,
            KUBERNETES_CLUSTER,
            MACHINE,
            CONFIG_MAP,
        ] {
            let writers = Arc::clone(self);
            bus.subscribe(kind, move |event| {
                let writers = Arc::clone(&writers);
                async move { writers.handle(&event).await }
            });
        }
    }

    async fn handle(&self, event: &ResourceEvent) {
        match self.reconcile(event).await {
            Ok(Reconciled::Updated) => tracing::info!(
                kind = %event.kind,
                change = %event.change,
                name = %event.name(),
                "Aggregate updated"
            ),
            Ok(Reconciled::Unchanged) => {}
            Err(e) if e.is_conflict() => tracing::warn!(
                kind = %event.kind,
                name = %event.name(),
                error = %e,
                "Aggregate changed concurrently, the next event will converge it"
            ),
            Err(e) => tracing::error!(
                kind = %event.kind,
                name = %event.name(),
                error = %e,
                "Failed to reconcile aggregate"
            ),
        }
    }

    #[instrument(skip_all, fields(kind = %event.kind, change = %event.change, name = %event.name()))]
    pub async fn reconcile(&self, event: &ResourceEvent) -> Result<Reconciled> {
        match event.kind.as_str() {
            KUBERNETES_PROVIDER => self.reconcile_provider(event, ProviderList::Kubernetes).await,
            MACHINE_PROVIDER => self.reconcile_provider(event, ProviderList::Machine).await,
            MACHINE_CLASS => self.reconcile_machine_class(event).await,
            KUBERNETES_CLUSTER => self.reconcile_cluster(event).await,
            MACHINE => self.reconcile_machines(event).await,
            CONFIG_MAP => self.reconcile_config_map(event).await,
            _ => Ok(Reconciled::Unchanged),
        }
    }
}
