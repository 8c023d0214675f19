use kube::{ResourceExt, api::DynamicObject};

use super::{
    Reconciled, Section, Writers,
    aggregate::now,
    entries::{remove_named, sync_count, upsert_named},
};
use crate::{
    Result,
    api::ProviderMetadata,
    cluster::AggregateApi,
    events::{ChangeType, ResourceEvent},
    value::nested_str,
};

/// Which provider list of the aggregate status an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderList {
    Kubernetes,
    Machine,
}

impl ProviderList {
    fn field(self) -> &'static str {
        match self {
            ProviderList::Kubernetes => "kubernetesProviders",
            ProviderList::Machine => "machineProviders",
        }
    }

    fn count_field(self) -> &'static str {
        match self {
            ProviderList::Kubernetes => "kubernetesProviderCount",
            ProviderList::Machine => "machineProviderCount",
        }
    }
}

pub(crate) fn provider_metadata(resource: &DynamicObject, discovered_at: String) -> ProviderMetadata {
    let spec = |field: &str| nested_str(&resource.data, &["spec", field]).map(str::to_string);
    ProviderMetadata {
        name: resource.name_any(),
        namespace: resource.namespace().unwrap_or_default(),
        discovered_at,
        provider_type: spec("providerType"),
        region: spec("region"),
        zone: spec("zone"),
        ready: nested_str(&resource.data, &["status", "phase"]).map(|phase| phase == "Ready"),
    }
}

impl<A: AggregateApi> Writers<A> {
    pub(super) async fn reconcile_provider(
        &self,
        event: &ResourceEvent,
        list: ProviderList,
    ) -> Result<Reconciled> {
        let (field, count_field) = (list.field(), list.count_field());
        match event.change {
            ChangeType::Added | ChangeType::Updated => {
                let entry = serde_json::to_value(provider_metadata(&event.resource, now()))?;
                self.aggregate
                    .reconcile(Section::Status, |status| {
                        let changed = upsert_named(status, field, entry.clone());
                        sync_count(status, field, count_field) || changed
                    })
                    .await
            }
            ChangeType::Deleted => {
                let name = event.name();
                self.aggregate
                    .reconcile(Section::Status, |status| {
                        let changed = remove_named(status, field, &name);
                        sync_count(status, field, count_field) || changed
                    })
                    .await
            }
        }
    }
}
