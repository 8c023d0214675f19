use kube::{ResourceExt, api::DynamicObject};

use super::{
    Reconciled, Section, Writers,
    aggregate::now,
    entries::{remove_named, sync_count, upsert_named},
};
use crate::{
    Result,
    api::ClusterMetadata,
    cluster::AggregateApi,
    events::{ChangeType, ResourceEvent},
    value::{nested_array, nested_i64, nested_str},
};

const CLUSTERS: &str = "clusters";
const ACTIVE_CLUSTERS: &str = "activeClusters";

pub(crate) fn cluster_metadata(resource: &DynamicObject, discovered_at: String) -> ClusterMetadata {
    let phase = nested_str(&resource.data, &["status", "phase"]).map(str::to_string);
    let workers = nested_array(&resource.data, &["spec", "topology", "workers"]).map(|workers| {
        workers
            .iter()
            .filter_map(|w| nested_i64(w, &["replicas"]))
            .sum::<i64>()
    });

    ClusterMetadata {
        name: resource.name_any(),
        namespace: resource.namespace().unwrap_or_default(),
        discovered_at,
        version: nested_str(&resource.data, &["spec", "version"]).map(str::to_string),
        ready: phase.as_deref().map(|phase| phase == "Running"),
        phase,
        control_plane_replicas: nested_i64(
            &resource.data,
            &["spec", "topology", "controlplane", "replicas"],
        ),
        worker_replicas: workers,
    }
}

impl<A: AggregateApi> Writers<A> {
    pub(super) async fn reconcile_cluster(&self, event: &ResourceEvent) -> Result<Reconciled> {
        match event.change {
            ChangeType::Added | ChangeType::Updated => {
                let entry = serde_json::to_value(cluster_metadata(&event.resource, now()))?;
                self.aggregate
                    .reconcile(Section::Status, |status| {
                        let changed = upsert_named(status, CLUSTERS, entry.clone());
                        sync_count(status, CLUSTERS, ACTIVE_CLUSTERS) || changed
                    })
                    .await
            }
            ChangeType::Deleted => {
                let name = event.name();
                self.aggregate
                    .reconcile(Section::Status, |status| {
                        let changed = remove_named(status, CLUSTERS, &name);
                        sync_count(status, CLUSTERS, ACTIVE_CLUSTERS) || changed
                    })
                    .await
            }
        }
    }
}
