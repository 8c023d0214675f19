use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::cluster::WatchTarget;

pub const GROUP: &str = "vitistack.io";
pub const VERSION: &str = "v1alpha1";

pub const KUBERNETES_PROVIDER: &str = "KubernetesProvider";
pub const MACHINE_PROVIDER: &str = "MachineProvider";
pub const MACHINE_CLASS: &str = "MachineClass";
pub const KUBERNETES_CLUSTER: &str = "KubernetesCluster";
pub const MACHINE: &str = "Machine";
pub const CONFIG_MAP: &str = "ConfigMap";
pub const VITISTACK: &str = "Vitistack";

/// Resource kinds the operator watches for the lifetime of the process.
pub fn watch_targets() -> Vec<WatchTarget> {
    vec![
        WatchTarget::new(GROUP, VERSION, "kubernetesproviders"),
        WatchTarget::new(GROUP, VERSION, "machineproviders"),
        WatchTarget::new(GROUP, VERSION, "machineclasses"),
        WatchTarget::new(GROUP, VERSION, "kubernetesclusters"),
        WatchTarget::new(GROUP, VERSION, "machines"),
        WatchTarget::new("", "v1", "configmaps"),
    ]
}

/// Fleet summary, one object per site.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "vitistack.io", version = "v1alpha1", kind = "Vitistack")]
#[kube(status = "VitistackStatus")]
#[serde(rename_all = "camelCase")]
pub struct VitistackSpec {
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct Location {
    pub country: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VitistackStatus {
    #[serde(default)]
    pub kubernetes_providers: Vec<ProviderMetadata>,
    #[serde(default)]
    pub machine_providers: Vec<ProviderMetadata>,
    #[serde(default)]
    pub machine_classes: Vec<String>,
    #[serde(default)]
    pub clusters: Vec<ClusterMetadata>,
    #[serde(default)]
    pub provider_statuses: Vec<ProviderStatus>,
    #[serde(default)]
    pub kubernetes_provider_count: i64,
    #[serde(default)]
    pub machine_provider_count: i64,
    #[serde(default)]
    pub active_clusters: i64,
    #[serde(default)]
    pub active_machines: i64,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub last_reconcile_time: Option<String>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Health reported for one provider. Fields other than `name` are kept as written.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ProviderStatus {
    pub name: String,
    #[serde(flatten)]
    pub details: BTreeMap<String, serde_json::Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMetadata {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// RFC 3339, kept from the first time the provider was seen
    #[serde(default)]
    pub discovered_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMetadata {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// RFC 3339, kept from the first time the cluster was seen
    #[serde(default)]
    pub discovered_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_replicas: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_replicas: Option<i64>,
}

#[cfg(test)]
mod tests {
    use kube::CustomResourceExt;
    use serde_json::{Map, Value, json};

    use super::*;
    use crate::writers::entries::initialize_status_defaults;

    #[test]
    fn crd_schema_covers_defaulted_status_fields() {
        let crd = serde_json::to_value(Vitistack::crd()).unwrap();
        let status = &crd["spec"]["versions"][0]["schema"]["openAPIV3Schema"]["properties"]["status"]
            ["properties"];

        let mut defaults = Map::new();
        initialize_status_defaults(&mut defaults);
        for field in defaults.keys() {
            assert!(status.get(field).is_some(), "status.{field} missing from CRD schema");
        }
    }

    #[test]
    fn provider_statuses_keep_extra_fields() {
        let status = serde_json::from_value::<VitistackStatus>(json!({
            "providerStatuses": [{"name": "p1", "phase": "Ready", "ready": true}],
            "conditions": [],
        }))
        .unwrap();

        assert_eq!(status.provider_statuses[0].name, "p1");
        assert_eq!(
            serde_json::to_value(&status.provider_statuses[0]).unwrap(),
            json!({"name": "p1", "phase": "Ready", "ready": true})
        );
        assert_eq!(Value::Array(vec![]), serde_json::to_value(&status.conditions).unwrap());
    }
}
