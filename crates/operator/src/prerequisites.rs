use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};

use crate::{
    Error, Result,
    api::{GROUP, KUBERNETES_PROVIDER, MACHINE_PROVIDER, VERSION, VITISTACK},
    settings::Settings,
};

const REQUIRED_KEYS: [&str; 4] = ["name", "provider", "region", "location"];
const REQUIRED_KINDS: [&str; 3] = [KUBERNETES_PROVIDER, MACHINE_PROVIDER, VITISTACK];

/// Verify everything the operator needs before it starts watching.
///
/// All failures are collected and returned together as [`Error::Prerequisites`].
#[tracing::instrument(skip_all)]
pub async fn check(client: &Client, settings: &Settings) -> Result<()> {
    let mut failures = Vec::new();

    match client.apiserver_version().await {
        Ok(info) => tracing::info!(version = %info.git_version, "Connected to cluster"),
        Err(e) => failures.push(format!("cluster is not reachable: {e}")),
    }

    let config_maps = Api::<ConfigMap>::namespaced(client.clone(), &settings.namespace);
    match config_maps.get_opt(&settings.config_map_name).await {
        Ok(Some(cm)) => failures.extend(missing_keys(&cm)),
        Ok(None) => failures.push(format!(
            "config map {}/{} does not exist",
            settings.namespace, settings.config_map_name
        )),
        Err(e) => failures.push(format!(
            "could not read config map {}/{}: {e}",
            settings.namespace, settings.config_map_name
        )),
    }

    let group_version = format!("{GROUP}/{VERSION}");
    match client.list_api_group_resources(&group_version).await {
        Ok(list) => failures.extend(missing_kinds(
            &group_version,
            list.resources.iter().map(|r| r.kind.as_str()),
        )),
        Err(e) => failures.push(format!("{group_version} is not served: {e}")),
    }

    if failures.is_empty() {
        tracing::info!("Prerequisite checks passed");
        Ok(())
    } else {
        Err(Error::Prerequisites(failures))
    }
}

fn missing_keys(cm: &ConfigMap) -> Vec<String> {
    let data = cm.data.clone().unwrap_or_default();
    let present = |key: &str| {
        let value = match key {
            "location" => data.get("location").or_else(|| data.get("country")),
            _ => data.get(key),
        };
        value.is_some_and(|v| !v.is_empty())
    };

    REQUIRED_KEYS
        .into_iter()
        .filter(|key| !present(key))
        .map(|key| format!("config map is missing required key {key}"))
        .collect()
}

fn missing_kinds<'a>(group_version: &str, served: impl Iterator<Item = &'a str>) -> Vec<String> {
    let served = served.collect::<Vec<_>>();
    REQUIRED_KINDS
        .into_iter()
        .filter(|kind| !served.contains(kind))
        .map(|kind| format!("custom resource {kind} is not served by {group_version}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::config_map;

    #[test]
    fn reports_each_missing_key() {
        let cm = config_map("default", "vitistack-config", &[("name", "dc-1"), ("region", "")]);

        let missing = missing_keys(&cm);

        assert_eq!(
            missing,
            vec![
                "config map is missing required key provider",
                "config map is missing required key region",
                "config map is missing required key location",
            ]
        );
    }

    #[test]
    fn country_satisfies_location() {
        let cm = config_map(
            "default",
            "vitistack-config",
            &[("name", "dc-1"), ("provider", "p"), ("region", "west"), ("country", "no")],
        );
        assert!(missing_keys(&cm).is_empty());
    }

    #[test]
    fn reports_unserved_kinds() {
        let missing = missing_kinds("vitistack.io/v1alpha1", ["Vitistack", "Machine"].into_iter());
        assert_eq!(missing.len(), 2);
        assert!(missing[0].contains(KUBERNETES_PROVIDER));
        assert!(missing[1].contains(MACHINE_PROVIDER));

        let error = Error::Prerequisites(missing);
        assert!(error.to_string().starts_with("Prerequisite checks failed:\n- "));
    }
}
