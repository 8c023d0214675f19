use std::{fmt, future::Future};

use futures::{StreamExt, stream::BoxStream};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    Api, Client, ResourceExt,
    api::{ApiResource, DynamicObject, GroupVersionKind, ListParams, PostParams},
    runtime::{WatchStreamExt, watcher},
};

use crate::{
    Error, Result,
    api::{GROUP, MACHINE, VERSION, Vitistack},
};

/// One resource kind to watch, identified the way the API server serves it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchTarget {
    pub group: String,
    pub version: String,
    /// Plural resource name, e.g. `configmaps`
    pub resource: String,
}

impl WatchTarget {
    pub fn new(group: &str, version: &str, resource: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for WatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}.{}", self.resource, self.version)
        } else {
            write!(f, "{}.{}.{}", self.resource, self.version, self.group)
        }
    }
}

pub type WatchStream = BoxStream<'static, Result<watcher::Event<DynamicObject>, watcher::Error>>;

/// Discovery plus watch streams for arbitrary resource kinds.
pub trait ResourceSource: Send + Sync + 'static {
    /// The served descriptor for `target`, or `None` if the cluster does not serve it.
    fn served_resource(
        &self,
        target: &WatchTarget,
    ) -> impl Future<Output = Result<Option<ApiResource>>> + Send;

    /// List-then-watch stream over all namespaces.
    fn watch(&self, resource: &ApiResource) -> WatchStream;
}

/// Reads and writes of the aggregate resource, plus the lookups its writers need.
pub trait AggregateApi: Send + Sync + 'static {
    fn get(&self, name: &str) -> impl Future<Output = Result<Option<DynamicObject>>> + Send;

    /// Fails with [`Error::Conflict`] if the object already exists.
    fn create(&self, obj: &DynamicObject) -> impl Future<Output = Result<DynamicObject>> + Send;

    /// Whole-object update, conditional on `metadata.resourceVersion`.
    fn replace(&self, obj: &DynamicObject) -> impl Future<Output = Result<DynamicObject>> + Send;

    /// Status subresource update, conditional on `metadata.resourceVersion`.
    fn replace_status(
        &self,
        obj: &DynamicObject,
    ) -> impl Future<Output = Result<DynamicObject>> + Send;

    /// Number of Machine objects across all namespaces.
    fn count_machines(&self) -> impl Future<Output = Result<usize>> + Send;

    fn config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<ConfigMap>>> + Send;
}

pub fn vitistack_resource() -> ApiResource {
    ApiResource::erase::<Vitistack>(&())
}

pub fn machine_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(GROUP, VERSION, MACHINE), "machines")
}

/// [`ResourceSource`] and [`AggregateApi`] backed by a live API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    vitistacks: Api<DynamicObject>,
    machines: Api<DynamicObject>,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self {
            vitistacks: Api::all_with(client.clone(), &vitistack_resource()),
            machines: Api::all_with(client.clone(), &machine_resource()),
            client,
        }
    }
}

impl ResourceSource for KubeCluster {
    async fn served_resource(&self, target: &WatchTarget) -> Result<Option<ApiResource>> {
        let listing = if target.group.is_empty() {
            self.client.list_core_api_resources(&target.version).await
        } else {
            self.client
                .list_api_group_resources(&target.api_version())
                .await
        };

        let resources = match listing {
            Ok(list) => list,
            Err(kube::Error::Api(e)) if e.code == 404 => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(resources
            .resources
            .iter()
            .filter(|r| r.name == target.resource)
            .find(|r| ["list", "watch"].iter().all(|v| r.verbs.iter().any(|x| x == v)))
            .map(|r| {
                ApiResource::from_gvk_with_plural(
                    &GroupVersionKind::gvk(&target.group, &target.version, &r.kind),
                    &r.name,
                )
            }))
    }

    fn watch(&self, resource: &ApiResource) -> WatchStream {
        let api = Api::<DynamicObject>::all_with(self.client.clone(), resource);
        watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed()
    }
}

impl AggregateApi for KubeCluster {
    async fn get(&self, name: &str) -> Result<Option<DynamicObject>> {
        Ok(self.vitistacks.get_opt(name).await?)
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        self.vitistacks
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| write_error(e, obj))
    }

    async fn replace(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        self.vitistacks
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await
            .map_err(|e| write_error(e, obj))
    }

    async fn replace_status(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        self.vitistacks
            .replace_status(
                &obj.name_any(),
                &PostParams::default(),
                serde_json::to_vec(obj)?,
            )
            .await
            .map_err(|e| write_error(e, obj))
    }

    async fn count_machines(&self) -> Result<usize> {
        Ok(self
            .machines
            .list_metadata(&ListParams::default())
            .await?
            .items
            .len())
    }

    async fn config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        Ok(Api::<ConfigMap>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await?)
    }
}

fn write_error(err: kube::Error, obj: &DynamicObject) -> Error {
    match err {
        kube::Error::Api(e) if e.code == 409 => Error::Conflict(obj.name_any()),
        e => Error::Kube(e),
    }
}
