//! In-memory stand-ins for the API server used across unit tests.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};

use futures::{StreamExt, stream};
use k8s_openapi::{api::core::v1::ConfigMap, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use kube::{
    ResourceExt,
    api::{ApiResource, DynamicObject, GroupVersionKind},
    core::TypeMeta,
    runtime::watcher::Event,
};
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc};

use crate::{
    Error, Result,
    api::{CONFIG_MAP, GROUP, VERSION},
    cluster::{AggregateApi, ResourceSource, WatchStream, WatchTarget},
    watcher::{DeletedObject, ResourceSink},
};

/// A namespaced object of `kind` with a fresh uid and resourceVersion 1.
pub fn object(kind: &str, name: &str) -> DynamicObject {
    let api_version = if kind == CONFIG_MAP {
        "v1".to_string()
    } else {
        format!("{GROUP}/{VERSION}")
    };
    let mut obj = untyped(name);
    obj.types = Some(TypeMeta {
        api_version,
        kind: kind.to_string(),
    });
    obj
}

/// Same as [`object`] but without type information, like a list item.
pub fn untyped(name: &str) -> DynamicObject {
    DynamicObject {
        types: None,
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            uid: Some(uuid::Uuid::new_v4().to_string()),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        data: json!({}),
    }
}

pub fn config_map(namespace: &str, name: &str, data: &[(&str, &str)]) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        ),
        ..Default::default()
    }
}

/// Parks one machine listing after it has read the count.
#[derive(Default)]
pub struct CountGate {
    pub reached: Notify,
    pub release: Notify,
}

/// Aggregate store with optimistic concurrency on `resourceVersion`.
#[derive(Default)]
pub struct FakeCluster {
    objects: Mutex<HashMap<String, DynamicObject>>,
    revision: AtomicU64,
    creates: AtomicUsize,
    writes: AtomicUsize,
    machines: AtomicUsize,
    conflict_next_write: AtomicBool,
    count_gate: Mutex<Option<Arc<CountGate>>>,
    config_maps: Mutex<HashMap<(String, String), ConfigMap>>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_machines(&self, count: usize) {
        self.machines.store(count, Ordering::SeqCst);
    }

    /// The next `count_machines` call reads the count, then waits for `release`.
    pub fn hold_next_count(&self) -> Arc<CountGate> {
        let gate = Arc::new(CountGate::default());
        *self.count_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// The next replace or replace_status fails as if another writer got there first.
    pub fn conflict_next_write(&self) {
        self.conflict_next_write.store(true, Ordering::SeqCst);
    }

    pub fn put_config_map(&self, cm: ConfigMap) {
        let key = (cm.namespace().unwrap_or_default(), cm.name_any());
        self.config_maps.lock().unwrap().insert(key, cm);
    }

    pub fn stored(&self, name: &str) -> Option<DynamicObject> {
        self.objects.lock().unwrap().get(name).cloned()
    }

    pub fn section(&self, name: &str, section: &str) -> Value {
        self.stored(name)
            .and_then(|obj| obj.data.get(section).cloned())
            .unwrap_or(Value::Null)
    }

    /// Change a stored object out of band, bumping its resourceVersion.
    pub fn edit(&self, name: &str, f: impl FnOnce(&mut Value)) {
        let mut objects = self.objects.lock().unwrap();
        let obj = objects.get_mut(name).expect("object to edit");
        f(&mut obj.data);
        obj.metadata.resource_version = Some(self.next_revision());
    }

    fn next_revision(&self) -> String {
        (self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn write(&self, obj: &DynamicObject, status_only: bool) -> Result<DynamicObject> {
        let name = obj.name_any();
        if self.conflict_next_write.swap(false, Ordering::SeqCst) {
            return Err(Error::Conflict(name));
        }

        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .get_mut(&name)
            .ok_or_else(|| Error::AggregateMissing(name.clone()))?;
        if stored.metadata.resource_version != obj.metadata.resource_version {
            return Err(Error::Conflict(name));
        }

        let mut next = stored.clone();
        if status_only {
            next.data["status"] = obj.data.get("status").cloned().unwrap_or(Value::Null);
        } else {
            let status = stored.data.get("status").cloned();
            next.data = obj.data.clone();
            if let Some(status) = status {
                next.data["status"] = status;
            }
        }
        next.metadata.resource_version = Some(self.next_revision());
        *stored = next.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(next)
    }
}

impl AggregateApi for FakeCluster {
    async fn get(&self, name: &str) -> Result<Option<DynamicObject>> {
        tokio::task::yield_now().await;
        Ok(self.stored(name))
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        tokio::task::yield_now().await;
        let name = obj.name_any();
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&name) {
            return Err(Error::Conflict(name));
        }

        let mut created = obj.clone();
        created.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        created.metadata.resource_version = Some(self.next_revision());
        if let Some(data) = created.data.as_object_mut() {
            data.remove("status");
        }
        objects.insert(name, created.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn replace(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        tokio::task::yield_now().await;
        self.write(obj, false)
    }

    async fn replace_status(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        tokio::task::yield_now().await;
        self.write(obj, true)
    }

    async fn count_machines(&self) -> Result<usize> {
        let count = self.machines.load(Ordering::SeqCst);
        let gate = self.count_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.release.notified().await;
        }
        Ok(count)
    }

    async fn config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        Ok(self
            .config_maps
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

/// Scripted discovery and watch streams.
#[derive(Default)]
pub struct FakeSource {
    served: HashMap<WatchTarget, ApiResource>,
    failing: HashSet<WatchTarget>,
    scripts: Mutex<HashMap<String, Vec<Event<DynamicObject>>>>,
    watched: Mutex<Vec<String>>,
    closing: bool,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `target` as `kind`; its watch yields `events` and then stays open.
    pub fn serve(mut self, target: WatchTarget, kind: &str, events: Vec<Event<DynamicObject>>) -> Self {
        let resource = ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk(&target.group, &target.version, kind),
            &target.resource,
        );
        self.scripts
            .get_mut()
            .unwrap()
            .insert(target.resource.clone(), events);
        self.served.insert(target, resource);
        self
    }

    pub fn fail_discovery(mut self, target: WatchTarget) -> Self {
        self.failing.insert(target);
        self
    }

    /// Streams end after their scripted events instead of staying open.
    pub fn closing(mut self) -> Self {
        self.closing = true;
        self
    }

    /// Plural names of every resource a watch was opened for.
    pub fn watched(&self) -> Vec<String> {
        self.watched.lock().unwrap().clone()
    }
}

impl ResourceSource for FakeSource {
    async fn served_resource(&self, target: &WatchTarget) -> Result<Option<ApiResource>> {
        if self.failing.contains(target) {
            return Err(Error::MissingField("discovery"));
        }
        Ok(self.served.get(target).cloned())
    }

    fn watch(&self, resource: &ApiResource) -> WatchStream {
        self.watched.lock().unwrap().push(resource.plural.clone());
        let events = self
            .scripts
            .lock()
            .unwrap()
            .remove(&resource.plural)
            .unwrap_or_default();
        let scripted = stream::iter(events.into_iter().map(Ok));
        if self.closing {
            scripted.boxed()
        } else {
            scripted.chain(stream::pending()).boxed()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Add(String),
    Update(String),
    Delete(String),
    DeleteUnknown(String),
}

/// Forwards every sink callback to a channel.
pub struct RecordingSink {
    tx: mpsc::UnboundedSender<SinkCall>,
    last: Mutex<Option<DynamicObject>>,
}

impl RecordingSink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SinkCall>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self {
            tx,
            last: Mutex::new(None),
        };
        (Arc::new(sink), rx)
    }

    pub fn last_seen(&self) -> Option<DynamicObject> {
        self.last.lock().unwrap().clone()
    }

    fn record(&self, call: SinkCall, obj: DynamicObject) {
        *self.last.lock().unwrap() = Some(obj);
        let _ = self.tx.send(call);
    }
}

impl ResourceSink for RecordingSink {
    fn on_add(&self, obj: DynamicObject) {
        self.record(SinkCall::Add(obj.name_any()), obj);
    }

    fn on_update(&self, _old: DynamicObject, new: DynamicObject) {
        self.record(SinkCall::Update(new.name_any()), new);
    }

    fn on_delete(&self, obj: DeletedObject) {
        match obj {
            DeletedObject::Final(obj) => self.record(SinkCall::Delete(obj.name_any()), obj),
            DeletedObject::StateUnknown { key, last_known } => {
                self.record(SinkCall::DeleteUnknown(key), last_known)
            }
        }
    }
}
