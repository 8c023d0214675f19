use std::sync::Arc;

use kube::{ResourceExt, api::DynamicObject};

use crate::{
    api::CONFIG_MAP,
    cache::ObjectCache,
    events::{ChangeType, Dispatch, EventBus, ResourceEvent},
    watcher::{DeletedObject, ResourceSink},
};

/// Cache key of a config map, which is looked up by location rather than uid.
pub fn config_map_key(namespace: &str, name: &str) -> String {
    format!("configmap-{namespace}-{name}")
}

fn cache_key(kind: &str, obj: &DynamicObject) -> Option<String> {
    if kind == CONFIG_MAP {
        let namespace = obj.namespace().unwrap_or_default();
        return Some(config_map_key(&namespace, &obj.name_any()));
    }
    obj.uid().filter(|uid| !uid.is_empty())
}

/// Watch callbacks: record the object in the cache, then publish it on the bus.
pub struct Ingest {
    cache: Arc<ObjectCache>,
    bus: Arc<EventBus>,
}

impl Ingest {
    pub fn new(cache: Arc<ObjectCache>, bus: Arc<EventBus>) -> Self {
        Self { cache, bus }
    }

    /// `None` if the object was dropped because it could not be identified.
    pub fn ingest(&self, change: ChangeType, obj: DynamicObject) -> Option<Dispatch> {
        let Some(kind) = obj
            .types
            .as_ref()
            .map(|t| t.kind.clone())
            .filter(|kind| !kind.is_empty())
        else {
            tracing::warn!(name = %obj.name_any(), %change, "Dropping object without a kind");
            return None;
        };

        let Some(key) = cache_key(&kind, &obj) else {
            tracing::warn!(%kind, name = %obj.name_any(), %change, "Dropping object without a uid");
            return None;
        };

        match change {
            ChangeType::Added | ChangeType::Updated => {
                if let Err(e) = self.cache.set_json(key.clone(), &obj) {
                    tracing::error!(%kind, %key, error = %e, "Failed to cache object");
                    return None;
                }
            }
            ChangeType::Deleted => {
                if !self.cache.delete(&key) {
                    tracing::debug!(%kind, %key, "Deleted object was not cached");
                }
            }
        }

        tracing::debug!(%kind, %key, %change, "Ingested object");
        Some(self.bus.publish(ResourceEvent::new(kind, change, obj)))
    }
}

impl ResourceSink for Ingest {
    fn on_add(&self, obj: DynamicObject) {
        self.ingest(ChangeType::Added, obj);
    }

    fn on_update(&self, _old: DynamicObject, new: DynamicObject) {
        self.ingest(ChangeType::Updated, new);
    }

    fn on_delete(&self, obj: DeletedObject) {
        let obj = match obj {
            DeletedObject::Final(obj) => obj,
            DeletedObject::StateUnknown { key, last_known } => {
                tracing::debug!(%key, "Delete observed through a re-list");
                last_known
            }
        };
        self.ingest(ChangeType::Deleted, obj);
    }
}
