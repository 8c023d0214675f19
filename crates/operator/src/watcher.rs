use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use futures::StreamExt;
use kube::{
    ResourceExt,
    api::{ApiResource, DynamicObject},
    core::TypeMeta,
    runtime::watcher::Event,
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{Instrument, info_span};

use crate::cluster::{ResourceSource, WatchStream, WatchTarget};

pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(120);

/// Receives every change observed by a [`ResourceWatcher`].
pub trait ResourceSink: Send + Sync + 'static {
    fn on_add(&self, obj: DynamicObject);
    fn on_update(&self, old: DynamicObject, new: DynamicObject);
    fn on_delete(&self, obj: DeletedObject);
}

/// The two shapes a delete notification can take.
#[derive(Debug, Clone)]
pub enum DeletedObject {
    /// The server reported the deletion together with the final object.
    Final(DynamicObject),
    /// The object vanished between two listings, so its final state is unknown.
    StateUnknown {
        /// `namespace/name` of the object
        key: String,
        last_known: DynamicObject,
    },
}

/// Why a per-target watch task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchExit {
    NotServed,
    DiscoveryFailed,
    SyncFailed,
    StreamEnded,
    Shutdown,
}

/// Opens one long-lived watch per [`WatchTarget`] and forwards changes to a sink.
pub struct ResourceWatcher<S> {
    source: Arc<S>,
    sync_timeout: Duration,
}

impl<S: ResourceSource> ResourceWatcher<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
        }
    }

    pub fn with_sync_timeout(mut self, sync_timeout: Duration) -> Self {
        self.sync_timeout = sync_timeout;
        self
    }

    /// Spawn one independent task per target. Flipping `shutdown` to `true` stops them.
    pub fn start(
        &self,
        targets: Vec<WatchTarget>,
        sink: Arc<dyn ResourceSink>,
        shutdown: watch::Receiver<bool>,
    ) -> Watches {
        tracing::info!(targets = targets.len(), "Starting dynamic watchers");

        let handles = targets
            .into_iter()
            .map(|target| {
                let span = info_span!("watch", target = %target);
                let task = watch_target(
                    Arc::clone(&self.source),
                    target.clone(),
                    Arc::clone(&sink),
                    self.sync_timeout,
                    shutdown.clone(),
                );
                (target, tokio::spawn(task.instrument(span)))
            })
            .collect();

        Watches { handles }
    }
}

/// The running watch tasks, one per target.
#[derive(Debug)]
pub struct Watches {
    handles: Vec<(WatchTarget, JoinHandle<WatchExit>)>,
}

impl Watches {
    pub async fn join(self) -> Vec<(WatchTarget, WatchExit)> {
        let mut exits = Vec::with_capacity(self.handles.len());
        for (target, handle) in self.handles {
            match handle.await {
                Ok(exit) => exits.push((target, exit)),
                Err(e) => tracing::error!(%target, error = %e, "Watch task panicked"),
            }
        }
        exits
    }
}

async fn watch_target<S: ResourceSource>(
    source: Arc<S>,
    target: WatchTarget,
    sink: Arc<dyn ResourceSink>,
    sync_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> WatchExit {
    if *shutdown.borrow() {
        return WatchExit::Shutdown;
    }

    let resource = match source.served_resource(&target).await {
        Ok(Some(resource)) => resource,
        Ok(None) => {
            tracing::info!("Resource is not served by the cluster, skipping");
            return WatchExit::NotServed;
        }
        Err(e) => {
            tracing::error!(error = %e, "Could not query resources from cluster");
            return WatchExit::DiscoveryFailed;
        }
    };

    let mut stream = source.watch(&resource);
    let mut store = Store::new(resource, sink);

    let synced = tokio::select! {
        synced = tokio::time::timeout(sync_timeout, store.sync(&mut stream)) => synced,
        _ = shutdown.wait_for(|stop| *stop) => return WatchExit::Shutdown,
    };
    match synced {
        Ok(true) => tracing::info!(objects = store.len(), "Initial listing synced"),
        Ok(false) => {
            tracing::error!("Watch stream closed before the initial listing completed");
            return WatchExit::SyncFailed;
        }
        Err(_) => {
            tracing::error!(timeout = ?sync_timeout, "Timed out waiting for the initial listing");
            return WatchExit::SyncFailed;
        }
    }

    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => {
                tracing::info!("Watch stopped on shutdown");
                return WatchExit::Shutdown;
            }
            next = stream.next() => match next {
                Some(Ok(event)) => {
                    store.apply(event);
                }
                Some(Err(e)) => tracing::warn!(error = %e, "Watch stream error, retrying"),
                None => {
                    tracing::warn!("Watch stream ended");
                    return WatchExit::StreamEnded;
                }
            }
        }
    }
}

/// Last known state of every object of one kind, keyed `namespace/name`.
struct Store {
    resource: ApiResource,
    sink: Arc<dyn ResourceSink>,
    objects: HashMap<String, DynamicObject>,
    /// Keys seen since the last `Init`, while a listing is in progress
    relisting: Option<HashSet<String>>,
}

impl Store {
    fn new(resource: ApiResource, sink: Arc<dyn ResourceSink>) -> Self {
        Self {
            resource,
            sink,
            objects: HashMap::new(),
            relisting: None,
        }
    }

    fn len(&self) -> usize {
        self.objects.len()
    }

    /// Consume the stream until the first full listing is done. `false` if it closed first.
    async fn sync(&mut self, stream: &mut WatchStream) -> bool {
        while let Some(next) = stream.next().await {
            match next {
                Ok(event) => {
                    if self.apply(event) {
                        return true;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Watch stream error during initial listing"),
            }
        }
        false
    }

    /// Returns `true` when `event` completed a listing.
    fn apply(&mut self, event: Event<DynamicObject>) -> bool {
        match event {
            Event::Init => {
                self.relisting = Some(HashSet::new());
            }
            Event::InitApply(obj) => {
                let obj = self.normalize(obj);
                let key = store_key(&obj);
                if let Some(seen) = self.relisting.as_mut() {
                    seen.insert(key.clone());
                }
                self.upsert(key, obj);
            }
            Event::InitDone => {
                if let Some(seen) = self.relisting.take() {
                    self.drop_unseen(&seen);
                }
                return true;
            }
            Event::Apply(obj) => {
                let obj = self.normalize(obj);
                self.upsert(store_key(&obj), obj);
            }
            Event::Delete(obj) => {
                let obj = self.normalize(obj);
                self.objects.remove(&store_key(&obj));
                self.sink.on_delete(DeletedObject::Final(obj));
            }
        }
        false
    }

    fn upsert(&mut self, key: String, obj: DynamicObject) {
        match self.objects.insert(key, obj.clone()) {
            None => self.sink.on_add(obj),
            Some(old)
                if old.resource_version().is_some()
                    && old.resource_version() == obj.resource_version() => {}
            Some(old) => self.sink.on_update(old, obj),
        }
    }

    /// Objects missing from a fresh listing were deleted while the watch was down.
    fn drop_unseen(&mut self, seen: &HashSet<String>) {
        let gone = self
            .objects
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect::<Vec<_>>();

        for key in gone {
            if let Some(last_known) = self.objects.remove(&key) {
                self.sink
                    .on_delete(DeletedObject::StateUnknown { key, last_known });
            }
        }
    }

    /// List items come without type information, stamp it from discovery.
    fn normalize(&self, mut obj: DynamicObject) -> DynamicObject {
        if obj.types.as_ref().is_none_or(|t| t.kind.is_empty()) {
            obj.types = Some(TypeMeta {
                api_version: self.resource.api_version.clone(),
                kind: self.resource.kind.clone(),
            });
        }
        obj
    }
}

fn store_key(obj: &DynamicObject) -> String {
    match obj.namespace() {
        Some(ns) => format!("{ns}/{}", obj.name_any()),
        None => obj.name_any(),
    }
}
