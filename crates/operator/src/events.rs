use std::{
    any::Any,
    collections::HashMap,
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{Arc, PoisonError, RwLock},
};

use futures::{FutureExt, future::BoxFuture};
use kube::{ResourceExt, api::DynamicObject};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    Added,
    Updated,
    Deleted,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeType::Added => "ADD",
            ChangeType::Updated => "UPDATE",
            ChangeType::Deleted => "DELETE",
        })
    }
}

/// A change to one watched object, as seen by the ingest sink.
#[derive(Debug, Clone)]
pub struct ResourceEvent {
    pub kind: String,
    pub change: ChangeType,
    pub resource: DynamicObject,
}

impl ResourceEvent {
    pub fn new(kind: impl Into<String>, change: ChangeType, resource: DynamicObject) -> Self {
        Self {
            kind: kind.into(),
            change,
            resource,
        }
    }

    pub fn name(&self) -> String {
        self.resource.name_any()
    }

    pub fn namespace(&self) -> Option<String> {
        self.resource.namespace()
    }
}

type Handler = Arc<dyn Fn(Arc<ResourceEvent>) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
struct Subscriptions {
    by_kind: HashMap<String, Vec<Handler>>,
    global: Vec<Handler>,
}

/// In-process fan-out of [`ResourceEvent`]s keyed by resource kind.
///
/// Every (event, handler) pair runs as its own task. A handler that panics is
/// logged and dropped without affecting the other handlers.
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Subscriptions>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subs = self.read();
        f.debug_struct("EventBus")
            .field("kinds", &subs.by_kind.keys().collect::<Vec<_>>())
            .field("global", &subs.global.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F, Fut>(&self, kind: impl Into<String>, handler: F)
    where
        F: Fn(Arc<ResourceEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let kind = kind.into();
        tracing::info!(%kind, "Subscribed handler for resource kind");
        self.write()
            .by_kind
            .entry(kind)
            .or_default()
            .push(boxed(handler));
    }

    pub fn subscribe_all<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<ResourceEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tracing::info!("Subscribed handler for all resource events");
        self.write().global.push(boxed(handler));
    }

    /// Hand `event` to every matching handler and return without waiting on them.
    ///
    /// Must be called from within a tokio runtime.
    pub fn publish(&self, event: ResourceEvent) -> Dispatch {
        let event = Arc::new(event);

        let handlers = {
            let subs = self.read();
            subs.by_kind
                .get(&event.kind)
                .into_iter()
                .flatten()
                .map(|h| (Scope::Kind, Arc::clone(h)))
                .chain(subs.global.iter().map(|h| (Scope::Global, Arc::clone(h))))
                .collect::<Vec<_>>()
        };

        let tasks = handlers
            .into_iter()
            .map(|(scope, handler)| {
                let event = Arc::clone(&event);
                tokio::spawn(async move {
                    let kind = event.kind.clone();
                    let change = event.change;
                    let run = async move { handler(event).await };
                    if let Err(panic) = AssertUnwindSafe(run).catch_unwind().await {
                        tracing::error!(
                            %kind,
                            %change,
                            %scope,
                            panic = panic_message(panic.as_ref()),
                            "Panic in event handler"
                        );
                    }
                })
            })
            .collect();

        Dispatch { tasks }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Subscriptions> {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Subscriptions> {
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn boxed<F, Fut>(handler: F) -> Handler
where
    F: Fn(Arc<ResourceEvent>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |event| handler(event).boxed())
}

#[derive(Debug, Clone, Copy)]
enum Scope {
    Kind,
    Global,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scope::Kind => "kind",
            Scope::Global => "global",
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

/// Handles to the tasks spawned by one [`EventBus::publish`] call.
///
/// Dropping it leaves the tasks running.
#[derive(Debug)]
pub struct Dispatch {
    tasks: Vec<JoinHandle<()>>,
}

impl Dispatch {
    /// Number of handlers the event was delivered to.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every handler of this publish to finish.
    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Debug log of every event flowing through the bus.
pub fn log_events(bus: &EventBus) {
    bus.subscribe_all(|event| async move {
        tracing::debug!(
            kind = %event.kind,
            change = %event.change,
            name = %event.name(),
            namespace = event.namespace().as_deref().unwrap_or(""),
            "Resource event"
        );
    });
}
