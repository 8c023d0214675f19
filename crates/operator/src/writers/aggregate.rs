use std::{future::Future, sync::Arc};

use chrono::{SecondsFormat, Utc};
use kube::api::DynamicObject;
use serde_json::{Map, Value, json};
use tracing::instrument;

use super::{Reconciled, entries::initialize_status_defaults};
use crate::{
    Error, Result,
    api::{Location, VitistackSpec, VitistackStatus},
    cluster::{AggregateApi, vitistack_resource},
    locks::LockRegistry,
    site::{SiteInfo, SiteService},
    value::{nested_object, set_nested},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Spec,
    Status,
}

impl Section {
    fn key(self) -> &'static str {
        match self {
            Section::Spec => "spec",
            Section::Status => "status",
        }
    }

    fn read(self, obj: &DynamicObject) -> Map<String, Value> {
        nested_object(&obj.data, &[self.key()])
            .cloned()
            .unwrap_or_default()
    }

    fn write(self, obj: &mut DynamicObject, fields: Map<String, Value>) {
        set_nested(&mut obj.data, &[self.key()], Value::Object(fields));
    }
}

pub(crate) fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// One named aggregate and the lock discipline around every write to it.
pub struct Aggregate<A> {
    api: Arc<A>,
    site: Arc<SiteService<A>>,
    locks: Arc<LockRegistry>,
    name: String,
}

impl<A: AggregateApi> Aggregate<A> {
    pub fn new(api: Arc<A>, site: Arc<SiteService<A>>, locks: Arc<LockRegistry>, name: &str) -> Self {
        Self {
            api,
            site,
            locks,
            name: name.to_string(),
        }
    }

    /// Get the aggregate, creating it if absent.
    ///
    /// Existence is checked under the read lock; creation re-checks under the
    /// write lock so concurrent first events create exactly one object.
    #[instrument(skip(self), fields(aggregate = %self.name))]
    pub async fn resolve(&self) -> Result<DynamicObject> {
        {
            let _read = self.locks.read(&self.name).await;
            if let Some(existing) = self.api.get(&self.name).await? {
                return Ok(existing);
            }
        }

        let _write = self.locks.write(&self.name).await;
        if let Some(existing) = self.api.get(&self.name).await? {
            return Ok(existing);
        }
        self.create().await
    }

    async fn create(&self) -> Result<DynamicObject> {
        let site = match self.site.info().await {
            Ok(site) => site,
            Err(e) => {
                tracing::warn!(error = %e, "Creating aggregate without site configuration");
                SiteInfo::default()
            }
        };

        let mut obj = DynamicObject::new(&self.name, &vitistack_resource());
        obj.data = json!({ "spec": serde_json::to_value(initial_spec(&self.name, &site))? });

        let created = match self.api.create(&obj).await {
            Ok(created) => created,
            Err(Error::Conflict(_)) => {
                tracing::info!("Aggregate was created concurrently, re-reading it");
                return self.fetch().await;
            }
            Err(e) => return Err(e),
        };
        tracing::info!("Created aggregate");

        let mut status = match serde_json::to_value(initial_status())? {
            Value::Object(status) => status,
            _ => Map::new(),
        };
        initialize_status_defaults(&mut status);

        let mut initialised = created.clone();
        Section::Status.write(&mut initialised, status);
        match self.api.replace_status(&initialised).await {
            Ok(updated) => Ok(updated),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to initialise aggregate status");
                Ok(created)
            }
        }
    }

    async fn fetch(&self) -> Result<DynamicObject> {
        self.api
            .get(&self.name)
            .await?
            .ok_or_else(|| Error::AggregateMissing(self.name.clone()))
    }

    /// Read-modify-write of one section of the aggregate.
    ///
    /// `mutate` edits the section in place and returns whether it changed
    /// anything. It runs once under the read lock as a cheap pre-check, then
    /// again against a fresh copy fetched under the write lock.
    pub async fn reconcile<F>(&self, section: Section, mutate: F) -> Result<Reconciled>
    where
        F: Fn(&mut Map<String, Value>) -> bool + Send + Sync,
    {
        self.reconcile_with(
            section,
            || async { Ok::<_, Error>(()) },
            |fields, _: &()| mutate(fields),
        )
        .await
    }

    /// Same as [`Aggregate::reconcile`], with `observe` run right before each
    /// `mutate` while the corresponding lock is held.
    ///
    /// Anything `mutate` derives from cluster state other than the aggregate
    /// itself must come from `observe`, so the last writer to take the lock
    /// also writes the freshest observation.
    #[instrument(skip(self, observe, mutate), fields(aggregate = %self.name))]
    pub async fn reconcile_with<T, O, Fut, F>(
        &self,
        section: Section,
        observe: O,
        mutate: F,
    ) -> Result<Reconciled>
    where
        T: Send,
        O: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
        F: Fn(&mut Map<String, Value>, &T) -> bool + Send + Sync,
    {
        let exists = {
            let _read = self.locks.read(&self.name).await;
            match self.api.get(&self.name).await? {
                Some(current) => {
                    let observed = observe().await?;
                    if !mutate(&mut section.read(&current), &observed) {
                        return Ok(Reconciled::Unchanged);
                    }
                    true
                }
                None => false,
            }
        };
        if !exists {
            self.resolve().await?;
        }

        let _write = self.locks.write(&self.name).await;
        let mut latest = self.fetch().await?;
        let observed = observe().await?;
        let mut fields = section.read(&latest);
        if !mutate(&mut fields, &observed) {
            return Ok(Reconciled::Unchanged);
        }

        match section {
            Section::Spec => {
                section.write(&mut latest, fields);
                self.api.replace(&latest).await?;
            }
            Section::Status => {
                initialize_status_defaults(&mut fields);
                fields.insert("lastReconcileTime".to_string(), Value::String(now()));
                section.write(&mut latest, fields);
                self.api.replace_status(&latest).await?;
            }
        }
        Ok(Reconciled::Updated)
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn initial_spec(name: &str, site: &SiteInfo) -> VitistackSpec {
    VitistackSpec {
        display_name: non_empty(&site.name).unwrap_or_else(|| name.to_string()),
        description: non_empty(&site.description),
        infrastructure: non_empty(&site.infrastructure),
        region: non_empty(&site.region),
        zone: non_empty(&site.zone),
        location: non_empty(&site.location).map(|country| Location { country }),
    }
}

fn initial_status() -> VitistackStatus {
    VitistackStatus {
        phase: Some("Initializing".to_string()),
        last_reconcile_time: Some(now()),
        observed_generation: Some(1),
        ..Default::default()
    }
}
