use serde_json::{Map, Value, json};

use super::{Reconciled, Section, Writers};
use crate::{
    Error, Result,
    cluster::AggregateApi,
    events::ResourceEvent,
    site::SiteInfo,
    value::nested_string_map,
};

/// Copy the non-empty site fields into the aggregate spec.
fn apply_site(spec: &mut Map<String, Value>, site: &SiteInfo) -> bool {
    let mut changed = false;
    let mut set = |field: &str, value: Value| {
        if spec.get(field) != Some(&value) {
            spec.insert(field.to_string(), value);
            changed = true;
        }
    };

    for (field, value) in [
        ("displayName", &site.name),
        ("region", &site.region),
        ("zone", &site.zone),
        ("description", &site.description),
        ("infrastructure", &site.infrastructure),
    ] {
        if !value.is_empty() {
            set(field, Value::String(value.clone()));
        }
    }
    if !site.location.is_empty() {
        set("location", json!({ "country": site.location }));
    }
    changed
}

impl<A: AggregateApi> Writers<A> {
    /// Any change to the operator config map refreshes the aggregate spec.
    pub(super) async fn reconcile_config_map(&self, event: &ResourceEvent) -> Result<Reconciled> {
        if event.name() != self.config.config_map_name
            || event.namespace().as_deref() != Some(self.config.namespace.as_str())
        {
            return Ok(Reconciled::Unchanged);
        }

        self.site.invalidate();

        let data = nested_string_map(&event.resource.data, &["data"]).unwrap_or_default();
        let site = SiteInfo::from_data(&data);
        if site.name.is_empty() {
            return Err(Error::MissingField("data.name"));
        }

        self.aggregate
            .reconcile(Section::Spec, |spec| apply_site(spec, &site))
            .await
    }
}
