use std::{collections::BTreeMap, sync::Arc};

use garde::Validate;
use tracing::instrument;

use crate::{
    Error, Result,
    cache::ObjectCache,
    cluster::AggregateApi,
    ingest::config_map_key,
    value::nested_string_map,
};

/// Site description held in the operator config map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Validate)]
pub struct SiteInfo {
    #[garde(length(min = 1))]
    pub name: String,
    #[garde(length(min = 1))]
    pub region: String,
    #[garde(skip)]
    pub zone: String,
    /// Country code, read from `location` or `country`
    #[garde(length(min = 1))]
    pub location: String,
    #[garde(skip)]
    pub infrastructure: String,
    #[garde(skip)]
    pub description: String,
    #[garde(skip)]
    pub provider: String,
}

impl SiteInfo {
    pub fn from_data(data: &BTreeMap<String, String>) -> Self {
        let field = |key: &str| data.get(key).cloned().unwrap_or_default();
        Self {
            name: field("name"),
            region: field("region"),
            zone: field("zone"),
            location: data
                .get("location")
                .or_else(|| data.get("country"))
                .cloned()
                .unwrap_or_default(),
            infrastructure: field("infrastructure"),
            description: field("description"),
            provider: field("provider"),
        }
    }
}

/// Cache-first access to the site configuration.
pub struct SiteService<A> {
    cache: Arc<ObjectCache>,
    api: Arc<A>,
    namespace: String,
    config_map_name: String,
}

impl<A: AggregateApi> SiteService<A> {
    pub fn new(cache: Arc<ObjectCache>, api: Arc<A>, namespace: &str, config_map_name: &str) -> Self {
        Self {
            cache,
            api,
            namespace: namespace.to_string(),
            config_map_name: config_map_name.to_string(),
        }
    }

    pub fn cache_key(&self) -> String {
        config_map_key(&self.namespace, &self.config_map_name)
    }

    #[instrument(skip(self), fields(namespace = %self.namespace, name = %self.config_map_name))]
    pub async fn info(&self) -> Result<SiteInfo> {
        if let Some(info) = self.cached() {
            return Ok(info);
        }

        let config_map = self
            .api
            .config_map(&self.namespace, &self.config_map_name)
            .await?
            .ok_or_else(|| Error::ConfigMapMissing {
                namespace: self.namespace.clone(),
                name: self.config_map_name.clone(),
            })?;

        let info = SiteInfo::from_data(&config_map.data.clone().unwrap_or_default());
        info.validate()?;

        self.cache.set_json(self.cache_key(), &config_map)?;
        tracing::debug!("Fetched site configuration from the cluster");
        Ok(info)
    }

    pub async fn name(&self) -> Result<String> {
        Ok(self.info().await?.name)
    }

    /// Drop the cached config map so the next lookup reads the cluster copy.
    pub fn invalidate(&self) -> bool {
        let key = self.cache_key();
        let removed = self.cache.delete(&key);
        tracing::info!(%key, removed, "Invalidated cached site configuration");
        removed
    }

    fn cached(&self) -> Option<SiteInfo> {
        let body = self.cache.get(&self.cache_key())?;
        let value: serde_json::Value = serde_json::from_str(&body)
            .inspect_err(|e| tracing::warn!(error = %e, "Cached config map is not valid JSON"))
            .ok()?;
        let info = SiteInfo::from_data(&nested_string_map(&value, &["data"])?);
        info.validate()
            .inspect_err(|e| tracing::debug!(error = %e, "Cached config map is incomplete"))
            .ok()?;
        Some(info)
    }
}
