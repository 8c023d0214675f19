use kube::{ResourceExt, api::DynamicObject};

use crate::cache::ObjectCache;

/// Read-only view of the cached objects of one kind.
pub struct Repository<'a> {
    cache: &'a ObjectCache,
    kind: &'static str,
}

impl<'a> Repository<'a> {
    pub fn new(cache: &'a ObjectCache, kind: &'static str) -> Self {
        Self { cache, kind }
    }

    pub fn get_by_uid(&self, uid: &str) -> Option<DynamicObject> {
        self.decode(&self.cache.get(uid)?)
    }

    /// All cached objects of this kind, ordered by namespace and name.
    pub fn get_all(&self) -> Vec<DynamicObject> {
        let mut objects = self
            .cache
            .keys()
            .iter()
            .filter_map(|key| self.decode(&self.cache.get(key)?))
            .collect::<Vec<_>>();
        objects.sort_by_key(|obj| (obj.namespace(), obj.name_any()));
        objects
    }

    pub fn get_by_name(&self, name: &str) -> Option<DynamicObject> {
        self.get_all().into_iter().find(|obj| obj.name_any() == name)
    }

    fn decode(&self, body: &str) -> Option<DynamicObject> {
        let obj = serde_json::from_str::<DynamicObject>(body)
            .inspect_err(|e| tracing::debug!(kind = self.kind, error = %e, "Skipping undecodable cache entry"))
            .ok()?;
        let kind = obj.types.as_ref().map(|t| t.kind.as_str());
        (kind == Some(self.kind)).then_some(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::{KUBERNETES_PROVIDER, MACHINE_PROVIDER},
        testing::object,
    };

    fn cache_with(objects: &[DynamicObject]) -> ObjectCache {
        let cache = ObjectCache::new();
        for obj in objects {
            cache.set_json(obj.uid().unwrap(), obj).unwrap();
        }
        cache.set("configmap-default-vitistack-config", "not json at all");
        cache
    }

    #[test]
    fn filters_by_kind() {
        let b = object(KUBERNETES_PROVIDER, "b");
        let a = object(KUBERNETES_PROVIDER, "a");
        let mp = object(MACHINE_PROVIDER, "a");
        let cache = cache_with(&[b.clone(), a, mp.clone()]);
        let providers = Repository::new(&cache, KUBERNETES_PROVIDER);

        let names = providers
            .get_all()
            .iter()
            .map(|obj| obj.name_any())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "b"]);

        assert_eq!(providers.get_by_uid(&b.uid().unwrap()).unwrap().name_any(), "b");
        assert!(providers.get_by_uid(&mp.uid().unwrap()).is_none());
        assert!(providers.get_by_name("c").is_none());
    }
}
