//! Object store seam and typed resource access
//!
//! [`ObjectStore`] is the single boundary between liqoctl and an API server:
//! get/list/create/replace/merge-patch/delete over [`DynamicObject`]s. The
//! production implementation is [`KubeStore`]; tests use the in-memory
//! `testing::FakeCluster`. [`Resources`] layers typed access on top and owns
//! the idempotent create-or-update pattern every `ensure` step relies on.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::core::TypeMeta;
use kube::discovery::ApiResource;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::retry::{retry_with_backoff_if, RetryConfig};
use crate::{Error, Result, FIELD_MANAGER};

/// Resource type plus optional namespace an operation targets
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scope {
    /// API group/version/kind/plural
    pub resource: ApiResource,
    /// Namespace, `None` for cluster-scoped resources or all-namespace lists
    pub namespace: Option<String>,
}

impl Scope {
    /// Scope for a typed resource
    pub fn of<K: Object>(namespace: Option<&str>) -> Self {
        Self {
            resource: ApiResource::erase::<K>(&()),
            namespace: namespace.map(str::to_string),
        }
    }

    /// `namespace/name` or `name`, for messages
    pub fn qualified(&self, name: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}", ns, name),
            None => name.to_string(),
        }
    }
}

/// Trait abstracting the API server operations liqoctl needs
///
/// This trait allows replacing the API server in tests while using the real
/// client in production. Implementations map "not found" on `get` to
/// `Ok(None)` and on `delete` to `Ok(false)`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get an object by name
    async fn get(&self, scope: &Scope, name: &str) -> Result<Option<DynamicObject>>;

    /// List objects matching an equality label selector (empty selects all)
    async fn list(&self, scope: &Scope, label_selector: &str) -> Result<Vec<DynamicObject>>;

    /// Create an object, failing with `AlreadyExists` if present
    async fn create(&self, scope: &Scope, object: &DynamicObject) -> Result<DynamicObject>;

    /// Replace an object, failing with `Conflict` on a stale resourceVersion
    async fn replace(&self, scope: &Scope, object: &DynamicObject) -> Result<DynamicObject>;

    /// Apply a JSON merge patch
    async fn patch_merge(
        &self,
        scope: &Scope,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject>;

    /// Delete an object, returning whether it existed
    async fn delete(&self, scope: &Scope, name: &str) -> Result<bool>;
}

/// [`ObjectStore`] backed by a kube-rs client
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a store over an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, scope: &Scope) -> Api<DynamicObject> {
        match &scope.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &scope.resource),
            None => Api::all_with(self.client.clone(), &scope.resource),
        }
    }
}

fn map_kube_error(scope: &Scope, name: &str, err: kube::Error) -> Error {
    match &err {
        kube::Error::Api(ae) if ae.code == 404 => {
            Error::not_found(&scope.resource.kind, scope.qualified(name))
        }
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            Error::AlreadyExists {
                kind: scope.resource.kind.clone(),
                name: scope.qualified(name),
            }
        }
        kube::Error::Api(ae) if ae.code == 409 => Error::Conflict {
            kind: scope.resource.kind.clone(),
            name: scope.qualified(name),
        },
        _ => Error::Kube { source: err },
    }
}

fn object_name(object: &DynamicObject) -> Result<&str> {
    object
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::validation("object has no name"))
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, scope: &Scope, name: &str) -> Result<Option<DynamicObject>> {
        self.api(scope)
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error(scope, name, e))
    }

    async fn list(&self, scope: &Scope, label_selector: &str) -> Result<Vec<DynamicObject>> {
        let mut params = ListParams::default();
        if !label_selector.is_empty() {
            params = params.labels(label_selector);
        }
        let list = self
            .api(scope)
            .list(&params)
            .await
            .map_err(|e| map_kube_error(scope, "", e))?;
        Ok(list.items)
    }

    async fn create(&self, scope: &Scope, object: &DynamicObject) -> Result<DynamicObject> {
        let name = object_name(object)?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api(scope)
            .create(&params, object)
            .await
            .map_err(|e| map_kube_error(scope, name, e))
    }

    async fn replace(&self, scope: &Scope, object: &DynamicObject) -> Result<DynamicObject> {
        let name = object_name(object)?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api(scope)
            .replace(name, &params, object)
            .await
            .map_err(|e| map_kube_error(scope, name, e))
    }

    async fn patch_merge(
        &self,
        scope: &Scope,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject> {
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api(scope)
            .patch(name, &params, &Patch::Merge(patch))
            .await
            .map_err(|e| map_kube_error(scope, name, e))
    }

    async fn delete(&self, scope: &Scope, name: &str) -> Result<bool> {
        match self
            .api(scope)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(map_kube_error(scope, name, e)),
        }
    }
}

/// Types that can flow through [`Resources`]
pub trait Object:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<K> Object for K where
    K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Outcome of [`Resources::create_or_update`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// The object did not exist and was created
    Created,
    /// The object existed and was updated in place
    Updated,
    /// The object existed and already matched
    Unchanged,
}

/// Serialize a typed object into a [`DynamicObject`]
pub fn to_dynamic<K: Object>(object: &K) -> Result<DynamicObject> {
    let mut dynamic: DynamicObject = serde_json::from_value(serde_json::to_value(object)?)?;
    if dynamic.types.is_none() {
        dynamic.types = Some(type_meta::<K>());
    }
    Ok(dynamic)
}

/// Deserialize a [`DynamicObject`] into a typed object
pub fn from_dynamic<K: Object>(mut object: DynamicObject) -> Result<K> {
    // list items come back without apiVersion/kind
    if object.types.is_none() {
        object.types = Some(type_meta::<K>());
    }
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

fn type_meta<K: Object>() -> TypeMeta {
    TypeMeta {
        api_version: K::api_version(&()).into_owned(),
        kind: K::kind(&()).into_owned(),
    }
}

/// Typed facade over an [`ObjectStore`]
#[derive(Clone)]
pub struct Resources {
    store: Arc<dyn ObjectStore>,
}

impl Resources {
    /// Wrap a store
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Get an object by name, `None` when it does not exist
    pub async fn get<K: Object>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
        let scope = Scope::of::<K>(namespace);
        match self.store.get(&scope, name).await {
            Ok(Some(obj)) => Ok(Some(from_dynamic(obj)?)),
            Ok(None) => Ok(None),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// List objects matching a label selector
    pub async fn list<K: Object>(&self, namespace: Option<&str>, selector: &str) -> Result<Vec<K>> {
        let scope = Scope::of::<K>(namespace);
        self.store
            .list(&scope, selector)
            .await?
            .into_iter()
            .map(from_dynamic)
            .collect()
    }

    /// Find the single object matching `selector`.
    ///
    /// Returns `None` when nothing matches and [`Error::Ambiguous`] when more
    /// than one object does, the system never picks one.
    pub async fn find_unique<K: Object>(
        &self,
        namespace: Option<&str>,
        selector: &str,
        cluster_id: &str,
    ) -> Result<Option<K>> {
        let mut items = self.list::<K>(namespace, selector).await?;
        match items.len() {
            0 => Ok(None),
            1 => Ok(items.pop()),
            n => Err(Error::ambiguous(K::kind(&()), cluster_id, n)),
        }
    }

    /// Create an object in its own namespace
    pub async fn create<K: Object>(&self, object: &K) -> Result<K> {
        let scope = Scope::of::<K>(object.namespace().as_deref());
        let created = self.store.create(&scope, &to_dynamic(object)?).await?;
        from_dynamic(created)
    }

    /// Replace an object (optimistic concurrency on resourceVersion)
    pub async fn replace<K: Object>(&self, object: &K) -> Result<K> {
        let scope = Scope::of::<K>(object.namespace().as_deref());
        let replaced = self.store.replace(&scope, &to_dynamic(object)?).await?;
        from_dynamic(replaced)
    }

    /// Apply a JSON merge patch
    pub async fn patch_merge<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K> {
        let scope = Scope::of::<K>(namespace);
        let patched = self.store.patch_merge(&scope, name, patch).await?;
        from_dynamic(patched)
    }

    /// Delete an object, ignoring not-found. Returns whether it existed.
    pub async fn delete<K: Object>(&self, namespace: Option<&str>, name: &str) -> Result<bool> {
        let scope = Scope::of::<K>(namespace);
        let deleted = self.store.delete(&scope, name).await?;
        if deleted {
            info!(kind = %scope.resource.kind, name = %scope.qualified(name), "Deleted");
        } else {
            debug!(kind = %scope.resource.kind, name = %scope.qualified(name), "Already absent");
        }
        Ok(deleted)
    }

    /// Idempotent create-or-update.
    ///
    /// Reads the current object; if missing, builds one with `init`, sets
    /// name/namespace and creates it. Either way `mutate` brings the object to
    /// the desired state, and an existing object is only written back when
    /// `mutate` changed it. Conflicts and create races restart from a fresh
    /// read.
    pub async fn create_or_update<K, I, M>(
        &self,
        namespace: Option<&str>,
        name: &str,
        init: I,
        mutate: M,
    ) -> Result<(K, Operation)>
    where
        K: Object,
        I: Fn() -> K,
        M: Fn(&mut K) -> Result<()>,
    {
        let kind = K::kind(&()).into_owned();
        let (object, op) = retry_with_backoff_if(
            &RetryConfig::conflict(),
            &kind,
            || self.try_create_or_update(namespace, name, &init, &mutate),
            |e: &Error| e.is_conflict() || matches!(e, Error::AlreadyExists { .. }),
        )
        .await?;

        match op {
            Operation::Unchanged => debug!(kind = %kind, name = %name, "Unchanged"),
            _ => info!(kind = %kind, name = %name, operation = ?op, "Applied"),
        }
        Ok((object, op))
    }

    async fn try_create_or_update<K, I, M>(
        &self,
        namespace: Option<&str>,
        name: &str,
        init: &I,
        mutate: &M,
    ) -> Result<(K, Operation)>
    where
        K: Object,
        I: Fn() -> K,
        M: Fn(&mut K) -> Result<()>,
    {
        match self.get::<K>(namespace, name).await? {
            None => {
                let mut object = init();
                object.meta_mut().name = Some(name.to_string());
                object.meta_mut().namespace = namespace.map(str::to_string);
                mutate(&mut object)?;
                Ok((self.create(&object).await?, Operation::Created))
            }
            Some(mut existing) => {
                let before = serde_json::to_value(&existing)?;
                mutate(&mut existing)?;
                if serde_json::to_value(&existing)? == before {
                    return Ok((existing, Operation::Unchanged));
                }
                Ok((self.replace(&existing).await?, Operation::Updated))
            }
        }
    }
}
