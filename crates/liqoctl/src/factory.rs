//! Per-cluster connection context.
//!
//! A [`Factory`] bundles everything a step needs to talk to one cluster: the
//! object store, the resolved target namespace, the Liqo namespace and a
//! cache of the cluster's own ID. Commands build one per cluster ("local"
//! and "remote") and hand references to the operation objects.

use std::sync::Arc;

use liqo_common::kube_utils::{create_client, load_config};
use liqo_common::store::KubeStore;
use liqo_common::tenant_namespace::TenantNamespaceManager;
use liqo_common::{ObjectStore, Resources, DEFAULT_LIQO_NAMESPACE};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::{ClusterScope, ConnectionOptions};
use crate::getters;
use crate::Result;

/// Cluster ID cache, filled on first lookup and owned by one [`Factory`]
#[derive(Debug, Default)]
pub struct ClusterIdCache {
    cell: OnceCell<String>,
}

impl ClusterIdCache {
    /// Return the cached ID or resolve it with `lookup`
    pub async fn get_or_resolve<F, Fut>(&self, lookup: F) -> liqo_common::Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = liqo_common::Result<String>>,
    {
        self.cell.get_or_try_init(lookup).await.cloned()
    }
}

/// Connection context for one cluster
pub struct Factory {
    scope: ClusterScope,
    resources: Resources,
    namespace: String,
    liqo_namespace: String,
    cluster_id: ClusterIdCache,
}

impl Factory {
    /// Connect to a cluster from resolved connection settings
    pub async fn connect(options: &ConnectionOptions) -> Result<Self> {
        let config = load_config(options.kubeconfig.as_deref(), options.context.as_deref()).await?;
        let namespace = options
            .namespace
            .clone()
            .unwrap_or_else(|| config.default_namespace.clone());
        debug!(
            cluster = %options.scope,
            server = %config.cluster_url,
            namespace = %namespace,
            "Connecting"
        );
        let client = create_client(config)?;
        let store: Arc<dyn ObjectStore> = Arc::new(KubeStore::new(client));

        Ok(Self {
            scope: options.scope,
            resources: Resources::new(store),
            namespace,
            liqo_namespace: options.liqo_namespace.clone(),
            cluster_id: ClusterIdCache::default(),
        })
    }

    /// Factory over an arbitrary store, targeting the `default` namespace
    pub fn with_store(scope: ClusterScope, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            scope,
            resources: Resources::new(store),
            namespace: "default".to_string(),
            liqo_namespace: DEFAULT_LIQO_NAMESPACE.to_string(),
            cluster_id: ClusterIdCache::default(),
        }
    }

    pub fn scope(&self) -> ClusterScope {
        self.scope
    }

    /// Scope label used in logs and error annotations
    pub fn scope_label(&self) -> &'static str {
        self.scope.as_str()
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn liqo_namespace(&self) -> &str {
        &self.liqo_namespace
    }

    /// Tenant namespace manager for this cluster
    pub fn tenant_namespaces(&self) -> TenantNamespaceManager {
        TenantNamespaceManager::new(self.resources.clone())
    }

    /// This cluster's own ID, read once from the cluster ID ConfigMap
    pub async fn cluster_id(&self) -> liqo_common::Result<String> {
        self.cluster_id
            .get_or_resolve(|| getters::get_cluster_id(&self.resources, &self.liqo_namespace))
            .await
    }
}
