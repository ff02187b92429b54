//! Tenant namespaces: one namespace per remote cluster, scoping every
//! authentication and networking object related to that peer.

use k8s_openapi::api::core::v1::Namespace;
use tracing::info;

use crate::kube_utils::label_selector;
use crate::{
    Error, Resources, Result, REMOTE_CLUSTER_ID_LABEL, TENANT_NAMESPACE_LABEL,
    TENANT_NAMESPACE_PREFIX,
};

/// Conventional tenant namespace name for a remote cluster
pub fn tenant_namespace_name(cluster_id: &str) -> String {
    format!("{}-{}", TENANT_NAMESPACE_PREFIX, cluster_id)
}

/// Cluster IDs end up in namespace names and label values, so they must be
/// DNS-1123 labels.
pub fn validate_cluster_id(cluster_id: &str) -> Result<()> {
    let valid = !cluster_id.is_empty()
        && cluster_id.len() <= 63 - TENANT_NAMESPACE_PREFIX.len() - 1
        && cluster_id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !cluster_id.starts_with('-')
        && !cluster_id.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "invalid cluster ID {:?}: must be a lowercase DNS label",
            cluster_id
        )))
    }
}

fn selector(cluster_id: &str) -> String {
    label_selector([
        (TENANT_NAMESPACE_LABEL, "true"),
        (REMOTE_CLUSTER_ID_LABEL, cluster_id),
    ])
}

/// Looks up, creates and deletes tenant namespaces on one cluster
#[derive(Clone)]
pub struct TenantNamespaceManager {
    resources: Resources,
}

impl TenantNamespaceManager {
    /// Manager over a cluster's resources
    pub fn new(resources: Resources) -> Self {
        Self { resources }
    }

    /// The tenant namespace for `cluster_id`, if any
    pub async fn get(&self, cluster_id: &str) -> Result<Option<Namespace>> {
        self.resources
            .find_unique::<Namespace>(None, &selector(cluster_id), cluster_id)
            .await
    }

    /// Return the tenant namespace name for `cluster_id`, creating it if needed.
    ///
    /// An existing namespace found by label is reused even if it does not
    /// follow the naming convention.
    pub async fn ensure(&self, cluster_id: &str) -> Result<String> {
        validate_cluster_id(cluster_id)?;
        if let Some(existing) = self.get(cluster_id).await? {
            if let Some(name) = existing.metadata.name {
                return Ok(name);
            }
        }

        let name = tenant_namespace_name(cluster_id);
        self.resources
            .create_or_update(None, &name, Namespace::default, |ns: &mut Namespace| {
                let labels = ns.metadata.labels.get_or_insert_with(Default::default);
                labels.insert(TENANT_NAMESPACE_LABEL.to_string(), "true".to_string());
                labels.insert(REMOTE_CLUSTER_ID_LABEL.to_string(), cluster_id.to_string());
                Ok(())
            })
            .await?;
        info!(namespace = %name, remote_cluster_id = %cluster_id, "Tenant namespace ready");
        Ok(name)
    }

    /// Delete the tenant namespace for `cluster_id`. Returns whether one existed.
    pub async fn delete(&self, cluster_id: &str) -> Result<bool> {
        match self.get(cluster_id).await? {
            Some(ns) => {
                let name = ns.metadata.name.unwrap_or_default();
                self.resources.delete::<Namespace>(None, &name).await
            }
            None => Ok(false),
        }
    }
}
