//! One cluster's side of the authentication handshake.
//!
//! Provider steps: [`Cluster::ensure_nonce`], [`Cluster::api_proxy_remapped_ip`],
//! [`Cluster::ensure_tenant`], [`Cluster::generate_identity`].
//! Consumer steps: [`Cluster::ensure_signed_nonce`],
//! [`Cluster::remap_ip_external_cidr`], [`Cluster::generate_tenant`],
//! [`Cluster::ensure_identity`].
//!
//! Data produced by one side is returned to the caller, which hands it to
//! the other side. Nothing is kept between calls except the cluster ID cache
//! of the underlying [`Factory`].

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use liqo_common::cidr;
use liqo_common::crd::{
    is_configuration_status_set, Configuration, Identity, IdentitySpec, IdentityType, Tenant,
    TenantSpec,
};
use liqo_common::kube_utils::{label_selector, merge_labels, remote_cluster_labels, secret_data};
use liqo_common::{
    Error, OpContext, Result, API_PROXY_IP_NAME, API_PROXY_PORT, AUTH_KEYS_PRIVATE_KEY_FIELD,
    AUTH_KEYS_PUBLIC_KEY_FIELD, AUTH_KEYS_SECRET_NAME, IDENTITY_TYPE_LABEL, NONCE_SECRET_FIELD,
    NONCE_SECRET_LABEL, NONCE_SECRET_NAME, REMOTE_CLUSTER_ID_LABEL, SIGNED_NONCE_SECRET_FIELD,
    SIGNED_NONCE_SECRET_LABEL, SIGNED_NONCE_SECRET_NAME,
};
use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, KeyPair};
use tracing::{debug, info};

use crate::factory::Factory;
use crate::getters;
use crate::wait::Waiter;

/// Organization of control-plane certificates
const CONTROL_PLANE_ORGANIZATION: &str = "liqo.io";

/// Name of the ControlPlane Identity towards `provider_cluster_id`
pub fn control_plane_identity_name(provider_cluster_id: &str) -> String {
    format!("controlplane-{}", provider_cluster_id)
}

/// Build a PEM CSR for the control plane of `cluster_id`, signed with the
/// cluster's authentication key
pub fn generate_csr(private_key_pem: &str, cluster_id: &str) -> Result<String> {
    let key_pair = KeyPair::from_pem(private_key_pem)
        .map_err(|e| Error::crypto(format!("failed to parse authentication key: {}", e)))?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(cluster_id.to_string()));
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(CONTROL_PLANE_ORGANIZATION.to_string()),
    );
    params.distinguished_name = dn;

    params
        .serialize_request(&key_pair)
        .and_then(|csr| csr.pem())
        .map_err(|e| Error::crypto(format!("failed to generate CSR: {}", e)))
}

/// Authentication steps bound to one cluster
pub struct Cluster<'a> {
    factory: &'a Factory,
    waiter: Waiter,
}

impl<'a> Cluster<'a> {
    pub fn new(factory: &'a Factory) -> Self {
        Self::with_waiter(factory, Waiter::new(factory))
    }

    pub fn with_waiter(factory: &'a Factory, waiter: Waiter) -> Self {
        Self { factory, waiter }
    }

    pub fn factory(&self) -> &Factory {
        self.factory
    }

    /// Read (and cache) this cluster's own ID
    pub async fn set_local_cluster_id(&self) -> Result<String> {
        let id = self.factory.cluster_id().await?;
        debug!(cluster = %self.factory.scope(), cluster_id = %id, "Local cluster ID");
        Ok(id)
    }

    /// Get or create the tenant namespace for `remote_cluster_id`
    pub async fn ensure_tenant_namespace(&self, ctx: &OpContext, remote_cluster_id: &str) -> Result<String> {
        ctx.run(
            "ensure tenant namespace",
            self.factory.tenant_namespaces().ensure(remote_cluster_id),
        )
        .await
    }

    /// Provider: request a nonce for consumer `remote_cluster_id` and wait
    /// for the controller to generate it
    pub async fn ensure_nonce(
        &self,
        ctx: &OpContext,
        remote_cluster_id: &str,
        tenant_namespace: &str,
    ) -> Result<Vec<u8>> {
        let res = self.factory.resources();
        let selector = label_selector([
            (NONCE_SECRET_LABEL, "true"),
            (REMOTE_CLUSTER_ID_LABEL, remote_cluster_id),
        ]);
        let name = getters::get_secret_by_labels(res, tenant_namespace, &selector, remote_cluster_id)
            .await?
            .and_then(|s| s.metadata.name)
            .unwrap_or_else(|| NONCE_SECRET_NAME.to_string());

        let labels = remote_cluster_labels(remote_cluster_id, &[(NONCE_SECRET_LABEL, "true")]);
        let apply = res.create_or_update(Some(tenant_namespace), &name, Secret::default, |s: &mut Secret| {
            merge_labels(&mut s.metadata.labels, &labels);
            Ok(())
        });
        ctx.run("apply nonce secret", apply).await?;

        self.waiter
            .for_nonce(ctx, remote_cluster_id, tenant_namespace)
            .await
    }

    /// Consumer: hand the provider's nonce to the local controller and wait
    /// for its signature
    pub async fn ensure_signed_nonce(
        &self,
        ctx: &OpContext,
        remote_cluster_id: &str,
        tenant_namespace: &str,
        nonce: &[u8],
    ) -> Result<Vec<u8>> {
        let res = self.factory.resources();
        let selector = label_selector([
            (SIGNED_NONCE_SECRET_LABEL, "true"),
            (REMOTE_CLUSTER_ID_LABEL, remote_cluster_id),
        ]);
        let name = getters::get_secret_by_labels(res, tenant_namespace, &selector, remote_cluster_id)
            .await?
            .and_then(|s| s.metadata.name)
            .unwrap_or_else(|| SIGNED_NONCE_SECRET_NAME.to_string());

        let labels =
            remote_cluster_labels(remote_cluster_id, &[(SIGNED_NONCE_SECRET_LABEL, "true")]);
        let apply = res.create_or_update(Some(tenant_namespace), &name, Secret::default, |s: &mut Secret| {
            merge_labels(&mut s.metadata.labels, &labels);
            let stale = secret_data(s, NONCE_SECRET_FIELD).is_some_and(|n| n != nonce);
            let data = s.data.get_or_insert_with(Default::default);
            // a signature of a previous nonce must not be picked up
            if stale {
                data.remove(SIGNED_NONCE_SECRET_FIELD);
            }
            data.insert(NONCE_SECRET_FIELD.to_string(), ByteString(nonce.to_vec()));
            Ok(())
        });
        ctx.run("apply signed nonce secret", apply).await?;

        self.waiter
            .for_signed_nonce(ctx, remote_cluster_id, tenant_namespace)
            .await
    }

    /// Consumer: the network Configuration towards `remote_cluster_id`,
    /// required before in-band authentication can derive a proxy address
    pub async fn check_in_band_networking(&self, remote_cluster_id: &str) -> Result<Configuration> {
        let conf =
            getters::get_configuration_by_cluster_id(self.factory.resources(), remote_cluster_id, None)
                .await?
                .ok_or_else(|| {
                    Error::precondition(format!(
                        "in-band authentication needs networking towards cluster {}: \
                         no network Configuration found, run `liqoctl network init` first",
                        remote_cluster_id
                    ))
                })?;
        if !is_configuration_status_set(&conf) {
            return Err(Error::precondition(format!(
                "in-band authentication needs networking towards cluster {}: \
                 the network Configuration has no remapped CIDRs yet",
                remote_cluster_id
            )));
        }
        Ok(conf)
    }

    /// Provider: address of the API server proxy, as allocated by IPAM
    pub async fn api_proxy_remapped_ip(&self, ctx: &OpContext) -> Result<String> {
        self.waiter
            .for_ip_status(ctx, self.factory.liqo_namespace(), API_PROXY_IP_NAME)
            .await
    }

    /// Consumer: translate an address of `remote_cluster_id` into the
    /// network the local cluster uses to reach it
    pub async fn remap_ip_external_cidr(&self, remote_cluster_id: &str, ip: &str) -> Result<String> {
        let conf = self.check_in_band_networking(remote_cluster_id).await?;
        let remapped = cidr::remap_ip_external_cidr(&conf, ip)?;
        debug!(ip = %ip, remapped = %remapped, "Remapped API server proxy address");
        Ok(remapped)
    }

    /// Consumer: build the Tenant to apply on the provider.
    ///
    /// The CSR is signed with the local authentication key, so the provider
    /// can match it against the public key and the nonce signature.
    pub async fn generate_tenant(
        &self,
        provider_tenant_namespace: &str,
        signature: &[u8],
        proxy_url: Option<&str>,
    ) -> Result<Tenant> {
        let local_id = self.factory.cluster_id().await?;
        let liqo_ns = self.factory.liqo_namespace();
        let keys: Secret = self
            .factory
            .resources()
            .get(Some(liqo_ns), AUTH_KEYS_SECRET_NAME)
            .await?
            .ok_or_else(|| {
                Error::precondition(format!(
                    "secret {}/{} not found: is Liqo installed?",
                    liqo_ns, AUTH_KEYS_SECRET_NAME
                ))
            })?;
        let private_key = secret_data(&keys, AUTH_KEYS_PRIVATE_KEY_FIELD)
            .ok_or_else(|| Error::precondition("authentication keys have no private key"))?;
        let public_key = secret_data(&keys, AUTH_KEYS_PUBLIC_KEY_FIELD)
            .ok_or_else(|| Error::precondition("authentication keys have no public key"))?;
        let private_key = String::from_utf8(private_key)
            .map_err(|_| Error::crypto("authentication private key is not PEM"))?;
        let csr = generate_csr(&private_key, &local_id)?;

        let mut tenant = Tenant::new(
            &local_id,
            TenantSpec {
                cluster_id: local_id.clone(),
                public_key: Some(ByteString(public_key)),
                csr: Some(ByteString(csr.into_bytes())),
                signature: Some(ByteString(signature.to_vec())),
                proxy_url: proxy_url.map(str::to_string),
                tenant_condition: None,
            },
        );
        tenant.metadata.namespace = Some(provider_tenant_namespace.to_string());
        tenant.metadata.labels = Some(remote_cluster_labels(&local_id, &[]));
        Ok(tenant)
    }

    /// Provider: apply the consumer's Tenant and wait for the controller to
    /// issue credentials.
    ///
    /// An existing Tenant for the same consumer keeps its name and its
    /// tenant condition, so cordoned tenants stay cordoned across re-runs.
    pub async fn ensure_tenant(&self, ctx: &OpContext, tenant: &Tenant) -> Result<Tenant> {
        let res = self.factory.resources();
        let consumer_id = tenant.spec.cluster_id.as_str();
        let namespace = tenant
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| Error::validation("tenant has no namespace"))?;
        let name = match getters::get_tenant_by_cluster_id(res, consumer_id, Some(namespace)).await? {
            Some(existing) => existing.metadata.name.unwrap_or_else(|| consumer_id.to_string()),
            None => tenant
                .metadata
                .name
                .clone()
                .unwrap_or_else(|| consumer_id.to_string()),
        };

        let desired = &tenant.spec;
        let labels = tenant.metadata.labels.clone().unwrap_or_default();
        let apply = res.create_or_update(
            Some(namespace),
            &name,
            || Tenant::new(&name, TenantSpec::default()),
            |t: &mut Tenant| {
                merge_labels(&mut t.metadata.labels, &labels);
                let condition = t.spec.tenant_condition;
                t.spec = desired.clone();
                t.spec.tenant_condition = condition;
                Ok(())
            },
        );
        let (_, op) = ctx.run("apply tenant", apply).await?;
        info!(namespace = %namespace, name = %name, operation = ?op, "Tenant applied");

        self.waiter
            .for_tenant_status(ctx, consumer_id, namespace)
            .await
    }

    /// Provider: build the ControlPlane Identity the consumer will hold,
    /// from the credentials issued in the Tenant status
    pub async fn generate_identity(
        &self,
        tenant: &Tenant,
        consumer_tenant_namespace: &str,
    ) -> Result<Identity> {
        let local_id = self.factory.cluster_id().await?;
        let status = tenant
            .status
            .as_ref()
            .filter(|_| tenant.is_status_filled())
            .ok_or_else(|| {
                Error::precondition(format!(
                    "tenant {} has no credentials yet",
                    tenant.spec.cluster_id
                ))
            })?;
        let auth_params = status.auth_params.clone().unwrap_or_default();

        let mut identity = Identity::new(
            &control_plane_identity_name(&local_id),
            IdentitySpec {
                cluster_id: local_id.clone(),
                type_: IdentityType::ControlPlane,
                auth_params,
                namespace: Some(status.tenant_namespace.clone()),
            },
        );
        identity.metadata.namespace = Some(consumer_tenant_namespace.to_string());
        identity.metadata.labels = Some(remote_cluster_labels(
            &local_id,
            &[(IDENTITY_TYPE_LABEL, IdentityType::ControlPlane.as_str())],
        ));
        Ok(identity)
    }

    /// Consumer: apply the ControlPlane Identity and wait for its kubeconfig
    pub async fn ensure_identity(&self, ctx: &OpContext, identity: &Identity) -> Result<Identity> {
        let res = self.factory.resources();
        let provider_id = identity.spec.cluster_id.as_str();
        let namespace = identity
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| Error::validation("identity has no namespace"))?;
        let name = match getters::get_control_plane_identity(res, provider_id, Some(namespace)).await? {
            Some(existing) => existing
                .metadata
                .name
                .unwrap_or_else(|| control_plane_identity_name(provider_id)),
            None => control_plane_identity_name(provider_id),
        };

        let desired = &identity.spec;
        let labels = identity.metadata.labels.clone().unwrap_or_default();
        let apply = res.create_or_update(
            Some(namespace),
            &name,
            || Identity::new(&name, IdentitySpec::default()),
            |i: &mut Identity| {
                merge_labels(&mut i.metadata.labels, &labels);
                i.spec = desired.clone();
                Ok(())
            },
        );
        let (_, op) = ctx.run("apply identity", apply).await?;
        info!(namespace = %namespace, name = %name, operation = ?op, "Identity applied");

        self.waiter
            .for_identity_status(ctx, provider_id, namespace)
            .await
    }
}

/// `http://<ip>:<proxy port>`
pub fn proxy_url_for(ip: &str) -> String {
    if ip.contains(':') {
        format!("http://[{}]:{}", ip, API_PROXY_PORT)
    } else {
        format!("http://{}:{}", ip, API_PROXY_PORT)
    }
}
