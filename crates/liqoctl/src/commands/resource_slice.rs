//! ResourceSlice creation: the consumer asks the provider for resources.
//!
//! The slice lives in the consumer tenant namespace for the provider. The
//! provider authenticates the request through the Tenant gate and reports the
//! verdict as an `Authentication` condition; a VirtualNode follows when
//! requested through the `create-virtual-node` annotation.

use std::collections::BTreeMap;

use liqo_common::crd::{ResourceSlice, ResourceSliceSpec, VirtualNode};
use liqo_common::kube_utils::{merge_labels, remote_cluster_labels};
use liqo_common::{
    OpContext, Result, CREATE_VIRTUAL_NODE_ANNOTATION, REPLICATION_REQUESTED_LABEL,
};
use tracing::info;

use crate::factory::Factory;
use crate::wait::Waiter;

/// What to request from the provider
#[derive(Clone, Debug)]
pub struct ResourceSliceOptions {
    /// Slice name; the provider cluster ID when unset
    pub name: Option<String>,
    /// Resource class requested from the provider
    pub class: String,
    /// Ask for a VirtualNode backed by this slice
    pub create_virtual_node: bool,
    /// Wait for the VirtualNode after the slice is accepted
    pub wait_virtual_node: bool,
}

impl Default for ResourceSliceOptions {
    fn default() -> Self {
        Self {
            name: None,
            class: "default".to_string(),
            create_virtual_node: true,
            wait_virtual_node: false,
        }
    }
}

/// Outcome of [`ensure_resource_slice`]
#[derive(Debug)]
pub struct Offloading {
    pub resource_slice: ResourceSlice,
    pub virtual_node: Option<VirtualNode>,
}

/// Create or update the ResourceSlice towards `provider_cluster_id` on the
/// consumer, then wait for the provider to accept it
pub async fn ensure_resource_slice(
    ctx: &OpContext,
    consumer: &Factory,
    waiter: &Waiter,
    provider_cluster_id: &str,
    opts: &ResourceSliceOptions,
) -> Result<Offloading> {
    let consumer_id = consumer.cluster_id().await?;
    let namespace = ctx
        .run(
            "ensure tenant namespace",
            consumer.tenant_namespaces().ensure(provider_cluster_id),
        )
        .await?;
    let name = opts
        .name
        .clone()
        .unwrap_or_else(|| provider_cluster_id.to_string());

    let labels = remote_cluster_labels(provider_cluster_id, &[(REPLICATION_REQUESTED_LABEL, "true")]);
    let create_vn = opts.create_virtual_node.to_string();

    let apply = consumer.resources().create_or_update(
        Some(&namespace),
        &name,
        || ResourceSlice::new(&name, ResourceSliceSpec::default()),
        |rs: &mut ResourceSlice| {
            merge_labels(&mut rs.metadata.labels, &labels);
            rs.metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(CREATE_VIRTUAL_NODE_ANNOTATION.to_string(), create_vn.clone());
            rs.spec.consumer_cluster_id = Some(consumer_id.clone());
            rs.spec.provider_cluster_id = Some(provider_cluster_id.to_string());
            rs.spec.class = opts.class.clone();
            Ok(())
        },
    );
    let (_, op) = ctx.run("apply resource slice", apply).await?;
    info!(
        namespace = %namespace,
        name = %name,
        operation = ?op,
        "ResourceSlice requested"
    );

    let resource_slice = waiter
        .for_resource_slice_authentication(ctx, &namespace, &name)
        .await?;

    let virtual_node = if opts.create_virtual_node && opts.wait_virtual_node {
        Some(
            waiter
                .for_virtual_node(ctx, provider_cluster_id, Some(&namespace))
                .await?,
        )
    } else {
        None
    };

    Ok(Offloading {
        resource_slice,
        virtual_node,
    })
}
