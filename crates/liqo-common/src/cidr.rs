//! CIDR parsing and address remapping.
//!
//! When two peers use overlapping address spaces, each side sees the other's
//! external CIDR through a remapped network. An address keeps its host bits
//! and takes the network bits of the remapped CIDR.

use std::net::IpAddr;

use ipnet::IpNet;

use crate::crd::Configuration;
use crate::{Error, Result};

/// Parse `a.b.c.d/n` or an IPv6 prefix, zeroing the host bits
pub fn parse_cidr(s: &str) -> Result<IpNet> {
    s.parse::<IpNet>()
        .map(|net| net.trunc())
        .map_err(|e| Error::validation(format!("invalid CIDR {:?}: {}", s, e)))
}

/// Move `ip` into `target`: network bits from `target`, host bits from `ip`
pub fn map_ip_to_network(ip: IpAddr, target: &IpNet) -> Result<IpAddr> {
    match (ip, target) {
        (IpAddr::V4(ip), IpNet::V4(net)) => {
            let host = u32::from(ip) & u32::from(net.hostmask());
            Ok(IpAddr::V4((u32::from(net.network()) | host).into()))
        }
        (IpAddr::V6(ip), IpNet::V6(net)) => {
            let host = u128::from(ip) & u128::from(net.hostmask());
            Ok(IpAddr::V6((u128::from(net.network()) | host).into()))
        }
        _ => Err(Error::validation(format!(
            "cannot map {} into {}: address family mismatch",
            ip, target
        ))),
    }
}

/// Remap an address of the remote cluster's external CIDR into the network
/// the local cluster uses to reach it, as recorded in the Configuration for
/// that peer.
pub fn remap_ip_external_cidr(conf: &Configuration, ip: &str) -> Result<String> {
    let addr: IpAddr = ip
        .parse()
        .map_err(|e| Error::validation(format!("invalid IP {:?}: {}", ip, e)))?;
    let remapped = conf
        .status
        .as_ref()
        .and_then(|s| s.remote.as_ref())
        .and_then(|r| r.cidr.external.first())
        .ok_or_else(|| {
            Error::precondition(format!(
                "network configuration {} has no remapped external CIDR",
                conf.metadata.name.as_deref().unwrap_or_default()
            ))
        })?;
    let target = parse_cidr(remapped)?;
    Ok(map_ip_to_network(addr, &target)?.to_string())
}
