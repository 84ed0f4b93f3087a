//! Address planning for the declared network.

use std::net::Ipv4Addr;

use anyhow::Result;
use cidr::Ipv4Cidr;
use serde::{Deserialize, Serialize};

use crate::decl::file::network::SubnetRole;

/// Smallest subnet the layout will carve.
pub const MIN_SUBNET_PREFIX: u8 = 28;

/// Zones are lettered `a` to `z` after the region name.
pub const MAX_ZONES: u8 = 26;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetPlan {
    pub role: SubnetRole,
    pub zone: String,
    pub cidr: String,
    /// Public subnets route through the internet gateway, private ones do not.
    pub route_table: String,
}

fn zone_name(region: &str, index: u8) -> Option<String> {
    let letter = b'a'.checked_add(index).filter(|l| *l <= b'z')?;
    Some(format!("{}{}", region, letter as char))
}

/// Split `network` into one equal subnet per role and zone: roles in declared
/// order, zones in order within each role.
pub fn subnet_layout(
    network: Ipv4Cidr,
    roles: &[SubnetRole],
    zones: u8,
    region: &str,
) -> Result<Vec<SubnetPlan>> {
    if zones > MAX_ZONES {
        return Err(anyhow::anyhow!(
            "{zones} availability zones requested, at most {MAX_ZONES} are supported"
        ));
    }
    let count = roles.len() * zones as usize;
    if count == 0 {
        return Ok(vec![]);
    }
    let extra_bits = usize::BITS - (count - 1).leading_zeros();
    let prefix = network.network_length() as u32 + extra_bits;
    if prefix > MIN_SUBNET_PREFIX as u32 {
        return Err(anyhow::anyhow!(
            "CIDR {network} is too small for {count} subnets (would need /{prefix}, smallest allowed is /{MIN_SUBNET_PREFIX})"
        ));
    }

    let base = u32::from(network.first().address());
    let step = 1u32 << (32 - prefix);
    let mut plans = Vec::with_capacity(count);
    for (role_index, role) in roles.iter().enumerate() {
        for zone in 0..zones {
            let index = (role_index * zones as usize + zone as usize) as u32;
            let address = Ipv4Addr::from(base + index * step);
            let cidr = Ipv4Cidr::new(address, prefix as u8)
                .map_err(|e| anyhow::anyhow!("Invalid subnet {address}/{prefix}: {e}"))?;
            plans.push(SubnetPlan {
                role: *role,
                zone: zone_name(region, zone)
                    .ok_or_else(|| anyhow::anyhow!("No zone letter for index {zone}"))?,
                cidr: cidr.to_string(),
                route_table: role.to_string(),
            });
        }
    }
    Ok(plans)
}

pub fn next_ip(network_cidr: Ipv4Cidr, used_ips: &[String]) -> Result<String> {
    network_cidr
        .iter()
        .addresses()
        .find(|ip| {
            *ip != network_cidr.first().address() && // network address
            *ip != network_cidr.last().address() && // broadcast address
            !used_ips.contains(&ip.to_string())
        })
        .ok_or(anyhow::anyhow!(
            "No available IP addresses in CIDR {network_cidr}"
        ))
        .map(|ip| ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn splits_sixteen_into_four_quarters() {
        let layout = subnet_layout(
            "10.0.0.0/16".parse().unwrap(),
            &[SubnetRole::Public, SubnetRole::Private],
            2,
            "local-1",
        )
        .unwrap();
        let cidrs: Vec<_> = layout.iter().map(|s| s.cidr.as_str()).collect();
        assert_eq!(
            cidrs,
            vec!["10.0.0.0/18", "10.0.64.0/18", "10.0.128.0/18", "10.0.192.0/18"]
        );
        assert_eq!(layout[1].zone, "local-1b");
        assert_eq!(layout[2].route_table, "private");
    }

    #[test]
    fn zone_count_is_capped_at_the_alphabet() {
        let roles = [SubnetRole::Public, SubnetRole::Private];
        let err = subnet_layout("10.0.0.0/8".parse().unwrap(), &roles, 160, "local-1").unwrap_err();
        assert!(err.to_string().contains("at most 26"));

        let layout = subnet_layout("10.0.0.0/8".parse().unwrap(), &roles, 26, "local-1").unwrap();
        assert_eq!(layout[25].zone, "local-1z");
    }

    #[test]
    fn three_subnets_round_up_to_four_slots() {
        let layout =
            subnet_layout("10.1.0.0/24".parse().unwrap(), &[SubnetRole::Private], 3, "r").unwrap();
        assert_eq!(layout.len(), 3);
        assert_eq!(layout[2].cidr, "10.1.0.128/26");
    }

    #[test]
    fn refuses_subnets_smaller_than_minimum() {
        let err = subnet_layout(
            "10.0.0.0/28".parse().unwrap(),
            &[SubnetRole::Public, SubnetRole::Private],
            1,
            "r",
        )
        .unwrap_err();
        assert!(err.to_string().contains("too small"));
    }

    #[test]
    fn next_ip_skips_network_address_and_used() {
        let cidr: Ipv4Cidr = "10.0.0.0/30".parse().unwrap();
        assert_eq!(next_ip(cidr, &[]).unwrap(), "10.0.0.1");
        assert_eq!(next_ip(cidr, &["10.0.0.1".to_string()]).unwrap(), "10.0.0.2");
        assert!(next_ip(cidr, &["10.0.0.1".to_string(), "10.0.0.2".to_string()]).is_err());
    }
}
