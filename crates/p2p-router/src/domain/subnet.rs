//! Subnet grouping for per-subnet connection limits.

use std::net::IpAddr;

/// Subnet key for grouping peers.
/// Stores /16 for IPv4 and /32 for IPv6.
///
/// # Security (Anti-Eclipse)
/// An attacker controlling one address range cannot fill every slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubnetKey([u8; 4]);

impl SubnetKey {
    /// Extract the subnet key of an address.
    pub fn from_ip(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => {
                let o = v4.octets();
                SubnetKey([o[0], o[1], 0, 0])
            }
            IpAddr::V6(v6) => {
                // IPv4-mapped addresses group with their IPv4 form
                if let Some(v4) = v6.to_ipv4_mapped() {
                    return Self::from_ip(&IpAddr::V4(v4));
                }
                let o = v6.octets();
                SubnetKey([o[0], o[1], o[2], o[3]])
            }
        }
    }
}
