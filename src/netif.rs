use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};

/// Partial-byte netmasks, indexed by the number of leading bits
const MASK: [u8; 9] = [0x00, 0x80, 0xc0, 0xe0, 0xf0, 0xf8, 0xfc, 0xfe, 0xff];

/// One IPv4 address of a local network interface, with its prefix length
///
/// The node binds one sender socket per `InterfaceInfo` and uses
/// [`InterfaceInfo::matches`] to decide which interfaces take part in a
/// given send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceInfo {
    addr: Ipv4Addr,
    prefix: u8,
}

impl InterfaceInfo {
    /// Describe an interface address with the given CIDR prefix length
    #[must_use]
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Self {
        Self { addr, prefix }
    }

    /// The interface's IPv4 address
    #[must_use]
    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    /// The prefix length of the interface's subnet
    #[must_use]
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Does this interface reach the given address?
    ///
    /// True for any multicast address, and for any IPv4 address inside
    /// the interface's subnet. IPv6 addresses never match.
    #[must_use]
    pub fn matches(&self, other: IpAddr) -> bool {
        let IpAddr::V4(other) = other else {
            return false;
        };
        if other.is_multicast() {
            return true;
        }
        let mine = self.addr.octets();
        let theirs = other.octets();
        let Some(i) = (0..mine.len()).find(|&i| mine[i] != theirs[i]) else {
            return true; // same address
        };
        let prefix = usize::from(self.prefix);
        if 8 * i + 8 < prefix {
            false
        } else if 8 * i >= prefix {
            true
        } else {
            let mask = MASK[prefix - 8 * i];
            (mask & theirs[i]) == (mask & mine[i])
        }
    }
}

/// Snapshot the local interfaces eligible for SSDP
///
/// Eligible means non-loopback, multicast-capable and carrying at least
/// one IPv4 address; one `InterfaceInfo` per IPv4 address, in OS
/// enumeration order.
pub(crate) fn local_interfaces() -> std::io::Result<Vec<InterfaceInfo>> {
    use cotton_netif::{get_interfaces, Flags, NetworkEvent};

    let mut eligible = HashSet::new();
    let mut result = Vec::new();
    for event in get_interfaces()? {
        match event {
            NetworkEvent::NewLink(index, _name, flags) => {
                if flags.contains(Flags::MULTICAST)
                    && !flags.contains(Flags::LOOPBACK)
                {
                    eligible.insert(index);
                }
            }
            NetworkEvent::NewAddr(index, IpAddr::V4(addr), prefix) => {
                if eligible.contains(&index) {
                    result.push(InterfaceInfo::new(addr, prefix));
                }
            }
            _ => {}
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(addr: &str, prefix: u8) -> InterfaceInfo {
        InterfaceInfo::new(addr.parse().unwrap(), prefix)
    }

    fn v4(addr: &str) -> IpAddr {
        IpAddr::V4(addr.parse().unwrap())
    }

    #[test]
    fn own_address_always_matches() {
        let i = iface("192.168.100.1", 24);
        assert!(i.matches(v4("192.168.100.1")));
        assert!(iface("10.0.0.1", 32).matches(v4("10.0.0.1")));
    }

    #[test]
    fn multicast_matches_any_interface() {
        let i = iface("192.168.100.1", 24);
        assert!(i.matches(v4("239.255.255.250")));
        assert!(i.matches(v4("224.0.0.1")));
    }

    #[test]
    fn same_subnet_matches() {
        let i = iface("192.168.100.1", 24);
        assert!(i.matches(v4("192.168.100.60")));
        assert!(!i.matches(v4("192.168.101.60")));
        assert!(!i.matches(v4("10.0.0.1")));
    }

    #[test]
    fn mid_byte_prefix() {
        // /20 splits the third octet: 10.1.16.0 .. 10.1.31.255
        let i = iface("10.1.16.1", 20);
        assert!(i.matches(v4("10.1.31.200")));
        assert!(i.matches(v4("10.1.16.0")));
        assert!(!i.matches(v4("10.1.32.1")));
        assert!(!i.matches(v4("10.1.15.255")));
    }

    #[test]
    fn wide_prefix() {
        let i = iface("10.1.2.3", 8);
        assert!(i.matches(v4("10.200.1.1")));
        assert!(!i.matches(v4("11.1.2.3")));
    }

    #[test]
    fn boundary_prefix_is_exact() {
        // differing octet lies entirely inside a /16
        let i = iface("172.16.1.1", 16);
        assert!(i.matches(v4("172.16.255.1")));
        assert!(!i.matches(v4("172.17.1.1")));
    }

    #[test]
    fn ipv6_never_matches() {
        let i = iface("192.168.100.1", 24);
        assert!(!i.matches("::1".parse().unwrap()));
    }
}
