// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Interface selection and the shared datagram socket.
//!
//! Discovery owns this socket and Messaging borrows it: both subsystems
//! hold an `Arc` to the same bound [`std::net::UdpSocket`], and the
//! receive loop (owned by Messaging) is its sole reader.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use socket2::{Domain, Socket, Type};

use crate::error::{Error, Result};

#[cfg(unix)]
mod netmask {
    use std::net::Ipv4Addr;

    /// Look up the netmask bound to `target` via `getifaddrs`, the same
    /// source the mobility detector uses for its own address scan.
    pub fn for_addr(target: Ipv4Addr) -> Option<Ipv4Addr> {
        let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();
        // SAFETY: `ifaddrs` is a valid pointer to a null pointer; getifaddrs
        // populates it with a linked list that must be freed with
        // freeifaddrs, done below before every return path.
        if unsafe { libc::getifaddrs(&mut ifaddrs) } != 0 {
            return None;
        }

        let mut found = None;
        let mut ifa = ifaddrs;
        while !ifa.is_null() {
            // SAFETY: `ifa` is non-null per the loop condition and comes
            // from getifaddrs, valid until freeifaddrs is called below.
            let entry = unsafe { &*ifa };
            if !entry.ifa_addr.is_null() && !entry.ifa_netmask.is_null() {
                // SAFETY: sa_family is read-only and both pointers are
                // non-null, checked just above.
                let family = unsafe { (*entry.ifa_addr).sa_family as i32 };
                if family == libc::AF_INET {
                    // SAFETY: family == AF_INET guarantees sockaddr_in layout.
                    let addr_in = unsafe { *(entry.ifa_addr as *const libc::sockaddr_in) };
                    let ip = Ipv4Addr::from(u32::from_be(addr_in.sin_addr.s_addr));
                    if ip == target {
                        // SAFETY: same as above, for the netmask pointer.
                        let mask_in = unsafe { *(entry.ifa_netmask as *const libc::sockaddr_in) };
                        found = Some(Ipv4Addr::from(u32::from_be(mask_in.sin_addr.s_addr)));
                        break;
                    }
                }
            }
            ifa = entry.ifa_next;
        }

        // SAFETY: `ifaddrs` is the pointer populated by getifaddrs above and
        // has not been freed yet.
        unsafe { libc::freeifaddrs(ifaddrs) };
        found
    }
}

#[cfg(not(unix))]
mod netmask {
    use std::net::Ipv4Addr;

    pub fn for_addr(_target: Ipv4Addr) -> Option<Ipv4Addr> {
        None
    }
}

/// The local address chosen for binding, plus the broadcast address
/// derived from it, plus the full set of local addresses (used for
/// self-filtering).
#[derive(Debug, Clone)]
pub struct LocalInterface {
    pub address: Ipv4Addr,
    pub broadcast: Ipv4Addr,
    pub all_local_addrs: Vec<IpAddr>,
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    ip.is_private()
}

/// Select one local IPv4 address to bind to, preferring a common private
/// range, then any non-loopback address, then loopback. `override_addr`
/// is [`crate::config::RuntimeConfig::bind_addr_override`], checked
/// before interface auto-detection.
pub fn select_interface(override_addr: Option<&str>) -> LocalInterface {
    let candidates = local_candidates(override_addr);
    let chosen = candidates
        .iter()
        .copied()
        .find(|ip| is_private_v4(*ip) && !ip.is_loopback())
        .or_else(|| candidates.iter().copied().find(|ip| !ip.is_loopback()))
        .unwrap_or(Ipv4Addr::LOCALHOST);

    let broadcast = if chosen.is_loopback() {
        Ipv4Addr::BROADCAST
    } else {
        broadcast_for(chosen)
    };

    // `all_local_addrs` backs the peer table's self-filter, which must
    // reject a record for *any* local address, not just the one chosen
    // for binding — so it always carries the full interface list,
    // regardless of whether an override narrowed `chosen`.
    let mut all_local_addrs: Vec<IpAddr> = all_interface_addrs().into_iter().map(IpAddr::V4).collect();
    all_local_addrs.push(IpAddr::V4(chosen));
    all_local_addrs.push(IpAddr::V4(Ipv4Addr::LOCALHOST));
    all_local_addrs.dedup();

    LocalInterface {
        address: chosen,
        broadcast,
        all_local_addrs,
    }
}

fn local_candidates(override_addr: Option<&str>) -> Vec<Ipv4Addr> {
    if let Some(override_ip) = override_addr {
        if let Ok(ip) = override_ip.parse::<Ipv4Addr>() {
            return vec![ip];
        }
        log::warn!("{}={override_ip:?} is not a valid IPv4 address, ignoring", crate::config::ENV_BIND_ADDR);
    }
    let addrs = all_interface_addrs();
    if addrs.is_empty() {
        log::debug!("no local IPv4 address resolved, falling back to loopback");
        vec![Ipv4Addr::LOCALHOST]
    } else {
        addrs
    }
}

/// Enumerate every non-loopback IPv4 address bound to a local interface,
/// the way `get_multicast_interfaces_crate` does for multicast interface
/// discovery: one address is not enough to populate a self-filter set on
/// a multi-homed host.
fn all_interface_addrs() -> Vec<Ipv4Addr> {
    match local_ip_address::list_afinet_netifas() {
        Ok(ifs) => ifs
            .into_iter()
            .filter_map(|(_name, ip)| match ip {
                IpAddr::V4(v4) if !v4.is_loopback() => Some(v4),
                _ => None,
            })
            .collect(),
        Err(e) => {
            log::debug!("failed to list network interfaces: {e}");
            Vec::new()
        }
    }
}

/// Compute the broadcast address for `ip` from its real interface
/// netmask (`ip | !netmask`) when `getifaddrs` can resolve one. Falls
/// back to the common /24 convention for private ranges, and finally to
/// the limited broadcast address, for platforms or addresses the lookup
/// can't resolve (non-Unix, or an address not currently bound to any
/// interface, e.g. in tests).
fn broadcast_for(ip: Ipv4Addr) -> Ipv4Addr {
    if let Some(mask) = netmask::for_addr(ip) {
        let ip_bits = u32::from(ip);
        let mask_bits = u32::from(mask);
        return Ipv4Addr::from(ip_bits | !mask_bits);
    }
    let octets = ip.octets();
    if is_private_v4(ip) {
        Ipv4Addr::new(octets[0], octets[1], octets[2], 255)
    } else {
        Ipv4Addr::BROADCAST
    }
}

/// Bind the shared datagram socket, with address-reuse and broadcast
/// permission set, falling back to `0.0.0.0` if the preferred address is
/// unavailable.
pub fn bind_datagram_socket(preferred: Ipv4Addr, port: u16) -> Result<UdpSocket> {
    match try_bind(IpAddr::V4(preferred), port) {
        Ok(sock) => Ok(sock),
        Err(e) => {
            log::warn!("bind to {preferred}:{port} failed ({e}), falling back to 0.0.0.0");
            try_bind(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
                .map_err(|e| Error::Config(format!("could not bind datagram socket: {e}")))
        }
    }
}

fn try_bind(addr: IpAddr, port: u16) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    let bind_addr: SocketAddr = SocketAddr::new(addr, port);
    socket.bind(&bind_addr.into())?;
    Ok(socket.into())
}

/// Bind the TCP listener used for file streams.
pub fn bind_stream_listener(preferred: Ipv4Addr, port: u16) -> Result<std::net::TcpListener> {
    let bind_addr = SocketAddr::new(IpAddr::V4(preferred), port);
    std::net::TcpListener::bind(bind_addr)
        .or_else(|_| std::net::TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)))
        .map_err(|e| Error::Config(format!("could not bind stream listener: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_for_private_is_dot_255() {
        let b = broadcast_for(Ipv4Addr::new(192, 168, 1, 42));
        assert_eq!(b, Ipv4Addr::new(192, 168, 1, 255));
    }

    #[test]
    fn select_interface_always_returns_something() {
        let iface = select_interface(None);
        assert!(!iface.all_local_addrs.is_empty());
    }

    #[test]
    fn select_interface_honors_override() {
        let iface = select_interface(Some("192.168.77.5"));
        assert_eq!(iface.address, Ipv4Addr::new(192, 168, 77, 5));
    }

    #[test]
    fn select_interface_self_filter_is_not_limited_to_chosen_address() {
        // Even with a bind override narrowing `address` to one IP, the
        // self-filter set must still carry every other local interface
        // address so a multi-homed host never admits its own traffic
        // arriving via a different NIC.
        let iface = select_interface(Some("10.99.0.1"));
        assert!(iface.all_local_addrs.contains(&IpAddr::V4(Ipv4Addr::new(10, 99, 0, 1))));
        assert!(iface.all_local_addrs.contains(&IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }
}
