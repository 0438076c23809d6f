//! Small networking probes used for provider address auto-detection and
//! the consumer's `ip` condition.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Best-effort LAN address of this host.
///
/// Opens a UDP socket and "connects" it to a public address; no packet is
/// sent, but the OS picks the outbound interface, whose address we read
/// back.  Returns `None` when the host is offline or only has loopback.
pub fn local_lan_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    if ip.is_loopback() || ip.is_unspecified() {
        None
    } else {
        Some(ip)
    }
}

/// True when this host owns `ip` on a non-loopback interface.
///
/// Binding a socket to a specific address succeeds only when some local
/// interface carries it, which is exactly the question being asked.
pub fn host_owns_ipv4(ip: Ipv4Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return false;
    }
    UdpSocket::bind((ip, 0)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_and_unspecified_are_never_owned() {
        assert!(!host_owns_ipv4(Ipv4Addr::LOCALHOST));
        assert!(!host_owns_ipv4(Ipv4Addr::UNSPECIFIED));
    }

    #[test]
    fn documentation_range_address_is_not_owned() {
        // TEST-NET-1 is reserved; no host interface carries it.
        assert!(!host_owns_ipv4(Ipv4Addr::new(192, 0, 2, 1)));
    }
}
