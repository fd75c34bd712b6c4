use std::net::{IpAddr, SocketAddr};
#[cfg(test)] use mockall::automock;
use tracing::{debug, info};

/// This node's view of its own external address. Knowing whether an address belongs to this
///  node (e.g. through NAT or a loopback alias) is up to the implementation.
#[cfg_attr(test, automock)]
pub trait AddressResolver: Send + Sync + 'static {
    fn current_address(&self) -> Option<IpAddr>;

    /// true if `addr` is another address of this node, so the peer at `addr` would report
    ///  our own address back to us
    fn is_local_duplicate(&self, addr: IpAddr) -> bool;

    fn set_external_address(&self, addr: IpAddr);
}

/// true for addresses that can be used to reach a node from the public internet
pub fn is_routable(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(a) => !(a.is_unspecified()
            || a.is_private()
            || a.is_loopback()
            || a.is_link_local()
            || a.is_multicast()
            || a.is_broadcast()
            || a.is_documentation()),
        IpAddr::V6(a) => {
            let first_segment = a.segments()[0];
            !(a.is_unspecified()
                || a.is_loopback()
                || a.is_multicast()
                || (first_segment & 0xfe00) == 0xfc00  // unique local
                || (first_segment & 0xffc0) == 0xfe80) // link local
        }
    }
}

/// Applies the address a peer reported for us in its handshake. Returns true if our external
///  address was changed.
pub fn update_address(resolver: &dyn AddressResolver, remote: SocketAddr, reported: Option<IpAddr>) -> bool {
    let Some(reported) = reported else {
        return false;
    };

    if !is_routable(reported) {
        debug!("ignoring non-routable address {:?} reported by {:?}", reported, remote);
        return false;
    }
    if resolver.current_address() == Some(reported) {
        return false;
    }
    if resolver.is_local_duplicate(remote.ip()) {
        debug!("{:?} is a local duplicate - not trusting the address it reports", remote);
        return false;
    }

    info!("updating external address to {:?} as reported by {:?}", reported, remote);
    resolver.set_external_address(reported);
    true
}
