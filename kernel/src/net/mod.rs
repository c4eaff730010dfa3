//! Network stack: Ethernet, ARP, IPv4, ICMP, UDP, TCP, and a minimal DNS
//! resolver, running entirely on the single virtio-net device in
//! [`crate::drivers::virtio::net`].
//!
//! There is no interrupt-driven receive path for data: the virtio-net IRQ
//! handler only acknowledges the interrupt, and [`poll`] -- called from the
//! idle loop and from every blocking network primitive's wait loop -- drains
//! the RX ring and dispatches each frame through [`ethernet::dispatch_frame`].
//! IP configuration is static, matching QEMU's user-mode networking defaults.

pub mod arp;
pub mod dns;
pub mod ethernet;
pub mod icmp;
pub mod ip;
pub mod tcp;
pub mod udp;

use spin::Mutex;

use crate::error::KernelError;

/// Our statically configured interface address, `10.0.2.15/24`.
pub const OUR_IP: Ipv4Address = Ipv4Address([10, 0, 2, 15]);
/// Subnet mask for [`OUR_IP`] -- a fixed `/24`.
pub const OUR_NETMASK: Ipv4Address = Ipv4Address([255, 255, 255, 0]);
/// Default gateway, used as next-hop for any off-subnet destination.
pub const GATEWAY_IP: Ipv4Address = Ipv4Address([10, 0, 2, 2]);
/// DNS resolver, QEMU user-mode's built-in nameserver.
pub const DNS_SERVER_IP: Ipv4Address = Ipv4Address([10, 0, 2, 3]);

/// Ethernet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);
    pub const ZERO: MacAddress = MacAddress([0; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

/// IPv4 address, stored in network (big-endian) byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ipv4Address(pub [u8; 4]);

impl Ipv4Address {
    pub const LOCALHOST: Ipv4Address = Ipv4Address([127, 0, 0, 1]);
    pub const BROADCAST: Ipv4Address = Ipv4Address([255, 255, 255, 255]);
    pub const UNSPECIFIED: Ipv4Address = Ipv4Address([0, 0, 0, 0]);

    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self([a, b, c, d])
    }

    pub fn from_u32(v: u32) -> Self {
        Self(v.to_be_bytes())
    }

    pub fn to_u32(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    /// True if `self` and `other` share the same network under `mask`.
    pub fn same_subnet(&self, other: &Ipv4Address, mask: &Ipv4Address) -> bool {
        (self.to_u32() & mask.to_u32()) == (other.to_u32() & mask.to_u32())
    }
}

pub type Port = u16;

/// An IPv4 address plus port -- the only socket address shape in this
/// stack, since IPv6 is out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketAddr {
    pub ip: Ipv4Address,
    pub port: Port,
}

impl SocketAddr {
    pub const fn new(ip: Ipv4Address, port: Port) -> Self {
        Self { ip, port }
    }
}

/// Aggregate packet counters, exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub errors: u64,
}

static STATS: Mutex<NetworkStats> = Mutex::new(NetworkStats {
    packets_sent: 0,
    packets_received: 0,
    bytes_sent: 0,
    bytes_received: 0,
    errors: 0,
});

pub fn update_stats_tx(bytes: usize) {
    let mut s = STATS.lock();
    s.packets_sent += 1;
    s.bytes_sent += bytes as u64;
}

pub fn update_stats_rx(bytes: usize) {
    let mut s = STATS.lock();
    s.packets_received += 1;
    s.bytes_received += bytes as u64;
}

pub fn record_error() {
    STATS.lock().errors += 1;
}

pub fn get_stats() -> NetworkStats {
    *STATS.lock()
}

/// Maximum ethernet frame we ever build or parse (header + MTU).
pub const MTU: usize = 1500;

/// MAC address of the virtio-net device, or the zero address if it never
/// probed successfully.
pub(crate) fn interface_mac() -> MacAddress {
    crate::drivers::virtio::net::get_device()
        .map(|dev| MacAddress(dev.lock().mac()))
        .unwrap_or(MacAddress::ZERO)
}

/// Transmit a raw ethernet frame via the virtio-net device. Silently dropped
/// if the device never probed.
pub(crate) fn transmit_frame(frame: &[u8]) {
    if let Some(dev) = crate::drivers::virtio::net::get_device() {
        if dev.lock().send(frame).is_ok() {
            update_stats_tx(frame.len());
        } else {
            record_error();
        }
    }
}

/// Wire up the protocol layers. The virtio-net device itself is brought up
/// earlier by [`crate::drivers::init`].
pub fn init() -> Result<(), KernelError> {
    ip::init();
    tcp::init();
    udp::init();
    crate::println!(
        "[NET] interface up: ip={:?} gateway={:?} dns={:?}",
        OUR_IP,
        GATEWAY_IP,
        DNS_SERVER_IP
    );
    Ok(())
}

/// Drain the virtio-net RX ring and dispatch every frame found. Called from
/// the idle loop and from inside every blocking network primitive's wait
/// loop -- never re-entrantly.
pub fn poll() {
    let Some(dev) = crate::drivers::virtio::net::get_device() else {
        return;
    };
    let mut buf = [0u8; MTU + ethernet::ETHERNET_HEADER_SIZE];
    loop {
        let len = {
            let mut dev = dev.lock();
            match dev.poll_rx(&mut buf) {
                Some(len) => len,
                None => return,
            }
        };
        update_stats_rx(len);
        if let Err(_e) = ethernet::dispatch_frame(&buf[..len]) {
            record_error();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_same_subnet() {
        let a = Ipv4Address::new(10, 0, 2, 15);
        let b = Ipv4Address::new(10, 0, 2, 200);
        let c = Ipv4Address::new(10, 0, 3, 1);
        assert!(a.same_subnet(&b, &OUR_NETMASK));
        assert!(!a.same_subnet(&c, &OUR_NETMASK));
    }

    #[test]
    fn ipv4_round_trip_u32() {
        let ip = Ipv4Address::new(10, 0, 2, 15);
        assert_eq!(Ipv4Address::from_u32(ip.to_u32()), ip);
    }

    #[test]
    fn mac_broadcast() {
        assert!(MacAddress::BROADCAST.is_broadcast());
        assert!(!MacAddress::ZERO.is_broadcast());
    }
}
