//! UDP: stateless send, up to 8 callback-registered listeners.
//!
//! There is no per-socket receive queue -- a listener registers a plain
//! function pointer keyed by local port, and [`process_packet`] invokes it
//! directly from the polling context. This is the shape the DNS resolver
//! needs and nothing more elaborate.

use alloc::vec::Vec;

use spin::Mutex;

use super::{ip, Ipv4Address, SocketAddr};
use crate::error::KernelError;

#[derive(Debug, Clone, Copy)]
pub struct UdpHeader {
    pub source_port: u16,
    pub dest_port: u16,
    pub length: u16,
    pub checksum: u16,
}

impl UdpHeader {
    pub const SIZE: usize = 8;

    pub fn new(src_port: u16, dst_port: u16, data_len: usize) -> Self {
        Self {
            source_port: src_port,
            dest_port: dst_port,
            length: (Self::SIZE + data_len) as u16,
            checksum: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        bytes[0..2].copy_from_slice(&self.source_port.to_be_bytes());
        bytes[2..4].copy_from_slice(&self.dest_port.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.length.to_be_bytes());
        bytes[6..8].copy_from_slice(&self.checksum.to_be_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KernelError> {
        if bytes.len() < Self::SIZE {
            return Err(KernelError::InvalidArgument {
                name: "udp_header",
                value: "too_short",
            });
        }
        Ok(Self {
            source_port: u16::from_be_bytes([bytes[0], bytes[1]]),
            dest_port: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            checksum: u16::from_be_bytes([bytes[6], bytes[7]]),
        })
    }
}

/// Invoked with `(source ip, source port, destination port, payload)`.
pub type UdpCallback = fn(Ipv4Address, u16, u16, &[u8]);

struct Listener {
    port: u16,
    callback: UdpCallback,
}

const MAX_LISTENERS: usize = 8;
static LISTENERS: Mutex<[Option<Listener>; MAX_LISTENERS]> = Mutex::new([None, None, None, None, None, None, None, None]);

/// Register a callback for datagrams addressed to `port`.
pub fn listen(port: u16, callback: UdpCallback) -> Result<(), KernelError> {
    let mut listeners = LISTENERS.lock();
    if listeners.iter().flatten().any(|l| l.port == port) {
        return Err(KernelError::InvalidState {
            expected: "unbound port",
            actual: "already bound",
        });
    }
    match listeners.iter_mut().find(|slot| slot.is_none()) {
        Some(slot) => {
            *slot = Some(Listener { port, callback });
            Ok(())
        }
        None => Err(KernelError::ResourceExhausted { resource: "udp_listeners" }),
    }
}

pub fn unlisten(port: u16) {
    let mut listeners = LISTENERS.lock();
    for slot in listeners.iter_mut() {
        if slot.as_ref().is_some_and(|l| l.port == port) {
            *slot = None;
        }
    }
}

/// Handle a received IPv4 packet whose protocol is UDP.
pub fn process_packet(src: Ipv4Address, dst: Ipv4Address, data: &[u8]) -> Result<(), KernelError> {
    if data.len() < UdpHeader::SIZE {
        return Err(KernelError::InvalidArgument {
            name: "udp_packet",
            value: "too_short",
        });
    }

    let header = UdpHeader::from_bytes(data)?;
    if data.len() < header.length as usize {
        return Err(KernelError::InvalidArgument {
            name: "udp_length",
            value: "mismatch",
        });
    }
    let _ = dst;
    let payload = &data[UdpHeader::SIZE..header.length as usize];

    let listeners = LISTENERS.lock();
    if let Some(listener) = listeners.iter().flatten().find(|l| l.port == header.dest_port) {
        (listener.callback)(src, header.source_port, header.dest_port, payload);
    }
    Ok(())
}

/// Build and transmit a UDP datagram. Checksum is left zeroed, per the
/// wire-protocol contract -- it is optional for IPv4 UDP and this stack
/// doesn't bother.
pub fn send(src_port: u16, dest: SocketAddr, data: &[u8]) -> Result<usize, KernelError> {
    let header = UdpHeader::new(src_port, dest.port, data.len());
    let mut packet = Vec::with_capacity(UdpHeader::SIZE + data.len());
    packet.extend_from_slice(&header.to_bytes());
    packet.extend_from_slice(data);

    ip::send(dest.ip, ip::IpProtocol::Udp, &packet)?;
    Ok(data.len())
}

pub fn init() {
    crate::println!("[UDP] ready, {} listener slots", MAX_LISTENERS);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = UdpHeader::new(1234, 5678, 50);
        let bytes = header.to_bytes();
        let parsed = UdpHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.source_port, 1234);
        assert_eq!(parsed.dest_port, 5678);
        assert_eq!(parsed.length, 58);
    }

    #[test]
    fn listen_rejects_duplicate_port() {
        unlisten(9999);
        fn cb(_: Ipv4Address, _: u16, _: u16, _: &[u8]) {}
        listen(9999, cb).unwrap();
        assert!(listen(9999, cb).is_err());
        unlisten(9999);
    }

    #[test]
    fn listen_fills_all_eight_slots() {
        fn cb(_: Ipv4Address, _: u16, _: u16, _: &[u8]) {}
        for p in 20000..20008u16 {
            unlisten(p);
        }
        for p in 20000..20008u16 {
            listen(p, cb).unwrap();
        }
        assert!(listen(20100, cb).is_err());
        for p in 20000..20008u16 {
            unlisten(p);
        }
    }
}
