//! ARP cache and request/reply handling.
//!
//! The cache is a fixed 16-entry table rather than a growable map -- this
//! kernel never has more than a handful of peers on the QEMU user-mode
//! subnet, and a bounded table means ARP can never allocate. On overflow
//! the oldest entry is not tracked; slot 0 is simply overwritten, a crude
//! but adequate approximation for a network this small.

use alloc::vec::Vec;

use crate::{
    error::KernelError,
    net::{ethernet, Ipv4Address, MacAddress},
};

const ARP_HTYPE_ETHERNET: u16 = 1;
const ARP_PTYPE_IPV4: u16 = 0x0800;
const ARP_OP_REQUEST: u16 = 1;
const ARP_OP_REPLY: u16 = 2;
const ARP_PACKET_SIZE: usize = 28;

const ARP_CACHE_SIZE: usize = 16;

#[derive(Debug, Clone, Copy)]
struct ArpEntry {
    ip: Ipv4Address,
    mac: MacAddress,
}

static ARP_CACHE: spin::Mutex<[Option<ArpEntry>; ARP_CACHE_SIZE]> = spin::Mutex::new([None; ARP_CACHE_SIZE]);

/// Resolve an IPv4 address to a MAC address from the cache.
pub fn resolve(ip: Ipv4Address) -> Option<MacAddress> {
    let cache = ARP_CACHE.lock();
    cache.iter().flatten().find(|e| e.ip == ip).map(|e| e.mac)
}

/// Insert or update a cache entry. Evicts slot 0 if the table is full and
/// `ip` is not already present.
pub fn update_cache(ip: Ipv4Address, mac: MacAddress) {
    let mut cache = ARP_CACHE.lock();

    if let Some(slot) = cache.iter_mut().flatten().find(|e| e.ip == ip) {
        slot.mac = mac;
        return;
    }
    if let Some(empty) = cache.iter_mut().find(|e| e.is_none()) {
        *empty = Some(ArpEntry { ip, mac });
        return;
    }
    cache[0] = Some(ArpEntry { ip, mac });
}

/// Process an incoming ARP packet: learn the sender's mapping, and reply
/// if it's a request targeting our address.
pub fn process_arp_packet(data: &[u8]) -> Result<(), KernelError> {
    if data.len() < ARP_PACKET_SIZE {
        return Err(KernelError::InvalidArgument {
            name: "arp_packet",
            value: "too_short",
        });
    }

    let htype = u16::from_be_bytes([data[0], data[1]]);
    let ptype = u16::from_be_bytes([data[2], data[3]]);
    let hlen = data[4];
    let plen = data[5];
    let operation = u16::from_be_bytes([data[6], data[7]]);

    if htype != ARP_HTYPE_ETHERNET || ptype != ARP_PTYPE_IPV4 || hlen != 6 || plen != 4 {
        return Err(KernelError::InvalidArgument {
            name: "arp_format",
            value: "unsupported",
        });
    }

    let mut sender_mac_bytes = [0u8; 6];
    sender_mac_bytes.copy_from_slice(&data[8..14]);
    let sender_mac = MacAddress(sender_mac_bytes);
    let sender_ip = Ipv4Address([data[14], data[15], data[16], data[17]]);
    let target_ip = Ipv4Address([data[24], data[25], data[26], data[27]]);

    update_cache(sender_ip, sender_mac);

    match operation {
        ARP_OP_REQUEST => {
            if target_ip == super::OUR_IP {
                let our_mac = super::interface_mac();
                let reply = build_arp_reply(our_mac, super::OUR_IP, sender_mac, sender_ip);
                send_arp_frame(&reply, our_mac, sender_mac);
            }
        }
        ARP_OP_REPLY => {}
        _ => {}
    }

    Ok(())
}

/// Broadcast an ARP request for `target_ip`.
pub fn send_arp_request(target_ip: Ipv4Address) {
    let our_mac = super::interface_mac();
    let packet = build_arp_request(our_mac, super::OUR_IP, target_ip);
    send_arp_frame(&packet, our_mac, MacAddress::BROADCAST);
}

fn build_arp_request(sender_mac: MacAddress, sender_ip: Ipv4Address, target_ip: Ipv4Address) -> Vec<u8> {
    let mut pkt = Vec::with_capacity(ARP_PACKET_SIZE);
    pkt.extend_from_slice(&ARP_HTYPE_ETHERNET.to_be_bytes());
    pkt.extend_from_slice(&ARP_PTYPE_IPV4.to_be_bytes());
    pkt.push(6);
    pkt.push(4);
    pkt.extend_from_slice(&ARP_OP_REQUEST.to_be_bytes());
    pkt.extend_from_slice(&sender_mac.0);
    pkt.extend_from_slice(&sender_ip.0);
    pkt.extend_from_slice(&[0u8; 6]);
    pkt.extend_from_slice(&target_ip.0);
    pkt
}

fn build_arp_reply(sender_mac: MacAddress, sender_ip: Ipv4Address, target_mac: MacAddress, target_ip: Ipv4Address) -> Vec<u8> {
    let mut pkt = Vec::with_capacity(ARP_PACKET_SIZE);
    pkt.extend_from_slice(&ARP_HTYPE_ETHERNET.to_be_bytes());
    pkt.extend_from_slice(&ARP_PTYPE_IPV4.to_be_bytes());
    pkt.push(6);
    pkt.push(4);
    pkt.extend_from_slice(&ARP_OP_REPLY.to_be_bytes());
    pkt.extend_from_slice(&sender_mac.0);
    pkt.extend_from_slice(&sender_ip.0);
    pkt.extend_from_slice(&target_mac.0);
    pkt.extend_from_slice(&target_ip.0);
    pkt
}

fn send_arp_frame(arp_data: &[u8], src_mac: MacAddress, dst_mac: MacAddress) {
    let frame = ethernet::construct_frame(dst_mac, src_mac, ethernet::ETHERTYPE_ARP, arp_data);
    super::transmit_frame(&frame);
}

/// Snapshot of the current cache, for diagnostics.
pub fn get_cache_entries() -> Vec<(Ipv4Address, MacAddress)> {
    ARP_CACHE.lock().iter().flatten().map(|e| (e.ip, e.mac)).collect()
}

pub fn flush_cache() {
    let mut cache = ARP_CACHE.lock();
    for slot in cache.iter_mut() {
        *slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_insert_and_resolve() {
        flush_cache();
        let ip = Ipv4Address::new(10, 0, 0, 1);
        let mac = MacAddress([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        update_cache(ip, mac);
        assert_eq!(resolve(ip), Some(mac));
    }

    #[test]
    fn cache_overwrites_slot_zero_when_full() {
        flush_cache();
        for i in 0..ARP_CACHE_SIZE {
            update_cache(Ipv4Address::new(10, 0, 0, i as u8), MacAddress::ZERO);
        }
        let overflow_mac = MacAddress([1, 2, 3, 4, 5, 6]);
        update_cache(Ipv4Address::new(10, 0, 1, 0), overflow_mac);
        assert_eq!(resolve(Ipv4Address::new(10, 0, 1, 0)), Some(overflow_mac));
        assert_eq!(resolve(Ipv4Address::new(10, 0, 0, 0)), None);
    }

    #[test]
    fn request_build_has_request_opcode() {
        let sender_mac = MacAddress([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
        let sender_ip = Ipv4Address::new(10, 0, 2, 15);
        let target_ip = Ipv4Address::new(10, 0, 2, 2);

        let pkt = build_arp_request(sender_mac, sender_ip, target_ip);
        assert_eq!(pkt.len(), ARP_PACKET_SIZE);
        assert_eq!(u16::from_be_bytes([pkt[6], pkt[7]]), ARP_OP_REQUEST);
    }
}
