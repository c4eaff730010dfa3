//! Ethernet frame parsing and construction.

use alloc::vec::Vec;

use crate::{error::KernelError, net::MacAddress};

/// Ethernet frame header size: dst(6) + src(6) + ethertype(2) = 14 bytes.
pub const ETHERNET_HEADER_SIZE: usize = 14;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

/// Parsed Ethernet frame, borrowing its payload from the original buffer.
#[derive(Debug, Clone)]
pub struct EthernetFrame<'a> {
    pub dst_mac: MacAddress,
    pub src_mac: MacAddress,
    pub ethertype: u16,
    pub payload: &'a [u8],
}

pub fn parse_frame(data: &[u8]) -> Result<EthernetFrame<'_>, KernelError> {
    if data.len() < ETHERNET_HEADER_SIZE {
        return Err(KernelError::InvalidArgument {
            name: "ethernet_frame",
            value: "too_short",
        });
    }

    let mut dst = [0u8; 6];
    let mut src = [0u8; 6];
    dst.copy_from_slice(&data[0..6]);
    src.copy_from_slice(&data[6..12]);
    let ethertype = u16::from_be_bytes([data[12], data[13]]);

    Ok(EthernetFrame {
        dst_mac: MacAddress(dst),
        src_mac: MacAddress(src),
        ethertype,
        payload: &data[ETHERNET_HEADER_SIZE..],
    })
}

pub fn construct_frame(dst: MacAddress, src: MacAddress, ethertype: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ETHERNET_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&dst.0);
    frame.extend_from_slice(&src.0);
    frame.extend_from_slice(&ethertype.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

pub fn is_broadcast(mac: &MacAddress) -> bool {
    *mac == MacAddress::BROADCAST
}

pub fn is_for_us(frame_dst: &MacAddress, our_mac: &MacAddress) -> bool {
    *frame_dst == *our_mac || is_broadcast(frame_dst)
}

/// Route a received Ethernet frame to the appropriate protocol handler,
/// by EtherType and then (for IPv4) by IP protocol number.
pub fn dispatch_frame(data: &[u8]) -> Result<(), KernelError> {
    let frame = parse_frame(data)?;
    let our_mac = super::interface_mac();

    if !is_for_us(&frame.dst_mac, &our_mac) {
        return Ok(());
    }

    match frame.ethertype {
        ETHERTYPE_ARP => {
            super::arp::process_arp_packet(frame.payload)?;
        }
        ETHERTYPE_IPV4 => {
            if frame.payload.len() < super::ip::Ipv4Header::MIN_SIZE {
                return Ok(());
            }
            let ip_header = super::ip::Ipv4Header::from_bytes(frame.payload)?;
            let header_len = (ip_header.ihl as usize) * 4;
            if frame.payload.len() < header_len {
                return Ok(());
            }
            let end = (ip_header.total_length as usize).clamp(header_len, frame.payload.len());
            let ip_payload = &frame.payload[header_len..end];
            let src = ip_header.source;
            let dst = ip_header.destination;

            match ip_header.protocol {
                1 => {
                    let _ = super::icmp::process_packet(src, dst, ip_payload);
                }
                6 => {
                    let _ = super::tcp::process_packet(src, dst, ip_payload);
                }
                17 => {
                    let _ = super::udp::process_packet(src, dst, ip_payload);
                }
                _ => {}
            }
        }
        _ => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construct_and_parse_round_trips() {
        let dst = MacAddress([0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
        let src = MacAddress([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
        let payload = b"Hello, Ethernet!";

        let frame = construct_frame(dst, src, ETHERTYPE_IPV4, payload);
        assert_eq!(frame.len(), ETHERNET_HEADER_SIZE + payload.len());

        let parsed = parse_frame(&frame).unwrap();
        assert_eq!(parsed.dst_mac, dst);
        assert_eq!(parsed.src_mac, src);
        assert_eq!(parsed.ethertype, ETHERTYPE_IPV4);
        assert_eq!(parsed.payload, payload);
    }

    #[test]
    fn parse_too_short_rejected() {
        let short = [0u8; 10];
        assert!(parse_frame(&short).is_err());
    }

    #[test]
    fn broadcast_detection() {
        assert!(is_broadcast(&MacAddress::BROADCAST));
        assert!(!is_broadcast(&MacAddress::ZERO));
    }
}
