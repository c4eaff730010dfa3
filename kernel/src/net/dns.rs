//! Minimal DNS resolver: A-record queries over UDP, RFC 1035 subset.
//!
//! Supports label encoding/decoding including compression pointers in
//! responses (every resolver in the wild uses them, including QEMU's
//! built-in nameserver at [`super::DNS_SERVER_IP`]).

use alloc::{string::String, vec::Vec};
use core::sync::atomic::{AtomicU16, Ordering};

use spin::Mutex;

use super::{udp, Ipv4Address, SocketAddr};
use crate::error::KernelError;

const DNS_PORT: u16 = 53;
const CLIENT_PORT: u16 = 53000;
const QTYPE_A: u16 = 1;
const QCLASS_IN: u16 = 1;
const HEADER_SIZE: usize = 12;
const MAX_POINTER_JUMPS: u8 = 5;

/// Encode a dotted hostname as DNS labels, terminated by a zero-length
/// label.
fn encode_qname(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + 2);
    for label in name.split('.') {
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    out
}

/// Decode a name starting at `start`, following compression pointers.
/// Returns the decoded name and the offset just past the name *as it
/// appears at `start`* (i.e. past the first pointer, not its target).
fn parse_name(buf: &[u8], start: usize) -> Result<(String, usize), KernelError> {
    let mut labels: Vec<&str> = Vec::new();
    let mut pos = start;
    let mut end_of_name_in_place = None;
    let mut jumps = 0u8;

    loop {
        if pos >= buf.len() {
            return Err(KernelError::InvalidArgument {
                name: "dns_name",
                value: "truncated",
            });
        }
        let len = buf[pos];
        if len == 0 {
            if end_of_name_in_place.is_none() {
                end_of_name_in_place = Some(pos + 1);
            }
            break;
        }
        if len & 0xc0 == 0xc0 {
            if pos + 1 >= buf.len() {
                return Err(KernelError::InvalidArgument {
                    name: "dns_name",
                    value: "truncated_pointer",
                });
            }
            if end_of_name_in_place.is_none() {
                end_of_name_in_place = Some(pos + 2);
            }
            jumps += 1;
            if jumps > MAX_POINTER_JUMPS {
                return Err(KernelError::InvalidArgument {
                    name: "dns_name",
                    value: "pointer_loop",
                });
            }
            pos = (((len & 0x3f) as usize) << 8) | buf[pos + 1] as usize;
            continue;
        }
        let len = len as usize;
        let label_start = pos + 1;
        if label_start + len > buf.len() {
            return Err(KernelError::InvalidArgument {
                name: "dns_name",
                value: "label_overrun",
            });
        }
        let label = core::str::from_utf8(&buf[label_start..label_start + len]).map_err(|_| KernelError::InvalidArgument {
            name: "dns_name",
            value: "non_utf8_label",
        })?;
        labels.push(label);
        pos = label_start + len;
    }

    Ok((labels.join("."), end_of_name_in_place.unwrap()))
}

fn build_query(id: u16, hostname: &str) -> Vec<u8> {
    let mut pkt = Vec::with_capacity(HEADER_SIZE + hostname.len() + 8);
    pkt.extend_from_slice(&id.to_be_bytes());
    pkt.extend_from_slice(&0x0100u16.to_be_bytes()); // flags: recursion desired
    pkt.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    pkt.extend_from_slice(&0u16.to_be_bytes()); // ancount
    pkt.extend_from_slice(&0u16.to_be_bytes()); // nscount
    pkt.extend_from_slice(&0u16.to_be_bytes()); // arcount
    pkt.extend_from_slice(&encode_qname(hostname));
    pkt.extend_from_slice(&QTYPE_A.to_be_bytes());
    pkt.extend_from_slice(&QCLASS_IN.to_be_bytes());
    pkt
}

/// Parse a response message, returning its transaction id and the first
/// A-record answer found.
fn parse_response(data: &[u8]) -> Result<(u16, Ipv4Address), KernelError> {
    if data.len() < HEADER_SIZE {
        return Err(KernelError::InvalidArgument {
            name: "dns_response",
            value: "too_short",
        });
    }
    let id = u16::from_be_bytes([data[0], data[1]]);
    let qdcount = u16::from_be_bytes([data[4], data[5]]) as usize;
    let ancount = u16::from_be_bytes([data[6], data[7]]) as usize;

    let mut pos = HEADER_SIZE;
    for _ in 0..qdcount {
        let (_, next) = parse_name(data, pos)?;
        pos = next + 4; // qtype + qclass
    }

    for _ in 0..ancount {
        let (_, next) = parse_name(data, pos)?;
        pos = next;
        if pos + 10 > data.len() {
            return Err(KernelError::InvalidArgument {
                name: "dns_response",
                value: "truncated_rr",
            });
        }
        let rtype = u16::from_be_bytes([data[pos], data[pos + 1]]);
        let rdlength = u16::from_be_bytes([data[pos + 8], data[pos + 9]]) as usize;
        let rdata_start = pos + 10;
        if rdata_start + rdlength > data.len() {
            return Err(KernelError::InvalidArgument {
                name: "dns_response",
                value: "truncated_rdata",
            });
        }
        if rtype == QTYPE_A && rdlength == 4 {
            let rdata = &data[rdata_start..rdata_start + 4];
            return Ok((id, Ipv4Address([rdata[0], rdata[1], rdata[2], rdata[3]])));
        }
        pos = rdata_start + rdlength;
    }

    Err(KernelError::InvalidArgument {
        name: "dns_response",
        value: "no_a_record",
    })
}

static PENDING_ANSWER: Mutex<Option<(u16, Ipv4Address)>> = Mutex::new(None);

fn on_datagram(_src_ip: Ipv4Address, _src_port: u16, _dst_port: u16, payload: &[u8]) {
    if let Ok(answer) = parse_response(payload) {
        *PENDING_ANSWER.lock() = Some(answer);
    }
}

fn ticks_ms() -> u64 {
    crate::arch::aarch64::timer::get_ticks() * crate::arch::aarch64::timer::TICK_INTERVAL_MS as u64
}

/// Resolve `hostname` to an IPv4 address, querying [`super::DNS_SERVER_IP`]
/// and polling the network stack until a matching answer arrives or
/// `timeout_ms` elapses.
pub fn resolve(hostname: &str, timeout_ms: u64) -> Result<Ipv4Address, KernelError> {
    static QUERY_ID: AtomicU16 = AtomicU16::new(1);
    let id = QUERY_ID.fetch_add(1, Ordering::Relaxed);

    udp::unlisten(CLIENT_PORT);
    udp::listen(CLIENT_PORT, on_datagram)?;
    *PENDING_ANSWER.lock() = None;

    let query = build_query(id, hostname);
    let dest = SocketAddr::new(super::DNS_SERVER_IP, DNS_PORT);
    let deadline = ticks_ms() + timeout_ms;

    loop {
        match udp::send(CLIENT_PORT, dest, &query) {
            Ok(_) => break,
            Err(KernelError::WouldBlock) => {
                super::poll();
                if ticks_ms() >= deadline {
                    udp::unlisten(CLIENT_PORT);
                    return Err(KernelError::Timeout {
                        operation: "dns_query_arp",
                        duration_ms: timeout_ms,
                    });
                }
            }
            Err(e) => {
                udp::unlisten(CLIENT_PORT);
                return Err(e);
            }
        }
    }

    loop {
        super::poll();
        if let Some((resp_id, ip)) = *PENDING_ANSWER.lock() {
            if resp_id == id {
                udp::unlisten(CLIENT_PORT);
                return Ok(ip);
            }
        }
        if ticks_ms() >= deadline {
            udp::unlisten(CLIENT_PORT);
            return Err(KernelError::Timeout {
                operation: "dns_query",
                duration_ms: timeout_ms,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qname_encoding() {
        let enc = encode_qname("a.example.com");
        assert_eq!(enc[0], 1);
        assert_eq!(&enc[1..2], b"a");
        assert_eq!(enc[2], 7);
        assert_eq!(&enc[3..10], b"example");
        assert_eq!(enc[10], 3);
        assert_eq!(&enc[11..14], b"com");
        assert_eq!(*enc.last().unwrap(), 0);
    }

    #[test]
    fn name_round_trip_without_compression() {
        let enc = encode_qname("host.local");
        let (name, next) = parse_name(&enc, 0).unwrap();
        assert_eq!(name, "host.local");
        assert_eq!(next, enc.len());
    }

    #[test]
    fn name_decode_follows_compression_pointer() {
        // Message: [offset 0] "example.com" name, then at some later offset
        // a pointer back to offset 0.
        let mut buf = encode_qname("example.com");
        let base = buf.len() as u16;
        let pointer_offset = buf.len();
        buf.push(0xc0);
        buf.push(0x00); // pointer to offset 0
        let (name, next) = parse_name(&buf, pointer_offset).unwrap();
        assert_eq!(name, "example.com");
        assert_eq!(next, pointer_offset + 2);
        assert!(base as usize <= buf.len());
    }

    #[test]
    fn parse_response_extracts_a_record() {
        let id = 0xabcd;
        let mut msg = Vec::new();
        msg.extend_from_slice(&id.to_be_bytes());
        msg.extend_from_slice(&0x8180u16.to_be_bytes());
        msg.extend_from_slice(&1u16.to_be_bytes()); // qdcount
        msg.extend_from_slice(&1u16.to_be_bytes()); // ancount
        msg.extend_from_slice(&0u16.to_be_bytes());
        msg.extend_from_slice(&0u16.to_be_bytes());
        msg.extend_from_slice(&encode_qname("host.local"));
        msg.extend_from_slice(&QTYPE_A.to_be_bytes());
        msg.extend_from_slice(&QCLASS_IN.to_be_bytes());
        // Answer: pointer back to the question's name at offset 12.
        msg.push(0xc0);
        msg.push(0x0c);
        msg.extend_from_slice(&QTYPE_A.to_be_bytes());
        msg.extend_from_slice(&QCLASS_IN.to_be_bytes());
        msg.extend_from_slice(&300u32.to_be_bytes()); // ttl
        msg.extend_from_slice(&4u16.to_be_bytes()); // rdlength
        msg.extend_from_slice(&[10, 0, 2, 200]);

        let (resp_id, ip) = parse_response(&msg).unwrap();
        assert_eq!(resp_id, id);
        assert_eq!(ip, Ipv4Address::new(10, 0, 2, 200));
    }
}
