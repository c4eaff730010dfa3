//! ICMPv4 echo request/reply (ping).
//!
//! Two roles: responder (someone pings us, we reply) and requester (we
//! ping someone via [`ping`], polling until a matching reply arrives or
//! the deadline passes).

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use super::{ip, Ipv4Address};
use crate::error::KernelError;

const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_ECHO_REPLY: u8 = 0;
const ICMP_HEADER_SIZE: usize = 8;

/// 16-bit ones-complement checksum over `data`, as used by IP and ICMP.
fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

fn build_echo(kind: u8, identifier: u16, sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut pkt = Vec::with_capacity(ICMP_HEADER_SIZE + payload.len());
    pkt.push(kind);
    pkt.push(0); // code
    pkt.extend_from_slice(&[0, 0]); // checksum placeholder
    pkt.extend_from_slice(&identifier.to_be_bytes());
    pkt.extend_from_slice(&sequence.to_be_bytes());
    pkt.extend_from_slice(payload);

    let cksum = checksum(&pkt);
    pkt[2..4].copy_from_slice(&cksum.to_be_bytes());
    pkt
}

/// State of the single outstanding ping this kernel supports at a time.
static PING_PENDING: AtomicBool = AtomicBool::new(false);
static PING_ID: AtomicU16 = AtomicU16::new(0);
static PING_SEQ: AtomicU16 = AtomicU16::new(0);
static PING_REPLIED: AtomicBool = AtomicBool::new(false);

/// Handle a received IPv4 packet whose protocol is ICMP.
pub fn process_packet(_src: Ipv4Address, _dst: Ipv4Address, data: &[u8]) -> Result<(), KernelError> {
    if data.len() < ICMP_HEADER_SIZE {
        return Err(KernelError::InvalidArgument {
            name: "icmp_packet",
            value: "too_short",
        });
    }

    let kind = data[0];
    let identifier = u16::from_be_bytes([data[4], data[5]]);
    let sequence = u16::from_be_bytes([data[6], data[7]]);
    let payload = &data[ICMP_HEADER_SIZE..];

    match kind {
        ICMP_ECHO_REQUEST => {
            let reply = build_echo(ICMP_ECHO_REPLY, identifier, sequence, payload);
            let _ = ip::send(_src, ip::IpProtocol::Icmp, &reply);
        }
        ICMP_ECHO_REPLY => {
            if PING_PENDING.load(Ordering::Acquire)
                && PING_ID.load(Ordering::Acquire) == identifier
                && PING_SEQ.load(Ordering::Acquire) == sequence
            {
                PING_REPLIED.store(true, Ordering::Release);
            }
        }
        _ => {}
    }

    Ok(())
}

/// Ping `dest` with the given identifier/sequence/payload, polling the
/// network stack until a matching echo reply arrives or `timeout_ms`
/// elapses. Returns `Ok(())` on a matching reply, `Err` on timeout.
pub fn ping(dest: Ipv4Address, identifier: u16, sequence: u16, payload: &[u8], timeout_ms: u64) -> Result<(), KernelError> {
    PING_ID.store(identifier, Ordering::Release);
    PING_SEQ.store(sequence, Ordering::Release);
    PING_REPLIED.store(false, Ordering::Release);
    PING_PENDING.store(true, Ordering::Release);

    let request = build_echo(ICMP_ECHO_REQUEST, identifier, sequence, payload);

    // The IP layer may return WouldBlock while ARP resolves the next hop;
    // keep polling and retrying until the deadline.
    let deadline = crate::arch::aarch64::timer::get_ticks() * crate::arch::aarch64::timer::TICK_INTERVAL_MS as u64 + timeout_ms;
    loop {
        match ip::send(dest, ip::IpProtocol::Icmp, &request) {
            Ok(()) => break,
            Err(KernelError::WouldBlock) => {
                super::poll();
                if crate::arch::aarch64::timer::get_ticks() * crate::arch::aarch64::timer::TICK_INTERVAL_MS as u64 >= deadline {
                    PING_PENDING.store(false, Ordering::Release);
                    return Err(KernelError::Timeout {
                        operation: "icmp_ping_arp",
                        duration_ms: timeout_ms,
                    });
                }
            }
            Err(e) => {
                PING_PENDING.store(false, Ordering::Release);
                return Err(e);
            }
        }
    }

    while !PING_REPLIED.load(Ordering::Acquire) {
        super::poll();
        if crate::arch::aarch64::timer::get_ticks() * crate::arch::aarch64::timer::TICK_INTERVAL_MS as u64 >= deadline {
            PING_PENDING.store(false, Ordering::Release);
            return Err(KernelError::Timeout {
                operation: "icmp_ping",
                duration_ms: timeout_ms,
            });
        }
    }

    PING_PENDING.store(false, Ordering::Release);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_zeroed_echo_is_self_consistent() {
        let pkt = build_echo(ICMP_ECHO_REQUEST, 0x1234, 1, &[0xab; 56]);
        assert_eq!(checksum(&pkt), 0);
    }

    #[test]
    fn echo_request_header_fields() {
        let pkt = build_echo(ICMP_ECHO_REQUEST, 0x1234, 1, &[0xab; 56]);
        assert_eq!(pkt[0], ICMP_ECHO_REQUEST);
        assert_eq!(u16::from_be_bytes([pkt[4], pkt[5]]), 0x1234);
        assert_eq!(u16::from_be_bytes([pkt[6], pkt[7]]), 1);
        assert_eq!(pkt.len(), ICMP_HEADER_SIZE + 56);
    }
}
