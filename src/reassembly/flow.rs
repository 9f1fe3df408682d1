//! Flow identification.
//!
//! Both directions of a TCP connection must land on the same reassembly
//! state, so the flow key is computed over the endpoint pair sorted into a
//! canonical order before hashing. The hash itself is FNV-1a; it has to be
//! deterministic across runs (keys are handed to callers and show up in
//! reports), which rules out `std`'s randomized hasher.

use std::net::IpAddr;

/// A 32-bit, direction-independent identifier for a TCP connection.
///
/// Collisions are possible but rare; colliding connections are treated as
/// one, which is the accepted trade-off of a 4-byte key.
pub type FlowKey = u32;

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;
const IPPROTO_TCP: u8 = 6;

/// Compute the flow key for a TCP packet given its addresses and ports.
///
/// Symmetric: `flow_key_for(a, b, pa, pb) == flow_key_for(b, a, pb, pa)`.
pub fn flow_key_for(src_ip: IpAddr, dst_ip: IpAddr, src_port: u16, dst_port: u16) -> FlowKey {
    // Canonical endpoint order: lower (ip, port) pair first.
    let a = (src_ip, src_port);
    let b = (dst_ip, dst_port);
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };

    let mut hash = FNV_OFFSET;
    hash_endpoint(&mut hash, lo);
    hash_endpoint(&mut hash, hi);
    hash_byte(&mut hash, IPPROTO_TCP);
    hash
}

fn hash_endpoint(hash: &mut u32, (ip, port): (IpAddr, u16)) {
    match ip {
        IpAddr::V4(v4) => {
            for b in v4.octets() {
                hash_byte(hash, b);
            }
        }
        IpAddr::V6(v6) => {
            for b in v6.octets() {
                hash_byte(hash, b);
            }
        }
    }
    for b in port.to_be_bytes() {
        hash_byte(hash, b);
    }
}

#[inline]
fn hash_byte(hash: &mut u32, byte: u8) {
    *hash ^= byte as u32;
    *hash = hash.wrapping_mul(FNV_PRIME);
}
