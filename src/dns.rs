// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Reverse DNS lookups for PPS alerts, mirroring the donor's
//! `shared/include/dns.cpp` (`getPTRRecords`). Out of scope as a wire
//! protocol per §1; `hickory-resolver` supplies PTR resolution.

use std::net::Ipv4Addr;

use hickory_resolver::TokioAsyncResolver;

/// Returns every PTR record for `ip`, or an empty `Vec` if none resolve —
/// the donor's `getPTRRecords` treats lookup failure as "no records," not an
/// error, since a missing PTR record is routine for many hosts.
pub async fn reverse_lookup(ip: Ipv4Addr) -> Vec<String> {
    let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
        Ok(r) => r,
        Err(_) => return Vec::new(),
    };
    match resolver.reverse_lookup(ip).await {
        Ok(lookup) => lookup.iter().map(|name| name.to_string()).collect(),
        Err(_) => Vec::new(),
    }
}
