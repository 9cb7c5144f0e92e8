//! Deterministic link addressing
//!
//! Every link owns a /24 and a /48 derived purely from its stable
//! index, so both endpoints (possibly on different hosts, acting
//! independently) agree on the subnet without talking to each other.
//! Ground-to-satellite links use a distinct first octet / hextet so
//! the two link classes are told apart on sight.

use std::net::{Ipv4Addr, Ipv6Addr};

use ipnetwork::{Ipv4Network, Ipv6Network};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AddrError {
    #[error("invalid derived network: {0}")]
    Invalid(String),
}

/// The derived subnets of one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkPrefix {
    pub v4: Ipv4Network,
    pub v6: Ipv6Network,
}

/// Concrete addresses for one endpoint of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointAddrs {
    pub v4: Ipv4Network,
    pub v6: Ipv6Network,
}

/// Derive the link subnets from `(idx, is_gsl)`.
///
/// ISLs get `10.(idx>>8).(idx&0xFF).0/24` and
/// `2001:(idx>>8):(idx&0xFF)::/48`; GSLs substitute `9.` and `2002:`.
pub fn derive(idx: u32, gsl: bool) -> Result<LinkPrefix, AddrError> {
    let hi = ((idx >> 8) & 0xFF) as u8;
    let lo = (idx & 0xFF) as u8;

    let v4_first = if gsl { 9 } else { 10 };
    let v6_first = if gsl { 0x2002 } else { 0x2001 };

    let v4 = Ipv4Network::new(Ipv4Addr::new(v4_first, hi, lo, 0), 24)
        .map_err(|e| AddrError::Invalid(e.to_string()))?;
    let v6 = Ipv6Network::new(
        Ipv6Addr::new(v6_first, hi as u16, lo as u16, 0, 0, 0, 0, 0),
        48,
    )
    .map_err(|e| AddrError::Invalid(e.to_string()))?;

    Ok(LinkPrefix { v4, v6 })
}

/// Addresses of the `node` end of a link facing `peer`.
///
/// The `.10`/`::10` half goes to the lexicographically smaller node
/// name and `.40`/`::40` to the larger one. The decision depends only
/// on the names, never on which host performs the call, so the two
/// halves of an inter-host link always agree.
pub fn endpoint(prefix: &LinkPrefix, node: &str, peer: &str) -> Result<EndpointAddrs, AddrError> {
    let low = node < peer;
    let base4 = prefix.v4.network().octets();
    let base6 = prefix.v6.network().segments();

    // ".10"/".40" read the same in v4 (decimal) and v6 (hex); the raw
    // host values therefore differ between the two families.
    let v4_suffix = if low { 10 } else { 40 };
    let v4 = Ipv4Network::new(
        Ipv4Addr::new(base4[0], base4[1], base4[2], v4_suffix),
        24,
    )
    .map_err(|e| AddrError::Invalid(e.to_string()))?;

    let v6_suffix = if low { 0x10 } else { 0x40 };
    let v6 = Ipv6Network::new(
        Ipv6Addr::new(
            base6[0], base6[1], base6[2], 0, 0, 0, 0, v6_suffix,
        ),
        48,
    )
    .map_err(|e| AddrError::Invalid(e.to_string()))?;

    Ok(EndpointAddrs { v4, v6 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn derivation_is_total_and_collision_free() {
        let mut seen = HashSet::new();
        for idx in 1..=2048u32 {
            for gsl in [false, true] {
                let p = derive(idx, gsl).unwrap();
                assert!(seen.insert((p.v4, p.v6)), "collision at idx {idx}");
            }
        }
    }

    #[test]
    fn isl_and_gsl_prefixes() {
        let isl = derive(0x0102, false).unwrap();
        assert_eq!(isl.v4.to_string(), "10.1.2.0/24");
        assert_eq!(isl.v6.network().segments()[..3], [0x2001, 1, 2]);

        let gsl = derive(0x0102, true).unwrap();
        assert_eq!(gsl.v4.to_string(), "9.1.2.0/24");
        assert_eq!(gsl.v6.network().segments()[..3], [0x2002, 1, 2]);
    }

    #[test]
    fn suffix_follows_name_order_not_call_order() {
        let p = derive(1, false).unwrap();

        let sat1 = endpoint(&p, "SAT1", "SAT2").unwrap();
        let sat2 = endpoint(&p, "SAT2", "SAT1").unwrap();
        assert_eq!(sat1.v4.ip().octets()[3], 10);
        assert_eq!(sat2.v4.ip().octets()[3], 40);
        assert_eq!(sat1.v6.ip().segments()[7], 0x10);
        assert_eq!(sat2.v6.ip().segments()[7], 0x40);

        // Lexicographic, not numeric: "SAT10" sorts before "SAT2".
        let low = endpoint(&p, "SAT10", "SAT2").unwrap();
        assert_eq!(low.v4.ip().octets()[3], 10);
    }
}
