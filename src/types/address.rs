// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bluetooth device address type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Mask selecting the 48 significant bits of an address.
const ADDRESS_MASK: u64 = 0xFFFF_FFFF_FFFF;

/// A 48-bit Bluetooth device address.
///
/// This is the primary key for every piece of per-device state in the
/// crate. The upper 16 bits of the wrapped `u64` are always zero.
///
/// # Examples
///
/// ```
/// use blelink::Address;
///
/// let address = Address::new(0xAABB_CCDD_EEFF);
/// assert_eq!(address.to_string(), "AA:BB:CC:DD:EE:FF");
///
/// let parsed: Address = "aa:bb:cc:dd:ee:ff".parse().unwrap();
/// assert_eq!(parsed, address);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(u64);

impl Address {
    /// Creates an address from its raw value, discarding bits above 48.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw & ADDRESS_MASK)
    }

    /// Returns the raw 48-bit value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Returns `true` for the all-zero address, which radios use for "unknown".
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Returns the six address octets, most significant first.
    #[must_use]
    pub fn octets(&self) -> [u8; 6] {
        let bytes = self.0.to_be_bytes();
        [bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]]
    }

    /// Returns the address as 12 upper-case hex digits without separators.
    #[must_use]
    pub fn to_hex_string(&self) -> String {
        format!("{:012X}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.octets();
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl From<u64> for Address {
    fn from(raw: u64) -> Self {
        Self::new(raw)
    }
}

impl From<Address> for u64 {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl FromStr for Address {
    type Err = Error;

    /// Parses `AA:BB:CC:DD:EE:FF`, `AA-BB-CC-DD-EE-FF` or `AABBCCDDEEFF`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect();

        if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidAddress(s.to_string()));
        }

        u64::from_str_radix(&digits, 16)
            .map(Self::new)
            .map_err(|_| Error::InvalidAddress(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_canonical_colon_hex() {
        let address = Address::new(0x0012_3456_789A);
        assert_eq!(address.to_string(), "00:12:34:56:78:9A");
    }

    #[test]
    fn new_masks_upper_bits() {
        let address = Address::new(0xFFFF_AABB_CCDD_EEFF);
        assert_eq!(address.value(), 0xAABB_CCDD_EEFF);
    }

    #[test]
    fn parse_accepts_common_forms() {
        let expected = Address::new(0xAABB_CCDD_EEFF);
        assert_eq!("AA:BB:CC:DD:EE:FF".parse::<Address>().unwrap(), expected);
        assert_eq!("aa-bb-cc-dd-ee-ff".parse::<Address>().unwrap(), expected);
        assert_eq!(" aabbccddeeff ".parse::<Address>().unwrap(), expected);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("AA:BB:CC".parse::<Address>().is_err());
        assert!("GG:BB:CC:DD:EE:FF".parse::<Address>().is_err());
        assert!("".parse::<Address>().is_err());
    }

    #[test]
    fn hex_string_has_no_separators() {
        assert_eq!(Address::new(0xAB).to_hex_string(), "0000000000AB");
    }

    #[test]
    fn zero_address() {
        assert!(Address::default().is_zero());
        assert!(!Address::new(1).is_zero());
    }
}
