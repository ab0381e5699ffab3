// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Display name plausibility rules.

use crate::types::Address;

/// Returns `true` if `text` looks like a device address rather than a name.
///
/// Platforms often fall back to showing the address when a device has no
/// name. Such text is rejected when, after trimming, it
///
/// - equals the canonical form of `address`, ignoring case,
/// - consists of exactly 12 hex digits once `:`, `-`, `_` and whitespace
///   separators are removed, or
/// - contains five or more colons.
///
/// Blank text is not address-like.
///
/// # Examples
///
/// ```
/// use blelink::Address;
/// use blelink::naming::is_address_like;
///
/// let address = Address::new(0xAABB_CCDD_EEFF);
/// assert!(is_address_like("AA:BB:CC:DD:EE:FF", address));
/// assert!(is_address_like("aabbccddeeff", address));
/// assert!(!is_address_like("Living Room Sensor", address));
/// ```
#[must_use]
pub fn is_address_like(text: &str, address: Address) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }

    if trimmed.eq_ignore_ascii_case(&address.to_string()) {
        return true;
    }

    let mut digits = 0_usize;
    let mut only_hex = true;
    for c in trimmed.chars() {
        if c.is_ascii_hexdigit() {
            digits += 1;
        } else if !(c == ':' || c == '-' || c == '_' || c.is_whitespace()) {
            only_hex = false;
            break;
        }
    }
    if only_hex && digits == 12 {
        return true;
    }

    trimmed.matches(':').count() >= 5
}

/// Returns `true` if `text` is usable as a display name for `address`.
#[must_use]
pub fn is_plausible_name(text: &str, address: Address) -> bool {
    !text.trim().is_empty() && !is_address_like(text, address)
}

/// Picks the best display name from the available sources.
///
/// The GAP device name wins over the advertised name, which wins over the
/// operating system's cached name. Candidates that are blank or
/// address-like are skipped. Returns an empty string if none qualifies.
#[must_use]
pub fn choose_best_name(address: Address, os_name: &str, advertised: &str, gap_name: &str) -> String {
    [gap_name, advertised, os_name]
        .into_iter()
        .find(|candidate| is_plausible_name(candidate, address))
        .map(|name| name.trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESS: Address = Address::new(0xAABB_CCDD_EEFF);

    #[test]
    fn canonical_address_is_rejected() {
        assert!(is_address_like("AA:BB:CC:DD:EE:FF", ADDRESS));
        assert!(is_address_like("  aa:bb:cc:dd:ee:ff ", ADDRESS));
    }

    #[test]
    fn other_address_forms_are_rejected() {
        assert!(is_address_like("11-22-33-44-55-66", ADDRESS));
        assert!(is_address_like("112233445566", ADDRESS));
        assert!(is_address_like("11 22 33 44 55 66", ADDRESS));
        assert!(is_address_like("fe80::1:2:3:4", ADDRESS));
    }

    #[test]
    fn real_names_are_accepted() {
        assert!(!is_address_like("Living Room Sensor", ADDRESS));
        assert!(!is_address_like("Cafe Bed Face", ADDRESS));
        assert!(!is_address_like("ABCDEF", ADDRESS));
        assert!(!is_address_like("", ADDRESS));
    }

    #[test]
    fn best_name_prefers_gap() {
        assert_eq!(choose_best_name(ADDRESS, "Os", "Adv", "Gap"), "Gap");
        assert_eq!(
            choose_best_name(ADDRESS, "Os", "Adv", "AA:BB:CC:DD:EE:FF"),
            "Adv"
        );
        assert_eq!(choose_best_name(ADDRESS, "Os", " ", ""), "Os");
        assert_eq!(choose_best_name(ADDRESS, "aabbccddeeff", "", ""), "");
    }
}
