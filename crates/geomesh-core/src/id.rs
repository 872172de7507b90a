//! Report identifiers
//!
//! Ids are strings so that reports minted by peers in other runtimes can be
//! cached side by side with local ones. Locally minted ids look like
//! `hazard_m1x2y3z4_k3j9f2q8a`: a type prefix, the issue time in base 36,
//! and nine random base-36 characters.

use rand::Rng;

use crate::Timestamp;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length of the random suffix of generated ids
pub const ID_SUFFIX_LEN: usize = 9;

/// Encode an unsigned integer in lowercase base 36
pub fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    digits.into_iter().map(char::from).collect()
}

/// Random lowercase base-36 string
pub fn random_base36(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(BASE36[rng.gen_range(0..BASE36.len())]))
        .collect()
}

/// Generate a report id for the given prefix and issue time
pub fn generate_report_id(prefix: &str, issued_at: Timestamp) -> String {
    let millis = u64::try_from(issued_at.as_millis()).unwrap_or(0);
    format!(
        "{}_{}_{}",
        prefix,
        to_base36(millis),
        random_base36(ID_SUFFIX_LEN)
    )
}
