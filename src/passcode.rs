//! Check-in passcode generation. Codes are short, human-presentable secrets
//! drawn from the OS cryptographic RNG; uniqueness among a room's ACTIVE
//! bookings is enforced by regeneration, never assumed.

use std::collections::HashSet;

use rand::Rng;
use rand::rngs::OsRng;

/// Uppercase letters and digits — unambiguous to read out at a front desk.
const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub const PASSCODE_LEN: usize = 6;

/// Generate one candidate passcode.
pub fn generate() -> String {
    let mut rng = OsRng;
    (0..PASSCODE_LEN)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Generate a passcode distinct from every entry in `taken`. Collision odds
/// are negligible at 36^6, but the contract is deterministic rejection, so
/// we loop rather than hope.
pub fn generate_unique(taken: &HashSet<String>) -> String {
    loop {
        let candidate = generate();
        if !taken.contains(&candidate) {
            return candidate;
        }
    }
}
