//! Random token generation for ChatHub Server
//!
//! The server generates two kinds of tokens:
//! - Recovery codes, the only credential a user ever holds
//! - IDs for server-synthesized (system) messages
//!
//! Both draw from a 32-character alphabet with ambiguous glyphs
//! (0/O, 1/I/L) excluded. 256 % 32 == 0, so mapping random bytes
//! through the alphabet is unbiased.

use ring::rand::{SecureRandom, SystemRandom};

const CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const RECOVERY_CODE_LENGTH: usize = 12;
const RECOVERY_GROUP_LENGTH: usize = 4;
const MESSAGE_ID_LENGTH: usize = 16;

fn random_token(length: usize) -> String {
    let rng = SystemRandom::new();
    let mut bytes = vec![0u8; length];
    rng.fill(&mut bytes).expect("Failed to generate random bytes");

    bytes
        .iter()
        .map(|b| CODE_ALPHABET[(*b as usize) % CODE_ALPHABET.len()] as char)
        .collect()
}

/// Generate a recovery code, rendered as three dash-separated groups of
/// four characters (e.g. `QF3K-8ZWM-P2HD`).
pub fn generate_recovery_code() -> String {
    let raw = random_token(RECOVERY_CODE_LENGTH);

    raw.as_bytes()
        .chunks(RECOVERY_GROUP_LENGTH)
        .map(|chunk| std::str::from_utf8(chunk).expect("alphabet is ASCII"))
        .collect::<Vec<_>>()
        .join("-")
}

/// Normalize a recovery code for comparison: dashes stripped, uppercased.
pub fn normalize_recovery_code(code: &str) -> String {
    code.chars()
        .filter(|c| *c != '-')
        .collect::<String>()
        .to_uppercase()
}

/// Generate an ID for a server-synthesized message
pub fn generate_message_id() -> String {
    random_token(MESSAGE_ID_LENGTH)
}
