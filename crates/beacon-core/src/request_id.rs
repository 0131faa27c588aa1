//! Fixed-length request identifiers
//!
//! Ids are 12 lowercase base-36 characters drawn from the operating system's
//! CSPRNG, which gives roughly 62 bits of entropy per id.

use rand::Rng;
use rand::rngs::OsRng;

/// Length of every request id
pub const LENGTH: usize = 12;

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generate a fresh random request id
pub fn generate() -> String {
    generate_with(&mut OsRng)
}

/// Generate a request id from the given RNG
pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..LENGTH)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Check that a value has the request id shape the server accepts
pub fn is_valid(value: &str) -> bool {
    value.len() == LENGTH && value.chars().all(|c| c.is_ascii_alphanumeric())
}
