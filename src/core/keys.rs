//! Purpose: Sync-key validation and hashing for the relay store.
//! Exports: `MIN_SYNC_KEY_CHARS`, `validate_sync_key`, `key_hash`.
//! Invariants: The plaintext key is hashed before it touches storage; only
//! the lowercase-hex SHA-256 digest is used as a store identifier.

use sha2::{Digest, Sha256};

use crate::core::error::{Error, ErrorKind};

pub const MIN_SYNC_KEY_CHARS: usize = 8;

pub fn validate_sync_key(key: &str) -> Result<(), Error> {
    if key.chars().count() < MIN_SYNC_KEY_CHARS {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!(
                "sync key must be at least {MIN_SYNC_KEY_CHARS} characters"
            ))
            .with_hint("Pass ?key=<secret> with a longer secret."));
    }
    Ok(())
}

/// Store identifier for a plaintext sync key.
pub fn key_hash(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        out.push(nibble_hex(byte >> 4));
        out.push(nibble_hex(byte & 0x0f));
    }
    out
}

fn nibble_hex(nibble: u8) -> char {
    match nibble {
        0..=9 => char::from(b'0' + nibble),
        _ => char::from(b'a' + (nibble - 10)),
    }
}
