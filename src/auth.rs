// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Password verification against stored records.
//!
//! A stored record is `salt || digest`: the first [`SALT_LENGTH`] bytes are
//! the salt, taken verbatim, followed by 64 lowercase hex characters of
//! `HMAC-SHA-256(key = salt, msg = password)`. Comparison is constant-time,
//! and callers are expected to run [`dummy_verify`] for unknown usernames so
//! that a probe cannot distinguish "no such user" from "wrong password" by
//! timing.

use ring::constant_time;
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use tracing::warn;

/// Length of the salt prefix of a password record, in bytes.
pub const SALT_LENGTH: usize = 16;

/// Length of the hex-encoded HMAC-SHA-256 digest.
pub const DIGEST_HEX_LENGTH: usize = 64;

/// Total length of a well-formed password record.
pub const PASSWORD_RECORD_LENGTH: usize = SALT_LENGTH + DIGEST_HEX_LENGTH;

/// Fixed record used to equalise timing for unknown usernames.
const DUMMY_RECORD: &str =
    "0123456789abcdef0000000000000000000000000000000000000000000000000000000000000000";

/// Verify a presented password against a stored record.
///
/// Returns `false` for malformed records (wrong length) after logging a
/// warning; a bad record in the configuration must never authenticate.
pub fn verify_password(record: &str, password: &[u8]) -> bool {
    let bytes = record.as_bytes();
    if bytes.len() != PASSWORD_RECORD_LENGTH {
        warn!(
            "stored password record has length {}, expected {}",
            bytes.len(),
            PASSWORD_RECORD_LENGTH
        );
        return false;
    }

    let (salt, expected) = bytes.split_at(SALT_LENGTH);
    let key = hmac::Key::new(hmac::HMAC_SHA256, salt);
    let digest = hmac::sign(&key, password);
    let computed = hex_encode(digest.as_ref());

    constant_time::verify_slices_are_equal(computed.as_bytes(), expected).is_ok()
}

/// Burn the same amount of work as a real verification.
///
/// Called when the presented username has no registry entry.
pub fn dummy_verify(password: &[u8]) {
    let _ = verify_password(DUMMY_RECORD, password);
}

/// Build a record from an explicit salt and password.
///
/// Returns `None` if the salt is not exactly [`SALT_LENGTH`] bytes.
pub fn make_password_record(salt: &str, password: &str) -> Option<String> {
    if salt.len() != SALT_LENGTH {
        return None;
    }
    let key = hmac::Key::new(hmac::HMAC_SHA256, salt.as_bytes());
    let digest = hmac::sign(&key, password.as_bytes());
    Some(format!("{}{}", salt, hex_encode(digest.as_ref())))
}

/// Build a record with a freshly generated random salt.
///
/// Used by `boatd --hash-password` to produce configuration entries.
pub fn generate_password_record(password: &str) -> Option<String> {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

    let rng = SystemRandom::new();
    let mut raw = [0u8; SALT_LENGTH];
    rng.fill(&mut raw).ok()?;

    let salt: String = raw
        .iter()
        .map(|b| CHARSET[*b as usize % CHARSET.len()] as char)
        .collect();
    make_password_record(&salt, password)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: &str = "0123456789abcdef";

    #[test]
    fn test_record_roundtrip() {
        let record = make_password_record(SALT, "hunter2").unwrap();
        assert_eq!(record.len(), PASSWORD_RECORD_LENGTH);
        assert!(record.starts_with(SALT));
        assert!(verify_password(&record, b"hunter2"));
    }

    #[test]
    fn test_wrong_password_rejected() {
        let record = make_password_record(SALT, "hunter2").unwrap();
        assert!(!verify_password(&record, b"hunter3"));
        assert!(!verify_password(&record, b""));
    }

    #[test]
    fn test_digest_is_lowercase_hex() {
        let record = make_password_record(SALT, "hunter2").unwrap();
        let digest = &record[SALT_LENGTH..];
        assert_eq!(digest.len(), DIGEST_HEX_LENGTH);
        assert!(digest.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }

    #[test]
    fn test_malformed_record_rejected() {
        assert!(!verify_password("", b"hunter2"));
        assert!(!verify_password("too-short", b"hunter2"));

        let record = make_password_record(SALT, "hunter2").unwrap();
        assert!(!verify_password(&record[..record.len() - 1], b"hunter2"));
    }

    #[test]
    fn test_salt_length_enforced() {
        assert!(make_password_record("short", "pw").is_none());
        assert!(make_password_record("0123456789abcdef0", "pw").is_none());
    }

    #[test]
    fn test_different_salts_give_different_digests() {
        let a = make_password_record("0123456789abcdef", "hunter2").unwrap();
        let b = make_password_record("fedcba9876543210", "hunter2").unwrap();
        assert_ne!(a[SALT_LENGTH..], b[SALT_LENGTH..]);
    }

    #[test]
    fn test_generate_password_record() {
        let record = generate_password_record("hunter2").unwrap();
        assert_eq!(record.len(), PASSWORD_RECORD_LENGTH);
        assert!(verify_password(&record, b"hunter2"));
        assert!(!verify_password(&record, b"wrong"));
    }

    #[test]
    fn test_dummy_verify_does_not_panic() {
        dummy_verify(b"anything");
        dummy_verify(b"");
    }
}
