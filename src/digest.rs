use sha1::{Digest, Sha1};

/// Hex-encoded 160-bit digest of a byte sequence. Lowercase, 40 characters.
pub fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Whether `value` is a well-formed lowercase 40-hex digest. Watch services
/// may report `null` or transient placeholders in the sha1 field; anything
/// that fails this check is treated as absent.
pub fn is_valid_sha1_hex(value: &str) -> bool {
    value.len() == 40
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
