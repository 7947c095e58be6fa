//! Identity checksums.
//!
//! Some danmu archives do not publish the sender's user id. They publish the
//! CRC-32 of it instead, formatted as lowercase hex without padding.

/// CRC-32 (IEEE) of `data`, zlib semantics.
pub(crate) fn crc32(data: &[u8]) -> u32 {
    zlib_rs::crc32::crc32(0, data)
}

/// Obfuscated form of an identity key as published by checksum-only sources.
pub fn identity_checksum(identity_key: &str) -> String {
    format!("{:x}", crc32(identity_key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors_match_zlib() {
        assert_eq!(crc32(b""), 0);
        assert_eq!(crc32(b"hello"), 0x3610_A686);
        assert_eq!(
            crc32(b"The quick brown fox jumps over the lazy dog"),
            0x414F_A339
        );
    }

    #[test]
    fn test_identity_checksum_is_unpadded_lowercase_hex() {
        assert_eq!(identity_checksum("hello"), "3610a686");
        // CRC32("") == 0 renders as a single digit
        assert_eq!(identity_checksum(""), "0");
    }
}
