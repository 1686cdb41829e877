#![forbid(unsafe_code)]

/// CRC32 of a page image, salted with its page number.
pub fn page_crc32(page_no: u64, salt: u64, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&page_no.to_be_bytes());
    hasher.update(&salt.to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// 16-bit checksum guarding one generation-safe pointer slot.
///
/// Folds the CRC32 of the slot's generation and pointer into two bytes so a
/// torn slot write is detected with high probability.
pub fn pointer_checksum(generation: u64, pointer: u64) -> u16 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&generation.to_be_bytes());
    hasher.update(&pointer.to_be_bytes());
    let crc = hasher.finalize();
    ((crc >> 16) ^ (crc & 0xFFFF)) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_crc32_changes_with_components() {
        let payload = vec![0u8; 16];
        let crc_a = page_crc32(1, 2, &payload);
        let crc_b = page_crc32(1, 2, &payload);
        assert_eq!(crc_a, crc_b);

        let mut different = payload.clone();
        different[0] = 1;
        assert_ne!(crc_a, page_crc32(1, 2, &different));
        assert_ne!(crc_a, page_crc32(3, 2, &payload));
        assert_ne!(crc_a, page_crc32(1, 3, &payload));
    }

    #[test]
    fn pointer_checksum_depends_on_both_fields() {
        let base = pointer_checksum(5, 17);
        assert_eq!(base, pointer_checksum(5, 17));
        assert_ne!(base, pointer_checksum(6, 17));
        assert_ne!(base, pointer_checksum(5, 18));
    }
}
