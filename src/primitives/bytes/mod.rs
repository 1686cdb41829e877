#![forbid(unsafe_code)]
//! Order-preserving encoders shared by key layouts and the page codec.

pub mod ord {
    //! Big-endian encoders whose byte order matches numeric order.

    const U64_LEN: usize = core::mem::size_of::<u64>();

    /// Big-endian encoding for lexicographic order preservation.
    pub fn put_u64_be(dst: &mut [u8], v: u64) {
        assert!(dst.len() >= U64_LEN, "destination too small");
        dst[..U64_LEN].copy_from_slice(&v.to_be_bytes());
    }

    /// Decodes a u64 from big-endian byte order.
    pub fn get_u64_be(src: &[u8]) -> u64 {
        let head = src
            .get(..U64_LEN)
            .unwrap_or_else(|| panic!("u64 source shorter than 8 bytes (have {})", src.len()));
        let mut bytes = [0u8; U64_LEN];
        bytes.copy_from_slice(head);
        u64::from_be_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::ord;

    #[test]
    fn u64_encoding_preserves_order() {
        let mut a = [0u8; 8];
        let mut b = [0u8; 8];
        ord::put_u64_be(&mut a, 255);
        ord::put_u64_be(&mut b, 256);
        assert!(a < b);
        assert_eq!(ord::get_u64_be(&b), 256);
    }
}
