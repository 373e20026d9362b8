//! Proof-of-work gate. Only pass/fail matters here; difficulty adjustment
//! lives elsewhere.

use braid_common::BlockHeader;

pub trait ProofOfWork: Send + Sync {
    fn check(&self, header: &BlockHeader) -> bool;
}

/// Hash, read as a little-endian 256-bit integer, must not exceed the
/// target encoded in the header's compact `bits`
#[derive(Debug, Default, Clone, Copy)]
pub struct CompactTarget;

impl ProofOfWork for CompactTarget {
    fn check(&self, header: &BlockHeader) -> bool {
        let Some(target) = compact_to_target(header.bits) else {
            return false;
        };
        let mut value = [0u8; 32];
        value.copy_from_slice(header.hash.as_ref());
        value.reverse();
        value <= target
    }
}

/// Expand compact bits (exponent byte, 23-bit mantissa, sign bit) into a
/// big-endian 256-bit target. `None` for negative or overflowing targets.
pub fn compact_to_target(bits: u32) -> Option<[u8; 32]> {
    if bits & 0x0080_0000 != 0 {
        return None;
    }
    let exponent = (bits >> 24) as i64;
    let mantissa = [(bits >> 16) as u8 & 0x7f, (bits >> 8) as u8, bits as u8];

    let mut target = [0u8; 32];
    for (position, byte) in mantissa.iter().enumerate() {
        // Byte significance, 0 being the least significant byte
        let significance = exponent - 1 - position as i64;
        if significance < 0 {
            continue;
        }
        if significance >= 32 {
            if *byte != 0 {
                return None;
            }
            continue;
        }
        target[31 - significance as usize] = *byte;
    }
    Some(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_common::{BlockHash, Hash};
    use test_case::test_case;

    fn header(hash: [u8; 32], bits: u32) -> BlockHeader {
        BlockHeader {
            hash: BlockHash::new(hash),
            version: 1,
            parent_hashes: vec![],
            transactions_root: Hash::default(),
            timestamp: 0,
            bits,
            nonce: 0,
        }
    }

    #[test]
    fn expands_bitcoin_style_bits() {
        let target = compact_to_target(0x1d00ffff).unwrap();
        let mut expected = [0u8; 32];
        expected[4] = 0xff;
        expected[5] = 0xff;
        assert_eq!(target, expected);
    }

    #[test]
    fn small_exponent_shifts_mantissa_down() {
        let target = compact_to_target(0x02123456).unwrap();
        let mut expected = [0u8; 32];
        expected[30] = 0x12;
        expected[31] = 0x34;
        assert_eq!(target, expected);
    }

    #[test]
    fn negative_and_overflowing_targets_are_rejected() {
        assert_eq!(compact_to_target(0x1d80ffff), None);
        assert_eq!(compact_to_target(0x22123456), None);
    }

    #[test_case([0u8; 32], 0x207fffff => true ; "zero hash meets easiest target")]
    #[test_case([0xffu8; 32], 0x207fffff => false ; "max hash misses easiest target")]
    #[test_case([0u8; 32], 0x1d00ffff => true ; "zero hash meets hard target")]
    #[test_case([0x01u8; 32], 0x1d00ffff => false ; "small hash misses hard target")]
    #[test_case([0u8; 32], 0x1d80ffff => false ; "negative target always fails")]
    fn gate(hash: [u8; 32], bits: u32) -> bool {
        CompactTarget.check(&header(hash, bits))
    }

    #[test]
    fn hash_is_read_little_endian() {
        // High byte of the little-endian integer is the last hash byte
        let mut hash = [0xffu8; 32];
        hash[31] = 0x00;
        hash[30] = 0x00;
        hash[29] = 0x00;
        hash[28] = 0x00;
        hash[27] = 0x00;
        assert!(CompactTarget.check(&header(hash, 0x1d00ffff)));
    }
}
