use smallvec::{SmallVec, smallvec};

/// Returns `int` as little-endian bytes with a length of 4.
pub fn int_to_bytes4(int: u32) -> [u8; 4] {
    int.to_le_bytes()
}

/// Returns `int` as little-endian bytes with a length of 8.
pub fn int_to_bytes8(int: u64) -> SmallVec<[u8; 8]> {
    int.to_le_bytes().to_smallvec()
}

/// Returns `int` as little-endian bytes with a length of 32.
pub fn int_to_bytes32(int: u64) -> SmallVec<[u8; 32]> {
    let mut bytes: SmallVec<[u8; 32]> = smallvec![0; 32];
    bytes[0..8].copy_from_slice(&int.to_le_bytes());
    bytes
}

/// Returns `int` as little-endian bytes with a length of 32, as a fixed-size array.
pub fn int_to_fixed_bytes32(int: u64) -> [u8; 32] {
    let mut bytes = [0; 32];
    bytes[0..8].copy_from_slice(&int.to_le_bytes());
    bytes
}

trait ToSmallVec8 {
    fn to_smallvec(self) -> SmallVec<[u8; 8]>;
}

impl ToSmallVec8 for [u8; 8] {
    #[allow(clippy::wrong_self_convention)]
    fn to_smallvec(self) -> SmallVec<[u8; 8]> {
        SmallVec::from_slice(&self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_to_bytes4_le() {
        assert_eq!(int_to_bytes4(0x0102_0304), [0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn int_to_bytes8_le() {
        assert_eq!(
            int_to_bytes8(0x0102_0304_0506_0708).as_slice(),
            &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn int_to_bytes32_pads_with_zeroes() {
        let bytes = int_to_bytes32(1);
        assert_eq!(bytes[0], 1);
        assert!(bytes[1..].iter().all(|b| *b == 0));
        assert_eq!(bytes.len(), 32);
    }

    #[test]
    fn fixed_and_smallvec_agree() {
        for int in [0, 1, u64::MAX, 0xdead_beef] {
            assert_eq!(int_to_bytes32(int).as_slice(), &int_to_fixed_bytes32(int));
        }
    }
}
