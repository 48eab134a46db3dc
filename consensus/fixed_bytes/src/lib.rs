use alloy_primitives::FixedBytes;

pub type Hash64 = alloy_primitives::B64;
pub type Hash256 = alloy_primitives::B256;
pub type Uint256 = alloy_primitives::U256;
pub type Address = alloy_primitives::Address;

pub trait UintExtended {
    fn to_i64(self) -> i64;
}

pub trait FixedBytesExtended {
    fn from_low_u64_be(value: u64) -> Self;
    fn from_low_u64_le(value: u64) -> Self;
    fn zero() -> Self;
}

impl<const N: usize> FixedBytesExtended for FixedBytes<N> {
    fn from_low_u64_be(value: u64) -> Self {
        let value_bytes = value.to_be_bytes();
        let mut buffer = [0x0; N];
        let bytes_to_copy = value_bytes.len().min(buffer.len());
        // Panic-free because bytes_to_copy <= buffer.len()
        let start_index = buffer.len().saturating_sub(bytes_to_copy);
        // Panic-free because start_index <= buffer.len()
        // and bytes_to_copy <= value_bytes.len()
        buffer
            .get_mut(start_index..)
            .expect("start_index <= buffer.len()")
            .copy_from_slice(
                value_bytes
                    .get(value_bytes.len().saturating_sub(bytes_to_copy)..)
                    .expect("bytes_to_copy <= value_byte.len()"),
            );
        Self::from(buffer)
    }

    fn from_low_u64_le(value: u64) -> Self {
        let value_bytes = value.to_le_bytes();
        let mut buffer = [0x0; N];
        let bytes_to_copy = value_bytes.len().min(buffer.len());
        buffer
            .get_mut(..bytes_to_copy)
            .expect("bytes_to_copy <= buffer.len()")
            .copy_from_slice(
                value_bytes
                    .get(..bytes_to_copy)
                    .expect("bytes_to_copy <= value_byte.len()"),
            );
        Self::from(buffer)
    }

    fn zero() -> Self {
        Self::ZERO
    }
}

impl FixedBytesExtended for alloy_primitives::Address {
    fn from_low_u64_be(value: u64) -> Self {
        FixedBytes::<20>::from_low_u64_be(value).into()
    }

    fn from_low_u64_le(value: u64) -> Self {
        FixedBytes::<20>::from_low_u64_le(value).into()
    }

    fn zero() -> Self {
        FixedBytes::<20>::zero().into()
    }
}

/// Convert a `Uint256` to a `i64`, saturating on overflow.
impl UintExtended for Uint256 {
    fn to_i64(self) -> i64 {
        i64::from_le_bytes(
            self.to_le_bytes::<32>()[0..8]
                .try_into()
                .expect("first 8 bytes of a 32-byte array fit i64"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_low_u64_be_is_big_endian() {
        let hash = Hash256::from_low_u64_be(0x0102_0304);
        assert_eq!(&hash.as_slice()[28..], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&hash.as_slice()[..28], &[0; 28]);
    }

    #[test]
    fn from_low_u64_le_is_little_endian() {
        let hash = Hash256::from_low_u64_le(0x0102_0304);
        assert_eq!(&hash.as_slice()[..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&hash.as_slice()[4..], &[0; 28]);
    }

    #[test]
    fn zero_is_all_zeroes() {
        assert_eq!(Hash256::zero(), Hash256::default());
    }
}
