//! Provides list-shuffling functions matching the Ethereum 2.0 specification.
//!
//! See
//! [compute_shuffled_index](https://github.com/ethereum/consensus-specs/blob/dev/specs/phase0/beacon-chain.md#compute_shuffled_index)
//! for specifics regarding list shuffling.

mod shuffle_list;

pub use shuffle_list::shuffle_list;

type Hash256 = fixed_bytes::Hash256;

/// Returns the index of `index` after the swap-or-not shuffle of a list of length `list_size`.
///
/// Returns `None` under any of the following conditions:
///  - `list_size == 0`
///  - `index >= list_size`
///  - `list_size > 2**24`
///  - `list_size > usize::MAX / 2`
pub fn compute_shuffled_index(
    index: usize,
    list_size: usize,
    seed: &[u8],
    shuffle_round_count: u8,
) -> Option<usize> {
    if list_size == 0
        || index >= list_size
        || list_size > usize::MAX / 2
        || list_size > 2_usize.pow(24)
    {
        return None;
    }

    let mut index = index;
    for round in 0..shuffle_round_count {
        let pivot = bytes_to_int64(&hash_with_round(seed, round)[0..8]) as usize % list_size;
        index = do_round(seed, index, pivot, round, list_size)?;
    }
    Some(index)
}

fn do_round(seed: &[u8], index: usize, pivot: usize, round: u8, list_size: usize) -> Option<usize> {
    let flip = (pivot + (list_size - index)) % list_size;
    let position = std::cmp::max(index, flip);
    let source = hash_with_round_and_position(seed, round, position)?;
    let byte = source[(position % 256) / 8];
    let bit = (byte >> (position % 8)) % 2;
    Some(if bit == 1 { flip } else { index })
}

fn hash_with_round_and_position(seed: &[u8], round: u8, position: usize) -> Option<Hash256> {
    let mut seed = seed.to_vec();
    seed.push(round);
    // Large as possible, considering there must be at least three numbers remaining.
    seed.extend_from_slice(&(position / 256).to_le_bytes()[0..4]);
    Some(Hash256::from_slice(&ethereum_hashing::hash(&seed)))
}

fn hash_with_round(seed: &[u8], round: u8) -> Hash256 {
    let mut seed = seed.to_vec();
    seed.push(round);
    Hash256::from_slice(&ethereum_hashing::hash(&seed))
}

fn bytes_to_int64(slice: &[u8]) -> u64 {
    let mut bytes = [0; 8];
    bytes.copy_from_slice(&slice[0..8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_none_for_zero_length_list() {
        assert_eq!(None, compute_shuffled_index(100, 0, &[42, 42], 90));
    }

    #[test]
    fn returns_none_for_out_of_bounds_index() {
        assert_eq!(None, compute_shuffled_index(10, 10, &[42, 42], 90));
    }

    #[test]
    fn is_a_permutation() {
        let seed = [7; 32];
        let list_size = 100;
        let mut seen = vec![false; list_size];
        for i in 0..list_size {
            let shuffled = compute_shuffled_index(i, list_size, &seed, 10).unwrap();
            assert!(!seen[shuffled]);
            seen[shuffled] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn matches_shuffle_list() {
        let seed = [42; 32];
        let list: Vec<usize> = (0..50).collect();
        let shuffled = shuffle_list(list.clone(), 10, &seed, true).unwrap();
        for (i, item) in list.iter().enumerate() {
            let index = compute_shuffled_index(i, list.len(), &seed, 10).unwrap();
            assert_eq!(shuffled[index], *item);
        }
    }
}
