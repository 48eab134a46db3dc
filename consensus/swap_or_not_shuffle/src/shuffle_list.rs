use crate::compute_shuffled_index;

/// Shuffles an entire list using the swap-or-not algorithm.
///
/// When `forwards == true`, the element at index `i` in the input ends up at
/// `compute_shuffled_index(i)` in the output. When `forwards == false` the inverse permutation is
/// applied, which matches the element-wise `compute_shuffled_index` lookup used by the
/// committee-assignment routines.
///
/// Returns `None` under any of the conditions that `compute_shuffled_index` rejects.
pub fn shuffle_list<T: Clone>(
    input: Vec<T>,
    rounds: u8,
    seed: &[u8],
    forwards: bool,
) -> Option<Vec<T>> {
    if input.is_empty() {
        return Some(input);
    }

    let list_size = input.len();
    let mut output = input.clone();

    for (i, item) in input.iter().enumerate() {
        let shuffled = compute_shuffled_index(i, list_size, seed, rounds)?;
        if forwards {
            output[shuffled] = item.clone();
        } else {
            output[i] = input[shuffled].clone();
        }
    }

    Some(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_is_identity() {
        let out = shuffle_list::<usize>(vec![], 10, &[42; 32], true).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn forwards_then_backwards_is_identity() {
        let seed = [9; 32];
        let list: Vec<usize> = (0..64).collect();
        let shuffled = shuffle_list(list.clone(), 10, &seed, true).unwrap();
        let unshuffled = shuffle_list(shuffled, 10, &seed, false).unwrap();
        assert_eq!(list, unshuffled);
    }
}
