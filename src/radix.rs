//! LSD radix sort over 8-bit digits of 32-bit keys.
//!
//! The kernel sorts any contiguous digit range `[begin, end)` counting from the least
//! significant digit, which lets callers skip digits already decided by a shared key prefix.
//! Scratch memory is allocated fallibly: running out of memory is reported to the caller,
//! never raised as a panic.

use std::path::Path;

use crate::sort::SortError;
use crate::{io, Key};

/// Bits per radix digit.
pub const DIGIT_BITS: usize = 8;
/// Number of digits in one key.
pub const TOTAL_DIGITS: usize = crate::KEY_BYTES * 8 / DIGIT_BITS;

const RADIX: usize = 1 << DIGIT_BITS;
const DIGIT_MASK: Key = (RADIX - 1) as Key;

/// One stable counting pass over a single digit position.
fn scatter_digit(src: &[Key], dst: &mut [Key], digit: usize) {
    debug_assert_eq!(src.len(), dst.len());
    let shift = digit * DIGIT_BITS;

    let mut counts = [0usize; RADIX];
    for &key in src {
        counts[((key >> shift) & DIGIT_MASK) as usize] += 1;
    }

    let mut offsets = [0usize; RADIX];
    let mut total = 0;
    for (offset, &count) in offsets.iter_mut().zip(counts.iter()) {
        *offset = total;
        total += count;
    }

    for &key in src {
        let bucket = ((key >> shift) & DIGIT_MASK) as usize;
        dst[offsets[bucket]] = key;
        offsets[bucket] += 1;
    }
}

/// Fallibly allocates a zeroed scratch buffer of `len` keys.
fn scratch_buffer(len: usize) -> Option<Vec<Key>> {
    let mut buffer: Vec<Key> = Vec::new();
    if buffer.try_reserve_exact(len).is_err() {
        return None;
    }
    buffer.resize(len, 0);
    return Some(buffer);
}

/// Stable radix sort of `src` into `dst` over digit positions `[begin, end)`.
///
/// The passes ping-pong between `dst` and one internal scratch buffer; the pass pairing is
/// chosen from the digit count parity so the final pass always lands in `dst`. Returns
/// `false` without touching `dst` when the scratch buffer cannot be allocated.
///
/// # Arguments
/// * `src` - Keys to be sorted.
/// * `dst` - Destination slice of the same length.
/// * `begin` - First digit position to sort by.
/// * `end` - One past the last digit position to sort by.
pub fn sort_range(src: &[Key], dst: &mut [Key], begin: usize, end: usize) -> bool {
    assert_eq!(src.len(), dst.len());
    assert!(begin <= end && end <= TOTAL_DIGITS);

    if begin == end {
        dst.copy_from_slice(src);
        return true;
    }

    let mut scratch = match scratch_buffer(src.len()) {
        Some(buffer) => buffer,
        None => return false,
    };

    if (end - begin) % 2 == 0 {
        // First pass into the scratch buffer, then dst/scratch pairs.
        scatter_digit(src, &mut scratch, begin);
        let mut digit = begin + 1;
        while digit < end {
            scatter_digit(&scratch, dst, digit);
            digit += 1;
            if digit < end {
                scatter_digit(dst, &mut scratch, digit);
                digit += 1;
            }
        }
    } else {
        // First pass straight into dst, then scratch/dst pairs.
        scatter_digit(src, dst, begin);
        let mut digit = begin + 1;
        while digit < end {
            scatter_digit(dst, &mut scratch, digit);
            scatter_digit(&scratch, dst, digit + 1);
            digit += 2;
        }
    }

    return true;
}

/// Stable radix sort of `src` into `dst` over all digits.
pub fn sort_full(src: &[Key], dst: &mut [Key]) -> bool {
    return sort_range(src, dst, 0, TOTAL_DIGITS);
}

/// In-place radix sort over digit positions `[begin, end)`.
/// Costs one extra copy when the pass count is odd. Returns `false` on allocation failure.
pub fn sort_slice(data: &mut [Key], begin: usize, end: usize) -> bool {
    assert!(begin <= end && end <= TOTAL_DIGITS);

    if data.len() < 2 || begin == end {
        return true;
    }

    let mut scratch = match scratch_buffer(data.len()) {
        Some(buffer) => buffer,
        None => return false,
    };

    let mut in_data = true;
    for digit in begin..end {
        if in_data {
            scatter_digit(data, &mut scratch, digit);
        } else {
            scatter_digit(&scratch, data, digit);
        }
        in_data = !in_data;
    }
    if !in_data {
        data.copy_from_slice(&scratch);
    }

    return true;
}

/// Radix sorts a whole key file into `dst` over digit positions `[begin, end)`.
///
/// `src` and `dst` may name the same file; the source is loaded and unmapped in full
/// before the destination is written.
pub fn sort_file(src: &Path, dst: &Path, begin: usize, end: usize) -> Result<(), SortError> {
    let mut keys = io::read_keys_file(src)?;
    if !sort_slice(&mut keys, begin, end) {
        return Err(SortError::OutOfMemory);
    }
    return io::write_keys_file(dst, &keys);
}

#[cfg(test)]
mod test {
    use rand::Rng;
    use rstest::*;

    use super::{sort_full, sort_range, sort_slice, TOTAL_DIGITS};

    fn random_keys(count: usize) -> Vec<u32> {
        let mut rng = rand::thread_rng();
        return Vec::from_iter((0..count).map(|_| rng.gen()));
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(2)]
    #[case(1000)]
    #[case(100_000)]
    fn test_sort_full_matches_std_sort(#[case] count: usize) {
        let keys = random_keys(count);
        let mut expected = keys.clone();
        expected.sort_unstable();

        let mut sorted = vec![0; keys.len()];
        assert!(sort_full(&keys, &mut sorted));
        assert_eq!(sorted, expected);
    }

    #[rstest]
    #[case(0, 1)]
    #[case(0, 2)]
    #[case(0, 3)]
    #[case(1, 4)]
    #[case(2, 4)]
    fn test_sort_range_orders_by_selected_digits(#[case] begin: usize, #[case] end: usize) {
        let keys = random_keys(10_000);

        let mut sorted = vec![0; keys.len()];
        assert!(sort_range(&keys, &mut sorted, begin, end));

        let digit_span = |key: u32| (key >> (begin * 8)) & ((1u64 << ((end - begin) * 8)) - 1) as u32;
        for pair in sorted.windows(2) {
            assert!(digit_span(pair[0]) <= digit_span(pair[1]));
        }

        let mut expected = keys;
        expected.sort_unstable();
        sorted.sort_unstable();
        assert_eq!(sorted, expected);
    }

    #[rstest]
    fn test_sort_range_low_digits_finish_shared_prefix() {
        // Keys sharing their top 16 bits are fully ordered by the two low digits alone.
        let mut rng = rand::thread_rng();
        let keys = Vec::from_iter((0..10_000).map(|_| 0xABCD_0000 | (rng.gen::<u32>() & 0xFFFF)));

        let mut sorted = vec![0; keys.len()];
        assert!(sort_range(&keys, &mut sorted, 0, 2));

        let mut expected = keys;
        expected.sort_unstable();
        assert_eq!(sorted, expected);
    }

    #[rstest]
    fn test_sort_range_empty_digit_range_copies() {
        let keys = vec![3, 1, 2];
        let mut out = vec![0; 3];

        assert!(sort_range(&keys, &mut out, 2, 2));
        assert_eq!(out, keys);
    }

    #[rstest]
    #[case(0, TOTAL_DIGITS)]
    #[case(0, 3)]
    #[case(0, 1)]
    fn test_sort_slice_in_place(#[case] begin: usize, #[case] end: usize) {
        let mut keys = random_keys(5000);
        keys.iter_mut().for_each(|key| *key &= ((1u64 << (end * 8)) - 1) as u32);
        let mut expected = keys.clone();
        expected.sort_unstable();

        assert!(sort_slice(&mut keys, begin, end));
        assert_eq!(keys, expected);
    }

    #[rstest]
    fn test_sort_preserves_duplicates() {
        let mut keys = vec![7; 1000];
        keys.extend(random_keys(1000));
        let mut expected = keys.clone();
        expected.sort_unstable();

        let mut sorted = vec![0; keys.len()];
        assert!(sort_full(&keys, &mut sorted));
        assert_eq!(sorted, expected);
    }

    #[rstest]
    fn test_sort_file_onto_itself() {
        let work_dir = tempfile::tempdir().unwrap();
        let path = work_dir.path().join("keys");

        let keys = random_keys(2000);
        crate::io::write_keys_file(&path, &keys).unwrap();

        super::sort_file(&path, &path, 0, TOTAL_DIGITS).unwrap();

        let mut expected = keys;
        expected.sort_unstable();
        assert_eq!(crate::io::read_keys_file(&path).unwrap(), expected);
    }
}
