//! Sorted-order verification.

use std::path::Path;

use crate::io::SequencedReader;
use crate::sort::{SortError, DEFAULT_RW_BUF_SIZE};
use crate::{Key, KEY_BYTES};

const BATCH_KEYS: usize = 64 * 1024;

/// Scans `path` for the first key that is smaller than its predecessor.
///
/// Returns the byte offset of that key, or `None` when the whole file is sorted.
/// Equal neighbors are in order.
pub fn first_disorder(path: &Path) -> Result<Option<u64>, SortError> {
    let mut reader = SequencedReader::open(path, DEFAULT_RW_BUF_SIZE)?;
    reader.check_aligned()?;

    let mut batch = Vec::new();
    let mut prev: Option<Key> = None;
    let mut index: u64 = 0;

    while reader.read_batch(&mut batch, BATCH_KEYS)? {
        for &key in &batch {
            if let Some(prev) = prev {
                if key < prev {
                    return Ok(Some(index * KEY_BYTES as u64));
                }
            }
            prev = Some(key);
            index += 1;
        }
    }

    return Ok(None);
}

/// Whether the keys of `path` are in ascending order.
pub fn is_sorted(path: &Path) -> Result<bool, SortError> {
    return Ok(first_disorder(path)?.is_none());
}

#[cfg(test)]
mod test {
    use std::fs;

    use rstest::*;

    use super::{first_disorder, is_sorted};
    use crate::io;
    use crate::sort::SortError;

    #[fixture]
    fn work_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[rstest]
    #[case(vec![], None)]
    #[case(vec![7], None)]
    #[case(vec![1, 2, 3], None)]
    #[case(vec![2, 2, 2], None)]
    #[case(vec![1, 5, 3], Some(8))]
    #[case(vec![9, 1], Some(4))]
    #[case(vec![0, u32::MAX, 0], Some(8))]
    fn test_first_disorder(
        #[case] keys: Vec<u32>,
        #[case] expected: Option<u64>,
        work_dir: tempfile::TempDir,
    ) {
        let path = work_dir.path().join("keys");
        io::write_keys_file(&path, &keys).unwrap();

        assert_eq!(first_disorder(&path).unwrap(), expected);
        assert_eq!(is_sorted(&path).unwrap(), expected.is_none());
    }

    #[rstest]
    fn test_first_disorder_across_batch_boundary(work_dir: tempfile::TempDir) {
        let path = work_dir.path().join("keys");

        // The dip sits on the first key of the second scan batch.
        let mut keys: Vec<u32> = (0..super::BATCH_KEYS as u32 + 100).collect();
        keys[super::BATCH_KEYS] = 0;
        io::write_keys_file(&path, &keys).unwrap();

        let expected = (super::BATCH_KEYS * 4) as u64;
        assert_eq!(first_disorder(&path).unwrap(), Some(expected));
    }

    #[rstest]
    fn test_first_disorder_rejects_misaligned_file(work_dir: tempfile::TempDir) {
        let path = work_dir.path().join("keys");
        fs::write(&path, [0u8; 6]).unwrap();

        assert!(matches!(
            first_disorder(&path),
            Err(SortError::InvalidFileSize { .. })
        ));
    }
}
