//! Binary heap merger.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::io::SequencedReader;
use crate::sort::SortError;
use crate::Key;

/// Merges multiple sorted key streams into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of keys,
/// *n* is the number of chunks (streams).
pub struct BinaryHeapMerger {
    // binary heap is max-heap by default so it is reversed into a min-heap
    items: BinaryHeap<(Reverse<Key>, usize)>,
    chunks: Vec<SequencedReader>,
    initiated: bool,
}

impl BinaryHeapMerger {
    /// Creates an instance of a binary heap merger using chunk readers as inputs.
    /// Chunk keys should be sorted in ascending order otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `chunks` - Chunk readers to be merged in a single sorted stream.
    pub fn new<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = SequencedReader>,
    {
        let chunks = Vec::from_iter(chunks);
        let items = BinaryHeap::with_capacity(chunks.len());

        return BinaryHeapMerger {
            chunks,
            items,
            initiated: false,
        };
    }

    /// Pushes the next key of chunk `idx` on the heap, if the chunk has one left.
    fn refill(&mut self, idx: usize) -> Result<(), SortError> {
        if let Some(key) = self.chunks[idx].read_key()? {
            self.items.push((Reverse(key), idx));
        }
        return Ok(());
    }
}

impl Iterator for BinaryHeapMerger {
    type Item = Result<Key, SortError>;

    /// Returns the next key from the inputs in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        if !self.initiated {
            for idx in 0..self.chunks.len() {
                if let Err(err) = self.refill(idx) {
                    return Some(Err(err));
                }
            }
            self.initiated = true;
        }

        let (Reverse(key), idx) = self.items.pop()?;
        if let Err(err) = self.refill(idx) {
            return Some(Err(err));
        }

        return Some(Ok(key));
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::BinaryHeapMerger;
    use crate::io::{self, SequencedReader};

    #[fixture]
    fn work_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[rstest]
    #[case(
        vec![],
        vec![],
    )]
    #[case(
        vec![
            vec![],
            vec![],
        ],
        vec![],
    )]
    #[case(
        vec![
            vec![4, 5, 7],
            vec![1, 6],
            vec![3],
            vec![],
        ],
        vec![1, 3, 4, 5, 6, 7],
    )]
    #[case(
        vec![
            vec![1, 1, 2],
            vec![1, 2, 2],
        ],
        vec![1, 1, 1, 2, 2, 2],
    )]
    #[case(
        vec![
            vec![0, u32::MAX],
            vec![42],
        ],
        vec![0, 42, u32::MAX],
    )]
    fn test_merger(
        #[case] chunks: Vec<Vec<u32>>,
        #[case] expected_result: Vec<u32>,
        work_dir: tempfile::TempDir,
    ) {
        let readers = Vec::from_iter(chunks.iter().enumerate().map(|(idx, keys)| {
            let path = work_dir.path().join(format!("chunk-{}", idx));
            io::write_keys_file(&path, keys).unwrap();
            SequencedReader::open(&path, 64).unwrap()
        }));

        let merger = BinaryHeapMerger::new(readers);
        let actual_result: Result<Vec<u32>, _> = merger.collect();

        assert_eq!(actual_result.unwrap(), expected_result);
    }

    #[rstest]
    fn test_merger_reports_truncated_chunk(work_dir: tempfile::TempDir) {
        let path = work_dir.path().join("chunk-0");
        std::fs::write(&path, [1u8, 0, 0, 0, 7]).unwrap();

        let reader = SequencedReader::open(&path, 64).unwrap();
        let result: Result<Vec<u32>, _> = BinaryHeapMerger::new([reader]).collect();

        assert!(result.is_err());
    }
}
