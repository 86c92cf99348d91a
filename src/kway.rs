//! K-way merge strategy: budget-sized sorted chunks merged through a binary heap.

use std::path::Path;

use log;
use rayon::prelude::*;

use crate::io::{SequencedReader, SequencedWriter};
use crate::merger::BinaryHeapMerger;
use crate::sort::{scratch_dir, SortError, SortOptions, StagedOutput};
use crate::{Key, KEY_BYTES};

pub(crate) fn sort(src: &Path, dst: &Path, opts: &SortOptions) -> Result<(), SortError> {
    let mut reader = SequencedReader::open(src, opts.rw_buf_size)?;
    reader.check_aligned()?;
    let total_bytes = reader.len();

    let tmp_dir = scratch_dir(dst, opts)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.threads)
        .build()
        .map_err(|err| SortError::ThreadPool(err))?;

    let capacity = opts.capacity_keys().min(usize::MAX as u64) as usize;
    let mut chunk: Vec<Key> = Vec::new();
    if chunk.try_reserve_exact(capacity).is_err() {
        return Err(SortError::OutOfMemory);
    }

    let mut chunks = Vec::new();
    while reader.read_batch(&mut chunk, capacity)? {
        pool.install(|| chunk.par_sort_unstable());

        let path = tmp_dir.path().join(format!("chunk-{}", chunks.len()));
        let mut writer = SequencedWriter::create(&path, opts.rw_buf_size)?;
        writer.resize((chunk.len() * KEY_BYTES) as u64)?;
        writer.write_keys(&chunk)?;
        writer.finish()?;

        log::debug!("chunk {} staged with {} keys", chunks.len(), chunk.len());
        chunks.push(path);
    }
    drop(chunk);

    // Many chunks share the read budget on the way back.
    let merge_buf_size = (opts.rw_buf_size / chunks.len().max(1)).max(4 * 1024);
    let readers = chunks
        .iter()
        .map(|path| SequencedReader::open(path, merge_buf_size))
        .collect::<Result<Vec<_>, SortError>>()?;

    log::debug!("merging {} chunks", readers.len());

    let staged = StagedOutput::create(dst)?;
    let mut writer = staged.writer(opts.rw_buf_size)?;
    writer.resize(total_bytes)?;
    for key in BinaryHeapMerger::new(readers) {
        writer.write_key(key?)?;
    }
    writer.finish()?;

    return staged.publish();
}

#[cfg(test)]
mod test {
    use rand::Rng;
    use rstest::*;

    use super::sort;
    use crate::io;
    use crate::sort::SortOptions;

    #[fixture]
    fn work_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn small_opts(work_dir: &tempfile::TempDir) -> SortOptions {
        return SortOptions {
            memory_limit: 4096,
            threads: 2,
            tmp_dir: Some(work_dir.path().to_path_buf()),
            rw_buf_size: 8192,
        };
    }

    #[rstest]
    #[case(10_000)]
    // An exact multiple of the 256-key chunk capacity.
    #[case(512)]
    #[case(0)]
    fn test_sort_spills_chunks_and_merges(#[case] count: usize, work_dir: tempfile::TempDir) {
        let src = work_dir.path().join("input");
        let dst = work_dir.path().join("output");

        let mut rng = rand::thread_rng();
        let keys: Vec<u32> = Vec::from_iter((0..count).map(|_| rng.gen()));
        io::write_keys_file(&src, &keys).unwrap();

        sort(&src, &dst, &small_opts(&work_dir)).unwrap();

        let mut expected = keys;
        expected.sort_unstable();
        assert_eq!(io::read_keys_file(&dst).unwrap(), expected);
    }
}
