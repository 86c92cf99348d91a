//! Balanced split sorting engine.
//!
//! Sorting runs in three phases over the source file:
//! 1. plan: stream the keys once and histogram their top bits, then balance the key space
//!    into partitions that fit the memory budget;
//! 2. split: stream the keys again and route each one to its partition. Single-prefix
//!    partitions are tallied by suffix; the rest are staged into per-partition scratch
//!    files by a dedicated writer thread that owns every file handle;
//! 3. merge: visit the partitions in key order, expand the tallies and radix-finish the
//!    staged files, appending everything to a staged destination that is published by an
//!    atomic rename.
//!
//! Stages live on scoped threads and talk only through the [`crate::queue`] channels. A
//! failing stage parks its error in a connected channel and unwinds as aborted; the
//! orchestrator reports the first concrete error after joining everything.

use std::fs;
use std::mem;
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;

use log;

use crate::balance::{self, PartitionKind, PartitionPlan, PrefixHistogram};
use crate::io::{self, SequencedReader, SequencedWriter};
use crate::queue::{ClosableQueue, Disconnected, SingleSlotHandoff};
use crate::radix;
use crate::sort::{scratch_dir, SortError, SortOptions, StagedOutput};
use crate::{Key, KEY_BYTES};

/// Keys per batch handed from the input reader to downstream stages.
const BATCH_KEYS: usize = 64 * 1024;
/// Bound of the reader-to-workers batch queue.
const SPLIT_QUEUE_DEPTH: usize = 4;
/// Largest per-partition buffer a split worker accumulates before hand-off.
const WORKER_FLUSH_KEYS: usize = 16 * 1024;
/// Smallest useful hand-off size when the plan has many partitions.
const MIN_FLUSH_KEYS: usize = 256;
/// Write buffer of one staging file; the writer holds one per radix partition.
const PARTITION_BUF_BYTES: usize = 64 * 1024;

type BatchHandoff = SingleSlotHandoff<Vec<Key>, SortError>;
type BatchQueue = ClosableQueue<Vec<Key>, SortError>;
type WriteQueue = ClosableQueue<WriteTask, SortError>;

/// A filled buffer bound for one radix partition's staging file.
struct WriteTask {
    /// Radix partition ordinal, fixed handle index on the writer side.
    file: usize,
    keys: Vec<Key>,
}

/// Sorts `src` into `dst` with the balanced split strategy.
pub(crate) fn sort(src: &Path, dst: &Path, opts: &SortOptions) -> Result<(), SortError> {
    let scratch = scratch_dir(dst, opts)?;
    let capacity = opts.capacity_keys();

    log::debug!("building the prefix histogram of {}", src.display());
    let plan = build_plan(src, capacity, opts)?;
    log::debug!(
        "partition plan ready: {} partitions ({} counted, {} staged) over {} keys",
        plan.partitions().len(),
        plan.count_partitions(),
        plan.radix_partitions(),
        plan.total(),
    );

    log::debug!("splitting {} into partition files", src.display());
    let outcome = run_split(src, &plan, scratch.path(), opts)?;

    log::debug!("merging {} partitions into {}", plan.partitions().len(), dst.display());
    merge_partitions(dst, &plan, outcome, opts)?;

    return Ok(());
}

/// Push side shared by the two channels the input reader can feed.
trait BatchSink {
    fn send(&self, batch: Vec<Key>) -> Result<(), Disconnected<SortError>>;
    fn close(&self);
    fn close_error(&self, error: SortError);
}

impl BatchSink for BatchHandoff {
    fn send(&self, batch: Vec<Key>) -> Result<(), Disconnected<SortError>> {
        return self.push(batch);
    }

    fn close(&self) {
        SingleSlotHandoff::close(self);
    }

    fn close_error(&self, error: SortError) {
        SingleSlotHandoff::close_error(self, error);
    }
}

impl BatchSink for BatchQueue {
    fn send(&self, batch: Vec<Key>) -> Result<(), Disconnected<SortError>> {
        return self.push(batch);
    }

    fn close(&self) {
        ClosableQueue::close(self);
    }

    fn close_error(&self, error: SortError) {
        ClosableQueue::close_error(self, error);
    }
}

fn open_source(src: &Path, rw_buf_size: usize) -> Result<SequencedReader, SortError> {
    let reader = SequencedReader::open(src, rw_buf_size)?;
    reader.check_aligned()?;
    return Ok(reader);
}

/// Streams the source file as key batches into `out`. Runs on its own thread in both the
/// plan and the split pass. On failure the channel is shut down in error mode, carrying
/// the root cause to whichever stage observes it first.
fn stream_source(src: &Path, out: &impl BatchSink, rw_buf_size: usize) -> Result<(), SortError> {
    let mut reader = match open_source(src, rw_buf_size) {
        Ok(reader) => reader,
        Err(error) => {
            out.close_error(error);
            return Err(SortError::Aborted);
        }
    };

    loop {
        let mut batch = Vec::with_capacity(BATCH_KEYS);
        match reader.read_batch(&mut batch, BATCH_KEYS) {
            Ok(true) => {}
            Ok(false) => {
                out.close();
                return Ok(());
            }
            Err(error) => {
                out.close_error(error);
                return Err(SortError::Aborted);
            }
        }

        if let Err(disconnected) = out.send(batch) {
            // A downstream stage shut the channel first and carries the root cause.
            return Err(disconnected.into_error().unwrap_or(SortError::Aborted));
        }
    }
}

/// Plan phase: histogram the source through a single-slot hand-off and balance it.
fn build_plan(src: &Path, capacity: u64, opts: &SortOptions) -> Result<PartitionPlan, SortError> {
    let handoff = BatchHandoff::new();
    let mut histogram = PrefixHistogram::new();

    thread::scope(|scope| {
        let feed = scope.spawn(|| stream_source(src, &handoff, opts.rw_buf_size));

        loop {
            match handoff.pop() {
                Ok(batch) => histogram.record_all(&batch),
                Err(Disconnected::Closed) => break,
                Err(disconnected) => {
                    return Err(disconnected.into_error().unwrap_or(SortError::Aborted));
                }
            }
        }

        match feed.join() {
            Ok(result) => return result,
            Err(payload) => panic::resume_unwind(payload),
        }
    })?;

    return Ok(histogram.build_plan(capacity));
}

fn zero_table() -> Box<[u64]> {
    return vec![0u64; balance::SUFFIX_COUNT].into_boxed_slice();
}

/// Shared suffix tallies, one slot per count partition, filled lazily.
type TallyVec = Vec<Option<Box<[u64]>>>;

/// Routes batches into suffix tallies and staged-file write tasks. One per worker thread;
/// all state except the final tally merge is worker-local.
struct SplitWorker<'a> {
    plan: &'a PartitionPlan,
    write_queue: &'a WriteQueue,
    /// Worker-local suffix tally per count partition, allocated on first use.
    tables: TallyVec,
    /// Pending keys per radix partition.
    buffers: Vec<Vec<Key>>,
    /// Buffer size that triggers a hand-off to the writer.
    flush_keys: usize,
}

impl<'a> SplitWorker<'a> {
    fn new(plan: &'a PartitionPlan, write_queue: &'a WriteQueue) -> Self {
        // Scale the hand-off size down when the plan is wide so the buffered total
        // stays near one batch regardless of the partition count.
        let flush_keys =
            (BATCH_KEYS / plan.radix_partitions().max(1)).clamp(MIN_FLUSH_KEYS, WORKER_FLUSH_KEYS);

        return SplitWorker {
            plan,
            write_queue,
            tables: vec![None; plan.count_partitions()],
            buffers: vec![Vec::new(); plan.radix_partitions()],
            flush_keys,
        };
    }

    fn run(mut self, batches: &BatchQueue, shared_tables: &Mutex<TallyVec>) -> Result<(), SortError> {
        loop {
            match batches.pop() {
                Ok(batch) => {
                    if let Err(error) = self.route_batch(&batch) {
                        batches.close_error(SortError::Aborted);
                        return Err(error);
                    }
                }
                Err(Disconnected::Closed) => break,
                Err(disconnected) => {
                    // The reader failed; stop the writer side as well and unwind.
                    self.write_queue.close_error(SortError::Aborted);
                    return Err(disconnected.into_error().unwrap_or(SortError::Aborted));
                }
            }
        }

        if let Err(error) = self.finish(shared_tables) {
            batches.close_error(SortError::Aborted);
            return Err(error);
        }
        return Ok(());
    }

    fn route_batch(&mut self, keys: &[Key]) -> Result<(), SortError> {
        for &key in keys {
            let ordinal = self.plan.locate(key);
            match self.plan.partitions()[ordinal].kind {
                PartitionKind::Count { table } => {
                    let tally = self.tables[table].get_or_insert_with(zero_table);
                    tally[balance::suffix_of(key)] += 1;
                }
                PartitionKind::Radix { file } => {
                    self.buffers[file].push(key);
                    if self.buffers[file].len() >= self.flush_keys {
                        self.flush(file)?;
                    }
                }
            }
        }
        return Ok(());
    }

    fn flush(&mut self, file: usize) -> Result<(), SortError> {
        let keys = mem::take(&mut self.buffers[file]);
        if keys.is_empty() {
            return Ok(());
        }

        if let Err(disconnected) = self.write_queue.push(WriteTask { file, keys }) {
            return Err(disconnected.into_error().unwrap_or(SortError::Aborted));
        }
        return Ok(());
    }

    /// Clean end of the batch stream: hand over buffered leftovers and merge the local
    /// tallies into the shared ones.
    fn finish(mut self, shared_tables: &Mutex<TallyVec>) -> Result<(), SortError> {
        for file in 0..self.buffers.len() {
            self.flush(file)?;
        }

        let mut shared = shared_tables.lock().unwrap();
        for (ordinal, local) in self.tables.drain(..).enumerate() {
            if let Some(local_table) = local {
                let shared_table = shared[ordinal].get_or_insert_with(zero_table);
                for (total, count) in shared_table.iter_mut().zip(local_table.iter()) {
                    *total += *count;
                }
            }
        }
        return Ok(());
    }
}

/// Writer stage: owns every staging-file handle, presizes each file to its expected
/// length and appends tasks in arrival order. Order inside a staging file does not
/// matter; the merge phase sorts it.
fn write_partitions(
    write_queue: &WriteQueue,
    plan: &PartitionPlan,
    files: &[PathBuf],
) -> Result<(), SortError> {
    let run = || -> Result<(), SortError> {
        let mut writers = Vec::with_capacity(files.len());
        for partition in plan.partitions() {
            if let PartitionKind::Radix { file } = partition.kind {
                debug_assert_eq!(file, writers.len());
                let mut writer = SequencedWriter::create(&files[file], PARTITION_BUF_BYTES)?;
                writer.resize(partition.count.saturating_mul(KEY_BYTES as u64))?;
                writers.push(writer);
            }
        }

        loop {
            match write_queue.pop() {
                Ok(task) => writers[task.file].write_keys(&task.keys)?,
                Err(Disconnected::Closed) => break,
                Err(disconnected) => {
                    return Err(disconnected.into_error().unwrap_or(SortError::Aborted));
                }
            }
        }

        for writer in writers {
            writer.finish()?;
        }
        return Ok(());
    };

    match run() {
        Ok(()) => return Ok(()),
        Err(SortError::Aborted) => return Err(SortError::Aborted),
        Err(error) => {
            // Producers must learn the root cause; if they are already gone the
            // orchestrator sweeps it out of the queue instead.
            write_queue.close_error(error);
            return Err(SortError::Aborted);
        }
    }
}

/// Per-partition artifacts produced by the split phase.
#[derive(Debug)]
struct SplitOutcome {
    /// Staging file per radix partition, in partition order.
    files: Vec<PathBuf>,
    /// Suffix tally per count partition, `None` when no key arrived.
    tables: TallyVec,
}

/// Split phase: one reader, `opts.threads` routing workers, one partition writer.
fn run_split(
    src: &Path,
    plan: &PartitionPlan,
    scratch: &Path,
    opts: &SortOptions,
) -> Result<SplitOutcome, SortError> {
    let files = Vec::from_iter(
        (0..plan.radix_partitions()).map(|file| scratch.join(format!("part-{}", file))),
    );
    let shared_tables: Mutex<TallyVec> = Mutex::new(vec![None; plan.count_partitions()]);
    let batches = BatchQueue::new(SPLIT_QUEUE_DEPTH);
    let write_queue = WriteQueue::new(opts.threads * 2);

    let joined = thread::scope(|scope| {
        let reader = scope.spawn(|| stream_source(src, &batches, opts.rw_buf_size));
        let workers = Vec::from_iter((0..opts.threads).map(|_| {
            scope.spawn(|| SplitWorker::new(plan, &write_queue).run(&batches, &shared_tables))
        }));
        let writer = scope.spawn(|| write_partitions(&write_queue, plan, &files));

        let mut joined = Vec::with_capacity(opts.threads + 2);
        joined.push(reader.join());
        for worker in workers {
            joined.push(worker.join());
        }
        // All producers are done; let the writer drain the tail and finish.
        write_queue.close();
        joined.push(writer.join());
        joined
    });

    let mut aborted = false;
    for result in joined {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(SortError::Aborted)) => aborted = true,
            Ok(Err(error)) => return Err(error),
            Err(payload) => panic::resume_unwind(payload),
        }
    }
    if aborted {
        // Every stage unwound on a marker; the root error is still parked in a channel.
        let root = batches.failure().or_else(|| write_queue.failure());
        return Err(root.unwrap_or(SortError::Aborted));
    }

    let tables = shared_tables.into_inner().unwrap();
    return Ok(SplitOutcome { files, tables });
}

/// Merge phase: finish the partitions in plan order into the staged destination.
fn merge_partitions(
    dst: &Path,
    plan: &PartitionPlan,
    outcome: SplitOutcome,
    opts: &SortOptions,
) -> Result<(), SortError> {
    let staged = StagedOutput::create(dst)?;
    let mut output = staged.writer(opts.rw_buf_size)?;
    output.resize(plan.total().saturating_mul(KEY_BYTES as u64))?;

    for partition in plan.partitions() {
        match partition.kind {
            PartitionKind::Count { table } => {
                log::debug!("expanding counted partition node {:#x}", partition.node);
                if let Some(table) = &outcome.tables[table] {
                    expand_tally(&mut output, partition.prefix(), table)?;
                }
            }
            PartitionKind::Radix { file } => {
                log::debug!("finishing staged partition node {:#x}", partition.node);
                finish_staged(&mut output, &outcome.files[file], partition.undecided_digits())?;
            }
        }
    }

    output.finish()?;
    return staged.publish();
}

/// Re-emits a tallied partition: each suffix in ascending order, repeated its count.
fn expand_tally(output: &mut SequencedWriter, prefix: usize, table: &[u64]) -> Result<(), SortError> {
    let base = (prefix as Key) << balance::SUFFIX_BITS;

    for (suffix, &repeats) in table.iter().enumerate() {
        let key = base | suffix as Key;
        for _ in 0..repeats {
            output.write_key(key)?;
        }
    }
    return Ok(());
}

/// Loads one staged partition, sorts its undecided digits, appends it and deletes the file.
fn finish_staged(output: &mut SequencedWriter, path: &Path, digits: usize) -> Result<(), SortError> {
    let mut keys = io::read_keys_file(path)?;
    if !radix::sort_slice(&mut keys, 0, digits) {
        return Err(SortError::OutOfMemory);
    }

    output.write_keys(&keys)?;
    fs::remove_file(path).map_err(|err| SortError::io(path, err))?;
    return Ok(());
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::Path;

    use rand::Rng;
    use rstest::*;

    use super::{build_plan, run_split, sort};
    use crate::io;
    use crate::sort::{SortError, SortOptions};

    #[fixture]
    fn work_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn small_opts(threads: usize) -> SortOptions {
        return SortOptions {
            memory_limit: 4096,
            threads,
            tmp_dir: None,
            rw_buf_size: 8192,
        };
    }

    fn write_random_keys(path: &Path, count: usize) -> Vec<u32> {
        let mut rng = rand::thread_rng();
        let keys = Vec::from_iter((0..count).map(|_| rng.gen()));
        io::write_keys_file(path, &keys).unwrap();
        return keys;
    }

    #[rstest]
    #[case(1)]
    #[case(4)]
    fn test_split_sort_mixed_hot_and_uniform(#[case] threads: usize, work_dir: tempfile::TempDir) {
        let src = work_dir.path().join("input");
        let dst = work_dir.path().join("output");

        let mut rng = rand::thread_rng();
        let mut keys = vec![0x17F3_9D42u32; 30_000];
        keys.extend((0..10_000).map(|_| rng.gen::<u32>()));
        io::write_keys_file(&src, &keys).unwrap();

        let mut opts = small_opts(threads);
        opts.tmp_dir = Some(work_dir.path().to_path_buf());
        sort(&src, &dst, &opts).unwrap();

        let mut expected = keys;
        expected.sort_unstable();
        assert_eq!(io::read_keys_file(&dst).unwrap(), expected);
    }

    #[rstest]
    fn test_plan_splits_input_larger_than_capacity(work_dir: tempfile::TempDir) {
        let src = work_dir.path().join("input");
        write_random_keys(&src, 50_000);

        let opts = small_opts(2);
        let plan = build_plan(&src, opts.capacity_keys(), &opts).unwrap();

        assert!(plan.partitions().len() >= 2);
        assert_eq!(plan.total(), 50_000);
        let expected: u64 = plan.partitions().iter().map(|partition| partition.count).sum();
        assert_eq!(expected, 50_000);
    }

    #[rstest]
    fn test_plan_rejects_misaligned_source(work_dir: tempfile::TempDir) {
        let src = work_dir.path().join("truncated");
        fs::write(&src, [1u8, 2, 3, 4, 5]).unwrap();

        let opts = small_opts(2);
        match build_plan(&src, opts.capacity_keys(), &opts) {
            Err(SortError::InvalidFileSize { path }) => assert_eq!(path, src),
            other => panic!("expected an invalid size error, got {:?}", other),
        }
    }

    #[rstest]
    fn test_writer_failure_unblocks_reader_and_workers(work_dir: tempfile::TempDir) {
        let src = work_dir.path().join("input");
        write_random_keys(&src, 200_000);

        // A regular file in place of the scratch directory makes every staging-file
        // creation fail, killing the writer stage while the reader is still streaming.
        let bogus_scratch = work_dir.path().join("not-a-directory");
        fs::write(&bogus_scratch, b"occupied").unwrap();

        let opts = small_opts(4);
        let plan = build_plan(&src, opts.capacity_keys(), &opts).unwrap();
        assert!(plan.radix_partitions() > 0);

        match run_split(&src, &plan, &bogus_scratch, &opts) {
            Err(SortError::Io { .. }) => {}
            other => panic!("expected the writer's I/O error, got {:?}", other),
        }
    }

    #[rstest]
    fn test_empty_source_sorts_to_empty_destination(work_dir: tempfile::TempDir) {
        let src = work_dir.path().join("empty");
        let dst = work_dir.path().join("out");
        io::write_keys_file(&src, &[]).unwrap();

        let mut opts = small_opts(2);
        opts.tmp_dir = Some(work_dir.path().to_path_buf());
        sort(&src, &dst, &opts).unwrap();

        assert_eq!(io::read_keys_file(&dst).unwrap(), Vec::<u32>::new());
    }
}
