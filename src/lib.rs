//! `splitsort` sorts huge flat files of unsigned 32-bit keys under a bounded memory budget.
//!
//! A key file is a raw sequence of native-byte-order `u32` records with no header or framing;
//! its byte length must be a multiple of the record width. Files are sorted out-of-core: the
//! default strategy samples the distribution of the top 16 key bits in one streaming pass,
//! balances the key space into partitions small enough to finish in memory, splits the records
//! into per-partition staging files on a second pass, then concatenates the finished partitions
//! in key order. The destination is replaced atomically and only on full success, so sorting a
//! file onto itself is safe.
//!
//! # Overview
//!
//! * **Balanced split sorting:**
//!   the default [`Strategy::BalancedSplit`] builds a partition plan over a prefix trie of the
//!   key space, so heavily skewed inputs still produce partitions that respect the memory limit.
//!   Runs of a single duplicated key degenerate into counting, not copying.
//! * **Alternative strategies:**
//!   [`Strategy::KWayMerge`] (sorted chunks merged through a binary heap) and
//!   [`Strategy::InMemory`] (whole file at once) share the same engine contract.
//! * **Bounded memory:**
//!   the memory limit is plain runtime configuration; partition and chunk capacities are derived
//!   from it. Scratch allocation failures are reported as [`SortError::OutOfMemory`], not panics.
//! * **Multithreading support:**
//!   splitting routes keys on several worker threads connected by the bounded channels in
//!   [`queue`]; chunk sorting for the k-way strategy runs on a `rayon` pool.
//!
//! # Example
//!
//! ```no_run
//! use std::path;
//!
//! use splitsort::{SorterBuilder, Strategy};
//!
//! fn main() {
//!     let sorter = SorterBuilder::new()
//!         .with_strategy(Strategy::BalancedSplit)
//!         .with_memory_limit(64 * 1024 * 1024)
//!         .with_threads_number(4)
//!         .build();
//!
//!     sorter
//!         .sort(path::Path::new("keys.bin"), path::Path::new("keys.sorted.bin"))
//!         .unwrap();
//! }
//! ```

pub mod balance;
pub mod check;
#[cfg(feature = "rand")]
pub mod generate;
pub mod io;
pub mod merger;
pub mod queue;
pub mod radix;
pub mod sort;
pub mod text;

mod kway;
mod split;

pub use merger::BinaryHeapMerger;
pub use queue::{ClosableQueue, Disconnected, SingleSlotHandoff};
pub use sort::{sort, SortError, Sorter, SorterBuilder, Strategy};

/// Record type of the key files sorted by this crate.
pub type Key = u32;

/// On-disk width of one key in bytes.
pub const KEY_BYTES: usize = std::mem::size_of::<Key>();
