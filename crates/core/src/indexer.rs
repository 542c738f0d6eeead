use crate::source::Record;

/// Assigns a record to a partition in `[0, max_partitions)`.
///
/// Implementations must be pure: the same key always lands on the same
/// partition for a given `max_partitions`.
pub trait PointIndexer: Send + Sync {
    fn index(&self, record: &Record, max_partitions: usize) -> usize;
}

/// Everything goes to partition 0, i.e. a single writer that preserves input
/// order.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConstantIndexer;

impl PointIndexer for ConstantIndexer {
    fn index(&self, _record: &Record, _max_partitions: usize) -> usize {
        0
    }
}

/// CRC32 of the record key, so every series sticks to one worker.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashIndexer;

impl PointIndexer for HashIndexer {
    fn index(&self, record: &Record, max_partitions: usize) -> usize {
        if max_partitions <= 1 {
            return 0;
        }
        crc32fast::hash(record.key()) as usize % max_partitions
    }
}

#[cfg(test)]
#[path = "indexer_tests.rs"]
mod tests;
