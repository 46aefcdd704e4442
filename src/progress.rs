// Progress reporting is a dependency injected into the engine, so the core
// stays free of terminal concerns; the CLI installs the only rendering
// implementation.

use crate::oracle::NetworkStatsSnapshot;

/// Snapshot emitted once per completed oracle call while probing a byte
/// position. Events stop the moment an offset's winner is committed, so a
/// sink never observes a stale failure for a finished byte.
#[derive(Debug, Clone, Copy)]
pub struct ByteAttempt<'a> {
    pub block_index: usize,
    pub byte_index: usize,
    pub offset: usize,
    pub candidate: u8,
    pub success: bool,
    /// The sequence being worked through: the ciphertext in decrypt mode,
    /// the forged ciphertext in encrypt mode.
    pub working: &'a [u8],
    pub found: &'a [u8],
    pub found_count: usize,
    pub block_size: usize,
    pub stats: NetworkStatsSnapshot,
}

pub trait ProgressSink: Send + Sync {
    fn attempt(&self, _attempt: &ByteAttempt<'_>) {}
    fn warning(&self, _message: &str) {}
}

/// Discards everything; the default sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {}
