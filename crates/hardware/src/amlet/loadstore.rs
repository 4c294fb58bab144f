//! The load/store unit and per-lane data memory.
//!
//! Word-addressed, aligned, single-word accesses. A store commits to
//! memory in its issue cycle; a load reads in its issue cycle and emits
//! the result-bus entry one cycle later. Addresses wrap modulo the memory
//! depth.

use crate::amlet::bus::{BusWrite, WriteKind};
use crate::common::Word;
use crate::common::reg::TaggedDst;

/// Load/store unit with its backing data memory.
#[derive(Debug)]
pub struct LoadStoreUnit {
    mem: Vec<Word>,
    pending_load: Option<BusWrite>,
    /// Loads issued.
    pub loads: u64,
    /// Stores committed.
    pub stores: u64,
}

impl LoadStoreUnit {
    /// Creates the unit with a zeroed memory of `depth` words.
    pub fn new(depth: usize) -> Self {
        Self {
            mem: vec![0; depth],
            pending_load: None,
            loads: 0,
            stores: 0,
        }
    }

    /// True when a load can issue this cycle (the single read port is
    /// free).
    #[inline]
    pub fn ready(&self) -> bool {
        self.pending_load.is_none()
    }

    /// True when no load result is outstanding.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.pending_load.is_none()
    }

    /// Issues a load: the read happens now, the bus entry emerges next
    /// cycle.
    pub fn issue_load(&mut self, addr: u32, dst: TaggedDst) {
        debug_assert!(self.ready());
        self.loads += 1;
        let value = self.mem[addr as usize % self.mem.len()];
        self.pending_load = Some(BusWrite {
            dst,
            value,
            kind: WriteKind::Normal,
        });
    }

    /// Issues a store: memory commits this cycle.
    pub fn issue_store(&mut self, addr: u32, value: Word) {
        self.stores += 1;
        let len = self.mem.len();
        self.mem[addr as usize % len] = value;
    }

    /// Advances one cycle; returns the completed load, if any.
    pub fn tick(&mut self) -> Option<BusWrite> {
        self.pending_load.take()
    }

    /// Direct read for the test harness and end-of-run inspection.
    pub fn peek(&self, addr: u32) -> Word {
        self.mem[addr as usize % self.mem.len()]
    }

    /// Direct write for the test harness.
    pub fn poke(&mut self, addr: u32, value: Word) {
        let len = self.mem.len();
        self.mem[addr as usize % len] = value;
    }
}
