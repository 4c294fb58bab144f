//! The renamed register file: A, D, and P classes with tag tracking.
//!
//! Every register carries its committed value, the tag of its most recent
//! in-flight write (`last_tag`), and a one-hot pending-tag set. The rename
//! stage:
//! 1. **Reads** each source: resolved with the committed value when no
//!    tags are pending, otherwise unresolved against `last_tag`.
//! 2. **Allocates** `last_tag + 1` for each destination; an already-pending
//!    successor tag is a whole-bundle stall, never a silent overwrite.
//! 3. **Applies** the result bus: a matching tag writes the value; a
//!    superseded tag only drains its pending bit (the value is dead,
//!    captured by whichever stations snooped it); `Force` entries bypass
//!    rename state entirely.
//!
//! Hardwired semantics: `A0` reads zero and drops writes, `D0` reads zero
//! but its writes are real emissions consumed by the send unit, `P0`
//! reads true.

use crate::amlet::bus::{ResultBus, WriteKind};
use crate::common::Word;
use crate::common::reg::{BReg, PredDst, PredSrc, RegTag, TaggedDst, TaggedSrc};

/// Rename state of one register.
#[derive(Clone, Copy, Debug, Default)]
struct RenameReg {
    value: Word,
    last_tag: RegTag,
    pending: u16,
}

impl RenameReg {
    fn can_allocate(&self, n_tags: u8) -> bool {
        self.pending & self.last_tag.next(n_tags).bit() == 0
    }

    fn allocate(&mut self, n_tags: u8) -> RegTag {
        let tag = self.last_tag.next(n_tags);
        debug_assert!(self.pending & tag.bit() == 0, "tag reallocated while pending");
        self.last_tag = tag;
        self.pending |= tag.bit();
        tag
    }
}

/// The per-lane renamed register file.
#[derive(Debug)]
pub struct RenameFile {
    a: Vec<RenameReg>,
    d: Vec<RenameReg>,
    p: Vec<RenameReg>,
    n_b_tags: u8,
    n_p_tags: u8,
    a_mask: u32,
    d_mask: u32,
}

impl RenameFile {
    /// Creates a zeroed file sized from the configuration.
    pub fn new(config: &crate::config::Config) -> Self {
        Self {
            a: vec![RenameReg::default(); config.amlet.n_a_regs],
            d: vec![RenameReg::default(); config.amlet.n_d_regs],
            p: vec![RenameReg::default(); config.amlet.n_p_regs],
            n_b_tags: config.n_b_tags(),
            n_p_tags: config.amlet.n_p_tags as u8,
            a_mask: config.a_mask(),
            d_mask: config.d_mask(),
        }
    }

    fn entry(&self, reg: BReg) -> &RenameReg {
        match reg {
            BReg::A(i) => &self.a[i as usize],
            BReg::D(i) => &self.d[i as usize],
        }
    }

    fn entry_mut(&mut self, reg: BReg) -> &mut RenameReg {
        match reg {
            BReg::A(i) => &mut self.a[i as usize],
            BReg::D(i) => &mut self.d[i as usize],
        }
    }

    /// Reads a B-space source. Hardwired zeros always resolve.
    pub fn read_b(&self, reg: BReg) -> TaggedSrc {
        if reg.reads_as_zero() {
            return TaggedSrc::resolved(reg, 0);
        }
        let entry = self.entry(reg);
        if entry.pending == 0 {
            TaggedSrc::resolved(reg, entry.value)
        } else {
            TaggedSrc::pending(reg, entry.last_tag)
        }
    }

    /// Reads a predicate source. `P0` always resolves true.
    pub fn read_p(&self, reg: u8) -> PredSrc {
        if reg == 0 {
            return PredSrc::always();
        }
        let entry = &self.p[reg as usize];
        if entry.pending == 0 {
            PredSrc::resolved(reg, entry.value != 0)
        } else {
            PredSrc::pending(reg, entry.last_tag)
        }
    }

    /// The committed value, ignoring rename state. Used to fill null
    /// drains so dependents of a masked write observe the old value.
    pub fn committed_b(&self, reg: BReg) -> Word {
        if reg.reads_as_zero() {
            0
        } else {
            self.entry(reg).value
        }
    }

    /// True if a tag can be allocated for this destination.
    pub fn can_allocate_b(&self, reg: BReg) -> bool {
        self.entry(reg).can_allocate(self.n_b_tags)
    }

    /// True if a predicate tag can be allocated for this destination.
    pub fn can_allocate_p(&self, reg: u8) -> bool {
        self.p[reg as usize].can_allocate(self.n_p_tags)
    }

    /// Allocates the next tag for a destination. Caller must have checked
    /// [`RenameFile::can_allocate_b`].
    pub fn allocate_b(&mut self, reg: BReg) -> TaggedDst {
        let n = self.n_b_tags;
        TaggedDst {
            reg,
            tag: self.entry_mut(reg).allocate(n),
        }
    }

    /// Allocates the next predicate tag. Caller must have checked
    /// [`RenameFile::can_allocate_p`].
    pub fn allocate_p(&mut self, reg: u8) -> PredDst {
        let n = self.n_p_tags;
        PredDst {
            reg,
            tag: self.p[reg as usize].allocate(n),
        }
    }

    /// Applies one result-bus snapshot.
    pub fn apply_bus(&mut self, bus: &ResultBus) {
        for write in &bus.b {
            let mask = match write.dst.reg {
                BReg::A(_) => self.a_mask,
                BReg::D(_) => self.d_mask,
            };
            let entry = self.entry_mut(write.dst.reg);
            match write.kind {
                WriteKind::Normal => {
                    if entry.last_tag == write.dst.tag {
                        entry.value = write.value & mask;
                    }
                    entry.pending &= !write.dst.tag.bit();
                }
                WriteKind::Null => {
                    entry.pending &= !write.dst.tag.bit();
                }
                WriteKind::Force => {
                    entry.value = write.value & mask;
                }
            }
            // A0 ignores the value; keeping the committed value at zero
            // keeps reads trivially correct.
            if write.dst.reg.is_hardwired_zero() {
                self.entry_mut(write.dst.reg).value = 0;
            }
        }
        for write in &bus.p {
            let entry = &mut self.p[write.dst.reg as usize];
            match write.kind {
                WriteKind::Normal => {
                    if entry.last_tag == write.dst.tag {
                        entry.value = Word::from(write.value);
                    }
                    entry.pending &= !write.dst.tag.bit();
                }
                WriteKind::Null => {
                    entry.pending &= !write.dst.tag.bit();
                }
                WriteKind::Force => {
                    entry.value = Word::from(write.value);
                }
            }
            if write.dst.reg == 0 {
                self.p[0].value = 0;
            }
        }
    }

    /// True when no write is in flight anywhere in the file.
    pub fn no_pending(&self) -> bool {
        self.a
            .iter()
            .chain(&self.d)
            .chain(&self.p)
            .all(|e| e.pending == 0)
    }

    /// Directly sets an A-register's committed value (test setup and
    /// lane-identity initialization; no rename state is touched).
    pub fn poke_a(&mut self, index: usize, value: Word) {
        self.a[index].value = value & self.a_mask;
    }

    /// Directly sets a D-register's committed value.
    pub fn poke_d(&mut self, index: usize, value: Word) {
        self.d[index].value = value & self.d_mask;
    }

    /// Directly sets a P-register's committed value.
    pub fn poke_p(&mut self, index: usize, value: bool) {
        self.p[index].value = Word::from(value);
    }

    /// Architectural A-register value, for end-of-run inspection.
    pub fn a_value(&self, index: usize) -> Word {
        if index == 0 { 0 } else { self.a[index].value }
    }

    /// Architectural D-register value, for end-of-run inspection.
    pub fn d_value(&self, index: usize) -> Word {
        if index == 0 { 0 } else { self.d[index].value }
    }

    /// Architectural P-register value, for end-of-run inspection.
    pub fn p_value(&self, index: usize) -> bool {
        if index == 0 {
            true
        } else {
            self.p[index].value != 0
        }
    }
}
