//! The dependency tracker: per-slot shuffle between controller and lanes.
//!
//! Six fixed-capacity FIFOs, one per slot type, with a shared age counter.
//! Each cycle the tracker proposes a bundle by choosing, per FIFO, either
//! "forward the head" or "leave the slot empty", subject to:
//!
//! - **WAW** on the same physical register: the younger slot waits.
//!   `A0`/`P0` are exempt (writes discarded); `D0` is **not** — its write
//!   order is the packet payload order.
//! - **RAW**: a slot may not be emitted before, or alongside-but-after, a
//!   buffered older write it reads. Reads of hardwired zeros are exempt.
//! - **WAR**: a younger writer waits for a buffered older reader, unless
//!   both land in the same emitted bundle with the reader earlier in the
//!   rename chain — the reader then renames against the old tag before
//!   the writer allocates.
//!
//! The emitted bundle therefore satisfies the lanes' contract: within a
//! bundle every read happens before every write, and no two slots write
//! the same register. Empty slots are dropped at ingress, never buffered.
//!
//! Age ordering: instructions from the same ingress bundle share an age
//! and are ordered by their position in the rename chain.

use std::collections::VecDeque;

use crate::common::reg::RegRef;
use crate::isa::bundle::{Bundle, SlotKind};

/// One buffered slot instruction.
#[derive(Clone, Debug)]
struct Tracked {
    age: u64,
    /// The slot content, carried inside an otherwise-empty bundle.
    slot: Bundle,
    kind: SlotKind,
    reads: Vec<RegRef>,
    writes: Vec<RegRef>,
}

impl Tracked {
    /// Ordering key: age, then rename-chain position.
    fn order(&self) -> (u64, usize) {
        (self.age, self.kind.rename_index())
    }
}

fn effective_reads(refs: &[RegRef]) -> impl Iterator<Item = RegRef> + '_ {
    refs.iter().copied().filter(|r| !r.read_is_constant())
}

fn effective_writes(refs: &[RegRef]) -> impl Iterator<Item = RegRef> + '_ {
    refs.iter().copied().filter(|r| !r.write_is_discarded())
}

fn overlaps(a: impl Iterator<Item = RegRef>, b: &[RegRef], b_writes: bool) -> bool {
    let b: Vec<RegRef> = if b_writes {
        effective_writes(b).collect()
    } else {
        effective_reads(b).collect()
    };
    a.into_iter().any(|r| b.contains(&r))
}

/// A proposed bundle emission, held until the lanes accept it.
#[derive(Debug)]
pub struct Proposal {
    /// The assembled bundle.
    pub bundle: Bundle,
    /// FIFOs whose heads were taken.
    selected: Vec<SlotKind>,
}

/// The per-slot shuffling buffer.
#[derive(Debug)]
pub struct DependencyTracker {
    fifos: [VecDeque<Tracked>; 6],
    capacity: usize,
    next_age: u64,
}

impl DependencyTracker {
    /// Creates the tracker with per-slot FIFO `capacity`.
    pub fn new(capacity: usize) -> Self {
        Self {
            fifos: std::array::from_fn(|_| VecDeque::with_capacity(capacity)),
            capacity,
            next_age: 0,
        }
    }

    /// True when an expanded bundle can be buffered this cycle.
    pub fn ingress_ready(&self) -> bool {
        self.fifos.iter().all(|f| f.len() < self.capacity)
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.fifos.iter().all(VecDeque::is_empty)
    }

    /// Buffers one expanded bundle; empty slots are dropped.
    pub fn push(&mut self, bundle: &Bundle) {
        debug_assert!(self.ingress_ready());
        let age = self.next_age;
        self.next_age += 1;
        for (idx, kind) in SlotKind::ALL.into_iter().enumerate() {
            if bundle.slot_is_none(kind) {
                continue;
            }
            let mut slot = Bundle::default();
            copy_slot(&mut slot, bundle, kind);
            let mut reads = Vec::new();
            let mut writes = Vec::new();
            bundle.slot_reads(kind, &mut reads);
            bundle.slot_writes(kind, &mut writes);
            self.fifos[idx].push_back(Tracked {
                age,
                slot,
                kind,
                reads,
                writes,
            });
        }
    }

    /// Proposes the bundle to emit this cycle, or `None` when no head can
    /// issue. The proposal leaves the FIFOs untouched; call
    /// [`DependencyTracker::commit`] once every lane has accepted.
    pub fn propose(&self) -> Option<Proposal> {
        // Candidate heads, processed oldest-first so a selected younger
        // slot can never starve an older one.
        let mut heads: Vec<&Tracked> = self.fifos.iter().filter_map(VecDeque::front).collect();
        heads.sort_by_key(|t| t.order());

        let mut selected: Vec<&Tracked> = Vec::new();
        for head in heads {
            if self.blocked_by_older(head, &selected) {
                continue;
            }
            // Selected entries are all ordered before this head, so each
            // pair is (older, younger).
            if selected.iter().any(|older| !coissue_ok(older, head)) {
                continue;
            }
            selected.push(head);
        }
        if selected.is_empty() {
            return None;
        }
        let mut bundle = Bundle::default();
        let mut kinds = Vec::with_capacity(selected.len());
        for tracked in selected {
            copy_slot(&mut bundle, &tracked.slot, tracked.kind);
            kinds.push(tracked.kind);
        }
        Some(Proposal {
            bundle,
            selected: kinds,
        })
    }

    /// Pops the heads taken by an accepted proposal.
    pub fn commit(&mut self, proposal: &Proposal) {
        for kind in &proposal.selected {
            let idx = SlotKind::ALL
                .iter()
                .position(|k| k == kind)
                .unwrap_or_else(|| unreachable!());
            let _ = self.fifos[idx].pop_front();
        }
    }

    /// True when `head` conflicts with any strictly older buffered
    /// instruction that is not being emitted alongside it.
    fn blocked_by_older(&self, head: &Tracked, selected: &[&Tracked]) -> bool {
        for fifo in &self.fifos {
            for entry in fifo {
                if entry.order() >= head.order() {
                    continue;
                }
                if selected
                    .iter()
                    .any(|s| std::ptr::eq::<Tracked>(*s, entry))
                {
                    // Same emitted bundle: the pairwise co-issue check
                    // governs instead.
                    continue;
                }
                // WAW, RAW, or WAR against an older instruction that
                // stays buffered: wait for it to drain first.
                if overlaps(effective_writes(&head.writes), &entry.writes, true)
                    || overlaps(effective_reads(&head.reads), &entry.writes, true)
                    || overlaps(effective_writes(&head.writes), &entry.reads, false)
                {
                    return true;
                }
            }
        }
        false
    }
}

/// Copies one slot field from `src` into `dst`.
fn copy_slot(dst: &mut Bundle, src: &Bundle, kind: SlotKind) {
    match kind {
        SlotKind::Control => dst.control = src.control,
        SlotKind::Predicate => dst.predicate = src.predicate,
        SlotKind::Packet => dst.packet = src.packet,
        SlotKind::AluLite => dst.alu_lite = src.alu_lite,
        SlotKind::LoadStore => dst.load_store = src.load_store,
        SlotKind::Alu => dst.alu = src.alu,
    }
}

/// Checks the emitted-bundle contract for an age-ordered pair. Returns
/// false when the pair cannot share a bundle.
fn coissue_ok(older: &Tracked, younger: &Tracked) -> bool {
    // No two slots may write the same register.
    if overlaps(effective_writes(&older.writes), &younger.writes, true) {
        return false;
    }
    // The younger side reading the older's write needs the value off the
    // bus; it can never share the writer's bundle.
    if overlaps(effective_reads(&younger.reads), &older.writes, true) {
        return false;
    }
    // Write-after-read shares a bundle only when the older reader renames
    // before the younger writer allocates its new tag.
    if overlaps(effective_writes(&younger.writes), &older.reads, false)
        && older.kind.rename_index() >= younger.kind.rename_index()
    {
        return false;
    }
    true
}
