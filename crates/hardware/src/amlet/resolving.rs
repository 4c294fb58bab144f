//! Resolving-form instructions: the shapes held in reservation stations.
//!
//! After rename every source is a tagged reference (possibly unresolved)
//! and every destination carries an allocated tag. Station slots snoop the
//! result bus each cycle, capturing values for any source whose `(reg,
//! tag)` matches an entry; once all sources are resolved the slot is a
//! candidate for issue.

use crate::common::reg::{PredDst, PredSrc, TaggedDst, TaggedSrc};
use crate::isa::slots::{AluOp, CmpOp};

use super::bus::ResultBus;

/// Destination tags to drain when a masked slot is removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainTarget {
    /// B-space destination.
    B(TaggedDst),
    /// P-space destination.
    P(PredDst),
}

/// Behavior common to every reservation-station slot shape.
pub trait StationEntry {
    /// Captures any sources resolved by this cycle's bus snapshot.
    fn capture(&mut self, bus: &ResultBus);

    /// True when every data source is resolved (predicate excluded).
    fn sources_resolved(&self) -> bool;

    /// The masking predicate.
    fn predicate(&self) -> &PredSrc;

    /// Destination tags this slot holds (drained on masking).
    fn drain_targets(&self, out: &mut Vec<DrainTarget>);
}

fn capture_src(src: &mut TaggedSrc, bus: &ResultBus) {
    if let (Some(reg), Some(tag)) = (src.reg, src.tag) {
        if let Some(entry) = bus.match_b(reg, tag) {
            src.value = entry.value;
            src.tag = None;
        }
    }
}

fn capture_pred(pred: &mut PredSrc, bus: &ResultBus) {
    if let Some(tag) = pred.tag {
        if let Some(entry) = bus.match_p(pred.reg, tag) {
            pred.value = entry.value;
            pred.tag = None;
        }
    }
}

/// A renamed ALU or ALULite operation.
#[derive(Clone, Copy, Debug)]
pub struct RsAlu {
    /// Operation.
    pub op: AluOp,
    /// Left operand.
    pub src1: TaggedSrc,
    /// Right operand.
    pub src2: TaggedSrc,
    /// Destination.
    pub dst: TaggedDst,
    /// Masking predicate.
    pub predicate: PredSrc,
}

impl StationEntry for RsAlu {
    fn capture(&mut self, bus: &ResultBus) {
        capture_src(&mut self.src1, bus);
        capture_src(&mut self.src2, bus);
        capture_pred(&mut self.predicate, bus);
    }

    fn sources_resolved(&self) -> bool {
        self.src1.is_resolved() && self.src2.is_resolved()
    }

    fn predicate(&self) -> &PredSrc {
        &self.predicate
    }

    fn drain_targets(&self, out: &mut Vec<DrainTarget>) {
        out.push(DrainTarget::B(self.dst));
    }
}

/// A renamed predicate-ALU comparison.
///
/// The base predicate is a data input (it is ANDed into the result), not a
/// mask: a false base writes `false`, it does not squash the write.
#[derive(Clone, Copy, Debug)]
pub struct RsPredicate {
    /// Comparison operation.
    pub op: CmpOp,
    /// Left operand.
    pub src1: TaggedSrc,
    /// Right operand.
    pub src2: TaggedSrc,
    /// Base predicate ANDed into the result.
    pub base: PredSrc,
    /// Destination predicate.
    pub dst: PredDst,
}

impl StationEntry for RsPredicate {
    fn capture(&mut self, bus: &ResultBus) {
        capture_src(&mut self.src1, bus);
        capture_src(&mut self.src2, bus);
        capture_pred(&mut self.base, bus);
    }

    fn sources_resolved(&self) -> bool {
        self.src1.is_resolved() && self.src2.is_resolved() && self.base.is_resolved()
    }

    fn predicate(&self) -> &PredSrc {
        // The base is consumed as data; the slot itself is never masked.
        const ALWAYS: PredSrc = PredSrc {
            reg: 0,
            tag: None,
            value: true,
        };
        &ALWAYS
    }

    fn drain_targets(&self, out: &mut Vec<DrainTarget>) {
        out.push(DrainTarget::P(self.dst));
    }
}

/// Memory operation kind with its operand.
#[derive(Clone, Copy, Debug)]
pub enum RsMemOp {
    /// Load into a destination register.
    Load {
        /// Destination.
        dst: TaggedDst,
    },
    /// Store a register value.
    Store {
        /// Value to store.
        data: TaggedSrc,
    },
}

/// A renamed load or store.
#[derive(Clone, Copy, Debug)]
pub struct RsMem {
    /// Base address register.
    pub base: TaggedSrc,
    /// Word offset.
    pub offset: u16,
    /// Load/store specifics.
    pub op: RsMemOp,
    /// Masking predicate.
    pub predicate: PredSrc,
}

impl RsMem {
    /// The effective word address once the base is resolved.
    pub fn address(&self) -> Option<u32> {
        if self.base.is_resolved() {
            Some(self.base.value.wrapping_add(u32::from(self.offset)))
        } else {
            None
        }
    }

    /// True for stores.
    #[inline]
    pub fn is_store(&self) -> bool {
        matches!(self.op, RsMemOp::Store { .. })
    }
}

impl StationEntry for RsMem {
    fn capture(&mut self, bus: &ResultBus) {
        capture_src(&mut self.base, bus);
        if let RsMemOp::Store { data } = &mut self.op {
            capture_src(data, bus);
        }
        capture_pred(&mut self.predicate, bus);
    }

    fn sources_resolved(&self) -> bool {
        let data_ok = match &self.op {
            RsMemOp::Load { .. } => true,
            RsMemOp::Store { data } => data.is_resolved(),
        };
        self.base.is_resolved() && data_ok
    }

    fn predicate(&self) -> &PredSrc {
        &self.predicate
    }

    fn drain_targets(&self, out: &mut Vec<DrainTarget>) {
        if let RsMemOp::Load { dst } = &self.op {
            out.push(DrainTarget::B(*dst));
        }
    }
}

/// A renamed packet send.
#[derive(Clone, Copy, Debug)]
pub struct RsSend {
    /// Payload length.
    pub length: TaggedSrc,
    /// Destination column.
    pub x_dest: TaggedSrc,
    /// Destination row.
    pub y_dest: TaggedSrc,
    /// Virtual channel.
    pub channel: u8,
    /// Request a forward directive at the destination.
    pub forward: bool,
    /// Feed a pending append binding instead of opening a packet.
    pub append: bool,
    /// Broadcast delivery.
    pub broadcast: bool,
    /// Masking predicate.
    pub predicate: PredSrc,
}

impl StationEntry for RsSend {
    fn capture(&mut self, bus: &ResultBus) {
        capture_src(&mut self.length, bus);
        capture_src(&mut self.x_dest, bus);
        capture_src(&mut self.y_dest, bus);
        capture_pred(&mut self.predicate, bus);
    }

    fn sources_resolved(&self) -> bool {
        self.length.is_resolved() && self.x_dest.is_resolved() && self.y_dest.is_resolved()
    }

    fn predicate(&self) -> &PredSrc {
        &self.predicate
    }

    fn drain_targets(&self, _out: &mut Vec<DrainTarget>) {}
}

/// Resolved forward request attached to a receive.
#[derive(Clone, Copy, Debug)]
pub struct RsForward {
    /// Onward destination column.
    pub x_dest: TaggedSrc,
    /// Onward destination row.
    pub y_dest: TaggedSrc,
    /// Append local payload to the forwarded packet.
    pub append: bool,
    /// Number of appended words.
    pub append_len: u8,
}

/// Receive operation kind.
#[derive(Clone, Copy, Debug)]
pub enum RsRecvOp {
    /// Consume a header; write its length.
    Header {
        /// Length destination.
        dst: TaggedDst,
        /// Optional forward request.
        forward: Option<RsForward>,
    },
    /// Consume one payload word.
    GetWord {
        /// Word destination.
        dst: TaggedDst,
    },
}

/// A renamed packet receive.
#[derive(Clone, Copy, Debug)]
pub struct RsRecv {
    /// Operation kind.
    pub op: RsRecvOp,
    /// Virtual channel.
    pub channel: u8,
    /// Masking predicate.
    pub predicate: PredSrc,
}

impl StationEntry for RsRecv {
    fn capture(&mut self, bus: &ResultBus) {
        if let RsRecvOp::Header {
            forward: Some(f), ..
        } = &mut self.op
        {
            capture_src(&mut f.x_dest, bus);
            capture_src(&mut f.y_dest, bus);
        }
        capture_pred(&mut self.predicate, bus);
    }

    fn sources_resolved(&self) -> bool {
        match &self.op {
            RsRecvOp::Header {
                forward: Some(f), ..
            } => f.x_dest.is_resolved() && f.y_dest.is_resolved(),
            RsRecvOp::Header { forward: None, .. } | RsRecvOp::GetWord { .. } => true,
        }
    }

    fn predicate(&self) -> &PredSrc {
        &self.predicate
    }

    fn drain_targets(&self, out: &mut Vec<DrainTarget>) {
        match &self.op {
            RsRecvOp::Header { dst, .. } | RsRecvOp::GetWord { dst } => {
                out.push(DrainTarget::B(*dst));
            }
        }
    }
}
