//! VLIW bundles: the six-slot issue unit.

use crate::common::reg::RegRef;
use crate::isa::slots::{
    AluLiteSlot, AluSlot, ControlSlot, LoadStoreSlot, PacketSlot, PredicateSlot,
};

/// Identifies a slot position within a bundle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// Control flow (loops, halt).
    Control,
    /// Predicate ALU.
    Predicate,
    /// Packet send/receive.
    Packet,
    /// Narrow-width ALU.
    AluLite,
    /// Data memory access.
    LoadStore,
    /// Full-width ALU.
    Alu,
}

impl SlotKind {
    /// All slots in bundle-field order (the order slots are concatenated
    /// in the encoding and the order reads take logical precedence).
    pub const ALL: [Self; 6] = [
        Self::Control,
        Self::Predicate,
        Self::Packet,
        Self::AluLite,
        Self::LoadStore,
        Self::Alu,
    ];

    /// The order in which the rename stage chains per-slot state updates.
    ///
    /// A later slot in this order observes the tags allocated by earlier
    /// slots of the same bundle, so the dependency tracker only co-issues
    /// read-after-write pairs whose reader comes earlier here.
    pub const RENAME_ORDER: [Self; 6] = [
        Self::Control,
        Self::Predicate,
        Self::Packet,
        Self::LoadStore,
        Self::Alu,
        Self::AluLite,
    ];

    /// Position of this slot in [`SlotKind::RENAME_ORDER`].
    #[inline]
    pub fn rename_index(self) -> usize {
        Self::RENAME_ORDER
            .iter()
            .position(|k| *k == self)
            .unwrap_or(usize::MAX)
    }
}

/// One VLIW bundle: six parallel slots issued together.
///
/// The same type serves the Base and Expanded forms; expansion replaces
/// `Src::LoopIndex` arms and fills loop levels but leaves the shape alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Bundle {
    /// Control flow slot.
    pub control: ControlSlot,
    /// Predicate slot.
    pub predicate: PredicateSlot,
    /// Packet slot.
    pub packet: PacketSlot,
    /// Narrow ALU slot.
    pub alu_lite: AluLiteSlot,
    /// Memory slot.
    pub load_store: LoadStoreSlot,
    /// Full-width ALU slot.
    pub alu: AluSlot,
}

impl Bundle {
    /// True when every slot is empty.
    pub fn is_empty(&self) -> bool {
        matches!(self.control, ControlSlot::None)
            && matches!(self.predicate, PredicateSlot::None)
            && matches!(self.packet, PacketSlot::None)
            && matches!(self.alu_lite, AluLiteSlot::None)
            && matches!(self.load_store, LoadStoreSlot::None)
            && matches!(self.alu, AluSlot::None)
    }

    /// Registers read by the given slot.
    pub fn slot_reads(&self, kind: SlotKind, out: &mut Vec<RegRef>) {
        match kind {
            SlotKind::Control => self.control.reads(out),
            SlotKind::Predicate => self.predicate.reads(out),
            SlotKind::Packet => self.packet.reads(out),
            SlotKind::AluLite => self.alu_lite.reads(out),
            SlotKind::LoadStore => self.load_store.reads(out),
            SlotKind::Alu => self.alu.reads(out),
        }
    }

    /// Registers written by the given slot.
    pub fn slot_writes(&self, kind: SlotKind, out: &mut Vec<RegRef>) {
        match kind {
            SlotKind::Control => self.control.writes(out),
            SlotKind::Predicate => self.predicate.writes(out),
            SlotKind::Packet => self.packet.writes(out),
            SlotKind::AluLite => self.alu_lite.writes(out),
            SlotKind::LoadStore => self.load_store.writes(out),
            SlotKind::Alu => self.alu.writes(out),
        }
    }

    /// True when the given slot is empty.
    pub fn slot_is_none(&self, kind: SlotKind) -> bool {
        match kind {
            SlotKind::Control => matches!(self.control, ControlSlot::None),
            SlotKind::Predicate => matches!(self.predicate, PredicateSlot::None),
            SlotKind::Packet => matches!(self.packet, PacketSlot::None),
            SlotKind::AluLite => matches!(self.alu_lite, AluLiteSlot::None),
            SlotKind::LoadStore => matches!(self.load_store, LoadStoreSlot::None),
            SlotKind::Alu => matches!(self.alu, AluSlot::None),
        }
    }
}
