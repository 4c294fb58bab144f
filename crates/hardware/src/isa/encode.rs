//! Bit-level bundle codec.
//!
//! A bundle encodes as the concatenation of six 32-bit slot words, one per
//! slot in [`SlotKind::ALL`] order. Instruction memory stores these words;
//! command packets deliver them six at a time. The layouts below are
//! LSB-first; unused high bits are zero. Base-form fields round-trip
//! exactly (loop nest levels are a controller-expansion artifact and are
//! not encoded).
//!
//! Slot word layouts:
//!
//! ```text
//! control:   [2:0] op | [10:3] arg | [18:11] body_len | [19] dst? | [23:20] dst
//! predicate: [2:0] op | [6:3] src1 | [7] s2 mode | [15:8] s2 | [19:16] base | [23:20] dst
//! packet:    [2:0] op | [7:3] reg | [8] len mode | [13:9] len | [14] x mode |
//!            [18:15] x | [19] y mode | [23:20] y | [25:24] ch | [26] append |
//!            [27] bcast | [31:28] pred
//! alu/lite:  [4:0] op | [9:5] src1 | [11:10] s2 mode | [19:12] s2 | [24:20] dst |
//!            [28:25] pred
//! loadstore: [1:0] op | [5:2] base | [13:6] offset | [18:14] reg | [22:19] pred
//! ```

use crate::common::error::ModelError;
use crate::common::reg::BReg;
use crate::isa::bundle::{Bundle, SlotKind};
use crate::isa::slots::{
    AluInstr, AluLiteSlot, AluOp, AluSlot, CmpOp, ControlSlot, ForwardSpec, GetWordInstr,
    LoadInstr, LoadStoreSlot, LoopCount, LoopInstr, PacketSlot, PredicateInstr, PredicateSlot,
    ReceiveInstr, SendInstr, Src, StoreInstr,
};

/// One encoded bundle: six slot words in [`SlotKind::ALL`] order.
pub type EncodedBundle = [u32; 6];

/// Number of 32-bit words per encoded bundle.
pub const WORDS_PER_BUNDLE: usize = 6;

/// B-register index bits in slot encodings (4 index bits + 1 class bit).
const B_INDEX_BITS: u32 = 4;

#[inline]
fn field(word: u32, lo: u32, bits: u32) -> u32 {
    (word >> lo) & ((1 << bits) - 1)
}

#[inline]
fn put(word: &mut u32, lo: u32, bits: u32, value: u32) {
    debug_assert!(value < (1 << bits), "field overflow: {value} in {bits} bits");
    *word |= (value & ((1 << bits) - 1)) << lo;
}

// B-space Src: 2-bit mode (0 = register, 1 = immediate, 2 = loop index)
// plus an 8-bit value field.
fn encode_bsrc(word: &mut u32, mode_lo: u32, val_lo: u32, src: Src) {
    match src {
        Src::Reg(r) => {
            put(word, mode_lo, 2, 0);
            put(word, val_lo, 8, u32::from(r.encode(B_INDEX_BITS)));
        }
        Src::Imm(v) => {
            put(word, mode_lo, 2, 1);
            put(word, val_lo, 8, u32::from(v));
        }
        Src::LoopIndex(l) => {
            put(word, mode_lo, 2, 2);
            put(word, val_lo, 8, u32::from(l));
        }
    }
}

fn decode_bsrc(word: u32, mode_lo: u32, val_lo: u32, slot: usize) -> Result<Src, ModelError> {
    let val = field(word, val_lo, 8);
    match field(word, mode_lo, 2) {
        0 => Ok(Src::Reg(BReg::decode(val as u16, B_INDEX_BITS))),
        1 => Ok(Src::Imm(val as u16)),
        2 => Ok(Src::LoopIndex(val as u8)),
        _ => Err(ModelError::InvalidSlotEncoding { slot, word }),
    }
}

// A-space Src: 1-bit mode (0 = A-register, 1 = immediate) plus a value
// field of the given width.
fn encode_asrc(word: &mut u32, mode_lo: u32, val_lo: u32, val_bits: u32, src: Src) {
    match src {
        Src::Reg(r) => {
            debug_assert!(matches!(r, BReg::A(_)), "A-space field with D-register");
            put(word, val_lo, val_bits, u32::from(r.index()));
        }
        Src::Imm(v) => {
            put(word, mode_lo, 1, 1);
            put(word, val_lo, val_bits, u32::from(v));
        }
        Src::LoopIndex(_) => unreachable!("loop indices are substituted before encoding"),
    }
}

fn decode_asrc(word: u32, mode_lo: u32, val_lo: u32, val_bits: u32) -> Src {
    let val = field(word, val_lo, val_bits);
    if field(word, mode_lo, 1) == 0 {
        Src::Reg(BReg::A((val & 0xF) as u8))
    } else {
        Src::Imm(val as u16)
    }
}

fn encode_control(slot: &ControlSlot) -> u32 {
    let mut w = 0;
    match slot {
        ControlSlot::None => {}
        ControlSlot::Loop(l) => {
            let (op, arg) = match l.count {
                LoopCount::Immediate(n) => (1, u32::from(n)),
                LoopCount::Local(a) => (2, u32::from(a)),
                LoopCount::Global(g) => (3, u32::from(g)),
            };
            put(&mut w, 0, 3, op);
            put(&mut w, 3, 8, arg);
            put(&mut w, 11, 8, u32::from(l.body_len));
            if let Some(d) = l.dst {
                put(&mut w, 19, 1, 1);
                put(&mut w, 20, 4, u32::from(d));
            }
        }
        ControlSlot::Incr { level, dst } => {
            put(&mut w, 0, 3, 4);
            put(&mut w, 3, 8, u32::from(*level));
            if let Some(d) = dst {
                put(&mut w, 19, 1, 1);
                put(&mut w, 20, 4, u32::from(*d));
            }
        }
        ControlSlot::Halt => put(&mut w, 0, 3, 5),
    }
    w
}

fn decode_control(w: u32) -> Result<ControlSlot, ModelError> {
    let dst = if field(w, 19, 1) == 1 {
        Some(field(w, 20, 4) as u8)
    } else {
        None
    };
    let arg = field(w, 3, 8);
    let body_len = field(w, 11, 8) as u16;
    let count = match field(w, 0, 3) {
        0 => return Ok(ControlSlot::None),
        1 => LoopCount::Immediate(arg as u16),
        2 => LoopCount::Local(arg as u8),
        3 => LoopCount::Global(arg as u8),
        4 => {
            return Ok(ControlSlot::Incr {
                level: arg as u8,
                dst,
            });
        }
        5 => return Ok(ControlSlot::Halt),
        _ => return Err(ModelError::InvalidSlotEncoding { slot: 0, word: w }),
    };
    Ok(ControlSlot::Loop(LoopInstr {
        count,
        body_len,
        dst,
        level: 0,
    }))
}

fn cmp_op_code(op: CmpOp) -> u32 {
    match op {
        CmpOp::Eq => 1,
        CmpOp::Ne => 2,
        CmpOp::Lt => 3,
        CmpOp::Le => 4,
        CmpOp::Gt => 5,
        CmpOp::Ge => 6,
    }
}

fn cmp_op_decode(code: u32) -> Option<CmpOp> {
    Some(match code {
        1 => CmpOp::Eq,
        2 => CmpOp::Ne,
        3 => CmpOp::Lt,
        4 => CmpOp::Le,
        5 => CmpOp::Gt,
        6 => CmpOp::Ge,
        _ => return None,
    })
}

fn encode_predicate(slot: &PredicateSlot) -> u32 {
    let mut w = 0;
    if let PredicateSlot::Cmp(c) = slot {
        put(&mut w, 0, 3, cmp_op_code(c.op));
        if let Src::Reg(r) = c.src1 {
            put(&mut w, 3, 4, u32::from(r.index()));
        }
        encode_asrc(&mut w, 7, 8, 8, c.src2);
        put(&mut w, 16, 4, u32::from(c.base));
        put(&mut w, 20, 4, u32::from(c.dst));
    }
    w
}

fn decode_predicate(w: u32) -> Result<PredicateSlot, ModelError> {
    let code = field(w, 0, 3);
    if code == 0 {
        return Ok(PredicateSlot::None);
    }
    let op = cmp_op_decode(code).ok_or(ModelError::InvalidSlotEncoding { slot: 1, word: w })?;
    Ok(PredicateSlot::Cmp(PredicateInstr {
        op,
        src1: Src::Reg(BReg::A(field(w, 3, 4) as u8)),
        src2: decode_asrc(w, 7, 8, 8),
        base: field(w, 16, 4) as u8,
        dst: field(w, 20, 4) as u8,
    }))
}

fn encode_packet(slot: &PacketSlot) -> u32 {
    let mut w = 0;
    match slot {
        PacketSlot::None => {}
        PacketSlot::Send(s) => {
            put(&mut w, 0, 3, 1);
            put(&mut w, 3, 1, u32::from(s.forward));
            encode_asrc(&mut w, 8, 9, 5, s.length);
            encode_asrc(&mut w, 14, 15, 4, s.x_dest);
            encode_asrc(&mut w, 19, 20, 4, s.y_dest);
            put(&mut w, 24, 2, u32::from(s.channel));
            put(&mut w, 26, 1, u32::from(s.append));
            put(&mut w, 27, 1, u32::from(s.broadcast));
            put(&mut w, 28, 4, u32::from(s.predicate));
        }
        PacketSlot::Receive(r) => {
            let op = if r.forward.is_some() { 3 } else { 2 };
            put(&mut w, 0, 3, op);
            put(&mut w, 3, 5, u32::from(r.dst));
            if let Some(f) = &r.forward {
                put(&mut w, 9, 5, u32::from(f.append_len));
                encode_asrc(&mut w, 14, 15, 4, f.x_dest);
                encode_asrc(&mut w, 19, 20, 4, f.y_dest);
                put(&mut w, 26, 1, u32::from(f.append));
            }
            put(&mut w, 24, 2, u32::from(r.channel));
            put(&mut w, 28, 4, u32::from(r.predicate));
        }
        PacketSlot::GetWord(g) => {
            put(&mut w, 0, 3, 4);
            put(&mut w, 3, 5, u32::from(g.dst.encode(B_INDEX_BITS)));
            put(&mut w, 24, 2, u32::from(g.channel));
            put(&mut w, 28, 4, u32::from(g.predicate));
        }
    }
    w
}

fn decode_packet(w: u32) -> Result<PacketSlot, ModelError> {
    let channel = field(w, 24, 2) as u8;
    let predicate = field(w, 28, 4) as u8;
    match field(w, 0, 3) {
        0 => Ok(PacketSlot::None),
        1 => Ok(PacketSlot::Send(SendInstr {
            length: decode_asrc(w, 8, 9, 5),
            x_dest: decode_asrc(w, 14, 15, 4),
            y_dest: decode_asrc(w, 19, 20, 4),
            channel,
            forward: field(w, 3, 1) == 1,
            append: field(w, 26, 1) == 1,
            broadcast: field(w, 27, 1) == 1,
            predicate,
        })),
        2 => Ok(PacketSlot::Receive(ReceiveInstr {
            dst: field(w, 3, 5) as u8,
            channel,
            forward: None,
            predicate,
        })),
        3 => Ok(PacketSlot::Receive(ReceiveInstr {
            dst: field(w, 3, 5) as u8,
            channel,
            forward: Some(ForwardSpec {
                x_dest: decode_asrc(w, 14, 15, 4),
                y_dest: decode_asrc(w, 19, 20, 4),
                append: field(w, 26, 1) == 1,
                append_len: field(w, 9, 5) as u8,
            }),
            predicate,
        })),
        4 => Ok(PacketSlot::GetWord(GetWordInstr {
            dst: BReg::decode(field(w, 3, 5) as u16, B_INDEX_BITS),
            channel,
            predicate,
        })),
        _ => Err(ModelError::InvalidSlotEncoding { slot: 2, word: w }),
    }
}

fn alu_op_code(op: AluOp) -> u32 {
    match op {
        AluOp::Add => 1,
        AluOp::Sub => 2,
        AluOp::Mul => 3,
        AluOp::And => 4,
        AluOp::Or => 5,
        AluOp::Xor => 6,
        AluOp::Not => 7,
        AluOp::Eq => 8,
        AluOp::Ne => 9,
        AluOp::Lt => 10,
        AluOp::Le => 11,
        AluOp::Gt => 12,
        AluOp::Ge => 13,
        AluOp::ShiftL => 14,
        AluOp::ShiftR => 15,
        AluOp::MulAcc => 16,
        AluOp::MulAccInit => 17,
    }
}

fn alu_op_decode(code: u32) -> Option<AluOp> {
    Some(match code {
        1 => AluOp::Add,
        2 => AluOp::Sub,
        3 => AluOp::Mul,
        4 => AluOp::And,
        5 => AluOp::Or,
        6 => AluOp::Xor,
        7 => AluOp::Not,
        8 => AluOp::Eq,
        9 => AluOp::Ne,
        10 => AluOp::Lt,
        11 => AluOp::Le,
        12 => AluOp::Gt,
        13 => AluOp::Ge,
        14 => AluOp::ShiftL,
        15 => AluOp::ShiftR,
        16 => AluOp::MulAcc,
        17 => AluOp::MulAccInit,
        _ => return None,
    })
}

fn encode_alu_instr(instr: &AluInstr) -> u32 {
    let mut w = 0;
    put(&mut w, 0, 5, alu_op_code(instr.op));
    put(&mut w, 5, 5, u32::from(instr.src1.encode(B_INDEX_BITS)));
    encode_bsrc(&mut w, 10, 12, instr.src2);
    put(&mut w, 20, 5, u32::from(instr.dst.encode(B_INDEX_BITS)));
    put(&mut w, 25, 4, u32::from(instr.predicate));
    w
}

fn decode_alu_instr(w: u32, slot: usize) -> Result<Option<AluInstr>, ModelError> {
    let code = field(w, 0, 5);
    if code == 0 {
        return Ok(None);
    }
    let op = alu_op_decode(code).ok_or(ModelError::InvalidSlotEncoding { slot, word: w })?;
    Ok(Some(AluInstr {
        op,
        src1: BReg::decode(field(w, 5, 5) as u16, B_INDEX_BITS),
        src2: decode_bsrc(w, 10, 12, slot)?,
        dst: BReg::decode(field(w, 20, 5) as u16, B_INDEX_BITS),
        predicate: field(w, 25, 4) as u8,
    }))
}

fn encode_load_store(slot: &LoadStoreSlot) -> u32 {
    let mut w = 0;
    match slot {
        LoadStoreSlot::None => {}
        LoadStoreSlot::Load(l) => {
            put(&mut w, 0, 2, 1);
            put(&mut w, 2, 4, u32::from(l.base));
            put(&mut w, 6, 8, u32::from(l.offset));
            put(&mut w, 14, 5, u32::from(l.dst.encode(B_INDEX_BITS)));
            put(&mut w, 19, 4, u32::from(l.predicate));
        }
        LoadStoreSlot::Store(s) => {
            put(&mut w, 0, 2, 2);
            put(&mut w, 2, 4, u32::from(s.base));
            put(&mut w, 6, 8, u32::from(s.offset));
            put(&mut w, 14, 5, u32::from(s.src.encode(B_INDEX_BITS)));
            put(&mut w, 19, 4, u32::from(s.predicate));
        }
    }
    w
}

fn decode_load_store(w: u32) -> Result<LoadStoreSlot, ModelError> {
    let base = field(w, 2, 4) as u8;
    let offset = field(w, 6, 8) as u16;
    let reg = BReg::decode(field(w, 14, 5) as u16, B_INDEX_BITS);
    let predicate = field(w, 19, 4) as u8;
    match field(w, 0, 2) {
        0 => Ok(LoadStoreSlot::None),
        1 => Ok(LoadStoreSlot::Load(LoadInstr {
            base,
            offset,
            dst: reg,
            predicate,
        })),
        2 => Ok(LoadStoreSlot::Store(StoreInstr {
            base,
            offset,
            src: reg,
            predicate,
        })),
        _ => Err(ModelError::InvalidSlotEncoding { slot: 4, word: w }),
    }
}

/// Encodes a Base-form bundle into six slot words.
pub fn encode_bundle(bundle: &Bundle) -> EncodedBundle {
    [
        encode_control(&bundle.control),
        encode_predicate(&bundle.predicate),
        encode_packet(&bundle.packet),
        match &bundle.alu_lite {
            AluLiteSlot::None => 0,
            AluLiteSlot::Op(op) => encode_alu_instr(op),
        },
        encode_load_store(&bundle.load_store),
        match &bundle.alu {
            AluSlot::None => 0,
            AluSlot::Op(op) => encode_alu_instr(op),
        },
    ]
}

/// Decodes six slot words into a Base-form bundle.
pub fn decode_bundle(words: &EncodedBundle) -> Result<Bundle, ModelError> {
    Ok(Bundle {
        control: decode_control(words[0])?,
        predicate: decode_predicate(words[1])?,
        packet: decode_packet(words[2])?,
        alu_lite: match decode_alu_instr(words[3], 3)? {
            None => AluLiteSlot::None,
            Some(op) => AluLiteSlot::Op(op),
        },
        load_store: decode_load_store(words[4])?,
        alu: match decode_alu_instr(words[5], 5)? {
            None => AluSlot::None,
            Some(op) => AluSlot::Op(op),
        },
    })
}

/// The slot kind encoded at each word position.
pub const SLOT_ORDER: [SlotKind; 6] = SlotKind::ALL;

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(bundle: Bundle) {
        let words = encode_bundle(&bundle);
        let back = decode_bundle(&words).unwrap();
        assert_eq!(bundle, back);
    }

    #[test]
    fn test_empty_bundle_roundtrips() {
        roundtrip(Bundle::default());
        assert_eq!(encode_bundle(&Bundle::default()), [0; 6]);
    }

    #[test]
    fn test_alu_roundtrip() {
        roundtrip(Bundle {
            alu: AluSlot::Op(AluInstr {
                op: AluOp::Add,
                src1: BReg::D(0),
                src2: Src::Imm(99),
                dst: BReg::D(1),
                predicate: 1,
            }),
            ..Bundle::default()
        });
    }

    #[test]
    fn test_loop_and_halt_roundtrip() {
        roundtrip(Bundle {
            control: ControlSlot::Loop(LoopInstr {
                count: LoopCount::Local(3),
                body_len: 7,
                dst: Some(2),
                level: 0,
            }),
            ..Bundle::default()
        });
        roundtrip(Bundle {
            control: ControlSlot::Halt,
            ..Bundle::default()
        });
    }

    #[test]
    fn test_packet_forms_roundtrip() {
        roundtrip(Bundle {
            packet: PacketSlot::Send(SendInstr {
                length: Src::Imm(3),
                x_dest: Src::Imm(1),
                y_dest: Src::Reg(BReg::A(4)),
                channel: 1,
                forward: true,
                append: false,
                broadcast: true,
                predicate: 0,
            }),
            ..Bundle::default()
        });
        roundtrip(Bundle {
            packet: PacketSlot::Receive(ReceiveInstr {
                dst: 3,
                channel: 0,
                forward: Some(ForwardSpec {
                    x_dest: Src::Imm(2),
                    y_dest: Src::Imm(0),
                    append: true,
                    append_len: 2,
                }),
                predicate: 0,
            }),
            ..Bundle::default()
        });
        roundtrip(Bundle {
            packet: PacketSlot::GetWord(GetWordInstr {
                dst: BReg::D(7),
                channel: 1,
                predicate: 2,
            }),
            ..Bundle::default()
        });
    }

    #[test]
    fn test_invalid_op_rejected() {
        let mut words = [0u32; 6];
        words[0] = 7; // control op 7 is unassigned
        assert!(decode_bundle(&words).is_err());
    }
}
