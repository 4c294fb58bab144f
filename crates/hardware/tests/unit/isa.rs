//! Codec round-trip properties: encoded bundles, packet headers, and
//! command words survive encode → decode unchanged.

use proptest::prelude::*;

use bamlet_core::common::reg::BReg;
use bamlet_core::isa::bundle::Bundle;
use bamlet_core::isa::encode::{decode_bundle, encode_bundle};
use bamlet_core::isa::slots::{
    AluInstr, AluLiteSlot, AluOp, AluSlot, CmpOp, ControlSlot, ForwardSpec, GetWordInstr,
    LoadInstr, LoadStoreSlot, LoopCount, LoopInstr, PacketSlot, PredicateInstr, PredicateSlot,
    ReceiveInstr, SendInstr, Src, StoreInstr,
};
use bamlet_core::net::packet::{CommandOp, CommandReg, PacketHeader, PacketMode, WireFormat};

fn breg() -> impl Strategy<Value = BReg> {
    prop_oneof![(0u8..16).prop_map(BReg::A), (0u8..16).prop_map(BReg::D)]
}

fn alu_op() -> impl Strategy<Value = AluOp> {
    prop_oneof![
        Just(AluOp::Add),
        Just(AluOp::Sub),
        Just(AluOp::Mul),
        Just(AluOp::And),
        Just(AluOp::Or),
        Just(AluOp::Xor),
        Just(AluOp::Not),
        Just(AluOp::Eq),
        Just(AluOp::Ne),
        Just(AluOp::Lt),
        Just(AluOp::Le),
        Just(AluOp::Gt),
        Just(AluOp::Ge),
        Just(AluOp::ShiftL),
        Just(AluOp::ShiftR),
        Just(AluOp::MulAcc),
        Just(AluOp::MulAccInit),
    ]
}

fn cmp_op() -> impl Strategy<Value = CmpOp> {
    prop_oneof![
        Just(CmpOp::Eq),
        Just(CmpOp::Ne),
        Just(CmpOp::Lt),
        Just(CmpOp::Le),
        Just(CmpOp::Gt),
        Just(CmpOp::Ge),
    ]
}

// B-space operand: 8-bit immediates, 2-bit loop levels.
fn bsrc() -> impl Strategy<Value = Src> {
    prop_oneof![
        breg().prop_map(Src::Reg),
        (0u16..256).prop_map(Src::Imm),
        (0u8..4).prop_map(Src::LoopIndex),
    ]
}

// A-space operand with a bounded immediate field.
fn asrc(imm_bound: u16) -> impl Strategy<Value = Src> {
    prop_oneof![
        (0u8..16).prop_map(|i| Src::Reg(BReg::A(i))),
        (0..imm_bound).prop_map(Src::Imm),
    ]
}

fn alu_instr() -> impl Strategy<Value = AluInstr> {
    (alu_op(), breg(), bsrc(), breg(), 0u8..16).prop_map(|(op, src1, src2, dst, predicate)| {
        AluInstr {
            op,
            src1,
            src2,
            dst,
            predicate,
        }
    })
}

fn control_slot() -> impl Strategy<Value = ControlSlot> {
    let count = prop_oneof![
        (0u16..256).prop_map(LoopCount::Immediate),
        (0u8..16).prop_map(LoopCount::Local),
        (0u8..16).prop_map(LoopCount::Global),
    ];
    prop_oneof![
        Just(ControlSlot::None),
        Just(ControlSlot::Halt),
        (count, 0u16..256, proptest::option::of(0u8..16)).prop_map(|(count, body_len, dst)| {
            ControlSlot::Loop(LoopInstr {
                count,
                body_len,
                dst,
                level: 0,
            })
        }),
        (0u8..4, proptest::option::of(0u8..16))
            .prop_map(|(level, dst)| ControlSlot::Incr { level, dst }),
    ]
}

fn predicate_slot() -> impl Strategy<Value = PredicateSlot> {
    prop_oneof![
        Just(PredicateSlot::None),
        (cmp_op(), 0u8..16, asrc(256), 0u8..16, 0u8..16).prop_map(
            |(op, src1, src2, base, dst)| {
                PredicateSlot::Cmp(PredicateInstr {
                    op,
                    src1: Src::Reg(BReg::A(src1)),
                    src2,
                    base,
                    dst,
                })
            }
        ),
    ]
}

fn packet_slot() -> impl Strategy<Value = PacketSlot> {
    let send = (
        asrc(32),
        asrc(16),
        asrc(16),
        0u8..4,
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        0u8..16,
    )
        .prop_map(
            |(length, x_dest, y_dest, channel, forward, append, broadcast, predicate)| {
                PacketSlot::Send(SendInstr {
                    length,
                    x_dest,
                    y_dest,
                    channel,
                    forward,
                    append,
                    broadcast,
                    predicate,
                })
            },
        );
    let forward_spec = (asrc(16), asrc(16), any::<bool>(), 0u8..16).prop_map(
        |(x_dest, y_dest, append, append_len)| ForwardSpec {
            x_dest,
            y_dest,
            append,
            append_len,
        },
    );
    let recv = (0u8..16, 0u8..4, proptest::option::of(forward_spec), 0u8..16).prop_map(
        |(dst, channel, forward, predicate)| {
            PacketSlot::Receive(ReceiveInstr {
                dst,
                channel,
                forward,
                predicate,
            })
        },
    );
    let get = (breg(), 0u8..4, 0u8..16).prop_map(|(dst, channel, predicate)| {
        PacketSlot::GetWord(GetWordInstr {
            dst,
            channel,
            predicate,
        })
    });
    prop_oneof![Just(PacketSlot::None), send, recv, get]
}

fn load_store_slot() -> impl Strategy<Value = LoadStoreSlot> {
    prop_oneof![
        Just(LoadStoreSlot::None),
        (0u8..16, 0u16..256, breg(), 0u8..16).prop_map(|(base, offset, dst, predicate)| {
            LoadStoreSlot::Load(LoadInstr {
                base,
                offset,
                dst,
                predicate,
            })
        }),
        (0u8..16, 0u16..256, breg(), 0u8..16).prop_map(|(base, offset, src, predicate)| {
            LoadStoreSlot::Store(StoreInstr {
                base,
                offset,
                src,
                predicate,
            })
        }),
    ]
}

fn bundle() -> impl Strategy<Value = Bundle> {
    (
        control_slot(),
        predicate_slot(),
        packet_slot(),
        prop_oneof![Just(AluLiteSlot::None), alu_instr().prop_map(AluLiteSlot::Op)],
        load_store_slot(),
        prop_oneof![Just(AluSlot::None), alu_instr().prop_map(AluSlot::Op)],
    )
        .prop_map(
            |(control, predicate, packet, alu_lite, load_store, alu)| Bundle {
                control,
                predicate,
                packet,
                alu_lite,
                load_store,
                alu,
            },
        )
}

proptest! {
    #[test]
    fn prop_bundle_roundtrips(bundle in bundle()) {
        let words = encode_bundle(&bundle);
        let back = decode_bundle(&words).unwrap();
        prop_assert_eq!(bundle, back);
    }

    #[test]
    fn prop_header_roundtrips(
        length in 0u16..256,
        x_dest in 0u8..16,
        y_dest in 0u8..16,
        mode in 0u8..4,
        forward in any::<bool>(),
        is_broadcast in any::<bool>(),
        append_length in 0u8..16,
    ) {
        let fmt = WireFormat {
            packet_length_width: 8,
            x_pos_width: 4,
            y_pos_width: 4,
        };
        let header = PacketHeader {
            length,
            x_dest,
            y_dest,
            mode: match mode {
                0 => PacketMode::Normal,
                1 => PacketMode::Command,
                2 => PacketMode::Append,
                _ => PacketMode::Reserved,
            },
            forward,
            is_broadcast,
            append_length,
        };
        let word = header.encode(&fmt);
        prop_assert_eq!(PacketHeader::decode(word, &fmt), header);
    }

    #[test]
    fn prop_command_roundtrips(selector in 0u8..3, a in 0u32..1024, b in 0u32..256) {
        let op = match selector {
            0 => CommandOp::Start { pc: a as usize },
            1 => CommandOp::ImemWrite { base: a as usize, count: (b & 0xFF) as usize },
            _ => {
                let index = (a & 0xF) as u8;
                CommandOp::RegisterWrite {
                    target: match b % 4 {
                        0 => CommandReg::A(index),
                        1 => CommandReg::D(index),
                        2 => CommandReg::P(index),
                        _ => CommandReg::G(index),
                    },
                }
            }
        };
        let word = op.encode(10);
        prop_assert_eq!(CommandOp::decode(word, 10).unwrap(), op);
    }
}
