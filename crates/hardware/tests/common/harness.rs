//! Test harness: mesh construction, bundle builders, run helpers.
//!
//! Scenarios drive the model exactly the way a program image would: load
//! literal instruction memory contents, start, run to halt, then inspect
//! final register / memory / packet-emission state.

use bamlet_core::common::reg::BReg;
use bamlet_core::isa::bundle::Bundle;
use bamlet_core::isa::slots::{
    AluInstr, AluOp, AluSlot, CmpOp, ControlSlot, ForwardSpec, GetWordInstr, LoadInstr,
    LoadStoreSlot, LoopCount, LoopInstr, PacketSlot, PredicateInstr, PredicateSlot, ReceiveInstr,
    SendInstr, Src, StoreInstr,
};
use bamlet_core::sim::mesh::RunSummary;
use bamlet_core::{Bamlet, Config};

/// Builds a mesh of the given shape with default lane parameters.
pub fn mesh(rows: usize, cols: usize) -> Bamlet {
    let mut config = Config::default();
    config.mesh.rows = rows;
    config.mesh.cols = cols;
    Bamlet::new(config).expect("default config is valid")
}

/// Loads a program at address 0, starts, and runs to halt.
pub fn run_program(mesh: &mut Bamlet, program: &[Bundle]) -> RunSummary {
    mesh.load_program(0, program);
    mesh.start(0);
    let summary = mesh.run_until_halt(10_000).expect("no fatal model error");
    assert!(summary.halted, "program did not halt and drain");
    summary
}

/// `ADD dst, src1, imm` in the ALU slot.
pub fn add_imm(dst: BReg, src1: BReg, imm: u16) -> Bundle {
    alu_op(AluOp::Add, dst, src1, imm, 0)
}

/// A predicated ALU immediate op.
pub fn alu_op(op: AluOp, dst: BReg, src1: BReg, imm: u16, predicate: u8) -> Bundle {
    Bundle {
        alu: AluSlot::Op(AluInstr {
            op,
            src1,
            src2: Src::Imm(imm),
            dst,
            predicate,
        }),
        ..Bundle::default()
    }
}

/// `HALT` in the control slot.
pub fn halt() -> Bundle {
    Bundle {
        control: ControlSlot::Halt,
        ..Bundle::default()
    }
}

/// A loop-open bundle.
pub fn loop_imm(iterations: u16, body_len: u16, dst: Option<u8>) -> Bundle {
    Bundle {
        control: ControlSlot::Loop(LoopInstr {
            count: LoopCount::Immediate(iterations),
            body_len,
            dst,
            level: 0,
        }),
        ..Bundle::default()
    }
}

/// A loop whose count comes from an A-register.
pub fn loop_local(count_reg: u8, body_len: u16, dst: Option<u8>) -> Bundle {
    Bundle {
        control: ControlSlot::Loop(LoopInstr {
            count: LoopCount::Local(count_reg),
            body_len,
            dst,
            level: 0,
        }),
        ..Bundle::default()
    }
}

/// `STORE [A{base} + offset], src`.
pub fn store(base: u8, offset: u16, src: BReg) -> Bundle {
    Bundle {
        load_store: LoadStoreSlot::Store(StoreInstr {
            base,
            offset,
            src,
            predicate: 0,
        }),
        ..Bundle::default()
    }
}

/// `LOAD dst, [A{base} + offset]`.
pub fn load(base: u8, offset: u16, dst: BReg) -> Bundle {
    Bundle {
        load_store: LoadStoreSlot::Load(LoadInstr {
            base,
            offset,
            dst,
            predicate: 0,
        }),
        ..Bundle::default()
    }
}

/// `P{dst} := (A{src1} cmp imm) && P{base}`.
pub fn pred_cmp(op: CmpOp, dst: u8, src1: u8, imm: u16, base: u8) -> Bundle {
    Bundle {
        predicate: PredicateSlot::Cmp(PredicateInstr {
            op,
            src1: Src::Reg(BReg::A(src1)),
            src2: Src::Imm(imm),
            base,
            dst,
        }),
        ..Bundle::default()
    }
}

/// `SEND length, (x, y)` on channel 0.
pub fn send_imm(length: u16, x: u16, y: u16, predicate: u8) -> Bundle {
    Bundle {
        packet: PacketSlot::Send(SendInstr {
            length: Src::Imm(length),
            x_dest: Src::Imm(x),
            y_dest: Src::Imm(y),
            channel: 0,
            forward: false,
            append: false,
            broadcast: false,
            predicate,
        }),
        ..Bundle::default()
    }
}

/// A broadcast send to the rectangle corner `(x, y)`.
pub fn send_broadcast(length: u16, x: u16, y: u16, predicate: u8) -> Bundle {
    Bundle {
        packet: PacketSlot::Send(SendInstr {
            length: Src::Imm(length),
            x_dest: Src::Imm(x),
            y_dest: Src::Imm(y),
            channel: 0,
            forward: false,
            append: false,
            broadcast: true,
            predicate,
        }),
        ..Bundle::default()
    }
}

/// A send whose header asks the destination switch to hold for a forward
/// directive.
pub fn send_forward(length: u16, x: u16, y: u16, predicate: u8) -> Bundle {
    Bundle {
        packet: PacketSlot::Send(SendInstr {
            length: Src::Imm(length),
            x_dest: Src::Imm(x),
            y_dest: Src::Imm(y),
            channel: 0,
            forward: true,
            append: false,
            broadcast: false,
            predicate,
        }),
        ..Bundle::default()
    }
}

/// A send supplying words to a pending append binding.
pub fn send_append(length: u16, predicate: u8) -> Bundle {
    Bundle {
        packet: PacketSlot::Send(SendInstr {
            length: Src::Imm(length),
            x_dest: Src::Imm(0),
            y_dest: Src::Imm(0),
            channel: 0,
            forward: false,
            append: true,
            broadcast: false,
            predicate,
        }),
        ..Bundle::default()
    }
}

/// `RECEIVE A{dst}` that also forwards the packet to `(x, y)`, optionally
/// appending `append_len` locally supplied words.
pub fn receive_forward(
    dst: u8,
    x: u16,
    y: u16,
    append_len: Option<u8>,
    predicate: u8,
) -> Bundle {
    Bundle {
        packet: PacketSlot::Receive(ReceiveInstr {
            dst,
            channel: 0,
            forward: Some(ForwardSpec {
                x_dest: Src::Imm(x),
                y_dest: Src::Imm(y),
                append: append_len.is_some(),
                append_len: append_len.unwrap_or(0),
            }),
            predicate,
        }),
        ..Bundle::default()
    }
}

/// `RECEIVE A{dst}` on channel 0.
pub fn receive(dst: u8, predicate: u8) -> Bundle {
    Bundle {
        packet: PacketSlot::Receive(ReceiveInstr {
            dst,
            channel: 0,
            forward: None,
            predicate,
        }),
        ..Bundle::default()
    }
}

/// `GETWORD dst` on channel 0.
pub fn get_word(dst: BReg, predicate: u8) -> Bundle {
    Bundle {
        packet: PacketSlot::GetWord(GetWordInstr {
            dst,
            channel: 0,
            predicate,
        }),
        ..Bundle::default()
    }
}

/// A `D0` payload emission: `ADD D0, D0, imm` (D0 reads zero, so the
/// emitted word equals the immediate).
pub fn emit_word(imm: u16, predicate: u8) -> Bundle {
    alu_op(AluOp::Add, BReg::D(0), BReg::D(0), imm, predicate)
}
