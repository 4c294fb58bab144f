//! End-to-end scenarios driven through literal instruction memory.

use pretty_assertions::assert_eq;
use rstest::rstest;

use bamlet_core::common::reg::BReg;
use bamlet_core::isa::slots::{AluOp, CmpOp};

use crate::common::harness::{
    add_imm, alu_op, emit_word, get_word, halt, load, mesh, pred_cmp, receive, run_program,
    send_imm, store,
};

#[test]
fn test_alu_chain_on_one_lane() {
    // ADD D1, D0, 5; ADD D2, D1, 7; HALT.
    let mut m = mesh(1, 1);
    run_program(
        &mut m,
        &[
            add_imm(BReg::D(1), BReg::D(0), 5),
            add_imm(BReg::D(2), BReg::D(1), 7),
            halt(),
        ],
    );
    let lane = m.amlet(0, 0);
    assert_eq!(lane.regs.d_value(1), 5);
    assert_eq!(lane.regs.d_value(2), 12);
    assert_eq!(m.stats.bundles_fetched, 3);
}

#[test]
fn test_raw_across_bundles_waits_for_latency() {
    // MUL D1, D0, 0 (latency 2) then ADD D2, D1, 10: the add captures
    // D1's result off the bus, no silent overwrite.
    let mut m = mesh(1, 1);
    run_program(
        &mut m,
        &[
            alu_op(AluOp::Mul, BReg::D(1), BReg::D(0), 0, 0),
            add_imm(BReg::D(2), BReg::D(1), 10),
            halt(),
        ],
    );
    let lane = m.amlet(0, 0);
    assert_eq!(lane.regs.d_value(1), 0);
    assert_eq!(lane.regs.d_value(2), 10);
}

#[rstest]
#[case(AluOp::Add, 5, 7, 12)]
#[case(AluOp::Sub, 9, 4, 5)]
#[case(AluOp::Mul, 3, 4, 12)]
#[case(AluOp::Xor, 12, 10, 6)]
#[case(AluOp::ShiftL, 1, 4, 16)]
#[case(AluOp::Lt, 3, 4, 1)]
fn test_alu_operation_results(
    #[case] op: AluOp,
    #[case] a: u16,
    #[case] b: u16,
    #[case] expect: u32,
) {
    let mut m = mesh(1, 1);
    run_program(
        &mut m,
        &[
            add_imm(BReg::D(1), BReg::D(0), a),
            alu_op(op, BReg::D(2), BReg::D(1), b, 0),
            halt(),
        ],
    );
    assert_eq!(m.amlet(0, 0).regs.d_value(2), expect);
}

#[test]
fn test_store_load_forwarding() {
    // D1 := 42; STORE [A0+3], D1; LOAD D1', [A0+3]; HALT.
    let mut m = mesh(1, 1);
    run_program(
        &mut m,
        &[
            add_imm(BReg::D(1), BReg::D(0), 42),
            store(0, 3, BReg::D(1)),
            load(0, 3, BReg::D(2)),
            halt(),
        ],
    );
    let lane = m.amlet(0, 0);
    assert_eq!(lane.mem.peek(3), 42);
    assert_eq!(lane.regs.d_value(2), 42);
    assert_eq!(m.stats.loads, 1);
    assert_eq!(m.stats.stores, 1);
}

#[test]
fn test_point_to_point_packet() {
    // Lane (0,0) sends three words to lane (1,0); divergence is pure
    // predicate masking over one shared instruction stream.
    let mut m = mesh(1, 2);
    m.amlet_mut(0, 0).regs.poke_a(1, 0);
    m.amlet_mut(1, 0).regs.poke_a(1, 1);
    run_program(
        &mut m,
        &[
            pred_cmp(CmpOp::Eq, 1, 1, 0, 0), // P1: sender lane
            pred_cmp(CmpOp::Eq, 2, 1, 1, 0), // P2: receiver lane
            send_imm(3, 1, 0, 1),
            emit_word(10, 1),
            emit_word(20, 1),
            emit_word(30, 1),
            receive(3, 2),
            get_word(BReg::D(1), 2),
            get_word(BReg::D(2), 2),
            get_word(BReg::D(3), 2),
            halt(),
        ],
    );
    let rx = m.amlet(1, 0);
    assert_eq!(rx.regs.a_value(3), 3, "receive writes the header length");
    assert_eq!(rx.regs.d_value(1), 10);
    assert_eq!(rx.regs.d_value(2), 20);
    assert_eq!(rx.regs.d_value(3), 30);
    let tx = m.amlet(0, 0);
    assert_eq!(tx.send.packets_sent, 1);
    assert_eq!(tx.regs.d_value(1), 0, "sender's receive path was masked");
}

#[test]
fn test_predicated_divergence() {
    // Both lanes run P1 := (A1 < 2); only the lane with A1 < 2 executes
    // the dependent add, the other retains D1's prior value.
    let mut m = mesh(1, 2);
    m.amlet_mut(0, 0).regs.poke_a(1, 1);
    m.amlet_mut(1, 0).regs.poke_a(1, 5);
    m.amlet_mut(1, 0).regs.poke_d(1, 7);
    run_program(
        &mut m,
        &[
            pred_cmp(CmpOp::Lt, 1, 1, 2, 0),
            alu_op(AluOp::Add, BReg::D(1), BReg::D(0), 99, 1),
            halt(),
        ],
    );
    assert_eq!(m.amlet(0, 0).regs.d_value(1), 99);
    assert_eq!(
        m.amlet(1, 0).regs.d_value(1),
        7,
        "masked lane keeps the prior value"
    );
}

#[test]
fn test_masked_write_resolves_dependents() {
    // A dependent of a masked write must still resolve, against the old
    // committed value, through the null drain.
    let mut m = mesh(1, 1);
    let lane = m.amlet_mut(0, 0);
    lane.regs.poke_a(1, 5); // predicate input
    lane.regs.poke_d(3, 123); // prior value of the masked destination
    run_program(
        &mut m,
        &[
            pred_cmp(CmpOp::Lt, 1, 1, 2, 0), // false: 5 < 2
            alu_op(AluOp::Add, BReg::D(3), BReg::D(0), 1, 1), // masked
            add_imm(BReg::D(4), BReg::D(3), 0), // dependent
            halt(),
        ],
    );
    let lane = m.amlet(0, 0);
    assert_eq!(lane.regs.d_value(3), 123);
    assert_eq!(lane.regs.d_value(4), 123, "dependent saw the old value");
}

#[test]
fn test_lockstep_issue_counts_match() {
    // Every lane executes the same bundle sequence; per-lane divergence
    // shows up only in register state, never in issue counts.
    let mut m = mesh(2, 2);
    for y in 0..2 {
        for x in 0..2 {
            m.amlet_mut(x, y).regs.poke_a(1, (y * 2 + x) as u32);
        }
    }
    run_program(
        &mut m,
        &[
            pred_cmp(CmpOp::Eq, 1, 1, 2, 0),
            alu_op(AluOp::Add, BReg::D(1), BReg::D(0), 9, 1),
            halt(),
        ],
    );
    assert_eq!(m.stats.bundles_issued, m.stats.bundles_fetched);
    for (x, y, expect) in [(0, 0, 0), (1, 0, 0), (0, 1, 9), (1, 1, 0)] {
        assert_eq!(m.amlet(x, y).regs.d_value(1), expect, "lane ({x},{y})");
    }
}
