//! Loop expansion, index capture, and lane-reported iteration counts.

use pretty_assertions::assert_eq;

use bamlet_core::common::reg::BReg;

use crate::common::harness::{add_imm, halt, loop_imm, loop_local, mesh, run_program};

#[test]
fn test_immediate_loop_body_runs_count_times() {
    // D1 accumulates one per body pass; A2 captures the loop index.
    let mut m = mesh(1, 1);
    run_program(
        &mut m,
        &[
            loop_imm(3, 1, Some(2)),
            add_imm(BReg::D(1), BReg::D(1), 1),
            halt(),
        ],
    );
    let lane = m.amlet(0, 0);
    assert_eq!(lane.regs.d_value(1), 3);
    assert_eq!(lane.regs.a_value(2), 2, "final index is count - 1");
}

#[test]
fn test_local_loop_count_from_lane_register() {
    let mut m = mesh(1, 1);
    m.amlet_mut(0, 0).regs.poke_a(4, 2);
    run_program(
        &mut m,
        &[
            loop_local(4, 1, None),
            add_imm(BReg::D(1), BReg::D(1), 1),
            halt(),
        ],
    );
    assert_eq!(m.amlet(0, 0).regs.d_value(1), 2);
}

#[test]
fn test_local_loop_takes_maximum_across_lanes() {
    // Lane counts 2 and 3: the controller arbitrates to 3 and every lane
    // runs three passes.
    let mut m = mesh(1, 2);
    m.amlet_mut(0, 0).regs.poke_a(4, 2);
    m.amlet_mut(1, 0).regs.poke_a(4, 3);
    run_program(
        &mut m,
        &[
            loop_local(4, 1, None),
            add_imm(BReg::D(1), BReg::D(1), 1),
            halt(),
        ],
    );
    assert_eq!(m.amlet(0, 0).regs.d_value(1), 3);
    assert_eq!(m.amlet(1, 0).regs.d_value(1), 3);
}

#[test]
fn test_nested_loops_pop_lifo() {
    // Outer 2 passes x inner 3 passes: the inner body runs 6 times.
    // Layout: pc0 outer header (body 3), pc1 filler, pc2 inner header
    // (body 1), pc3 inner body, pc4 halt.
    let mut m = mesh(1, 1);
    run_program(
        &mut m,
        &[
            loop_imm(2, 3, None),
            add_imm(BReg::D(2), BReg::D(2), 1),
            loop_imm(3, 1, None),
            add_imm(BReg::D(1), BReg::D(1), 1),
            halt(),
        ],
    );
    let lane = m.amlet(0, 0);
    assert_eq!(lane.regs.d_value(1), 6, "inner body: 2 * 3 passes");
    assert_eq!(lane.regs.d_value(2), 2, "outer filler: 2 passes");
}
