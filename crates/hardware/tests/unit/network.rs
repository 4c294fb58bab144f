//! Network scenarios: broadcast delivery, forwarding, append, and the
//! command-packet boot flow.

use pretty_assertions::assert_eq;

use bamlet_core::common::error::RuntimeFlag;
use bamlet_core::common::reg::BReg;
use bamlet_core::isa::slots::CmpOp;
use bamlet_core::net::packet::{
    CommandOp, CommandReg, LinkWord, PacketHeader, PacketMode, WireFormat,
};
use bamlet_core::net::switch::PORT_W;
use bamlet_core::sim::program::{
    ProgramImage, imem_write_packet, register_write_packet, start_packet,
};
use bamlet_core::Config;

use crate::common::harness::{
    add_imm, emit_word, get_word, halt, mesh, pred_cmp, receive, receive_forward, run_program,
    send_append, send_broadcast, send_forward, send_imm,
};

fn wire_format() -> WireFormat {
    WireFormat::new(&Config::default().network)
}

const IADDR: u32 = 10;

#[test]
fn test_command_packet_boot() {
    // InstructionMemoryWrite with the program, then Start: the written
    // bundles become the executed program.
    let mut m = mesh(1, 1);
    let image = ProgramImage::assemble(&[add_imm(BReg::D(1), BReg::D(0), 5), halt()], 0);
    let fmt = wire_format();
    m.inject(
        0,
        0,
        PORT_W,
        0,
        imem_write_packet(&fmt, IADDR, 0, 0, 0, &image.bundles),
    );
    m.inject(0, 0, PORT_W, 0, start_packet(&fmt, IADDR, 0, 0, 0));
    let summary = m.run_until_halt(10_000).unwrap();
    assert!(summary.halted);
    assert!(summary.flags.is_empty());
    assert_eq!(m.amlet(0, 0).regs.d_value(1), 5);
}

#[test]
fn test_command_register_writes() {
    // Forced writes land without any receive instruction: one to a lane
    // D-register, one to the mesh G-file.
    let mut m = mesh(1, 1);
    let fmt = wire_format();
    m.inject(
        0,
        0,
        PORT_W,
        0,
        register_write_packet(&fmt, IADDR, 0, 0, CommandReg::D(9), 1234),
    );
    m.inject(
        0,
        0,
        PORT_W,
        0,
        register_write_packet(&fmt, IADDR, 0, 0, CommandReg::G(3), 77),
    );
    m.inject(0, 0, PORT_W, 0, start_packet(&fmt, IADDR, 0, 0, 0));
    m.load_program(0, &[halt()]);
    let summary = m.run_until_halt(10_000).unwrap();
    assert!(summary.halted);
    assert_eq!(m.amlet(0, 0).regs.d_value(9), 1234);
    assert_eq!(m.g_regs[3], 77);
}

#[test]
fn test_truncated_register_write_is_flagged() {
    // A RegisterWrite command whose packet ends before the value word:
    // flagged as malformed, no write lands.
    let mut m = mesh(1, 1);
    let fmt = wire_format();
    let header = PacketHeader {
        length: 1,
        x_dest: 0,
        y_dest: 0,
        mode: PacketMode::Command,
        ..PacketHeader::default()
    };
    m.inject(
        0,
        0,
        PORT_W,
        0,
        vec![
            LinkWord::header(header.encode(&fmt)),
            LinkWord::payload(
                CommandOp::RegisterWrite {
                    target: CommandReg::D(1),
                }
                .encode(IADDR),
            ),
        ],
    );
    m.inject(0, 0, PORT_W, 0, start_packet(&fmt, IADDR, 0, 0, 0));
    m.load_program(0, &[halt()]);
    let summary = m.run_until_halt(10_000).unwrap();
    assert!(summary.halted);
    assert!(
        summary
            .flags
            .iter()
            .any(|e| e.flag == RuntimeFlag::MalformedCommand)
    );
    assert_eq!(m.amlet(0, 0).regs.d_value(1), 0, "no write landed");
}

#[test]
fn test_broadcast_delivers_exactly_once_per_lane() {
    // Lane (0,0) broadcasts one word over the 2x2 rectangle; every lane
    // (sender included) consumes exactly one header + payload pair.
    let mut m = mesh(2, 2);
    for y in 0..2 {
        for x in 0..2 {
            m.amlet_mut(x, y).regs.poke_a(1, u32::from(x != 0 || y != 0));
        }
    }
    run_program(
        &mut m,
        &[
            pred_cmp(CmpOp::Eq, 1, 1, 0, 0), // P1: sender lane only
            send_broadcast(1, 1, 1, 1),
            emit_word(55, 1),
            receive(3, 0),
            get_word(BReg::D(1), 0),
            halt(),
        ],
    );
    for y in 0..2 {
        for x in 0..2 {
            let lane = m.amlet(x, y);
            assert_eq!(lane.regs.a_value(3), 1, "lane ({x},{y}) header length");
            assert_eq!(lane.regs.d_value(1), 55, "lane ({x},{y}) payload");
            assert_eq!(
                lane.recv.packets_received, 1,
                "lane ({x},{y}) saw exactly one delivery"
            );
        }
    }
}

#[test]
fn test_forward_chain_two_hops() {
    // (0,0) sends to (1,0) with the forward bit; (1,0) consumes and
    // forwards to (2,0), which consumes normally.
    let mut m = mesh(1, 3);
    for x in 0..3 {
        m.amlet_mut(x, 0).regs.poke_a(1, x as u32);
    }
    run_program(
        &mut m,
        &[
            pred_cmp(CmpOp::Eq, 1, 1, 0, 0),
            pred_cmp(CmpOp::Eq, 2, 1, 1, 0),
            pred_cmp(CmpOp::Eq, 3, 1, 2, 0),
            send_forward(1, 1, 0, 1),
            emit_word(7, 1),
            receive_forward(3, 2, 0, None, 2),
            get_word(BReg::D(1), 2),
            receive(3, 3),
            get_word(BReg::D(1), 3),
            halt(),
        ],
    );
    assert_eq!(m.amlet(1, 0).regs.a_value(3), 1);
    assert_eq!(m.amlet(1, 0).regs.d_value(1), 7);
    assert_eq!(m.amlet(2, 0).regs.a_value(3), 1);
    assert_eq!(m.amlet(2, 0).regs.d_value(1), 7);
    assert_eq!(m.stats.packets_forwarded, 1);
}

#[test]
fn test_forward_with_append_extends_payload() {
    // As above, but (1,0) appends one locally supplied word; (2,0) sees a
    // two-word packet.
    let mut m = mesh(1, 3);
    for x in 0..3 {
        m.amlet_mut(x, 0).regs.poke_a(1, x as u32);
    }
    run_program(
        &mut m,
        &[
            pred_cmp(CmpOp::Eq, 1, 1, 0, 0),
            pred_cmp(CmpOp::Eq, 2, 1, 1, 0),
            pred_cmp(CmpOp::Eq, 3, 1, 2, 0),
            send_forward(1, 1, 0, 1),
            emit_word(7, 1),
            receive_forward(3, 2, 0, Some(1), 2),
            send_append(1, 2),
            emit_word(9, 2),
            get_word(BReg::D(1), 2),
            receive(3, 3),
            get_word(BReg::D(1), 3),
            get_word(BReg::D(2), 3),
            halt(),
        ],
    );
    assert_eq!(m.amlet(1, 0).regs.a_value(3), 1, "hop sees original length");
    assert_eq!(m.amlet(2, 0).regs.a_value(3), 2, "tail sees appended length");
    assert_eq!(m.amlet(2, 0).regs.d_value(1), 7);
    assert_eq!(m.amlet(2, 0).regs.d_value(2), 9);
}

#[test]
fn test_point_to_point_same_channel_preserves_order() {
    // Two packets from (0,0) to (1,0) on one channel arrive in send
    // order.
    let mut m = mesh(1, 2);
    m.amlet_mut(0, 0).regs.poke_a(1, 0);
    m.amlet_mut(1, 0).regs.poke_a(1, 1);
    run_program(
        &mut m,
        &[
            pred_cmp(CmpOp::Eq, 1, 1, 0, 0),
            pred_cmp(CmpOp::Eq, 2, 1, 1, 0),
            send_imm(1, 1, 0, 1),
            emit_word(100, 1),
            send_imm(1, 1, 0, 1),
            emit_word(200, 1),
            receive(3, 2),
            get_word(BReg::D(1), 2),
            receive(4, 2),
            get_word(BReg::D(2), 2),
            halt(),
        ],
    );
    let rx = m.amlet(1, 0);
    assert_eq!(rx.regs.d_value(1), 100, "first packet first");
    assert_eq!(rx.regs.d_value(2), 200, "second packet second");
    assert_eq!(m.amlet(0, 0).send.packets_sent, 2);
}
