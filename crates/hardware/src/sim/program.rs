//! Program images and boot-packet construction.
//!
//! A program image is the encoded instruction memory contents plus the
//! start address — the JSON the CLI consumes. The packet builders produce
//! the wire-level command packets of the boot flow: instruction-memory
//! writes first, then `Start` (command receipt stalls issue at the lane
//! but not the controller, so the ordering convention matters).

use serde::{Deserialize, Serialize};

use crate::common::Word;
use crate::isa::bundle::Bundle;
use crate::isa::encode::{EncodedBundle, WORDS_PER_BUNDLE, encode_bundle};
use crate::net::packet::{CommandOp, CommandReg, LinkWord, PacketHeader, PacketMode, WireFormat};

/// A loadable program: encoded bundles plus the start address.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgramImage {
    /// Encoded bundles, stored from instruction-memory address zero.
    pub bundles: Vec<EncodedBundle>,
    /// Initial program counter (bundle address).
    #[serde(default)]
    pub start_pc: usize,
}

impl ProgramImage {
    /// Encodes a program of decoded bundles.
    pub fn assemble(program: &[Bundle], start_pc: usize) -> Self {
        Self {
            bundles: program.iter().map(encode_bundle).collect(),
            start_pc,
        }
    }
}

fn command_header(fmt: &WireFormat, x: u8, y: u8, length: u16) -> LinkWord {
    LinkWord::header(
        PacketHeader {
            length,
            x_dest: x,
            y_dest: y,
            mode: PacketMode::Command,
            ..PacketHeader::default()
        }
        .encode(fmt),
    )
}

/// Builds a command packet writing `bundles` to instruction memory at
/// `base`, addressed to lane `(x, y)`.
pub fn imem_write_packet(
    fmt: &WireFormat,
    instr_addr_width: u32,
    x: u8,
    y: u8,
    base: usize,
    bundles: &[EncodedBundle],
) -> Vec<LinkWord> {
    let count = bundles.len();
    debug_assert!(count <= 0xFF, "count field is 8 bits");
    let length = (1 + count * WORDS_PER_BUNDLE) as u16;
    let mut words = Vec::with_capacity(usize::from(length) + 1);
    words.push(command_header(fmt, x, y, length));
    words.push(LinkWord::payload(
        CommandOp::ImemWrite { base, count }.encode(instr_addr_width),
    ));
    for bundle in bundles {
        for &w in bundle {
            words.push(LinkWord::payload(w));
        }
    }
    words
}

/// Builds a command packet starting execution at `pc`, addressed to lane
/// `(x, y)`.
pub fn start_packet(
    fmt: &WireFormat,
    instr_addr_width: u32,
    x: u8,
    y: u8,
    pc: usize,
) -> Vec<LinkWord> {
    vec![
        command_header(fmt, x, y, 1),
        LinkWord::payload(CommandOp::Start { pc }.encode(instr_addr_width)),
    ]
}

/// Builds a command packet writing `value` to the named register of lane
/// `(x, y)` (or the mesh G-file).
pub fn register_write_packet(
    fmt: &WireFormat,
    instr_addr_width: u32,
    x: u8,
    y: u8,
    target: CommandReg,
    value: Word,
) -> Vec<LinkWord> {
    vec![
        command_header(fmt, x, y, 2),
        LinkWord::payload(CommandOp::RegisterWrite { target }.encode(instr_addr_width)),
        LinkWord::payload(value),
    ]
}
