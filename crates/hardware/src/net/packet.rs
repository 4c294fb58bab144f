//! Packet wire format: link words, header packing, command opcodes.
//!
//! A link word is a data word plus an `is_header` side bit. Header fields
//! pack LSB→MSB as `length`, `x_dest`, `y_dest`, `mode` (2 bits), `forward`
//! (1), `is_broadcast` (1), `append_length` (4); the field widths for
//! `length` and the coordinates come from [`WireFormat`].
//!
//! The first payload word of a command packet carries a 2-bit opcode in its
//! top bits; see [`CommandOp`].

use crate::common::Word;
use crate::common::error::ModelError;

/// One word on a link: data plus the header side bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkWord {
    /// Payload or packed header.
    pub data: Word,
    /// True for the first word of a packet.
    pub is_header: bool,
}

impl LinkWord {
    /// A payload word.
    #[inline]
    pub fn payload(data: Word) -> Self {
        Self {
            data,
            is_header: false,
        }
    }

    /// A header word.
    #[inline]
    pub fn header(data: Word) -> Self {
        Self {
            data,
            is_header: true,
        }
    }
}

/// Packet delivery modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PacketMode {
    /// Ordinary data packet; needs a receive instruction at the target.
    #[default]
    Normal = 0,
    /// Consumed unconditionally; mutates controller/register/memory state.
    Command = 1,
    /// Packet whose tail is open for local extension.
    Append = 2,
    /// Unassigned.
    Reserved = 3,
}

impl PacketMode {
    fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => Self::Normal,
            1 => Self::Command,
            2 => Self::Append,
            _ => Self::Reserved,
        }
    }
}

/// Field widths needed to pack and unpack headers.
#[derive(Clone, Copy, Debug)]
pub struct WireFormat {
    /// Width of the `length` field in bits.
    pub packet_length_width: u32,
    /// Width of the `x_dest` field in bits.
    pub x_pos_width: u32,
    /// Width of the `y_dest` field in bits.
    pub y_pos_width: u32,
}

impl WireFormat {
    /// Builds the wire format from the network configuration.
    pub fn new(config: &crate::config::NetworkConfig) -> Self {
        Self {
            packet_length_width: config.packet_length_width as u32,
            x_pos_width: config.x_pos_width as u32,
            y_pos_width: config.y_pos_width as u32,
        }
    }
}

/// A decoded packet header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PacketHeader {
    /// Payload words following this header.
    pub length: u16,
    /// Destination column.
    pub x_dest: u8,
    /// Destination row.
    pub y_dest: u8,
    /// Delivery mode.
    pub mode: PacketMode,
    /// Set when a receive instruction asked the switch to forward the
    /// packet onward after local delivery.
    pub forward: bool,
    /// Broadcast over the rectangle spanned by injection point and
    /// destination.
    pub is_broadcast: bool,
    /// Words the forwarding lane will append (append mode).
    pub append_length: u8,
}

impl PacketHeader {
    /// Packs the header into a link data word.
    pub fn encode(&self, fmt: &WireFormat) -> Word {
        let mut w: u32 = 0;
        let mut lo = 0;
        w |= (u32::from(self.length) & ((1 << fmt.packet_length_width) - 1)) << lo;
        lo += fmt.packet_length_width;
        w |= (u32::from(self.x_dest) & ((1 << fmt.x_pos_width) - 1)) << lo;
        lo += fmt.x_pos_width;
        w |= (u32::from(self.y_dest) & ((1 << fmt.y_pos_width) - 1)) << lo;
        lo += fmt.y_pos_width;
        w |= (self.mode as u32) << lo;
        lo += 2;
        w |= u32::from(self.forward) << lo;
        lo += 1;
        w |= u32::from(self.is_broadcast) << lo;
        lo += 1;
        w |= (u32::from(self.append_length) & 0xF) << lo;
        w
    }

    /// Unpacks a header from a link data word.
    pub fn decode(data: Word, fmt: &WireFormat) -> Self {
        let mut lo = 0;
        let take = |bits: u32, lo: &mut u32| {
            let v = (data >> *lo) & ((1u32 << bits) - 1);
            *lo += bits;
            v
        };
        let length = take(fmt.packet_length_width, &mut lo) as u16;
        let x_dest = take(fmt.x_pos_width, &mut lo) as u8;
        let y_dest = take(fmt.y_pos_width, &mut lo) as u8;
        let mode = PacketMode::from_bits(take(2, &mut lo));
        let forward = take(1, &mut lo) == 1;
        let is_broadcast = take(1, &mut lo) == 1;
        let append_length = take(4, &mut lo) as u8;
        Self {
            length,
            x_dest,
            y_dest,
            mode,
            forward,
            is_broadcast,
            append_length,
        }
    }
}

/// Register named by a command-packet `RegisterWrite`.
///
/// The operand encodes the class in its top two bits (00 = A, 01 = D,
/// 10 = P, 11 = G) above an index field wide enough for the largest file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandReg {
    /// Address register of the receiving lane.
    A(u8),
    /// Data register of the receiving lane.
    D(u8),
    /// Predicate register of the receiving lane.
    P(u8),
    /// Mesh-global register.
    G(u8),
}

/// Command-packet operations, decoded from the first payload word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandOp {
    /// Set the controller PC and begin issue.
    Start {
        /// Initial bundle address.
        pc: usize,
    },
    /// Store the following `count` bundles (six slot words each) into
    /// instruction memory at successive bundle addresses from `base`.
    ImemWrite {
        /// First bundle address written.
        base: usize,
        /// Number of bundles that follow.
        count: usize,
    },
    /// Write the next payload word to the named register through a
    /// force-flagged result-bus entry that bypasses tag matching.
    RegisterWrite {
        /// Target register.
        target: CommandReg,
    },
}

/// Register-index field width in `RegisterWrite` operands.
const CMD_REG_INDEX_BITS: u32 = 4;

impl CommandOp {
    /// Decodes the first payload word of a command packet.
    pub fn decode(word: Word, instr_addr_width: u32) -> Result<Self, ModelError> {
        let operand = word & 0x3FFF_FFFF;
        match word >> 30 {
            0 => Ok(Self::Start {
                pc: (operand & ((1 << instr_addr_width) - 1)) as usize,
            }),
            1 => {
                let base = (operand & ((1 << instr_addr_width) - 1)) as usize;
                let count = ((operand >> instr_addr_width) & 0xFF) as usize;
                Ok(Self::ImemWrite { base, count })
            }
            2 => {
                let index = (operand & ((1 << CMD_REG_INDEX_BITS) - 1)) as u8;
                let target = match (operand >> CMD_REG_INDEX_BITS) & 0x3 {
                    0 => CommandReg::A(index),
                    1 => CommandReg::D(index),
                    2 => CommandReg::P(index),
                    _ => CommandReg::G(index),
                };
                Ok(Self::RegisterWrite { target })
            }
            _ => Err(ModelError::Config(format!(
                "reserved command opcode in word {word:#010x}"
            ))),
        }
    }

    /// Encodes into a first payload word.
    pub fn encode(&self, instr_addr_width: u32) -> Word {
        match self {
            Self::Start { pc } => *pc as u32 & ((1 << instr_addr_width) - 1),
            Self::ImemWrite { base, count } => {
                (1 << 30)
                    | ((*count as u32 & 0xFF) << instr_addr_width)
                    | (*base as u32 & ((1 << instr_addr_width) - 1))
            }
            Self::RegisterWrite { target } => {
                let (class, index) = match target {
                    CommandReg::A(i) => (0u32, *i),
                    CommandReg::D(i) => (1, *i),
                    CommandReg::P(i) => (2, *i),
                    CommandReg::G(i) => (3, *i),
                };
                (2 << 30) | (class << CMD_REG_INDEX_BITS) | u32::from(index)
            }
        }
    }
}
