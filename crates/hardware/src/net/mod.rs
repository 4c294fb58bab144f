//! Interconnect: wire format, packet headers, command packets, and the
//! per-node mesh switch.
//!
//! Links carry one word per cycle with ready/valid handshaking. A packet is
//! a header word followed by `length` payload words; the header carries XY
//! routing coordinates, a mode, and broadcast/append metadata. Command
//! packets are consumed by lanes without any receive instruction and mutate
//! controller, instruction-memory, or register state.

pub mod packet;
pub mod switch;

pub use packet::{CommandOp, CommandReg, LinkWord, PacketHeader, PacketMode, WireFormat};
pub use switch::{Dir, ForwardDirective, MeshSwitch, PORT_HERE, Port};
