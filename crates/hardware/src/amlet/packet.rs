//! Packet interface units: send and receive.
//!
//! **Send.** A send instruction declares length, destination, and channel.
//! The payload arrives separately: every write to `D0` enqueues one word,
//! in issue order (the unit tracks the next expected `D0` tag, so results
//! arriving out of order on the bus are still consumed in program order).
//! The header is held until `length` words are queued, then header and
//! payload stream into the switch's Here input. A send with the append
//! flag feeds the switch's append stream instead of opening a packet.
//!
//! **Receive.** Normal packets pair one header-consuming receive with the
//! header and one `GetWord` with each payload word. A receive carrying a
//! forward request posts the directive to the switch as soon as it is
//! accepted — the switch holds forward-flagged headers until the directive
//! arrives. Command packets need no instruction at all: they are consumed
//! unconditionally and turned into effects (controller start, instruction
//! memory writes, forced register writes).

use std::collections::VecDeque;

use tracing::debug;

use crate::amlet::bus::{BusWrite, PredWrite, ResultBus, WriteKind};
use crate::amlet::resolving::{RsRecv, RsRecvOp, RsSend};
use crate::common::Word;
use crate::common::error::RuntimeFlag;
use crate::common::reg::{BReg, PredDst, RegTag, TaggedDst};
use crate::isa::encode::{EncodedBundle, WORDS_PER_BUNDLE};
use crate::net::packet::{CommandOp, CommandReg, LinkWord, PacketHeader, PacketMode, WireFormat};
use crate::net::switch::{ForwardDirective, MeshSwitch};

/// Mesh-level side effects of a consumed command packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandEffect {
    /// Set the controller PC and begin issue.
    Start {
        /// Initial bundle address.
        pc: usize,
    },
    /// Write bundles into instruction memory.
    ImemWrite {
        /// First bundle address.
        base: usize,
        /// Decoded-word bundles to store.
        bundles: Vec<EncodedBundle>,
    },
    /// Write a mesh-global register.
    GlobalWrite {
        /// G-register index.
        index: u8,
        /// Value.
        value: Word,
    },
}

/// An opened outgoing packet.
#[derive(Debug)]
struct ActiveSend {
    header_word: Word,
    header_sent: bool,
    remaining: u16,
    length: u16,
    channel: u8,
    append: bool,
}

/// The packet send unit.
#[derive(Debug)]
pub struct SendUnit {
    fmt: WireFormat,
    payload: VecDeque<Word>,
    expect_tag: RegTag,
    n_b_tags: u8,
    current: Option<ActiveSend>,
    /// Packets fully dispatched into the switch.
    pub packets_sent: u64,
}

impl SendUnit {
    /// Creates the unit.
    pub fn new(fmt: WireFormat, n_b_tags: u8) -> Self {
        Self {
            fmt,
            payload: VecDeque::new(),
            // The first D0 write allocates tag 1 (reset last_tag is 0).
            expect_tag: RegTag(0).next(n_b_tags),
            n_b_tags,
            current: None,
            packets_sent: 0,
        }
    }

    /// True when a new send instruction can be accepted.
    #[inline]
    pub fn ready(&self) -> bool {
        self.current.is_none()
    }

    /// True when no packet is open and no payload is queued.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.payload.is_empty()
    }

    /// Consumes `D0` results off the bus in tag order.
    ///
    /// A null entry (masked `D0` write) advances the expected tag without
    /// enqueuing a word.
    pub fn capture_d0(&mut self, bus: &ResultBus) {
        loop {
            let Some(entry) = bus
                .b
                .iter()
                .find(|w| w.dst.reg == BReg::D(0) && w.dst.tag == self.expect_tag)
            else {
                return;
            };
            if entry.kind != WriteKind::Null {
                self.payload.push_back(entry.value);
            }
            self.expect_tag = self.expect_tag.next(self.n_b_tags);
        }
    }

    /// Accepts a resolved send instruction.
    pub fn accept(&mut self, send: &RsSend) {
        debug_assert!(self.ready());
        let length = send.length.value as u16;
        let header = PacketHeader {
            length,
            x_dest: send.x_dest.value as u8,
            y_dest: send.y_dest.value as u8,
            mode: PacketMode::Normal,
            forward: send.forward,
            is_broadcast: send.broadcast,
            append_length: 0,
        };
        self.current = Some(ActiveSend {
            header_word: header.encode(&self.fmt),
            header_sent: false,
            remaining: length,
            length,
            channel: send.channel,
            append: send.append,
        });
    }

    /// Streams at most one word into the switch.
    pub fn tick(&mut self, switch: &mut MeshSwitch) {
        let Some(cur) = &mut self.current else { return };
        let channel = usize::from(cur.channel);
        if cur.append {
            if cur.remaining > 0 {
                if let Some(word) = self.payload.pop_front() {
                    switch.push_append(channel, word);
                    cur.remaining -= 1;
                }
            }
            if cur.remaining == 0 {
                self.current = None;
            }
            return;
        }
        if !cur.header_sent {
            // Hold the header until the full payload is queued.
            if self.payload.len() >= usize::from(cur.length) && switch.here_in_ready(channel) {
                switch.push_here(channel, LinkWord::header(cur.header_word));
                cur.header_sent = true;
            }
        } else if cur.remaining > 0 && switch.here_in_ready(channel) {
            let word = self
                .payload
                .pop_front()
                .unwrap_or_else(|| unreachable!("payload was complete at header dispatch"));
            switch.push_here(channel, LinkWord::payload(word));
            cur.remaining -= 1;
        }
        if let Some(cur) = &self.current {
            if cur.header_sent && cur.remaining == 0 {
                self.packets_sent += 1;
                self.current = None;
            }
        }
    }
}

/// Expected next word class on a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Expect {
    Header,
    Payload(u16),
}

/// An in-progress command packet.
#[derive(Debug)]
struct CommandProgress {
    remaining: u16,
    words: Vec<Word>,
}

/// The accepted receive instruction awaiting its word.
#[derive(Clone, Copy, Debug)]
enum ActiveRecv {
    Header { dst: TaggedDst, channel: u8 },
    GetWord { dst: TaggedDst, channel: u8 },
}

/// Results of one receive-unit cycle.
#[derive(Debug, Default)]
pub struct RecvOutputs {
    /// B-space bus entries produced.
    pub writes: Vec<BusWrite>,
    /// P-space bus entries produced (forced predicate writes).
    pub pred_writes: Vec<PredWrite>,
    /// Command effects for the mesh to apply.
    pub effects: Vec<CommandEffect>,
    /// Runtime conditions raised.
    pub flags: Vec<RuntimeFlag>,
}

/// The packet receive unit.
#[derive(Debug)]
pub struct ReceiveUnit {
    fmt: WireFormat,
    instr_addr_width: u32,
    expect: Vec<Expect>,
    command: Vec<Option<CommandProgress>>,
    next_toggle: Vec<bool>,
    current: Option<ActiveRecv>,
    /// Headers consumed (command and normal).
    pub packets_received: u64,
    /// Forward directives posted to the switch.
    pub packets_forwarded: u64,
}

impl ReceiveUnit {
    /// Creates the unit.
    pub fn new(fmt: WireFormat, instr_addr_width: u32, n_channels: usize) -> Self {
        Self {
            fmt,
            instr_addr_width,
            expect: vec![Expect::Header; n_channels],
            command: (0..n_channels).map(|_| None).collect(),
            next_toggle: vec![false; n_channels],
            current: None,
            packets_received: 0,
            packets_forwarded: 0,
        }
    }

    /// True when a new receive instruction can be accepted.
    #[inline]
    pub fn ready(&self) -> bool {
        self.current.is_none()
    }

    /// True when no instruction or command is in progress.
    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.command.iter().all(Option::is_none)
    }

    /// Accepts a resolved receive instruction; forward directives post to
    /// the switch immediately so it can release the held header.
    pub fn accept(&mut self, recv: &RsRecv, switch: &mut MeshSwitch) {
        debug_assert!(self.ready());
        let channel = recv.channel;
        match &recv.op {
            RsRecvOp::Header { dst, forward } => {
                if let Some(f) = forward {
                    self.packets_forwarded += 1;
                    let toggle = self.next_toggle[usize::from(channel)];
                    self.next_toggle[usize::from(channel)] = !toggle;
                    switch.post_forward(
                        usize::from(channel),
                        ForwardDirective {
                            x_dest: f.x_dest.value as u8,
                            y_dest: f.y_dest.value as u8,
                            append: f.append,
                            append_len: f.append_len,
                            toggle,
                        },
                    );
                }
                self.current = Some(ActiveRecv::Header { dst: *dst, channel });
            }
            RsRecvOp::GetWord { dst } => {
                self.current = Some(ActiveRecv::GetWord { dst: *dst, channel });
            }
        }
    }

    /// Processes at most one delivered word per channel.
    pub fn tick(&mut self, switch: &mut MeshSwitch) -> RecvOutputs {
        let mut out = RecvOutputs::default();
        for channel in 0..self.expect.len() {
            self.tick_channel(channel, switch, &mut out);
        }
        out
    }

    fn tick_channel(&mut self, channel: usize, switch: &mut MeshSwitch, out: &mut RecvOutputs) {
        // A command packet in flight owns the channel until it completes.
        if self.command[channel].is_some() {
            let Some(word) = switch.peek_here_out(channel) else {
                return;
            };
            if word.is_header {
                out.flags.push(RuntimeFlag::UnexpectedHeader);
                self.command[channel] = None;
                return;
            }
            let _ = switch.pop_here_out(channel);
            let cmd = self.command[channel]
                .as_mut()
                .unwrap_or_else(|| unreachable!());
            cmd.words.push(word.data);
            cmd.remaining -= 1;
            if cmd.remaining == 0 {
                let cmd = self.command[channel]
                    .take()
                    .unwrap_or_else(|| unreachable!());
                self.finalize_command(&cmd.words, out);
            }
            return;
        }

        let Some(word) = switch.peek_here_out(channel) else {
            return;
        };
        if word.is_header {
            let header = PacketHeader::decode(word.data, &self.fmt);
            if matches!(self.expect[channel], Expect::Payload(_)) {
                out.flags.push(RuntimeFlag::UnexpectedHeader);
                self.expect[channel] = Expect::Header;
                return;
            }
            if header.mode == PacketMode::Command {
                let _ = switch.pop_here_out(channel);
                self.packets_received += 1;
                if header.length > 0 {
                    self.command[channel] = Some(CommandProgress {
                        remaining: header.length,
                        words: Vec::with_capacity(usize::from(header.length)),
                    });
                }
                return;
            }
            match self.current {
                Some(ActiveRecv::Header { dst, channel: ch }) if usize::from(ch) == channel => {
                    let _ = switch.pop_here_out(channel);
                    self.packets_received += 1;
                    debug!(channel, length = header.length, "receive: header consumed");
                    out.writes.push(BusWrite {
                        dst,
                        value: Word::from(header.length),
                        kind: WriteKind::Normal,
                    });
                    self.expect[channel] = if header.length > 0 {
                        Expect::Payload(header.length)
                    } else {
                        Expect::Header
                    };
                    self.current = None;
                }
                Some(ActiveRecv::GetWord { dst, channel: ch }) if usize::from(ch) == channel => {
                    // GetWord posted where a header consume was required.
                    out.flags.push(RuntimeFlag::ReceiveMismatch);
                    out.writes.push(BusWrite {
                        dst,
                        value: 0,
                        kind: WriteKind::Null,
                    });
                    self.current = None;
                }
                _ => {}
            }
            return;
        }

        // Payload word.
        match self.expect[channel] {
            Expect::Payload(remaining) => match self.current {
                Some(ActiveRecv::GetWord { dst, channel: ch }) if usize::from(ch) == channel => {
                    let _ = switch.pop_here_out(channel);
                    out.writes.push(BusWrite {
                        dst,
                        value: word.data,
                        kind: WriteKind::Normal,
                    });
                    self.expect[channel] = if remaining > 1 {
                        Expect::Payload(remaining - 1)
                    } else {
                        Expect::Header
                    };
                    self.current = None;
                }
                Some(ActiveRecv::Header { dst, channel: ch }) if usize::from(ch) == channel => {
                    // Header consume posted mid-payload.
                    out.flags.push(RuntimeFlag::ReceiveMismatch);
                    out.writes.push(BusWrite {
                        dst,
                        value: 0,
                        kind: WriteKind::Null,
                    });
                    self.current = None;
                }
                _ => {}
            },
            Expect::Header => {
                // Stray payload with nothing expecting it; drop it so the
                // channel can make progress. Everything downstream is
                // undefined once this fires.
                out.flags.push(RuntimeFlag::UnexpectedHeader);
                let _ = switch.pop_here_out(channel);
            }
        }
    }

    fn finalize_command(&self, words: &[Word], out: &mut RecvOutputs) {
        let Some(&first) = words.first() else { return };
        let op = match CommandOp::decode(first, self.instr_addr_width) {
            Ok(op) => op,
            Err(_) => {
                out.flags.push(RuntimeFlag::MalformedCommand);
                return;
            }
        };
        match op {
            CommandOp::Start { pc } => out.effects.push(CommandEffect::Start { pc }),
            CommandOp::ImemWrite { base, count } => {
                let available = &words[1..];
                let needed = count * WORDS_PER_BUNDLE;
                if available.len() < needed {
                    out.flags.push(RuntimeFlag::ImemWriteOverflow);
                }
                let bundles = available
                    .chunks_exact(WORDS_PER_BUNDLE)
                    .take(count)
                    .map(|chunk| {
                        let mut bundle: EncodedBundle = [0; WORDS_PER_BUNDLE];
                        bundle.copy_from_slice(chunk);
                        bundle
                    })
                    .collect();
                out.effects.push(CommandEffect::ImemWrite { base, bundles });
            }
            CommandOp::RegisterWrite { target } => {
                let Some(&value) = words.get(1) else {
                    out.flags.push(RuntimeFlag::MalformedCommand);
                    return;
                };
                match target {
                    CommandReg::A(i) => out.writes.push(BusWrite {
                        dst: TaggedDst {
                            reg: BReg::A(i),
                            tag: RegTag(0),
                        },
                        value,
                        kind: WriteKind::Force,
                    }),
                    CommandReg::D(i) => out.writes.push(BusWrite {
                        dst: TaggedDst {
                            reg: BReg::D(i),
                            tag: RegTag(0),
                        },
                        value,
                        kind: WriteKind::Force,
                    }),
                    CommandReg::P(i) => out.pred_writes.push(PredWrite {
                        dst: PredDst {
                            reg: i,
                            tag: RegTag(0),
                        },
                        value: value != 0,
                        kind: WriteKind::Force,
                    }),
                    CommandReg::G(i) => out.effects.push(CommandEffect::GlobalWrite {
                        index: i,
                        value,
                    }),
                }
            }
        }
    }
}
