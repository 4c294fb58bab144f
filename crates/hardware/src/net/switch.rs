//! The per-node 5-port packet switch.
//!
//! Each node's switch has five input handlers and five output handlers
//! (North, East, South, West, Here) per virtual channel. It implements:
//! 1. **XY routing:** first match the column via East/West, then the row
//!    via North/South, then deliver to Here.
//! 2. **Broadcast:** replicate toward the destination corner; North/South
//!    egress rewrites `x_dest` to the local column so the fan-out collapses
//!    and every covered node receives exactly one copy.
//! 3. **Arbitration:** one rotating priority counter shared by all output
//!    handlers of the switch; a newly free output grants to the first
//!    requesting input at or after the pointer. An input replicating to
//!    several outputs must win all of them in the same cycle or it releases
//!    its grants and retries.
//! 4. **Binding:** an output stays bound to its input until the packet's
//!    last word has passed; no new connection can form in the interim.
//! 5. **Forward and append:** a packet destined Here with its forward bit
//!    set waits for a directive from the local receive unit, then also
//!    streams a copy onward under a rewritten header; with append
//!    requested, the onward output rebinds to the lane's append stream
//!    after the forwarded words and extends the packet.
//! 6. **Flow control:** every hop is ready/valid; an input only advances a
//!    word when every output it replicates into has skid space.

use std::collections::VecDeque;

use tracing::trace;

use crate::net::packet::{LinkWord, PacketHeader, PacketMode, WireFormat};

/// Switch port index.
pub type Port = usize;

/// North port (toward row - 1).
pub const PORT_N: Port = 0;
/// East port (toward column + 1).
pub const PORT_E: Port = 1;
/// South port (toward row + 1).
pub const PORT_S: Port = 2;
/// West port (toward column - 1).
pub const PORT_W: Port = 3;
/// Local lane port.
pub const PORT_HERE: Port = 4;

/// Cardinal directions for neighbor links.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dir {
    /// Toward row - 1.
    North,
    /// Toward column + 1.
    East,
    /// Toward row + 1.
    South,
    /// Toward column - 1.
    West,
}

impl Dir {
    /// The four directions in port order.
    pub const ALL: [Self; 4] = [Self::North, Self::East, Self::South, Self::West];

    /// Port index of this direction.
    #[inline]
    pub fn port(self) -> Port {
        match self {
            Self::North => PORT_N,
            Self::East => PORT_E,
            Self::South => PORT_S,
            Self::West => PORT_W,
        }
    }

    /// The direction a neighbor sees this link arriving from.
    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Self::North => Self::South,
            Self::East => Self::West,
            Self::South => Self::North,
            Self::West => Self::East,
        }
    }
}

/// Forward request posted by the local receive unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ForwardDirective {
    /// Onward destination column.
    pub x_dest: u8,
    /// Onward destination row.
    pub y_dest: u8,
    /// Extend the forwarded packet with local payload.
    pub append: bool,
    /// Number of appended words.
    pub append_len: u8,
    /// Alternates between consecutive directives so back-to-back forwards
    /// stay distinguishable at the wire level.
    pub toggle: bool,
}

/// Input skid capacity in words.
const IN_BUF_CAP: usize = 2;
/// Local delivery queue capacity in words.
const HERE_OUT_CAP: usize = 4;

/// Streaming state of a routed input.
#[derive(Clone, Debug)]
struct RouteState {
    /// Output ports this packet replicates into.
    outputs: [bool; 5],
    /// Words still to take from the input stream (header + payload).
    remaining: u32,
    /// Replacement header for non-Here copies (forwarding).
    onward_header: Option<PacketHeader>,
}

/// One input handler: skid buffer plus routing state.
#[derive(Clone, Debug, Default)]
struct InputState {
    buf: VecDeque<LinkWord>,
    route: Option<RouteState>,
}

/// What an output handler is currently emitting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OutBinding {
    /// No packet in flight.
    Free,
    /// Bound to an input handler.
    Input(Port),
    /// Pulling appended words from the lane's append stream.
    Appending,
}

/// One output handler: binding, skid register, word counters.
#[derive(Clone, Debug)]
struct OutputState {
    binding: OutBinding,
    skid: Option<LinkWord>,
    /// Words still to pass before this binding releases.
    remaining: u32,
    /// Appended words to pull once the forwarded stream completes.
    append_pending: u32,
}

impl Default for OutputState {
    fn default() -> Self {
        Self {
            binding: OutBinding::Free,
            skid: None,
            remaining: 0,
            append_pending: 0,
        }
    }
}

/// Per-channel switch state.
#[derive(Clone, Debug, Default)]
struct ChannelState {
    inputs: [InputState; 5],
    outputs: [OutputState; 5],
    /// Delivered words awaiting the local receive unit.
    here_out: VecDeque<LinkWord>,
    /// Locally supplied append words.
    append_in: VecDeque<u32>,
    /// Directives posted by the local receive unit.
    forwards: VecDeque<ForwardDirective>,
    /// Toggle of the most recently accepted directive.
    last_toggle: Option<bool>,
}

/// The 5-port switch of one mesh node.
#[derive(Debug)]
pub struct MeshSwitch {
    /// Node column.
    x: u8,
    /// Node row.
    y: u8,
    fmt: WireFormat,
    channels: Vec<ChannelState>,
    /// Rotating arbitration pointer, shared by every output handler of
    /// this switch.
    priority: usize,
}

impl MeshSwitch {
    /// Creates the switch for the node at `(x, y)`.
    pub fn new(x: u8, y: u8, n_channels: usize, fmt: WireFormat) -> Self {
        Self {
            x,
            y,
            fmt,
            channels: (0..n_channels).map(|_| ChannelState::default()).collect(),
            priority: 0,
        }
    }

    /// Number of virtual channels.
    #[inline]
    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    /// True when no channel holds any word or binding.
    pub fn is_idle(&self) -> bool {
        self.channels.iter().all(|ch| {
            ch.inputs.iter().all(|i| i.buf.is_empty() && i.route.is_none())
                && ch
                    .outputs
                    .iter()
                    .all(|o| o.binding == OutBinding::Free && o.skid.is_none())
                && ch.here_out.is_empty()
                && ch.append_in.is_empty()
        })
    }

    /// True when the given link input can accept a word this cycle.
    #[inline]
    pub fn input_has_space(&self, port: Port, channel: usize) -> bool {
        self.channels[channel].inputs[port].buf.len() < IN_BUF_CAP
    }

    /// Delivers a word into a link input. Caller must have checked
    /// [`MeshSwitch::input_has_space`].
    pub fn push_input(&mut self, port: Port, channel: usize, word: LinkWord) {
        debug_assert!(self.input_has_space(port, channel));
        self.channels[channel].inputs[port].buf.push_back(word);
    }

    /// Word waiting at a link output, if any.
    #[inline]
    pub fn peek_output(&self, port: Port, channel: usize) -> Option<LinkWord> {
        self.channels[channel].outputs[port].skid
    }

    /// Removes and returns the word at a link output.
    pub fn pop_output(&mut self, port: Port, channel: usize) -> Option<LinkWord> {
        self.channels[channel].outputs[port].skid.take()
    }

    /// True when the lane can inject a word into the Here input.
    #[inline]
    pub fn here_in_ready(&self, channel: usize) -> bool {
        self.input_has_space(PORT_HERE, channel)
    }

    /// Injects a locally generated word (header or payload) into the Here
    /// input.
    pub fn push_here(&mut self, channel: usize, word: LinkWord) {
        self.push_input(PORT_HERE, channel, word);
    }

    /// Supplies one append word from the lane.
    pub fn push_append(&mut self, channel: usize, word: u32) {
        self.channels[channel].append_in.push_back(word);
    }

    /// Posts a forward directive from the local receive unit.
    pub fn post_forward(&mut self, channel: usize, directive: ForwardDirective) {
        let ch = &mut self.channels[channel];
        debug_assert!(
            ch.last_toggle != Some(directive.toggle),
            "back-to-back forward directives must alternate the toggle bit"
        );
        ch.last_toggle = Some(directive.toggle);
        ch.forwards.push_back(directive);
    }

    /// Next word delivered to the local lane, if any.
    pub fn pop_here_out(&mut self, channel: usize) -> Option<LinkWord> {
        self.channels[channel].here_out.pop_front()
    }

    /// Peeks the local delivery queue.
    pub fn peek_here_out(&self, channel: usize) -> Option<LinkWord> {
        self.channels[channel].here_out.front().copied()
    }

    /// Output ports a header routes into from this node.
    fn route_ports(&self, header: &PacketHeader) -> [bool; 5] {
        let mut ports = [false; 5];
        if header.is_broadcast {
            if header.x_dest > self.x {
                ports[PORT_E] = true;
            } else if header.x_dest < self.x {
                ports[PORT_W] = true;
            }
            if header.y_dest > self.y {
                ports[PORT_S] = true;
            } else if header.y_dest < self.y {
                ports[PORT_N] = true;
            }
            ports[PORT_HERE] = true;
        } else if header.x_dest > self.x {
            ports[PORT_E] = true;
        } else if header.x_dest < self.x {
            ports[PORT_W] = true;
        } else if header.y_dest > self.y {
            ports[PORT_S] = true;
        } else if header.y_dest < self.y {
            ports[PORT_N] = true;
        } else {
            ports[PORT_HERE] = true;
        }
        ports
    }

    /// Runs one routing cycle: route headers, arbitrate outputs, move
    /// words from input buffers into output skids, drain append streams.
    /// Inter-node transfers happen outside, at the mesh level.
    pub fn tick(&mut self) {
        for channel in 0..self.channels.len() {
            self.bind_inputs(channel);
            self.stream_words(channel);
            self.drain_appends(channel);
        }
        self.priority = (self.priority + 1) % 5;
    }

    /// Tries to route and bind every input whose head word is a header.
    fn bind_inputs(&mut self, channel: usize) {
        // Gather (input, wanted outputs, stream length, onward header).
        let mut requests: [Option<RouteState>; 5] = [const { None }; 5];
        for port in 0..5 {
            let ch = &self.channels[channel];
            let input = &ch.inputs[port];
            if input.route.is_some() {
                continue;
            }
            let Some(&word) = input.buf.front() else {
                continue;
            };
            if !word.is_header {
                // Stray payload with no routed header: drop it. The
                // receive path reports UnexpectedHeader-class conditions;
                // the switch itself stays silent.
                continue;
            }
            let header = PacketHeader::decode(word.data, &self.fmt);
            let local = !header.is_broadcast && header.x_dest == self.x && header.y_dest == self.y;
            if local && header.forward {
                // Hold the header until the lane posts a directive.
                let Some(directive) = self.channels[channel].forwards.front().copied() else {
                    continue;
                };
                let extra = if directive.append {
                    u16::from(directive.append_len)
                } else {
                    0
                };
                let onward = PacketHeader {
                    length: header.length + extra,
                    x_dest: directive.x_dest,
                    y_dest: directive.y_dest,
                    mode: if directive.append {
                        PacketMode::Append
                    } else {
                        PacketMode::Normal
                    },
                    forward: false,
                    is_broadcast: false,
                    append_length: if directive.append {
                        directive.append_len
                    } else {
                        0
                    },
                };
                let mut outputs = self.route_ports(&onward);
                outputs[PORT_HERE] = true;
                requests[port] = Some(RouteState {
                    outputs,
                    remaining: 1 + u32::from(header.length),
                    onward_header: Some(onward),
                });
            } else {
                requests[port] = Some(RouteState {
                    outputs: self.route_ports(&header),
                    remaining: 1 + u32::from(header.length),
                    onward_header: None,
                });
            }
        }

        // Arbitrate: each free output grants to the first requester at or
        // after the shared priority pointer; an input binds only if it won
        // every output it needs.
        let mut grants: [Option<Port>; 5] = [None; 5];
        for out in 0..5 {
            if self.channels[channel].outputs[out].binding != OutBinding::Free
                || self.channels[channel].outputs[out].skid.is_some()
            {
                continue;
            }
            for i in 0..5 {
                let input = (self.priority + i) % 5;
                if requests[input]
                    .as_ref()
                    .is_some_and(|r| r.outputs[out])
                {
                    grants[out] = Some(input);
                    break;
                }
            }
        }
        for (port, request) in requests.into_iter().enumerate() {
            let Some(route) = request else { continue };
            let all_won = (0..5)
                .filter(|&o| route.outputs[o])
                .all(|o| grants[o] == Some(port));
            if !all_won {
                continue;
            }
            trace!(
                x = self.x,
                y = self.y,
                channel,
                input = port,
                "switch: bound packet ({} words)",
                route.remaining
            );
            if route.onward_header.is_some() {
                // The directive is consumed the moment its packet binds.
                let _ = self.channels[channel].forwards.pop_front();
            }
            let append_len = route
                .onward_header
                .map(|h| u32::from(h.append_length))
                .unwrap_or(0);
            for o in 0..5 {
                if route.outputs[o] {
                    let out = &mut self.channels[channel].outputs[o];
                    out.binding = OutBinding::Input(port);
                    out.remaining = route.remaining;
                    out.append_pending = if o != PORT_HERE { append_len } else { 0 };
                }
            }
            self.channels[channel].inputs[port].route = Some(route);
        }
    }

    /// Header data as it leaves through the given output.
    fn egress_header(&self, route: &RouteState, out: Port, incoming: LinkWord) -> LinkWord {
        let mut header = match (out, route.onward_header) {
            (PORT_HERE, _) | (_, None) => PacketHeader::decode(incoming.data, &self.fmt),
            (_, Some(onward)) => onward,
        };
        // Collapse broadcast fan-out: row-directed copies may no longer
        // spread along X.
        if out == PORT_N || out == PORT_S {
            header.x_dest = self.x;
        }
        // Append handling is local to this node; downstream sees a plain
        // packet of the full length.
        if out != PORT_HERE && header.mode == PacketMode::Append {
            header.mode = PacketMode::Normal;
        }
        LinkWord::header(header.encode(&self.fmt))
    }

    /// Moves words from routed inputs into their output skids.
    fn stream_words(&mut self, channel: usize) {
        for port in 0..5 {
            let Some(route) = self.channels[channel].inputs[port].route.clone() else {
                continue;
            };
            // Every replica target must have skid space; Here delivery
            // additionally needs queue space.
            let ready = (0..5).filter(|&o| route.outputs[o]).all(|o| {
                self.channels[channel].outputs[o].skid.is_none()
                    && (o != PORT_HERE || self.channels[channel].here_out.len() < HERE_OUT_CAP)
            });
            if !ready {
                continue;
            }
            let Some(word) = self.channels[channel].inputs[port].buf.pop_front() else {
                continue;
            };
            for o in 0..5 {
                if !route.outputs[o] {
                    continue;
                }
                let egress = if word.is_header {
                    self.egress_header(&route, o, word)
                } else {
                    word
                };
                let out = &mut self.channels[channel].outputs[o];
                out.skid = Some(egress);
                out.remaining -= 1;
                if out.remaining == 0 {
                    out.binding = if out.append_pending > 0 {
                        OutBinding::Appending
                    } else {
                        OutBinding::Free
                    };
                }
            }
            let input = &mut self.channels[channel].inputs[port];
            let route_state = input.route.as_mut().unwrap_or_else(|| unreachable!());
            route_state.remaining -= 1;
            if route_state.remaining == 0 {
                input.route = None;
            }
        }
    }

    /// Feeds appending outputs from the lane's append stream.
    fn drain_appends(&mut self, channel: usize) {
        for out in 0..5 {
            let ch = &mut self.channels[channel];
            let output = &mut ch.outputs[out];
            if output.binding != OutBinding::Appending || output.skid.is_some() {
                continue;
            }
            let Some(word) = ch.append_in.pop_front() else {
                continue;
            };
            output.skid = Some(LinkWord::payload(word));
            output.append_pending -= 1;
            if output.append_pending == 0 {
                output.binding = OutBinding::Free;
            }
        }
    }

    /// Moves Here-port skid words into the local delivery queue. Called by
    /// the mesh after [`MeshSwitch::tick`] so delivery behaves like any
    /// other link.
    pub fn deliver_here(&mut self) {
        for channel in 0..self.channels.len() {
            let ch = &mut self.channels[channel];
            if ch.here_out.len() < HERE_OUT_CAP {
                if let Some(word) = ch.outputs[PORT_HERE].skid.take() {
                    ch.here_out.push_back(word);
                }
            }
        }
    }
}
