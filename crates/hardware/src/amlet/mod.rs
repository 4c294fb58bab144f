//! The Amlet: one processing element of the mesh.
//!
//! Per cycle an Amlet runs, in order:
//! 1. **Commit** of last cycle's result bus into the register file, every
//!    reservation station, the loop frames, and the send unit's `D0`
//!    capture.
//! 2. **Receive** processing: delivered words pair with receive
//!    instructions; command packets turn into effects.
//! 3. **Issue**: each station masks or issues at most one slot into its
//!    functional unit.
//! 4. **Execute**: units advance one cycle; completed results form the new
//!    bus snapshot, visible to consumers next cycle.
//! 5. **Dispatch** (driven by the mesh, after every lane agrees to
//!    accept): the broadcast bundle renames into the stations.
//!
//! Dispatch is all-or-nothing across the mesh: the mesh first asks every
//! lane [`Amlet::can_accept`], and only when all lanes agree does the
//! bundle leave the dependency tracker — lockstep is preserved, divergence
//! is expressed only through predicates.

pub mod alu;
pub mod bus;
pub mod loadstore;
pub mod loops;
pub mod packet;
pub mod regfile;
pub mod resolving;
pub mod station;

use tracing::trace;

use crate::common::Word;
use crate::common::error::RuntimeFlag;
use crate::common::reg::{BReg, TaggedDst, TaggedSrc};
use crate::config::Config;
use crate::isa::bundle::{Bundle, SlotKind};
use crate::isa::slots::{
    AluLiteSlot, AluSlot, ControlSlot, LoadStoreSlot, LoopCount, PacketSlot, PredicateSlot, Src,
};
use crate::net::packet::WireFormat;
use crate::net::switch::MeshSwitch;

use alu::{AluUnit, PredicateUnit};
use bus::{BusWrite, ResultBus, WriteKind};
use loadstore::LoadStoreUnit;
use loops::{LoopReport, LoopStack};
use packet::{CommandEffect, ReceiveUnit, SendUnit};
use regfile::RenameFile;
use resolving::{DrainTarget, RsAlu, RsForward, RsMem, RsMemOp, RsPredicate, RsRecv, RsRecvOp, RsSend};
use station::{IssuePolicy, LoadStoreStation, Station, StationEvent};

/// Why a lane refuses a broadcast bundle this cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchRefusal {
    /// A destination's rename-tag domain is exhausted.
    TagExhausted,
    /// A targeted reservation station has no free slot.
    StationFull,
}

/// Everything a lane hands back to the mesh after one cycle.
#[derive(Debug, Default)]
pub struct CycleOutputs {
    /// Newly resolved loop count, if one resolved this cycle.
    pub report: Option<LoopReport>,
    /// Command-packet effects to apply at mesh scope.
    pub effects: Vec<CommandEffect>,
    /// Runtime conditions raised this cycle.
    pub flags: Vec<RuntimeFlag>,
}

/// One processing element.
#[derive(Debug)]
pub struct Amlet {
    /// Renamed register file.
    pub regs: RenameFile,
    /// Loop nest state.
    pub loops: LoopStack,
    /// Load/store unit (owns the data memory).
    pub mem: LoadStoreUnit,
    /// Packet send unit.
    pub send: SendUnit,
    /// Packet receive unit.
    pub recv: ReceiveUnit,

    alu_station: Station<RsAlu>,
    alu_lite_station: Station<RsAlu>,
    pred_station: Station<RsPredicate>,
    ls_station: LoadStoreStation,
    send_station: Station<RsSend>,
    recv_station: Station<RsRecv>,

    alu: AluUnit,
    alu_lite: AluUnit,
    pred_unit: PredicateUnit,

    /// Bus produced last cycle, consumed at the start of this one.
    bus: ResultBus,
    n_result_ports: usize,
}

impl Amlet {
    /// Builds a lane from the configuration.
    pub fn new(config: &Config) -> Self {
        let fmt = WireFormat::new(&config.network);
        let a = &config.amlet;
        Self {
            regs: RenameFile::new(config),
            loops: LoopStack::new(config.mesh.n_loop_levels),
            mem: LoadStoreUnit::new(a.data_memory_depth),
            send: SendUnit::new(fmt, config.n_b_tags()),
            recv: ReceiveUnit::new(
                fmt,
                config.mesh.instr_addr_width as u32,
                config.network.n_channels,
            ),
            alu_station: Station::new(a.n_alu_rs_slots, IssuePolicy::OldestReady),
            alu_lite_station: Station::new(a.n_alu_lite_rs_slots, IssuePolicy::OldestReady),
            pred_station: Station::new(a.n_predicate_rs_slots, IssuePolicy::OldestReady),
            ls_station: LoadStoreStation::new(a.n_load_store_rs_slots),
            send_station: Station::new(a.n_send_packet_rs_slots, IssuePolicy::InOrder),
            recv_station: Station::new(a.n_receive_packet_rs_slots, IssuePolicy::InOrder),
            alu: AluUnit::new(a.alu_latency, config.d_mask()),
            alu_lite: AluUnit::new(a.alu_lite_latency, config.a_mask()),
            pred_unit: PredicateUnit::new(a.alu_predicate_latency, config.a_mask()),
            bus: ResultBus::default(),
            n_result_ports: a.n_result_ports,
        }
    }

    /// Runs commit, receive, issue, and execute for one cycle.
    pub fn tick(&mut self, switch: &mut MeshSwitch) -> CycleOutputs {
        let prev = std::mem::take(&mut self.bus);

        // Commit phase: last cycle's bus lands everywhere at once.
        self.regs.apply_bus(&prev);
        let report = self.loops.capture(&prev);
        self.alu_station.capture(&prev);
        self.alu_lite_station.capture(&prev);
        self.pred_station.capture(&prev);
        self.ls_station.capture(&prev);
        self.send_station.capture(&prev);
        self.recv_station.capture(&prev);
        self.send.capture_d0(&prev);

        // Receive interface: delivered words, command packets.
        let recv_out = self.recv.tick(switch);
        self.bus.b.extend(recv_out.writes);
        self.bus.p.extend(recv_out.pred_writes);

        // Issue phase: one instruction (or mask) per station.
        self.issue_alu(false);
        self.issue_alu(true);
        self.issue_predicate();
        self.issue_mem();
        self.issue_send();
        self.issue_recv(switch);

        // Execute phase: units advance; completions join the new bus.
        if let Some(write) = self.alu.tick() {
            self.bus.b.push(write);
        }
        if let Some(write) = self.alu_lite.tick() {
            self.bus.b.push(write);
        }
        if let Some(write) = self.mem.tick() {
            self.bus.b.push(write);
        }
        if let Some(write) = self.pred_unit.tick() {
            self.bus.p.push(write);
        }
        self.send.tick(switch);

        // Unit completions are bounded by the port budget; null drains and
        // forced command writes ride alongside without consuming ports.
        debug_assert!(
            self.bus
                .b
                .iter()
                .filter(|w| w.kind == WriteKind::Normal)
                .count()
                <= self.n_result_ports,
            "result bus exceeded {} ports",
            self.n_result_ports
        );

        CycleOutputs {
            report,
            effects: recv_out.effects,
            flags: recv_out.flags,
        }
    }

    fn drain(&mut self, targets: Vec<DrainTarget>) {
        for target in targets {
            match target {
                DrainTarget::B(dst) => self.bus.b.push(BusWrite {
                    dst,
                    // Carry the committed value so capturing dependents
                    // observe the unchanged register.
                    value: self.regs.committed_b(dst.reg),
                    kind: WriteKind::Null,
                }),
                DrainTarget::P(dst) => self.bus.p.push(bus::PredWrite {
                    dst,
                    value: false,
                    kind: WriteKind::Null,
                }),
            }
        }
    }

    fn issue_alu(&mut self, lite: bool) {
        let (station, unit) = if lite {
            (&mut self.alu_lite_station, &mut self.alu_lite)
        } else {
            (&mut self.alu_station, &mut self.alu)
        };
        match station.step(unit.ready()) {
            StationEvent::Issue(e) => {
                unit.accept(e.op, e.src1.value, e.src2.value, e.predicate.value, e.dst);
            }
            StationEvent::Masked(drains) => self.drain(drains),
            StationEvent::Idle => {}
        }
    }

    fn issue_predicate(&mut self) {
        match self.pred_station.step(self.pred_unit.ready()) {
            StationEvent::Issue(e) => {
                self.pred_unit
                    .accept(e.op, e.src1.value, e.src2.value, e.base.value, e.dst);
            }
            StationEvent::Masked(drains) => self.drain(drains),
            StationEvent::Idle => {}
        }
    }

    fn issue_mem(&mut self) {
        match self.ls_station.step(self.mem.ready()) {
            StationEvent::Issue(e) => {
                let addr = e
                    .address()
                    .unwrap_or_else(|| unreachable!("issued with unresolved base"));
                match e.op {
                    RsMemOp::Load { dst } => self.mem.issue_load(addr, dst),
                    RsMemOp::Store { data } => self.mem.issue_store(addr, data.value),
                }
            }
            StationEvent::Masked(drains) => self.drain(drains),
            StationEvent::Idle => {}
        }
    }

    fn issue_send(&mut self) {
        match self.send_station.step(self.send.ready()) {
            StationEvent::Issue(e) => self.send.accept(&e),
            StationEvent::Masked(drains) => self.drain(drains),
            StationEvent::Idle => {}
        }
    }

    fn issue_recv(&mut self, switch: &mut MeshSwitch) {
        match self.recv_station.step(self.recv.ready()) {
            StationEvent::Issue(e) => self.recv.accept(&e, switch),
            StationEvent::Masked(drains) => self.drain(drains),
            StationEvent::Idle => {}
        }
    }

    /// Why the broadcast bundle cannot rename into this lane right now,
    /// or `None` when every destination has a free tag and every targeted
    /// station a free slot. Pure: the check commits nothing.
    pub fn refusal(&self, bundle: &Bundle) -> Option<DispatchRefusal> {
        use DispatchRefusal::{StationFull, TagExhausted};
        let tag_b = |reg: BReg| (!self.regs.can_allocate_b(reg)).then_some(TagExhausted);
        for kind in SlotKind::RENAME_ORDER {
            let refusal = match kind {
                SlotKind::Control => match &bundle.control {
                    ControlSlot::Loop(l) => l.dst.and_then(|d| tag_b(BReg::A(d))),
                    ControlSlot::Incr { dst, .. } => dst.and_then(|d| tag_b(BReg::A(d))),
                    ControlSlot::None | ControlSlot::Halt => None,
                },
                SlotKind::Predicate => match &bundle.predicate {
                    PredicateSlot::None => None,
                    PredicateSlot::Cmp(c) => {
                        if !self.pred_station.ready() {
                            Some(StationFull)
                        } else {
                            (!self.regs.can_allocate_p(c.dst)).then_some(TagExhausted)
                        }
                    }
                },
                SlotKind::Packet => match &bundle.packet {
                    PacketSlot::None => None,
                    PacketSlot::Send(_) => (!self.send_station.ready()).then_some(StationFull),
                    PacketSlot::Receive(r) => {
                        if !self.recv_station.ready() {
                            Some(StationFull)
                        } else {
                            tag_b(BReg::A(r.dst))
                        }
                    }
                    PacketSlot::GetWord(g) => {
                        if !self.recv_station.ready() {
                            Some(StationFull)
                        } else {
                            tag_b(g.dst)
                        }
                    }
                },
                SlotKind::LoadStore => match &bundle.load_store {
                    LoadStoreSlot::None => None,
                    LoadStoreSlot::Load(l) => {
                        if !self.ls_station.ready() {
                            Some(StationFull)
                        } else {
                            tag_b(l.dst)
                        }
                    }
                    LoadStoreSlot::Store(_) => (!self.ls_station.ready()).then_some(StationFull),
                },
                SlotKind::Alu => match &bundle.alu {
                    AluSlot::None => None,
                    AluSlot::Op(op) => {
                        if !self.alu_station.ready() {
                            Some(StationFull)
                        } else {
                            tag_b(op.dst)
                        }
                    }
                },
                SlotKind::AluLite => match &bundle.alu_lite {
                    AluLiteSlot::None => None,
                    AluLiteSlot::Op(op) => {
                        if !self.alu_lite_station.ready() {
                            Some(StationFull)
                        } else {
                            tag_b(op.dst)
                        }
                    }
                },
            };
            if refusal.is_some() {
                return refusal;
            }
        }
        None
    }

    /// True when the broadcast bundle can rename into this lane right now.
    pub fn can_accept(&self, bundle: &Bundle) -> bool {
        self.refusal(bundle).is_none()
    }

    fn read_src(&self, src: Src) -> TaggedSrc {
        match src {
            Src::Reg(r) => self.regs.read_b(r),
            Src::Imm(v) => TaggedSrc::imm(Word::from(v)),
            Src::LoopIndex(_) => unreachable!("loop indices are substituted at expansion"),
        }
    }

    /// Renames the bundle into the stations. Caller must have checked
    /// [`Amlet::can_accept`] on every lane this cycle.
    ///
    /// Slots chain their register-state updates in
    /// [`SlotKind::RENAME_ORDER`]; the dependency tracker guarantees no
    /// slot reads a register a chain-earlier slot of the same bundle
    /// writes.
    pub fn dispatch(&mut self, bundle: &Bundle) -> Option<LoopReport> {
        let mut report = None;

        // Control.
        match &bundle.control {
            ControlSlot::None | ControlSlot::Halt => {}
            ControlSlot::Loop(l) => {
                let (count, controller_known) = match l.count {
                    LoopCount::Immediate(n) => (TaggedSrc::imm(Word::from(n)), true),
                    LoopCount::Local(a) => (self.regs.read_b(BReg::A(a)), false),
                    LoopCount::Global(_) => {
                        unreachable!("global counts are substituted at expansion")
                    }
                };
                self.loops.open(l.level, count, controller_known);
                report = self.loops.report_now(l.level);
                if let Some(d) = l.dst {
                    let dst = self.regs.allocate_b(BReg::A(d));
                    self.push_loop_write(dst, 0);
                }
            }
            ControlSlot::Incr { level, dst } => {
                let index = self.loops.incr(*level);
                if let Some(d) = dst {
                    let dst = self.regs.allocate_b(BReg::A(*d));
                    self.push_loop_write(dst, index);
                }
            }
        }

        // Predicate.
        if let PredicateSlot::Cmp(c) = &bundle.predicate {
            let entry = RsPredicate {
                op: c.op,
                src1: self.read_src(c.src1),
                src2: self.read_src(c.src2),
                base: self.regs.read_p(c.base),
                dst: self.regs.allocate_p(c.dst),
            };
            self.pred_station.push(entry);
        }

        // Packet.
        match &bundle.packet {
            PacketSlot::None => {}
            PacketSlot::Send(s) => {
                let entry = RsSend {
                    length: self.read_src(s.length),
                    x_dest: self.read_src(s.x_dest),
                    y_dest: self.read_src(s.y_dest),
                    channel: s.channel,
                    forward: s.forward,
                    append: s.append,
                    broadcast: s.broadcast,
                    predicate: self.regs.read_p(s.predicate),
                };
                self.send_station.push(entry);
            }
            PacketSlot::Receive(r) => {
                let forward = r.forward.as_ref().map(|f| RsForward {
                    x_dest: self.read_src(f.x_dest),
                    y_dest: self.read_src(f.y_dest),
                    append: f.append,
                    append_len: f.append_len,
                });
                let entry = RsRecv {
                    op: RsRecvOp::Header {
                        dst: self.regs.allocate_b(BReg::A(r.dst)),
                        forward,
                    },
                    channel: r.channel,
                    predicate: self.regs.read_p(r.predicate),
                };
                self.recv_station.push(entry);
            }
            PacketSlot::GetWord(g) => {
                let entry = RsRecv {
                    op: RsRecvOp::GetWord {
                        dst: self.regs.allocate_b(g.dst),
                    },
                    channel: g.channel,
                    predicate: self.regs.read_p(g.predicate),
                };
                self.recv_station.push(entry);
            }
        }

        // LoadStore.
        match &bundle.load_store {
            LoadStoreSlot::None => {}
            LoadStoreSlot::Load(l) => {
                let entry = RsMem {
                    base: self.regs.read_b(BReg::A(l.base)),
                    offset: l.offset,
                    op: RsMemOp::Load {
                        dst: self.regs.allocate_b(l.dst),
                    },
                    predicate: self.regs.read_p(l.predicate),
                };
                self.ls_station.push(entry);
            }
            LoadStoreSlot::Store(s) => {
                let entry = RsMem {
                    base: self.regs.read_b(BReg::A(s.base)),
                    offset: s.offset,
                    op: RsMemOp::Store {
                        data: self.regs.read_b(s.src),
                    },
                    predicate: self.regs.read_p(s.predicate),
                };
                self.ls_station.push(entry);
            }
        }

        // ALU, then ALULite (chain order).
        if let AluSlot::Op(op) = &bundle.alu {
            let entry = RsAlu {
                op: op.op,
                src1: self.regs.read_b(op.src1),
                src2: self.read_src(op.src2),
                dst: self.regs.allocate_b(op.dst),
                predicate: self.regs.read_p(op.predicate),
            };
            self.alu_station.push(entry);
        }
        if let AluLiteSlot::Op(op) = &bundle.alu_lite {
            let entry = RsAlu {
                op: op.op,
                src1: self.regs.read_b(op.src1),
                src2: self.read_src(op.src2),
                dst: self.regs.allocate_b(op.dst),
                predicate: self.regs.read_p(op.predicate),
            };
            self.alu_lite_station.push(entry);
        }

        trace!("lane: dispatched bundle");
        report
    }

    /// Loop-index writes complete with single-cycle latency through their
    /// own bus port.
    fn push_loop_write(&mut self, dst: TaggedDst, value: Word) {
        self.bus.b.push(BusWrite {
            dst,
            value,
            kind: WriteKind::Normal,
        });
    }

    /// True when every station, unit, and rename tag has drained.
    pub fn is_idle(&self) -> bool {
        self.alu_station.is_empty()
            && self.alu_lite_station.is_empty()
            && self.pred_station.is_empty()
            && self.ls_station.is_empty()
            && self.send_station.is_empty()
            && self.recv_station.is_empty()
            && self.alu.is_idle()
            && self.alu_lite.is_idle()
            && self.pred_unit.is_idle()
            && self.mem.is_idle()
            && self.send.is_idle()
            && self.recv.is_idle()
            && self.regs.no_pending()
            && self.bus.is_empty()
    }
}
