//! The control unit: program counter, loop expansion, halt.
//!
//! The PC steps one bundle per cycle unless held by a loop. Loop opcodes
//! push a frame; at the end of each body pass the PC returns to the bundle
//! after the header and a synthetic `Incr` is injected into the next
//! bundle at the active loop level. When the final iteration completes the
//! frame pops.
//!
//! Iteration counts:
//! - `LoopImmediate` — known at push.
//! - `LoopGlobal` — read from a G-register at controller scope at push;
//!   the expanded bundle carries the value as an immediate.
//! - `LoopLocal` — resolved by the lanes; each lane reports the count the
//!   cycle it resolves, and the controller keeps the **maximum** reported.
//!   Lanes whose own count is smaller mask their trailing iterations
//!   through predicates. The count freezes at the first body-end decision;
//!   by construction at least one lane has reported by then, and reaching
//!   that point without any report is a fatal modeling error.

use tracing::{debug, trace};

use crate::common::Word;
use crate::common::error::ModelError;
use crate::control::imem::InstructionMemory;
use crate::isa::bundle::Bundle;
use crate::isa::slots::{ControlSlot, LoopCount, Src};

/// How the controller knows a frame's iteration count.
#[derive(Clone, Copy, Debug)]
enum CtrlCount {
    /// Known since push (immediate or global).
    Known(Word),
    /// Awaiting lane reports; holds the running maximum.
    AwaitingLanes(Option<Word>),
}

/// One controller-side loop frame.
#[derive(Clone, Copy, Debug)]
struct CtrlFrame {
    header_pc: usize,
    body_len: usize,
    count: CtrlCount,
    current: Word,
    dst: Option<u8>,
}

/// The mesh control unit.
#[derive(Debug)]
pub struct ControlUnit {
    pc: usize,
    running: bool,
    halted: bool,
    frames: Vec<CtrlFrame>,
    n_loop_levels: usize,
    /// Level whose `Incr` must be injected into the next fetched bundle.
    pending_incr: Option<u8>,
    /// Fetch address whose body-end decision is still waiting for a lane
    /// to report an iteration count.
    pending_decision: Option<usize>,
}

impl ControlUnit {
    /// Creates a stopped controller.
    pub fn new(n_loop_levels: usize) -> Self {
        Self {
            pc: 0,
            running: false,
            halted: false,
            frames: Vec::with_capacity(n_loop_levels),
            n_loop_levels,
            pending_incr: None,
            pending_decision: None,
        }
    }

    /// Begins issue at `pc` (the `Start` command).
    pub fn start(&mut self, pc: usize) {
        debug!(pc, "controller: start");
        self.pc = pc;
        self.running = true;
        self.halted = false;
        self.frames.clear();
        self.pending_incr = None;
        self.pending_decision = None;
    }

    /// The level whose body-end decision is starved of lane reports, if
    /// the controller is blocked on one. The mesh turns this into a fatal
    /// error when every lane has drained and no report can ever arrive.
    pub fn blocked_on_count(&self) -> Option<u8> {
        if self.pending_decision.is_some() {
            Some((self.frames.len() - 1) as u8)
        } else {
            None
        }
    }

    /// True while bundles are being issued.
    #[inline]
    pub fn running(&self) -> bool {
        self.running
    }

    /// True once `Halt` has been issued.
    #[inline]
    pub fn halted(&self) -> bool {
        self.halted
    }

    /// Current bundle address.
    #[inline]
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Folds a lane's resolved count into the frame at `level`.
    pub fn report_loop_count(&mut self, level: u8, count: Word) {
        if let Some(frame) = self.frames.get_mut(usize::from(level)) {
            if let CtrlCount::AwaitingLanes(max) = &mut frame.count {
                *max = Some(max.map_or(count, |m| m.max(count)));
                trace!(level, count, "controller: lane count report");
            }
        }
    }

    /// Fetches, expands, and steps past the next bundle.
    ///
    /// Returns `None` when stopped. The caller gates this on tracker
    /// ingress readiness; the controller itself never buffers.
    pub fn next_bundle(
        &mut self,
        imem: &InstructionMemory,
        g_regs: &[Word],
    ) -> Result<Option<Bundle>, ModelError> {
        if !self.running {
            return Ok(None);
        }
        if !self.resolve_decisions() {
            // Blocked: the innermost loop's count is still unreported.
            return Ok(None);
        }
        let fetch_pc = self.pc;
        let mut bundle = imem.fetch(fetch_pc)?;

        // Loop-index substitution uses the frame state before any control
        // slot of this bundle takes effect.
        self.substitute_indices(&mut bundle);

        // Inject the pending Incr from the previous body-end decision.
        if let Some(level) = self.pending_incr.take() {
            debug_assert!(
                matches!(bundle.control, ControlSlot::None),
                "loop body head bundle must leave its control slot empty"
            );
            let dst = self.frames[usize::from(level)].dst;
            bundle.control = ControlSlot::Incr { level, dst };
        }

        // Expand the control slot.
        match &mut bundle.control {
            ControlSlot::Loop(l) => {
                if self.frames.len() >= self.n_loop_levels {
                    return Err(ModelError::LoopDepthExceeded {
                        max: self.n_loop_levels,
                        pc: fetch_pc,
                    });
                }
                let level = self.frames.len() as u8;
                l.level = level;
                let count = match l.count {
                    LoopCount::Immediate(n) => {
                        l.count = LoopCount::Immediate(n);
                        CtrlCount::Known(Word::from(n))
                    }
                    LoopCount::Global(g) => {
                        let value = g_regs[usize::from(g)];
                        // Lanes never see G-registers; hand them the value.
                        l.count = LoopCount::Immediate(value as u16);
                        CtrlCount::Known(value)
                    }
                    LoopCount::Local(a) => {
                        l.count = LoopCount::Local(a);
                        CtrlCount::AwaitingLanes(None)
                    }
                };
                self.frames.push(CtrlFrame {
                    header_pc: fetch_pc,
                    body_len: usize::from(l.body_len),
                    count,
                    current: 0,
                    dst: l.dst,
                });
                debug!(pc = fetch_pc, level, "controller: loop open");
            }
            ControlSlot::Halt => {
                debug!(pc = fetch_pc, "controller: halt");
                self.running = false;
                self.halted = true;
            }
            ControlSlot::None | ControlSlot::Incr { .. } => {}
        }

        self.advance(fetch_pc);
        Ok(Some(bundle))
    }

    /// Steps the PC, wrapping loop bodies and popping finished frames.
    fn advance(&mut self, fetch_pc: usize) {
        if !self.running {
            return;
        }
        self.pending_decision = Some(fetch_pc);
        let _ = self.resolve_decisions();
    }

    /// Resolves pending body-end decisions. One fetch address can end
    /// several nested bodies at once: popping the innermost frame cascades
    /// the decision into the enclosing one. Returns false while a
    /// decision waits on an unreported count.
    fn resolve_decisions(&mut self) -> bool {
        let Some(fetch_pc) = self.pending_decision else {
            return true;
        };
        loop {
            let level = self.frames.len().wrapping_sub(1) as u8;
            let Some(frame) = self.frames.last_mut() else {
                break;
            };
            let body_end = frame.header_pc + frame.body_len;
            if frame.body_len == 0 || fetch_pc != body_end {
                break;
            }
            let count = match frame.count {
                CtrlCount::Known(n) => n,
                CtrlCount::AwaitingLanes(Some(max)) => {
                    // First use freezes the arbitrated maximum.
                    frame.count = CtrlCount::Known(max);
                    max
                }
                CtrlCount::AwaitingLanes(None) => return false,
            };
            if frame.current + 1 < count {
                frame.current += 1;
                self.pc = frame.header_pc + 1;
                self.pending_incr = Some(level);
                self.pending_decision = None;
                return true;
            }
            let _ = self.frames.pop();
        }
        self.pc = fetch_pc + 1;
        self.pending_decision = None;
        true
    }

    /// Replaces `Src::LoopIndex` arms with the current iteration index.
    fn substitute_indices(&self, bundle: &mut Bundle) {
        let index_of = |level: u8| -> u16 {
            self.frames
                .get(usize::from(level))
                .map_or(0, |f| f.current as u16)
        };
        let subst = |src: &mut Src| {
            if let Src::LoopIndex(level) = *src {
                *src = Src::Imm(index_of(level));
            }
        };
        if let crate::isa::slots::PredicateSlot::Cmp(c) = &mut bundle.predicate {
            subst(&mut c.src1);
            subst(&mut c.src2);
        }
        match &mut bundle.packet {
            crate::isa::slots::PacketSlot::Send(s) => {
                subst(&mut s.length);
                subst(&mut s.x_dest);
                subst(&mut s.y_dest);
            }
            crate::isa::slots::PacketSlot::Receive(r) => {
                if let Some(f) = &mut r.forward {
                    subst(&mut f.x_dest);
                    subst(&mut f.y_dest);
                }
            }
            _ => {}
        }
        if let crate::isa::slots::AluSlot::Op(op) = &mut bundle.alu {
            subst(&mut op.src2);
        }
        if let crate::isa::slots::AluLiteSlot::Op(op) = &mut bundle.alu_lite {
            subst(&mut op.src2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::slots::{AluInstr, AluOp, AluSlot, LoopInstr};
    use crate::common::reg::BReg;

    fn imem_with(program: &[Bundle]) -> InstructionMemory {
        let mut imem = InstructionMemory::new(64);
        imem.load(0, program);
        imem
    }

    fn alu_add(dst: u8, imm: u16) -> Bundle {
        Bundle {
            alu: AluSlot::Op(AluInstr {
                op: AluOp::Add,
                src1: BReg::D(0),
                src2: Src::Imm(imm),
                dst: BReg::D(dst),
                predicate: 0,
            }),
            ..Bundle::default()
        }
    }

    fn halt() -> Bundle {
        Bundle {
            control: ControlSlot::Halt,
            ..Bundle::default()
        }
    }

    #[test]
    fn test_straight_line_until_halt() {
        let imem = imem_with(&[alu_add(1, 5), alu_add(2, 7), halt()]);
        let mut ctrl = ControlUnit::new(4);
        ctrl.start(0);
        let g = [0; 16];
        assert!(ctrl.next_bundle(&imem, &g).unwrap().is_some());
        assert!(ctrl.next_bundle(&imem, &g).unwrap().is_some());
        assert!(ctrl.next_bundle(&imem, &g).unwrap().is_some());
        assert!(ctrl.halted());
        assert!(ctrl.next_bundle(&imem, &g).unwrap().is_none());
    }

    #[test]
    fn test_immediate_loop_repeats_body_and_injects_incr() {
        // pc0: loop (3 iterations, body of 1 bundle); pc1: body; pc2: halt.
        let looped = Bundle {
            control: ControlSlot::Loop(LoopInstr {
                count: LoopCount::Immediate(3),
                body_len: 1,
                dst: None,
                level: 0,
            }),
            ..Bundle::default()
        };
        let imem = imem_with(&[looped, alu_add(1, 1), halt()]);
        let mut ctrl = ControlUnit::new(4);
        ctrl.start(0);
        let g = [0; 16];

        // Header.
        let b0 = ctrl.next_bundle(&imem, &g).unwrap().unwrap();
        assert!(matches!(b0.control, ControlSlot::Loop(_)));
        // Pass 1 body: plain.
        let b1 = ctrl.next_bundle(&imem, &g).unwrap().unwrap();
        assert!(matches!(b1.control, ControlSlot::None));
        // Pass 2 body: carries the injected Incr.
        let b2 = ctrl.next_bundle(&imem, &g).unwrap().unwrap();
        assert!(matches!(b2.control, ControlSlot::Incr { level: 0, .. }));
        // Pass 3 body: carries the second Incr.
        let b3 = ctrl.next_bundle(&imem, &g).unwrap().unwrap();
        assert!(matches!(b3.control, ControlSlot::Incr { level: 0, .. }));
        // Loop popped; halt follows.
        let b4 = ctrl.next_bundle(&imem, &g).unwrap().unwrap();
        assert!(matches!(b4.control, ControlSlot::Halt));
    }

    #[test]
    fn test_global_count_substituted_for_lanes() {
        let looped = Bundle {
            control: ControlSlot::Loop(LoopInstr {
                count: LoopCount::Global(2),
                body_len: 1,
                dst: None,
                level: 0,
            }),
            ..Bundle::default()
        };
        let imem = imem_with(&[looped, alu_add(1, 1), halt()]);
        let mut ctrl = ControlUnit::new(4);
        ctrl.start(0);
        let mut g = [0 as Word; 16];
        g[2] = 2;
        let b0 = ctrl.next_bundle(&imem, &g).unwrap().unwrap();
        match b0.control {
            ControlSlot::Loop(l) => assert_eq!(l.count, LoopCount::Immediate(2)),
            other => panic!("expected loop, got {other:?}"),
        }
    }

    #[test]
    fn test_local_count_blocks_until_reported() {
        let looped = Bundle {
            control: ControlSlot::Loop(LoopInstr {
                count: LoopCount::Local(1),
                body_len: 1,
                dst: None,
                level: 0,
            }),
            ..Bundle::default()
        };
        let imem = imem_with(&[looped, alu_add(1, 1), halt()]);
        let mut ctrl = ControlUnit::new(4);
        ctrl.start(0);
        let g = [0; 16];
        let _ = ctrl.next_bundle(&imem, &g).unwrap();
        let _ = ctrl.next_bundle(&imem, &g).unwrap();
        // Body end reached with no lane report yet: issue blocks.
        assert!(ctrl.next_bundle(&imem, &g).unwrap().is_none());
        assert_eq!(ctrl.blocked_on_count(), Some(0));
        ctrl.report_loop_count(0, 1);
        // One iteration only: the loop pops and halt issues.
        let b = ctrl.next_bundle(&imem, &g).unwrap().unwrap();
        assert!(matches!(b.control, ControlSlot::Halt));
        assert_eq!(ctrl.blocked_on_count(), None);
    }

    #[test]
    fn test_local_count_takes_reported_maximum() {
        let looped = Bundle {
            control: ControlSlot::Loop(LoopInstr {
                count: LoopCount::Local(1),
                body_len: 1,
                dst: None,
                level: 0,
            }),
            ..Bundle::default()
        };
        let imem = imem_with(&[looped, alu_add(1, 1), halt()]);
        let mut ctrl = ControlUnit::new(4);
        ctrl.start(0);
        let g = [0; 16];
        let _ = ctrl.next_bundle(&imem, &g).unwrap();
        ctrl.report_loop_count(0, 2);
        ctrl.report_loop_count(0, 4);
        ctrl.report_loop_count(0, 3);
        // 4 iterations total: body, then three Incr passes.
        let _ = ctrl.next_bundle(&imem, &g).unwrap();
        for _ in 0..3 {
            let b = ctrl.next_bundle(&imem, &g).unwrap().unwrap();
            assert!(matches!(b.control, ControlSlot::Incr { .. }));
        }
        let b = ctrl.next_bundle(&imem, &g).unwrap().unwrap();
        assert!(matches!(b.control, ControlSlot::Halt));
    }
}
