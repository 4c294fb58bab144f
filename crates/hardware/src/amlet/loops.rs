//! Per-lane loop state.
//!
//! Each nest level holds the current index, the iteration count (possibly
//! a tagged A-source until it resolves), and whether the resolved count
//! has been reported to the controller. The report wire carries one
//! resolution per cycle, priority-encoded from the outermost level.

use crate::amlet::bus::ResultBus;
use crate::common::Word;
use crate::common::reg::TaggedSrc;

/// A resolved iteration count headed back to the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopReport {
    /// Nest level.
    pub level: u8,
    /// Resolved count.
    pub count: Word,
}

/// One active loop level.
#[derive(Clone, Copy, Debug)]
pub struct LoopFrame {
    /// Current iteration index.
    pub index: Word,
    /// Iteration count; unresolved until the source write drains.
    pub count: TaggedSrc,
    /// True once the controller has been told the resolved count (or the
    /// count was controller-known from the start).
    pub reported: bool,
}

/// The per-lane loop stack.
#[derive(Debug)]
pub struct LoopStack {
    frames: Vec<Option<LoopFrame>>,
}

impl LoopStack {
    /// Creates an empty stack with `n_levels` slots.
    pub fn new(n_levels: usize) -> Self {
        Self {
            frames: vec![None; n_levels],
        }
    }

    /// Opens (or reopens) the frame at `level`.
    ///
    /// `reported` starts true for counts the controller already knows
    /// (immediates and globals), so only lane-resolved counts travel the
    /// report wire.
    pub fn open(&mut self, level: u8, count: TaggedSrc, reported: bool) {
        self.frames[level as usize] = Some(LoopFrame {
            index: 0,
            count,
            reported,
        });
    }

    /// Advances the frame at `level`; returns the new index.
    pub fn incr(&mut self, level: u8) -> Word {
        let frame = self.frames[level as usize]
            .as_mut()
            .unwrap_or_else(|| unreachable!("Incr for a level with no open loop"));
        frame.index += 1;
        frame.index
    }

    /// Snoops the bus for count resolutions; returns at most one new
    /// report (lowest level first).
    pub fn capture(&mut self, bus: &ResultBus) -> Option<LoopReport> {
        let mut report = None;
        for (level, slot) in self.frames.iter_mut().enumerate() {
            let Some(frame) = slot else { continue };
            if let (Some(reg), Some(tag)) = (frame.count.reg, frame.count.tag) {
                if let Some(entry) = bus.match_b(reg, tag) {
                    frame.count.value = entry.value;
                    frame.count.tag = None;
                }
            }
            if !frame.reported && frame.count.is_resolved() && report.is_none() {
                frame.reported = true;
                report = Some(LoopReport {
                    level: level as u8,
                    count: frame.count.value,
                });
            }
        }
        report
    }

    /// Reports an already-resolved count at open time, marking the frame.
    pub fn report_now(&mut self, level: u8) -> Option<LoopReport> {
        let frame = self.frames[level as usize].as_mut()?;
        if !frame.reported && frame.count.is_resolved() {
            frame.reported = true;
            return Some(LoopReport {
                level,
                count: frame.count.value,
            });
        }
        None
    }
}
