//! Reservation stations.
//!
//! Each functional unit owns one station of configurable depth. Slots hold
//! Resolving instructions; every cycle a station:
//! 1. **Captures** operand values off the result bus.
//! 2. **Masks**: a slot whose predicate resolved false is removed without
//!    issuing; its destination tags are drained on the bus with null
//!    writes so dependents still observe resolution.
//! 3. **Issues** at most one eligible instruction:
//!    - generic stations pick the oldest slot with all sources resolved;
//!    - the packet stations are strictly in-order (head only) because the
//!      shared `D0` emit channel and the network carry implicit order;
//!    - the load/store station applies address-ordering rules (see
//!      [`LoadStoreStation`]).
//!
//! A full station backpressures the rename stage through its `ready` flag.

use crate::amlet::bus::ResultBus;
use crate::amlet::resolving::{DrainTarget, RsMem, RsMemOp, StationEntry};

/// Slot selection discipline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IssuePolicy {
    /// Oldest slot whose sources are resolved.
    OldestReady,
    /// Head slot only, and only when ready.
    InOrder,
}

/// One cycle's outcome for a station.
#[derive(Debug)]
pub enum StationEvent<E> {
    /// Nothing eligible this cycle.
    Idle,
    /// An instruction issued to the functional unit.
    Issue(E),
    /// A masked slot was removed; drain these destination tags.
    Masked(Vec<DrainTarget>),
}

/// A reservation station: fixed capacity, slots ordered oldest-first.
#[derive(Debug)]
pub struct Station<E> {
    entries: Vec<E>,
    capacity: usize,
    policy: IssuePolicy,
}

impl<E: StationEntry> Station<E> {
    /// Creates an empty station.
    pub fn new(capacity: usize, policy: IssuePolicy) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            policy,
        }
    }

    /// True when a renamed instruction can enter this cycle.
    #[inline]
    pub fn ready(&self) -> bool {
        self.entries.len() < self.capacity
    }

    /// True when no slot is occupied.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Accepts a renamed instruction. Caller must have checked
    /// [`Station::ready`].
    pub fn push(&mut self, entry: E) {
        debug_assert!(self.ready());
        self.entries.push(entry);
    }

    /// Snoops the bus into every occupied slot.
    pub fn capture(&mut self, bus: &ResultBus) {
        for entry in &mut self.entries {
            entry.capture(bus);
        }
    }

    /// Masks or issues at most one slot. `unit_ready` gates issue (a busy
    /// functional unit holds the station).
    pub fn step(&mut self, unit_ready: bool) -> StationEvent<E> {
        // Masking takes priority: it frees the slot without consuming the
        // functional unit.
        if let Some(idx) = self
            .entries
            .iter()
            .position(|e| e.predicate().is_resolved() && !e.predicate().value)
        {
            let entry = self.entries.remove(idx);
            let mut drains = Vec::new();
            entry.drain_targets(&mut drains);
            return StationEvent::Masked(drains);
        }
        if !unit_ready {
            return StationEvent::Idle;
        }
        let eligible = |e: &E| e.sources_resolved() && e.predicate().is_resolved();
        let idx = match self.policy {
            IssuePolicy::OldestReady => self.entries.iter().position(eligible),
            IssuePolicy::InOrder => match self.entries.first() {
                Some(head) if eligible(head) => Some(0),
                _ => None,
            },
        };
        match idx {
            Some(i) => StationEvent::Issue(self.entries.remove(i)),
            None => StationEvent::Idle,
        }
    }
}

/// The load/store station: a [`Station`] with memory-ordering eligibility.
///
/// A load may issue only if no older slot is a store with an unresolved
/// address and no older store's resolved address matches. A store may
/// issue only if no older slot (load or store) has an unresolved address
/// or a matching resolved address. Issue is oldest-eligible-first, so
/// out-of-order issue never reorders conflicting accesses.
#[derive(Debug)]
pub struct LoadStoreStation {
    entries: Vec<RsMem>,
    capacity: usize,
}

impl LoadStoreStation {
    /// Creates an empty station.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// True when a renamed instruction can enter this cycle.
    #[inline]
    pub fn ready(&self) -> bool {
        self.entries.len() < self.capacity
    }

    /// True when no slot is occupied.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Accepts a renamed memory operation.
    pub fn push(&mut self, entry: RsMem) {
        debug_assert!(self.ready());
        self.entries.push(entry);
    }

    /// Snoops the bus into every occupied slot.
    pub fn capture(&mut self, bus: &ResultBus) {
        for entry in &mut self.entries {
            entry.capture(bus);
        }
    }

    fn may_issue(&self, idx: usize) -> bool {
        let entry = &self.entries[idx];
        if !entry.sources_resolved() || !entry.predicate().is_resolved() {
            return false;
        }
        let addr = entry.address();
        for older in &self.entries[..idx] {
            let older_addr = older.address();
            match (&entry.op, older.is_store()) {
                // Load vs older store: blocked by unresolved or matching
                // store addresses.
                (RsMemOp::Load { .. }, true) => match older_addr {
                    None => return false,
                    Some(a) if Some(a) == addr => return false,
                    Some(_) => {}
                },
                // Load vs older load: no constraint.
                (RsMemOp::Load { .. }, false) => {}
                // Store vs anything older: blocked by unresolved or
                // matching addresses.
                (RsMemOp::Store { .. }, _) => match older_addr {
                    None => return false,
                    Some(a) if Some(a) == addr => return false,
                    Some(_) => {}
                },
            }
        }
        true
    }

    /// Masks or issues at most one slot.
    pub fn step(&mut self, unit_ready: bool) -> StationEvent<RsMem> {
        if let Some(idx) = self
            .entries
            .iter()
            .position(|e| e.predicate().is_resolved() && !e.predicate().value)
        {
            let entry = self.entries.remove(idx);
            let mut drains = Vec::new();
            entry.drain_targets(&mut drains);
            return StationEvent::Masked(drains);
        }
        if !unit_ready {
            return StationEvent::Idle;
        }
        match (0..self.entries.len()).find(|&i| self.may_issue(i)) {
            Some(i) => StationEvent::Issue(self.entries.remove(i)),
            None => StationEvent::Idle,
        }
    }
}
