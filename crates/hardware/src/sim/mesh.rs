//! The Bamlet: shared controller plus an R×C grid of lanes and switches.
//!
//! One logical cycle runs in a fixed order so every component sees a
//! consistent snapshot:
//! 1. External injections feed the edge links.
//! 2. The controller expands one bundle into the dependency tracker.
//! 3. The tracker proposes a bundle.
//! 4. Every lane runs commit → receive → issue → execute against last
//!    cycle's result bus.
//! 5. The proposed bundle dispatches to **all** lanes or none (lockstep);
//!    a refusal leaves it buffered for a later cycle.
//! 6. Switches route and words move one hop; edge egress is collected.
//! 7. Loop reports and command effects apply at mesh scope.
//!
//! Lanes and switches live in flat arenas indexed `y * cols + x`;
//! neighbor links are index arithmetic, never cross-references.

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::amlet::packet::CommandEffect;
use crate::amlet::{Amlet, DispatchRefusal};
use crate::common::Word;
use crate::common::error::{FlagEvent, ModelError};
use crate::config::Config;
use crate::control::{ControlUnit, DependencyTracker, InstructionMemory};
use crate::isa::bundle::Bundle;
use crate::net::packet::{LinkWord, WireFormat};
use crate::net::switch::{Dir, MeshSwitch, Port};
use crate::stats::SimStats;

/// A word that left the mesh through an edge link.
#[derive(Clone, Copy, Debug)]
pub struct EgressWord {
    /// Column of the edge node.
    pub x: usize,
    /// Row of the edge node.
    pub y: usize,
    /// Port the word left through.
    pub port: Port,
    /// The word.
    pub word: LinkWord,
}

/// A queued external packet stream.
#[derive(Debug)]
struct Injection {
    node: usize,
    port: Port,
    channel: usize,
    words: VecDeque<LinkWord>,
}

/// Outcome of [`Bamlet::run_until_halt`].
#[derive(Debug)]
pub struct RunSummary {
    /// Cycles simulated.
    pub cycles: u64,
    /// True when the program halted and the mesh drained; false when the
    /// cycle limit was reached first (an indefinite stall is a program
    /// bug, not a model error).
    pub halted: bool,
    /// Runtime flags raised during the run.
    pub flags: Vec<FlagEvent>,
}

/// The full mesh.
#[derive(Debug)]
pub struct Bamlet {
    config: Config,
    /// Shared instruction memory.
    pub imem: InstructionMemory,
    /// Mesh controller.
    pub controller: ControlUnit,
    tracker: DependencyTracker,
    /// Mesh-global registers.
    pub g_regs: Vec<Word>,
    amlets: Vec<Amlet>,
    switches: Vec<MeshSwitch>,
    injections: VecDeque<Injection>,
    egress: Vec<EgressWord>,
    flags: Vec<FlagEvent>,
    /// Run statistics.
    pub stats: SimStats,
    cycle: u64,
}

impl Bamlet {
    /// Builds the mesh from a validated configuration.
    pub fn new(config: Config) -> Result<Self, ModelError> {
        config.validate()?;
        let fmt = WireFormat::new(&config.network);
        let (rows, cols) = (config.mesh.rows, config.mesh.cols);
        let amlets = (0..rows * cols).map(|_| Amlet::new(&config)).collect();
        let switches = (0..rows * cols)
            .map(|i| {
                MeshSwitch::new(
                    (i % cols) as u8,
                    (i / cols) as u8,
                    config.network.n_channels,
                    fmt,
                )
            })
            .collect();
        Ok(Self {
            imem: InstructionMemory::new(config.imem_depth()),
            controller: ControlUnit::new(config.mesh.n_loop_levels),
            tracker: DependencyTracker::new(config.mesh.n_tracker_slots),
            g_regs: vec![0; config.mesh.n_g_regs],
            amlets,
            switches,
            injections: VecDeque::new(),
            egress: Vec::new(),
            flags: Vec::new(),
            stats: SimStats::default(),
            cycle: 0,
            config,
        })
    }

    /// Grid columns.
    #[inline]
    pub fn cols(&self) -> usize {
        self.config.mesh.cols
    }

    /// Grid rows.
    #[inline]
    pub fn rows(&self) -> usize {
        self.config.mesh.rows
    }

    fn index(&self, x: usize, y: usize) -> usize {
        debug_assert!(x < self.cols() && y < self.rows());
        y * self.cols() + x
    }

    /// The lane at `(x, y)`.
    pub fn amlet(&self, x: usize, y: usize) -> &Amlet {
        &self.amlets[self.index(x, y)]
    }

    /// Mutable lane access (test setup).
    pub fn amlet_mut(&mut self, x: usize, y: usize) -> &mut Amlet {
        let i = self.index(x, y);
        &mut self.amlets[i]
    }

    /// Loads decoded bundles into instruction memory at `base`.
    pub fn load_program(&mut self, base: usize, program: &[Bundle]) {
        self.imem.load(base, program);
    }

    /// Starts issue at `pc` without a boot packet.
    pub fn start(&mut self, pc: usize) {
        self.controller.start(pc);
    }

    /// Queues a packet stream for injection into an edge link. Streams
    /// are fed head-first, one at a time, as fast as the link accepts.
    pub fn inject(&mut self, x: usize, y: usize, port: Port, channel: usize, words: Vec<LinkWord>) {
        let node = self.index(x, y);
        self.injections.push_back(Injection {
            node,
            port,
            channel,
            words: words.into(),
        });
    }

    /// Words that have left the mesh so far.
    pub fn take_egress(&mut self) -> Vec<EgressWord> {
        std::mem::take(&mut self.egress)
    }

    /// Runtime flags raised so far.
    pub fn flags(&self) -> &[FlagEvent] {
        &self.flags
    }

    /// True when the program has halted and everything has drained.
    pub fn is_done(&self) -> bool {
        self.controller.halted()
            && self.tracker.is_empty()
            && self.injections.is_empty()
            && self.amlets.iter().all(Amlet::is_idle)
            && self.switches.iter().all(MeshSwitch::is_idle)
    }

    /// Advances the mesh by one cycle.
    pub fn tick(&mut self) -> Result<(), ModelError> {
        self.cycle += 1;
        self.stats.cycles += 1;

        self.feed_injections();

        // Controller → tracker.
        if self.tracker.ingress_ready() {
            if let Some(bundle) = self.controller.next_bundle(&self.imem, &self.g_regs)? {
                self.tracker.push(&bundle);
                self.stats.bundles_fetched += 1;
            }
        }

        let proposal = self.tracker.propose();
        if proposal.is_none() && !self.tracker.is_empty() {
            self.stats.tracker_stall_cycles += 1;
        }

        // Lanes.
        let mut reports = Vec::new();
        let mut effects = Vec::new();
        for i in 0..self.amlets.len() {
            let out = self.amlets[i].tick(&mut self.switches[i]);
            if let Some(report) = out.report {
                reports.push(report);
            }
            effects.extend(out.effects);
            for flag in out.flags {
                self.stats.flags_raised += 1;
                self.flags.push(FlagEvent {
                    flag,
                    cycle: self.cycle,
                    x: i % self.cols(),
                    y: i / self.cols(),
                });
            }
        }

        // Lockstep dispatch: all lanes or none.
        if let Some(proposal) = proposal {
            match self
                .amlets
                .iter()
                .find_map(|a| a.refusal(&proposal.bundle))
            {
                None => {
                    for amlet in &mut self.amlets {
                        if let Some(report) = amlet.dispatch(&proposal.bundle) {
                            reports.push(report);
                        }
                    }
                    self.tracker.commit(&proposal);
                    self.stats.bundles_issued += 1;
                }
                Some(DispatchRefusal::TagExhausted) => self.stats.rename_stall_cycles += 1,
                Some(DispatchRefusal::StationFull) => self.stats.station_stall_cycles += 1,
            }
        }

        // Network.
        for switch in &mut self.switches {
            switch.tick();
            switch.deliver_here();
        }
        self.transfer_links();

        // Mesh-scope effects.
        for report in reports {
            self.controller.report_loop_count(report.level, report.count);
        }
        for effect in effects {
            self.apply_effect(effect);
        }

        // A controller starved of a loop count after everything drained
        // can never make progress: the program broke the report-before-use
        // construction.
        if let Some(level) = self.controller.blocked_on_count() {
            let drained = self.tracker.is_empty()
                && self.amlets.iter().all(Amlet::is_idle)
                && self.switches.iter().all(MeshSwitch::is_idle)
                && self.injections.is_empty();
            if drained {
                return Err(ModelError::UnresolvedLoopIteration {
                    level: usize::from(level),
                });
            }
        }

        Ok(())
    }

    /// Runs until halt-and-drain or the cycle limit.
    pub fn run_until_halt(&mut self, max_cycles: u64) -> Result<RunSummary, ModelError> {
        while self.cycle < max_cycles {
            if self.is_done() {
                break;
            }
            self.tick()?;
        }
        let halted = self.is_done();
        if halted {
            info!(cycles = self.cycle, "mesh: halted and drained");
        } else {
            debug!(cycles = self.cycle, "mesh: cycle limit reached");
        }
        self.stats.packets_sent = self.amlets.iter().map(|a| a.send.packets_sent).sum();
        self.stats.packets_received = self.amlets.iter().map(|a| a.recv.packets_received).sum();
        self.stats.packets_forwarded = self.amlets.iter().map(|a| a.recv.packets_forwarded).sum();
        self.stats.loads = self.amlets.iter().map(|a| a.mem.loads).sum();
        self.stats.stores = self.amlets.iter().map(|a| a.mem.stores).sum();
        Ok(RunSummary {
            cycles: self.cycle,
            halted,
            flags: self.flags.clone(),
        })
    }

    fn feed_injections(&mut self) {
        let Some(injection) = self.injections.front_mut() else {
            return;
        };
        let switch = &mut self.switches[injection.node];
        while let Some(&word) = injection.words.front() {
            if !switch.input_has_space(injection.port, injection.channel) {
                break;
            }
            switch.push_input(injection.port, injection.channel, word);
            let _ = injection.words.pop_front();
        }
        if injection.words.is_empty() {
            let _ = self.injections.pop_front();
        }
    }

    fn neighbor(&self, node: usize, dir: Dir) -> Option<usize> {
        let (cols, rows) = (self.cols(), self.rows());
        let (x, y) = (node % cols, node / cols);
        match dir {
            Dir::North => (y > 0).then(|| node - cols),
            Dir::South => (y + 1 < rows).then(|| node + cols),
            Dir::West => (x > 0).then(|| node - 1),
            Dir::East => (x + 1 < cols).then(|| node + 1),
        }
    }

    /// Moves output-skid words one hop: into the neighbor's input, or off
    /// the mesh at an edge.
    fn transfer_links(&mut self) {
        let n_channels = self.config.network.n_channels;
        for node in 0..self.switches.len() {
            for dir in Dir::ALL {
                for channel in 0..n_channels {
                    if self.switches[node].peek_output(dir.port(), channel).is_none() {
                        continue;
                    }
                    match self.neighbor(node, dir) {
                        Some(next) => {
                            let in_port = dir.opposite().port();
                            if self.switches[next].input_has_space(in_port, channel) {
                                let word = self.switches[node]
                                    .pop_output(dir.port(), channel)
                                    .unwrap_or_else(|| unreachable!());
                                self.switches[next].push_input(in_port, channel, word);
                            }
                        }
                        None => {
                            let word = self.switches[node]
                                .pop_output(dir.port(), channel)
                                .unwrap_or_else(|| unreachable!());
                            self.egress.push(EgressWord {
                                x: node % self.cols(),
                                y: node / self.cols(),
                                port: dir.port(),
                                word,
                            });
                        }
                    }
                }
            }
        }
    }

    fn apply_effect(&mut self, effect: CommandEffect) {
        match effect {
            CommandEffect::Start { pc } => self.controller.start(pc),
            CommandEffect::ImemWrite { base, bundles } => {
                for (i, bundle) in bundles.into_iter().enumerate() {
                    self.imem.write(base + i, bundle);
                }
            }
            CommandEffect::GlobalWrite { index, value } => {
                if let Some(slot) = self.g_regs.get_mut(usize::from(index)) {
                    *slot = value & self.config.a_mask();
                }
            }
        }
    }
}
