//! Simulation statistics collection and reporting.
//!
//! Plain counters updated by the mesh each cycle plus a formatted report:
//! 1. **Issue:** cycles, bundles fetched and issued, bundles per cycle.
//! 2. **Stalls:** cycles lost to rename-tag exhaustion, to full
//!    reservation stations, and cycles the tracker had nothing eligible.
//! 3. **Traffic:** packets dispatched, consumed, and forwarded across the
//!    mesh.
//! 4. **Memory:** loads and stores issued to the lane data memories.

use std::time::Instant;

/// Counters for one simulation run.
#[derive(Clone, Debug)]
pub struct SimStats {
    start_time: Instant,
    /// Total mesh cycles elapsed.
    pub cycles: u64,
    /// Bundles fetched by the controller.
    pub bundles_fetched: u64,
    /// Bundles emitted by the tracker and accepted by every lane.
    pub bundles_issued: u64,
    /// Cycles an emitted bundle was refused because a lane's rename-tag
    /// domain was exhausted.
    pub rename_stall_cycles: u64,
    /// Cycles an emitted bundle was refused because a targeted
    /// reservation station was full.
    pub station_stall_cycles: u64,
    /// Cycles the tracker buffered work but could emit nothing.
    pub tracker_stall_cycles: u64,
    /// Packets fully dispatched by send units.
    pub packets_sent: u64,
    /// Packet headers consumed by receive units.
    pub packets_received: u64,
    /// Forward directives posted by receive units.
    pub packets_forwarded: u64,
    /// Loads issued to lane data memories.
    pub loads: u64,
    /// Stores committed to lane data memories.
    pub stores: u64,
    /// Runtime flags raised.
    pub flags_raised: u64,
}

impl Default for SimStats {
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            cycles: 0,
            bundles_fetched: 0,
            bundles_issued: 0,
            rename_stall_cycles: 0,
            station_stall_cycles: 0,
            tracker_stall_cycles: 0,
            packets_sent: 0,
            packets_received: 0,
            packets_forwarded: 0,
            loads: 0,
            stores: 0,
            flags_raised: 0,
        }
    }
}

impl SimStats {
    /// Bundles issued per cycle.
    pub fn issue_rate(&self) -> f64 {
        if self.cycles == 0 {
            0.0
        } else {
            self.bundles_issued as f64 / self.cycles as f64
        }
    }

    /// Renders the end-of-run report.
    pub fn report(&self) -> String {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        format!(
            "cycles            : {}\n\
             bundles fetched   : {}\n\
             bundles issued    : {}\n\
             issue rate        : {:.3} bundles/cycle\n\
             rename-tag stalls : {} cycles\n\
             station stalls    : {} cycles\n\
             tracker stalls    : {} cycles\n\
             packets sent      : {}\n\
             packets received  : {}\n\
             packets forwarded : {}\n\
             loads             : {}\n\
             stores            : {}\n\
             flags raised      : {}\n\
             wall time         : {elapsed:.3} s",
            self.cycles,
            self.bundles_fetched,
            self.bundles_issued,
            self.issue_rate(),
            self.rename_stall_cycles,
            self.station_stall_cycles,
            self.tracker_stall_cycles,
            self.packets_sent,
            self.packets_received,
            self.packets_forwarded,
            self.loads,
            self.stores,
            self.flags_raised,
        )
    }
}
