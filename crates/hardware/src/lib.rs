//! Cycle-accurate behavioral model of a parameterizable VLIW-SIMT
//! processor mesh.
//!
//! This crate implements the mesh's core execution model:
//! 1. **Control:** Shared instruction memory, the control unit (loops,
//!    halt), and the per-slot dependency tracker that shuffles VLIW slots
//!    into hazard-free bundles.
//! 2. **Lanes:** Per-element register renaming over four register classes,
//!    reservation stations, functional units, and the result bus.
//! 3. **Network:** A 2D packet-switched mesh with XY routing, broadcast,
//!    forward/append, and ready/valid flow control.
//! 4. **Simulation:** The `Bamlet` top level (controller + grid), program
//!    images, boot command packets, and statistics.

/// Processing element: rename, stations, units, packet interface.
pub mod amlet;
/// Common types (words, register classes, tags, errors).
pub mod common;
/// Simulator configuration (defaults and hierarchical config structures).
pub mod config;
/// Controller: instruction memory, control unit, dependency tracker.
pub mod control;
/// Instruction set: slots, bundles, bit-level codec.
pub mod isa;
/// Interconnect: wire format, packets, the mesh switch.
pub mod net;
/// Simulation top level: the mesh, program images, boot packets.
pub mod sim;
/// Statistics collection and reporting.
pub mod stats;

/// Root configuration type; use `Config::default()` or deserialize JSON.
pub use crate::config::Config;
/// The full mesh; construct with `Bamlet::new`.
pub use crate::sim::mesh::Bamlet;
