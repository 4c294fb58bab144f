//! Mesh controller: instruction memory, the control unit, and the
//! dependency tracker.
//!
//! One instruction stream drives every lane. The control unit walks
//! instruction memory, expands loops, and hands bundles to the dependency
//! tracker, which shuffles slots so that every emitted bundle satisfies
//! the lanes' rename contract: within a bundle, reads precede writes and
//! no two slots write the same register.

pub mod imem;
pub mod tracker;
pub mod unit;

pub use imem::InstructionMemory;
pub use tracker::DependencyTracker;
pub use unit::ControlUnit;
