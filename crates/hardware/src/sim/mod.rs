//! Simulation top level: the mesh and program-image tooling.

pub mod mesh;
pub mod program;

pub use mesh::{Bamlet, EgressWord, RunSummary};
pub use program::ProgramImage;
