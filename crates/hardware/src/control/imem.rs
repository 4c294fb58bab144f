//! Shared instruction memory.
//!
//! Bundle-addressed storage of encoded bundles. The controller is the only
//! reader; command packets are the only writer. Receipt of a command
//! packet stalls issue at the receiving lane but not the controller, so by
//! convention programs send instruction-memory writes before `Start`.

use crate::common::error::ModelError;
use crate::isa::bundle::Bundle;
use crate::isa::encode::{EncodedBundle, decode_bundle, encode_bundle};

/// Bundle-addressed instruction memory.
#[derive(Debug)]
pub struct InstructionMemory {
    bundles: Vec<EncodedBundle>,
}

impl InstructionMemory {
    /// Creates a zeroed memory of `depth` bundles (all-zero words decode
    /// to empty bundles).
    pub fn new(depth: usize) -> Self {
        Self {
            bundles: vec![[0; 6]; depth],
        }
    }

    /// Memory depth in bundles.
    #[inline]
    pub fn depth(&self) -> usize {
        self.bundles.len()
    }

    /// Fetches and decodes the bundle at `pc`.
    pub fn fetch(&self, pc: usize) -> Result<Bundle, ModelError> {
        let words = self
            .bundles
            .get(pc)
            .ok_or(ModelError::InstructionFetchOutOfRange {
                pc,
                depth: self.bundles.len(),
            })?;
        decode_bundle(words)
    }

    /// Stores one encoded bundle. Writes past the end wrap, matching the
    /// address-width truncation of the hardware.
    pub fn write(&mut self, addr: usize, words: EncodedBundle) {
        let depth = self.bundles.len();
        self.bundles[addr % depth] = words;
    }

    /// Stores a program of decoded bundles starting at `base`.
    pub fn load(&mut self, base: usize, program: &[Bundle]) {
        for (i, bundle) in program.iter().enumerate() {
            self.write(base + i, encode_bundle(bundle));
        }
    }
}
