//! Configuration system for the mesh model.
//!
//! This module defines all configuration structures used to parameterize
//! the simulator. It provides:
//! 1. **Defaults:** Baseline hardware constants (register files, tag
//!    domains, functional-unit latencies, station depths, grid shape).
//! 2. **Structures:** Hierarchical config for the processing element, the
//!    mesh controller, and the interconnect.
//! 3. **Validation:** Cross-field checks against the fixed encoding
//!    budgets (register indices, coordinate widths, nest depth).
//!
//! Configuration is supplied as JSON (`serde_json`) or via
//! `Config::default()`; every field carries a serde default so partial
//! objects deserialize.

use serde::Deserialize;

use crate::common::error::ModelError;

/// Default configuration constants for the mesh.
///
/// These values define the baseline hardware configuration when not
/// explicitly overridden.
mod defaults {
    /// D-register and ALU data width in bits.
    pub const WIDTH: usize = 32;

    /// A-register and ALULite data width in bits.
    pub const A_WIDTH: usize = 16;

    /// D-register file size per lane.
    pub const N_D_REGS: usize = 16;

    /// A-register file size per lane.
    pub const N_A_REGS: usize = 16;

    /// P-register file size per lane.
    pub const N_P_REGS: usize = 16;

    /// G-register file size (one file per mesh).
    pub const N_G_REGS: usize = 16;

    /// Rename tag width for A/D registers (tags per register = 2^width).
    pub const REG_TAG_WIDTH: usize = 2;

    /// Rename tag count for P registers.
    pub const N_P_TAGS: usize = 4;

    /// Per-lane data memory depth in words.
    pub const DATA_MEMORY_DEPTH: usize = 1024;

    /// Result-bus B-space write ports per cycle (one per producing unit:
    /// ALU, ALULite, LoadStore, receive, loop index, command write).
    pub const N_RESULT_PORTS: usize = 6;

    /// Maximum loop nest depth.
    pub const N_LOOP_LEVELS: usize = 4;

    /// ALU pipeline depth in cycles.
    pub const ALU_LATENCY: usize = 2;

    /// ALULite pipeline depth in cycles.
    pub const ALU_LITE_LATENCY: usize = 1;

    /// Predicate-ALU pipeline depth in cycles.
    pub const ALU_PREDICATE_LATENCY: usize = 1;

    /// ALU reservation-station depth.
    pub const N_ALU_RS_SLOTS: usize = 2;

    /// ALULite reservation-station depth.
    pub const N_ALU_LITE_RS_SLOTS: usize = 2;

    /// Predicate-ALU reservation-station depth.
    pub const N_PREDICATE_RS_SLOTS: usize = 2;

    /// LoadStore reservation-station depth.
    pub const N_LOAD_STORE_RS_SLOTS: usize = 2;

    /// PacketSend reservation-station depth.
    pub const N_SEND_PACKET_RS_SLOTS: usize = 2;

    /// PacketReceive reservation-station depth.
    pub const N_RECEIVE_PACKET_RS_SLOTS: usize = 2;

    /// Per-slot dependency-tracker FIFO depth.
    pub const N_TRACKER_SLOTS: usize = 4;

    /// Packet header x-coordinate field width in bits.
    pub const X_POS_WIDTH: usize = 4;

    /// Packet header y-coordinate field width in bits.
    pub const Y_POS_WIDTH: usize = 4;

    /// Packet header length field width in bits.
    pub const PACKET_LENGTH_WIDTH: usize = 8;

    /// Independent virtual channels per link.
    pub const N_CHANNELS: usize = 2;

    /// Instruction-memory address width (depth = 2^width bundles).
    pub const INSTR_ADDR_WIDTH: usize = 10;

    /// Grid rows.
    pub const ROWS: usize = 2;

    /// Grid columns.
    pub const COLS: usize = 2;
}

/// Root configuration: one processing-element section, one controller/mesh
/// section, one interconnect section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Per-lane (processing element) parameters.
    #[serde(default)]
    pub amlet: AmletConfig,
    /// Controller and grid parameters.
    #[serde(default)]
    pub mesh: MeshConfig,
    /// Interconnect parameters.
    #[serde(default)]
    pub network: NetworkConfig,
}

impl Config {
    /// Number of B-space rename tags (`2^reg_tag_width`).
    #[inline]
    pub fn n_b_tags(&self) -> u8 {
        1 << self.amlet.reg_tag_width
    }

    /// Instruction memory depth in bundles (`2^instr_addr_width`).
    #[inline]
    pub fn imem_depth(&self) -> usize {
        1 << self.mesh.instr_addr_width
    }

    /// Bit mask for A-width values.
    #[inline]
    pub fn a_mask(&self) -> u32 {
        if self.amlet.a_width >= 32 {
            u32::MAX
        } else {
            (1 << self.amlet.a_width) - 1
        }
    }

    /// Bit mask for D-width values.
    #[inline]
    pub fn d_mask(&self) -> u32 {
        if self.amlet.width >= 32 {
            u32::MAX
        } else {
            (1 << self.amlet.width) - 1
        }
    }

    /// Checks cross-field consistency against the fixed encoding budgets.
    pub fn validate(&self) -> Result<(), ModelError> {
        let bad = |msg: String| Err(ModelError::Config(msg));
        if self.amlet.n_a_regs > 16 || self.amlet.n_d_regs > 16 || self.amlet.n_p_regs > 16 {
            return bad("register files are limited to 16 entries by the slot encodings".into());
        }
        if self.amlet.reg_tag_width == 0 || self.amlet.reg_tag_width > 4 {
            return bad(format!(
                "reg_tag_width {} outside 1..=4",
                self.amlet.reg_tag_width
            ));
        }
        if self.amlet.n_p_tags == 0 || self.amlet.n_p_tags > 16 {
            return bad(format!("n_p_tags {} outside 1..=16", self.amlet.n_p_tags));
        }
        if self.mesh.rows == 0 || self.mesh.cols == 0 {
            return bad("grid must have at least one row and one column".into());
        }
        if self.mesh.cols > (1 << self.network.x_pos_width)
            || self.mesh.rows > (1 << self.network.y_pos_width)
        {
            return bad("grid does not fit the coordinate field widths".into());
        }
        if self.mesh.n_loop_levels == 0 {
            return bad("n_loop_levels must be at least 1".into());
        }
        // The InstructionMemoryWrite command word carries count (8 bits)
        // above the base address, under the 2-bit opcode: 22 address bits
        // at most.
        if self.mesh.instr_addr_width == 0 || self.mesh.instr_addr_width > 22 {
            return bad(format!(
                "instr_addr_width {} outside 1..=22",
                self.mesh.instr_addr_width
            ));
        }
        if self.network.n_channels == 0 || self.network.n_channels > 4 {
            return bad(format!(
                "n_channels {} outside 1..=4",
                self.network.n_channels
            ));
        }
        Ok(())
    }
}

/// Per-lane parameters: register files, rename, memories, stations, units.
#[derive(Debug, Clone, Deserialize)]
pub struct AmletConfig {
    /// D-register and ALU data width in bits.
    #[serde(default = "AmletConfig::default_width")]
    pub width: usize,

    /// A-register and ALULite data width in bits.
    #[serde(default = "AmletConfig::default_a_width")]
    pub a_width: usize,

    /// D-register file size.
    #[serde(default = "AmletConfig::default_n_d_regs")]
    pub n_d_regs: usize,

    /// A-register file size.
    #[serde(default = "AmletConfig::default_n_a_regs")]
    pub n_a_regs: usize,

    /// P-register file size.
    #[serde(default = "AmletConfig::default_n_p_regs")]
    pub n_p_regs: usize,

    /// Rename tag width for A/D registers.
    #[serde(default = "AmletConfig::default_reg_tag_width")]
    pub reg_tag_width: usize,

    /// Rename tag count for P registers.
    #[serde(default = "AmletConfig::default_n_p_tags")]
    pub n_p_tags: usize,

    /// Data memory depth in words.
    #[serde(default = "AmletConfig::default_data_memory_depth")]
    pub data_memory_depth: usize,

    /// Result-bus B-space write ports.
    #[serde(default = "AmletConfig::default_n_result_ports")]
    pub n_result_ports: usize,

    /// ALU pipeline depth.
    #[serde(default = "AmletConfig::default_alu_latency")]
    pub alu_latency: usize,

    /// ALULite pipeline depth.
    #[serde(default = "AmletConfig::default_alu_lite_latency")]
    pub alu_lite_latency: usize,

    /// Predicate-ALU pipeline depth.
    #[serde(default = "AmletConfig::default_alu_predicate_latency")]
    pub alu_predicate_latency: usize,

    /// ALU reservation-station depth.
    #[serde(default = "AmletConfig::default_n_alu_rs_slots")]
    pub n_alu_rs_slots: usize,

    /// ALULite reservation-station depth.
    #[serde(default = "AmletConfig::default_n_alu_lite_rs_slots")]
    pub n_alu_lite_rs_slots: usize,

    /// Predicate-ALU reservation-station depth.
    #[serde(default = "AmletConfig::default_n_predicate_rs_slots")]
    pub n_predicate_rs_slots: usize,

    /// LoadStore reservation-station depth.
    #[serde(default = "AmletConfig::default_n_load_store_rs_slots")]
    pub n_load_store_rs_slots: usize,

    /// PacketSend reservation-station depth.
    #[serde(default = "AmletConfig::default_n_send_packet_rs_slots")]
    pub n_send_packet_rs_slots: usize,

    /// PacketReceive reservation-station depth.
    #[serde(default = "AmletConfig::default_n_receive_packet_rs_slots")]
    pub n_receive_packet_rs_slots: usize,
}

impl AmletConfig {
    fn default_width() -> usize {
        defaults::WIDTH
    }
    fn default_a_width() -> usize {
        defaults::A_WIDTH
    }
    fn default_n_d_regs() -> usize {
        defaults::N_D_REGS
    }
    fn default_n_a_regs() -> usize {
        defaults::N_A_REGS
    }
    fn default_n_p_regs() -> usize {
        defaults::N_P_REGS
    }
    fn default_reg_tag_width() -> usize {
        defaults::REG_TAG_WIDTH
    }
    fn default_n_p_tags() -> usize {
        defaults::N_P_TAGS
    }
    fn default_data_memory_depth() -> usize {
        defaults::DATA_MEMORY_DEPTH
    }
    fn default_n_result_ports() -> usize {
        defaults::N_RESULT_PORTS
    }
    fn default_alu_latency() -> usize {
        defaults::ALU_LATENCY
    }
    fn default_alu_lite_latency() -> usize {
        defaults::ALU_LITE_LATENCY
    }
    fn default_alu_predicate_latency() -> usize {
        defaults::ALU_PREDICATE_LATENCY
    }
    fn default_n_alu_rs_slots() -> usize {
        defaults::N_ALU_RS_SLOTS
    }
    fn default_n_alu_lite_rs_slots() -> usize {
        defaults::N_ALU_LITE_RS_SLOTS
    }
    fn default_n_predicate_rs_slots() -> usize {
        defaults::N_PREDICATE_RS_SLOTS
    }
    fn default_n_load_store_rs_slots() -> usize {
        defaults::N_LOAD_STORE_RS_SLOTS
    }
    fn default_n_send_packet_rs_slots() -> usize {
        defaults::N_SEND_PACKET_RS_SLOTS
    }
    fn default_n_receive_packet_rs_slots() -> usize {
        defaults::N_RECEIVE_PACKET_RS_SLOTS
    }
}

impl Default for AmletConfig {
    fn default() -> Self {
        Self {
            width: defaults::WIDTH,
            a_width: defaults::A_WIDTH,
            n_d_regs: defaults::N_D_REGS,
            n_a_regs: defaults::N_A_REGS,
            n_p_regs: defaults::N_P_REGS,
            reg_tag_width: defaults::REG_TAG_WIDTH,
            n_p_tags: defaults::N_P_TAGS,
            data_memory_depth: defaults::DATA_MEMORY_DEPTH,
            n_result_ports: defaults::N_RESULT_PORTS,
            alu_latency: defaults::ALU_LATENCY,
            alu_lite_latency: defaults::ALU_LITE_LATENCY,
            alu_predicate_latency: defaults::ALU_PREDICATE_LATENCY,
            n_alu_rs_slots: defaults::N_ALU_RS_SLOTS,
            n_alu_lite_rs_slots: defaults::N_ALU_LITE_RS_SLOTS,
            n_predicate_rs_slots: defaults::N_PREDICATE_RS_SLOTS,
            n_load_store_rs_slots: defaults::N_LOAD_STORE_RS_SLOTS,
            n_send_packet_rs_slots: defaults::N_SEND_PACKET_RS_SLOTS,
            n_receive_packet_rs_slots: defaults::N_RECEIVE_PACKET_RS_SLOTS,
        }
    }
}

/// Controller and grid parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct MeshConfig {
    /// Grid rows.
    #[serde(default = "MeshConfig::default_rows")]
    pub rows: usize,

    /// Grid columns.
    #[serde(default = "MeshConfig::default_cols")]
    pub cols: usize,

    /// G-register file size.
    #[serde(default = "MeshConfig::default_n_g_regs")]
    pub n_g_regs: usize,

    /// Maximum loop nest depth.
    #[serde(default = "MeshConfig::default_n_loop_levels")]
    pub n_loop_levels: usize,

    /// Instruction-memory address width (depth = 2^width bundles).
    #[serde(default = "MeshConfig::default_instr_addr_width")]
    pub instr_addr_width: usize,

    /// Per-slot dependency-tracker FIFO depth.
    #[serde(default = "MeshConfig::default_n_tracker_slots")]
    pub n_tracker_slots: usize,
}

impl MeshConfig {
    fn default_rows() -> usize {
        defaults::ROWS
    }
    fn default_cols() -> usize {
        defaults::COLS
    }
    fn default_n_g_regs() -> usize {
        defaults::N_G_REGS
    }
    fn default_n_loop_levels() -> usize {
        defaults::N_LOOP_LEVELS
    }
    fn default_instr_addr_width() -> usize {
        defaults::INSTR_ADDR_WIDTH
    }
    fn default_n_tracker_slots() -> usize {
        defaults::N_TRACKER_SLOTS
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            rows: defaults::ROWS,
            cols: defaults::COLS,
            n_g_regs: defaults::N_G_REGS,
            n_loop_levels: defaults::N_LOOP_LEVELS,
            instr_addr_width: defaults::INSTR_ADDR_WIDTH,
            n_tracker_slots: defaults::N_TRACKER_SLOTS,
        }
    }
}

/// Interconnect parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Packet header x-coordinate field width in bits.
    #[serde(default = "NetworkConfig::default_x_pos_width")]
    pub x_pos_width: usize,

    /// Packet header y-coordinate field width in bits.
    #[serde(default = "NetworkConfig::default_y_pos_width")]
    pub y_pos_width: usize,

    /// Packet header length field width in bits.
    #[serde(default = "NetworkConfig::default_packet_length_width")]
    pub packet_length_width: usize,

    /// Independent virtual channels per link.
    #[serde(default = "NetworkConfig::default_n_channels")]
    pub n_channels: usize,
}

impl NetworkConfig {
    fn default_x_pos_width() -> usize {
        defaults::X_POS_WIDTH
    }
    fn default_y_pos_width() -> usize {
        defaults::Y_POS_WIDTH
    }
    fn default_packet_length_width() -> usize {
        defaults::PACKET_LENGTH_WIDTH
    }
    fn default_n_channels() -> usize {
        defaults::N_CHANNELS
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            x_pos_width: defaults::X_POS_WIDTH,
            y_pos_width: defaults::Y_POS_WIDTH,
            packet_length_width: defaults::PACKET_LENGTH_WIDTH,
            n_channels: defaults::N_CHANNELS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{ "mesh": { "rows": 1, "cols": 3 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.mesh.rows, 1);
        assert_eq!(config.mesh.cols, 3);
        assert_eq!(config.amlet.width, 32);
        assert_eq!(config.amlet.reg_tag_width, 2);
        config.validate().unwrap();
    }

    #[test]
    fn test_oversized_grid_rejected() {
        let mut config = Config::default();
        config.mesh.cols = 64;
        config.network.x_pos_width = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_instr_addr_width_rejected() {
        let mut config = Config::default();
        config.mesh.instr_addr_width = 24;
        assert!(config.validate().is_err());
        config.mesh.instr_addr_width = 0;
        assert!(config.validate().is_err());
    }
}
