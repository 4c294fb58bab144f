//! Unit and scenario tests for the mesh model.

/// Codec round-trip properties (bundles, headers, commands).
pub mod isa;
/// Loop expansion and lane-reported iteration counts.
pub mod loops;
/// Network scenarios: broadcast, forward, append, command boot.
pub mod network;
/// End-to-end single-lane and two-lane scenarios.
pub mod scenarios;
