//! Daemon subsystem: reclamation loop, shared exporter state, signal handling,
//! and the supervisor that ties them to the metrics server.

pub mod loop_main;
pub mod reclaimer;
pub mod signals;
pub mod state;
