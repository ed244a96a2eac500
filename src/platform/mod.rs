//! Host platform probes.

pub mod fs;
