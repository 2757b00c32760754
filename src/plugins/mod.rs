//! Operation subsystems composing the reconciliation engine.
//!
//! Each subsystem exposes a clap CLI surface, a `run_*_cli` entry, and a
//! `schema()` discovery function.

pub mod archive;
pub mod onboard;
pub mod remote;
pub mod schedule;
pub mod structure;
pub mod sync;
