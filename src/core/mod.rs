//! Core primitives for the fabric GitOps directory contract.
//!
//! Everything here is shared, pure-ish plumbing: the error taxonomy, fabric
//! configuration, the directory-contract path map, the document classifier,
//! the processing lock, and small time/output helpers. The operational
//! subsystems live under `plugins`.

pub mod classify;
pub mod error;
pub mod fabric;
pub mod layout;
pub mod lock;
pub mod output;
pub mod time;
