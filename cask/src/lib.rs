//! Custodial Asset Storage Kernel (CASK)
//!
//! This crate re-exports all the components of the CASK system.

pub use cask_core::*;
pub use cask_proofs::*;
pub use cask_ledger::*;
