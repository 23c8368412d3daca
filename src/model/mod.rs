//! Data Model
//!
//! Declarative rules, LVM records with their row parser, and persistent
//! memory listing records.

pub mod lvm;
pub mod pmem;
pub mod rule;

pub use lvm::*;
pub use pmem::*;
pub use rule::*;
