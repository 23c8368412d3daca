//! Domain layer - Collaborator port definitions
//!
//! This module defines the traits (ports) that host adapters implement,
//! following hexagonal architecture principles.

pub mod ports;

pub use ports::*;
