//! Domain layer - Core data model and port definitions
//!
//! This module defines the request/response types and the traits (ports)
//! that host and cloud adapters implement, following hexagonal architecture
//! principles.

pub mod ports;

pub use ports::*;
