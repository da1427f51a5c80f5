//! API Module
//!
//! JSON-over-HTTP node API and the server that hosts it.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
