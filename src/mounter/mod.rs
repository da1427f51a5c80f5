//! Host adapters for the mount utility and device tuner ports

#[cfg(unix)]
mod linux;
mod tuner;

#[cfg(test)]
pub(crate) mod fake;

#[cfg(unix)]
pub use linux::{parse_mounts, SystemMounter};
pub use tuner::SysfsDeviceTuner;
