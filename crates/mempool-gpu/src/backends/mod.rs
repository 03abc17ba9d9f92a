//! Device Implementations
//!
//! This module contains the implementations of the `GpuDevice` trait:
//!
//! - `sim`: software reference device that runs every contract on the host
//!
//! Hardware devices plug in behind the same trait.

pub mod sim;

pub use sim::{SimDevice, SimDeviceConfig, emulate_dispatch};
