//! Provides platform-specific functionality.
//!
//! This module contains the concrete [`crate::catalog::DeviceService`]
//! implementations that query the operating system for block devices and
//! their properties.
//!
//! It uses conditional compilation (`#[cfg]`) to expose the correct
//! implementation for the target OS. Only Linux is supported today; other
//! platforms can still use the rest of the library by supplying their own
//! service.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use self::linux::*;
