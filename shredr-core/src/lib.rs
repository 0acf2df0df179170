//! The core, UI-agnostic library for the `shredr` secure-erase utility.
//!
//! `shredr-core` supervises a single, destructive `shred` job at a time and
//! reports its progress without ever blocking the caller. It is designed to be
//! used by any front-end, whether a command-line interface (like `shredr`) or
//! a graphical one driving the poller from its event loop.
//!
//! The library is structured into several key modules:
//! - [`command`]: Turns an [`command::EraseRequest`] into the erase utility's
//!   command line.
//! - [`supervisor`]: Launches the utility and streams its diagnostic output as
//!   [`supervisor::ProgressMessage`]s through a channel.
//! - [`poller`]: Drains that channel one message per tick, detects completion
//!   and stalls, and owns the [`poller::JobState`].
//! - [`catalog`]: Builds the list of erase-eligible devices from a
//!   [`catalog::DeviceService`].
//! - [`platform`]: The Linux device service.
//! - [`device`]: Contains the `Device` struct and the size formatter.
//!
//! ## Example: Erasing a Device with Progress Reporting
//!
//! ```rust,no_run
//! use shredr_core::catalog::DeviceCatalog;
//! use shredr_core::command::EraseRequest;
//! use shredr_core::platform::SysBlockService;
//! use shredr_core::poller::{JobState, PulseEvent, PulsePoller};
//! use shredr_core::supervisor::JobSupervisor;
//!
//! fn main() -> shredr_core::Result<()> {
//!     let devices = DeviceCatalog::new(SysBlockService::new()).refresh()?;
//!     let device = devices.first().expect("No erasable devices found.");
//!
//!     let supervisor = JobSupervisor::default();
//!     let (handle, progress) = supervisor.launch(&EraseRequest {
//!         iterations: 1,
//!         zero_fill: true,
//!         ..EraseRequest::new(&device.file)
//!     })?;
//!
//!     let mut poller = PulsePoller::default();
//!     poller.start(handle, progress)?;
//!
//!     // A real app would call `poller.tick()` from its own timer instead.
//!     let ticker = poller.ticker();
//!     let state = poller.run(&ticker, |event| {
//!         if let PulseEvent::Log(line) = event {
//!             println!("{line}");
//!         }
//!     });
//!
//!     assert_eq!(state, JobState::Completed { success: true });
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod command;
pub mod device;
mod error;
pub mod platform;
pub mod poller;
pub mod supervisor;

pub use error::{Error, Result};
