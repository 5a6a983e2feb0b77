//! Server side of waybind
//!
//! The [`Display`] owns the backend and the listening socket. Globals are advertised with
//! [`Global`]; every time a client binds one, a [`Resource`] is created and its requests are
//! routed to a [`RequestHandler`]. Resources follow a strict lifecycle: they are unbound exactly
//! once, whether the client destroys them, disconnects, or the global goes away, and an unbound
//! resource never sends anything again.
//!
//! On top of this, the crate provides the server end of the interfaces known to waybind:
//! [`CompositorInterface`] with its surfaces and regions, and
//! [`PlasmaVirtualDesktopManagementInterface`] with its desktops.
//!
//! ## Example
//!
//! ```no_run
//! use waybind_server::{CompositorInterface, Display, StartMode};
//!
//! let mut display = Display::new().unwrap();
//! display.start(StartMode::ConnectToSocket).unwrap();
//! let compositor = CompositorInterface::new(&display);
//! compositor.surface_created().connect(|surface| {
//!     surface.committed().connect(|_| println!("commit"));
//! });
//! loop {
//!     display.dispatch_events().unwrap();
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//! ```

#![warn(missing_docs)]

mod client;
mod compositor;
mod display;
mod global;
mod plasma_virtual_desktop;
mod region;
mod resource;
mod socket;
mod surface;

pub use client::ClientConnection;
pub use compositor::CompositorInterface;
pub use display::{Display, DisplayError, StartMode};
pub use global::Global;
pub use plasma_virtual_desktop::{
    PlasmaVirtualDesktopInterface, PlasmaVirtualDesktopManagementInterface,
};
pub use region::RegionInterface;
pub use resource::{Request, RequestHandler, Resource};
pub use socket::{BindError, ListeningSocket};
pub use surface::SurfaceInterface;

pub use waybind_commons::{geometry, protocol, Signal, SignalSpy, SlotId};

/// Reexports of the backend types exposed in this crate's API
pub mod backend {
    pub use wayland_backend::protocol::{Argument, Message, ProtocolError};
    pub use wayland_backend::server::{ClientId, Credentials, InvalidId, ObjectId};
}

/// The arguments of an event
pub type Args = wayland_backend::smallvec::SmallVec<
    [wayland_backend::protocol::Argument<
        wayland_backend::server::ObjectId,
        std::os::unix::io::RawFd,
    >; wayland_backend::protocol::INLINE_ARGS],
>;

// internal imports for dispatching logging depending on the `log` feature
#[cfg(feature = "log")]
#[allow(unused_imports)]
use log::{debug as log_debug, error as log_error, info as log_info, warn as log_warn};
#[cfg(not(feature = "log"))]
#[allow(unused_imports)]
use std::{
    eprintln as log_error, eprintln as log_warn, eprintln as log_info, eprintln as log_debug,
};
