//! Client side of waybind
//!
//! This crate wraps the raw protocol objects of a Wayland connection into lifecycle-managed
//! front-end objects. The main pieces are:
//!
//! - [`WireHandle`], the owner of a single protocol object. It is either bound to a live object
//!   or empty, and releasing it sends the interface destructor exactly once.
//! - [`Connection`], a connected socket together with the set of handles bound on it. When the
//!   connection dies, every handle is invalidated before anyone is told about the death, so
//!   nothing ever talks to a dead object.
//! - [`EventQueue`], which buffers incoming events for the objects assigned to it until they are
//!   dispatched on the consumer's thread.
//! - [`ConnectionThread`], which owns the socket reader on a dedicated thread, tracks the
//!   connection state and reconnects when the compositor comes back.
//! - [`Registry`] and the typed front-ends ([`Compositor`], [`Surface`], [`Region`],
//!   [`PlasmaVirtualDesktopManagement`], [`PlasmaVirtualDesktop`]).
//!
//! ## Logging
//!
//! Unexpected situations (requests on empty handles, events the crate does not understand,
//! connection failures) are reported through the `log` crate when the `log` cargo feature is
//! enabled, which is the default. Without it, these messages are printed to stderr.
//!
//! ## Example
//!
//! ```no_run
//! use waybind_client::{ConnectionThread, EventQueue, Registry};
//!
//! let thread = ConnectionThread::new().unwrap();
//! let connected = thread.connected().spy();
//! thread.init_connection();
//! # while connected.is_empty() { std::thread::sleep(std::time::Duration::from_millis(5)); }
//! let conn = thread.connection().unwrap();
//!
//! let queue = EventQueue::new();
//! queue.setup(&conn);
//! let registry = Registry::new();
//! registry.set_event_queue(&queue);
//! registry.create(&conn);
//! registry.setup();
//! registry.compositor_announced().connect(|(name, version)| {
//!     println!("wl_compositor {name} v{version}");
//! });
//! queue.roundtrip().unwrap();
//! ```

#![warn(missing_docs)]

mod compositor;
mod conn;
mod event_queue;
mod handle;
mod plasma_virtual_desktop;
mod region;
mod registry;
mod surface;
mod thread;

pub use compositor::Compositor;
pub use conn::{ConnectError, Connection, SocketConfig};
pub use event_queue::{DispatchError, Event, EventListener, EventQueue};
pub use handle::{ProtocolObject, WireHandle};
pub use plasma_virtual_desktop::{PlasmaVirtualDesktop, PlasmaVirtualDesktopManagement};
pub use region::Region;
pub use registry::{AnnouncedInterface, InterfaceKind, Registry};
pub use surface::{CommitFlag, Surface};
pub use thread::{ConnectionState, ConnectionThread};

pub use waybind_commons::{geometry, protocol, Signal, SignalSpy, SlotId, WeakSignal};

/// Reexports of the backend types exposed in this crate's API
pub mod backend {
    pub use wayland_backend::client::{InvalidId, ObjectId, WaylandError};
    pub use wayland_backend::protocol::{Argument, Message, ProtocolError};
}

pub(crate) type Args = wayland_backend::smallvec::SmallVec<
    [wayland_backend::protocol::Argument<
        wayland_backend::client::ObjectId,
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
