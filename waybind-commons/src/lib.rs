//! Common definitions shared by the waybind client and server crates
//!
//! This crate carries everything both sides of a connection need to agree on:
//!
//! - the protocol interface descriptors, generated from the XML files bundled in `protocols/`,
//!   together with their opcode constants and the
//!   [`ProtocolInterface`](protocol::ProtocolInterface) marker trait used to parametrize handles
//!   over an interface
//! - the geometry types used by surface and region state ([`Rect`](geometry::Rect),
//!   [`RectRegion`](geometry::RectRegion), [`Size`](geometry::Size))
//! - [`Signal`], the typed observer list every front-end object uses to report protocol events

#![warn(missing_docs)]

pub mod geometry;
pub mod protocol;
mod signal;

pub use signal::{Signal, SignalSpy, SlotId, WeakSignal};

pub use wayland_backend;
