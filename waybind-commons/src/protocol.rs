//! Protocol interfaces known to waybind
//!
//! The [`Interface`] descriptors are generated at compile time by `wayland-scanner` from the XML
//! files in `protocols/`. Each interface gets a zero-sized marker type implementing
//! [`ProtocolInterface`], and a module of opcode constants named after the interface.

use wayland_backend::protocol::Interface;

/// Descriptors generated by `wayland-scanner`
pub mod interfaces {
    /// Descriptors generated from the core `wayland.xml` subset
    #[allow(missing_docs, non_upper_case_globals, non_camel_case_types, clippy::all)]
    pub mod wayland {
        wayland_scanner::generate_interfaces!("protocols/wayland.xml");
    }

    /// Descriptors generated from `plasma-virtual-desktop.xml`
    #[allow(missing_docs, non_upper_case_globals, non_camel_case_types, clippy::all)]
    pub mod plasma_virtual_desktop {
        wayland_scanner::generate_interfaces!("protocols/plasma-virtual-desktop.xml");
    }
}

/// A protocol interface, used to parametrize handles and globals
///
/// Implementors are marker types; all the information lives in the [`Interface`] descriptor.
pub trait ProtocolInterface: Send + Sync + 'static {
    /// The wire descriptor of this interface
    fn interface() -> &'static Interface;

    /// The interface name as sent on the wire
    fn name() -> &'static str {
        Self::interface().name
    }

    /// The highest version of this interface known to this crate
    fn max_version() -> u32 {
        Self::interface().version
    }

    /// Opcode of the request destroying this object, if the interface has one
    fn destructor() -> Option<u16> {
        Self::interface()
            .requests
            .iter()
            .position(|desc| desc.is_destructor)
            .map(|opcode| opcode as u16)
    }
}

macro_rules! protocol_interfaces {
    ($($(#[$attr:meta])* $marker:ident => $descriptor:path;)*) => {
        $(
            $(#[$attr])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $marker;

            impl ProtocolInterface for $marker {
                fn interface() -> &'static Interface {
                    &$descriptor
                }
            }
        )*
    };
}

protocol_interfaces! {
    /// `wl_display`, the connection singleton
    WlDisplay => interfaces::wayland::WL_DISPLAY_INTERFACE;
    /// `wl_registry`, the catalog of globals
    WlRegistry => interfaces::wayland::WL_REGISTRY_INTERFACE;
    /// `wl_callback`, a one-shot completion notification
    WlCallback => interfaces::wayland::WL_CALLBACK_INTERFACE;
    /// `wl_compositor`, the surface and region factory
    WlCompositor => interfaces::wayland::WL_COMPOSITOR_INTERFACE;
    /// `wl_buffer`
    WlBuffer => interfaces::wayland::WL_BUFFER_INTERFACE;
    /// `wl_surface`
    WlSurface => interfaces::wayland::WL_SURFACE_INTERFACE;
    /// `wl_output`
    WlOutput => interfaces::wayland::WL_OUTPUT_INTERFACE;
    /// `wl_region`
    WlRegion => interfaces::wayland::WL_REGION_INTERFACE;
    /// `org_kde_plasma_virtual_desktop_management`
    PlasmaVirtualDesktopManagement =>
        interfaces::plasma_virtual_desktop::ORG_KDE_PLASMA_VIRTUAL_DESKTOP_MANAGEMENT_INTERFACE;
    /// `org_kde_plasma_virtual_desktop`
    PlasmaVirtualDesktop =>
        interfaces::plasma_virtual_desktop::ORG_KDE_PLASMA_VIRTUAL_DESKTOP_INTERFACE;
}

#[allow(missing_docs)]
pub mod wl_display {
    pub const REQ_SYNC: u16 = 0;
    pub const REQ_GET_REGISTRY: u16 = 1;

    pub const EVT_ERROR: u16 = 0;
    pub const EVT_DELETE_ID: u16 = 1;

    pub const ERROR_INVALID_OBJECT: u32 = 0;
    pub const ERROR_INVALID_METHOD: u32 = 1;
    pub const ERROR_NO_MEMORY: u32 = 2;
    pub const ERROR_IMPLEMENTATION: u32 = 3;
}

#[allow(missing_docs)]
pub mod wl_registry {
    pub const REQ_BIND: u16 = 0;

    pub const EVT_GLOBAL: u16 = 0;
    pub const EVT_GLOBAL_REMOVE: u16 = 1;
}

#[allow(missing_docs)]
pub mod wl_callback {
    pub const EVT_DONE: u16 = 0;
}

#[allow(missing_docs)]
pub mod wl_compositor {
    pub const REQ_CREATE_SURFACE: u16 = 0;
    pub const REQ_CREATE_REGION: u16 = 1;
}

#[allow(missing_docs)]
pub mod wl_surface {
    pub const REQ_DESTROY: u16 = 0;
    pub const REQ_ATTACH: u16 = 1;
    pub const REQ_DAMAGE: u16 = 2;
    pub const REQ_FRAME: u16 = 3;
    pub const REQ_SET_OPAQUE_REGION: u16 = 4;
    pub const REQ_SET_INPUT_REGION: u16 = 5;
    pub const REQ_COMMIT: u16 = 6;
    pub const REQ_SET_BUFFER_TRANSFORM: u16 = 7;
    pub const REQ_SET_BUFFER_SCALE: u16 = 8;
    pub const REQ_DAMAGE_BUFFER: u16 = 9;

    pub const EVT_ENTER: u16 = 0;
    pub const EVT_LEAVE: u16 = 1;

    pub const ERROR_INVALID_SCALE: u32 = 0;
    pub const ERROR_INVALID_TRANSFORM: u32 = 1;
}

#[allow(missing_docs)]
pub mod wl_region {
    pub const REQ_DESTROY: u16 = 0;
    pub const REQ_ADD: u16 = 1;
    pub const REQ_SUBTRACT: u16 = 2;
}

#[allow(missing_docs)]
pub mod plasma_virtual_desktop_management {
    pub const REQ_GET_VIRTUAL_DESKTOP: u16 = 0;
    pub const REQ_REQUEST_CREATE_VIRTUAL_DESKTOP: u16 = 1;
    pub const REQ_REQUEST_REMOVE_VIRTUAL_DESKTOP: u16 = 2;

    pub const EVT_DESKTOP_CREATED: u16 = 0;
    pub const EVT_DESKTOP_REMOVED: u16 = 1;
    pub const EVT_DONE: u16 = 2;
    pub const EVT_ROWS: u16 = 3;

    /// First version carrying the `rows` event
    pub const ROWS_SINCE: u32 = 2;
}

#[allow(missing_docs)]
pub mod plasma_virtual_desktop {
    pub const REQ_REQUEST_ACTIVATE: u16 = 0;

    pub const EVT_DESKTOP_ID: u16 = 0;
    pub const EVT_NAME: u16 = 1;
    pub const EVT_ACTIVATED: u16 = 2;
    pub const EVT_DEACTIVATED: u16 = 3;
    pub const EVT_DONE: u16 = 4;
    pub const EVT_REMOVED: u16 = 5;
}
