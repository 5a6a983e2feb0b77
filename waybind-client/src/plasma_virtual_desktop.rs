use std::{
    ffi::CString,
    fmt,
    sync::{Arc, Mutex},
};

use wayland_backend::{client::ObjectId, protocol::Argument, smallvec::smallvec};
use waybind_commons::{
    protocol::{
        self, plasma_virtual_desktop as desktop_opcodes,
        plasma_virtual_desktop_management as management_opcodes,
    },
    Signal,
};

use crate::{
    event_queue::{Event, EventListener, EventQueue, ListenerRef},
    handle::{ProtocolObject, WireHandle},
    Connection,
};

#[derive(Default)]
struct DesktopState {
    id: String,
    name: String,
    active: bool,
}

struct DesktopInner {
    handle: WireHandle<protocol::PlasmaVirtualDesktop>,
    state: Mutex<DesktopState>,
    activated: Signal<()>,
    deactivated: Signal<()>,
    done: Signal<()>,
    removed: Signal<()>,
}

impl EventListener for DesktopInner {
    fn event(&self, _conn: &Connection, event: Event) {
        match (event.opcode, &event.args[..]) {
            (desktop_opcodes::EVT_DESKTOP_ID, [Argument::Str(Some(id))]) => {
                self.state.lock().unwrap().id = id.to_string_lossy().into_owned();
            }
            (desktop_opcodes::EVT_NAME, [Argument::Str(Some(name))]) => {
                self.state.lock().unwrap().name = name.to_string_lossy().into_owned();
            }
            (desktop_opcodes::EVT_ACTIVATED, []) => {
                self.state.lock().unwrap().active = true;
                self.activated.emit(&());
            }
            (desktop_opcodes::EVT_DEACTIVATED, []) => {
                self.state.lock().unwrap().active = false;
                self.deactivated.emit(&());
            }
            (desktop_opcodes::EVT_DONE, []) => self.done.emit(&()),
            (desktop_opcodes::EVT_REMOVED, []) => self.removed.emit(&()),
            _ => {
                crate::log_warn!("Unexpected org_kde_plasma_virtual_desktop event {}", event.opcode)
            }
        }
    }
}

/// An `org_kde_plasma_virtual_desktop`
///
/// The desktop state (id, name, activation) is sent by the server right after the object is
/// created and whenever it changes, each batch being terminated by [`done()`](Self::done).
#[derive(Clone)]
pub struct PlasmaVirtualDesktop {
    inner: Arc<DesktopInner>,
}

impl PlasmaVirtualDesktop {
    fn with_id(id: &str) -> PlasmaVirtualDesktop {
        PlasmaVirtualDesktop {
            inner: Arc::new(DesktopInner {
                handle: WireHandle::new(),
                state: Mutex::new(DesktopState { id: id.to_owned(), ..Default::default() }),
                activated: Signal::new(),
                deactivated: Signal::new(),
                done: Signal::new(),
                removed: Signal::new(),
            }),
        }
    }

    /// A desktop not yet bound to any object
    pub fn new() -> PlasmaVirtualDesktop {
        PlasmaVirtualDesktop::with_id("")
    }

    /// Bind this front-end to an existing `org_kde_plasma_virtual_desktop`
    pub fn setup(&self, conn: &Connection, id: ObjectId) {
        self.inner.handle.setup(conn, id.clone());
        conn.attach_listener(&id, ListenerRef::weak(&self.inner));
    }

    /// The unique id of the desktop
    pub fn id(&self) -> String {
        self.inner.state.lock().unwrap().id.clone()
    }

    /// The user-visible name of the desktop
    pub fn name(&self) -> String {
        self.inner.state.lock().unwrap().name.clone()
    }

    /// Whether this is the current desktop
    pub fn is_active(&self) -> bool {
        self.inner.state.lock().unwrap().active
    }

    /// Ask the server to make this desktop the current one
    pub fn request_activate(&self) {
        self.inner.handle.send_request(desktop_opcodes::REQ_REQUEST_ACTIVATE, smallvec![]);
    }

    /// Emitted when the desktop becomes the current one
    pub fn activated(&self) -> &Signal<()> {
        &self.inner.activated
    }

    /// Emitted when the desktop stops being the current one
    pub fn deactivated(&self) -> &Signal<()> {
        &self.inner.deactivated
    }

    /// Emitted after a batch of state changes
    pub fn done(&self) -> &Signal<()> {
        &self.inner.done
    }

    /// Emitted when the server removed the desktop
    pub fn removed(&self) -> &Signal<()> {
        &self.inner.removed
    }
}

impl ProtocolObject for PlasmaVirtualDesktop {
    type Interface = protocol::PlasmaVirtualDesktop;

    fn wire_handle(&self) -> &WireHandle<protocol::PlasmaVirtualDesktop> {
        &self.inner.handle
    }
}

impl Default for PlasmaVirtualDesktop {
    fn default() -> PlasmaVirtualDesktop {
        PlasmaVirtualDesktop::new()
    }
}

impl PartialEq for PlasmaVirtualDesktop {
    fn eq(&self, other: &PlasmaVirtualDesktop) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for PlasmaVirtualDesktop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock().unwrap();
        f.debug_struct("PlasmaVirtualDesktop")
            .field("id", &state.id)
            .field("name", &state.name)
            .field("active", &state.active)
            .finish()
    }
}

#[derive(Default)]
struct ManagementState {
    desktops: Vec<PlasmaVirtualDesktop>,
    rows: u32,
}

struct ManagementInner {
    handle: WireHandle<protocol::PlasmaVirtualDesktopManagement>,
    queue: Mutex<Option<EventQueue>>,
    state: Mutex<ManagementState>,
    desktop_created: Signal<(String, u32)>,
    desktop_removed: Signal<String>,
    rows_changed: Signal<u32>,
    done: Signal<()>,
    removed: Signal<()>,
}

impl ManagementInner {
    fn desktop(&self, id: &str) -> Option<PlasmaVirtualDesktop> {
        self.state.lock().unwrap().desktops.iter().find(|desktop| desktop.id() == id).cloned()
    }

    fn get_virtual_desktop(&self, id: &str) -> PlasmaVirtualDesktop {
        if let Some(desktop) = self.desktop(id) {
            return desktop;
        }
        let desktop = PlasmaVirtualDesktop::with_id(id);
        let Ok(desktop_id) = CString::new(id) else {
            crate::log_warn!("Invalid virtual desktop id {:?}", id);
            return desktop;
        };
        let queue = self.queue.lock().unwrap().clone();
        self.handle.create_child(
            &desktop.inner.handle,
            management_opcodes::REQ_GET_VIRTUAL_DESKTOP,
            smallvec![Argument::NewId(ObjectId::null()), Argument::Str(Some(Box::new(desktop_id)))],
            queue.as_ref(),
            Some(ListenerRef::weak(&desktop.inner)),
            None,
        );
        desktop
    }
}

impl EventListener for ManagementInner {
    fn event(&self, _conn: &Connection, event: Event) {
        match (event.opcode, &event.args[..]) {
            (
                management_opcodes::EVT_DESKTOP_CREATED,
                [Argument::Str(Some(id)), Argument::Uint(position)],
            ) => {
                let id = id.to_string_lossy().into_owned();
                let desktop = self.get_virtual_desktop(&id);
                {
                    let mut state = self.state.lock().unwrap();
                    let index = (*position as usize).min(state.desktops.len());
                    state.desktops.insert(index, desktop);
                }
                self.desktop_created.emit(&(id, *position));
            }
            (management_opcodes::EVT_DESKTOP_REMOVED, [Argument::Str(Some(id))]) => {
                let id = id.to_string_lossy().into_owned();
                let removed = {
                    let mut state = self.state.lock().unwrap();
                    state
                        .desktops
                        .iter()
                        .position(|desktop| desktop.id() == id)
                        .map(|index| state.desktops.remove(index))
                };
                if let Some(desktop) = removed {
                    desktop.release();
                }
                self.desktop_removed.emit(&id);
            }
            (management_opcodes::EVT_DONE, []) => self.done.emit(&()),
            (management_opcodes::EVT_ROWS, [Argument::Uint(rows)]) => {
                self.state.lock().unwrap().rows = *rows;
                self.rows_changed.emit(rows);
            }
            _ => crate::log_warn!(
                "Unexpected org_kde_plasma_virtual_desktop_management event {}",
                event.opcode
            ),
        }
    }
}

/// An `org_kde_plasma_virtual_desktop_management`
///
/// The manager mirrors the ordered list of desktops of the server. When bound, the server sends
/// every existing desktop followed by [`done()`](Self::done); from then on the list follows
/// creations and removals.
#[derive(Clone)]
pub struct PlasmaVirtualDesktopManagement {
    inner: Arc<ManagementInner>,
}

impl PlasmaVirtualDesktopManagement {
    /// A manager not yet bound to any object
    pub fn new() -> PlasmaVirtualDesktopManagement {
        PlasmaVirtualDesktopManagement {
            inner: Arc::new(ManagementInner {
                handle: WireHandle::new(),
                queue: Mutex::new(None),
                state: Mutex::default(),
                desktop_created: Signal::new(),
                desktop_removed: Signal::new(),
                rows_changed: Signal::new(),
                done: Signal::new(),
                removed: Signal::new(),
            }),
        }
    }

    /// Bind this front-end to an existing `org_kde_plasma_virtual_desktop_management`
    pub fn setup(&self, conn: &Connection, id: ObjectId) {
        self.inner.handle.setup(conn, id.clone());
        conn.attach_listener(&id, ListenerRef::weak(&self.inner));
    }

    /// The queue the desktops are assigned to
    pub fn event_queue(&self) -> Option<EventQueue> {
        self.inner.queue.lock().unwrap().clone()
    }

    /// Assign the desktops created from now on to `queue`
    pub fn set_event_queue(&self, queue: &EventQueue) {
        *self.inner.queue.lock().unwrap() = Some(queue.clone());
    }

    /// The desktops, in server order
    pub fn desktops(&self) -> Vec<PlasmaVirtualDesktop> {
        self.inner.state.lock().unwrap().desktops.clone()
    }

    /// The desktop with the given id
    pub fn desktop(&self, id: &str) -> Option<PlasmaVirtualDesktop> {
        self.inner.desktop(id)
    }

    /// The desktop with the given id, asking the server for it if it is not known yet
    pub fn get_virtual_desktop(&self, id: &str) -> PlasmaVirtualDesktop {
        self.inner.get_virtual_desktop(id)
    }

    /// The number of rows the desktops are laid out in
    pub fn rows(&self) -> u32 {
        self.inner.state.lock().unwrap().rows
    }

    /// Ask the server to create a desktop at `position`
    pub fn request_create_virtual_desktop(&self, name: &str, position: u32) {
        let Ok(name) = CString::new(name) else {
            crate::log_warn!("Invalid virtual desktop name {:?}", name);
            return;
        };
        self.inner.handle.send_request(
            management_opcodes::REQ_REQUEST_CREATE_VIRTUAL_DESKTOP,
            smallvec![Argument::Str(Some(Box::new(name))), Argument::Uint(position)],
        );
    }

    /// Ask the server to remove a desktop
    pub fn request_remove_virtual_desktop(&self, id: &str) {
        let Ok(id) = CString::new(id) else {
            crate::log_warn!("Invalid virtual desktop id {:?}", id);
            return;
        };
        self.inner.handle.send_request(
            management_opcodes::REQ_REQUEST_REMOVE_VIRTUAL_DESKTOP,
            smallvec![Argument::Str(Some(Box::new(id)))],
        );
    }

    /// Emitted with `(id, position)` when a desktop is created
    pub fn desktop_created(&self) -> &Signal<(String, u32)> {
        &self.inner.desktop_created
    }

    /// Emitted with the desktop id when a desktop is removed
    pub fn desktop_removed(&self) -> &Signal<String> {
        &self.inner.desktop_removed
    }

    /// Emitted when the layout row count changes
    pub fn rows_changed(&self) -> &Signal<u32> {
        &self.inner.rows_changed
    }

    /// Emitted after a batch of changes
    pub fn done(&self) -> &Signal<()> {
        &self.inner.done
    }

    /// Emitted when the global this manager was bound from is withdrawn
    pub fn removed(&self) -> &Signal<()> {
        &self.inner.removed
    }
}

impl ProtocolObject for PlasmaVirtualDesktopManagement {
    type Interface = protocol::PlasmaVirtualDesktopManagement;

    fn wire_handle(&self) -> &WireHandle<protocol::PlasmaVirtualDesktopManagement> {
        &self.inner.handle
    }

    fn release(&self) {
        for desktop in std::mem::take(&mut self.inner.state.lock().unwrap().desktops) {
            desktop.release();
        }
        self.inner.handle.release();
    }

    fn destroy(&self) {
        for desktop in std::mem::take(&mut self.inner.state.lock().unwrap().desktops) {
            desktop.destroy();
        }
        self.inner.handle.destroy();
    }
}

impl Default for PlasmaVirtualDesktopManagement {
    fn default() -> PlasmaVirtualDesktopManagement {
        PlasmaVirtualDesktopManagement::new()
    }
}

impl fmt::Debug for PlasmaVirtualDesktopManagement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock().unwrap();
        f.debug_struct("PlasmaVirtualDesktopManagement")
            .field("handle", &self.inner.handle)
            .field("desktops", &state.desktops)
            .field("rows", &state.rows)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbound_management() {
        let management = PlasmaVirtualDesktopManagement::new();
        let desktop = management.get_virtual_desktop("0-1");
        assert_eq!(desktop.id(), "0-1");
        assert!(!desktop.is_valid());
        assert!(management.desktops().is_empty());
        assert_eq!(management.rows(), 0);
        management.request_create_virtual_desktop("bad\0name", 0);
    }
}
