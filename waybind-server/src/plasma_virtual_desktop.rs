use std::{
    ffi::CString,
    fmt,
    os::unix::io::RawFd,
    sync::{Arc, Mutex, Weak},
};

use wayland_backend::{protocol::Argument, server::ObjectId, smallvec::smallvec};
use waybind_commons::{
    protocol::{
        plasma_virtual_desktop as desktop_opcodes,
        plasma_virtual_desktop_management as management_opcodes, PlasmaVirtualDesktopManagement,
    },
    Signal,
};

use crate::{Args, Display, Global, Request, RequestHandler, Resource};

fn string_arg(value: &str) -> Argument<ObjectId, RawFd> {
    Argument::Str(Some(Box::new(CString::new(value).unwrap_or_default())))
}

fn broadcast(resources: &[Resource], opcode: u16, args: Args) {
    for resource in resources {
        resource.send_event(opcode, args.clone());
    }
}

struct DesktopState {
    name: String,
    active: bool,
    resources: Vec<Resource>,
}

struct DesktopInner {
    id: String,
    management: Weak<ManagementShared>,
    state: Mutex<DesktopState>,
    activate_requested: Signal<()>,
}

impl DesktopInner {
    fn resources(&self) -> Vec<Resource> {
        self.state.lock().unwrap().resources.clone()
    }

    fn add_resource(self: &Arc<Self>, resource: Resource) {
        resource.set_handler(Arc::new(DesktopHandler { desktop: Arc::downgrade(self) }));
        let desktop = Arc::downgrade(self);
        resource.on_destroy(move |resource| {
            if let Some(desktop) = desktop.upgrade() {
                desktop.state.lock().unwrap().resources.retain(|known| known != resource);
            }
        });
        let (name, active) = {
            let mut state = self.state.lock().unwrap();
            state.resources.push(resource.clone());
            (state.name.clone(), state.active)
        };
        resource.send_event(desktop_opcodes::EVT_DESKTOP_ID, smallvec![string_arg(&self.id)]);
        resource.send_event(desktop_opcodes::EVT_NAME, smallvec![string_arg(&name)]);
        if active {
            resource.send_event(desktop_opcodes::EVT_ACTIVATED, smallvec![]);
        }
        resource.send_event(desktop_opcodes::EVT_DONE, smallvec![]);
    }

    fn set_active(&self, active: bool) -> bool {
        let resources = {
            let mut state = self.state.lock().unwrap();
            if state.active == active {
                return false;
            }
            state.active = active;
            state.resources.clone()
        };
        let opcode =
            if active { desktop_opcodes::EVT_ACTIVATED } else { desktop_opcodes::EVT_DEACTIVATED };
        broadcast(&resources, opcode, smallvec![]);
        true
    }

    fn removed(&self) {
        let resources = std::mem::take(&mut self.state.lock().unwrap().resources);
        broadcast(&resources, desktop_opcodes::EVT_REMOVED, smallvec![]);
        for resource in resources {
            resource.destroy();
        }
    }
}

struct DesktopHandler {
    desktop: Weak<DesktopInner>,
}

impl RequestHandler for DesktopHandler {
    fn request(&self, _: &Resource, request: Request) -> Option<Resource> {
        match request.opcode {
            desktop_opcodes::REQ_REQUEST_ACTIVATE => {
                if let Some(desktop) = self.desktop.upgrade() {
                    desktop.activate_requested.emit(&());
                }
            }
            _ => crate::log_warn!(
                "Unexpected org_kde_plasma_virtual_desktop request {}",
                request.opcode
            ),
        }
        None
    }
}

/// The server side of a virtual desktop
///
/// Desktops are created by
/// [`PlasmaVirtualDesktopManagementInterface::create_desktop()`]. Property changes are sent to
/// the clients right away; call [`send_done()`](Self::send_done) once a batch of changes is
/// complete.
#[derive(Clone)]
pub struct PlasmaVirtualDesktopInterface {
    inner: Arc<DesktopInner>,
}

impl PlasmaVirtualDesktopInterface {
    /// The unique id of the desktop
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Set the user-visible name
    pub fn set_name(&self, name: &str) {
        let resources = {
            let mut state = self.inner.state.lock().unwrap();
            if state.name == name {
                return;
            }
            state.name = name.to_owned();
            state.resources.clone()
        };
        broadcast(&resources, desktop_opcodes::EVT_NAME, smallvec![string_arg(name)]);
    }

    /// The user-visible name
    pub fn name(&self) -> String {
        self.inner.state.lock().unwrap().name.clone()
    }

    /// Make this desktop the active one, or deactivate it
    ///
    /// Activating a desktop deactivates every other desktop of the same manager.
    pub fn set_active(&self, active: bool) {
        if active {
            let others = match self.inner.management.upgrade() {
                Some(management) => management.desktops.lock().unwrap().clone(),
                None => Vec::new(),
            };
            for other in others.iter().filter(|other| *other != self) {
                other.inner.set_active(false);
            }
        }
        self.inner.set_active(active);
    }

    /// Whether this desktop is the active one
    pub fn is_active(&self) -> bool {
        self.inner.state.lock().unwrap().active
    }

    /// Tell the clients a batch of changes is complete
    pub fn send_done(&self) {
        broadcast(&self.inner.resources(), desktop_opcodes::EVT_DONE, smallvec![]);
    }

    /// Emitted when a client asks for this desktop to be activated
    pub fn activate_requested(&self) -> &Signal<()> {
        &self.inner.activate_requested
    }
}

impl PartialEq for PlasmaVirtualDesktopInterface {
    fn eq(&self, other: &PlasmaVirtualDesktopInterface) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for PlasmaVirtualDesktopInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlasmaVirtualDesktopInterface")
            .field("id", &self.inner.id)
            .field("name", &self.name())
            .field("active", &self.is_active())
            .finish()
    }
}

struct ManagementShared {
    desktops: Mutex<Vec<PlasmaVirtualDesktopInterface>>,
    rows: Mutex<u32>,
    desktop_create_requested: Signal<(String, u32)>,
    desktop_remove_requested: Signal<String>,
}

impl ManagementShared {
    fn desktop(&self, id: &str) -> Option<PlasmaVirtualDesktopInterface> {
        let desktops = self.desktops.lock().unwrap();
        desktops.iter().find(|desktop| desktop.id() == id).cloned()
    }

    // sends the current state to a freshly bound manager
    fn announce(&self, resource: &Resource) {
        let desktops = self.desktops.lock().unwrap().clone();
        for (position, desktop) in desktops.iter().enumerate() {
            resource.send_event(
                management_opcodes::EVT_DESKTOP_CREATED,
                smallvec![string_arg(desktop.id()), Argument::Uint(position as u32)],
            );
        }
        if resource.version() >= management_opcodes::ROWS_SINCE {
            let rows = *self.rows.lock().unwrap();
            resource.send_event(management_opcodes::EVT_ROWS, smallvec![Argument::Uint(rows)]);
        }
        resource.send_event(management_opcodes::EVT_DONE, smallvec![]);
    }
}

struct ManagementHandler {
    shared: Arc<ManagementShared>,
}

impl RequestHandler for ManagementHandler {
    fn request(&self, resource: &Resource, request: Request) -> Option<Resource> {
        match (request.opcode, &request.args[..]) {
            (
                management_opcodes::REQ_GET_VIRTUAL_DESKTOP,
                [Argument::NewId(id), Argument::Str(Some(desktop_id))],
            ) => {
                let child = resource.new_child(id.clone())?;
                let desktop_id = desktop_id.to_string_lossy();
                match self.shared.desktop(&desktop_id) {
                    Some(desktop) => desktop.inner.add_resource(child.clone()),
                    None => {
                        crate::log_debug!("Client asked for unknown desktop {:?}", desktop_id);
                        child.send_event(desktop_opcodes::EVT_REMOVED, smallvec![]);
                        child.destroy();
                    }
                }
                return Some(child);
            }
            (
                management_opcodes::REQ_REQUEST_CREATE_VIRTUAL_DESKTOP,
                [Argument::Str(Some(name)), Argument::Uint(position)],
            ) => {
                let name = name.to_string_lossy().into_owned();
                self.shared.desktop_create_requested.emit(&(name, *position));
            }
            (
                management_opcodes::REQ_REQUEST_REMOVE_VIRTUAL_DESKTOP,
                [Argument::Str(Some(id))],
            ) => {
                self.shared.desktop_remove_requested.emit(&id.to_string_lossy().into_owned());
            }
            _ => crate::log_warn!(
                "Unexpected org_kde_plasma_virtual_desktop_management request {}",
                request.opcode
            ),
        }
        None
    }
}

/// The `org_kde_plasma_virtual_desktop_management` global
///
/// Holds the ordered list of desktops. Clients binding the manager receive every desktop, the
/// number of rows and a `done` event. Requests from clients to create or remove desktops are only
/// reported through signals; the owner decides whether to act on them.
pub struct PlasmaVirtualDesktopManagementInterface {
    global: Global,
    shared: Arc<ManagementShared>,
}

impl PlasmaVirtualDesktopManagementInterface {
    /// Highest `org_kde_plasma_virtual_desktop_management` version supported
    pub const VERSION: u32 = 2;

    /// Advertise the manager on `display`
    pub fn new(display: &Display) -> PlasmaVirtualDesktopManagementInterface {
        let shared = Arc::new(ManagementShared {
            desktops: Mutex::new(Vec::new()),
            rows: Mutex::new(1),
            desktop_create_requested: Signal::new(),
            desktop_remove_requested: Signal::new(),
        });
        let handler = Arc::new(ManagementHandler { shared: shared.clone() });
        let global = Global::create::<PlasmaVirtualDesktopManagement, _>(
            display,
            Self::VERSION,
            move |resource| {
                handler.shared.announce(resource);
                Some(handler.clone() as Arc<dyn RequestHandler>)
            },
        );
        PlasmaVirtualDesktopManagementInterface { global, shared }
    }

    /// The global advertised for this manager
    pub fn global(&self) -> &Global {
        &self.global
    }

    /// Create a desktop at `position`, at the end if `None` or out of range
    ///
    /// Returns the existing desktop if there already is one with this id.
    pub fn create_desktop(&self, id: &str, position: Option<u32>) -> PlasmaVirtualDesktopInterface {
        if let Some(desktop) = self.shared.desktop(id) {
            return desktop;
        }
        let desktop = PlasmaVirtualDesktopInterface {
            inner: Arc::new(DesktopInner {
                id: id.to_owned(),
                management: Arc::downgrade(&self.shared),
                state: Mutex::new(DesktopState {
                    name: String::new(),
                    active: false,
                    resources: Vec::new(),
                }),
                activate_requested: Signal::new(),
            }),
        };
        let index = {
            let mut desktops = self.shared.desktops.lock().unwrap();
            let index = position.map_or(desktops.len(), |position| {
                (position as usize).min(desktops.len())
            });
            desktops.insert(index, desktop.clone());
            index
        };
        broadcast(
            &self.global.resources(),
            management_opcodes::EVT_DESKTOP_CREATED,
            smallvec![string_arg(id), Argument::Uint(index as u32)],
        );
        desktop
    }

    /// Remove a desktop
    ///
    /// If it was the active one, the new first desktop becomes active.
    pub fn remove_desktop(&self, id: &str) {
        let (removed, first) = {
            let mut desktops = self.shared.desktops.lock().unwrap();
            let Some(index) = desktops.iter().position(|desktop| desktop.id() == id) else {
                return;
            };
            let removed = desktops.remove(index);
            (removed, desktops.first().cloned())
        };
        removed.inner.removed();
        broadcast(
            &self.global.resources(),
            management_opcodes::EVT_DESKTOP_REMOVED,
            smallvec![string_arg(id)],
        );
        if removed.is_active() {
            if let Some(first) = first {
                first.set_active(true);
                first.send_done();
            }
        }
    }

    /// The desktop with the given id
    pub fn desktop(&self, id: &str) -> Option<PlasmaVirtualDesktopInterface> {
        self.shared.desktop(id)
    }

    /// The desktops, in order
    pub fn desktops(&self) -> Vec<PlasmaVirtualDesktopInterface> {
        self.shared.desktops.lock().unwrap().clone()
    }

    /// Set the number of rows the desktops are laid out in
    pub fn set_rows(&self, rows: u32) {
        {
            let mut current = self.shared.rows.lock().unwrap();
            if *current == rows {
                return;
            }
            *current = rows;
        }
        let resources: Vec<Resource> = self
            .global
            .resources()
            .into_iter()
            .filter(|resource| resource.version() >= management_opcodes::ROWS_SINCE)
            .collect();
        broadcast(&resources, management_opcodes::EVT_ROWS, smallvec![Argument::Uint(rows)]);
    }

    /// The number of rows
    pub fn rows(&self) -> u32 {
        *self.shared.rows.lock().unwrap()
    }

    /// Tell the clients a batch of changes is complete
    pub fn send_done(&self) {
        broadcast(&self.global.resources(), management_opcodes::EVT_DONE, smallvec![]);
    }

    /// Emitted with `(name, position)` when a client asks for a new desktop
    pub fn desktop_create_requested(&self) -> &Signal<(String, u32)> {
        &self.shared.desktop_create_requested
    }

    /// Emitted with the desktop id when a client asks for a desktop to be removed
    pub fn desktop_remove_requested(&self) -> &Signal<String> {
        &self.shared.desktop_remove_requested
    }
}

impl fmt::Debug for PlasmaVirtualDesktopManagementInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlasmaVirtualDesktopManagementInterface")
            .field("global", &self.global)
            .field("desktops", &self.desktops())
            .field("rows", &self.rows())
            .finish()
    }
}
