use std::{
    collections::HashMap,
    ffi::CString,
    fmt,
    sync::{Arc, Mutex, Weak},
};

use wayland_backend::{
    client::ObjectId,
    message,
    protocol::Argument,
    smallvec::smallvec,
};
use waybind_commons::{
    protocol::{self, wl_display, wl_registry, ProtocolInterface, WlRegistry},
    Signal, WeakSignal,
};

use crate::{
    event_queue::{Event, EventListener, EventQueue, ListenerRef},
    handle::{ProtocolObject, WireHandle},
    Compositor, Connection, PlasmaVirtualDesktopManagement,
};

/// The globals waybind knows by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceKind {
    /// `wl_compositor`
    Compositor,
    /// `wl_shm`
    Shm,
    /// `wl_seat`
    Seat,
    /// `wl_output`
    Output,
    /// `wl_subcompositor`
    Subcompositor,
    /// `wl_data_device_manager`
    DataDeviceManager,
    /// `wl_shell`
    Shell,
    /// `xdg_wm_base`
    XdgWmBase,
    /// `org_kde_plasma_shell`
    PlasmaShell,
    /// `org_kde_plasma_virtual_desktop_management`
    PlasmaVirtualDesktopManagement,
    /// `org_kde_plasma_window_management`
    PlasmaWindowManagement,
    /// `org_kde_kwin_server_decoration_manager`
    ServerSideDecorationManager,
    /// `zxdg_decoration_manager_v1`
    XdgDecorationManager,
    /// Any other interface
    Unknown,
}

const KNOWN_INTERFACES: &[(InterfaceKind, &str)] = &[
    (InterfaceKind::Compositor, "wl_compositor"),
    (InterfaceKind::Shm, "wl_shm"),
    (InterfaceKind::Seat, "wl_seat"),
    (InterfaceKind::Output, "wl_output"),
    (InterfaceKind::Subcompositor, "wl_subcompositor"),
    (InterfaceKind::DataDeviceManager, "wl_data_device_manager"),
    (InterfaceKind::Shell, "wl_shell"),
    (InterfaceKind::XdgWmBase, "xdg_wm_base"),
    (InterfaceKind::PlasmaShell, "org_kde_plasma_shell"),
    (InterfaceKind::PlasmaVirtualDesktopManagement, "org_kde_plasma_virtual_desktop_management"),
    (InterfaceKind::PlasmaWindowManagement, "org_kde_plasma_window_management"),
    (InterfaceKind::ServerSideDecorationManager, "org_kde_kwin_server_decoration_manager"),
    (InterfaceKind::XdgDecorationManager, "zxdg_decoration_manager_v1"),
];

impl InterfaceKind {
    /// The kind of the interface called `name`
    pub fn from_name(name: &str) -> InterfaceKind {
        KNOWN_INTERFACES
            .iter()
            .find(|(_, known)| *known == name)
            .map_or(InterfaceKind::Unknown, |(kind, _)| *kind)
    }

    /// The wire name of this interface, `None` for [`InterfaceKind::Unknown`]
    pub fn name(self) -> Option<&'static str> {
        KNOWN_INTERFACES.iter().find(|(kind, _)| *kind == self).map(|(_, name)| *name)
    }
}

/// A global announced by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnouncedInterface {
    /// The numeric name of the global, used to bind it
    pub name: u32,
    /// The interface name
    pub interface: String,
    /// The interface, if waybind knows it
    pub kind: InterfaceKind,
    /// The version offered by the server
    pub version: u32,
}

#[derive(Clone, Default)]
struct KindSignals {
    announced: Signal<(u32, u32)>,
    removed: Signal<u32>,
}

#[derive(Default)]
struct RegistryState {
    entries: Vec<AnnouncedInterface>,
    listening: bool,
}

struct RegistryInner {
    handle: WireHandle<WlRegistry>,
    queue: Mutex<Option<EventQueue>>,
    state: Mutex<RegistryState>,
    kinds: Mutex<HashMap<InterfaceKind, KindSignals>>,
    // `removed` signals of the front-ends bound through this registry, by global name
    bound: Mutex<Vec<(u32, WeakSignal<()>)>>,
    interface_announced: Signal<AnnouncedInterface>,
    interface_removed: Signal<u32>,
    interfaces_announced: Signal<()>,
}

impl RegistryInner {
    fn kind_signals(&self, kind: InterfaceKind) -> KindSignals {
        self.kinds.lock().unwrap().entry(kind).or_default().clone()
    }

    fn announce(&self, entry: AnnouncedInterface) {
        let listening = {
            let mut state = self.state.lock().unwrap();
            state.entries.push(entry.clone());
            state.listening
        };
        if !listening {
            return;
        }
        self.interface_announced.emit(&entry);
        if entry.kind != InterfaceKind::Unknown {
            self.kind_signals(entry.kind).announced.emit(&(entry.name, entry.version));
        }
    }

    fn withdraw(&self, name: u32) {
        let (entry, listening) = {
            let mut state = self.state.lock().unwrap();
            let Some(index) = state.entries.iter().position(|entry| entry.name == name) else {
                crate::log_debug!("Removal of unknown global {}", name);
                return;
            };
            (state.entries.remove(index), state.listening)
        };
        let bound: Vec<WeakSignal<()>> = {
            let mut bound = self.bound.lock().unwrap();
            let (withdrawn, kept): (Vec<_>, Vec<_>) =
                bound.drain(..).partition(|(bound_name, _)| *bound_name == name);
            *bound = kept;
            withdrawn.into_iter().map(|(_, removed)| removed).collect()
        };
        if !listening {
            return;
        }
        self.interface_removed.emit(&name);
        if entry.kind != InterfaceKind::Unknown {
            self.kind_signals(entry.kind).removed.emit(&name);
        }
        for removed in bound.iter().filter_map(WeakSignal::upgrade) {
            removed.emit(&());
        }
    }

    fn forward_removal(&self, name: u32, removed: &Signal<()>) {
        let mut bound = self.bound.lock().unwrap();
        bound.retain(|(_, removed)| removed.upgrade().is_some());
        bound.push((name, removed.downgrade()));
    }
}

impl EventListener for RegistryInner {
    fn event(&self, _conn: &Connection, event: Event) {
        match (event.opcode, &event.args[..]) {
            (
                wl_registry::EVT_GLOBAL,
                [Argument::Uint(name), Argument::Str(Some(interface)), Argument::Uint(version)],
            ) => {
                let interface = interface.to_string_lossy().into_owned();
                self.announce(AnnouncedInterface {
                    name: *name,
                    kind: InterfaceKind::from_name(&interface),
                    interface,
                    version: *version,
                });
            }
            (wl_registry::EVT_GLOBAL_REMOVE, [Argument::Uint(name)]) => self.withdraw(*name),
            _ => crate::log_warn!("Unexpected wl_registry event {}", event.opcode),
        }
    }
}

// emits interfaces_announced once the initial burst of globals was dispatched
struct InitialSync {
    registry: Weak<RegistryInner>,
}

impl EventListener for InitialSync {
    fn event(&self, _conn: &Connection, _event: Event) {
        if let Some(registry) = self.registry.upgrade() {
            registry.interfaces_announced.emit(&());
        }
    }
}

/// The catalog of globals offered by the server
///
/// The registry records every global announced and withdrawn by the server. Globals of a known
/// [`InterfaceKind`] are also reported through the per-kind signals returned by
/// [`announced()`](Registry::announced) and [`removed()`](Registry::removed).
///
/// Events received between [`create()`](Registry::create) and [`setup()`](Registry::setup) are
/// recorded but not signalled.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// A registry not yet created on a connection
    pub fn new() -> Registry {
        Registry {
            inner: Arc::new(RegistryInner {
                handle: WireHandle::new(),
                queue: Mutex::new(None),
                state: Mutex::default(),
                kinds: Mutex::default(),
                bound: Mutex::default(),
                interface_announced: Signal::new(),
                interface_removed: Signal::new(),
                interfaces_announced: Signal::new(),
            }),
        }
    }

    /// The queue used for the registry and the objects bound through it
    pub fn event_queue(&self) -> Option<EventQueue> {
        self.inner.queue.lock().unwrap().clone()
    }

    /// Assign the registry and the objects it binds to `queue`
    pub fn set_event_queue(&self, queue: &EventQueue) {
        *self.inner.queue.lock().unwrap() = Some(queue.clone());
    }

    /// Request the registry object from the server
    ///
    /// # Panics
    ///
    /// If the registry was already created.
    pub fn create(&self, conn: &Connection) {
        assert!(!self.inner.handle.is_valid(), "Registry::create() called twice");
        let queue = self.event_queue().unwrap_or_else(|| conn.default_queue());
        let data = queue.proxy_data(Some(ListenerRef::weak(&self.inner)));
        let msg = message!(
            conn.display_id(),
            wl_display::REQ_GET_REGISTRY,
            [Argument::NewId(ObjectId::null())]
        );
        match conn.send_request(msg, Some(data), None) {
            Ok(id) => self.inner.handle.setup(conn, id),
            Err(_) => crate::log_warn!("Cannot create a registry on a dead connection"),
        }
    }

    /// Start signalling announcements
    ///
    /// A roundtrip is also started, [`interfaces_announced()`](Registry::interfaces_announced) is
    /// emitted once the initial globals have all been dispatched.
    ///
    /// # Panics
    ///
    /// If called before [`create()`](Registry::create) or more than once.
    pub fn setup(&self) {
        let Some(conn) = self.inner.handle.connection() else {
            panic!("Registry::setup() called before Registry::create()");
        };
        {
            let mut state = self.inner.state.lock().unwrap();
            assert!(!state.listening, "Registry::setup() called twice");
            state.listening = true;
        }
        let queue = self.event_queue().unwrap_or_else(|| conn.default_queue());
        let sync = Arc::new(InitialSync { registry: Arc::downgrade(&self.inner) });
        let data = queue.proxy_data(Some(ListenerRef::Owned(sync)));
        let msg =
            message!(conn.display_id(), wl_display::REQ_SYNC, [Argument::NewId(ObjectId::null())]);
        if conn.send_request(msg, Some(data), None).is_err() {
            crate::log_warn!("Cannot sync the registry on a dead connection");
        }
    }

    /// Every global currently announced, in announcement order
    pub fn interfaces(&self) -> Vec<AnnouncedInterface> {
        self.inner.state.lock().unwrap().entries.clone()
    }

    /// Every global of the given kind currently announced
    pub fn interfaces_of(&self, kind: InterfaceKind) -> Vec<AnnouncedInterface> {
        self.inner
            .state
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|entry| entry.kind == kind)
            .cloned()
            .collect()
    }

    /// The most recently announced global of the given kind
    pub fn interface(&self, kind: InterfaceKind) -> Option<AnnouncedInterface> {
        let state = self.inner.state.lock().unwrap();
        state.entries.iter().rev().find(|entry| entry.kind == kind).cloned()
    }

    /// Whether a global of the given kind is announced
    pub fn has_interface(&self, kind: InterfaceKind) -> bool {
        self.interface(kind).is_some()
    }

    /// Bind the global `name` with interface `I` at `version`
    ///
    /// Fails if no such global is announced, if `version` is 0, or if it exceeds either the
    /// version announced by the server or the highest version known for `I`. The new object is
    /// assigned to the registry's queue, and its events are held until a listener is attached.
    pub fn bind<I: ProtocolInterface>(&self, name: u32, version: u32) -> Option<ObjectId> {
        self.bind_with::<I>(name, version, None).map(|(_, id)| id)
    }

    fn bind_with<I: ProtocolInterface>(
        &self,
        name: u32,
        version: u32,
        listener: Option<ListenerRef>,
    ) -> Option<(Connection, ObjectId)> {
        let announced = self
            .inner
            .state
            .lock()
            .unwrap()
            .entries
            .iter()
            .find(|entry| entry.name == name && entry.interface == I::name())
            .map(|entry| entry.version);
        let Some(announced) = announced else {
            crate::log_warn!("No {} global announced with name {}", I::name(), name);
            return None;
        };
        if version == 0 || version > announced || version > I::max_version() {
            crate::log_warn!(
                "Cannot bind {} at version {}: the server offers {} and we support {}",
                I::name(),
                version,
                announced,
                I::max_version()
            );
            return None;
        }
        let interface = CString::new(I::name()).ok()?;
        let queue = self.event_queue();
        self.inner.handle.send_constructor::<I>(
            wl_registry::REQ_BIND,
            smallvec![
                Argument::Uint(name),
                Argument::Str(Some(Box::new(interface))),
                Argument::Uint(version),
                Argument::NewId(ObjectId::null()),
            ],
            queue.as_ref(),
            listener,
            Some(version),
        )
    }

    /// Bind a `wl_compositor` global
    pub fn bind_compositor(&self, name: u32, version: u32) -> Option<ObjectId> {
        self.bind::<protocol::WlCompositor>(name, version)
    }

    /// Bind a `wl_compositor` global and wrap it
    ///
    /// The returned compositor emits [`removed()`](Compositor::removed) when the global is
    /// withdrawn.
    pub fn create_compositor(&self, name: u32, version: u32) -> Option<Compositor> {
        let compositor = Compositor::new();
        if let Some(queue) = self.event_queue() {
            compositor.set_event_queue(&queue);
        }
        let (conn, id) = self.bind_with::<protocol::WlCompositor>(name, version, None)?;
        compositor.setup(&conn, id);
        self.inner.forward_removal(name, compositor.removed());
        Some(compositor)
    }

    /// Bind an `org_kde_plasma_virtual_desktop_management` global
    pub fn bind_plasma_virtual_desktop_management(
        &self,
        name: u32,
        version: u32,
    ) -> Option<ObjectId> {
        self.bind::<protocol::PlasmaVirtualDesktopManagement>(name, version)
    }

    /// Bind an `org_kde_plasma_virtual_desktop_management` global and wrap it
    pub fn create_plasma_virtual_desktop_management(
        &self,
        name: u32,
        version: u32,
    ) -> Option<PlasmaVirtualDesktopManagement> {
        let management = PlasmaVirtualDesktopManagement::new();
        if let Some(queue) = self.event_queue() {
            management.set_event_queue(&queue);
        }
        let (conn, id) =
            self.bind_with::<protocol::PlasmaVirtualDesktopManagement>(name, version, None)?;
        management.setup(&conn, id);
        self.inner.forward_removal(name, management.removed());
        Some(management)
    }

    /// Emitted with `(name, version)` when a global of the given kind is announced
    pub fn announced(&self, kind: InterfaceKind) -> Signal<(u32, u32)> {
        self.inner.kind_signals(kind).announced
    }

    /// Emitted with the global name when a global of the given kind is withdrawn
    pub fn removed(&self, kind: InterfaceKind) -> Signal<u32> {
        self.inner.kind_signals(kind).removed
    }

    /// Same as `announced(InterfaceKind::Compositor)`
    pub fn compositor_announced(&self) -> Signal<(u32, u32)> {
        self.announced(InterfaceKind::Compositor)
    }

    /// Same as `removed(InterfaceKind::Compositor)`
    pub fn compositor_removed(&self) -> Signal<u32> {
        self.removed(InterfaceKind::Compositor)
    }

    /// Same as `announced(InterfaceKind::PlasmaVirtualDesktopManagement)`
    pub fn plasma_virtual_desktop_management_announced(&self) -> Signal<(u32, u32)> {
        self.announced(InterfaceKind::PlasmaVirtualDesktopManagement)
    }

    /// Same as `removed(InterfaceKind::PlasmaVirtualDesktopManagement)`
    pub fn plasma_virtual_desktop_management_removed(&self) -> Signal<u32> {
        self.removed(InterfaceKind::PlasmaVirtualDesktopManagement)
    }

    /// Emitted for every announced global, known or not
    pub fn interface_announced(&self) -> &Signal<AnnouncedInterface> {
        &self.inner.interface_announced
    }

    /// Emitted with the global name for every withdrawn global
    pub fn interface_removed(&self) -> &Signal<u32> {
        &self.inner.interface_removed
    }

    /// Emitted once the globals present at [`setup()`](Registry::setup) time were all announced
    pub fn interfaces_announced(&self) -> &Signal<()> {
        &self.inner.interfaces_announced
    }
}

impl ProtocolObject for Registry {
    type Interface = WlRegistry;

    fn wire_handle(&self) -> &WireHandle<WlRegistry> {
        &self.inner.handle
    }
}

impl Default for Registry {
    fn default() -> Registry {
        Registry::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("handle", &self.inner.handle)
            .field("interfaces", &self.inner.state.lock().unwrap().entries)
            .finish()
    }
}
