use std::{
    ffi::CString,
    fmt,
    sync::{Arc, Mutex},
};

use wayland_backend::{
    protocol::Interface,
    server::{ClientId, GlobalHandler, GlobalId, Handle, ObjectData, ObjectId, WeakHandle},
};
use waybind_commons::{
    protocol::{wl_display, ProtocolInterface},
    Signal,
};

use crate::{Display, RequestHandler, Resource};

type Binder = Box<dyn Fn(&Resource) -> Option<Arc<dyn RequestHandler>> + Send + Sync>;

struct GlobalInner {
    interface: &'static Interface,
    version: u32,
    id: Mutex<Option<GlobalId>>,
    handle: WeakHandle,
    resources: Mutex<Vec<Resource>>,
    binder: Binder,
    about_to_destroy: Signal<()>,
    bound: Signal<Resource>,
    unbound: Signal<Resource>,
}

impl GlobalInner {
    fn forget(&self, resource: &Resource) {
        let removed = {
            let mut resources = self.resources.lock().unwrap();
            let before = resources.len();
            resources.retain(|known| known != resource);
            resources.len() != before
        };
        if removed {
            self.unbound.emit(resource);
        }
    }
}

impl GlobalHandler<()> for GlobalInner {
    fn bind(
        self: Arc<Self>,
        handle: &Handle,
        _: &mut (),
        client_id: ClientId,
        _: GlobalId,
        object_id: ObjectId,
    ) -> Arc<dyn ObjectData<()>> {
        let resource = Resource::new(handle, client_id, object_id);

        {
            let mut resources = self.resources.lock().unwrap();
            if resources.try_reserve(1).is_err() {
                drop(resources);
                crate::log_error!("Out of memory binding {}", self.interface.name);
                handle.post_error(
                    resource.id(),
                    wl_display::ERROR_NO_MEMORY,
                    CString::new("no memory").unwrap_or_default(),
                );
                resource.destroy();
                return resource.object_data();
            }
            resources.push(resource.clone());
        }

        let global = Arc::downgrade(&self);
        resource.on_destroy(move |resource| {
            if let Some(global) = global.upgrade() {
                global.forget(resource);
            }
        });
        if let Some(handler) = (self.binder)(&resource) {
            resource.set_handler(handler);
        }
        self.bound.emit(&resource);
        resource.object_data()
    }
}

/// A global advertised to every client
///
/// Each time a client binds the global, a [`Resource`] is created at the version the client asked
/// for and handed to the binder given at creation, which returns the handler of its requests. The
/// global keeps the list of those resources until they are unbound.
///
/// Dropping the global withdraws it and unbinds every resource bound from it.
pub struct Global {
    inner: Arc<GlobalInner>,
}

impl Global {
    /// Advertise a global of interface `I` at `version`
    ///
    /// # Panics
    ///
    /// If `version` is 0 or higher than the highest version of `I` known to this crate.
    pub fn create<I, F>(display: &Display, version: u32, binder: F) -> Global
    where
        I: ProtocolInterface,
        F: Fn(&Resource) -> Option<Arc<dyn RequestHandler>> + Send + Sync + 'static,
    {
        assert!(
            version >= 1 && version <= I::max_version(),
            "{} version {} is not supported, the highest is {}",
            I::name(),
            version,
            I::max_version()
        );
        let handle = display.handle();
        let inner = Arc::new(GlobalInner {
            interface: I::interface(),
            version,
            id: Mutex::new(None),
            handle: handle.downgrade(),
            resources: Mutex::new(Vec::new()),
            binder: Box::new(binder),
            about_to_destroy: Signal::new(),
            bound: Signal::new(),
            unbound: Signal::new(),
        });
        let id = handle.create_global::<()>(I::interface(), version, inner.clone());
        *inner.id.lock().unwrap() = Some(id);
        Global { inner }
    }

    /// The interface of this global
    pub fn interface(&self) -> &'static Interface {
        self.inner.interface
    }

    /// The advertised version
    pub fn version(&self) -> u32 {
        self.inner.version
    }

    /// Whether the global is still advertised
    pub fn is_valid(&self) -> bool {
        self.inner.id.lock().unwrap().is_some()
    }

    /// The live resources bound from this global
    pub fn resources(&self) -> Vec<Resource> {
        self.inner.resources.lock().unwrap().clone()
    }

    /// The live resources bound by one client
    pub fn resources_for(&self, client: &ClientId) -> Vec<Resource> {
        self.inner
            .resources
            .lock()
            .unwrap()
            .iter()
            .filter(|resource| resource.client_id() == *client)
            .cloned()
            .collect()
    }

    /// Withdraw the global and unbind every resource bound from it
    pub fn destroy(&self) {
        let Some(id) = self.inner.id.lock().unwrap().take() else {
            return;
        };
        self.inner.about_to_destroy.emit(&());
        if let Some(handle) = self.inner.handle.upgrade() {
            handle.remove_global::<()>(id);
        }
        let resources = self.resources();
        for resource in resources {
            resource.destroy();
        }
    }

    /// Emitted by [`destroy()`](Self::destroy), before anything is torn down
    pub fn about_to_destroy(&self) -> &Signal<()> {
        &self.inner.about_to_destroy
    }

    /// Emitted when a client bound the global, once its handler is installed
    pub fn bound(&self) -> &Signal<Resource> {
        &self.inner.bound
    }

    /// Emitted when a resource bound from this global is unbound
    pub fn unbound(&self) -> &Signal<Resource> {
        &self.inner.unbound
    }
}

impl Drop for Global {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for Global {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Global")
            .field("interface", &self.inner.interface.name)
            .field("version", &self.inner.version)
            .field("resources", &self.inner.resources.lock().unwrap().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use waybind_commons::protocol::{WlCompositor, WlOutput};

    use super::*;
    use crate::StartMode;

    #[test]
    fn lifecycle() {
        let mut display = Display::new().unwrap();
        display.start(StartMode::ConnectClientsOnly).unwrap();
        let global = Global::create::<WlCompositor, _>(&display, 4, |_| None);
        let about_to_destroy = global.about_to_destroy().spy();
        assert!(global.is_valid());
        assert_eq!(global.version(), 4);
        assert_eq!(global.interface().name, "wl_compositor");
        assert!(global.resources().is_empty());

        global.destroy();
        global.destroy();
        assert!(!global.is_valid());
        assert_eq!(about_to_destroy.count(), 1);
    }

    #[test]
    #[should_panic]
    fn unsupported_version() {
        let display = Display::new().unwrap();
        let version = WlOutput::max_version() + 1;
        let _global = Global::create::<WlOutput, _>(&display, version, |_| None);
    }
}
