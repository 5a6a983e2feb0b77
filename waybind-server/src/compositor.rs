use std::{
    fmt,
    sync::{Arc, Mutex},
};

use wayland_backend::{protocol::Argument, server::ObjectId};
use waybind_commons::{
    protocol::{wl_compositor, WlCompositor},
    Signal,
};

use crate::{
    Display, Global, RegionInterface, Request, RequestHandler, Resource, SurfaceInterface,
};

#[derive(Default)]
pub(crate) struct CompositorShared {
    surfaces: Mutex<Vec<SurfaceInterface>>,
    regions: Mutex<Vec<RegionInterface>>,
    surface_created: Signal<SurfaceInterface>,
    region_created: Signal<RegionInterface>,
}

impl CompositorShared {
    pub(crate) fn region_for(&self, id: &ObjectId) -> Option<RegionInterface> {
        let regions = self.regions.lock().unwrap();
        regions.iter().find(|region| region.resource().id() == *id).cloned()
    }
}

struct CompositorHandler {
    shared: Arc<CompositorShared>,
}

impl CompositorHandler {
    fn create_surface(&self, resource: Resource) -> Resource {
        let surface = SurfaceInterface::create(resource.clone(), Arc::downgrade(&self.shared));
        let shared = Arc::downgrade(&self.shared);
        let created = surface.clone();
        resource.on_destroy(move |_| {
            if let Some(shared) = shared.upgrade() {
                shared.surfaces.lock().unwrap().retain(|surface| *surface != created);
            }
        });
        self.shared.surfaces.lock().unwrap().push(surface.clone());
        self.shared.surface_created.emit(&surface);
        resource
    }

    fn create_region(&self, resource: Resource) -> Resource {
        let region = RegionInterface::create(resource.clone());
        let shared = Arc::downgrade(&self.shared);
        let created = region.clone();
        resource.on_destroy(move |_| {
            if let Some(shared) = shared.upgrade() {
                shared.regions.lock().unwrap().retain(|region| *region != created);
            }
        });
        self.shared.regions.lock().unwrap().push(region.clone());
        self.shared.region_created.emit(&region);
        resource
    }
}

impl RequestHandler for CompositorHandler {
    fn request(&self, resource: &Resource, request: Request) -> Option<Resource> {
        match (request.opcode, &request.args[..]) {
            (wl_compositor::REQ_CREATE_SURFACE, [Argument::NewId(id)]) => {
                Some(self.create_surface(resource.new_child(id.clone())?))
            }
            (wl_compositor::REQ_CREATE_REGION, [Argument::NewId(id)]) => {
                Some(self.create_region(resource.new_child(id.clone())?))
            }
            _ => {
                crate::log_warn!("Unexpected wl_compositor request {}", request.opcode);
                None
            }
        }
    }
}

/// The `wl_compositor` global
///
/// Creates a [`SurfaceInterface`] or a [`RegionInterface`] for every `create_surface` or
/// `create_region` request and keeps them until the client destroys them.
pub struct CompositorInterface {
    global: Global,
    shared: Arc<CompositorShared>,
}

impl CompositorInterface {
    /// Highest `wl_compositor` version supported
    pub const VERSION: u32 = 4;

    /// Advertise a `wl_compositor` on `display`
    pub fn new(display: &Display) -> CompositorInterface {
        let shared = Arc::new(CompositorShared::default());
        let handler = Arc::new(CompositorHandler { shared: shared.clone() });
        let global = Global::create::<WlCompositor, _>(display, Self::VERSION, move |_| {
            Some(handler.clone() as Arc<dyn RequestHandler>)
        });
        CompositorInterface { global, shared }
    }

    /// The global advertised for this compositor
    pub fn global(&self) -> &Global {
        &self.global
    }

    /// The live surfaces
    pub fn surfaces(&self) -> Vec<SurfaceInterface> {
        self.shared.surfaces.lock().unwrap().clone()
    }

    /// The live regions
    pub fn regions(&self) -> Vec<RegionInterface> {
        self.shared.regions.lock().unwrap().clone()
    }

    /// The live surface of the given object
    pub fn surface_for(&self, id: &ObjectId) -> Option<SurfaceInterface> {
        let surfaces = self.shared.surfaces.lock().unwrap();
        surfaces.iter().find(|surface| surface.resource().id() == *id).cloned()
    }

    /// The live region of the given object
    pub fn region_for(&self, id: &ObjectId) -> Option<RegionInterface> {
        self.shared.region_for(id)
    }

    /// Emitted when a client created a surface
    pub fn surface_created(&self) -> &Signal<SurfaceInterface> {
        &self.shared.surface_created
    }

    /// Emitted when a client created a region
    pub fn region_created(&self) -> &Signal<RegionInterface> {
        &self.shared.region_created
    }
}

impl fmt::Debug for CompositorInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositorInterface")
            .field("global", &self.global)
            .field("surfaces", &self.shared.surfaces.lock().unwrap().len())
            .field("regions", &self.shared.regions.lock().unwrap().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StartMode;

    #[test]
    fn advertised_at_highest_version() {
        let mut display = Display::new().unwrap();
        display.start(StartMode::ConnectClientsOnly).unwrap();
        let compositor = CompositorInterface::new(&display);
        assert_eq!(compositor.global().version(), CompositorInterface::VERSION);
        assert_eq!(compositor.global().interface().name, "wl_compositor");
        assert!(compositor.surfaces().is_empty());
        assert!(compositor.regions().is_empty());
    }
}
