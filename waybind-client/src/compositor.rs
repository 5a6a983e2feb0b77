use std::{
    fmt,
    sync::{Arc, Mutex, Weak},
};

use wayland_backend::{client::ObjectId, protocol::Argument, smallvec::smallvec};
use waybind_commons::{
    geometry::RectRegion,
    protocol::{wl_compositor, WlCompositor},
    Signal,
};

use crate::{
    event_queue::{Event, EventListener, EventQueue, ListenerRef},
    handle::{ProtocolObject, WireHandle},
    region::RegionInner,
    surface::SurfaceInner,
    Connection, Region, Surface,
};

struct CompositorInner {
    handle: WireHandle<WlCompositor>,
    queue: Mutex<Option<EventQueue>>,
    surfaces: Mutex<Vec<Weak<SurfaceInner>>>,
    regions: Mutex<Vec<Weak<RegionInner>>>,
    removed: Signal<()>,
}

impl EventListener for CompositorInner {
    fn event(&self, _conn: &Connection, event: Event) {
        crate::log_warn!("Unexpected wl_compositor event {}", event.opcode);
    }
}

/// A `wl_compositor`, the factory of surfaces and regions
///
/// The compositor keeps track of the surfaces and regions it created. Releasing or destroying it
/// releases or destroys them too, children first.
#[derive(Clone)]
pub struct Compositor {
    inner: Arc<CompositorInner>,
}

impl Compositor {
    /// A compositor not yet bound to any object
    pub fn new() -> Compositor {
        Compositor {
            inner: Arc::new(CompositorInner {
                handle: WireHandle::new(),
                queue: Mutex::new(None),
                surfaces: Mutex::default(),
                regions: Mutex::default(),
                removed: Signal::new(),
            }),
        }
    }

    /// Bind this front-end to an existing `wl_compositor`
    pub fn setup(&self, conn: &Connection, id: ObjectId) {
        self.inner.handle.setup(conn, id.clone());
        conn.attach_listener(&id, ListenerRef::weak(&self.inner));
    }

    /// The queue new surfaces and regions are assigned to
    pub fn event_queue(&self) -> Option<EventQueue> {
        self.inner.queue.lock().unwrap().clone()
    }

    /// Assign the surfaces and regions created from now on to `queue`
    pub fn set_event_queue(&self, queue: &EventQueue) {
        *self.inner.queue.lock().unwrap() = Some(queue.clone());
    }

    /// Create a surface
    ///
    /// The returned surface is not valid if the compositor is not.
    pub fn create_surface(&self) -> Surface {
        let queue = self.event_queue();
        let surface = Surface::with_queue(queue.clone());
        let created = self.inner.handle.create_child(
            &surface.inner.handle,
            wl_compositor::REQ_CREATE_SURFACE,
            smallvec![Argument::NewId(ObjectId::null())],
            queue.as_ref(),
            Some(surface.listener()),
            None,
        );
        if created {
            let mut surfaces = self.inner.surfaces.lock().unwrap();
            surfaces.retain(|surface| surface.strong_count() > 0);
            surfaces.push(Arc::downgrade(&surface.inner));
        }
        surface
    }

    /// Create a region, initialized with `region` if given
    ///
    /// The returned region is not valid if the compositor is not.
    pub fn create_region(&self, region: Option<&RectRegion>) -> Region {
        let created = Region::new();
        let queue = self.event_queue();
        let ok = self.inner.handle.create_child(
            &created.inner.handle,
            wl_compositor::REQ_CREATE_REGION,
            smallvec![Argument::NewId(ObjectId::null())],
            queue.as_ref(),
            None,
            None,
        );
        if ok {
            let mut regions = self.inner.regions.lock().unwrap();
            regions.retain(|region| region.strong_count() > 0);
            regions.push(Arc::downgrade(&created.inner));
            drop(regions);
            if let Some(region) = region {
                created.add_region(region);
            }
        }
        created
    }

    /// The live surface created by this compositor for the given object
    pub fn surface_for(&self, id: &ObjectId) -> Option<Surface> {
        self.inner
            .surfaces
            .lock()
            .unwrap()
            .iter()
            .filter_map(Weak::upgrade)
            .find(|inner| inner.handle.id().as_ref() == Some(id))
            .map(|inner| Surface { inner })
    }

    /// The live surfaces created by this compositor
    pub fn surfaces(&self) -> Vec<Surface> {
        self.inner
            .surfaces
            .lock()
            .unwrap()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|inner| inner.handle.is_valid())
            .map(|inner| Surface { inner })
            .collect()
    }

    /// Emitted when the global this compositor was bound from is withdrawn
    pub fn removed(&self) -> &Signal<()> {
        &self.inner.removed
    }

    fn children(&self) -> (Vec<Arc<SurfaceInner>>, Vec<Arc<RegionInner>>) {
        let surfaces = std::mem::take(&mut *self.inner.surfaces.lock().unwrap());
        let regions = std::mem::take(&mut *self.inner.regions.lock().unwrap());
        (
            surfaces.iter().filter_map(Weak::upgrade).collect(),
            regions.iter().filter_map(Weak::upgrade).collect(),
        )
    }
}

impl ProtocolObject for Compositor {
    type Interface = WlCompositor;

    fn wire_handle(&self) -> &WireHandle<WlCompositor> {
        &self.inner.handle
    }

    fn release(&self) {
        let (surfaces, regions) = self.children();
        for surface in surfaces {
            surface.handle.release();
        }
        for region in regions {
            region.handle.release();
        }
        self.inner.handle.release();
    }

    fn destroy(&self) {
        let (surfaces, regions) = self.children();
        for surface in surfaces {
            surface.handle.destroy();
        }
        for region in regions {
            region.handle.destroy();
        }
        self.inner.handle.destroy();
    }
}

impl Default for Compositor {
    fn default() -> Compositor {
        Compositor::new()
    }
}

impl fmt::Debug for Compositor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compositor")
            .field("handle", &self.inner.handle)
            .field("surfaces", &self.inner.surfaces.lock().unwrap().len())
            .finish_non_exhaustive()
    }
}
