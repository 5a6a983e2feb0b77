use std::{
    fmt,
    sync::{Arc, Mutex},
};

use wayland_backend::protocol::Argument;
use waybind_commons::{
    geometry::{Rect, RectRegion},
    protocol::wl_region,
    Signal,
};

use crate::{Request, RequestHandler, Resource};

pub(crate) struct RegionInner {
    resource: Resource,
    region: Mutex<RectRegion>,
    region_changed: Signal<RectRegion>,
    unbound: Signal<()>,
}

impl RequestHandler for RegionInner {
    fn request(&self, _: &Resource, request: Request) -> Option<Resource> {
        let rect = match &request.args[..] {
            [Argument::Int(x), Argument::Int(y), Argument::Int(width), Argument::Int(height)] => {
                Rect::new(*x, *y, *width, *height)
            }
            _ => return None,
        };
        let region = {
            let mut region = self.region.lock().unwrap();
            match request.opcode {
                wl_region::REQ_ADD => region.add(rect),
                wl_region::REQ_SUBTRACT => region.subtract(rect),
                _ => return None,
            }
            region.clone()
        };
        self.region_changed.emit(&region);
        None
    }

    fn unbound(&self, _: &Resource) {
        self.unbound.emit(&());
    }
}

/// The server side of a `wl_region`
#[derive(Clone)]
pub struct RegionInterface {
    inner: Arc<RegionInner>,
}

impl RegionInterface {
    pub(crate) fn create(resource: Resource) -> RegionInterface {
        let inner = Arc::new(RegionInner {
            resource: resource.clone(),
            region: Mutex::default(),
            region_changed: Signal::new(),
            unbound: Signal::new(),
        });
        resource.set_handler(inner.clone());
        RegionInterface { inner }
    }

    /// The resource of this region
    pub fn resource(&self) -> &Resource {
        &self.inner.resource
    }

    /// The current shape
    pub fn region(&self) -> RectRegion {
        self.inner.region.lock().unwrap().clone()
    }

    /// Emitted with the new shape after every `add` or `subtract`
    pub fn region_changed(&self) -> &Signal<RectRegion> {
        &self.inner.region_changed
    }

    /// Emitted when the client destroyed the region
    pub fn unbound(&self) -> &Signal<()> {
        &self.inner.unbound
    }
}

impl PartialEq for RegionInterface {
    fn eq(&self, other: &RegionInterface) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for RegionInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionInterface")
            .field("resource", &self.inner.resource)
            .field("region", &self.region())
            .finish()
    }
}
