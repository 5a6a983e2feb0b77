use std::{
    fmt,
    sync::{Arc, Mutex},
};

use wayland_backend::{protocol::Argument, smallvec::smallvec};
use waybind_commons::{
    geometry::{Rect, RectRegion},
    protocol::{wl_region, WlRegion},
};

use crate::{
    handle::{ProtocolObject, WireHandle},
    Connection,
};

pub(crate) struct RegionInner {
    pub(crate) handle: WireHandle<WlRegion>,
    shape: Mutex<RectRegion>,
}

/// A `wl_region`
///
/// Regions are created by [`Compositor::create_region()`](crate::Compositor::create_region). The
/// shape sent so far is mirrored locally and available through [`region()`](Region::region).
#[derive(Clone)]
pub struct Region {
    pub(crate) inner: Arc<RegionInner>,
}

impl Region {
    /// A region not yet bound to any object
    pub fn new() -> Region {
        let inner = RegionInner { handle: WireHandle::new(), shape: Mutex::default() };
        Region { inner: Arc::new(inner) }
    }

    /// Bind this front-end to an existing `wl_region`
    pub fn setup(&self, conn: &Connection, id: wayland_backend::client::ObjectId) {
        self.inner.handle.setup(conn, id);
    }

    /// Add a rectangle to the region
    pub fn add(&self, rect: Rect) {
        self.inner.shape.lock().unwrap().add(rect);
        self.inner.handle.send_request(wl_region::REQ_ADD, rect_args(rect));
    }

    /// Remove a rectangle from the region
    pub fn subtract(&self, rect: Rect) {
        self.inner.shape.lock().unwrap().subtract(rect);
        self.inner.handle.send_request(wl_region::REQ_SUBTRACT, rect_args(rect));
    }

    /// Add every rectangle of `region`
    pub fn add_region(&self, region: &RectRegion) {
        for rect in region.rects() {
            self.add(*rect);
        }
    }

    /// The shape sent to the server so far
    pub fn region(&self) -> RectRegion {
        self.inner.shape.lock().unwrap().clone()
    }
}

fn rect_args(rect: Rect) -> crate::Args {
    smallvec![
        Argument::Int(rect.x),
        Argument::Int(rect.y),
        Argument::Int(rect.width),
        Argument::Int(rect.height),
    ]
}

impl ProtocolObject for Region {
    type Interface = WlRegion;

    fn wire_handle(&self) -> &WireHandle<WlRegion> {
        &self.inner.handle
    }
}

impl Default for Region {
    fn default() -> Region {
        Region::new()
    }
}

impl PartialEq for Region {
    fn eq(&self, other: &Region) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("handle", &self.inner.handle)
            .field("region", &*self.inner.shape.lock().unwrap())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_shape_follows_requests() {
        let region = Region::new();
        region.add(Rect::new(0, 0, 10, 10));
        region.add_region(&RectRegion::from(Rect::new(10, 0, 10, 10)));
        region.subtract(Rect::new(0, 0, 20, 5));
        assert_eq!(region.region(), RectRegion::from(Rect::new(0, 5, 20, 5)));
        assert!(!region.is_valid());
    }
}
