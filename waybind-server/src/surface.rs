use std::{
    fmt,
    sync::{Arc, Mutex, Weak},
};

use wayland_backend::{protocol::Argument, server::ObjectId, smallvec::smallvec};
use waybind_commons::{
    geometry::{Rect, RectRegion},
    protocol::{wl_callback, wl_surface},
    Signal,
};

use crate::{compositor::CompositorShared, Request, RequestHandler, Resource};

#[derive(Default)]
struct PendingState {
    // `Some(None)` resets the input region to infinite
    input: Option<Option<RectRegion>>,
    opaque: Option<RectRegion>,
    damage: RectRegion,
    scale: Option<i32>,
    callbacks: Vec<Resource>,
}

struct CurrentState {
    input: Option<RectRegion>,
    opaque: RectRegion,
    damage: RectRegion,
    scale: i32,
    callbacks: Vec<Resource>,
}

struct SurfaceState {
    pending: PendingState,
    current: CurrentState,
}

pub(crate) struct SurfaceInner {
    resource: Resource,
    compositor: Weak<CompositorShared>,
    state: Mutex<SurfaceState>,
    input_changed: Signal<Option<RectRegion>>,
    opaque_changed: Signal<RectRegion>,
    damaged: Signal<RectRegion>,
    scale_changed: Signal<i32>,
    committed: Signal<()>,
    unbound: Signal<()>,
}

impl SurfaceInner {
    // the shape of a region at the time it is set, empty for unknown regions
    fn region_shape(&self, id: &ObjectId) -> RectRegion {
        self.compositor
            .upgrade()
            .and_then(|compositor| compositor.region_for(id))
            .map(|region| region.region())
            .unwrap_or_default()
    }

    fn commit(&self) {
        let (input, opaque, damage, scale) = {
            let mut state = self.state.lock().unwrap();
            let pending = std::mem::take(&mut state.pending);
            let current = &mut state.current;
            if let Some(input) = &pending.input {
                current.input = input.clone();
            }
            if let Some(opaque) = &pending.opaque {
                current.opaque = opaque.clone();
            }
            current.damage = pending.damage.clone();
            let scale = pending.scale.filter(|scale| *scale != current.scale);
            if let Some(scale) = scale {
                current.scale = scale;
            }
            current.callbacks.extend(pending.callbacks);
            let damage = (!pending.damage.is_empty()).then_some(pending.damage);
            (pending.input, pending.opaque, damage, scale)
        };
        if let Some(input) = input {
            self.input_changed.emit(&input);
        }
        if let Some(opaque) = opaque {
            self.opaque_changed.emit(&opaque);
        }
        if let Some(damage) = damage {
            self.damaged.emit(&damage);
        }
        if let Some(scale) = scale {
            self.scale_changed.emit(&scale);
        }
        self.committed.emit(&());
    }
}

impl RequestHandler for SurfaceInner {
    fn request(&self, resource: &Resource, request: Request) -> Option<Resource> {
        match (request.opcode, &request.args[..]) {
            (wl_surface::REQ_DESTROY, []) => {}
            (
                wl_surface::REQ_DAMAGE | wl_surface::REQ_DAMAGE_BUFFER,
                [Argument::Int(x), Argument::Int(y), Argument::Int(width), Argument::Int(height)],
            ) => {
                self.state.lock().unwrap().pending.damage.add(Rect::new(*x, *y, *width, *height));
            }
            (wl_surface::REQ_FRAME, [Argument::NewId(id)]) => {
                let callback = resource.new_child(id.clone())?;
                self.state.lock().unwrap().pending.callbacks.push(callback.clone());
                return Some(callback);
            }
            (wl_surface::REQ_SET_OPAQUE_REGION, [Argument::Object(id)]) => {
                let opaque = if id.is_null() { RectRegion::new() } else { self.region_shape(id) };
                self.state.lock().unwrap().pending.opaque = Some(opaque);
            }
            (wl_surface::REQ_SET_INPUT_REGION, [Argument::Object(id)]) => {
                let input = if id.is_null() { None } else { Some(self.region_shape(id)) };
                self.state.lock().unwrap().pending.input = Some(input);
            }
            (wl_surface::REQ_COMMIT, []) => self.commit(),
            (wl_surface::REQ_SET_BUFFER_SCALE, [Argument::Int(scale)]) => {
                if *scale < 1 {
                    resource.post_error(
                        wl_surface::ERROR_INVALID_SCALE,
                        format!("buffer scale must be at least 1, got {}", scale),
                    );
                } else {
                    self.state.lock().unwrap().pending.scale = Some(*scale);
                }
            }
            (wl_surface::REQ_ATTACH | wl_surface::REQ_SET_BUFFER_TRANSFORM, _) => {
                crate::log_debug!("Ignoring wl_surface request {}", request.opcode);
            }
            _ => crate::log_warn!("Unexpected wl_surface request {}", request.opcode),
        }
        None
    }

    fn unbound(&self, _: &Resource) {
        self.unbound.emit(&());
    }
}

/// The server side of a `wl_surface`
///
/// Surface state is double-buffered: what the client sets is pending until it commits. Each
/// change signal fires on commit, and only for the state the client set since the previous
/// commit. `scale_changed` additionally requires the scale to differ from the current one.
#[derive(Clone)]
pub struct SurfaceInterface {
    inner: Arc<SurfaceInner>,
}

impl SurfaceInterface {
    pub(crate) fn create(
        resource: Resource,
        compositor: Weak<CompositorShared>,
    ) -> SurfaceInterface {
        let inner = Arc::new(SurfaceInner {
            resource: resource.clone(),
            compositor,
            state: Mutex::new(SurfaceState {
                pending: PendingState::default(),
                current: CurrentState {
                    input: None,
                    opaque: RectRegion::new(),
                    damage: RectRegion::new(),
                    scale: 1,
                    callbacks: Vec::new(),
                },
            }),
            input_changed: Signal::new(),
            opaque_changed: Signal::new(),
            damaged: Signal::new(),
            scale_changed: Signal::new(),
            committed: Signal::new(),
            unbound: Signal::new(),
        });
        resource.set_handler(inner.clone());
        SurfaceInterface { inner }
    }

    /// The resource of this surface
    pub fn resource(&self) -> &Resource {
        &self.inner.resource
    }

    /// The committed input region, empty when it is infinite
    pub fn input(&self) -> RectRegion {
        self.inner.state.lock().unwrap().current.input.clone().unwrap_or_default()
    }

    /// Whether the committed input region covers the whole surface
    pub fn input_is_infinite(&self) -> bool {
        self.inner.state.lock().unwrap().current.input.is_none()
    }

    /// The committed opaque region
    pub fn opaque(&self) -> RectRegion {
        self.inner.state.lock().unwrap().current.opaque.clone()
    }

    /// The damage of the last commit
    pub fn damage(&self) -> RectRegion {
        self.inner.state.lock().unwrap().current.damage.clone()
    }

    /// The committed buffer scale
    pub fn scale(&self) -> i32 {
        self.inner.state.lock().unwrap().current.scale
    }

    /// Answer the frame callbacks committed so far
    pub fn frame_rendered(&self, time: u32) {
        let callbacks = std::mem::take(&mut self.inner.state.lock().unwrap().current.callbacks);
        for callback in callbacks {
            callback.send_event(wl_callback::EVT_DONE, smallvec![Argument::Uint(time)]);
        }
    }

    /// Emitted on commit when the input region was set, `None` meaning infinite
    pub fn input_changed(&self) -> &Signal<Option<RectRegion>> {
        &self.inner.input_changed
    }

    /// Emitted on commit when the opaque region was set
    pub fn opaque_changed(&self) -> &Signal<RectRegion> {
        &self.inner.opaque_changed
    }

    /// Emitted on commit with the damage accumulated since the previous commit
    pub fn damaged(&self) -> &Signal<RectRegion> {
        &self.inner.damaged
    }

    /// Emitted on commit when the buffer scale changed
    pub fn scale_changed(&self) -> &Signal<i32> {
        &self.inner.scale_changed
    }

    /// Emitted after every commit, once the other signals were emitted
    pub fn committed(&self) -> &Signal<()> {
        &self.inner.committed
    }

    /// Emitted when the client destroyed the surface
    pub fn unbound(&self) -> &Signal<()> {
        &self.inner.unbound
    }
}

impl PartialEq for SurfaceInterface {
    fn eq(&self, other: &SurfaceInterface) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for SurfaceInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceInterface")
            .field("resource", &self.inner.resource)
            .field("scale", &self.scale())
            .finish_non_exhaustive()
    }
}
