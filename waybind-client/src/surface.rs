use std::{
    fmt,
    sync::{Arc, Mutex, Weak},
};

use wayland_backend::{client::ObjectId, protocol::Argument, smallvec::smallvec};
use waybind_commons::{
    geometry::{Rect, Size},
    protocol::{wl_surface, WlCallback, WlSurface},
    Signal,
};

use crate::{
    event_queue::{Event, EventListener, EventQueue, ListenerRef},
    handle::{ProtocolObject, WireHandle},
    Connection, Region,
};

/// Whether a commit also asks for a frame callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitFlag {
    /// Plain commit
    #[default]
    None,
    /// Request a frame callback, [`Surface::frame_rendered()`] is emitted when it fires
    FrameCallback,
}

struct SurfaceState {
    size: Size,
    scale: i32,
    outputs: Vec<ObjectId>,
    frame_pending: bool,
}

pub(crate) struct SurfaceInner {
    pub(crate) handle: WireHandle<WlSurface>,
    queue: Option<EventQueue>,
    state: Mutex<SurfaceState>,
    frame_rendered: Signal<()>,
    size_changed: Signal<Size>,
    output_entered: Signal<ObjectId>,
    output_left: Signal<ObjectId>,
}

impl EventListener for SurfaceInner {
    fn event(&self, _conn: &Connection, event: Event) {
        match (event.opcode, &event.args[..]) {
            (wl_surface::EVT_ENTER, [Argument::Object(output)]) => {
                self.state.lock().unwrap().outputs.push(output.clone());
                self.output_entered.emit(output);
            }
            (wl_surface::EVT_LEAVE, [Argument::Object(output)]) => {
                self.state.lock().unwrap().outputs.retain(|known| known != output);
                self.output_left.emit(output);
            }
            _ => crate::log_warn!("Unexpected wl_surface event {}", event.opcode),
        }
    }
}

struct FrameCallback {
    surface: Weak<SurfaceInner>,
}

impl EventListener for FrameCallback {
    fn event(&self, _conn: &Connection, _event: Event) {
        if let Some(surface) = self.surface.upgrade() {
            surface.state.lock().unwrap().frame_pending = false;
            surface.frame_rendered.emit(&());
        }
    }
}

/// A `wl_surface`
///
/// Surfaces are created by [`Compositor::create_surface()`](crate::Compositor::create_surface).
/// State set on a surface (regions, damage, scale) only takes effect on the server once
/// [`commit()`](Surface::commit) is called.
#[derive(Clone)]
pub struct Surface {
    pub(crate) inner: Arc<SurfaceInner>,
}

impl Surface {
    /// A surface not yet bound to any object
    pub fn new() -> Surface {
        Surface::with_queue(None)
    }

    pub(crate) fn with_queue(queue: Option<EventQueue>) -> Surface {
        Surface {
            inner: Arc::new(SurfaceInner {
                handle: WireHandle::new(),
                queue,
                state: Mutex::new(SurfaceState {
                    size: Size::default(),
                    scale: 1,
                    outputs: Vec::new(),
                    frame_pending: false,
                }),
                frame_rendered: Signal::new(),
                size_changed: Signal::new(),
                output_entered: Signal::new(),
                output_left: Signal::new(),
            }),
        }
    }

    pub(crate) fn listener(&self) -> ListenerRef {
        ListenerRef::weak(&self.inner)
    }

    /// Bind this front-end to an existing `wl_surface`
    pub fn setup(&self, conn: &Connection, id: ObjectId) {
        self.inner.handle.setup(conn, id.clone());
        conn.attach_listener(&id, self.listener());
    }

    /// Set the input region, `None` accepts input on the whole surface
    pub fn set_input_region(&self, region: Option<&Region>) {
        self.inner
            .handle
            .send_request(wl_surface::REQ_SET_INPUT_REGION, smallvec![region_arg(region)]);
    }

    /// Set the opaque region, `None` means nothing is opaque
    pub fn set_opaque_region(&self, region: Option<&Region>) {
        self.inner
            .handle
            .send_request(wl_surface::REQ_SET_OPAQUE_REGION, smallvec![region_arg(region)]);
    }

    /// Mark an area of the surface as changed
    pub fn damage(&self, rect: Rect) {
        self.inner.handle.send_request(
            wl_surface::REQ_DAMAGE,
            smallvec![
                Argument::Int(rect.x),
                Argument::Int(rect.y),
                Argument::Int(rect.width),
                Argument::Int(rect.height),
            ],
        );
    }

    /// Set the scale of the attached buffers
    ///
    /// Needs a surface of version 3 or later, the request is dropped otherwise.
    pub fn set_scale(&self, scale: i32) {
        if self.inner.handle.version() < 3 {
            crate::log_warn!("wl_surface.set_buffer_scale needs version 3, ignoring");
            return;
        }
        self.inner.state.lock().unwrap().scale = scale;
        let args = smallvec![Argument::Int(scale)];
        self.inner.handle.send_request(wl_surface::REQ_SET_BUFFER_SCALE, args);
    }

    /// Apply the pending state
    pub fn commit(&self, flag: CommitFlag) {
        if flag == CommitFlag::FrameCallback {
            let listener = ListenerRef::Owned(Arc::new(FrameCallback {
                surface: Arc::downgrade(&self.inner),
            }));
            let created = self.inner.handle.send_constructor::<WlCallback>(
                wl_surface::REQ_FRAME,
                smallvec![Argument::NewId(ObjectId::null())],
                self.inner.queue.as_ref(),
                Some(listener),
                None,
            );
            if created.is_some() {
                self.inner.state.lock().unwrap().frame_pending = true;
            }
        }
        self.inner.handle.send_request(wl_surface::REQ_COMMIT, smallvec![]);
    }

    /// Record the size of the surface content
    pub fn set_size(&self, size: Size) {
        let changed = {
            let mut state = self.inner.state.lock().unwrap();
            std::mem::replace(&mut state.size, size) != size
        };
        if changed {
            self.inner.size_changed.emit(&size);
        }
    }

    /// The size recorded with [`set_size()`](Surface::set_size)
    pub fn size(&self) -> Size {
        self.inner.state.lock().unwrap().size
    }

    /// The buffer scale
    pub fn scale(&self) -> i32 {
        self.inner.state.lock().unwrap().scale
    }

    /// The outputs the surface is currently shown on
    pub fn outputs(&self) -> Vec<ObjectId> {
        self.inner.state.lock().unwrap().outputs.clone()
    }

    /// Whether a frame callback was requested and did not fire yet
    pub fn is_frame_pending(&self) -> bool {
        self.inner.state.lock().unwrap().frame_pending
    }

    /// Emitted when the frame callback requested by the last commit fires
    pub fn frame_rendered(&self) -> &Signal<()> {
        &self.inner.frame_rendered
    }

    /// Emitted by [`set_size()`](Surface::set_size) when the size changes
    pub fn size_changed(&self) -> &Signal<Size> {
        &self.inner.size_changed
    }

    /// Emitted when the surface enters an output
    pub fn output_entered(&self) -> &Signal<ObjectId> {
        &self.inner.output_entered
    }

    /// Emitted when the surface leaves an output
    pub fn output_left(&self) -> &Signal<ObjectId> {
        &self.inner.output_left
    }
}

fn region_arg(region: Option<&Region>) -> Argument<ObjectId, std::os::unix::io::RawFd> {
    Argument::Object(region.and_then(|region| region.id()).unwrap_or_else(ObjectId::null))
}

impl ProtocolObject for Surface {
    type Interface = WlSurface;

    fn wire_handle(&self) -> &WireHandle<WlSurface> {
        &self.inner.handle
    }
}

impl Default for Surface {
    fn default() -> Surface {
        Surface::new()
    }
}

impl PartialEq for Surface {
    fn eq(&self, other: &Surface) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("handle", &self.inner.handle)
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}
