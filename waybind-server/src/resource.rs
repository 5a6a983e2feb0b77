use std::{
    ffi::CString,
    fmt,
    os::unix::io::OwnedFd,
    sync::{Arc, Mutex},
};

use wayland_backend::{
    protocol::{Argument, Message},
    server::{ClientId, Handle, ObjectData, ObjectId, WeakHandle},
};

use crate::{client::ClientState, Args, ClientConnection};

/// A request received on a [`Resource`]
pub type Request = Message<ObjectId, OwnedFd>;

/// The implementation of the requests of a resource
pub trait RequestHandler: Send + Sync + 'static {
    /// A request was received on `resource`
    ///
    /// If the request creates an object, the returned resource is used for it. Returning `None`
    /// for such a request leaves the new object without a handler, every request on it is then
    /// ignored.
    fn request(&self, resource: &Resource, request: Request) -> Option<Resource>;

    /// `resource` is gone, no event can be sent on it anymore
    fn unbound(&self, _resource: &Resource) {}
}

type DestroyListener = Box<dyn FnOnce(&Resource) + Send>;

struct ResourceState {
    alive: bool,
    on_destroy: Vec<DestroyListener>,
}

pub(crate) struct ResourceInner {
    id: ObjectId,
    client: ClientId,
    version: u32,
    handle: WeakHandle,
    handler: Mutex<Option<Arc<dyn RequestHandler>>>,
    state: Mutex<ResourceState>,
}

/// A protocol object owned by one client
///
/// Resources are created by [`Global`](crate::Global) when a client binds it, and by request
/// handlers for the objects created by requests. A resource is alive until it is unbound, which
/// happens exactly once: when the client destroys the object or disconnects, when its global is
/// destroyed, or when [`destroy()`](Resource::destroy) is called. Once unbound it ignores
/// everything.
#[derive(Clone)]
pub struct Resource {
    inner: Arc<ResourceInner>,
}

impl Resource {
    pub(crate) fn new(handle: &Handle, client: ClientId, id: ObjectId) -> Resource {
        let version = handle.object_info(id.clone()).map(|info| info.version).unwrap_or(1);
        Resource {
            inner: Arc::new(ResourceInner {
                id,
                client,
                version,
                handle: handle.downgrade(),
                handler: Mutex::new(None),
                state: Mutex::new(ResourceState { alive: true, on_destroy: Vec::new() }),
            }),
        }
    }

    /// The resource of an object created by a request on this one
    pub fn new_child(&self, id: ObjectId) -> Option<Resource> {
        let handle = self.inner.handle.upgrade()?;
        Some(Resource::new(&handle, self.inner.client.clone(), id))
    }

    pub(crate) fn object_data(&self) -> Arc<dyn ObjectData<()>> {
        Arc::new(ResourceData { resource: self.clone() })
    }

    /// Install the request handler
    pub fn set_handler(&self, handler: Arc<dyn RequestHandler>) {
        if self.is_alive() {
            *self.inner.handler.lock().unwrap() = Some(handler);
        }
    }

    fn handler(&self) -> Option<Arc<dyn RequestHandler>> {
        self.inner.handler.lock().unwrap().clone()
    }

    /// The protocol object
    pub fn id(&self) -> ObjectId {
        self.inner.id.clone()
    }

    /// The client owning this resource
    pub fn client_id(&self) -> ClientId {
        self.inner.client.clone()
    }

    /// The connection of the client owning this resource
    pub fn client(&self) -> Option<ClientConnection> {
        let handle = self.inner.handle.upgrade()?;
        let data = handle.get_client_data(self.inner.client.clone()).ok()?;
        let state = data.downcast_arc::<ClientState>().ok()?;
        Some(ClientConnection::from_state(state))
    }

    /// The version negotiated with the client
    pub fn version(&self) -> u32 {
        self.inner.version
    }

    /// Whether the resource was not unbound yet
    pub fn is_alive(&self) -> bool {
        self.inner.state.lock().unwrap().alive
    }

    /// Send an event, dropped if the resource is not alive
    pub fn send_event(&self, opcode: u16, args: Args) {
        if !self.is_alive() {
            crate::log_debug!("Dropping event {} on unbound {}", opcode, self.inner.id);
            return;
        }
        let Some(handle) = self.inner.handle.upgrade() else {
            return;
        };
        if handle.send_event(Message { sender_id: self.inner.id.clone(), opcode, args }).is_err() {
            crate::log_debug!("Event {} sent to dead {}", opcode, self.inner.id);
        }
    }

    /// Send a protocol error to the client, which gets disconnected
    pub fn post_error(&self, code: u32, message: impl Into<String>) {
        let Some(handle) = self.inner.handle.upgrade() else {
            return;
        };
        let message = CString::new(message.into()).unwrap_or_default();
        handle.post_error(self.inner.id.clone(), code, message);
    }

    /// Unbind the resource without telling the client
    ///
    /// The object stays allocated in the client until it destroys it, its requests are ignored
    /// from now on.
    pub fn destroy(&self) {
        self.unbind();
    }

    /// Run `listener` when the resource is unbound
    ///
    /// If it already is, `listener` runs immediately.
    pub fn on_destroy<F: FnOnce(&Resource) + Send + 'static>(&self, listener: F) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.alive {
                state.on_destroy.push(Box::new(listener));
                return;
            }
        }
        listener(self);
    }

    /// The single place a resource goes from alive to unbound
    ///
    /// Returns `false` if it was already unbound.
    pub(crate) fn unbind(&self) -> bool {
        let listeners = {
            let mut state = self.inner.state.lock().unwrap();
            if !state.alive {
                return false;
            }
            state.alive = false;
            std::mem::take(&mut state.on_destroy)
        };
        let handler = self.inner.handler.lock().unwrap().take();
        if let Some(handler) = handler {
            handler.unbound(self);
        }
        for listener in listeners {
            listener(self);
        }
        true
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Resource) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Resource {}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &format_args!("{}", self.inner.id))
            .field("version", &self.inner.version)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// The object data the backend holds for every resource
struct ResourceData {
    resource: Resource,
}

impl ObjectData<()> for ResourceData {
    fn request(
        self: Arc<Self>,
        handle: &Handle,
        _: &mut (),
        client_id: ClientId,
        msg: Request,
    ) -> Option<Arc<dyn ObjectData<()>>> {
        let new_id = msg.args.iter().find_map(|arg| match arg {
            Argument::NewId(id) => Some(id.clone()),
            _ => None,
        });
        let child = match self.resource.handler() {
            Some(handler) if self.resource.is_alive() => handler.request(&self.resource, msg),
            _ => None,
        };
        let new_id = new_id?;
        let child = child.unwrap_or_else(|| Resource::new(handle, client_id, new_id));
        Some(child.object_data())
    }

    fn destroyed(self: Arc<Self>, _: &Handle, _: &mut (), _: ClientId, _: ObjectId) {
        self.resource.unbind();
    }
}
