use std::{
    fmt,
    marker::PhantomData,
    sync::{Arc, Mutex},
};

use wayland_backend::{
    client::{InvalidId, ObjectId},
    protocol::{same_interface, Message},
};
use waybind_commons::protocol::ProtocolInterface;

use crate::{
    conn::WeakConnection,
    event_queue::{EventQueue, ListenerRef},
    Args, Connection,
};

pub(crate) struct Bound {
    id: ObjectId,
    conn: WeakConnection,
}

/// The binding state of a handle, shared with the connection tracking it
#[derive(Default)]
pub(crate) struct HandleSlot {
    bound: Mutex<Option<Bound>>,
}

impl HandleSlot {
    /// Forget the object without any wire traffic
    pub(crate) fn unbind(&self) -> Option<ObjectId> {
        self.take().map(|bound| bound.id)
    }

    fn take(&self) -> Option<Bound> {
        self.bound.lock().unwrap().take()
    }

    fn target(&self) -> Option<(ObjectId, Connection)> {
        let guard = self.bound.lock().unwrap();
        let bound = guard.as_ref()?;
        Some((bound.id.clone(), bound.conn.upgrade()?))
    }
}

/// Owner of a single protocol object
///
/// A handle is either empty or bound to one live object of interface `I`. It starts empty, gets
/// bound with [`setup()`](WireHandle::setup), and becomes empty again when it is released,
/// destroyed, or when its connection dies. Once empty it stays empty until set up again.
///
/// Dropping a bound handle releases it.
pub struct WireHandle<I: ProtocolInterface> {
    slot: Arc<HandleSlot>,
    _interface: PhantomData<fn() -> I>,
}

impl<I: ProtocolInterface> WireHandle<I> {
    /// An empty handle
    pub fn new() -> WireHandle<I> {
        WireHandle { slot: Arc::new(HandleSlot::default()), _interface: PhantomData }
    }

    /// Bind this handle to an object
    ///
    /// The handle is registered on `conn`, so that it gets emptied if the connection dies.
    ///
    /// # Panics
    ///
    /// If `id` is null, is not an object of interface `I`, or if the handle is already bound.
    pub fn setup(&self, conn: &Connection, id: ObjectId) {
        assert!(!id.is_null(), "Cannot set up a {} handle with a null object", I::name());
        assert!(
            same_interface(id.interface(), I::interface()),
            "Object {} is not a {}",
            id,
            I::name()
        );
        let mut bound = self.slot.bound.lock().unwrap();
        assert!(bound.is_none(), "This {} handle is already set up", I::name());
        *bound = Some(Bound { id, conn: conn.downgrade() });
        drop(bound);
        conn.track(&self.slot);
    }

    /// Whether the handle is bound to an object
    pub fn is_valid(&self) -> bool {
        self.slot.bound.lock().unwrap().is_some()
    }

    /// The object this handle is bound to
    pub fn id(&self) -> Option<ObjectId> {
        self.slot.bound.lock().unwrap().as_ref().map(|bound| bound.id.clone())
    }

    /// The connection of the bound object
    pub fn connection(&self) -> Option<Connection> {
        self.slot.bound.lock().unwrap().as_ref().and_then(|bound| bound.conn.upgrade())
    }

    /// Version of the bound object, 0 if the handle is empty
    pub fn version(&self) -> u32 {
        self.slot.target().and_then(|(id, conn)| conn.object_version(&id)).unwrap_or(0)
    }

    /// Release the object and empty the handle
    ///
    /// The destructor request of the interface is sent if it has one and the connection is still
    /// alive. Releasing an empty handle does nothing.
    pub fn release(&self) {
        let Some(Bound { id, conn }) = self.slot.take() else {
            return;
        };
        let Some(conn) = conn.upgrade().filter(Connection::is_alive) else {
            return;
        };
        let result = match I::destructor() {
            Some(opcode) => {
                let msg = Message { sender_id: id.clone(), opcode, args: Args::new() };
                conn.send_request(msg, None, None).map(drop)
            }
            None => conn.destroy_object(&id),
        };
        if let Err(InvalidId) = result {
            crate::log_debug!("{} was already destroyed when released", id);
        }
    }

    /// Empty the handle without telling the server
    ///
    /// This is what happens to every handle of a connection that died. On a live connection the
    /// object is forgotten locally, the server still considers it alive.
    pub fn destroy(&self) {
        let Some(Bound { id, conn }) = self.slot.take() else {
            return;
        };
        if let Some(conn) = conn.upgrade().filter(Connection::is_alive) {
            let _ = conn.destroy_object(&id);
        }
    }

    /// Send a request on the bound object
    ///
    /// Sending a request on an empty handle is a programming error: it is reported and the request
    /// is dropped.
    pub fn send_request(&self, opcode: u16, args: Args) {
        let Some((id, conn)) = self.slot.target() else {
            crate::log_warn!("Request {} sent on an empty {} handle, ignoring", opcode, I::name());
            return;
        };
        if let Err(InvalidId) =
            conn.send_request(Message { sender_id: id.clone(), opcode, args }, None, None)
        {
            crate::log_warn!("Request {} sent on {} which no longer exists", opcode, id);
        }
    }

    /// Send a request creating a new object
    ///
    /// The new object is assigned to `queue`, or the default queue of the connection, and its
    /// events are routed to `listener`. `version` must be given for requests whose new object has
    /// no interface in the protocol description (`wl_registry.bind`).
    pub(crate) fn send_constructor<C: ProtocolInterface>(
        &self,
        opcode: u16,
        args: Args,
        queue: Option<&EventQueue>,
        listener: Option<ListenerRef>,
        version: Option<u32>,
    ) -> Option<(Connection, ObjectId)> {
        let Some((id, conn)) = self.slot.target() else {
            crate::log_warn!("Cannot create a {} from an empty {} handle", C::name(), I::name());
            return None;
        };
        let data = match queue {
            Some(queue) => queue.proxy_data(listener),
            None => conn.default_queue().proxy_data(listener),
        };
        match conn.send_request(
            Message { sender_id: id, opcode, args },
            Some(data),
            version.map(|version| (C::interface(), version)),
        ) {
            Ok(child) => Some((conn, child)),
            Err(InvalidId) => {
                crate::log_warn!(
                    "Failed to create a {}: the parent {} is gone",
                    C::name(),
                    I::name()
                );
                None
            }
        }
    }

    /// Create a new object and bind `child` to it
    pub(crate) fn create_child<C: ProtocolInterface>(
        &self,
        child: &WireHandle<C>,
        opcode: u16,
        args: Args,
        queue: Option<&EventQueue>,
        listener: Option<ListenerRef>,
        version: Option<u32>,
    ) -> bool {
        match self.send_constructor::<C>(opcode, args, queue, listener, version) {
            Some((conn, id)) => {
                child.setup(&conn, id);
                true
            }
            None => false,
        }
    }
}

impl<I: ProtocolInterface> Default for WireHandle<I> {
    fn default() -> WireHandle<I> {
        WireHandle::new()
    }
}

impl<I: ProtocolInterface> Drop for WireHandle<I> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<I: ProtocolInterface> fmt::Debug for WireHandle<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id() {
            Some(id) => write!(f, "WireHandle({id})"),
            None => write!(f, "WireHandle({}, empty)", I::name()),
        }
    }
}

/// Common operations of the front-end objects
pub trait ProtocolObject {
    /// The protocol interface of the wrapped object
    type Interface: ProtocolInterface;

    /// The handle owning the wrapped object
    fn wire_handle(&self) -> &WireHandle<Self::Interface>;

    /// Whether the front-end is bound to a live object
    fn is_valid(&self) -> bool {
        self.wire_handle().is_valid()
    }

    /// The wrapped object
    fn id(&self) -> Option<ObjectId> {
        self.wire_handle().id()
    }

    /// Version of the wrapped object, 0 if unbound
    fn version(&self) -> u32 {
        self.wire_handle().version()
    }

    /// Release the wrapped object, see [`WireHandle::release()`]
    fn release(&self) {
        self.wire_handle().release()
    }

    /// Forget the wrapped object, see [`WireHandle::destroy()`]
    fn destroy(&self) {
        self.wire_handle().destroy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;
    use waybind_commons::protocol::{WlDisplay, WlSurface};

    #[test]
    fn empty_handle() {
        let handle = WireHandle::<WlSurface>::new();
        assert!(!handle.is_valid());
        assert!(handle.id().is_none());
        assert_eq!(handle.version(), 0);
        // both are no-ops on an empty handle
        handle.release();
        handle.destroy();
        assert!(!handle.is_valid());
    }

    #[test]
    fn requests_on_empty_handle_are_dropped() {
        let handle = WireHandle::<WlSurface>::new();
        handle.send_request(waybind_commons::protocol::wl_surface::REQ_COMMIT, Args::new());
        assert!(!handle.is_valid());
    }

    #[test]
    #[should_panic(expected = "already set up")]
    fn setup_twice() {
        // declared first so it is dropped after the connection
        let handle = WireHandle::<WlDisplay>::new();
        let (client, _server) = UnixStream::pair().unwrap();
        let conn = Connection::from_socket(client).unwrap();
        handle.setup(&conn, conn.display_id());
        assert!(handle.is_valid());
        handle.setup(&conn, conn.display_id());
    }

    #[test]
    #[should_panic(expected = "is not a wl_surface")]
    fn setup_with_another_interface() {
        let handle = WireHandle::<WlSurface>::new();
        let (client, _server) = UnixStream::pair().unwrap();
        let conn = Connection::from_socket(client).unwrap();
        handle.setup(&conn, conn.display_id());
    }

    #[test]
    fn debug_output() {
        let handle = WireHandle::<WlSurface>::new();
        assert_eq!(format!("{handle:?}"), "WireHandle(wl_surface, empty)");
    }
}
