use std::{
    env,
    ffi::OsString,
    fmt,
    io::ErrorKind,
    os::unix::io::{BorrowedFd, FromRawFd, OwnedFd},
    os::unix::net::UnixStream,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, Weak,
    },
    time::Duration,
};

use wayland_backend::{
    client::{Backend, InvalidId, ObjectData, ObjectId, ReadEventsGuard, WaylandError},
    message,
    protocol::{Argument, Interface, Message, ProtocolError},
};
use waybind_commons::protocol::wl_display;

use crate::{
    event_queue::{EventQueue, ListenerRef, QueueInner, QueueProxyData},
    handle::HandleSlot,
};

/// Socket name used when neither the configuration nor `WAYLAND_DISPLAY` gives one
pub const DEFAULT_SOCKET_NAME: &str = "wayland-0";

/// Where to find the compositor
///
/// Every unset field falls back to the environment: `WAYLAND_SOCKET` for an inherited connected
/// socket, `WAYLAND_DISPLAY` for the socket name (or [`DEFAULT_SOCKET_NAME`]) and
/// `XDG_RUNTIME_DIR` for the directory holding the socket.
#[derive(Debug, Default)]
pub struct SocketConfig {
    /// Name of the socket, or an absolute path to it
    pub name: Option<OsString>,
    /// Directory holding the socket
    pub runtime_dir: Option<PathBuf>,
    /// An already connected socket, used instead of looking up the socket path
    pub fd: Option<OwnedFd>,
}

impl SocketConfig {
    /// The name of the socket to connect to
    pub fn socket_name(&self) -> OsString {
        self.name
            .clone()
            .or_else(|| env::var_os("WAYLAND_DISPLAY"))
            .unwrap_or_else(|| DEFAULT_SOCKET_NAME.into())
    }

    /// The path of the socket to connect to
    pub fn socket_path(&self) -> Result<PathBuf, ConnectError> {
        let socket_name = PathBuf::from(self.socket_name());
        if socket_name.is_absolute() {
            return Ok(socket_name);
        }
        let mut socket_path = self
            .runtime_dir
            .clone()
            .or_else(|| env::var_os("XDG_RUNTIME_DIR").map(Into::into))
            .ok_or(ConnectError::NoCompositor)?;
        if !socket_path.is_absolute() {
            return Err(ConnectError::NoCompositor);
        }
        socket_path.push(socket_name);
        Ok(socket_path)
    }

    /// Open a stream to the compositor
    ///
    /// Returns the path of the socket too, unless the stream was inherited. A configured fd is
    /// consumed by this call.
    pub fn open_stream(&mut self) -> Result<(UnixStream, Option<PathBuf>), ConnectError> {
        if let Some(fd) = self.fd.take() {
            return Ok((UnixStream::from(fd), None));
        }
        if self.name.is_none() {
            if let Ok(txt) = env::var("WAYLAND_SOCKET") {
                return Ok((inherited_socket(&txt)?, None));
            }
        }
        let path = self.socket_path()?;
        let stream = UnixStream::connect(&path)
            .map_err(|source| ConnectError::Io { path: path.clone(), source })?;
        Ok((stream, Some(path)))
    }
}

fn inherited_socket(txt: &str) -> Result<UnixStream, ConnectError> {
    let fd = txt.parse::<i32>().map_err(|_| ConnectError::InvalidFd)?;
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
    // remove the variable so any child processes don't see it
    env::remove_var("WAYLAND_SOCKET");
    let flags = rustix::io::fcntl_getfd(&fd);
    flags
        .map(|f| f | rustix::io::FdFlags::CLOEXEC)
        .and_then(|f| rustix::io::fcntl_setfd(&fd, f))
        .map_err(|_| ConnectError::InvalidFd)?;
    Ok(UnixStream::from(fd))
}

pub(crate) struct ConnectionInner {
    backend: Backend,
    alive: AtomicBool,
    driven: AtomicBool,
    handles: Mutex<Vec<Weak<HandleSlot>>>,
    default_queue: Arc<QueueInner>,
}

/// A connection to a Wayland compositor
///
/// Besides the socket itself, the connection keeps track of every [`WireHandle`](crate::WireHandle)
/// bound to one of its objects. When the connection is declared dead, all of them are emptied at
/// once, and the events still waiting in queues are dropped.
///
/// Cloning a `Connection` gives another handle to the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

#[derive(Clone)]
pub(crate) struct WeakConnection(Weak<ConnectionInner>);

impl WeakConnection {
    pub(crate) fn upgrade(&self) -> Option<Connection> {
        self.0.upgrade().map(|inner| Connection { inner })
    }
}

impl Connection {
    /// Try to connect to the Wayland server following the environment
    pub fn connect_to_env() -> Result<Connection, ConnectError> {
        Connection::connect(&mut SocketConfig::default())
    }

    /// Connect to the Wayland server described by `config`
    pub fn connect(config: &mut SocketConfig) -> Result<Connection, ConnectError> {
        let (stream, _) = config.open_stream()?;
        Connection::from_socket(stream)
    }

    /// Initialize a Wayland connection from an already connected Unix stream
    pub fn from_socket(stream: UnixStream) -> Result<Connection, ConnectError> {
        let backend = Backend::connect(stream).map_err(|_| ConnectError::NoWaylandLib)?;
        Ok(Connection {
            inner: Arc::new(ConnectionInner {
                backend,
                alive: AtomicBool::new(true),
                driven: AtomicBool::new(false),
                handles: Mutex::new(Vec::new()),
                default_queue: QueueInner::new(),
            }),
        })
    }

    pub(crate) fn downgrade(&self) -> WeakConnection {
        WeakConnection(Arc::downgrade(&self.inner))
    }

    /// Whether the connection is still usable
    ///
    /// A connection stops being alive when its death or a protocol error has been detected, not
    /// as soon as the peer hangs up.
    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    pub(crate) fn is_driven(&self) -> bool {
        self.inner.driven.load(Ordering::Acquire)
    }

    // the socket is read by a ConnectionThread
    pub(crate) fn set_driven(&self, driven: bool) {
        self.inner.driven.store(driven, Ordering::Release);
    }

    /// The `wl_display` object of this connection
    pub fn display_id(&self) -> ObjectId {
        self.inner.backend.display_id()
    }

    /// The version of an object, if it exists
    pub fn object_version(&self, id: &ObjectId) -> Option<u32> {
        self.inner.backend.info(id.clone()).ok().map(|info| info.version)
    }

    /// The queue receiving the events of objects not assigned to another queue
    pub fn default_queue(&self) -> EventQueue {
        EventQueue::with_inner(self, self.inner.default_queue.clone())
    }

    /// Create a new event queue set up on this connection
    pub fn new_event_queue(&self) -> EventQueue {
        let queue = EventQueue::new();
        queue.setup(self);
        queue
    }

    /// The protocol error that killed this connection, if any
    pub fn protocol_error(&self) -> Option<ProtocolError> {
        match self.inner.backend.last_error()? {
            WaylandError::Protocol(err) => Some(err),
            WaylandError::Io(_) => None,
        }
    }

    /// The error that killed the underlying socket, if any
    pub fn last_error(&self) -> Option<WaylandError> {
        self.inner.backend.last_error()
    }

    /// Get the fd of the underlying socket, to poll it for readability
    pub fn poll_fd(&self) -> BorrowedFd<'_> {
        self.inner.backend.poll_fd()
    }

    /// Flush pending outgoing requests to the server
    pub fn flush(&self) -> Result<(), WaylandError> {
        self.inner.backend.flush()
    }

    /// Read the events available on the socket without blocking, and route them to their queues
    ///
    /// Returns the number of events read.
    pub fn read_events(&self) -> Result<usize, WaylandError> {
        match self.inner.backend.prepare_read() {
            Some(guard) => match guard.read() {
                Ok(n) => Ok(n),
                Err(WaylandError::Io(e)) if e.kind() == ErrorKind::WouldBlock => Ok(0),
                Err(e) => Err(e),
            },
            None => self.inner.backend.dispatch_inner_queue(),
        }
    }

    /// Wait for the socket to be readable, at most `timeout`, then read it
    pub fn blocking_read_events(&self, timeout: Option<Duration>) -> Result<usize, WaylandError> {
        match self.inner.backend.prepare_read() {
            Some(guard) => blocking_read(guard, timeout),
            None => self.inner.backend.dispatch_inner_queue(),
        }
    }

    /// Read the socket and dispatch the default queue on the calling thread
    pub fn dispatch_events(&self) -> Result<usize, WaylandError> {
        self.read_events()?;
        match self.default_queue().dispatch() {
            Ok(n) => Ok(n),
            Err(crate::DispatchError::Backend(err)) => Err(err),
            Err(crate::DispatchError::NotSetUp) => Ok(0),
        }
    }

    /// Block until the server has processed every request sent so far
    ///
    /// When the socket is read by a [`ConnectionThread`](crate::ConnectionThread) this waits for
    /// the reader, otherwise the socket is read on the calling thread. Events are routed to their
    /// queues but not dispatched. Returns the number of events read by this call.
    pub fn roundtrip(&self) -> Result<usize, WaylandError> {
        let done = Arc::new(SyncData::default());
        self.inner
            .backend
            .send_request(
                message!(
                    self.display_id(),
                    wl_display::REQ_SYNC,
                    [Argument::NewId(ObjectId::null())]
                ),
                Some(done.clone()),
                None,
            )
            .map_err(|_| WaylandError::Io(rustix::io::Errno::PIPE.into()))?;

        if self.is_driven() {
            self.flush()?;
            done.wait(self)?;
            return Ok(0);
        }

        let mut dispatched = 0;
        loop {
            self.flush()?;
            dispatched += self.blocking_read_events(None)?;
            if done.is_done() {
                break;
            }
        }
        Ok(dispatched)
    }

    pub(crate) fn send_request(
        &self,
        msg: Message<ObjectId, std::os::unix::io::RawFd>,
        data: Option<Arc<dyn ObjectData>>,
        child_spec: Option<(&'static Interface, u32)>,
    ) -> Result<ObjectId, InvalidId> {
        self.inner.backend.send_request(msg, data, child_spec)
    }

    pub(crate) fn destroy_object(&self, id: &ObjectId) -> Result<(), InvalidId> {
        self.inner.backend.destroy_object(id)
    }

    pub(crate) fn track(&self, slot: &Arc<HandleSlot>) {
        let mut handles = self.inner.handles.lock().unwrap();
        handles.retain(|handle| handle.strong_count() > 0);
        handles.push(Arc::downgrade(slot));
    }

    /// Declare the connection dead
    ///
    /// Every tracked handle is emptied and the default queue drops its events. Only the first
    /// call has an effect.
    pub(crate) fn invalidate(&self) {
        if !self.inner.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        let handles = std::mem::take(&mut *self.inner.handles.lock().unwrap());
        for slot in handles.iter().filter_map(Weak::upgrade) {
            slot.unbind();
        }
        self.inner.default_queue.deactivate();
    }

    /// Route the events of an object to `listener`
    ///
    /// Events received since the object was created are delivered to it first.
    pub(crate) fn attach_listener(&self, id: &ObjectId, listener: ListenerRef) {
        let data = self.inner.backend.get_data(id.clone());
        match data.map(|data| data.downcast_arc::<QueueProxyData>()) {
            Ok(Ok(data)) => data.slot.attach(listener, &data.queue),
            _ => {
                let data = QueueProxyData::new(self.inner.default_queue.clone(), Some(listener));
                if self.inner.backend.set_data(id.clone(), Arc::new(data)).is_err() {
                    crate::log_warn!("Cannot listen to {}, it no longer exists", id);
                }
            }
        }
    }

    pub(crate) fn move_to_queue(
        &self,
        id: &ObjectId,
        queue: &Arc<QueueInner>,
    ) -> Result<(), InvalidId> {
        let slot = match self.inner.backend.get_data(id.clone())?.downcast_arc::<QueueProxyData>() {
            Ok(data) => data.slot.clone(),
            Err(_) => Default::default(),
        };
        let data = QueueProxyData { queue: queue.clone(), slot };
        self.inner.backend.set_data(id.clone(), Arc::new(data))
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("backend", &self.inner.backend)
            .field("alive", &self.is_alive())
            .finish()
    }
}

pub(crate) fn blocking_read(
    guard: ReadEventsGuard,
    timeout: Option<Duration>,
) -> Result<usize, WaylandError> {
    let fd = guard.connection_fd();
    let mut fds = [rustix::event::PollFd::new(
        &fd,
        rustix::event::PollFlags::IN | rustix::event::PollFlags::ERR,
    )];
    let timeout = timeout.map(|timeout| rustix::event::Timespec {
        tv_sec: timeout.as_secs() as _,
        tv_nsec: timeout.subsec_nanos() as _,
    });

    loop {
        match rustix::event::poll(&mut fds, timeout.as_ref()) {
            Ok(0) => return Ok(0),
            Ok(_) => break,
            Err(rustix::io::Errno::INTR) => continue,
            Err(e) => return Err(WaylandError::Io(e.into())),
        }
    }

    // at this point the fd is ready
    match guard.read() {
        Ok(n) => Ok(n),
        // if we are still "wouldblock", just return 0; the caller will retry.
        Err(WaylandError::Io(e)) if e.kind() == ErrorKind::WouldBlock => Ok(0),
        Err(e) => Err(e),
    }
}

#[derive(Default)]
struct SyncData {
    done: Mutex<bool>,
    cond: Condvar,
}

impl SyncData {
    fn is_done(&self) -> bool {
        *self.done.lock().unwrap()
    }

    fn wait(&self, conn: &Connection) -> Result<(), WaylandError> {
        let mut done = self.done.lock().unwrap();
        while !*done {
            if let Some(err) = conn.last_error() {
                return Err(err);
            }
            if !conn.is_alive() {
                return Err(WaylandError::Io(rustix::io::Errno::PIPE.into()));
            }
            done = self.cond.wait_timeout(done, Duration::from_millis(50)).unwrap().0;
        }
        Ok(())
    }
}

impl ObjectData for SyncData {
    fn event(
        self: Arc<Self>,
        _handle: &Backend,
        _msg: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        *self.done.lock().unwrap() = true;
        self.cond.notify_all();
        None
    }

    fn destroyed(&self, _: ObjectId) {}
}

/// An error when trying to establish a Wayland connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The wayland library could not be loaded.
    #[error("The wayland library could not be loaded")]
    NoWaylandLib,

    /// Could not find wayland compositor
    #[error("Could not find wayland compositor")]
    NoCompositor,

    /// `WAYLAND_SOCKET` was set but contained garbage
    #[error("WAYLAND_SOCKET was set but contained garbage")]
    InvalidFd,

    /// The socket exists but connecting to it failed
    #[error("Could not connect to {path:?}")]
    Io {
        /// The socket path
        path: PathBuf,
        /// The connection error
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_socket_path() {
        let config = SocketConfig {
            name: Some("wayland-7".into()),
            runtime_dir: Some("/run/user/1000".into()),
            fd: None,
        };
        assert_eq!(config.socket_path().unwrap(), PathBuf::from("/run/user/1000/wayland-7"));

        let absolute = SocketConfig { name: Some("/tmp/compositor".into()), ..Default::default() };
        assert_eq!(absolute.socket_path().unwrap(), PathBuf::from("/tmp/compositor"));
    }

    #[test]
    fn relative_runtime_dir_is_rejected() {
        let config = SocketConfig {
            name: Some("wayland-1".into()),
            runtime_dir: Some("relative/dir".into()),
            fd: None,
        };
        assert!(matches!(config.socket_path(), Err(ConnectError::NoCompositor)));
    }

    #[test]
    fn missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SocketConfig {
            name: Some("wayland-nothing".into()),
            runtime_dir: Some(dir.path().into()),
            fd: None,
        };
        match Connection::connect(&mut config) {
            Err(ConnectError::Io { path, .. }) => {
                assert_eq!(path, dir.path().join("wayland-nothing"))
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn invalidate_is_idempotent() {
        let (client, _server) = UnixStream::pair().unwrap();
        let conn = Connection::from_socket(client).unwrap();
        assert!(conn.is_alive());
        conn.invalidate();
        conn.invalidate();
        assert!(!conn.is_alive());
        assert_eq!(conn.default_queue().pending(), 0);
    }
}
