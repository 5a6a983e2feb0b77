use std::{
    collections::VecDeque,
    fmt,
    io::ErrorKind,
    os::unix::io::OwnedFd,
    sync::{Arc, Condvar, Mutex, Weak},
    time::{Duration, Instant},
};

use calloop::{
    ping::{make_ping, Ping},
    LoopHandle, RegistrationToken,
};
use wayland_backend::{
    client::{Backend, InvalidId, ObjectData, ObjectId, WaylandError},
    protocol::{Argument, Message},
};

use crate::Connection;

/// An event received from the server
pub type Event = Message<ObjectId, OwnedFd>;

/// Receiver of the events of a protocol object
///
/// Listeners are invoked on the thread dispatching the event queue the object is assigned to.
pub trait EventListener: Send + Sync + 'static {
    /// Process an event sent to the object this listener is attached to
    fn event(&self, conn: &Connection, event: Event);
}

#[derive(Clone)]
pub(crate) enum ListenerRef {
    Owned(Arc<dyn EventListener>),
    Weak(Weak<dyn EventListener>),
}

impl ListenerRef {
    /// A listener that does not keep its front-end alive
    pub(crate) fn weak<L: EventListener>(listener: &Arc<L>) -> ListenerRef {
        let weak: Weak<L> = Arc::downgrade(listener);
        ListenerRef::Weak(weak)
    }

    fn upgrade(&self) -> Option<Arc<dyn EventListener>> {
        match self {
            ListenerRef::Owned(listener) => Some(listener.clone()),
            ListenerRef::Weak(listener) => listener.upgrade(),
        }
    }
}

#[derive(Default)]
struct SlotState {
    listener: Option<ListenerRef>,
    // events received before a listener was attached
    backlog: Vec<Event>,
}

/// The listener attached to an object, shared by the successive queues it is moved to
#[derive(Default)]
pub(crate) struct ListenerSlot {
    state: Mutex<SlotState>,
}

impl ListenerSlot {
    fn with(listener: Option<ListenerRef>) -> Arc<ListenerSlot> {
        Arc::new(ListenerSlot { state: Mutex::new(SlotState { listener, backlog: Vec::new() }) })
    }

    pub(crate) fn attach(&self, listener: ListenerRef, queue: &QueueInner) {
        let mut state = self.state.lock().unwrap();
        let backlog = std::mem::take(&mut state.backlog);
        if let Some(strong) = listener.upgrade() {
            for event in backlog {
                queue.push(strong.clone(), event);
            }
        }
        state.listener = Some(listener);
    }
}

/// Object data routing the events of an object to an event queue
pub(crate) struct QueueProxyData {
    pub(crate) queue: Arc<QueueInner>,
    pub(crate) slot: Arc<ListenerSlot>,
}

impl QueueProxyData {
    pub(crate) fn new(queue: Arc<QueueInner>, listener: Option<ListenerRef>) -> QueueProxyData {
        QueueProxyData { queue, slot: ListenerSlot::with(listener) }
    }
}

impl ObjectData for QueueProxyData {
    fn event(
        self: Arc<Self>,
        _backend: &Backend,
        msg: Message<ObjectId, OwnedFd>,
    ) -> Option<Arc<dyn ObjectData>> {
        // objects created by the server start on the queue of their parent
        let child = msg.args.iter().any(|arg| matches!(arg, Argument::NewId(_))).then(|| {
            Arc::new(QueueProxyData::new(self.queue.clone(), None)) as Arc<dyn ObjectData>
        });

        let mut state = self.slot.state.lock().unwrap();
        match state.listener.as_ref().map(ListenerRef::upgrade) {
            Some(Some(listener)) => self.queue.push(listener, msg),
            // the front-end is gone, nobody cares about this event anymore
            Some(None) => {}
            None => state.backlog.push(msg),
        }
        child
    }

    fn destroyed(&self, _object_id: ObjectId) {}
}

struct QueueState {
    pending: VecDeque<(Arc<dyn EventListener>, Event)>,
    active: bool,
    ping: Option<Ping>,
}

pub(crate) struct QueueInner {
    state: Mutex<QueueState>,
    cond: Condvar,
}

impl QueueInner {
    pub(crate) fn new() -> Arc<QueueInner> {
        Arc::new(QueueInner {
            state: Mutex::new(QueueState { pending: VecDeque::new(), active: true, ping: None }),
            cond: Condvar::new(),
        })
    }

    fn push(&self, listener: Arc<dyn EventListener>, event: Event) {
        let mut state = self.state.lock().unwrap();
        if !state.active {
            return;
        }
        state.pending.push_back((listener, event));
        if let Some(ping) = &state.ping {
            ping.ping();
        }
        drop(state);
        self.cond.notify_all();
    }

    fn take(&self) -> VecDeque<(Arc<dyn EventListener>, Event)> {
        std::mem::take(&mut self.state.lock().unwrap().pending)
    }

    fn activate(&self) {
        self.state.lock().unwrap().active = true;
    }

    /// Drop every pending event and refuse new ones
    pub(crate) fn deactivate(&self) {
        let mut state = self.state.lock().unwrap();
        state.active = false;
        state.pending.clear();
        state.ping = None;
        drop(state);
        self.cond.notify_all();
    }

    fn pending(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    // returns false on timeout or deactivation
    fn wait(&self, deadline: Option<Instant>) -> bool {
        let mut state = self.state.lock().unwrap();
        while state.pending.is_empty() && state.active {
            match deadline {
                None => state = self.cond.wait(state).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    state = self.cond.wait_timeout(state, deadline - now).unwrap().0;
                }
            }
        }
        !state.pending.is_empty()
    }
}

/// An error while dispatching an event queue
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The queue was never set up on a connection, or was released
    #[error("the event queue is not set up on a connection")]
    NotSetUp,
    /// The connection failed
    #[error(transparent)]
    Backend(#[from] WaylandError),
}

struct QueueShared {
    inner: Arc<QueueInner>,
    conn: Mutex<Option<Connection>>,
}

/// A buffer of events waiting to be dispatched
///
/// Objects are assigned to a queue when they are created (children inherit the queue of the
/// object creating them unless told otherwise) or explicitly with
/// [`add_proxy()`](EventQueue::add_proxy). Their events are stored in the queue when read from the
/// socket, and handed to their listeners by [`dispatch()`](EventQueue::dispatch), on the thread
/// calling it.
///
/// Cloning an `EventQueue` gives another handle to the same queue.
#[derive(Clone)]
pub struct EventQueue {
    shared: Arc<QueueShared>,
}

impl EventQueue {
    /// Create a queue, it must be set up on a connection before it can be dispatched
    pub fn new() -> EventQueue {
        EventQueue {
            shared: Arc::new(QueueShared { inner: QueueInner::new(), conn: Mutex::new(None) }),
        }
    }

    pub(crate) fn with_inner(conn: &Connection, inner: Arc<QueueInner>) -> EventQueue {
        EventQueue { shared: Arc::new(QueueShared { inner, conn: Mutex::new(Some(conn.clone())) }) }
    }

    pub(crate) fn inner(&self) -> &Arc<QueueInner> {
        &self.shared.inner
    }

    /// Attach this queue to a connection
    ///
    /// # Panics
    ///
    /// A queue can only be set up once, unless it was released in between.
    pub fn setup(&self, conn: &Connection) {
        let mut guard = self.shared.conn.lock().unwrap();
        assert!(guard.is_none(), "EventQueue::setup() called on a queue that is already set up");
        *guard = Some(conn.clone());
        self.shared.inner.activate();
    }

    /// Whether the queue is set up on a live connection
    pub fn is_valid(&self) -> bool {
        self.shared.conn.lock().unwrap().as_ref().map_or(false, Connection::is_alive)
    }

    /// The connection this queue is set up on
    pub fn connection(&self) -> Option<Connection> {
        self.shared.conn.lock().unwrap().clone()
    }

    /// Detach the queue from its connection and drop its pending events
    pub fn release(&self) {
        self.shared.conn.lock().unwrap().take();
        self.shared.inner.deactivate();
    }

    /// Same as [`release()`](EventQueue::release), a queue has no server-side counterpart
    pub fn destroy(&self) {
        self.release();
    }

    /// Number of events waiting to be dispatched
    pub fn pending(&self) -> usize {
        self.shared.inner.pending()
    }

    /// Move an existing object to this queue
    ///
    /// Events already waiting in its previous queue stay there.
    pub fn add_proxy(&self, id: &ObjectId) -> Result<(), InvalidId> {
        let conn = self.connection().ok_or(InvalidId)?;
        conn.move_to_queue(id, &self.shared.inner)
    }

    /// Dispatch the pending events to their listeners, and flush the requests they sent
    ///
    /// Returns the number of dispatched events. Events left over from a connection that died are
    /// dropped without being dispatched.
    pub fn dispatch(&self) -> Result<usize, DispatchError> {
        let conn = self.connection().ok_or(DispatchError::NotSetUp)?;
        let events = self.shared.inner.take();
        if !conn.is_alive() {
            return Ok(0);
        }
        let count = events.len();
        for (listener, event) in events {
            listener.event(&conn, event);
        }
        match conn.flush() {
            Ok(()) => Ok(count),
            Err(WaylandError::Io(err)) if err.kind() == ErrorKind::WouldBlock => Ok(count),
            Err(err) => Err(err.into()),
        }
    }

    /// Wait for events then dispatch them
    ///
    /// If the connection is driven by a [`ConnectionThread`](crate::ConnectionThread), this waits
    /// for the reader thread to queue events. Otherwise it reads the socket itself. Returns
    /// `Ok(0)` if `timeout` elapsed without any event.
    pub fn blocking_dispatch(&self, timeout: Option<Duration>) -> Result<usize, DispatchError> {
        let conn = self.connection().ok_or(DispatchError::NotSetUp)?;
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        match conn.flush() {
            Ok(()) => {}
            Err(WaylandError::Io(err)) if err.kind() == ErrorKind::WouldBlock => {}
            Err(err) => return Err(err.into()),
        }

        if conn.is_driven() {
            self.shared.inner.wait(deadline);
        } else {
            while self.pending() == 0 {
                let remaining = match deadline {
                    Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                        Some(remaining) => Some(remaining),
                        None => break,
                    },
                    None => None,
                };
                conn.blocking_read_events(remaining)?;
            }
        }
        self.dispatch()
    }

    /// Block until the server processed every request sent so far, then dispatch this queue
    pub fn roundtrip(&self) -> Result<usize, DispatchError> {
        let conn = self.connection().ok_or(DispatchError::NotSetUp)?;
        conn.roundtrip()?;
        self.dispatch()
    }

    /// Dispatch this queue automatically from a calloop event loop
    ///
    /// The queue is dispatched on the thread running the loop whenever events are queued.
    pub fn insert_into<D: 'static>(
        &self,
        handle: &LoopHandle<'_, D>,
    ) -> Result<RegistrationToken, calloop::Error> {
        let (ping, source) = make_ping().map_err(calloop::Error::IoError)?;
        let queue = self.clone();
        let token = handle
            .insert_source(source, move |(), _, _| {
                if let Err(err) = queue.dispatch() {
                    crate::log_warn!("Failed to dispatch event queue: {err}");
                }
            })
            .map_err(|err| err.error)?;

        let mut state = self.shared.inner.state.lock().unwrap();
        if !state.pending.is_empty() {
            ping.ping();
        }
        state.ping = Some(ping);
        Ok(token)
    }

    /// Create the object data routing a new object to this queue
    pub(crate) fn proxy_data(&self, listener: Option<ListenerRef>) -> Arc<QueueProxyData> {
        Arc::new(QueueProxyData::new(self.shared.inner.clone(), listener))
    }
}

impl Default for EventQueue {
    fn default() -> EventQueue {
        EventQueue::new()
    }
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("valid", &self.is_valid())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl EventListener for Counter {
        fn event(&self, _conn: &Connection, _event: Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn event(opcode: u16) -> Event {
        Message { sender_id: ObjectId::null(), opcode, args: Default::default() }
    }

    #[test]
    #[should_panic(expected = "already set up")]
    fn setup_twice() {
        let queue = EventQueue::new();
        let (client, _server) = std::os::unix::net::UnixStream::pair().unwrap();
        let conn = Connection::from_socket(client).unwrap();
        queue.setup(&conn);
        assert!(queue.is_valid());
        queue.setup(&conn);
    }

    #[test]
    fn setup_again_after_release() {
        let (client, _server) = std::os::unix::net::UnixStream::pair().unwrap();
        let conn = Connection::from_socket(client).unwrap();
        let queue = conn.new_event_queue();
        queue.release();
        assert!(!queue.is_valid());
        queue.setup(&conn);
        assert!(queue.is_valid());
    }

    #[test]
    fn weak_listener_follows_its_owner() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let listener = ListenerRef::weak(&counter);
        assert!(listener.upgrade().is_some());
        drop(counter);
        assert!(listener.upgrade().is_none());
    }

    #[test]
    fn unset_queue_cannot_dispatch() {
        let queue = EventQueue::new();
        assert!(!queue.is_valid());
        assert!(matches!(queue.dispatch(), Err(DispatchError::NotSetUp)));
    }

    #[test]
    fn backlog_is_replayed_on_attach() {
        let queue = QueueInner::new();
        let slot = ListenerSlot::with(None);
        slot.state.lock().unwrap().backlog.extend([event(0), event(1)]);

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        slot.attach(ListenerRef::weak(&counter), &queue);
        assert_eq!(queue.pending(), 2);
        assert!(slot.state.lock().unwrap().backlog.is_empty());
    }

    #[test]
    fn deactivated_queue_drops_events() {
        let queue = QueueInner::new();
        let counter: Arc<dyn EventListener> = Arc::new(Counter(AtomicUsize::new(0)));
        queue.push(counter.clone(), event(0));
        queue.deactivate();
        assert_eq!(queue.pending(), 0);
        queue.push(counter, event(0));
        assert_eq!(queue.pending(), 0);
        assert!(!queue.wait(Some(Instant::now())));
    }

    #[test]
    fn wait_times_out() {
        let queue = QueueInner::new();
        let start = Instant::now();
        assert!(!queue.wait(Some(start + Duration::from_millis(20))));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
