use std::{
    ffi::OsString,
    fmt, io,
    os::unix::io::OwnedFd,
    path::PathBuf,
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use calloop::{
    channel::{self, Channel, Sender},
    generic::Generic,
    timer::{TimeoutAction, Timer},
    EventLoop, Interest, LoopHandle, LoopSignal, Mode, PostAction, RegistrationToken,
};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use wayland_backend::{client::WaylandError, protocol::ProtocolError};
use waybind_commons::Signal;

use crate::{Connection, SocketConfig};

/// How many times a reconnection is retried after the socket reappeared
const RECONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_DELAY: Duration = Duration::from_millis(100);

/// State of a [`ConnectionThread`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection was attempted yet, or the last attempt failed
    Unconnected,
    /// A connection attempt is in progress
    Connecting,
    /// The connection is established
    Connected,
    /// The connection was closed on request
    Disconnected,
    /// The compositor went away, the connection is re-established when it comes back
    Died,
    /// The compositor reported a protocol error, the connection is over for good
    Errored,
}

enum Command {
    Connect,
    Flush,
    Disconnect,
    Quit,
}

struct Shared {
    config: Mutex<SocketConfig>,
    state: Mutex<ConnectionState>,
    connection: Mutex<Option<Connection>>,
    error: Mutex<Option<ProtocolError>>,
    connected: Signal<()>,
    failed: Signal<()>,
    connection_died: Signal<()>,
    error_occurred: Signal<ProtocolError>,
    events_read: Signal<()>,
    state_changed: Signal<ConnectionState>,
}

impl Default for Shared {
    fn default() -> Shared {
        Shared {
            config: Mutex::default(),
            state: Mutex::new(ConnectionState::Unconnected),
            connection: Mutex::default(),
            error: Mutex::default(),
            connected: Signal::new(),
            failed: Signal::new(),
            connection_died: Signal::new(),
            error_occurred: Signal::new(),
            events_read: Signal::new(),
            state_changed: Signal::new(),
        }
    }
}

/// A connection driven by a dedicated reader thread
///
/// The thread owns the socket: it reads incoming events and routes them to their event queues,
/// dispatches the default queue, and flushes outgoing requests whenever it goes idle. Events of
/// objects assigned to other queues are dispatched by whoever dispatches those queues.
///
/// The connection is monitored for death. When the compositor hangs up or its socket file is
/// removed, every handle bound on the connection is emptied and then
/// [`connection_died()`](ConnectionThread::connection_died) is emitted. When the socket file
/// reappears the thread reconnects and emits [`connected()`](ConnectionThread::connected) again.
/// A protocol error ends the connection for good and is reported through
/// [`error_occurred()`](ConnectionThread::error_occurred).
///
/// All signals are emitted on the reader thread.
pub struct ConnectionThread {
    shared: Arc<Shared>,
    commands: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl ConnectionThread {
    /// Spawn the reader thread, without connecting yet
    pub fn new() -> io::Result<ConnectionThread> {
        let shared = Arc::new(Shared::default());
        let (commands, receiver) = channel::channel();
        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("waybind-connection".into())
            .spawn(move || run_worker(worker_shared, receiver))?;
        Ok(ConnectionThread { shared, commands, worker: Some(worker) })
    }

    /// Use the socket `name` instead of the one given by the environment
    ///
    /// `name` may also be an absolute path. Has no effect on an established connection.
    pub fn set_socket_name(&self, name: impl Into<OsString>) {
        self.shared.config.lock().unwrap().name = Some(name.into());
    }

    /// Look for the socket in `dir` instead of `XDG_RUNTIME_DIR`
    pub fn set_runtime_dir(&self, dir: impl Into<PathBuf>) {
        self.shared.config.lock().unwrap().runtime_dir = Some(dir.into());
    }

    /// Use an already connected socket
    ///
    /// Such a connection has no socket file, so it is not watched and never re-established.
    pub fn set_socket_fd(&self, fd: OwnedFd) {
        self.shared.config.lock().unwrap().fd = Some(fd);
    }

    /// The name of the socket this thread connects to
    pub fn socket_name(&self) -> OsString {
        self.shared.config.lock().unwrap().socket_name()
    }

    /// Connect to the compositor
    ///
    /// The result is reported asynchronously by [`connected()`](ConnectionThread::connected) or
    /// [`failed()`](ConnectionThread::failed).
    pub fn init_connection(&self) {
        self.send(Command::Connect);
    }

    /// Ask the reader thread to flush outgoing requests
    pub fn flush(&self) {
        self.send(Command::Flush);
    }

    /// Close the connection
    ///
    /// Handles bound on it are emptied, and it is not re-established.
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    /// Block until the compositor processed every request sent so far
    pub fn roundtrip(&self) -> Result<usize, WaylandError> {
        match self.connection() {
            Some(conn) => conn.roundtrip(),
            None => Err(WaylandError::Io(io::ErrorKind::NotConnected.into())),
        }
    }

    /// The current connection, if established
    pub fn connection(&self) -> Option<Connection> {
        self.shared.connection.lock().unwrap().clone()
    }

    /// The current state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock().unwrap()
    }

    /// Whether the connection ended with a protocol error
    pub fn has_error(&self) -> bool {
        self.shared.error.lock().unwrap().is_some()
    }

    /// The protocol error that ended the connection
    pub fn error(&self) -> Option<ProtocolError> {
        self.shared.error.lock().unwrap().clone()
    }

    /// The code of the protocol error that ended the connection
    pub fn error_code(&self) -> Option<u32> {
        self.shared.error.lock().unwrap().as_ref().map(|err| err.code)
    }

    /// Emitted when a connection is established
    pub fn connected(&self) -> &Signal<()> {
        &self.shared.connected
    }

    /// Emitted when [`init_connection()`](ConnectionThread::init_connection) failed
    pub fn failed(&self) -> &Signal<()> {
        &self.shared.failed
    }

    /// Emitted after the compositor went away, once every handle of the connection is emptied
    pub fn connection_died(&self) -> &Signal<()> {
        &self.shared.connection_died
    }

    /// Emitted when the compositor reported a protocol error
    pub fn error_occurred(&self) -> &Signal<ProtocolError> {
        &self.shared.error_occurred
    }

    /// Emitted every time events were read from the socket
    pub fn events_read(&self) -> &Signal<()> {
        &self.shared.events_read
    }

    /// Emitted on every state transition
    pub fn state_changed(&self) -> &Signal<ConnectionState> {
        &self.shared.state_changed
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            crate::log_error!("The connection thread is gone");
        }
    }
}

impl Drop for ConnectionThread {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Quit);
        if let Some(worker) = self.worker.take() {
            // dropped from one of our own signals
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                crate::log_error!("The connection thread panicked");
            }
        }
    }
}

impl fmt::Debug for ConnectionThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionThread")
            .field("state", &self.state())
            .field("socket_name", &self.socket_name())
            .finish_non_exhaustive()
    }
}

fn run_worker(shared: Arc<Shared>, commands: Channel<Command>) {
    let mut event_loop: EventLoop<'static, Worker> = match EventLoop::try_new() {
        Ok(event_loop) => event_loop,
        Err(err) => {
            crate::log_error!("Failed to create the connection event loop: {}", err);
            return;
        }
    };
    let handle = event_loop.handle();

    if let Err(err) = handle.insert_source(commands, |event, _, worker| match event {
        channel::Event::Msg(command) => worker.command(command),
        channel::Event::Closed => worker.quit(),
    }) {
        crate::log_error!("Failed to listen to connection commands: {}", err.error);
        return;
    }

    let (fs_sender, fs_events) = channel::channel();
    if let Err(err) = handle.insert_source(fs_events, |event, _, worker| {
        if let channel::Event::Msg(event) = event {
            worker.filesystem_event(event);
        }
    }) {
        crate::log_error!("Failed to listen to filesystem events: {}", err.error);
        return;
    }

    let mut worker = Worker {
        shared,
        handle,
        signal: event_loop.get_signal(),
        fs_sender,
        watcher: None,
        watched: None,
        socket: None,
        socket_path: None,
        reading: false,
        retries: 0,
    };

    if let Err(err) = event_loop.run(None, &mut worker, Worker::flush) {
        crate::log_error!("The connection event loop failed: {}", err);
    }
    worker.disconnect();
}

struct Worker {
    shared: Arc<Shared>,
    handle: LoopHandle<'static, Worker>,
    signal: LoopSignal,
    fs_sender: Sender<notify::Result<notify::Event>>,
    watcher: Option<RecommendedWatcher>,
    watched: Option<PathBuf>,
    socket: Option<RegistrationToken>,
    socket_path: Option<PathBuf>,
    // inside the socket callback, the source is removed by returning PostAction::Remove
    reading: bool,
    retries: u32,
}

impl Worker {
    fn state(&self) -> ConnectionState {
        *self.shared.state.lock().unwrap()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.shared.state.lock().unwrap(), state);
        if previous != state {
            self.shared.state_changed.emit(&state);
        }
    }

    fn connection(&self) -> Option<Connection> {
        self.shared.connection.lock().unwrap().clone()
    }

    fn command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                if !self.connect() {
                    self.shared.failed.emit(&());
                }
            }
            Command::Flush => self.flush(),
            Command::Disconnect => self.disconnect(),
            Command::Quit => self.quit(),
        }
    }

    fn quit(&mut self) {
        self.disconnect();
        self.signal.stop();
    }

    fn connect(&mut self) -> bool {
        let previous = self.state();
        match previous {
            ConnectionState::Connecting | ConnectionState::Connected => return true,
            ConnectionState::Errored => {
                crate::log_warn!("Not reconnecting after a protocol error");
                return false;
            }
            _ => {}
        }
        self.set_state(ConnectionState::Connecting);
        let fallback =
            if previous == ConnectionState::Died { previous } else { ConnectionState::Unconnected };

        let opened = self.shared.config.lock().unwrap().open_stream();
        let (stream, path) = match opened {
            Ok(opened) => opened,
            Err(err) => {
                crate::log_warn!("Failed to connect to the compositor: {}", err);
                self.set_state(fallback);
                return false;
            }
        };
        let conn = match Connection::from_socket(stream) {
            Ok(conn) => conn,
            Err(err) => {
                crate::log_warn!("Failed to set up the connection: {}", err);
                self.set_state(fallback);
                return false;
            }
        };
        let fd = match conn.poll_fd().try_clone_to_owned() {
            Ok(fd) => fd,
            Err(err) => {
                crate::log_warn!("Failed to duplicate the connection fd: {}", err);
                self.set_state(fallback);
                return false;
            }
        };
        let source = Generic::new(fd, Interest::READ, Mode::Level);
        match self.handle.insert_source(source, |_, _, worker| Ok(worker.socket_readable())) {
            Ok(token) => self.socket = Some(token),
            Err(err) => {
                crate::log_warn!("Failed to watch the connection: {}", err.error);
                self.set_state(fallback);
                return false;
            }
        }

        conn.set_driven(true);
        *self.shared.connection.lock().unwrap() = Some(conn);
        self.socket_path = path;
        match self.socket_path.clone() {
            Some(path) => self.watch(path),
            None => self.unwatch(),
        }
        self.retries = 0;
        crate::log_debug!("Connected to the compositor");
        self.set_state(ConnectionState::Connected);
        self.shared.connected.emit(&());
        true
    }

    fn socket_readable(&mut self) -> PostAction {
        let Some(conn) = self.connection() else {
            return PostAction::Remove;
        };
        self.reading = true;
        let action = match conn.read_events() {
            Ok(_) => {
                self.dispatch_default_queue(&conn);
                self.shared.events_read.emit(&());
                PostAction::Continue
            }
            Err(WaylandError::Protocol(err)) => {
                self.errored(err);
                PostAction::Remove
            }
            Err(WaylandError::Io(err)) => {
                crate::log_debug!("The compositor hung up: {}", err);
                self.died();
                PostAction::Remove
            }
        };
        self.reading = false;
        action
    }

    fn dispatch_default_queue(&self, conn: &Connection) {
        if let Err(err) = conn.default_queue().dispatch() {
            crate::log_debug!("Failed to dispatch the default queue: {}", err);
        }
    }

    fn flush(&mut self) {
        let Some(conn) = self.connection() else {
            return;
        };
        match conn.flush() {
            Ok(()) => {}
            Err(WaylandError::Io(err)) if err.kind() == io::ErrorKind::WouldBlock => {}
            // the reader notices the death on its own
            Err(err) => crate::log_debug!("Failed to flush the connection: {}", err),
        }
    }

    fn teardown(&mut self) -> Option<Connection> {
        if let Some(token) = self.socket.take() {
            if !self.reading {
                self.handle.remove(token);
            }
        }
        let conn = self.shared.connection.lock().unwrap().take()?;
        conn.set_driven(false);
        conn.invalidate();
        Some(conn)
    }

    fn died(&mut self) {
        // an error the compositor sent before hanging up wins
        if let Some(err) = self.connection().and_then(|conn| conn.protocol_error()) {
            return self.errored(err);
        }
        if self.teardown().is_none() {
            return;
        }
        crate::log_warn!("The connection to the compositor died");
        self.set_state(ConnectionState::Died);
        self.shared.connection_died.emit(&());
        match self.socket_path.as_ref().and_then(|path| path.parent()).map(PathBuf::from) {
            Some(dir) => self.watch(dir),
            None => self.unwatch(),
        }
    }

    fn errored(&mut self, err: ProtocolError) {
        crate::log_error!("Protocol error on the compositor connection: {}", err);
        self.teardown();
        self.unwatch();
        *self.shared.error.lock().unwrap() = Some(err.clone());
        self.set_state(ConnectionState::Errored);
        self.shared.error_occurred.emit(&err);
    }

    fn disconnect(&mut self) {
        self.flush();
        let closed = self.teardown().is_some();
        self.unwatch();
        if closed || self.state() == ConnectionState::Died {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    fn socket_removed(&mut self) {
        // drain what the compositor sent before going away
        if let Some(conn) = self.connection() {
            match conn.read_events() {
                Err(WaylandError::Protocol(err)) => return self.errored(err),
                Ok(_) => self.dispatch_default_queue(&conn),
                Err(WaylandError::Io(_)) => {}
            }
        }
        self.died();
    }

    fn reconnect(&mut self) {
        if self.connect() {
            return;
        }
        if self.retries >= RECONNECT_ATTEMPTS {
            crate::log_warn!("Giving up on reconnecting to the compositor");
            return;
        }
        self.retries += 1;
        let timer = Timer::from_duration(RECONNECT_DELAY);
        if let Err(err) = self.handle.insert_source(timer, |_, _, worker| {
            if worker.state() == ConnectionState::Died {
                worker.reconnect();
            }
            TimeoutAction::Drop
        }) {
            crate::log_warn!("Failed to schedule a reconnection: {}", err.error);
        }
    }

    fn filesystem_event(&mut self, event: notify::Result<notify::Event>) {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                crate::log_warn!("Error while watching the compositor socket: {}", err);
                return;
            }
        };
        let Some(path) = self.socket_path.clone() else {
            return;
        };
        if !event.paths.iter().any(|changed| changed == &path) {
            return;
        }
        match self.state() {
            ConnectionState::Connected if !path.exists() => self.socket_removed(),
            ConnectionState::Died if path.exists() => {
                self.retries = 0;
                self.reconnect();
            }
            _ => {}
        }
    }

    fn watcher(&mut self) -> Option<&mut RecommendedWatcher> {
        if self.watcher.is_none() {
            let sender = self.fs_sender.clone();
            match notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
                let _ = sender.send(event);
            }) {
                Ok(watcher) => self.watcher = Some(watcher),
                Err(err) => {
                    crate::log_warn!("Cannot watch the compositor socket: {}", err);
                    return None;
                }
            }
        }
        self.watcher.as_mut()
    }

    fn watch(&mut self, path: PathBuf) {
        self.unwatch();
        let Some(watcher) = self.watcher() else {
            return;
        };
        match watcher.watch(&path, RecursiveMode::NonRecursive) {
            Ok(()) => self.watched = Some(path),
            Err(err) => crate::log_warn!("Cannot watch {:?}: {}", path, err),
        }
    }

    fn unwatch(&mut self) {
        if let (Some(watcher), Some(path)) = (self.watcher.as_mut(), self.watched.take()) {
            let _ = watcher.unwatch(&path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn wait_for(thread: &ConnectionThread, state: ConnectionState) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if thread.state() == state {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn missing_compositor_fails() {
        let dir = tempfile::tempdir().unwrap();
        let thread = ConnectionThread::new().unwrap();
        thread.set_runtime_dir(dir.path());
        thread.set_socket_name("wayland-missing");
        assert_eq!(thread.socket_name(), OsString::from("wayland-missing"));

        let failed = thread.failed().spy();
        thread.init_connection();
        let deadline = Instant::now() + Duration::from_secs(5);
        while failed.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(failed.count(), 1);
        assert_eq!(thread.state(), ConnectionState::Unconnected);
        assert!(thread.connection().is_none());
        assert!(!thread.has_error());
    }

    #[test]
    fn hangup_is_death() {
        let (client, server) = std::os::unix::net::UnixStream::pair().unwrap();
        let thread = ConnectionThread::new().unwrap();
        thread.set_socket_fd(client.into());
        let died = thread.connection_died().spy();
        thread.init_connection();
        assert!(wait_for(&thread, ConnectionState::Connected));
        let conn = thread.connection().unwrap();
        assert!(conn.is_alive());

        drop(server);
        assert!(wait_for(&thread, ConnectionState::Died));
        assert_eq!(died.count(), 1);
        assert!(!conn.is_alive());
        assert!(thread.connection().is_none());
        assert_eq!(thread.error_code(), None);
    }

    #[test]
    fn drop_stops_the_thread() {
        let thread = ConnectionThread::new().unwrap();
        assert_eq!(thread.state(), ConnectionState::Unconnected);
        drop(thread);
    }
}
