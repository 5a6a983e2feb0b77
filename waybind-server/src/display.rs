use std::{
    env,
    ffi::OsString,
    fmt, io,
    os::unix::{
        io::{AsRawFd, BorrowedFd, RawFd},
        net::UnixStream,
    },
    path::PathBuf,
    sync::{Arc, Mutex},
};

use wayland_backend::server::{Backend, ClientId, Handle, InitError};
use waybind_commons::Signal;

use crate::{
    client::ClientState,
    socket::{BindError, ListeningSocket, AUTO_NAME_LIMIT},
    ClientConnection,
};

/// How [`Display::start()`] lets clients in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartMode {
    /// Listen on a socket in the runtime directory
    #[default]
    ConnectToSocket,
    /// Only accept clients handed over with [`Display::create_client()`]
    ConnectClientsOnly,
}

#[derive(Default)]
pub(crate) struct DisplayShared {
    clients: Mutex<Vec<ClientConnection>>,
    gone: Mutex<Vec<ClientId>>,
}

impl DisplayShared {
    pub(crate) fn client_gone(&self, id: ClientId) {
        self.gone.lock().unwrap().push(id);
    }
}

/// The server end of the protocol
///
/// A display owns the backend, the listening socket and the list of connected clients. Nothing
/// happens on its own: the owner calls [`dispatch_events()`](Display::dispatch_events) whenever
/// [`poll_fd()`](Display::poll_fd) or the listening socket become readable, or simply
/// periodically.
pub struct Display {
    backend: Backend<()>,
    socket: Option<ListeningSocket>,
    shared: Arc<DisplayShared>,
    socket_name: Option<OsString>,
    runtime_dir: Option<PathBuf>,
    running: bool,
    client_connected: Signal<ClientConnection>,
    client_disconnected: Signal<ClientConnection>,
    running_changed: Signal<bool>,
}

impl Display {
    /// Create a display, not started yet
    pub fn new() -> Result<Display, DisplayError> {
        Ok(Display {
            backend: Backend::new()?,
            socket: None,
            shared: Arc::new(DisplayShared::default()),
            socket_name: None,
            runtime_dir: None,
            running: false,
            client_connected: Signal::new(),
            client_disconnected: Signal::new(),
            running_changed: Signal::new(),
        })
    }

    /// Name of the socket to listen on
    ///
    /// Without a name the first free `wayland-N` is used. Only taken into account by the next
    /// [`start()`](Display::start).
    pub fn set_socket_name(&mut self, name: impl Into<OsString>) {
        if self.running {
            crate::log_warn!("Display already running, socket name not changed");
            return;
        }
        self.socket_name = Some(name.into());
    }

    /// Directory to create the socket in, `XDG_RUNTIME_DIR` if not set
    pub fn set_runtime_dir(&mut self, dir: impl Into<PathBuf>) {
        if self.running {
            crate::log_warn!("Display already running, runtime directory not changed");
            return;
        }
        self.runtime_dir = Some(dir.into());
    }

    /// Start accepting clients
    pub fn start(&mut self, mode: StartMode) -> Result<(), DisplayError> {
        if self.running {
            return Ok(());
        }
        if mode == StartMode::ConnectToSocket {
            let runtime_dir = match &self.runtime_dir {
                Some(dir) => dir.clone(),
                None => env::var_os("XDG_RUNTIME_DIR")
                    .map(PathBuf::from)
                    .ok_or(BindError::RuntimeDirNotSet)?,
            };
            let socket = match &self.socket_name {
                Some(name) => ListeningSocket::bind(&runtime_dir, name)?,
                None => ListeningSocket::bind_auto(&runtime_dir, "wayland", 0..=AUTO_NAME_LIMIT)?,
            };
            self.socket_name = socket.socket_name().map(Into::into);
            crate::log_debug!("Listening on {}", socket.socket_path().display());
            self.socket = Some(socket);
        }
        self.running = true;
        self.running_changed.emit(&true);
        Ok(())
    }

    /// Whether the display was started and not terminated since
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The socket name clients connect to
    pub fn socket_name(&self) -> Option<OsString> {
        self.socket_name.clone()
    }

    /// The fd of the listening socket, if any
    pub fn listening_fd(&self) -> Option<RawFd> {
        self.socket.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// A file descriptor which becomes readable when a client sent something
    pub fn poll_fd(&self) -> BorrowedFd<'_> {
        self.backend.poll_fd()
    }

    pub(crate) fn handle(&self) -> Handle {
        self.backend.handle()
    }

    /// Insert a client connected through `stream`
    pub fn create_client(&mut self, stream: UnixStream) -> Result<ClientConnection, DisplayError> {
        if !self.running {
            return Err(DisplayError::NotRunning);
        }
        let state = ClientState::new(self.handle().downgrade(), Arc::downgrade(&self.shared));
        let id = self.backend.handle().insert_client(stream, state.clone())?;
        state.set_id(id);
        let client = ClientConnection::from_state(state);
        self.shared.clients.lock().unwrap().push(client.clone());
        self.client_connected.emit(&client);
        Ok(client)
    }

    /// The connected clients
    pub fn clients(&self) -> Vec<ClientConnection> {
        self.shared.clients.lock().unwrap().clone()
    }

    /// The connected client with the given id
    pub fn client(&self, id: &ClientId) -> Option<ClientConnection> {
        let clients = self.shared.clients.lock().unwrap();
        clients.iter().find(|client| client.id().as_ref() == Some(id)).cloned()
    }

    /// Accept new clients, process the requests of every client and flush the replies
    ///
    /// Returns the number of requests processed.
    pub fn dispatch_events(&mut self) -> Result<usize, DisplayError> {
        if !self.running {
            return Err(DisplayError::NotRunning);
        }
        while let Some(stream) = self.accept()? {
            self.create_client(stream)?;
        }
        let dispatched = self.backend.dispatch_all_clients(&mut ())?;
        self.reap_clients();
        self.flush()?;
        Ok(dispatched)
    }

    fn accept(&self) -> io::Result<Option<UnixStream>> {
        match &self.socket {
            Some(socket) => socket.accept(),
            None => Ok(None),
        }
    }

    // Clients killed outside of a dispatch are only cleaned up by the next dispatch touching them.
    fn reap_clients(&mut self) {
        let gone = std::mem::take(&mut *self.shared.gone.lock().unwrap());
        for id in &gone {
            let _ = self.backend.dispatch_single_client(&mut (), id.clone());
        }
        for id in gone {
            let client = {
                let mut clients = self.shared.clients.lock().unwrap();
                clients
                    .iter()
                    .position(|client| client.id().as_ref() == Some(&id))
                    .map(|index| clients.remove(index))
            };
            if let Some(client) = client {
                client.state().emit_disconnected();
                self.client_disconnected.emit(&client);
            }
        }
    }

    /// Send the pending events of every client
    pub fn flush(&mut self) -> Result<(), DisplayError> {
        match self.backend.flush(None) {
            Err(e) if e.kind() != io::ErrorKind::BrokenPipe => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Disconnect every client and stop listening
    pub fn terminate(&mut self) {
        if !self.running {
            return;
        }
        self.socket = None;
        for client in self.clients() {
            client.destroy();
        }
        self.reap_clients();
        let _ = self.flush();
        self.running = false;
        self.running_changed.emit(&false);
    }

    /// Emitted when a client connects
    pub fn client_connected(&self) -> &Signal<ClientConnection> {
        &self.client_connected
    }

    /// Emitted when a client went away, after its resources were unbound
    pub fn client_disconnected(&self) -> &Signal<ClientConnection> {
        &self.client_disconnected
    }

    /// Emitted by [`start()`](Display::start) and [`terminate()`](Display::terminate)
    pub fn running_changed(&self) -> &Signal<bool> {
        &self.running_changed
    }
}

impl Drop for Display {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl fmt::Debug for Display {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Display")
            .field("socket_name", &self.socket_name)
            .field("running", &self.running)
            .field("clients", &self.shared.clients.lock().unwrap().len())
            .finish_non_exhaustive()
    }
}

/// Error of a [`Display`] operation
#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    /// The backend could not be created
    #[error("Could not initialize the backend: {0}")]
    Init(#[from] InitError),
    /// The listening socket could not be bound
    #[error(transparent)]
    Bind(#[from] BindError),
    /// The display is not running
    #[error("The display is not running")]
    NotRunning,
    /// Some IO error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
