use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock, Weak,
    },
};

use wayland_backend::{
    protocol::ProtocolError,
    server::{ClientData, ClientId, Credentials, DisconnectReason, WeakHandle},
};
use waybind_commons::Signal;

use crate::display::DisplayShared;

pub(crate) struct ClientState {
    id: OnceLock<ClientId>,
    handle: WeakHandle,
    display: Weak<DisplayShared>,
    connected: AtomicBool,
    disconnected: Signal<()>,
}

impl ClientState {
    pub(crate) fn new(handle: WeakHandle, display: Weak<DisplayShared>) -> Arc<ClientState> {
        Arc::new(ClientState {
            id: OnceLock::new(),
            handle,
            display,
            connected: AtomicBool::new(true),
            disconnected: Signal::new(),
        })
    }

    pub(crate) fn set_id(&self, id: ClientId) {
        let _ = self.id.set(id);
    }

    pub(crate) fn emit_disconnected(&self) {
        self.disconnected.emit(&());
    }
}

// The backend calls these with its state locked, nothing here may call back into it.
impl ClientData for ClientState {
    fn initialized(&self, client_id: ClientId) {
        self.set_id(client_id);
    }

    fn disconnected(&self, client_id: ClientId, reason: DisconnectReason) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        if let DisconnectReason::ProtocolError(ProtocolError {
            code, object_interface, message, ..
        }) = reason
        {
            crate::log_warn!(
                "Client {:?} killed by protocol error {} on {}: {}",
                client_id,
                code,
                object_interface,
                message
            );
        } else {
            crate::log_debug!("Client {:?} disconnected", client_id);
        }
        if let Some(display) = self.display.upgrade() {
            display.client_gone(client_id);
        }
    }
}

/// A client connected to a [`Display`](crate::Display)
///
/// Cloning gives another handle to the same client.
#[derive(Clone)]
pub struct ClientConnection {
    inner: Arc<ClientState>,
}

impl ClientConnection {
    pub(crate) fn from_state(inner: Arc<ClientState>) -> ClientConnection {
        ClientConnection { inner }
    }

    pub(crate) fn state(&self) -> &Arc<ClientState> {
        &self.inner
    }

    /// The backend id of this client
    pub fn id(&self) -> Option<ClientId> {
        self.inner.id.get().cloned()
    }

    /// The pid, uid and gid of the client process
    pub fn credentials(&self) -> Option<Credentials> {
        let handle = self.inner.handle.upgrade()?;
        handle.get_client_credentials(self.id()?).ok()
    }

    /// Whether the client is still connected
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Disconnect the client
    ///
    /// Its resources are unbound and [`disconnected()`](Self::disconnected) is emitted during the
    /// next [`Display::dispatch_events()`](crate::Display::dispatch_events).
    pub fn destroy(&self) {
        let (Some(handle), Some(id)) = (self.inner.handle.upgrade(), self.id()) else {
            return;
        };
        if self.is_connected() {
            handle.kill_client(id, DisconnectReason::ConnectionClosed);
        }
    }

    /// Emitted once when the client goes away
    pub fn disconnected(&self) -> &Signal<()> {
        &self.inner.disconnected
    }
}

impl PartialEq for ClientConnection {
    fn eq(&self, other: &ClientConnection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id())
            .field("connected", &self.is_connected())
            .finish()
    }
}
