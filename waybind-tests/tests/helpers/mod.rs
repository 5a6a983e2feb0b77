// This module contains helpers functions and types that
// are not test in themselves, but are used by several tests.

#![allow(dead_code)]

pub extern crate waybind_client as wayc;
pub extern crate waybind_server as ways;

use std::os::unix::net::UnixStream;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestServer {
    pub display: ways::Display,
    pub runtime_dir: TempDir,
}

impl TestServer {
    /// A server only accepting clients through `add_client()`
    pub fn new() -> TestServer {
        TestServer::start(ways::StartMode::ConnectClientsOnly)
    }

    /// A server also listening on a socket in a private runtime directory
    pub fn listening() -> TestServer {
        TestServer::start(ways::StartMode::ConnectToSocket)
    }

    fn start(mode: ways::StartMode) -> TestServer {
        let _ = env_logger::builder().is_test(true).try_init();
        let runtime_dir = tempfile::tempdir().unwrap();
        let mut display = ways::Display::new().unwrap();
        display.set_runtime_dir(runtime_dir.path());
        display.set_socket_name("wayland-test");
        display.start(mode).unwrap();
        TestServer { display, runtime_dir }
    }

    pub fn answer(&mut self) {
        self.display.dispatch_events().unwrap();
    }

    pub fn add_client(&mut self) -> (ways::ClientConnection, TestClient) {
        let (server_socket, client_socket) = UnixStream::pair().unwrap();
        let client = self.display.create_client(server_socket).unwrap();
        (client, TestClient::new(client_socket))
    }

    /// A connection thread pointed at the listening socket, not connected yet
    pub fn connection_thread(&self) -> wayc::ConnectionThread {
        let thread = wayc::ConnectionThread::new().unwrap();
        thread.set_runtime_dir(self.runtime_dir.path());
        thread.set_socket_name("wayland-test");
        thread
    }
}

pub struct TestClient {
    pub conn: wayc::Connection,
    pub queue: wayc::EventQueue,
    pub registry: wayc::Registry,
}

impl TestClient {
    pub fn new(socket: UnixStream) -> TestClient {
        let conn = wayc::Connection::from_socket(socket).expect("Failed to connect to server.");
        let queue = conn.new_event_queue();
        let registry = wayc::Registry::new();
        registry.set_event_queue(&queue);
        registry.create(&conn);
        registry.setup();
        TestClient { conn, queue, registry }
    }

    /// Send the pending requests, then read and dispatch whatever the server answered
    pub fn pump(&self) {
        let _ = self.conn.flush();
        let _ = self.conn.read_events();
        let _ = self.queue.dispatch();
        let _ = self.conn.default_queue().dispatch();
    }
}

/// Exchange messages between `server` and `client` until `done` holds, or give up after a while
pub fn wait_until<F>(server: &mut TestServer, client: &TestClient, mut done: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + TIMEOUT;
    loop {
        client.pump();
        server.answer();
        client.pump();
        if done() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}

/// Keep exchanging messages for a few rounds, to let anything unexpected show up
pub fn settle(server: &mut TestServer, client: &TestClient) {
    for _ in 0..10 {
        client.pump();
        server.answer();
        thread::sleep(Duration::from_millis(2));
    }
    client.pump();
}

/// Pump the server alone until `done` holds, for clients driven by a connection thread
pub fn serve_until<F>(server: &mut TestServer, mut done: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        server.answer();
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

/// Wait for the registry of `client` to have received the initial globals
pub fn sync_registry(server: &mut TestServer, client: &TestClient) {
    let announced = client.registry.interfaces_announced().spy();
    assert!(wait_until(server, client, || !announced.is_empty()));
}

/// Wait for `done` to hold without pumping anything
pub fn wait_for<F>(mut done: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}
