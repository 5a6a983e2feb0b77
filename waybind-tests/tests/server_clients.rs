mod helpers;

use std::os::unix::net::UnixStream;

use helpers::{serve_until, sync_registry, wait_until, ways, TestClient, TestServer};

#[test]
fn connect_through_the_socket() {
    let mut server = TestServer::listening();
    assert_eq!(server.display.socket_name().unwrap(), "wayland-test");
    assert!(server.display.listening_fd().is_some());

    let connected = server.display.client_connected().spy();
    let stream = UnixStream::connect(server.runtime_dir.path().join("wayland-test")).unwrap();
    let client = TestClient::new(stream);
    sync_registry(&mut server, &client);

    assert_eq!(connected.count(), 1);
    let connection = connected.last().unwrap();
    assert!(connection.is_connected());
    assert_eq!(server.display.clients(), [connection.clone()]);
    let id = connection.id().unwrap();
    assert_eq!(server.display.client(&id), Some(connection.clone()));

    let credentials = connection.credentials().unwrap();
    assert_eq!(credentials.pid, std::process::id() as i32);
}

#[test]
fn client_hangs_up() {
    let mut server = TestServer::new();
    let (connection, client) = server.add_client();
    sync_registry(&mut server, &client);

    let disconnected = connection.disconnected().spy();
    let display_disconnected = server.display.client_disconnected().spy();
    drop(client);

    assert!(serve_until(&mut server, || disconnected.count() == 1));
    assert_eq!(display_disconnected.records(), [connection.clone()]);
    assert!(!connection.is_connected());
    assert!(server.display.clients().is_empty());
    assert!(connection.credentials().is_none());
}

#[test]
fn server_kills_a_client() {
    let mut server = TestServer::new();
    let (connection, client) = server.add_client();
    let (other_connection, other) = server.add_client();
    sync_registry(&mut server, &client);
    sync_registry(&mut server, &other);

    let disconnected = connection.disconnected().spy();
    let other_disconnected = other_connection.disconnected().spy();
    connection.destroy();
    // the disconnection is reported by the next dispatch
    assert!(disconnected.is_empty());
    assert!(!connection.is_connected());
    server.answer();
    assert_eq!(disconnected.count(), 1);

    // destroying again is a no-op
    connection.destroy();
    server.answer();
    assert_eq!(disconnected.count(), 1);

    assert!(wait_until(&mut server, &client, || client.conn.read_events().is_err()));
    assert!(other_disconnected.is_empty());
    assert_eq!(server.display.clients(), [other_connection]);
}

#[test]
fn terminate_disconnects_everyone() {
    let mut server = TestServer::listening();
    let (first, _first_client) = server.add_client();
    let (second, _second_client) = server.add_client();

    let disconnected = server.display.client_disconnected().spy();
    let running = server.display.running_changed().spy();
    server.display.terminate();

    assert_eq!(disconnected.count(), 2);
    assert!(!first.is_connected());
    assert!(!second.is_connected());
    assert_eq!(running.records(), [false]);
    assert!(!server.display.is_running());
    assert!(!server.runtime_dir.path().join("wayland-test").exists());
    assert!(matches!(server.display.dispatch_events(), Err(ways::DisplayError::NotRunning)));
}
