mod helpers;

use helpers::{serve_until, wait_for, wayc, ways, TestServer};

use wayc::{CommitFlag, ConnectionState, InterfaceKind, ProtocolObject};

struct Connected {
    thread: wayc::ConnectionThread,
    registry: wayc::Registry,
    compositor: wayc::Compositor,
}

// connects a thread to `server` and binds its compositor
fn connect(server: &mut TestServer) -> Connected {
    let thread = server.connection_thread();
    let connected = thread.connected().spy();
    thread.init_connection();
    assert!(serve_until(server, || connected.count() == 1));
    assert_eq!(thread.state(), ConnectionState::Connected);

    let conn = thread.connection().unwrap();
    let registry = wayc::Registry::new();
    let announced = registry.interfaces_announced().spy();
    registry.create(&conn);
    registry.setup();
    thread.flush();
    assert!(serve_until(server, || !announced.is_empty()));

    let entry = registry.interface(InterfaceKind::Compositor).unwrap();
    let compositor = registry.create_compositor(entry.name, entry.version).unwrap();
    thread.flush();
    Connected { thread, registry, compositor }
}

#[test]
fn server_termination() {
    let mut server = TestServer::listening();
    let server_compositor = ways::CompositorInterface::new(&server.display);
    let Connected { thread, registry, compositor } = connect(&mut server);
    let surface = compositor.create_surface();
    thread.flush();
    assert!(serve_until(&mut server, || server_compositor.surfaces().len() == 1));

    let conn = thread.connection().unwrap();
    let died = thread.connection_died().spy();
    let states = thread.state_changed().spy();
    server.display.terminate();

    assert!(wait_for(|| died.count() == 1));
    assert_eq!(thread.state(), ConnectionState::Died);
    assert_eq!(states.records(), [ConnectionState::Died]);
    assert!(!thread.has_error());
    assert!(thread.connection().is_none());

    // every handle was emptied before the death was reported
    assert!(!conn.is_alive());
    assert!(!registry.is_valid());
    assert!(!compositor.is_valid());
    assert!(!surface.is_valid());

    // destroying after the death is harmless, and so is doing it twice
    surface.destroy();
    compositor.destroy();
    compositor.destroy();
    surface.commit(CommitFlag::None);
    assert_eq!(died.count(), 1);
}

#[test]
fn client_disconnect() {
    let mut server = TestServer::listening();
    let _server_compositor = ways::CompositorInterface::new(&server.display);
    let disconnected = server.display.client_disconnected().spy();
    let Connected { thread, registry, compositor } = connect(&mut server);
    assert_eq!(server.display.clients().len(), 1);

    let died = thread.connection_died().spy();
    thread.disconnect();
    assert!(wait_for(|| thread.state() == ConnectionState::Disconnected));
    assert!(!registry.is_valid());
    assert!(!compositor.is_valid());

    assert!(serve_until(&mut server, || disconnected.count() == 1));
    assert!(server.display.clients().is_empty());
    assert!(died.is_empty());
}

#[test]
fn protocol_error_is_not_a_death() {
    let mut server = TestServer::listening();
    let _server_compositor = ways::CompositorInterface::new(&server.display);
    let Connected { thread, compositor, .. } = connect(&mut server);

    let errors = thread.error_occurred().spy();
    let died = thread.connection_died().spy();
    let surface = compositor.create_surface();
    surface.set_scale(-1);
    thread.flush();

    assert!(serve_until(&mut server, || errors.count() == 1));
    assert_eq!(thread.state(), ConnectionState::Errored);
    assert!(thread.has_error());
    assert_eq!(thread.error_code(), Some(ways::protocol::wl_surface::ERROR_INVALID_SCALE));
    assert_eq!(thread.error().unwrap().object_interface, "wl_surface");
    assert!(!surface.is_valid());
    assert!(died.is_empty());

    // an errored connection is never re-established
    let failed = thread.failed().spy();
    thread.init_connection();
    assert!(wait_for(|| failed.count() == 1));
    assert_eq!(thread.state(), ConnectionState::Errored);
}

#[test]
fn reconnect_after_restart() {
    let mut server = TestServer::listening();
    let _server_compositor = ways::CompositorInterface::new(&server.display);
    let Connected { thread, compositor, .. } = connect(&mut server);
    let old = thread.connection().unwrap();

    let died = thread.connection_died().spy();
    let connected = thread.connected().spy();
    server.display.terminate();
    assert!(wait_for(|| died.count() == 1));

    // a new compositor on the same socket
    let mut display = ways::Display::new().unwrap();
    display.set_runtime_dir(server.runtime_dir.path());
    display.set_socket_name("wayland-test");
    display.start(ways::StartMode::ConnectToSocket).unwrap();

    assert!(wait_for(|| {
        display.dispatch_events().unwrap();
        connected.count() == 1
    }));
    assert_eq!(thread.state(), ConnectionState::Connected);
    let conn = thread.connection().unwrap();
    assert!(conn.is_alive());
    assert!(conn != old);
    assert!(!old.is_alive());
    // objects of the dead connection stay dead
    assert!(!compositor.is_valid());
}
